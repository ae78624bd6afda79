//! Integration tests for the upload security envelope.

use ecowatt::adapters::nvs::NvsAdapter;
use ecowatt::app::ports::Clock;
use ecowatt::app::service::GatewayService;
use ecowatt::error::Fault;
use ecowatt::security::{SecuredMessage, SecurityEnvelope};

use super::mock_hw::{Rig, TEST_PSK};

fn cloud_verifier() -> (NvsAdapter, SecurityEnvelope) {
    let mut store = NvsAdapter::new().unwrap();
    let mut verifier = SecurityEnvelope::load(&store);
    verifier.provision_psk(&mut store, TEST_PSK).unwrap();
    (store, verifier)
}

fn last_upload(rig: &Rig) -> String {
    rig.cloud.requests_to("/process").last().unwrap().body.clone()
}

#[test]
fn upload_verifies_once_and_replays_are_rejected() {
    let mut rig = Rig::new();
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 30_000);
    let body = last_upload(&rig);

    let message: SecuredMessage = serde_json::from_str(&body).unwrap();
    assert_eq!(message.nonce, 1);
    assert!(!message.encrypted);
    assert_eq!(message.mac.len(), 64);

    let (mut store, mut verifier) = cloud_verifier();
    assert!(verifier.unsecure(&mut store, &body).is_ok());
    assert_eq!(verifier.unsecure(&mut store, &body), Err(Fault::SecurityReplay));
}

#[test]
fn tampered_payload_fails_the_mac() {
    let mut rig = Rig::new();
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 30_000);

    let mut message: SecuredMessage = serde_json::from_str(&last_upload(&rig)).unwrap();
    message.payload.insert(0, 'A');
    let forged = serde_json::to_string(&message).unwrap();

    let (mut store, mut verifier) = cloud_verifier();
    assert_eq!(
        verifier.unsecure(&mut store, &forged),
        Err(Fault::SecurityMacMismatch)
    );
    assert_eq!(verifier.last_valid_nonce(), 0);
}

#[test]
fn nonce_survives_a_reboot() {
    let mut rig = Rig::new();
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 30_000);
    drop(service);

    // Same NVS, fresh service: the counter continues instead of restarting.
    let mut service = rig.boot();
    assert_eq!(service.core().envelope().nonce(), 1);
    rig.run_for_ms(&mut service, 30_000);

    let message: SecuredMessage = serde_json::from_str(&last_upload(&rig)).unwrap();
    assert_eq!(message.nonce, 2);
}

#[test]
fn missing_key_holds_batches_instead_of_sending_them() {
    let mut rig = Rig::new();
    let settings = rig.settings();
    let mut service = GatewayService::new(settings, &rig.nvs, rig.clock.now_us());
    service.start(&mut rig.ports());
    assert!(!service.core().envelope().has_key());

    rig.run_for_ms(&mut service, 30_000);
    assert_eq!(rig.cloud.count("/process"), 0);
    assert_eq!(service.core().buffer().size(), 1);
    assert!(rig.events.has_line("FAULT | error=security_key_missing"));
}
