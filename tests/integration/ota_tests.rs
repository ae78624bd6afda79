//! Integration tests for the OTA pipeline: check, chunked download,
//! verification, slot switch, boot validation and the fault drills.

use ecowatt::app::ports::FirmwareSlot;
use ecowatt::app::service::GatewayService;
use ecowatt::config::{Period, store_period};
use ecowatt::ota::OtaState;
use ecowatt::scheduler::TaskId;

use super::mock_hw::{DEVICE_ID, OtaRelease, Rig};

const OTA_PERIOD_US: u64 = 60_000_000;

/// A rig whose OTA check runs once a minute with `release` on offer.
fn rig_with_release(chunk_size: usize) -> Rig {
    let mut rig = Rig::new();
    store_period(&mut rig.nvs, Period::Ota, OTA_PERIOD_US).unwrap();
    rig.cloud.release = Some(OtaRelease::new(chunk_size));
    rig
}

fn boot_with_fault(rig: &mut Rig, fault: &str) -> GatewayService {
    let mut settings = rig.settings();
    settings.ota_test_fault = fault.to_string();
    rig.boot_with(settings)
}

fn completions(rig: &Rig) -> Vec<String> {
    rig.cloud
        .requests_to(&format!("/ota/{DEVICE_ID}/complete"))
        .iter()
        .map(|r| {
            let body: serde_json::Value = serde_json::from_str(&r.body).unwrap();
            body["status"].as_str().unwrap().to_string()
        })
        .collect()
}

// ── Happy path ────────────────────────────────────────────────

#[test]
fn update_is_downloaded_verified_and_staged() {
    let mut rig = rig_with_release(256);
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 62_000);

    let image = rig.cloud.release.as_ref().unwrap().image.clone();
    assert_eq!(rig.cloud.count("/ota/initiate/"), 1);
    assert_eq!(rig.cloud.count("/ota/chunk/"), 4);
    assert!(rig.slot.boot_switched());
    assert_eq!(rig.slot.staged(), image.as_slice());
    assert_eq!(rig.platform.restarts(), 1);
    assert!(rig.events.restarts().contains(&"ota_applied"));
    assert_eq!(completions(&rig), ["pending_verify"]);

    assert!(rig.events.has_line("OTA | phase=downloading"));
    assert!(rig.events.has_line("OTA | phase=verifying"));
    assert!(rig.events.has_line("OTA | phase=completed progress=100%"));
    assert_eq!(service.core().ota().state(), OtaState::Completed);
    assert!(!service.scheduler().slot(TaskId::OtaProgress).enabled);
    assert_eq!(service.core().ota().stats().completions, 1);
}

#[test]
fn no_update_offered_leaves_the_slot_alone() {
    let mut rig = Rig::new();
    store_period(&mut rig.nvs, Period::Ota, OTA_PERIOD_US).unwrap();
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 62_000);

    assert_eq!(rig.cloud.count("/ota/check/"), 1);
    assert_eq!(rig.cloud.count("/ota/initiate/"), 0);
    assert_eq!(service.core().ota().state(), OtaState::Idle);
    assert!(!rig.slot.boot_switched());
}

#[test]
fn interrupted_download_resumes_after_reboot() {
    let mut rig = rig_with_release(128);
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 61_000);

    // One watcher tick moves four of the eight chunks.
    assert_eq!(rig.cloud.count("/ota/chunk/"), 4);
    assert_eq!(service.core().ota().progress().map(|p| p.percentage()), Some(50));
    drop(service);
    rig.slot.reboot();

    let mut service = rig.boot();
    assert_eq!(service.core().ota().state(), OtaState::Downloading);
    assert_eq!(service.core().ota().stats().resumes, 1);
    rig.run_for_ms(&mut service, 2_000);

    assert_eq!(rig.cloud.count("/ota/chunk/"), 8);
    assert!(rig.cloud.requests_to("/ota/chunk/")[4].url.ends_with("chunk=4"));
    assert_eq!(
        rig.slot.staged(),
        rig.cloud.release.as_ref().unwrap().image.as_slice()
    );
    assert!(rig.slot.boot_switched());
    assert_eq!(completions(&rig), ["pending_verify"]);
}

// ── Boot validation ───────────────────────────────────────────

#[test]
fn healthy_new_image_is_confirmed_at_boot() {
    let mut rig = Rig::new();
    rig.slot.set_pending_verify(true);
    let _service = rig.boot();

    assert!(!rig.slot.is_pending_verify());
    assert!(!rig.slot.rolled_back());
    assert_eq!(rig.platform.restarts(), 0);
    assert_eq!(completions(&rig), ["success"]);
}

#[test]
fn starved_new_image_is_rolled_back_at_boot() {
    let mut rig = Rig::new();
    rig.slot.set_pending_verify(true);
    rig.platform.set_free_heap(40 * 1024);
    let _service = rig.boot();

    assert!(rig.slot.rolled_back());
    assert_eq!(rig.platform.restarts(), 1);
    assert_eq!(rig.events.restarts(), ["boot_validation"]);
    assert_eq!(completions(&rig), ["rolled_back"]);
}

#[test]
fn confirmed_image_skips_boot_validation() {
    let mut rig = Rig::new();
    let _service = rig.boot();

    assert_eq!(rig.cloud.count("/ota/check/"), 0);
    assert!(completions(&rig).is_empty());
}

// ── Fault drills ──────────────────────────────────────────────

#[test]
fn bad_hash_rolls_back() {
    let mut rig = rig_with_release(256);
    let mut service = boot_with_fault(&mut rig, "bad_hash");
    rig.run_for_ms(&mut service, 62_000);

    assert_eq!(completions(&rig), ["rolled_back"]);
    assert!(!rig.slot.boot_switched());
    assert_eq!(rig.slot.aborts(), 1);
    assert_eq!(rig.platform.restarts(), 1);
    assert!(rig.events.restarts().contains(&"ota_rollback"));
    assert_eq!(service.core().ota().stats().rollbacks, 1);
    assert_eq!(service.core().ota().state(), OtaState::Idle);
}

#[test]
fn bad_signature_rolls_back() {
    let mut rig = rig_with_release(256);
    let mut service = boot_with_fault(&mut rig, "bad_hmac");
    rig.run_for_ms(&mut service, 62_000);

    assert_eq!(completions(&rig), ["rolled_back"]);
    assert!(!rig.slot.boot_switched());
    assert!(rig.events.has_line("OTA | phase=rollback"));
}

#[test]
fn corrupt_first_chunk_abandons_the_update() {
    let mut rig = rig_with_release(256);
    let mut service = boot_with_fault(&mut rig, "corrupt_chunk");
    rig.run_for_ms(&mut service, 62_000);

    assert_eq!(rig.cloud.count("/ota/chunk/"), 1);
    assert_eq!(completions(&rig), ["failed"]);
    assert_eq!(rig.slot.aborts(), 1);
    assert_eq!(rig.platform.restarts(), 0);
    assert!(rig.events.has_line("OTA | phase=error"));
    assert_eq!(service.core().ota().stats().failures, 1);
    assert!(!service.scheduler().slot(TaskId::OtaProgress).enabled);
}

#[test]
fn chunk_timeouts_exhaust_the_failure_budget() {
    let mut rig = rig_with_release(256);
    let mut service = boot_with_fault(&mut rig, "network_timeout");
    rig.run_for_ms(&mut service, 61_000);
    assert_eq!(service.core().ota().state(), OtaState::Downloading);

    rig.run_for_ms(&mut service, 10_000);

    // The first half arrives, the rest never does.
    assert_eq!(rig.cloud.count("/ota/chunk/"), 2);
    assert_eq!(service.core().ota().stats().network_failures, 5);
    assert_eq!(completions(&rig), ["failed"]);
    assert_eq!(service.core().ota().state(), OtaState::Idle);
    assert_eq!(rig.platform.restarts(), 0);
}

#[test]
fn missing_final_chunk_fails_verification() {
    let mut rig = rig_with_release(256);
    let mut service = boot_with_fault(&mut rig, "incomplete_download");
    rig.run_for_ms(&mut service, 62_000);

    assert_eq!(rig.cloud.count("/ota/chunk/"), 3);
    assert_eq!(completions(&rig), ["failed"]);
    assert!(!rig.slot.boot_switched());
    assert_eq!(rig.platform.restarts(), 0);
}
