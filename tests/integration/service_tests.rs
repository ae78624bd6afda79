//! Integration tests for the poll → compress → buffer → upload loop.

use ecowatt::adapters::nvs::NvsAdapter;
use ecowatt::app::events::AppEvent;
use ecowatt::app::ports::TransceiverPort;
use ecowatt::faults::FaultKind;
use ecowatt::scheduler::TaskId;
use ecowatt::security::SecurityEnvelope;

use super::mock_hw::{DEVICE_ID, Rig, TEST_PSK};

/// Unwrap an upload body the way the cloud does.
fn open_upload(body: &str) -> serde_json::Value {
    let mut store = NvsAdapter::new().unwrap();
    let mut verifier = SecurityEnvelope::load(&store);
    verifier.provision_psk(&mut store, TEST_PSK).unwrap();
    let payload = verifier.unsecure(&mut store, body).unwrap();
    serde_json::from_slice(&payload).unwrap()
}

#[test]
fn boot_announces_version_and_joins_wifi() {
    let mut rig = Rig::new();
    let service = rig.boot();

    assert!(matches!(rig.events.events.first(), Some(AppEvent::Started { .. })));
    assert!(rig.is_online());
    assert!(service.core().envelope().has_key());
    assert_eq!(rig.platform.restarts(), 0);
    assert_eq!(service.scheduler().slot(TaskId::Poll).period_us, 5_000_000);
    assert!(!service.scheduler().slot(TaskId::OtaProgress).enabled);
}

#[test]
fn thirty_seconds_produce_one_secured_upload() {
    let mut rig = Rig::new();
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 30_000);

    // Polls at 5, 10, ... 30 s; the first five form the batch.
    assert_eq!(rig.cloud.count("/api/inverter/read"), 6);
    assert_eq!(service.core().acquisition_stats().samples, 6);
    assert!(rig.events.has_line("BATCH | method="));
    assert!(rig.events.has_line("UPLOAD | delivered packets=1"));
    assert!(service.core().buffer().is_empty());

    let uploads = rig.cloud.requests_to("/process");
    assert_eq!(uploads.len(), 1);
    let body = uploads[0].body.clone();
    let doc = open_upload(&body);
    assert_eq!(doc["device_id"], DEVICE_ID);
    assert_eq!(doc["data_type"], "compressed_sensor_batch");
    assert_eq!(doc["total_samples"], 5);
    assert_eq!(doc["session_summary"]["packet_count"], 1);
    assert_eq!(doc["register_mapping"]["0"], "Vac1");
    assert_eq!(doc["compressed_data"][0]["decompression_metadata"]["register_count"], 10);

    // The transceiver is powered only around each exchange.
    let uart = rig.gate.stats();
    assert_eq!(uart.power_cycles, 6);
    assert!(!uart.is_on);
}

#[test]
fn samples_carry_the_inverter_readings() {
    let mut rig = Rig::new();
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 5_000);

    assert!(rig.events.has_line("SAMPLE | t=5000 Vac1=2304 Iac1=52"));
    assert!(rig.events.lines.iter().any(|l| l.ends_with("Pac=4100")));
}

#[test]
fn failed_upload_restores_batches_for_the_next_cycle() {
    let mut rig = Rig::new();
    rig.cloud.upload_status = 500;
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 30_000);

    // Three attempts, each with its own nonce, then the packet goes back.
    assert_eq!(rig.cloud.count("/process"), 3);
    assert_eq!(service.core().envelope().nonce(), 3);
    assert!(rig.events.has_line("UPLOAD | restored packets=1 queued=1"));
    assert_eq!(service.core().buffer().size(), 1);
    let stats = service.core().uploader().stats();
    assert_eq!((stats.failures, stats.restored_packets), (1, 1));
    assert_eq!(rig.cloud.count("/fault/recovery"), 1);

    rig.cloud.upload_status = 200;
    rig.run_for_ms(&mut service, 30_000);
    assert!(rig.events.has_line("UPLOAD | delivered packets=2"));
    assert!(service.core().buffer().is_empty());

    let last = rig.cloud.requests_to("/process").last().unwrap().body.clone();
    assert_eq!(open_upload(&last)["total_samples"], 10);
}

#[test]
fn low_heap_defers_the_upload() {
    let mut rig = Rig::new();
    rig.platform.set_free_heap(10 * 1024);
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 30_000);

    assert_eq!(rig.cloud.count("/process"), 0);
    assert_eq!(service.core().buffer().size(), 1);
    assert_eq!(service.core().uploader().stats().skipped_low_heap, 1);
}

#[test]
fn crc_glitch_is_retried_and_reported() {
    let mut rig = Rig::new();
    rig.cloud.corrupt_replies = 1;
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 5_000);

    assert_eq!(rig.cloud.count("/api/inverter/read"), 2);
    assert_eq!(service.core().acquisition_stats().samples, 1);
    assert_eq!(service.core().faults().count(FaultKind::CrcError), 1);

    let reports = rig.cloud.requests_to("/fault/recovery");
    assert_eq!(reports.len(), 1);
    let report: serde_json::Value = serde_json::from_str(&reports[0].body).unwrap();
    assert_eq!(report["device_id"], DEVICE_ID);
    assert_eq!(report["event_type"], "fault_recovery");
    assert_eq!(report["fault_type"], "crc_error");
    assert_eq!(report["recovery_action"], "retry_request");
    assert_eq!(report["success"], true);
}
