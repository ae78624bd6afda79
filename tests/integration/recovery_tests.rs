//! Integration tests for deadline misses, outages and restarts.

use ecowatt::deadline::MAX_DEADLINE_MISSES;

use super::mock_hw::Rig;

#[test]
fn persistent_inverter_exceptions_force_a_restart() {
    let mut rig = Rig::new();
    rig.cloud.inverter_exception = Some(0x02);
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 60_000);

    // Illegal data address is not retried: one request per poll.
    assert_eq!(rig.cloud.count("/api/inverter/read"), 12);
    assert!(rig.events.has_line("FAULT | error=modbus_exception(0x02)"));
    assert_eq!(rig.events.restarts().first(), Some(&"deadline_misses"));
    assert!(rig.platform.restarts() >= 1);

    let stats = service.core().deadline().stats();
    assert_eq!(stats.network_misses, 0);
    assert!(stats.total_misses as usize > MAX_DEADLINE_MISSES);
    assert_eq!(service.core().acquisition_stats().samples, 0);
}

#[test]
fn network_outage_does_not_restart_the_gateway() {
    let mut rig = Rig::new();
    let mut service = rig.boot();
    rig.set_network(false);
    rig.run_for_ms(&mut service, 180_000);

    assert!(!rig.is_online());
    let stats = service.core().deadline().stats();
    assert!(stats.network_misses as usize > MAX_DEADLINE_MISSES);
    assert_eq!(stats.total_misses, stats.network_misses);
    assert_eq!(stats.restarts_requested, 0);
    assert!(rig.events.restarts().is_empty());
    assert_eq!(rig.platform.restarts(), 0);

    // Offline uploads are skipped before touching the network.
    assert_eq!(rig.cloud.count("/process"), 0);
}

#[test]
fn short_outage_reconnects_and_resumes_uploads() {
    let mut rig = Rig::new();
    let mut service = rig.boot();
    rig.set_network(false);
    rig.run_for_ms(&mut service, 30_000);
    assert!(!rig.is_online());
    assert!(rig.events.has_line("FAULT | error=connection_failed"));

    rig.set_network(true);
    rig.run_for_ms(&mut service, 300_000);

    assert!(rig.is_online());
    assert!(rig.events.has_line("UPLOAD | delivered"));
    assert!(rig.events.restarts().is_empty());
    assert_eq!(service.core().deadline().stats().restarts_requested, 0);
}
