//! Integration tests for cloud-driven configuration and commands.

use ecowatt::app::events::AppEvent;
use ecowatt::config::{Period, load_period};
use ecowatt::registers::RegisterId;
use ecowatt::scheduler::TaskId;

use super::mock_hw::Rig;

fn result_bodies(rig: &Rig) -> Vec<serde_json::Value> {
    rig.cloud
        .requests_to("/commands/result")
        .iter()
        .map(|r| serde_json::from_str(&r.body).unwrap())
        .collect()
}

// ── Configuration ─────────────────────────────────────────────

#[test]
fn poll_period_and_selection_follow_the_cloud() {
    let mut rig = Rig::new();
    rig.cloud.config_changes.push_back(
        r#"{"Changed":true,"pollFreqChanged":true,"newPollTimer":2,
            "regsChanged":true,"regsCount":2,"regs":513}"#
            .into(),
    );
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 5_000);

    assert_eq!(service.scheduler().slot(TaskId::Poll).period_us, 2_000_000);
    assert_eq!(load_period(&rig.nvs, Period::Poll), 2_000_000);
    assert!(rig.events.events.iter().any(|e| matches!(
        e,
        AppEvent::ConfigApplied { task: TaskId::Poll, period_us: 2_000_000 }
    )));
    assert_eq!(
        service.core().config().selection.as_slice(),
        &[RegisterId::Vac1, RegisterId::Pac]
    );

    // The next poll fires one new period after the change.
    rig.run_for_ms(&mut service, 2_000);
    assert!(rig.events.has_line("SAMPLE | t=7000 Vac1=2304 Pac=4100"));
}

#[test]
fn upload_period_change_reprograms_the_scheduler() {
    let mut rig = Rig::new();
    rig.cloud
        .config_changes
        .push_back(r#"{"Changed":true,"uploadFreqChanged":true,"newUploadTimer":60}"#.into());
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 5_000);

    assert_eq!(service.scheduler().slot(TaskId::Upload).period_us, 60_000_000);
    assert_eq!(service.scheduler().slot(TaskId::Poll).period_us, 5_000_000);

    // The old 30 s upload no longer fires.
    rig.run_for_ms(&mut service, 30_000);
    assert_eq!(rig.cloud.count("/process"), 0);
}

#[test]
fn unchanged_config_leaves_everything_alone() {
    let mut rig = Rig::new();
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 20_000);

    assert_eq!(rig.cloud.count("/config/changes/"), 4);
    assert!(!rig.events.has_line("CONFIG |"));
    assert_eq!(service.core().config().selection.len(), 10);
}

// ── Commands ──────────────────────────────────────────────────

#[test]
fn set_power_limits_the_export_register() {
    let mut rig = Rig::new();
    rig.cloud.commands.push_back(
        r#"{"command":{"command_id":7,"command_type":"set_power","parameters":{"power_watts":5000}}}"#
            .into(),
    );
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 10_000);

    // 5000 W of a 10 kW inverter.
    assert_eq!(rig.cloud.registers[8], 50);
    assert_eq!(rig.cloud.count("/api/inverter/write"), 1);
    assert!(rig.events.has_line("COMMAND | type=set_power success=true"));

    let results = result_bodies(&rig);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["command_id"], 7);
    assert_eq!(results[0]["status"], "completed");
    assert_eq!(service.core().executor().stats().successful, 1);
}

#[test]
fn write_register_and_stats_commands_round_trip() {
    let mut rig = Rig::new();
    rig.cloud.commands.push_back(
        r#"{"command":{"command_id":"c-1","command_type":"write_register",
            "parameters":{"register_address":8,"value":75}}}"#
            .into(),
    );
    rig.cloud.commands.push_back(
        r#"{"command":{"command_id":"c-2","command_type":"get_peripheral_stats","parameters":{}}}"#
            .into(),
    );
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 20_000);

    assert_eq!(rig.cloud.registers[8], 75);
    let results = result_bodies(&rig);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["command_id"], "c-1");
    let stats: serde_json::Value =
        serde_json::from_str(results[1]["result"].as_str().unwrap()).unwrap();
    assert!(stats["power_cycles"].as_u64().unwrap() >= 1);
    assert_eq!(stats["is_on"], false);
}

#[test]
fn unknown_command_is_reported_as_failed() {
    let mut rig = Rig::new();
    rig.cloud.commands.push_back(
        r#"{"command":{"command_id":9,"command_type":"self_destruct","parameters":{}}}"#.into(),
    );
    let mut service = rig.boot();
    rig.run_for_ms(&mut service, 10_000);

    let results = result_bodies(&rig);
    assert_eq!(results[0]["status"], "failed");
    assert!(results[0]["result"].as_str().unwrap().contains("self_destruct"));
    assert!(rig.events.has_line("COMMAND | type=self_destruct success=false"));
    assert_eq!(service.core().executor().stats().failed, 1);
}
