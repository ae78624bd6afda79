//! Cooperative periodic task scheduler.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Scheduler.tick(now)                   │
//! │                                                              │
//! │  ┌──────┐ ┌────────┐ ┌────────┐ ┌─────────┐ ┌─────┐ ┌──────┐ │
//! │  │ Poll │ │ Upload │ │ Config │ │ Command │ │ OTA │ │ OTA  │ │
//! │  │      │ │        │ │        │ │         │ │     │ │ prog │ │
//! │  └──┬───┘ └───┬────┘ └───┬────┘ └────┬────┘ └──┬──┘ └──┬───┘ │
//! │     └─────────┴──────────┴─────┬─────┴─────────┴───────┘     │
//! │                                ▼                             │
//! │                    TaskDelegate.run_task()                   │
//! │                  (GatewayCore runs the body)                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Due tasks run to completion one after another in priority order, so at
//! most one network call is ever in flight.  A task that fell more than one
//! period behind fires once and its missed firings are counted as skipped.

use core::fmt;

use log::{debug, info};

use crate::app::ports::TaskDelegate;
use crate::config::{GatewayConfig, Period};

/// Period of the OTA progress watcher while an update is running.
pub const OTA_PROGRESS_PERIOD_US: u64 = 1_000_000;

// ═══════════════════════════════════════════════════════════════
//  Task identity
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskId {
    Poll,
    Upload,
    Config,
    Command,
    Ota,
    OtaProgress,
}

impl TaskId {
    pub const ALL: [Self; 6] = [
        Self::Poll,
        Self::Upload,
        Self::Config,
        Self::Command,
        Self::Ota,
        Self::OtaProgress,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Upload => "upload",
            Self::Config => "config",
            Self::Command => "command",
            Self::Ota => "ota",
            Self::OtaProgress => "ota_progress",
        }
    }

    /// Lower runs first when several tasks are due on the same tick.
    pub const fn priority(self) -> u8 {
        match self {
            Self::Poll => 0,
            Self::Upload => 1,
            Self::OtaProgress => 2,
            Self::Command => 3,
            Self::Config => 4,
            Self::Ota => 5,
        }
    }

    /// The persisted period backing this task, if any.
    pub const fn period(self) -> Option<Period> {
        match self {
            Self::Poll => Some(Period::Poll),
            Self::Upload => Some(Period::Upload),
            Self::Config => Some(Period::Config),
            Self::Command => Some(Period::Command),
            Self::Ota => Some(Period::Ota),
            Self::OtaProgress => None,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSlot {
    pub period_us: u64,
    pub next_fire_us: u64,
    pub enabled: bool,
    pub runs: u32,
    /// Firings dropped because the task was more than a period late.
    pub skipped: u32,
}

impl TaskSlot {
    fn new(period_us: u64, now_us: u64, enabled: bool) -> Self {
        Self {
            period_us: period_us.max(1),
            next_fire_us: now_us.saturating_add(period_us),
            enabled,
            runs: 0,
            skipped: 0,
        }
    }
}

pub struct Scheduler {
    slots: [TaskSlot; TaskId::ALL.len()],
}

impl Scheduler {
    /// Arm every task from `cfg`; each first fires one period after `now_us`.
    /// The OTA progress watcher starts disabled.
    pub fn new(cfg: &GatewayConfig, now_us: u64) -> Self {
        let slots = TaskId::ALL.map(|task| match task.period() {
            Some(p) => TaskSlot::new(cfg.period(p), now_us, true),
            None => TaskSlot::new(OTA_PROGRESS_PERIOD_US, now_us, false),
        });
        info!(
            "Scheduler: poll={}us upload={}us config={}us command={}us ota={}us",
            cfg.poll_period_us,
            cfg.upload_period_us,
            cfg.config_poll_period_us,
            cfg.command_poll_period_us,
            cfg.ota_poll_period_us
        );
        Self { slots }
    }

    pub fn slot(&self, task: TaskId) -> &TaskSlot {
        &self.slots[task.index()]
    }

    /// Run every due task once, highest priority first.  Returns how many ran.
    pub fn tick(&mut self, now_us: u64, delegate: &mut dyn TaskDelegate) -> usize {
        let mut due: heapless::Vec<TaskId, 6> = TaskId::ALL
            .into_iter()
            .filter(|t| {
                let slot = &self.slots[t.index()];
                slot.enabled && slot.next_fire_us <= now_us
            })
            .collect();
        due.sort_unstable_by_key(|t| t.priority());

        for &task in &due {
            let slot = &mut self.slots[task.index()];
            slot.runs += 1;
            let next = slot.next_fire_us.saturating_add(slot.period_us);
            if next <= now_us {
                let behind = (now_us - slot.next_fire_us) / slot.period_us;
                slot.skipped += behind as u32;
                slot.next_fire_us = now_us.saturating_add(slot.period_us);
                debug!("Scheduler: {} {} firings behind, coalesced", task, behind);
            } else {
                slot.next_fire_us = next;
            }
            delegate.run_task(task, now_us);
        }
        due.len()
    }

    /// Reprogram a period; the next firing is one new period after `now_us`.
    pub fn set_period(&mut self, task: TaskId, period_us: u64, now_us: u64) {
        let slot = &mut self.slots[task.index()];
        slot.period_us = period_us.max(1);
        slot.next_fire_us = now_us.saturating_add(slot.period_us);
        info!("Scheduler: {} period now {} us", task, slot.period_us);
    }

    /// Enabling re-arms the task to fire one period after `now_us`.
    pub fn set_enabled(&mut self, task: TaskId, enabled: bool, now_us: u64) {
        let slot = &mut self.slots[task.index()];
        if slot.enabled == enabled {
            return;
        }
        slot.enabled = enabled;
        if enabled {
            slot.next_fire_us = now_us.saturating_add(slot.period_us);
        }
        debug!("Scheduler: {} {}", task, if enabled { "enabled" } else { "disabled" });
    }

    /// Earliest pending firing among enabled tasks.
    pub fn next_deadline_us(&self) -> Option<u64> {
        self.slots
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.next_fire_us)
            .min()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    /// Test delegate that records every run.
    struct RecordingDelegate {
        runs: Vec<(TaskId, u64)>,
    }

    impl TaskDelegate for RecordingDelegate {
        fn run_task(&mut self, task: TaskId, now_us: u64) {
            self.runs.push((task, now_us));
        }
    }

    fn config() -> GatewayConfig {
        let mut cfg = GatewayConfig::default();
        cfg.poll_period_us = 1_000_000;
        cfg.upload_period_us = 3_000_000;
        cfg
    }

    #[test]
    fn poll_fires_every_period() {
        let mut sched = Scheduler::new(&config(), 0);
        let mut d = RecordingDelegate { runs: Vec::new() };
        for s in 0..=4u64 {
            sched.tick(s * 1_000_000, &mut d);
        }
        let polls = d.runs.iter().filter(|(t, _)| *t == TaskId::Poll).count();
        assert_eq!(polls, 4);
    }

    #[test]
    fn due_tasks_run_in_priority_order() {
        let mut sched = Scheduler::new(&config(), 0);
        let mut d = RecordingDelegate { runs: Vec::new() };
        sched.tick(3_000_000, &mut d);
        let order: Vec<TaskId> = d.runs.iter().map(|(t, _)| *t).collect();
        assert_eq!(order, vec![TaskId::Poll, TaskId::Upload]);
    }

    #[test]
    fn late_task_fires_once_and_counts_skips() {
        let mut sched = Scheduler::new(&config(), 0);
        let mut d = RecordingDelegate { runs: Vec::new() };
        sched.tick(4_500_000, &mut d);
        let slot = sched.slot(TaskId::Poll);
        assert_eq!(slot.runs, 1);
        assert_eq!(slot.skipped, 3);
        assert_eq!(slot.next_fire_us, 5_500_000);
    }

    #[test]
    fn reprogrammed_period_takes_effect_from_now() {
        let mut sched = Scheduler::new(&config(), 0);
        sched.set_period(TaskId::Poll, 2_000_000, 500_000);
        assert_eq!(sched.slot(TaskId::Poll).next_fire_us, 2_500_000);
        assert_eq!(sched.next_deadline_us(), Some(2_500_000));
    }

    #[test]
    fn progress_watcher_only_runs_when_enabled() {
        let mut sched = Scheduler::new(&config(), 0);
        let mut d = RecordingDelegate { runs: Vec::new() };
        sched.tick(1_000_000, &mut d);
        assert!(d.runs.iter().all(|(t, _)| *t != TaskId::OtaProgress));
        sched.set_enabled(TaskId::OtaProgress, true, 1_000_000);
        sched.tick(2_000_000, &mut d);
        assert!(d.runs.iter().any(|(t, _)| *t == TaskId::OtaProgress));
    }
}
