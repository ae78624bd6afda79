//! Sliding-window deadline-miss monitor.
//!
//! Every missed poll deadline is timestamped.  A restart is warranted when
//! more than [`MAX_DEADLINE_MISSES`] misses fall inside the last
//! [`MISS_WINDOW_MS`], unless the misses are explained by the network:
//!
//! - a network-related miss within the last [`NETWORK_SUPPRESS_MS`]
//!   suppresses the restart outright;
//! - for [`GRACE_PERIOD_MS`] after the network comes back the threshold is
//!   doubled.
//!
//! Lifetime counters are diagnostics only and never drive the decision.

use heapless::Deque;
use log::{info, warn};

pub const MAX_DEADLINE_MISSES: usize = 10;
pub const MISS_WINDOW_MS: u64 = 5 * 60 * 1000;
pub const GRACE_PERIOD_MS: u64 = 60 * 1000;
pub const NETWORK_SUPPRESS_MS: u64 = 60 * 1000;
/// Misses older than this are dropped when the network is restored.
pub const RESTORE_PURGE_AGE_MS: u64 = 2 * 60 * 1000;

/// Room for the doubled threshold plus the miss that crosses it.
const MISS_CAPACITY: usize = 2 * MAX_DEADLINE_MISSES + 2;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineStats {
    pub total_misses: u32,
    pub network_misses: u32,
    pub restarts_requested: u32,
}

pub struct DeadlineMonitor {
    misses: Deque<u64, MISS_CAPACITY>,
    last_network_miss_ms: Option<u64>,
    network_restored_ms: Option<u64>,
    stats: DeadlineStats,
}

impl DeadlineMonitor {
    pub fn new() -> Self {
        Self {
            misses: Deque::new(),
            last_network_miss_ms: None,
            network_restored_ms: None,
            stats: DeadlineStats::default(),
        }
    }

    pub fn record_miss(&mut self, now_ms: u64, is_network_related: bool) {
        if self.misses.is_full() {
            self.misses.pop_front();
        }
        // Cannot fail: a slot was freed above.
        let _ = self.misses.push_back(now_ms);
        self.stats.total_misses += 1;
        if is_network_related {
            self.stats.network_misses += 1;
            self.last_network_miss_ms = Some(now_ms);
        }
        warn!(
            "Deadline: miss recorded ({}), {} in window",
            if is_network_related { "network" } else { "local" },
            self.recent_misses(now_ms)
        );
    }

    /// Misses inside the evaluation window ending at `now_ms`.
    pub fn recent_misses(&self, now_ms: u64) -> usize {
        self.misses
            .iter()
            .filter(|&&t| now_ms.saturating_sub(t) <= MISS_WINDOW_MS)
            .count()
    }

    fn in_grace(&self, now_ms: u64) -> bool {
        self.network_restored_ms
            .is_some_and(|t| now_ms.saturating_sub(t) < GRACE_PERIOD_MS)
    }

    pub fn threshold(&self, now_ms: u64) -> usize {
        if self.in_grace(now_ms) {
            MAX_DEADLINE_MISSES * 2
        } else {
            MAX_DEADLINE_MISSES
        }
    }

    pub fn should_restart(&mut self, now_ms: u64) -> bool {
        if self
            .last_network_miss_ms
            .is_some_and(|t| now_ms.saturating_sub(t) < NETWORK_SUPPRESS_MS)
        {
            return false;
        }
        let recent = self.recent_misses(now_ms);
        let threshold = self.threshold(now_ms);
        if recent > threshold {
            self.stats.restarts_requested += 1;
            warn!("Deadline: {} misses in window (threshold {}), restart", recent, threshold);
            return true;
        }
        false
    }

    /// Start the grace period and forget misses older than two minutes.
    pub fn on_network_restored(&mut self, now_ms: u64) {
        self.network_restored_ms = Some(now_ms);
        let before = self.misses.len();
        let mut kept: Deque<u64, MISS_CAPACITY> = Deque::new();
        for &t in self.misses.iter() {
            if now_ms.saturating_sub(t) <= RESTORE_PURGE_AGE_MS {
                let _ = kept.push_back(t);
            }
        }
        self.misses = kept;
        info!(
            "Deadline: network restored, {} stale misses cleared, grace period started",
            before - self.misses.len()
        );
    }

    pub fn stats(&self) -> DeadlineStats {
        self.stats
    }
}

impl Default for DeadlineMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 10 * 60 * 1000;

    fn with_misses(n: usize, network: bool) -> DeadlineMonitor {
        let mut m = DeadlineMonitor::new();
        for i in 0..n {
            m.record_miss(T0 + i as u64 * 1000, network);
        }
        m
    }

    #[test]
    fn restart_after_threshold_plus_one() {
        let mut m = with_misses(MAX_DEADLINE_MISSES, false);
        assert!(!m.should_restart(T0 + 20_000));
        m.record_miss(T0 + 21_000, false);
        assert!(m.should_restart(T0 + 22_000));
        assert_eq!(m.stats().restarts_requested, 1);
    }

    #[test]
    fn recent_network_miss_suppresses_restart() {
        let mut m = with_misses(MAX_DEADLINE_MISSES, false);
        m.record_miss(T0 + 30_000, true);
        assert!(!m.should_restart(T0 + 40_000));
        // Once the network miss ages out the local misses still count.
        assert!(m.should_restart(T0 + 30_000 + NETWORK_SUPPRESS_MS));
    }

    #[test]
    fn old_misses_leave_the_window() {
        let mut m = with_misses(MAX_DEADLINE_MISSES + 1, false);
        assert!(!m.should_restart(T0 + MISS_WINDOW_MS + 5_000));
    }

    #[test]
    fn grace_period_doubles_threshold() {
        let mut m = DeadlineMonitor::new();
        m.on_network_restored(T0);
        for i in 0..=MAX_DEADLINE_MISSES {
            m.record_miss(T0 + 1_000 + i as u64, false);
        }
        assert!(!m.should_restart(T0 + 2_000));
        assert_eq!(m.threshold(T0 + 2_000), 2 * MAX_DEADLINE_MISSES);
        assert!(m.should_restart(T0 + GRACE_PERIOD_MS));
    }

    #[test]
    fn restore_purges_misses_older_than_two_minutes() {
        let mut m = DeadlineMonitor::new();
        m.record_miss(T0, false);
        m.record_miss(T0 + 150_000, false);
        m.on_network_restored(T0 + 200_000);
        assert_eq!(m.recent_misses(T0 + 200_000), 1);
        assert_eq!(m.stats().total_misses, 2);
    }
}
