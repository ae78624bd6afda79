//! Task Watchdog Timer (TWDT) driver.
//!
//! Resets the gateway if the scheduler loop stops returning.  The loop
//! sleeps until the next task deadline, so the timeout has to cover the
//! longest idle gap plus the slowest blocking HTTP exchange (an OTA chunk
//! fetch at 30 s).

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::{self as sys, esp};
use log::{info, warn};

/// Longest time the main loop may go without feeding.
pub const WATCHDOG_TIMEOUT_MS: u32 = 60_000;

/// Upper bound for one idle sleep so the loop always feeds in time.
pub const MAX_IDLE_SLEEP_MS: u64 = (WATCHDOG_TIMEOUT_MS / 4) as u64;

pub struct Watchdog {
    subscribed: bool,
    feeds: u64,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog {
    /// Configure the TWDT and subscribe the calling task.
    #[cfg(target_os = "espidf")]
    pub fn new() -> Self {
        let cfg = sys::esp_task_wdt_config_t {
            timeout_ms: WATCHDOG_TIMEOUT_MS,
            idle_core_mask: 0,
            trigger_panic: true,
        };
        if let Err(e) = esp!(unsafe { sys::esp_task_wdt_reconfigure(&cfg) }) {
            warn!("Watchdog: reconfigure returned {} (may already be configured)", e);
        }
        let subscribed = match esp!(unsafe { sys::esp_task_wdt_add(core::ptr::null_mut()) }) {
            Ok(()) => {
                info!("Watchdog: subscribed ({} ms, panic on trigger)", WATCHDOG_TIMEOUT_MS);
                true
            }
            Err(e) => {
                warn!("Watchdog: failed to subscribe ({})", e);
                false
            }
        };
        Self { subscribed, feeds: 0 }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        info!("Watchdog(sim): {} ms timeout, not enforced", WATCHDOG_TIMEOUT_MS);
        Self {
            subscribed: true,
            feeds: 0,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn feeds(&self) -> u64 {
        self.feeds
    }

    /// Feed the watchdog once per loop iteration.
    pub fn feed(&mut self) {
        if !self.subscribed {
            return;
        }
        self.feeds += 1;
        #[cfg(target_os = "espidf")]
        if let Err(e) = esp!(unsafe { sys::esp_task_wdt_reset() }) {
            warn!("Watchdog: reset failed ({})", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_sleep_leaves_headroom() {
        assert!(MAX_IDLE_SLEEP_MS * 2 < u64::from(WATCHDOG_TIMEOUT_MS));
        let mut wd = Watchdog::new();
        wd.feed();
        wd.feed();
        assert!(wd.is_subscribed());
        assert_eq!(wd.feeds(), 2);
    }
}
