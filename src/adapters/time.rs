//! ESP32 clock adapter.
//!
//! Implements [`Clock`] for the scheduler, the retry layer and timestamps.
//!
//! - **`target_os = "espidf"`**: wraps `esp_timer_get_time()` from the
//!   ESP-IDF high-resolution timer (microsecond precision, monotonic) and
//!   `gettimeofday()` once SNTP has set the wall clock.
//! - **`not(target_os = "espidf")`**: uses `std::time::Instant` and
//!   `SystemTime` for host-side simulation.

use crate::app::ports::Clock;

/// Wall-clock readings before 2020-01-01 mean SNTP has not synced yet.
const EPOCH_2020: u64 = 1_577_836_800;

pub struct EspClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for EspClock {
    fn default() -> Self {
        Self::new()
    }
}

impl EspClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Seconds since boot (monotonic).
    pub fn uptime_secs(&self) -> u64 {
        self.now_us() / 1_000_000
    }
}

#[cfg(target_os = "espidf")]
impl Clock for EspClock {
    fn now_us(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64
    }

    fn sleep_ms(&self, ms: u64) {
        esp_idf_hal::delay::FreeRtos::delay_ms(ms.min(u64::from(u32::MAX)) as u32);
    }

    fn unix_time(&self) -> Option<u64> {
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return None;
        }
        let secs = u64::try_from(tv.tv_sec).ok()?;
        (secs >= EPOCH_2020).then_some(secs)
    }
}

#[cfg(not(target_os = "espidf"))]
impl Clock for EspClock {
    fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }

    fn unix_time(&self) -> Option<u64> {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?
            .as_secs();
        (secs >= EPOCH_2020).then_some(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_and_sleeps() {
        let clock = EspClock::new();
        let a = clock.now_us();
        clock.sleep_ms(2);
        assert!(clock.now_us() >= a + 2_000);
        assert_eq!(clock.now_ms(), clock.now_us() / 1000);
    }

    #[test]
    fn host_wall_clock_is_synced() {
        assert!(EspClock::new().unix_time().is_some_and(|s| s >= EPOCH_2020));
    }
}
