//! Platform adapter: heap headroom, CPU frequency and reset.
//!
//! - **`target_os = "espidf"`**: `esp_get_free_heap_size()`,
//!   `esp_pm_configure()` with a fixed min = max frequency, and
//!   `esp_ota::restart()`.
//! - **`not(target_os = "espidf")`**: simulated values that tests can
//!   steer; `restart` only counts.

use log::{info, warn};

use crate::app::ports::{PlatformError, PlatformPort};

/// Frequencies the ESP32 PLL can run the CPU at.
const SUPPORTED_MHZ: [u32; 3] = [80, 160, 240];

pub struct EspPlatform {
    #[cfg(not(target_os = "espidf"))]
    sim_free_heap: u32,
    #[cfg(not(target_os = "espidf"))]
    sim_cpu_mhz: u32,
    #[cfg(not(target_os = "espidf"))]
    sim_restarts: u32,
}

impl Default for EspPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl EspPlatform {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            sim_free_heap: 180 * 1024,
            #[cfg(not(target_os = "espidf"))]
            sim_cpu_mhz: 240,
            #[cfg(not(target_os = "espidf"))]
            sim_restarts: 0,
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl EspPlatform {
    pub fn set_free_heap(&mut self, bytes: u32) {
        self.sim_free_heap = bytes;
    }

    pub fn cpu_mhz(&self) -> u32 {
        self.sim_cpu_mhz
    }

    pub fn restarts(&self) -> u32 {
        self.sim_restarts
    }
}

#[cfg(target_os = "espidf")]
impl PlatformPort for EspPlatform {
    fn free_heap(&self) -> u32 {
        unsafe { esp_idf_sys::esp_get_free_heap_size() }
    }

    fn set_cpu_frequency_mhz(&mut self, mhz: u32) -> Result<(), PlatformError> {
        if !SUPPORTED_MHZ.contains(&mhz) {
            return Err(PlatformError::Unsupported);
        }
        let cfg = esp_idf_sys::esp_pm_config_t {
            max_freq_mhz: mhz as i32,
            min_freq_mhz: mhz as i32,
            light_sleep_enable: false,
        };
        esp_idf_sys::esp!(unsafe { esp_idf_sys::esp_pm_configure((&cfg as *const esp_idf_sys::esp_pm_config_t).cast()) })
            .map_err(|e| {
                warn!("Platform: esp_pm_configure({} MHz) failed: {}", mhz, e);
                PlatformError::Rejected
            })
    }

    fn restart(&mut self) {
        warn!("Platform: restarting");
        esp_ota::restart();
    }
}

#[cfg(not(target_os = "espidf"))]
impl PlatformPort for EspPlatform {
    fn free_heap(&self) -> u32 {
        self.sim_free_heap
    }

    fn set_cpu_frequency_mhz(&mut self, mhz: u32) -> Result<(), PlatformError> {
        if !SUPPORTED_MHZ.contains(&mhz) {
            return Err(PlatformError::Unsupported);
        }
        self.sim_cpu_mhz = mhz;
        info!("Platform(sim): CPU at {} MHz", mhz);
        Ok(())
    }

    fn restart(&mut self) {
        self.sim_restarts += 1;
        warn!("Platform(sim): restart #{}", self.sim_restarts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pll_frequencies_are_accepted() {
        let mut p = EspPlatform::new();
        assert_eq!(p.set_cpu_frequency_mhz(100), Err(PlatformError::Unsupported));
        p.set_cpu_frequency_mhz(160).unwrap();
        assert_eq!(p.cpu_mhz(), 160);
    }

    #[test]
    fn restart_is_counted() {
        let mut p = EspPlatform::new();
        p.set_free_heap(1024);
        p.restart();
        assert_eq!((p.free_heap(), p.restarts()), (1024, 1));
    }
}
