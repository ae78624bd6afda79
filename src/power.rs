//! CPU power modes.
//!
//! The radio needs the core clock at or above [`WIFI_SAFE_MIN_MHZ`]; every
//! mode is clamped to that floor before it reaches the platform.  Switching
//! to the mode already in force is a no-op, so tasks may call
//! [`PowerManager::set_mode`] on every iteration.

use log::{info, warn};
use serde::Serialize;

use crate::app::ports::{PlatformError, PlatformPort};

/// Lowest CPU frequency at which the WiFi stack stays associated.
pub const WIFI_SAFE_MIN_MHZ: u32 = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerMode {
    Performance,
    Normal,
    Eco,
}

impl PowerMode {
    /// Requested frequency before the WiFi floor is applied.
    pub const fn requested_mhz(self) -> u32 {
        match self {
            Self::Performance => 240,
            Self::Normal => 160,
            Self::Eco => 80,
        }
    }

    pub const fn effective_mhz(self) -> u32 {
        let mhz = self.requested_mhz();
        if mhz < WIFI_SAFE_MIN_MHZ {
            WIFI_SAFE_MIN_MHZ
        } else {
            mhz
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PowerStats {
    pub mode: PowerMode,
    pub cpu_mhz: u32,
    pub mode_changes: u32,
    pub failed_changes: u32,
    /// Requests that asked for less than the WiFi floor.
    pub clamped_requests: u32,
}

pub struct PowerManager {
    mode: Option<PowerMode>,
    cpu_mhz: u32,
    mode_changes: u32,
    failed_changes: u32,
    clamped_requests: u32,
}

impl PowerManager {
    pub fn new() -> Self {
        Self {
            mode: None,
            cpu_mhz: 0,
            mode_changes: 0,
            failed_changes: 0,
            clamped_requests: 0,
        }
    }

    /// Apply `mode`.  Idempotent: repeating the current mode touches nothing.
    pub fn set_mode(
        &mut self,
        platform: &mut dyn PlatformPort,
        mode: PowerMode,
    ) -> Result<(), PlatformError> {
        if self.mode == Some(mode) {
            return Ok(());
        }
        let mhz = mode.effective_mhz();
        if mhz != mode.requested_mhz() {
            self.clamped_requests += 1;
        }
        match platform.set_cpu_frequency_mhz(mhz) {
            Ok(()) => {
                info!("Power: {:?} mode, CPU at {} MHz", mode, mhz);
                self.mode = Some(mode);
                self.cpu_mhz = mhz;
                self.mode_changes += 1;
                Ok(())
            }
            Err(e) => {
                warn!("Power: switch to {:?} rejected ({:?})", mode, e);
                self.failed_changes += 1;
                Err(e)
            }
        }
    }

    pub fn mode(&self) -> Option<PowerMode> {
        self.mode
    }

    pub fn stats(&self) -> PowerStats {
        PowerStats {
            mode: self.mode.unwrap_or(PowerMode::Normal),
            cpu_mhz: self.cpu_mhz,
            mode_changes: self.mode_changes,
            failed_changes: self.failed_changes,
            clamped_requests: self.clamped_requests,
        }
    }

    /// Zero the counters; the current mode stays in force.
    pub fn reset_stats(&mut self) {
        self.mode_changes = 0;
        self.failed_changes = 0;
        self.clamped_requests = 0;
    }
}

impl Default for PowerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakePlatform {
        sets: Vec<u32>,
        reject: bool,
    }

    impl PlatformPort for FakePlatform {
        fn free_heap(&self) -> u32 {
            100_000
        }
        fn set_cpu_frequency_mhz(&mut self, mhz: u32) -> Result<(), PlatformError> {
            if self.reject {
                return Err(PlatformError::Rejected);
            }
            self.sets.push(mhz);
            Ok(())
        }
        fn restart(&mut self) {}
    }

    #[test]
    fn eco_is_held_at_wifi_floor() {
        let mut platform = FakePlatform::default();
        let mut pm = PowerManager::new();
        pm.set_mode(&mut platform, PowerMode::Eco).unwrap();
        assert_eq!(platform.sets, vec![WIFI_SAFE_MIN_MHZ]);
        assert_eq!(pm.stats().clamped_requests, 1);
    }

    #[test]
    fn repeated_mode_is_idempotent() {
        let mut platform = FakePlatform::default();
        let mut pm = PowerManager::new();
        pm.set_mode(&mut platform, PowerMode::Normal).unwrap();
        pm.set_mode(&mut platform, PowerMode::Normal).unwrap();
        pm.set_mode(&mut platform, PowerMode::Performance).unwrap();
        assert_eq!(platform.sets, vec![160, 240]);
        assert_eq!(pm.stats().mode_changes, 2);
        assert_eq!(pm.stats().cpu_mhz, 240);
    }

    #[test]
    fn rejected_switch_keeps_previous_mode() {
        let mut platform = FakePlatform::default();
        let mut pm = PowerManager::new();
        pm.set_mode(&mut platform, PowerMode::Normal).unwrap();
        platform.reject = true;
        assert!(pm.set_mode(&mut platform, PowerMode::Performance).is_err());
        assert_eq!(pm.mode(), Some(PowerMode::Normal));
        assert_eq!(pm.stats().failed_changes, 1);

        pm.reset_stats();
        assert_eq!(pm.stats().mode_changes, 0);
        assert_eq!(pm.mode(), Some(PowerMode::Normal));
    }
}
