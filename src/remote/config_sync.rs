//! Cloud-pushed configuration changes.
//!
//! The cloud answers `GET /config/changes/<device>` with flags and new
//! values.  Accepted values are written to NVS first; the service then calls
//! the matching `apply_*` to load them into the live configuration and
//! reprogram the scheduler.  Frequencies travel in seconds and are stored in
//! microseconds.

use log::{info, warn};
use serde::Deserialize;

use crate::app::ports::{HttpMethod, HttpRequest, StoragePort};
use crate::config::{self, GatewayConfig, Period};
use crate::error::{Fault, Result};
use crate::net::{NetIo, UPLOAD_TIMEOUT_MS};
use crate::registers::RegisterSelection;

const MODULE: &str = "ConfigSync";

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ChangesResponse {
    #[serde(rename = "Changed")]
    changed: bool,
    poll_freq_changed: bool,
    new_poll_timer: Option<f64>,
    upload_freq_changed: bool,
    new_upload_timer: Option<f64>,
    regs_changed: bool,
    regs_count: Option<u32>,
    regs: Option<u32>,
}

/// Which fields were accepted and stored.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConfigChanges {
    pub regs_changed: bool,
    pub poll_changed: bool,
    pub upload_changed: bool,
}

impl ConfigChanges {
    pub fn any(&self) -> bool {
        self.regs_changed || self.poll_changed || self.upload_changed
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConfigSyncStats {
    pub checks: u32,
    pub accepted: u32,
    pub rejected: u32,
    pub failures: u32,
}

/// Seconds from the wire to whole microseconds.
fn seconds_to_us(seconds: f64) -> Option<u64> {
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let us = (seconds * 1_000_000.0).round();
    (us <= u64::MAX as f64).then_some(us as u64)
}

pub struct ConfigManager {
    url: String,
    stats: ConfigSyncStats,
}

impl ConfigManager {
    pub fn new(cloud_url: &str, device_id: &str) -> Self {
        Self {
            url: format!("{}/config/changes/{}", cloud_url.trim_end_matches('/'), device_id),
            stats: ConfigSyncStats::default(),
        }
    }

    pub fn stats(&self) -> ConfigSyncStats {
        self.stats
    }

    /// Fetch pending changes and persist the acceptable ones.
    pub fn check_for_changes(
        &mut self,
        net: &mut NetIo<'_>,
        storage: &mut dyn StoragePort,
    ) -> Result<ConfigChanges> {
        self.stats.checks += 1;
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: &self.url,
            headers: &[("Accept", "application/json")],
            body: &[],
            timeout_ms: UPLOAD_TIMEOUT_MS,
        };
        let response = net.send(MODULE, &request).inspect_err(|_| {
            self.stats.failures += 1;
        })?;
        let body: ChangesResponse = serde_json::from_slice(&response.body).map_err(|_| {
            self.stats.failures += 1;
            warn!("{}: unparseable change set", MODULE);
            Fault::ConfigParseError
        })?;
        self.store_changes(storage, &body)
    }

    fn store_changes(
        &mut self,
        storage: &mut dyn StoragePort,
        body: &ChangesResponse,
    ) -> Result<ConfigChanges> {
        let mut changes = ConfigChanges::default();
        if !body.changed {
            return Ok(changes);
        }

        if body.poll_freq_changed {
            changes.poll_changed = self.store_period(storage, Period::Poll, body.new_poll_timer)?;
        }
        if body.upload_freq_changed {
            changes.upload_changed =
                self.store_period(storage, Period::Upload, body.new_upload_timer)?;
        }
        if body.regs_changed {
            let selection = body
                .regs
                .zip(body.regs_count)
                .and_then(|(mask, count)| RegisterSelection::from_bitmask(mask, count as usize));
            match selection {
                Some(sel) => {
                    config::store_selection(storage, &sel)?;
                    info!("{}: register selection stored ({} registers)", MODULE, sel.len());
                    self.stats.accepted += 1;
                    changes.regs_changed = true;
                }
                None => {
                    warn!("{}: register change without a usable mask, ignored", MODULE);
                    self.stats.rejected += 1;
                }
            }
        }
        Ok(changes)
    }

    fn store_period(
        &mut self,
        storage: &mut dyn StoragePort,
        period: Period,
        seconds: Option<f64>,
    ) -> Result<bool> {
        let Some(us) = seconds.and_then(seconds_to_us) else {
            warn!("{}: {} change without a value, ignored", MODULE, period.key());
            self.stats.rejected += 1;
            return Ok(false);
        };
        match config::store_period(storage, period, us) {
            Ok(()) => {
                info!("{}: {} -> {} us stored", MODULE, period.key(), us);
                self.stats.accepted += 1;
                Ok(true)
            }
            Err(Fault::ConfigParseError) => {
                self.stats.rejected += 1;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// Reload the poll period into `cfg`; returns the new value.
pub fn apply_poll(storage: &dyn StoragePort, cfg: &mut GatewayConfig) -> u64 {
    apply_period(storage, cfg, Period::Poll)
}

pub fn apply_upload(storage: &dyn StoragePort, cfg: &mut GatewayConfig) -> u64 {
    apply_period(storage, cfg, Period::Upload)
}

fn apply_period(storage: &dyn StoragePort, cfg: &mut GatewayConfig, period: Period) -> u64 {
    let us = config::load_period(storage, period);
    cfg.set_period(period, us);
    us
}

/// Reload the register selection into `cfg`.
pub fn apply_registers<'a>(storage: &dyn StoragePort, cfg: &'a mut GatewayConfig) -> &'a RegisterSelection {
    cfg.selection = config::load_selection(storage);
    &cfg.selection
}
