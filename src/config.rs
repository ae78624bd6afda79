//! Gateway configuration.
//!
//! [`GatewayConfig`] holds the tunables the cloud can change at runtime: the
//! register selection and the five task periods.  [`ConnectionSettings`]
//! holds provisioning data (endpoints, keys, identity).  Both are persisted
//! through the [`StoragePort`] and fall back to defaults when a stored value
//! is missing or out of bounds.

use log::{info, warn};

use crate::app::ports::{StoragePort, TypedStorage};
use crate::error::{Fault, Result};
use crate::registers::RegisterSelection;

pub const NS_READREGS: &str = "readregs";
pub const NS_FREQ: &str = "freq";
pub const NS_NET: &str = "net";

const KEY_REG_COUNT: &str = "reg_count";
const KEY_REGS: &str = "regs";

/// The five persisted task periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Poll,
    Upload,
    Config,
    Command,
    Ota,
}

impl Period {
    pub const ALL: [Self; 5] = [Self::Poll, Self::Upload, Self::Config, Self::Command, Self::Ota];

    pub const fn key(self) -> &'static str {
        match self {
            Self::Poll => "poll_freq",
            Self::Upload => "upload_freq",
            Self::Config => "config_freq",
            Self::Command => "command_freq",
            Self::Ota => "ota_freq",
        }
    }

    /// Lowest accepted value in microseconds.
    pub const fn min_us(self) -> u64 {
        match self {
            Self::Poll => 100_000,
            Self::Upload => 1_000_000,
            Self::Config | Self::Command => 1_000_000,
            Self::Ota => 60_000_000,
        }
    }

    pub const fn default_us(self) -> u64 {
        match self {
            Self::Poll => 5_000_000,
            Self::Upload => 30_000_000,
            Self::Config => 5_000_000,
            Self::Command => 10_000_000,
            Self::Ota => 3_600_000_000,
        }
    }
}

/// Runtime configuration snapshot.  Poll copies it once per iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub selection: RegisterSelection,
    pub poll_period_us: u64,
    pub upload_period_us: u64,
    pub config_poll_period_us: u64,
    pub command_poll_period_us: u64,
    pub ota_poll_period_us: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            selection: RegisterSelection::all(),
            poll_period_us: Period::Poll.default_us(),
            upload_period_us: Period::Upload.default_us(),
            config_poll_period_us: Period::Config.default_us(),
            command_poll_period_us: Period::Command.default_us(),
            ota_poll_period_us: Period::Ota.default_us(),
        }
    }
}

impl GatewayConfig {
    pub fn load(storage: &dyn StoragePort) -> Self {
        let mut cfg = Self {
            selection: load_selection(storage),
            ..Self::default()
        };
        for p in Period::ALL {
            cfg.set_period(p, load_period(storage, p));
        }
        info!(
            "Config: {} registers, poll={}us upload={}us config={}us command={}us ota={}us",
            cfg.selection.len(),
            cfg.poll_period_us,
            cfg.upload_period_us,
            cfg.config_poll_period_us,
            cfg.command_poll_period_us,
            cfg.ota_poll_period_us
        );
        cfg
    }

    pub fn period(&self, p: Period) -> u64 {
        match p {
            Period::Poll => self.poll_period_us,
            Period::Upload => self.upload_period_us,
            Period::Config => self.config_poll_period_us,
            Period::Command => self.command_poll_period_us,
            Period::Ota => self.ota_poll_period_us,
        }
    }

    pub fn set_period(&mut self, p: Period, us: u64) {
        let slot = match p {
            Period::Poll => &mut self.poll_period_us,
            Period::Upload => &mut self.upload_period_us,
            Period::Config => &mut self.config_poll_period_us,
            Period::Command => &mut self.command_poll_period_us,
            Period::Ota => &mut self.ota_poll_period_us,
        };
        *slot = us;
    }
}

/// Stored period, or the default when missing or below the minimum.
pub fn load_period(storage: &dyn StoragePort, p: Period) -> u64 {
    match storage.get_u64(NS_FREQ, p.key()) {
        Some(us) if us >= p.min_us() => us,
        Some(us) => {
            warn!(
                "Config: stored {}={}us below minimum {}us, using default",
                p.key(),
                us,
                p.min_us()
            );
            p.default_us()
        }
        None => p.default_us(),
    }
}

/// Persist a period.  Values below the minimum are rejected, not clamped.
pub fn store_period(storage: &mut dyn StoragePort, p: Period, us: u64) -> Result<()> {
    if us < p.min_us() {
        warn!("Config: rejecting {}={}us (minimum {}us)", p.key(), us, p.min_us());
        return Err(Fault::ConfigParseError);
    }
    storage.put_u64(NS_FREQ, p.key(), us)?;
    Ok(())
}

pub fn load_selection(storage: &dyn StoragePort) -> RegisterSelection {
    let mask = storage.get_u32(NS_READREGS, KEY_REGS);
    let count = storage.get_u32(NS_READREGS, KEY_REG_COUNT);
    match (mask, count) {
        (Some(mask), Some(count)) => RegisterSelection::from_bitmask(mask, count as usize)
            .unwrap_or_else(|| {
                warn!("Config: stored register mask {:#x} is empty, using all", mask);
                RegisterSelection::all()
            }),
        _ => RegisterSelection::all(),
    }
}

pub fn store_selection(storage: &mut dyn StoragePort, selection: &RegisterSelection) -> Result<()> {
    storage.put_u32(NS_READREGS, KEY_REGS, selection.to_bitmask())?;
    storage.put_u32(NS_READREGS, KEY_REG_COUNT, selection.len() as u32)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  Connection settings (net namespace)
// ═══════════════════════════════════════════════════════════════

const KEY_INVERTER_URL: &str = "inv_url";
const KEY_INVERTER_KEY: &str = "inv_key";
const KEY_SLAVE: &str = "slave";
const KEY_CLOUD_URL: &str = "cloud_url";
const KEY_DEVICE_ID: &str = "device_id";
const KEY_NOMINAL_W: &str = "nominal_w";
const KEY_UPLOAD_RETRIES: &str = "upload_retry";
const KEY_OTA_RESUME: &str = "ota_resume";
const KEY_OTA_TEST_FAULT: &str = "ota_fault";
const KEY_WIFI_SSID: &str = "wifi_ssid";
const KEY_WIFI_PASS: &str = "wifi_pass";

const DEFAULT_INVERTER_URL: &str = match option_env!("ECOWATT_INVERTER_URL") {
    Some(v) => v,
    None => "http://localhost:8080",
};
const DEFAULT_INVERTER_KEY: &str = match option_env!("ECOWATT_INVERTER_API_KEY") {
    Some(v) => v,
    None => "",
};
const DEFAULT_CLOUD_URL: &str = match option_env!("ECOWATT_CLOUD_URL") {
    Some(v) => v,
    None => "http://localhost:5001",
};
const DEFAULT_WIFI_SSID: &str = match option_env!("ECOWATT_WIFI_SSID") {
    Some(v) => v,
    None => "",
};
const DEFAULT_WIFI_PASS: &str = match option_env!("ECOWATT_WIFI_PASS") {
    Some(v) => v,
    None => "",
};

pub const DEFAULT_SLAVE_ADDRESS: u8 = 0x11;
pub const DEFAULT_NOMINAL_POWER_W: u32 = 10_000;
pub const MAX_UPLOAD_RETRIES: u8 = 3;

/// Endpoints, identity and provisioning switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub inverter_url: String,
    pub inverter_api_key: String,
    pub slave_address: u8,
    pub cloud_url: String,
    pub device_id: String,
    pub firmware_version: &'static str,
    pub nominal_power_w: u32,
    /// Upload retries before restore, 1..=3.
    pub max_upload_retries: u8,
    pub ota_resume: bool,
    /// Injected OTA fault name; empty when test mode is off.
    pub ota_test_fault: String,
    pub wifi_ssid: String,
    pub wifi_password: String,
}

impl ConnectionSettings {
    /// Compile-time defaults.  `device_id` comes from the factory MAC.
    pub fn defaults(device_id: &str) -> Self {
        Self {
            inverter_url: DEFAULT_INVERTER_URL.to_string(),
            inverter_api_key: DEFAULT_INVERTER_KEY.to_string(),
            slave_address: DEFAULT_SLAVE_ADDRESS,
            cloud_url: DEFAULT_CLOUD_URL.to_string(),
            device_id: device_id.to_string(),
            firmware_version: env!("CARGO_PKG_VERSION"),
            nominal_power_w: DEFAULT_NOMINAL_POWER_W,
            max_upload_retries: MAX_UPLOAD_RETRIES,
            ota_resume: true,
            ota_test_fault: String::new(),
            wifi_ssid: DEFAULT_WIFI_SSID.to_string(),
            wifi_password: DEFAULT_WIFI_PASS.to_string(),
        }
    }

    /// Defaults overridden by whatever was provisioned into `net`.
    pub fn load(storage: &dyn StoragePort, device_id: &str) -> Self {
        let mut s = Self::defaults(device_id);
        let text = |key: &str| storage.get_str(NS_NET, key).filter(|v| !v.is_empty());
        if let Some(v) = text(KEY_INVERTER_URL) {
            s.inverter_url = v;
        }
        if let Some(v) = text(KEY_INVERTER_KEY) {
            s.inverter_api_key = v;
        }
        if let Some(v) = text(KEY_CLOUD_URL) {
            s.cloud_url = v;
        }
        if let Some(v) = text(KEY_DEVICE_ID) {
            s.device_id = v;
        }
        if let Some(v) = text(KEY_WIFI_SSID) {
            s.wifi_ssid = v;
        }
        if let Some(v) = text(KEY_WIFI_PASS) {
            s.wifi_password = v;
        }
        if let Some(v) = text(KEY_OTA_TEST_FAULT) {
            s.ota_test_fault = v;
        }
        if let Some(v) = storage.get_u32(NS_NET, KEY_SLAVE) {
            s.slave_address = v as u8;
        }
        if let Some(v) = storage.get_u32(NS_NET, KEY_NOMINAL_W).filter(|w| *w > 0) {
            s.nominal_power_w = v;
        }
        if let Some(v) = storage.get_u32(NS_NET, KEY_UPLOAD_RETRIES) {
            s.max_upload_retries = (v as u8).clamp(1, MAX_UPLOAD_RETRIES);
        }
        if let Some(v) = storage.get_u32(NS_NET, KEY_OTA_RESUME) {
            s.ota_resume = v != 0;
        }
        info!(
            "Config: device {} inverter={} cloud={} fw={}",
            s.device_id, s.inverter_url, s.cloud_url, s.firmware_version
        );
        s
    }

    pub fn save(&self, storage: &mut dyn StoragePort) -> Result<()> {
        storage.put_str(NS_NET, KEY_INVERTER_URL, &self.inverter_url)?;
        storage.put_str(NS_NET, KEY_INVERTER_KEY, &self.inverter_api_key)?;
        storage.put_str(NS_NET, KEY_CLOUD_URL, &self.cloud_url)?;
        storage.put_str(NS_NET, KEY_DEVICE_ID, &self.device_id)?;
        storage.put_str(NS_NET, KEY_WIFI_SSID, &self.wifi_ssid)?;
        storage.put_str(NS_NET, KEY_WIFI_PASS, &self.wifi_password)?;
        storage.put_str(NS_NET, KEY_OTA_TEST_FAULT, &self.ota_test_fault)?;
        storage.put_u32(NS_NET, KEY_SLAVE, u32::from(self.slave_address))?;
        storage.put_u32(NS_NET, KEY_NOMINAL_W, self.nominal_power_w)?;
        storage.put_u32(NS_NET, KEY_UPLOAD_RETRIES, u32::from(self.max_upload_retries))?;
        storage.put_u32(NS_NET, KEY_OTA_RESUME, u32::from(self.ota_resume))?;
        Ok(())
    }

    /// `<cloud_url><path>` without doubled slashes.
    pub fn cloud_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.cloud_url.trim_end_matches('/'), path)
    }
}
