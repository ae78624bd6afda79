//! WiFi station-mode adapter.
//!
//! Implements [`ConnectivityPort`], the hexagonal boundary for network
//! connectivity.  The gateway only needs a station link to the cloud and
//! the inverter simulator, so there is no AP or provisioning mode.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `BlockingWifi<EspWifi>` from `esp_idf_svc::wifi`.
//! - **all other targets**: a simulated link that tests can drop and restore.
//!
//! ## Reconnection policy
//!
//! On disconnect the adapter skips an exponentially growing number of
//! polls (2 → 4 → 8 … capped at 60) between reconnect attempts.

use log::{error, info, warn};

use crate::app::ports::{ConnectivityError, ConnectivityPort};

#[cfg(target_os = "espidf")]
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};

// ───────────────────────────────────────────────────────────────
// Connection state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Disconnected,
    Connected,
    Reconnecting { attempt: u32, wait: u32 },
}

const INITIAL_BACKOFF: u32 = 2;
const MAX_BACKOFF: u32 = 60;

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn validate_ssid(ssid: &str) -> Result<(), ConnectivityError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(ConnectivityError::InvalidSsid);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ConnectivityError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 {
        return Err(ConnectivityError::InvalidPassword);
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// WiFi adapter
// ───────────────────────────────────────────────────────────────

pub struct WifiAdapter {
    state: WifiState,
    ssid: heapless::String<32>,
    password: heapless::String<64>,
    backoff: u32,
    last_rssi: Option<i8>,
    #[cfg(target_os = "espidf")]
    driver: BlockingWifi<EspWifi<'static>>,
    /// Simulation: whether the access point is reachable.
    #[cfg(not(target_os = "espidf"))]
    sim_link: bool,
}

impl WifiAdapter {
    #[cfg(target_os = "espidf")]
    pub fn new(driver: BlockingWifi<EspWifi<'static>>) -> Self {
        Self {
            state: WifiState::Disconnected,
            ssid: heapless::String::new(),
            password: heapless::String::new(),
            backoff: INITIAL_BACKOFF,
            last_rssi: None,
            driver,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self {
            state: WifiState::Disconnected,
            ssid: heapless::String::new(),
            password: heapless::String::new(),
            backoff: INITIAL_BACKOFF,
            last_rssi: None,
            sim_link: true,
        }
    }

    pub fn state(&self) -> WifiState {
        self.state
    }

    /// Simulation: make the access point (un)reachable.
    #[cfg(not(target_os = "espidf"))]
    pub fn set_sim_link(&mut self, up: bool) {
        self.sim_link = up;
    }

    fn enter_reconnect(&mut self, attempt: u32) {
        self.state = WifiState::Reconnecting {
            attempt,
            wait: self.backoff,
        };
        self.last_rssi = None;
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self) -> Result<(), ConnectivityError> {
        let cfg = Configuration::Client(ClientConfiguration {
            ssid: self.ssid.as_str().try_into().map_err(|_| ConnectivityError::InvalidSsid)?,
            password: self
                .password
                .as_str()
                .try_into()
                .map_err(|_| ConnectivityError::InvalidPassword)?,
            auth_method: if self.password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });
        let fail = |e: esp_idf_svc::sys::EspError| {
            warn!("WiFi(espidf): {}", e);
            ConnectivityError::ConnectionFailed
        };
        self.driver.set_configuration(&cfg).map_err(fail)?;
        if !self.driver.is_started().map_err(fail)? {
            self.driver.start().map_err(fail)?;
        }
        self.driver.connect().map_err(fail)?;
        self.driver.wait_netif_up().map_err(fail)?;
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self) -> Result<(), ConnectivityError> {
        if self.sim_link {
            info!("WiFi(sim): associated with '{}'", self.ssid);
            Ok(())
        } else {
            Err(ConnectivityError::ConnectionFailed)
        }
    }

    #[cfg(target_os = "espidf")]
    fn platform_disconnect(&mut self) {
        if let Err(e) = self.driver.disconnect() {
            warn!("WiFi(espidf): disconnect failed: {}", e);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_disconnect(&mut self) {}

    #[cfg(target_os = "espidf")]
    fn platform_link_up(&self) -> bool {
        self.driver.is_connected().unwrap_or(false)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_link_up(&self) -> bool {
        self.sim_link
    }

    #[cfg(target_os = "espidf")]
    fn platform_rssi(&self) -> Option<i8> {
        let mut rssi: core::ffi::c_int = 0;
        let err = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_rssi(&mut rssi) };
        (err == 0).then_some(rssi as i8)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_rssi(&self) -> Option<i8> {
        Some(-60)
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for WifiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────
// ConnectivityPort
// ───────────────────────────────────────────────────────────────

impl ConnectivityPort for WifiAdapter {
    fn connect(&mut self) -> Result<(), ConnectivityError> {
        if self.ssid.is_empty() {
            return Err(ConnectivityError::NoCredentials);
        }
        if self.state == WifiState::Connected {
            return Err(ConnectivityError::AlreadyConnected);
        }

        info!("WiFi: connecting to '{}'", self.ssid);
        match self.platform_connect() {
            Ok(()) => {
                self.state = WifiState::Connected;
                self.backoff = INITIAL_BACKOFF;
                self.last_rssi = self.platform_rssi();
                info!("WiFi: connected (RSSI={:?})", self.last_rssi);
                Ok(())
            }
            Err(e) => {
                error!("WiFi: connection failed: {}", e);
                self.enter_reconnect(0);
                Err(e)
            }
        }
    }

    fn disconnect(&mut self) {
        self.platform_disconnect();
        self.state = WifiState::Disconnected;
        self.last_rssi = None;
        info!("WiFi: disconnected");
    }

    fn is_connected(&self) -> bool {
        self.state == WifiState::Connected
    }

    fn poll(&mut self) -> bool {
        match self.state {
            WifiState::Reconnecting { attempt, wait } if wait > 1 => {
                self.state = WifiState::Reconnecting {
                    attempt,
                    wait: wait - 1,
                };
                false
            }
            WifiState::Reconnecting { attempt, .. } => {
                info!("WiFi: reconnect attempt {} (backoff {} polls)", attempt + 1, self.backoff);
                match self.platform_connect() {
                    Ok(()) => {
                        self.state = WifiState::Connected;
                        self.backoff = INITIAL_BACKOFF;
                        self.last_rssi = self.platform_rssi();
                        info!("WiFi: reconnected (RSSI={:?})", self.last_rssi);
                        true
                    }
                    Err(_) => {
                        self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
                        self.enter_reconnect(attempt + 1);
                        false
                    }
                }
            }
            WifiState::Connected => {
                if self.platform_link_up() {
                    self.last_rssi = self.platform_rssi();
                } else {
                    warn!("WiFi: connection lost, entering reconnect");
                    self.enter_reconnect(0);
                }
                false
            }
            WifiState::Disconnected => false,
        }
    }

    fn set_credentials(&mut self, ssid: &str, password: &str) -> Result<(), ConnectivityError> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        self.ssid.clear();
        self.ssid.push_str(ssid).map_err(|_| ConnectivityError::InvalidSsid)?;
        self.password.clear();
        self.password
            .push_str(password)
            .map_err(|_| ConnectivityError::InvalidPassword)?;
        info!("WiFi: credentials updated (SSID='{}')", self.ssid);
        Ok(())
    }

    fn rssi(&self) -> Option<i8> {
        self.last_rssi
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> WifiAdapter {
        let mut a = WifiAdapter::new();
        a.set_credentials("EcoWattLab", "password1").unwrap();
        a
    }

    #[test]
    fn rejects_bad_credentials() {
        let mut a = WifiAdapter::new();
        assert_eq!(a.set_credentials("", "password123"), Err(ConnectivityError::InvalidSsid));
        assert_eq!(a.set_credentials("MyNet", "short"), Err(ConnectivityError::InvalidPassword));
        assert!(a.set_credentials("OpenCafe", "").is_ok());
    }

    #[test]
    fn connect_without_credentials_fails() {
        let mut a = WifiAdapter::new();
        assert_eq!(a.connect(), Err(ConnectivityError::NoCredentials));
    }

    #[test]
    fn connect_disconnect_roundtrip() {
        let mut a = adapter();
        a.connect().unwrap();
        assert!(a.is_connected());
        assert!(a.rssi().is_some());
        assert_eq!(a.connect(), Err(ConnectivityError::AlreadyConnected));
        a.disconnect();
        assert!(!a.is_connected());
        assert!(a.rssi().is_none());
    }

    #[test]
    fn poll_reports_the_tick_the_link_returns() {
        let mut a = adapter();
        a.connect().unwrap();
        a.set_sim_link(false);
        assert!(!a.poll());
        assert!(!a.is_connected());

        // Backoff of 2 polls, first attempt fails, backoff doubles to 4.
        assert!(!a.poll());
        assert!(!a.poll());
        assert_eq!(a.state(), WifiState::Reconnecting { attempt: 1, wait: 4 });

        a.set_sim_link(true);
        let restored = (0..4).map(|_| a.poll()).collect::<Vec<_>>();
        assert_eq!(restored, vec![false, false, false, true]);
        assert!(a.is_connected());
    }
}
