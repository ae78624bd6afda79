//! EcoWatt gateway firmware: main entry point.
//!
//! Hexagonal architecture driven by a cooperative scheduler.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  NvsAdapter      EspHttpClient   WifiAdapter    EspClock       │
//! │  (StoragePort)   (HttpPort)      (Connectivity) (Clock)        │
//! │  EspPlatform     EspOtaSlot      PeripheralGate LogEventSink   │
//! │  (PlatformPort)  (FirmwareSlot)  (Transceiver)  (EventSink)    │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │            GatewayService (pure logic)                 │    │
//! │  │  Acquisition · Pipeline · Uploader · Remote · OTA      │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Scheduler (delegate-driven) · DeadlineMonitor · Watchdog      │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::{Context, Result};
use log::{info, warn};

use esp_idf_hal::gpio::{AnyOutputPin, PinDriver};
use esp_idf_hal::prelude::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};

use ecowatt::adapters::device_id::DeviceId;
use ecowatt::adapters::http::EspHttpClient;
use ecowatt::adapters::log_sink::LogEventSink;
use ecowatt::adapters::nvs::NvsAdapter;
use ecowatt::adapters::ota_slot::EspOtaSlot;
use ecowatt::adapters::platform::EspPlatform;
use ecowatt::adapters::time::EspClock;
use ecowatt::adapters::wifi::WifiAdapter;
use ecowatt::app::ports::{Clock, ConnectivityPort, Ports};
use ecowatt::app::service::GatewayService;
use ecowatt::config::ConnectionSettings;
use ecowatt::drivers::watchdog::{MAX_IDLE_SLEEP_MS, Watchdog};
use ecowatt::peripheral::PeripheralGate;
use ecowatt::pins;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  EcoWatt gateway v{:<19}║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let mut watchdog = Watchdog::new();

    // ── 2. Storage and identity ───────────────────────────────
    let mut nvs = NvsAdapter::new().map_err(|e| anyhow::anyhow!("NVS init failed: {}", e))?;
    let settings = ConnectionSettings::load(&nvs, DeviceId::factory().as_str());
    info!("Device ID: {}", settings.device_id);

    // ── 3. Peripherals ────────────────────────────────────────
    let peripherals = Peripherals::take().context("Peripherals::take")?;
    let sys_loop = EspSystemEventLoop::take().context("eventloop")?;

    // NVS is owned by NvsAdapter; the WiFi driver keeps its config in RAM.
    let driver = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sys_loop.clone(), None)?,
        sys_loop,
    )?;
    let mut wifi = WifiAdapter::new(driver);
    if let Err(e) = wifi.set_credentials(&settings.wifi_ssid, &settings.wifi_password) {
        warn!("WiFi: stored credentials rejected ({})", e);
    }

    // SAFETY: the enable GPIO is not claimed through `peripherals.pins`.
    let enable = PinDriver::output(unsafe { AnyOutputPin::new(pins::RS485_ENABLE_GPIO) })
        .context("PinDriver::output(RS485 enable)")?;
    let mut transceiver = PeripheralGate::new(enable);

    let mut http = EspHttpClient::new();
    let clock = EspClock::new();
    let mut platform = EspPlatform::new();
    let mut slot = EspOtaSlot::new();
    let mut events = LogEventSink::new();

    // ── 4. Gateway service ────────────────────────────────────
    let mut service = GatewayService::new(settings, &nvs, clock.now_us());
    if !service.core().envelope().has_key() {
        match option_env!("ECOWATT_PSK") {
            Some(psk) => {
                if let Err(e) = service.provision_psk(&mut nvs, psk) {
                    warn!("Security: build-time PSK rejected ({})", e);
                }
            }
            None => warn!("Security: no PSK provisioned, uploads will be held"),
        }
    }

    let mut ports = Ports {
        storage: &mut nvs,
        http: &mut http,
        clock: &clock,
        wifi: &mut wifi,
        platform: &mut platform,
        slot: &mut slot,
        transceiver: &mut transceiver,
        events: &mut events,
    };
    service.start(&mut ports);

    info!("System ready. Entering scheduler loop.");

    // ── 5. Scheduler loop ─────────────────────────────────────
    loop {
        service.tick(&mut ports);
        watchdog.feed();

        let now_us = ports.clock.now_us();
        let idle_ms = service
            .next_deadline_us()
            .map_or(MAX_IDLE_SLEEP_MS, |due| due.saturating_sub(now_us) / 1000)
            .min(MAX_IDLE_SLEEP_MS);
        if idle_ms > 0 {
            ports.clock.sleep_ms(idle_ms);
        }
    }
}
