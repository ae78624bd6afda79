//! Host doubles for the gateway ports.
//!
//! [`CloudSim`] answers every HTTP endpoint the gateway talks to: the
//! inverter's Modbus-over-HTTP API, upload, config, commands, fault
//! reports and OTA.  [`Rig`] bundles it with the host builds of the real
//! adapters (NVS, WiFi, platform, OTA slot) so a whole
//! [`GatewayService`] runs against simulated time.

#![allow(dead_code)]

use core::cell::Cell;
use core::convert::Infallible;
use std::collections::VecDeque;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockEncryptMut, KeyIvInit};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

use ecowatt::adapters::log_sink::render;
use ecowatt::adapters::nvs::NvsAdapter;
use ecowatt::adapters::ota_slot::EspOtaSlot;
use ecowatt::adapters::platform::EspPlatform;
use ecowatt::adapters::wifi::WifiAdapter;
use ecowatt::app::events::AppEvent;
use ecowatt::app::ports::{
    Clock, ConnectivityPort, EventSink, HttpMethod, HttpPort, HttpRequest, HttpResponse, Ports,
    StoragePort, TransportError,
};
use ecowatt::app::service::GatewayService;
use ecowatt::config::ConnectionSettings;
use ecowatt::peripheral::PeripheralGate;
use ecowatt::protocol::frame::{
    FN_READ_HOLDING, FN_WRITE_SINGLE, build_exception_response, build_read_response, decode_hex,
    encode_hex,
};
use ecowatt::registers::REGISTER_COUNT;

pub const DEVICE_ID: &str = "EW-TEST01";
pub const CLOUD_URL: &str = "http://cloud.test";
pub const INVERTER_URL: &str = "http://inverter.test";
pub const SLAVE: u8 = 0x11;
pub const TEST_PSK: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

pub const FIRMWARE_SECRET: &str = "ecowatt-test-firmware-secret";
pub const RELEASE_VERSION: &str = "9.9.9";
pub const TEST_SIGNING_KEY: &str = include_str!("../fixtures/ota_test_signing.pub.pem");
const TEST_SIGNATURE: &str = include_str!("../fixtures/ota_test_image.sig.b64");
const RELEASE_IV: [u8; 16] = [0x5A; 16];

// ── Simulated time ────────────────────────────────────────────

pub struct FakeClock {
    now_us: Cell<u64>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self { now_us: Cell::new(0) }
    }

    pub fn set_us(&self, us: u64) {
        if us > self.now_us.get() {
            self.now_us.set(us);
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now_us.set(self.now_us.get() + ms * 1000);
    }
}

impl Clock for FakeClock {
    fn now_us(&self) -> u64 {
        self.now_us.get()
    }

    fn sleep_ms(&self, ms: u64) {
        self.advance_ms(ms);
    }
}

// ── OTA release ───────────────────────────────────────────────

/// The signed test image: 1000 bytes starting with the ESP image magic.
pub fn test_image() -> Vec<u8> {
    let mut v: Vec<u8> = (0..1000u32).map(|i| ((i * 31 + 7) % 256) as u8).collect();
    v[0] = 0xE9;
    v
}

pub struct OtaRelease {
    pub version: String,
    pub image: Vec<u8>,
    pub chunks: Vec<Vec<u8>>,
    pub manifest: String,
}

impl OtaRelease {
    /// Encrypt [`test_image`] as one AES-256-CBC stream and split it.
    pub fn new(chunk_size: usize) -> Self {
        type Enc = cbc::Encryptor<aes::Aes256>;
        let image = test_image();
        let key: [u8; 32] = Sha256::digest(FIRMWARE_SECRET.as_bytes()).into();
        let ciphertext = Enc::new_from_slices(&key, &RELEASE_IV)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(&image);
        let chunks: Vec<Vec<u8>> = ciphertext.chunks(chunk_size).map(<[u8]>::to_vec).collect();
        let manifest = serde_json::json!({
            "update_available": true,
            "update_info": {
                "latest_version": RELEASE_VERSION,
                "sha256_hash": hex::encode(Sha256::digest(&image)),
                "signature": TEST_SIGNATURE.trim(),
                "iv": STANDARD.encode(RELEASE_IV),
                "original_size": image.len(),
                "encrypted_size": ciphertext.len(),
                "chunk_size": chunk_size,
                "total_chunks": chunks.len(),
            }
        })
        .to_string();
        Self {
            version: RELEASE_VERSION.to_string(),
            image,
            chunks,
            manifest,
        }
    }
}

// ── Cloud + inverter simulator ────────────────────────────────

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: HttpMethod,
    pub url: String,
    pub body: String,
}

pub struct CloudSim {
    pub reachable: bool,
    /// Holding registers 0..10 of the simulated inverter.
    pub registers: [u16; REGISTER_COUNT],
    /// Answer every inverter read with this exception code.
    pub inverter_exception: Option<u8>,
    /// Corrupt the CRC of the next N inverter replies.
    pub corrupt_replies: u32,
    pub upload_status: u16,
    pub config_changes: VecDeque<String>,
    pub commands: VecDeque<String>,
    pub release: Option<OtaRelease>,
    pub requests: Vec<Recorded>,
}

impl CloudSim {
    pub fn new() -> Self {
        Self {
            reachable: true,
            registers: [2304, 52, 5000, 3600, 3550, 61, 60, 312, 100, 4100],
            inverter_exception: None,
            corrupt_replies: 0,
            upload_status: 200,
            config_changes: VecDeque::new(),
            commands: VecDeque::new(),
            release: None,
            requests: Vec::new(),
        }
    }

    pub fn requests_to(&self, path: &str) -> Vec<&Recorded> {
        self.requests.iter().filter(|r| r.url.contains(path)).collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }

    fn json(status: u16, body: impl Into<String>) -> HttpResponse {
        HttpResponse {
            status,
            body: body.into().into_bytes(),
        }
    }

    fn inverter(&mut self, url: &str, body: &[u8]) -> HttpResponse {
        let request: serde_json::Value = serde_json::from_slice(body).unwrap();
        let frame = decode_hex(request["frame"].as_str().unwrap()).unwrap();
        let address = u16::from_be_bytes([frame[2], frame[3]]);
        let operand = u16::from_be_bytes([frame[4], frame[5]]);

        let mut reply = if url.ends_with("/read") {
            match self.inverter_exception {
                Some(code) => build_exception_response(frame[0], FN_READ_HOLDING, code),
                None => {
                    let start = usize::from(address);
                    let words = &self.registers[start..start + usize::from(operand)];
                    build_read_response(frame[0], words)
                }
            }
        } else {
            assert_eq!(frame[1], FN_WRITE_SINGLE);
            self.registers[usize::from(address)] = operand;
            frame.clone()
        };
        if self.corrupt_replies > 0 {
            self.corrupt_replies -= 1;
            let last = reply.len() - 1;
            reply[last] ^= 0xFF;
        }
        Self::json(200, format!("{{\"frame\":\"{}\"}}", encode_hex(&reply)))
    }

    fn ota_chunk(&self, url: &str) -> HttpResponse {
        let index: usize = url.rsplit("chunk=").next().unwrap().parse().unwrap();
        let Some(data) = self.release.as_ref().and_then(|r| r.chunks.get(index)) else {
            return Self::json(404, "{\"success\":false}");
        };
        let body = serde_json::json!({
            "success": true,
            "chunk_data": STANDARD.encode(data),
            "chunk_size": data.len(),
        });
        Self::json(200, body.to_string())
    }
}

impl HttpPort for CloudSim {
    fn send(&mut self, req: &HttpRequest<'_>) -> Result<HttpResponse, TransportError> {
        self.requests.push(Recorded {
            method: req.method,
            url: req.url.to_string(),
            body: String::from_utf8_lossy(req.body).into_owned(),
        });
        if !self.reachable {
            return Err(TransportError::ConnectionFailed);
        }
        let url = req.url;
        let response = if url.contains("/api/inverter/") {
            self.inverter(url, req.body)
        } else if url.ends_with("/process") {
            Self::json(self.upload_status, "{\"status\":\"ok\"}")
        } else if url.contains("/config/changes/") {
            let body = self.config_changes.pop_front();
            Self::json(200, body.unwrap_or_else(|| "{\"Changed\":false}".into()))
        } else if url.contains("/commands/poll/") {
            Self::json(200, self.commands.pop_front().unwrap_or_else(|| "{}".into()))
        } else if url.contains("/ota/check/") {
            let body = self.release.as_ref().map(|r| r.manifest.clone());
            Self::json(200, body.unwrap_or_else(|| "{\"update_available\":false}".into()))
        } else if url.contains("/ota/initiate/") {
            Self::json(200, "{\"success\":true,\"session_id\":\"sess-1\"}")
        } else if url.contains("/ota/chunk/") {
            self.ota_chunk(url)
        } else {
            // Result, fault recovery, OTA progress and completion reports.
            Self::json(200, "{\"status\":\"ok\"}")
        };
        Ok(response)
    }
}

// ── RS-485 enable line ────────────────────────────────────────

#[derive(Default)]
pub struct MockPin {
    pub high: bool,
    pub writes: u32,
}

impl embedded_hal::digital::ErrorType for MockPin {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.high = false;
        self.writes += 1;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.high = true;
        self.writes += 1;
        Ok(())
    }
}

// ── Event recorder ────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
    pub lines: Vec<String>,
}

impl RecordingSink {
    pub fn restarts(&self) -> Vec<&'static str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                AppEvent::RestartRequested { reason } => Some(*reason),
                _ => None,
            })
            .collect()
    }

    pub fn has_line(&self, prefix: &str) -> bool {
        self.lines.iter().any(|l| l.starts_with(prefix))
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.lines.push(render(event));
        self.events.push(event.clone());
    }
}

// ── Rig ───────────────────────────────────────────────────────

pub struct Rig {
    pub nvs: NvsAdapter,
    pub cloud: CloudSim,
    pub clock: FakeClock,
    pub wifi: WifiAdapter,
    pub platform: EspPlatform,
    pub slot: EspOtaSlot,
    pub gate: PeripheralGate<MockPin>,
    pub events: RecordingSink,
}

impl Rig {
    pub fn new() -> Self {
        let mut nvs = NvsAdapter::new().unwrap();
        nvs.write("security", "fw_secret", FIRMWARE_SECRET.as_bytes())
            .unwrap();
        let mut wifi = WifiAdapter::new();
        wifi.set_credentials("EcoWattLab", "solar-password").unwrap();
        Self {
            nvs,
            cloud: CloudSim::new(),
            clock: FakeClock::new(),
            wifi,
            platform: EspPlatform::new(),
            slot: EspOtaSlot::new(),
            gate: PeripheralGate::new(MockPin::default()),
            events: RecordingSink::default(),
        }
    }

    pub fn settings(&self) -> ConnectionSettings {
        let mut s = ConnectionSettings::defaults(DEVICE_ID);
        s.cloud_url = CLOUD_URL.to_string();
        s.inverter_url = INVERTER_URL.to_string();
        s.slave_address = SLAVE;
        s
    }

    pub fn ports(&mut self) -> Ports<'_> {
        Ports {
            storage: &mut self.nvs,
            http: &mut self.cloud,
            clock: &self.clock,
            wifi: &mut self.wifi,
            platform: &mut self.platform,
            slot: &mut self.slot,
            transceiver: &mut self.gate,
            events: &mut self.events,
        }
    }

    /// Build, key and start a service the way `main` does.
    pub fn boot_with(&mut self, settings: ConnectionSettings) -> GatewayService {
        let mut service = GatewayService::new(settings, &self.nvs, self.clock.now_us())
            .with_firmware_key(TEST_SIGNING_KEY);
        if !service.core().envelope().has_key() {
            service.provision_psk(&mut self.nvs, TEST_PSK).unwrap();
        }
        service.start(&mut self.ports());
        service
    }

    pub fn boot(&mut self) -> GatewayService {
        let settings = self.settings();
        self.boot_with(settings)
    }

    /// Drive the main loop for `ms` of simulated time, jumping straight to
    /// each scheduler deadline.
    pub fn run_for_ms(&mut self, service: &mut GatewayService, ms: u64) {
        let end = self.clock.now_us() + ms * 1000;
        loop {
            service.tick(&mut self.ports());
            match service.next_deadline_us() {
                Some(next) if next <= end => self.clock.set_us(next),
                _ => {
                    self.clock.set_us(end);
                    return;
                }
            }
        }
    }

    /// Simulate losing or regaining the access point and the cloud.
    pub fn set_network(&mut self, up: bool) {
        self.wifi.set_sim_link(up);
        self.cloud.reachable = up;
    }

    pub fn is_online(&self) -> bool {
        self.wifi.is_connected()
    }
}
