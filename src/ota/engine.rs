//! OTA state machine driven by the scheduler.
//!
//! The OTA task calls [`OtaEngine::check`] on its long period; while a
//! download is active the progress watcher calls [`OtaEngine::step`], which
//! fetches a bounded number of chunks per tick so polls keep running.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::app::ports::{FirmwareSlot, HttpMethod, HttpRequest, PlatformPort, StoragePort};
use crate::config::ConnectionSettings;
use crate::error::{Fault, Result};
use crate::net::{NetIo, OTA_TIMEOUT_MS};
use crate::security;

use super::crypto::{ChunkDecryptor, FIRMWARE_MAGIC, derive_key};
use super::manifest::{CheckResponse, Manifest};
use super::progress::DownloadProgress;
use super::signature::{FIRMWARE_PUBLIC_KEY_PEM, verify_digest};
use super::{CompletionStatus, OtaState, OtaTestFault};

const MODULE: &str = "OTA";

/// Firmware secret in the `security` namespace; the AES key is its SHA-256.
pub const KEY_FIRMWARE_SECRET: &str = "fw_secret";
const DEFAULT_FIRMWARE_SECRET: Option<&str> = option_env!("ECOWATT_FIRMWARE_SECRET");

pub const MAX_CHUNKS_PER_TICK: u32 = 4;
/// Consecutive failed chunk fetches before the download is abandoned.
pub const MAX_NETWORK_FAILURES: u8 = 5;
/// Free heap required for a new image to be confirmed.
pub const MIN_BOOT_HEAP_BYTES: u32 = 50 * 1024;

const PROGRESS_SAVE_INTERVAL: u32 = 4;
const PROGRESS_REPORT_INTERVAL_MS: u64 = 5_000;
const PROGRESS_REPORT_STEP: u8 = 10;
const VERIFY_BLOCK: usize = 4096;

// ── Wire bodies ───────────────────────────────────────────────

#[derive(Serialize)]
struct InitiateRequest<'a> {
    firmware_version: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InitiateResponse {
    success: bool,
    session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChunkResponse {
    success: bool,
    chunk_data: String,
    chunk_size: Option<u32>,
}

#[derive(Serialize)]
struct ProgressReport<'a> {
    phase: &'static str,
    progress: u8,
    message: &'a str,
    timestamp: u64,
}

#[derive(Serialize)]
struct CompletionReport<'a> {
    version: &'a str,
    status: CompletionStatus,
    timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_msg: Option<&'a str>,
}

// ── Engine ────────────────────────────────────────────────────

/// Ports the engine drives besides the network.
pub struct OtaContext<'a> {
    pub storage: &'a mut dyn StoragePort,
    pub slot: &'a mut dyn FirmwareSlot,
    pub platform: &'a mut dyn PlatformPort,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OtaStats {
    pub checks: u32,
    pub updates_started: u32,
    pub resumes: u32,
    pub chunks_downloaded: u32,
    pub bytes_written: u64,
    pub network_failures: u32,
    pub failures: u32,
    pub rollbacks: u32,
    pub completions: u32,
}

/// Result of the post-update boot check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootCheck {
    /// The running image was already confirmed.
    NotPending,
    Valid,
    RolledBack,
}

pub struct OtaEngine {
    base_url: String,
    device_id: String,
    current_version: String,
    public_key_pem: String,
    firmware_key: Option<[u8; 32]>,
    resume_enabled: bool,
    test_fault: Option<OtaTestFault>,
    max_chunks_per_tick: u32,
    state: OtaState,
    manifest: Option<Manifest>,
    progress: Option<DownloadProgress>,
    decryptor: Option<ChunkDecryptor>,
    session_id: Option<String>,
    network_failures: u8,
    last_report: Option<(u64, u8, OtaState)>,
    transitions: heapless::Vec<OtaState, 8>,
    stats: OtaStats,
}

impl OtaEngine {
    pub fn new(settings: &ConnectionSettings, storage: &dyn StoragePort) -> Self {
        let mut buf = [0u8; 128];
        let firmware_key = match storage.read(security::NAMESPACE, KEY_FIRMWARE_SECRET, &mut buf) {
            Ok(len) if len > 0 => Some(derive_key(&buf[..len])),
            _ => DEFAULT_FIRMWARE_SECRET
                .filter(|s| !s.is_empty())
                .map(|s| derive_key(s.as_bytes())),
        };
        if firmware_key.is_none() {
            warn!("OTA: no firmware secret provisioned, updates disabled");
        }
        let test_fault = OtaTestFault::parse(&settings.ota_test_fault);
        if let Some(fault) = test_fault {
            warn!("OTA: test mode, injecting {:?}", fault);
        }
        Self {
            base_url: settings.cloud_endpoint("/ota"),
            device_id: settings.device_id.clone(),
            current_version: settings.firmware_version.to_string(),
            public_key_pem: FIRMWARE_PUBLIC_KEY_PEM.to_string(),
            firmware_key,
            resume_enabled: settings.ota_resume,
            test_fault,
            max_chunks_per_tick: MAX_CHUNKS_PER_TICK,
            state: OtaState::Idle,
            manifest: None,
            progress: None,
            decryptor: None,
            session_id: None,
            network_failures: 0,
            last_report: None,
            transitions: heapless::Vec::new(),
            stats: OtaStats::default(),
        }
    }

    /// Verify signatures against `pem` instead of the release key.
    pub fn with_public_key(mut self, pem: &str) -> Self {
        self.public_key_pem = pem.to_string();
        self
    }

    pub fn set_max_chunks_per_tick(&mut self, chunks: u32) {
        self.max_chunks_per_tick = chunks.max(1);
    }

    pub fn state(&self) -> OtaState {
        self.state
    }

    /// A download or verification is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            OtaState::Downloading | OtaState::Verifying | OtaState::Applying
        )
    }

    pub fn progress(&self) -> Option<&DownloadProgress> {
        self.progress.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn stats(&self) -> OtaStats {
        self.stats
    }

    /// Phases entered since the last call, oldest first.
    pub fn drain_transitions(&mut self) -> heapless::Vec<OtaState, 8> {
        core::mem::take(&mut self.transitions)
    }

    fn percentage(&self) -> u8 {
        self.progress.as_ref().map_or(0, DownloadProgress::percentage)
    }

    fn transition(&mut self, next: OtaState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition(next) {
            warn!("OTA: unexpected transition {} -> {}", self.state, next);
        }
        info!("OTA: {} -> {}", self.state, next);
        self.state = next;
        if self.transitions.is_full() {
            self.transitions.remove(0);
        }
        let _ = self.transitions.push(next);
    }

    // ── Cloud reports ─────────────────────────────────────────

    fn report_progress(&mut self, net: &mut NetIo<'_>, message: &str, force: bool) {
        let now = net.clock.now_ms();
        let pct = self.percentage();
        let due = force
            || self.last_report.is_none_or(|(at, last_pct, phase)| {
                phase != self.state
                    || now.saturating_sub(at) >= PROGRESS_REPORT_INTERVAL_MS
                    || pct.saturating_sub(last_pct) >= PROGRESS_REPORT_STEP
            });
        if !due {
            return;
        }
        self.last_report = Some((now, pct, self.state));
        let body = ProgressReport {
            phase: self.state.name(),
            progress: pct,
            message,
            timestamp: net.clock.unix_time().unwrap_or(now / 1000),
        };
        let Ok(json) = serde_json::to_vec(&body) else {
            return;
        };
        let url = format!("{}/{}/progress", self.base_url, self.device_id);
        let request = post_json(&url, &json);
        // Best effort: one attempt, never delays the download.
        if let Err(fault) = net.send_once(&request) {
            warn!("{}: progress report failed ({})", MODULE, fault);
        }
    }

    fn report_completion(
        &mut self,
        net: &mut NetIo<'_>,
        version: &str,
        status: CompletionStatus,
        error_msg: Option<&str>,
    ) {
        let body = CompletionReport {
            version,
            status,
            timestamp: net
                .clock
                .unix_time()
                .unwrap_or_else(|| net.clock.now_ms() / 1000),
            error_msg,
        };
        let Ok(json) = serde_json::to_vec(&body) else {
            return;
        };
        let url = format!("{}/{}/complete", self.base_url, self.device_id);
        if let Err(fault) = net.send(MODULE, &post_json(&url, &json)) {
            warn!("{}: completion report failed ({})", MODULE, fault);
        }
    }

    // ── Checking ──────────────────────────────────────────────

    /// Ask the cloud for a newer image and start downloading it.  Returns
    /// `Ok(true)` when a download session was opened.
    pub fn check(&mut self, net: &mut NetIo<'_>, ctx: &mut OtaContext<'_>) -> Result<bool> {
        if !matches!(self.state, OtaState::Idle | OtaState::Completed) {
            return Ok(false);
        }
        self.state = OtaState::Idle;
        self.stats.checks += 1;
        self.transition(OtaState::Checking);

        match self.open_session(net, ctx) {
            Ok(true) => {
                self.report_progress(net, "download started", true);
                Ok(true)
            }
            Ok(false) => {
                self.transition(OtaState::Idle);
                Ok(false)
            }
            Err(fault) if fault.is_network() => {
                warn!("{}: update check failed ({})", MODULE, fault);
                self.transition(OtaState::Idle);
                Err(fault)
            }
            Err(fault) => {
                self.fail(net, ctx, fault);
                Err(fault)
            }
        }
    }

    fn open_session(&mut self, net: &mut NetIo<'_>, ctx: &mut OtaContext<'_>) -> Result<bool> {
        let url = format!(
            "{}/check/{}?version={}",
            self.base_url, self.device_id, self.current_version
        );
        let response = net.send(MODULE, &get(&url))?;
        let body: CheckResponse =
            serde_json::from_slice(&response.body).map_err(|_| Fault::OtaManifestInvalid)?;
        let Some(info) = body.update_info.filter(|_| body.update_available) else {
            return Ok(false);
        };
        let manifest = Manifest::from_info(&info)?;
        if manifest.version == self.current_version {
            return Ok(false);
        }
        let key = self.firmware_key.ok_or(Fault::SecurityKeyMissing)?;
        info!(
            "{}: update {} -> {} ({} B, {} chunks)",
            MODULE, self.current_version, manifest.version, manifest.original_size, manifest.total_chunks
        );
        manifest.save(ctx.storage)?;

        let request = serde_json::to_vec(&InitiateRequest {
            firmware_version: &manifest.version,
        })
        .map_err(|_| Fault::OtaManifestInvalid)?;
        let url = format!("{}/initiate/{}", self.base_url, self.device_id);
        let response = net.send(MODULE, &post_json(&url, &request))?;
        let session: InitiateResponse =
            serde_json::from_slice(&response.body).map_err(|_| Fault::OtaManifestInvalid)?;
        if !session.success {
            warn!("{}: cloud refused to open a session", MODULE);
            return Err(Fault::OtaManifestInvalid);
        }

        ctx.slot.begin(manifest.original_size, false)?;
        let mut progress = DownloadProgress::start(
            &manifest.version,
            manifest.total_chunks,
            manifest.original_size,
            manifest.iv,
        );
        progress.last_activity_ms = net.clock.now_ms();
        progress.save(ctx.storage)?;

        self.decryptor = Some(ChunkDecryptor::new(key, manifest.iv));
        self.session_id = session.session_id;
        self.progress = Some(progress);
        self.manifest = Some(manifest);
        self.network_failures = 0;
        self.stats.updates_started += 1;
        self.transition(OtaState::Downloading);
        Ok(true)
    }

    /// Pick up a download interrupted by a reboot.
    pub fn resume(&mut self, ctx: &mut OtaContext<'_>) -> bool {
        let (Some(progress), Some(manifest)) =
            (DownloadProgress::load(ctx.storage), Manifest::load(ctx.storage))
        else {
            return false;
        };
        let usable = self.resume_enabled
            && progress.state == OtaState::Downloading
            && progress.version == manifest.version
            && progress.total_chunks == manifest.total_chunks
            && !progress.is_complete();
        let key = match (usable, self.firmware_key) {
            (true, Some(key)) => key,
            _ => {
                info!("{}: discarding stored download state", MODULE);
                self.clear_persisted(ctx.storage);
                return false;
            }
        };
        if let Err(e) = ctx.slot.begin(manifest.original_size, true) {
            warn!("{}: slot unavailable for resume ({})", MODULE, e);
            self.clear_persisted(ctx.storage);
            return false;
        }
        info!(
            "{}: resuming {} at chunk {}/{}",
            MODULE, manifest.version, progress.chunks_received, progress.total_chunks
        );
        self.decryptor = Some(ChunkDecryptor::new(key, progress.iv_next));
        self.progress = Some(progress);
        self.manifest = Some(manifest);
        self.network_failures = 0;
        self.stats.resumes += 1;
        self.transition(OtaState::Downloading);
        true
    }

    // ── Downloading ───────────────────────────────────────────

    /// Advance an active update by one watcher tick.
    pub fn step(&mut self, net: &mut NetIo<'_>, ctx: &mut OtaContext<'_>) -> OtaState {
        if self.state != OtaState::Downloading {
            return self.state;
        }
        if let Err(fault) = self.download_some(net, ctx) {
            self.fail(net, ctx, fault);
            return self.state;
        }
        if self.progress.as_ref().is_some_and(DownloadProgress::is_complete) {
            self.verify_and_apply(net, ctx);
        } else {
            self.report_progress(net, "downloading", false);
        }
        self.state
    }

    fn download_some(&mut self, net: &mut NetIo<'_>, ctx: &mut OtaContext<'_>) -> Result<()> {
        for _ in 0..self.max_chunks_per_tick {
            let Some(progress) = self.progress.as_mut() else {
                return Err(Fault::OtaChunkInvalid);
            };
            let index = progress.chunks_received;
            if index >= progress.total_chunks {
                break;
            }
            if self.test_fault == Some(OtaTestFault::IncompleteDownload)
                && index + 1 == progress.total_chunks
            {
                warn!("{}: test fault, skipping final chunk", MODULE);
                progress.chunks_received = progress.total_chunks;
                break;
            }

            match self.fetch_chunk(net, index) {
                Ok(ciphertext) => {
                    self.network_failures = 0;
                    self.apply_chunk(ctx, index, &ciphertext, net.clock.now_ms())?;
                }
                Err(fault) if fault.is_network() && !fault.is_configuration_error() => {
                    self.network_failures += 1;
                    self.stats.network_failures += 1;
                    if self.network_failures >= MAX_NETWORK_FAILURES {
                        warn!("{}: network failure budget exhausted", MODULE);
                        return Err(fault);
                    }
                    warn!(
                        "{}: chunk {} unavailable ({}), {} of {} failures",
                        MODULE, index, fault, self.network_failures, MAX_NETWORK_FAILURES
                    );
                    break;
                }
                Err(fault) => return Err(fault),
            }
        }
        Ok(())
    }

    fn fetch_chunk(&mut self, net: &mut NetIo<'_>, index: u32) -> Result<Vec<u8>> {
        let (version, total) = match &self.manifest {
            Some(m) => (m.version.as_str(), m.total_chunks),
            None => return Err(Fault::OtaChunkInvalid),
        };
        if self.test_fault == Some(OtaTestFault::NetworkTimeout) && index >= total / 2 {
            return Err(Fault::Timeout);
        }
        let url = format!(
            "{}/chunk/{}?version={}&chunk={}",
            self.base_url, self.device_id, version, index
        );
        let response = net.send(MODULE, &get(&url))?;
        let body: ChunkResponse =
            serde_json::from_slice(&response.body).map_err(|_| Fault::OtaChunkInvalid)?;
        if !body.success {
            return Err(Fault::OtaChunkInvalid);
        }
        let data = STANDARD
            .decode(body.chunk_data.trim())
            .map_err(|_| Fault::OtaChunkInvalid)?;
        if body.chunk_size.is_some_and(|n| n as usize != data.len()) {
            warn!("{}: chunk {} size mismatch", MODULE, index);
            return Err(Fault::OtaChunkInvalid);
        }
        Ok(data)
    }

    fn apply_chunk(
        &mut self,
        ctx: &mut OtaContext<'_>,
        index: u32,
        ciphertext: &[u8],
        now_ms: u64,
    ) -> Result<()> {
        let (Some(manifest), Some(progress), Some(decryptor)) =
            (&self.manifest, &mut self.progress, &mut self.decryptor)
        else {
            return Err(Fault::OtaChunkInvalid);
        };
        let last = manifest.is_last_chunk(index);
        let mut plain = decryptor.decrypt(ciphertext, last)?;

        if index == 0 {
            if self.test_fault == Some(OtaTestFault::CorruptChunk) {
                if let Some(b) = plain.first_mut() {
                    *b ^= 0xFF;
                }
            }
            if plain.first() != Some(&FIRMWARE_MAGIC) {
                warn!("{}: first chunk lacks the image magic byte", MODULE);
                return Err(Fault::OtaChunkInvalid);
            }
        }
        let end = progress.bytes_written as usize + plain.len();
        if end > manifest.original_size as usize {
            return Err(Fault::OtaChunkInvalid);
        }
        ctx.slot.write(progress.bytes_written, &plain)?;

        progress.bytes_written = end as u32;
        progress.chunks_received += 1;
        progress.iv_next = decryptor.iv();
        progress.last_activity_ms = now_ms;
        self.stats.chunks_downloaded += 1;
        self.stats.bytes_written += plain.len() as u64;
        if progress.chunks_received % PROGRESS_SAVE_INTERVAL == 0 || last {
            progress.save(ctx.storage)?;
        }
        Ok(())
    }

    // ── Verifying / applying ──────────────────────────────────

    fn verify_and_apply(&mut self, net: &mut NetIo<'_>, ctx: &mut OtaContext<'_>) {
        self.transition(OtaState::Verifying);
        self.report_progress(net, "verifying image", true);

        let Some(manifest) = self.manifest.clone() else {
            self.fail(net, ctx, Fault::OtaManifestInvalid);
            return;
        };
        let written = self.progress.as_ref().map_or(0, |p| p.bytes_written);
        if written != manifest.original_size {
            warn!(
                "{}: image incomplete ({} of {} bytes)",
                MODULE, written, manifest.original_size
            );
            self.fail(net, ctx, Fault::OtaChunkInvalid);
            return;
        }

        let digest = match hash_slot(ctx.slot, manifest.original_size) {
            Ok(d) => d,
            Err(fault) => {
                self.fail(net, ctx, fault);
                return;
            }
        };
        let mut expected = manifest.sha256;
        if self.test_fault == Some(OtaTestFault::BadHash) {
            expected[0] ^= 0xFF;
        }
        if digest != expected {
            warn!("{}: image hash mismatch", MODULE);
            self.rollback(net, ctx, Fault::OtaHashMismatch);
            return;
        }

        let mut signature = manifest.signature.clone();
        if self.test_fault == Some(OtaTestFault::BadHmac) {
            if let Some(b) = signature.first_mut() {
                *b ^= 0xFF;
            }
        }
        if let Err(fault) = verify_digest(&self.public_key_pem, &digest, &signature) {
            warn!("{}: signature rejected", MODULE);
            self.rollback(net, ctx, fault);
            return;
        }

        self.transition(OtaState::Applying);
        self.report_progress(net, "image verified, switching slot", true);
        if let Err(e) = ctx.slot.set_boot() {
            self.fail(net, ctx, e.into());
            return;
        }
        self.clear_persisted(ctx.storage);
        self.report_completion(net, &manifest.version, CompletionStatus::PendingVerify, None);
        self.stats.completions += 1;
        self.transition(OtaState::Completed);
        info!("{}: {} staged, restarting", MODULE, manifest.version);
        ctx.platform.restart();
    }

    // ── Terminal paths ────────────────────────────────────────

    /// Give up on the current update without touching the boot slot.
    pub fn abort(&mut self, net: &mut NetIo<'_>, ctx: &mut OtaContext<'_>) {
        if self.is_active() {
            self.finish(net, ctx, None, false);
        }
    }

    fn fail(&mut self, net: &mut NetIo<'_>, ctx: &mut OtaContext<'_>, fault: Fault) {
        self.finish(net, ctx, Some(fault), false);
    }

    fn rollback(&mut self, net: &mut NetIo<'_>, ctx: &mut OtaContext<'_>, fault: Fault) {
        self.finish(net, ctx, Some(fault), true);
    }

    fn finish(
        &mut self,
        net: &mut NetIo<'_>,
        ctx: &mut OtaContext<'_>,
        fault: Option<Fault>,
        rollback: bool,
    ) {
        let message = fault.map_or_else(|| "aborted".to_string(), |f| f.to_string());
        if let Some(fault) = fault {
            let action = if rollback { "rollback" } else { "abandon_update" };
            net.faults
                .log_fault(net.clock.now_ms(), fault, &message, MODULE, false, action, 0);
        }
        self.transition(OtaState::Error);
        self.report_progress(net, &message, true);
        ctx.slot.abort();

        let version = self
            .manifest
            .as_ref()
            .map_or_else(|| self.current_version.clone(), |m| m.version.clone());
        self.clear_persisted(ctx.storage);
        self.progress = None;
        self.decryptor = None;
        self.session_id = None;

        if rollback {
            self.transition(OtaState::Rollback);
            self.report_progress(net, &message, true);
            self.report_completion(net, &version, CompletionStatus::RolledBack, Some(&message));
            self.stats.rollbacks += 1;
            self.manifest = None;
            warn!("{}: rolled back, restarting into the running slot", MODULE);
            ctx.platform.restart();
        } else {
            self.report_completion(net, &version, CompletionStatus::Failed, Some(&message));
            self.stats.failures += 1;
            self.manifest = None;
        }
        self.transition(OtaState::Idle);
    }

    fn clear_persisted(&mut self, storage: &mut dyn StoragePort) {
        if DownloadProgress::clear(storage).is_err() || Manifest::clear(storage).is_err() {
            warn!("{}: could not clear stored update state", MODULE);
        }
    }

    // ── Boot validation ───────────────────────────────────────

    /// Confirm or reject a freshly booted image.
    pub fn validate_boot(
        &mut self,
        net: &mut NetIo<'_>,
        ctx: &mut OtaContext<'_>,
        wifi_connected: bool,
    ) -> Result<BootCheck> {
        if !ctx.slot.is_pending_verify() {
            return Ok(BootCheck::NotPending);
        }
        let heap = ctx.platform.free_heap();
        let url = format!(
            "{}/check/{}?version={}",
            self.base_url, self.device_id, self.current_version
        );
        let reachable = wifi_connected
            && matches!(net.send_once(&get(&url)), Ok(_) | Err(Fault::HttpError(_)));

        let failure = if heap < MIN_BOOT_HEAP_BYTES {
            Some(format!("free heap {} B below {} B", heap, MIN_BOOT_HEAP_BYTES))
        } else if !wifi_connected {
            Some("WiFi did not associate".to_string())
        } else if !reachable {
            Some("cloud endpoint unreachable".to_string())
        } else if self.current_version.trim().is_empty() {
            Some("version string missing".to_string())
        } else {
            None
        };

        let version = self.current_version.clone();
        match failure {
            None => {
                ctx.slot.mark_valid()?;
                info!("{}: {} passed boot diagnostics, marked valid", MODULE, version);
                self.report_completion(net, &version, CompletionStatus::Success, None);
                Ok(BootCheck::Valid)
            }
            Some(reason) => {
                warn!("{}: boot diagnostics failed: {}", MODULE, reason);
                if reachable {
                    self.report_completion(net, &version, CompletionStatus::RolledBack, Some(&reason));
                }
                ctx.slot.mark_invalid()?;
                self.stats.rollbacks += 1;
                ctx.platform.restart();
                Ok(BootCheck::RolledBack)
            }
        }
    }
}

fn get(url: &str) -> HttpRequest<'_> {
    HttpRequest {
        method: HttpMethod::Get,
        url,
        headers: &[("Accept", "application/json")],
        body: &[],
        timeout_ms: OTA_TIMEOUT_MS,
    }
}

fn post_json<'a>(url: &'a str, body: &'a [u8]) -> HttpRequest<'a> {
    HttpRequest {
        method: HttpMethod::Post,
        url,
        headers: &[("Content-Type", "application/json")],
        body,
        timeout_ms: OTA_TIMEOUT_MS,
    }
}

/// SHA-256 of the first `size` bytes of the inactive slot.
fn hash_slot(slot: &dyn FirmwareSlot, size: u32) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; VERIFY_BLOCK];
    let mut offset = 0u32;
    while offset < size {
        let want = ((size - offset) as usize).min(VERIFY_BLOCK);
        let got = slot.read(offset, &mut buf[..want])?;
        if got == 0 {
            return Err(Fault::OtaChunkInvalid);
        }
        hasher.update(&buf[..got]);
        offset += got as u32;
    }
    Ok(hasher.finalize().into())
}
