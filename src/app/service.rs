//! Gateway service: the hexagonal core.
//!
//! [`GatewayService`] owns the cooperative [`Scheduler`] and the
//! [`GatewayCore`] that runs each task body.  All I/O flows through the
//! [`Ports`] bundle passed into [`GatewayService::start`] and
//! [`GatewayService::tick`], so the whole gateway runs against mock adapters
//! on the host.
//!
//! ```text
//!                 ┌──────────────── GatewayService ───────────────┐
//!  Clock ───────▶ │ Scheduler ──run_task──▶ GatewayCore            │ ──▶ EventSink
//!                 │                    Poll · Upload · Config      │
//!  HttpPort ◀────▶│                    Command · Ota · OtaProgress │
//!                 └────────────────────────────────────────────────┘
//! ```
//!
//! Task bodies cannot reprogram the scheduler while it is iterating; period
//! and enable changes are queued and applied once the tick returns.

use log::{info, warn};

use crate::acquisition::{Acquisition, AcquisitionStats};
use crate::buffer::{DEFAULT_CAPACITY, SharedRingBuffer};
use crate::config::{ConnectionSettings, GatewayConfig};
use crate::deadline::DeadlineMonitor;
use crate::error::Fault;
use crate::faults::FaultLogger;
use crate::net::NetIo;
use crate::ota::{BootCheck, OtaContext, OtaEngine, OtaState};
use crate::pipeline::{CompressedPacket, Pipeline, PipelineStats, SAMPLES_PER_BATCH};
use crate::power::{PowerManager, PowerMode};
use crate::protocol::ProtocolAdapter;
use crate::remote::config_sync::{apply_poll, apply_registers, apply_upload};
use crate::remote::{CommandContext, CommandExecutor, ConfigManager};
use crate::scheduler::{Scheduler, TaskId};
use crate::security::SecurityEnvelope;
use crate::uploader::{UploadContext, UploadOutcome, Uploader};

use super::events::AppEvent;
use super::ports::{Ports, StoragePort, TaskDelegate};

/// Scheduler reprogramming requested by a task body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScheduleChange {
    Period(TaskId, u64),
    Enable(TaskId, bool),
}

// ───────────────────────────────────────────────────────────────
// GatewayCore
// ───────────────────────────────────────────────────────────────

/// Domain state shared by every task.
pub struct GatewayCore {
    settings: ConnectionSettings,
    config: GatewayConfig,
    acquisition: Acquisition,
    pipeline: Pipeline,
    buffer: SharedRingBuffer<CompressedPacket>,
    uploader: Uploader,
    envelope: SecurityEnvelope,
    config_sync: ConfigManager,
    executor: CommandExecutor,
    ota: OtaEngine,
    power: PowerManager,
    deadline: DeadlineMonitor,
    faults: FaultLogger,
    pending: heapless::Vec<ScheduleChange, 8>,
}

impl GatewayCore {
    fn new(settings: ConnectionSettings, storage: &dyn StoragePort) -> Self {
        let config = GatewayConfig::load(storage);
        let adapter = ProtocolAdapter::new(&settings.inverter_url, &settings.inverter_api_key);
        let envelope = SecurityEnvelope::load(storage);
        if !envelope.has_key() {
            warn!("Service: no PSK provisioned, uploads will fail closed");
        }
        Self {
            acquisition: Acquisition::new(adapter, settings.slave_address),
            pipeline: Pipeline::new(SAMPLES_PER_BATCH),
            buffer: SharedRingBuffer::new(DEFAULT_CAPACITY),
            uploader: Uploader::new(
                &settings.cloud_url,
                &settings.device_id,
                settings.max_upload_retries,
            ),
            envelope,
            config_sync: ConfigManager::new(&settings.cloud_url, &settings.device_id),
            executor: CommandExecutor::new(
                &settings.cloud_url,
                &settings.device_id,
                settings.nominal_power_w,
            ),
            ota: OtaEngine::new(&settings, storage),
            power: PowerManager::new(),
            deadline: DeadlineMonitor::new(),
            faults: FaultLogger::new(
                &settings.device_id,
                Some(settings.cloud_endpoint("/fault/recovery")),
            ),
            pending: heapless::Vec::new(),
            config,
            settings,
        }
    }

    fn schedule(&mut self, change: ScheduleChange) {
        if self.pending.push(change).is_err() {
            warn!("Service: schedule change queue full, dropping {:?}", change);
        }
    }

    fn record_fault(&mut self, ports: &mut Ports<'_>, fault: Fault, recovered: bool) {
        ports.events.emit(&AppEvent::FaultRecorded { fault, recovered });
    }

    fn run(&mut self, task: TaskId, now_us: u64, ports: &mut Ports<'_>) {
        match task {
            TaskId::Poll => self.poll_once(now_us, ports),
            TaskId::Upload => self.upload_once(ports),
            TaskId::Config => self.sync_config(ports),
            TaskId::Command => self.run_command(ports),
            TaskId::Ota => self.check_ota(ports),
            TaskId::OtaProgress => self.advance_ota(ports),
        }
    }

    // ── Poll ──────────────────────────────────────────────────

    fn poll_once(&mut self, now_us: u64, ports: &mut Ports<'_>) {
        // Snapshot so a config push mid-iteration cannot split a sample.
        let selection = self.config.selection.clone();
        let period_us = self.config.poll_period_us;

        ports.transceiver.uart_on(ports.clock.now_ms());
        let result = {
            let mut net = NetIo::new(&mut *ports.http, ports.clock, &mut self.faults);
            self.acquisition.poll(&mut net, &selection)
        };
        ports.transceiver.uart_off(ports.clock.now_ms());

        let now_ms = ports.clock.now_ms();
        let elapsed_us = ports.clock.now_us().saturating_sub(now_us);

        match result {
            Ok(sample) => {
                ports.events.emit(&AppEvent::SampleAcquired {
                    timestamp_ms: sample.timestamp_ms,
                    values: sample.pairs().collect(),
                });
                match self.pipeline.on_sample(sample, ports.clock, &self.buffer) {
                    Ok(Some(batch)) => ports.events.emit(&AppEvent::BatchQueued {
                        method: batch.method,
                        original_size: batch.original_size,
                        compressed_size: batch.compressed_size,
                        queued: batch.queued,
                    }),
                    Ok(None) => {}
                    Err(fault) => {
                        self.faults
                            .log_fault(now_ms, fault, "batch dropped", "Pipeline", false, "drop_batch", 0);
                        self.record_fault(ports, fault, false);
                    }
                }
                if elapsed_us > period_us {
                    warn!("Service: poll took {} us, period {} us", elapsed_us, period_us);
                    self.deadline.record_miss(now_ms, false);
                }
            }
            Err(fault) => {
                self.pipeline.on_dropped_sample();
                self.record_fault(ports, fault, false);
                let network = fault.is_network() || !ports.wifi.is_connected();
                self.deadline.record_miss(now_ms, network);
            }
        }
    }

    // ── Upload ────────────────────────────────────────────────

    fn upload_once(&mut self, ports: &mut Ports<'_>) {
        let connected = ports.wifi.is_connected();
        let free_heap = ports.platform.free_heap();
        let result = {
            let mut net = NetIo::new(&mut *ports.http, ports.clock, &mut self.faults);
            let mut ctx = UploadContext {
                storage: &mut *ports.storage,
                envelope: &mut self.envelope,
                buffer: &self.buffer,
                connected,
                free_heap,
            };
            self.uploader.upload(&mut net, &mut ctx)
        };
        match result {
            Ok(UploadOutcome::Delivered { packets, bytes }) => {
                ports.events.emit(&AppEvent::UploadDelivered { packets, bytes });
            }
            Ok(UploadOutcome::Restored { packets, queued }) => {
                ports.events.emit(&AppEvent::UploadRestored { packets, queued });
            }
            Ok(UploadOutcome::Skipped(_)) => {}
            Err(fault) => self.record_fault(ports, fault, false),
        }
    }

    // ── Config ────────────────────────────────────────────────

    fn sync_config(&mut self, ports: &mut Ports<'_>) {
        let changes = {
            let mut net = NetIo::new(&mut *ports.http, ports.clock, &mut self.faults);
            self.config_sync.check_for_changes(&mut net, &mut *ports.storage)
        };
        let changes = match changes {
            Ok(c) => c,
            Err(fault) => {
                self.record_fault(ports, fault, false);
                return;
            }
        };

        if changes.poll_changed {
            let us = apply_poll(&*ports.storage, &mut self.config);
            self.schedule(ScheduleChange::Period(TaskId::Poll, us));
            ports.events.emit(&AppEvent::ConfigApplied { task: TaskId::Poll, period_us: us });
        }
        if changes.upload_changed {
            let us = apply_upload(&*ports.storage, &mut self.config);
            self.schedule(ScheduleChange::Period(TaskId::Upload, us));
            ports.events.emit(&AppEvent::ConfigApplied { task: TaskId::Upload, period_us: us });
        }
        if changes.regs_changed {
            let registers = apply_registers(&*ports.storage, &mut self.config).len();
            ports.events.emit(&AppEvent::SelectionApplied { registers });
        }
    }

    // ── Command ───────────────────────────────────────────────

    fn run_command(&mut self, ports: &mut Ports<'_>) {
        let result = {
            let mut net = NetIo::new(&mut *ports.http, ports.clock, &mut self.faults);
            let mut ctx = CommandContext {
                acquisition: &mut self.acquisition,
                power: &mut self.power,
                transceiver: &mut *ports.transceiver,
            };
            self.executor.poll(&mut net, &mut ctx)
        };
        match result {
            Ok(Some(outcome)) => ports.events.emit(&AppEvent::CommandExecuted {
                command_type: outcome.command_type,
                success: outcome.success,
            }),
            Ok(None) => {}
            Err(fault) => self.record_fault(ports, fault, false),
        }
    }

    // ── OTA ───────────────────────────────────────────────────

    fn check_ota(&mut self, ports: &mut Ports<'_>) {
        if !ports.wifi.is_connected() {
            return;
        }
        let result = {
            let mut net = NetIo::new(&mut *ports.http, ports.clock, &mut self.faults);
            let mut ctx = OtaContext {
                storage: &mut *ports.storage,
                slot: &mut *ports.slot,
                platform: &mut *ports.platform,
            };
            self.ota.check(&mut net, &mut ctx)
        };
        match result {
            Ok(true) => self.schedule(ScheduleChange::Enable(TaskId::OtaProgress, true)),
            Ok(false) => {}
            Err(fault) => self.record_fault(ports, fault, false),
        }
        self.publish_ota_phases(ports);
    }

    fn advance_ota(&mut self, ports: &mut Ports<'_>) {
        {
            let mut net = NetIo::new(&mut *ports.http, ports.clock, &mut self.faults);
            let mut ctx = OtaContext {
                storage: &mut *ports.storage,
                slot: &mut *ports.slot,
                platform: &mut *ports.platform,
            };
            self.ota.step(&mut net, &mut ctx);
        }
        if !self.ota.is_active() {
            self.schedule(ScheduleChange::Enable(TaskId::OtaProgress, false));
        }
        self.publish_ota_phases(ports);
    }

    fn publish_ota_phases(&mut self, ports: &mut Ports<'_>) {
        let progress = self.ota.progress().map_or(0, |p| p.percentage());
        for state in self.ota.drain_transitions() {
            ports.events.emit(&AppEvent::OtaPhase { state, progress });
            match state {
                OtaState::Completed => ports.events.emit(&AppEvent::RestartRequested {
                    reason: "ota_applied",
                }),
                OtaState::Rollback => ports.events.emit(&AppEvent::RestartRequested {
                    reason: "ota_rollback",
                }),
                _ => {}
            }
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn buffer(&self) -> &SharedRingBuffer<CompressedPacket> {
        &self.buffer
    }

    pub fn faults(&self) -> &FaultLogger {
        &self.faults
    }

    pub fn deadline(&self) -> &DeadlineMonitor {
        &self.deadline
    }

    pub fn ota(&self) -> &OtaEngine {
        &self.ota
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    pub fn config_sync(&self) -> &ConfigManager {
        &self.config_sync
    }

    pub fn power(&self) -> &PowerManager {
        &self.power
    }

    pub fn envelope(&self) -> &SecurityEnvelope {
        &self.envelope
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    pub fn acquisition_stats(&self) -> AcquisitionStats {
        self.acquisition.stats()
    }
}

/// Binds the core to the ports for one scheduler pass.
struct TaskRunner<'c, 'p> {
    core: &'c mut GatewayCore,
    ports: &'c mut Ports<'p>,
}

impl TaskDelegate for TaskRunner<'_, '_> {
    fn run_task(&mut self, task: TaskId, now_us: u64) {
        self.core.run(task, now_us, self.ports);
    }
}

// ───────────────────────────────────────────────────────────────
// GatewayService
// ───────────────────────────────────────────────────────────────

pub struct GatewayService {
    scheduler: Scheduler,
    core: GatewayCore,
    online: bool,
}

impl GatewayService {
    /// Load configuration and arm the scheduler.  Nothing runs until
    /// [`start`](Self::start).
    pub fn new(settings: ConnectionSettings, storage: &dyn StoragePort, now_us: u64) -> Self {
        let core = GatewayCore::new(settings, storage);
        let scheduler = Scheduler::new(&core.config, now_us);
        Self {
            scheduler,
            core,
            online: false,
        }
    }

    /// Use `pem` for firmware signature checks instead of the release key.
    pub fn with_firmware_key(mut self, pem: &str) -> Self {
        self.core.ota = self.core.ota.with_public_key(pem);
        self
    }

    /// Boot sequence after the adapters are up: power floor, WiFi, OTA boot
    /// validation, then OTA resume.
    pub fn start(&mut self, ports: &mut Ports<'_>) {
        let core = &mut self.core;
        if let Err(e) = core.power.set_mode(&mut *ports.platform, PowerMode::Normal) {
            warn!("Service: CPU frequency unchanged ({:?})", e);
        }
        ports.events.emit(&AppEvent::Started {
            version: core.settings.firmware_version.to_string(),
        });

        if !ports.wifi.is_connected() {
            if let Err(e) = ports.wifi.connect() {
                warn!("Service: WiFi not up at boot ({})", e);
            }
        }
        self.online = ports.wifi.is_connected();

        let mut net = NetIo::new(&mut *ports.http, ports.clock, &mut core.faults);
        let mut ctx = OtaContext {
            storage: &mut *ports.storage,
            slot: &mut *ports.slot,
            platform: &mut *ports.platform,
        };
        match core.ota.validate_boot(&mut net, &mut ctx, self.online) {
            Ok(BootCheck::RolledBack) => {
                ports.events.emit(&AppEvent::RestartRequested { reason: "boot_validation" });
            }
            Ok(_) => {}
            Err(fault) => warn!("Service: boot validation incomplete ({})", fault),
        }
        if core.ota.resume(&mut ctx) {
            self.scheduler
                .set_enabled(TaskId::OtaProgress, true, ports.clock.now_us());
        }
        core.publish_ota_phases(ports);
        info!("Service: started, {} registers selected", core.config.selection.len());
    }

    /// One pass of the main loop.  Returns how many tasks ran.
    pub fn tick(&mut self, ports: &mut Ports<'_>) -> usize {
        let now_us = ports.clock.now_us();

        if ports.wifi.poll() || (!self.online && ports.wifi.is_connected()) {
            info!("Service: network restored");
            self.core.deadline.on_network_restored(ports.clock.now_ms());
        }
        self.online = ports.wifi.is_connected();

        let ran = {
            let mut runner = TaskRunner {
                core: &mut self.core,
                ports: &mut *ports,
            };
            self.scheduler.tick(now_us, &mut runner)
        };

        let now_after = ports.clock.now_us();
        for change in core::mem::take(&mut self.core.pending) {
            match change {
                ScheduleChange::Period(task, us) => self.scheduler.set_period(task, us, now_after),
                ScheduleChange::Enable(task, on) => self.scheduler.set_enabled(task, on, now_after),
            }
        }

        if self.core.deadline.should_restart(ports.clock.now_ms()) {
            warn!("Service: deadline misses over threshold, restarting");
            ports.events.emit(&AppEvent::RestartRequested { reason: "deadline_misses" });
            ports.platform.restart();
        }
        ran
    }

    pub fn next_deadline_us(&self) -> Option<u64> {
        self.scheduler.next_deadline_us()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn core(&self) -> &GatewayCore {
        &self.core
    }

    /// Install the envelope PSK (hex) and persist it.
    pub fn provision_psk(&mut self, storage: &mut dyn StoragePort, hex_key: &str) -> crate::error::Result<()> {
        self.core.envelope.provision_psk(storage, hex_key)
    }
}
