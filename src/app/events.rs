//! Outbound application events.
//!
//! The [`GatewayService`](super::service::GatewayService) emits these through
//! the [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them (serial log today).

use crate::compression::Method;
use crate::error::Fault;
use crate::ota::OtaState;
use crate::scheduler::TaskId;

/// Structured events emitted by the gateway core.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// The gateway finished booting; carries the running firmware version.
    Started { version: String },

    /// One poll produced a sample.
    SampleAcquired {
        timestamp_ms: u64,
        values: heapless::Vec<(crate::registers::RegisterId, u16), { crate::registers::MAX_SELECTION }>,
    },

    /// A full batch was compressed and queued for upload.
    BatchQueued {
        method: Method,
        original_size: usize,
        compressed_size: usize,
        queued: usize,
    },

    /// An upload cycle delivered `packets` packets.
    UploadDelivered { packets: usize, bytes: usize },

    /// An upload cycle failed and drained packets were put back.
    UploadRestored { packets: usize, queued: usize },

    /// A cloud configuration change was applied to the live scheduler.
    ConfigApplied {
        task: TaskId,
        period_us: u64,
    },

    /// The register selection changed.
    SelectionApplied { registers: usize },

    /// A remote command finished.
    CommandExecuted {
        command_type: String,
        success: bool,
    },

    /// The OTA state machine moved to a new phase.
    OtaPhase { state: OtaState, progress: u8 },

    /// A fault was recorded (and possibly recovered).
    FaultRecorded { fault: Fault, recovered: bool },

    /// The deadline monitor or the OTA engine requested a reset.
    RestartRequested { reason: &'static str },
}
