//! Fault logging and recovery reporting.
//!
//! Faults are classified into the coarse [`FaultKind`] used by the cloud's
//! recovery dashboard, kept in a bounded in-memory log (oldest entries are
//! overwritten) and, whenever a retry was involved, reported to the
//! fault-recovery endpoint as a single fire-and-forget POST.

use core::fmt;

use log::{info, warn};
use serde::Serialize;

use crate::app::ports::{HttpMethod, HttpPort, HttpRequest};
use crate::error::Fault;

/// Maximum entries kept in the in-memory log.
pub const MAX_FAULT_EVENTS: usize = 50;

const MAX_RETRY_DELAY_MS: u64 = 10_000;
const BASE_RETRY_DELAY_MS: u64 = 500;
const REPORT_TIMEOUT_MS: u32 = 5_000;

/// Transport-level classification reported with each recovery event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    None,
    ModbusException,
    CrcError,
    CorruptFrame,
    Timeout,
    BufferOverflow,
    HttpError,
}

impl FaultKind {
    const COUNT: usize = 7;

    fn index(self) -> usize {
        self as usize
    }
}

impl From<Fault> for FaultKind {
    fn from(f: Fault) -> Self {
        match f {
            Fault::ModbusException(_) => Self::ModbusException,
            Fault::CrcError => Self::CrcError,
            Fault::CorruptFrame => Self::CorruptFrame,
            Fault::ModbusTimeout | Fault::Timeout => Self::Timeout,
            Fault::BufferOverflow => Self::BufferOverflow,
            Fault::HttpError(_) | Fault::ConnectionFailed => Self::HttpError,
            _ => Self::None,
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::ModbusException => "modbus_exception",
            Self::CrcError => "crc_error",
            Self::CorruptFrame => "corrupt_frame",
            Self::Timeout => "timeout",
            Self::BufferOverflow => "buffer_overflow",
            Self::HttpError => "http_error",
        };
        f.write_str(s)
    }
}

/// One log entry.
#[derive(Debug, Clone, Serialize)]
pub struct FaultEvent {
    pub timestamp: u64,
    pub kind: FaultKind,
    /// Full taxonomy value, e.g. `modbus_exception(0x06)`.
    pub error: heapless::String<40>,
    pub module: &'static str,
    pub description: heapless::String<96>,
    pub recovered: bool,
    pub recovery_action: heapless::String<48>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_code: Option<u8>,
    pub retry_count: u8,
}

fn truncated<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for ch in s.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

/// Exponential backoff for retrying after `fault`.
///
/// CRC/corrupt frames start at 500 ms, timeouts and Modbus busy/acknowledge
/// at twice that; each retry doubles the delay, capped at 10 s.
pub fn retry_delay_ms(fault: Fault, retry_count: u8) -> u64 {
    let base = match fault {
        Fault::ModbusTimeout | Fault::Timeout => BASE_RETRY_DELAY_MS * 2,
        f if f.is_transient_exception() => BASE_RETRY_DELAY_MS * 2,
        _ => BASE_RETRY_DELAY_MS,
    };
    base.saturating_mul(1u64 << u32::from(retry_count.min(16)))
        .min(MAX_RETRY_DELAY_MS)
}

#[derive(Serialize)]
struct RecoveryReport<'a> {
    device_id: &'a str,
    timestamp: u64,
    event_type: &'static str,
    fault_type: FaultKind,
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception_code: Option<u8>,
    module: &'a str,
    description: &'a str,
    recovery_action: &'a str,
    retry_count: u8,
    success: bool,
}

/// Bounded fault log plus recovery reporting.
pub struct FaultLogger {
    events: heapless::Deque<FaultEvent, MAX_FAULT_EVENTS>,
    report_url: Option<String>,
    device_id: String,
    counts: [u32; FaultKind::COUNT],
    total: u32,
    recovered: u32,
    reports_sent: u32,
    reports_failed: u32,
}

impl FaultLogger {
    pub fn new(device_id: &str, report_url: Option<String>) -> Self {
        Self {
            events: heapless::Deque::new(),
            report_url,
            device_id: device_id.to_string(),
            counts: [0; FaultKind::COUNT],
            total: 0,
            recovered: 0,
            reports_sent: 0,
            reports_failed: 0,
        }
    }

    /// Append an entry, overwriting the oldest when the log is full.
    #[allow(clippy::too_many_arguments)]
    pub fn log_fault(
        &mut self,
        timestamp: u64,
        fault: Fault,
        description: &str,
        module: &'static str,
        recovered: bool,
        recovery_action: &str,
        retry_count: u8,
    ) {
        let kind = FaultKind::from(fault);
        let exception_code = match fault {
            Fault::ModbusException(code) => Some(code),
            _ => None,
        };
        let event = FaultEvent {
            timestamp,
            kind,
            error: truncated(&fault.to_string()),
            module,
            description: truncated(description),
            recovered,
            recovery_action: truncated(recovery_action),
            exception_code,
            retry_count,
        };

        if recovered {
            info!("{}: {} recovered after {} retries ({})", module, fault, retry_count, recovery_action);
        } else {
            warn!("{}: {}: {} (retries={})", module, fault, description, retry_count);
        }

        self.counts[kind.index()] += 1;
        self.total += 1;
        if recovered {
            self.recovered += 1;
        }
        if self.events.is_full() {
            self.events.pop_front();
        }
        // Cannot fail: a slot was freed above.
        let _ = self.events.push_back(event);
    }

    /// Most recent entry.
    pub fn latest(&self) -> Option<&FaultEvent> {
        self.events.back()
    }

    /// POST a recovery event for the most recent entry.  One attempt only;
    /// a failed report is counted and dropped.
    pub fn report_latest(&mut self, http: &mut dyn HttpPort) {
        let Some(url) = self.report_url.as_deref() else {
            return;
        };
        let Some(event) = self.events.back() else {
            return;
        };
        let report = RecoveryReport {
            device_id: &self.device_id,
            timestamp: event.timestamp,
            event_type: "fault_recovery",
            fault_type: event.kind,
            error: &event.error,
            exception_code: event.exception_code,
            module: event.module,
            description: &event.description,
            recovery_action: &event.recovery_action,
            retry_count: event.retry_count,
            success: event.recovered,
        };
        let Ok(body) = serde_json::to_vec(&report) else {
            return;
        };
        let request = HttpRequest {
            method: HttpMethod::Post,
            url,
            headers: &[("Content-Type", "application/json")],
            body: &body,
            timeout_ms: REPORT_TIMEOUT_MS,
        };
        match http.send(&request) {
            Ok(resp) if resp.is_success() => self.reports_sent += 1,
            Ok(resp) => {
                warn!("FaultLogger: recovery report rejected (HTTP {})", resp.status);
                self.reports_failed += 1;
            }
            Err(e) => {
                warn!("FaultLogger: recovery report not sent ({})", e);
                self.reports_failed += 1;
            }
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &FaultEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Lifetime count of faults with the given classification.
    pub fn count(&self, kind: FaultKind) -> u32 {
        self.counts[kind.index()]
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn recovered(&self) -> u32 {
        self.recovered
    }

    pub fn reports_sent(&self) -> u32 {
        self.reports_sent
    }

    /// The log as a JSON array, oldest first.
    pub fn to_json(&self) -> String {
        let events: Vec<&FaultEvent> = self.events.iter().collect();
        serde_json::to_string(&events).unwrap_or_else(|_| String::from("[]"))
    }
}
