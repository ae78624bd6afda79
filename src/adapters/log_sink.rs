//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (which goes to UART / USB-CDC in production) as
//! one-line `TAG | key=value` records.

use core::fmt::Write;

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink {
    emitted: u32,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events written so far.
    pub fn emitted(&self) -> u32 {
        self.emitted
    }
}

/// Render an event as `TAG | key=value ...`.
pub fn render(event: &AppEvent) -> String {
    match event {
        AppEvent::Started { version } => format!("START | version={}", version),
        AppEvent::SampleAcquired {
            timestamp_ms,
            values,
        } => {
            let mut line = format!("SAMPLE | t={}", timestamp_ms);
            for (id, v) in values {
                let _ = write!(line, " {}={}", id.name(), v);
            }
            line
        }
        AppEvent::BatchQueued {
            method,
            original_size,
            compressed_size,
            queued,
        } => format!(
            "BATCH | method={} original={}B compressed={}B queued={}",
            method.name(),
            original_size,
            compressed_size,
            queued
        ),
        AppEvent::UploadDelivered { packets, bytes } => {
            format!("UPLOAD | delivered packets={} bytes={}", packets, bytes)
        }
        AppEvent::UploadRestored { packets, queued } => {
            format!("UPLOAD | restored packets={} queued={}", packets, queued)
        }
        AppEvent::ConfigApplied { task, period_us } => {
            format!("CONFIG | task={} period_us={}", task, period_us)
        }
        AppEvent::SelectionApplied { registers } => {
            format!("CONFIG | registers={}", registers)
        }
        AppEvent::CommandExecuted {
            command_type,
            success,
        } => format!("COMMAND | type={} success={}", command_type, success),
        AppEvent::OtaPhase { state, progress } => {
            format!("OTA | phase={} progress={}%", state, progress)
        }
        AppEvent::FaultRecorded { fault, recovered } => {
            format!("FAULT | error={} recovered={}", fault, recovered)
        }
        AppEvent::RestartRequested { reason } => format!("RESTART | reason={}", reason),
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        self.emitted += 1;
        let line = render(event);
        match event {
            AppEvent::FaultRecorded { .. } | AppEvent::RestartRequested { .. } => warn!("{}", line),
            _ => info!("{}", line),
        }
    }
}
