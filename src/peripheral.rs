//! RS-485 transceiver power gate.
//!
//! The transceiver only draws current while a poll is in progress: the poll
//! task calls `uart_on` before building the request frame and `uart_off`
//! once the response is decoded.  The enable line is any
//! [`embedded_hal::digital::OutputPin`], so the same gate drives an ESP-IDF
//! `PinDriver` on hardware and a recording mock in tests.

use embedded_hal::digital::OutputPin;
use log::{debug, warn};
use serde::Serialize;

use crate::app::ports::TransceiverPort;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeripheralStats {
    pub power_cycles: u32,
    /// Accumulated time with the transceiver powered.
    pub on_time_ms: u64,
    /// Enable-line writes that failed.
    pub errors: u32,
    pub is_on: bool,
}

pub struct PeripheralGate<P: OutputPin> {
    enable: P,
    on_since_ms: Option<u64>,
    stats: PeripheralStats,
}

impl<P: OutputPin> PeripheralGate<P> {
    /// Take the enable line and drive it low (transceiver off).
    pub fn new(mut enable: P) -> Self {
        let mut stats = PeripheralStats::default();
        if enable.set_low().is_err() {
            stats.errors += 1;
        }
        Self {
            enable,
            on_since_ms: None,
            stats,
        }
    }

    pub fn is_on(&self) -> bool {
        self.on_since_ms.is_some()
    }

    pub fn release(self) -> P {
        self.enable
    }
}

impl<P: OutputPin> TransceiverPort for PeripheralGate<P> {
    fn uart_on(&mut self, now_ms: u64) {
        if self.on_since_ms.is_some() {
            return;
        }
        if self.enable.set_high().is_err() {
            self.stats.errors += 1;
            warn!("Peripheral: transceiver enable failed");
            return;
        }
        self.on_since_ms = Some(now_ms);
        self.stats.power_cycles += 1;
        debug!("Peripheral: UART on");
    }

    fn uart_off(&mut self, now_ms: u64) {
        let Some(since) = self.on_since_ms else {
            return;
        };
        if self.enable.set_low().is_err() {
            self.stats.errors += 1;
            warn!("Peripheral: transceiver disable failed");
        }
        self.stats.on_time_ms += now_ms.saturating_sub(since);
        self.on_since_ms = None;
        debug!("Peripheral: UART off");
    }

    fn stats(&self) -> PeripheralStats {
        PeripheralStats {
            is_on: self.is_on(),
            ..self.stats
        }
    }

    fn reset_stats(&mut self) {
        self.stats = PeripheralStats::default();
    }
}
