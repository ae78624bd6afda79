//! Shared HTTP retry layer.
//!
//! Every outbound request goes through [`NetIo::send`]: up to
//! [`MAX_HTTP_RETRIES`] retries with exponential backoff, no retry for
//! statuses that signal a configuration problem, and a fault-recovery
//! report whenever a retry was needed.

use log::debug;

use crate::app::ports::{Clock, HttpPort, HttpRequest, HttpResponse};
use crate::error::{Fault, Result};
use crate::faults::FaultLogger;

pub const MAX_HTTP_RETRIES: u8 = 3;

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 5_000;

/// Request timeout for the inverter simulator.
pub const INVERTER_TIMEOUT_MS: u32 = 5_000;
/// Request timeout for uploads, config and command polls.
pub const UPLOAD_TIMEOUT_MS: u32 = 15_000;
/// Request timeout for OTA manifest and chunk transfers.
pub const OTA_TIMEOUT_MS: u32 = 30_000;

/// `min(500 ms · 2^attempt, 5 s)`.
pub fn backoff_ms(attempt: u8) -> u64 {
    BACKOFF_BASE_MS
        .saturating_mul(1u64 << u32::from(attempt.min(16)))
        .min(BACKOFF_CAP_MS)
}

/// Borrowed view of the ports needed for network I/O.
pub struct NetIo<'a> {
    pub http: &'a mut dyn HttpPort,
    pub clock: &'a dyn Clock,
    pub faults: &'a mut FaultLogger,
}

impl<'a> NetIo<'a> {
    pub fn new(http: &'a mut dyn HttpPort, clock: &'a dyn Clock, faults: &'a mut FaultLogger) -> Self {
        Self { http, clock, faults }
    }

    /// One attempt; a non-2xx status becomes [`Fault::HttpError`].
    pub fn send_once(&mut self, request: &HttpRequest<'_>) -> Result<HttpResponse> {
        let response = self.http.send(request)?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(Fault::HttpError(response.status))
        }
    }

    /// Send with the retry policy.  `module` tags the fault log entry.
    pub fn send(&mut self, module: &'static str, request: &HttpRequest<'_>) -> Result<HttpResponse> {
        let mut attempt: u8 = 0;
        let mut last_fault = None;
        loop {
            match self.send_once(request) {
                Ok(response) => {
                    if let Some(fault) = last_fault {
                        self.record(module, request.url, fault, true, attempt, "http_retry");
                    }
                    return Ok(response);
                }
                Err(fault) if fault.is_configuration_error() => {
                    debug!("{}: {} is a configuration error, not retrying", module, fault);
                    self.record(module, request.url, fault, false, attempt, "none");
                    return Err(fault);
                }
                Err(fault) if attempt >= MAX_HTTP_RETRIES => {
                    self.record(module, request.url, fault, false, attempt, "retries_exhausted");
                    return Err(fault);
                }
                Err(fault) => {
                    let delay = backoff_ms(attempt);
                    debug!(
                        "{}: {} on attempt {}, retrying in {} ms",
                        module,
                        fault,
                        attempt + 1,
                        delay
                    );
                    self.clock.sleep_ms(delay);
                    last_fault = Some(fault);
                    attempt += 1;
                }
            }
        }
    }

    fn record(
        &mut self,
        module: &'static str,
        url: &str,
        fault: Fault,
        recovered: bool,
        retries: u8,
        action: &str,
    ) {
        let now = self.clock.now_ms();
        self.faults
            .log_fault(now, fault, url, module, recovered, action, retries);
        if retries > 0 {
            self.faults.report_latest(&mut *self.http);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{HttpMethod, TransportError};
    use core::cell::Cell;
    use std::collections::VecDeque;

    struct Script(VecDeque<core::result::Result<u16, TransportError>>, usize);

    impl HttpPort for Script {
        fn send(&mut self, req: &HttpRequest<'_>) -> core::result::Result<HttpResponse, TransportError> {
            if req.url.ends_with("/faults") {
                return Ok(HttpResponse { status: 200, body: Vec::new() });
            }
            self.1 += 1;
            let status = self.0.pop_front().unwrap_or(Ok(200))?;
            Ok(HttpResponse { status, body: Vec::new() })
        }
    }

    struct TestClock(Cell<u64>);

    impl Clock for TestClock {
        fn now_us(&self) -> u64 {
            self.0.get()
        }
        fn sleep_ms(&self, ms: u64) {
            self.0.set(self.0.get() + ms * 1000);
        }
    }

    fn req() -> HttpRequest<'static> {
        HttpRequest {
            method: HttpMethod::Get,
            url: "http://cloud/x",
            headers: &[],
            body: &[],
            timeout_ms: 1000,
        }
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff_ms(0), 500);
        assert_eq!(backoff_ms(1), 1000);
        assert_eq!(backoff_ms(3), 4000);
        assert_eq!(backoff_ms(4), 5000);
    }

    #[test]
    fn recovers_after_server_errors() {
        let mut http = Script(VecDeque::from([Ok(503), Err(TransportError::Timeout), Ok(200)]), 0);
        let clock = TestClock(Cell::new(0));
        let mut faults = FaultLogger::new("EW-1", Some("http://cloud/faults".into()));
        let mut net = NetIo::new(&mut http, &clock, &mut faults);
        assert!(net.send("Test", &req()).is_ok());
        assert_eq!(http.1, 3);
        assert_eq!(clock.now_ms(), 1500);
        assert_eq!(faults.recovered(), 1);
        assert_eq!(faults.reports_sent(), 1);
    }

    #[test]
    fn configuration_errors_are_not_retried() {
        for status in [400, 401, 404] {
            let mut http = Script(VecDeque::from([Ok(status)]), 0);
            let clock = TestClock(Cell::new(0));
            let mut faults = FaultLogger::new("EW-1", None);
            let mut net = NetIo::new(&mut http, &clock, &mut faults);
            assert_eq!(net.send("Test", &req()), Err(Fault::HttpError(status)));
            assert_eq!(http.1, 1);
        }
    }

    #[test]
    fn gives_up_after_max_retries() {
        let mut http = Script(VecDeque::from([Ok(500); 10]), 0);
        let clock = TestClock(Cell::new(0));
        let mut faults = FaultLogger::new("EW-1", None);
        let mut net = NetIo::new(&mut http, &clock, &mut faults);
        assert_eq!(net.send("Test", &req()), Err(Fault::HttpError(500)));
        assert_eq!(http.1, 1 + usize::from(MAX_HTTP_RETRIES));
        assert_eq!(faults.total(), 1);
    }
}
