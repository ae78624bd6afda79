//! Modbus-RTU-over-HTTP transport.
//!
//! Each request frame is hex-encoded into `{"frame": "<HEX>"}` and POSTed to
//! the simulator's read or write endpoint; the reply carries the response
//! frame in the same shape.  On top of the HTTP retry layer every logical
//! read/write gets exactly one extra attempt when the reply was malformed,
//! failed its CRC, or was a transient exception (Acknowledge / Busy).

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{HttpMethod, HttpRequest};
use crate::error::{Fault, Result};
use crate::faults::retry_delay_ms;
use crate::net::{INVERTER_TIMEOUT_MS, NetIo};
use crate::registers::RegisterSelection;

use super::frame::{
    DecodedValues, RequestFrame, build_read_frame, build_write_frame, decode_hex, encode_hex,
    parse_read_response, parse_write_response, project,
};

const READ_PATH: &str = "/api/inverter/read";
const WRITE_PATH: &str = "/api/inverter/write";
const MODULE: &str = "Protocol";

#[derive(Serialize, Deserialize)]
struct FrameBody<'a> {
    frame: &'a str,
}

#[derive(Deserialize)]
struct FrameReply {
    frame: String,
}

/// Counters exposed for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AdapterStats {
    pub requests: u32,
    pub successes: u32,
    pub crc_errors: u32,
    pub corrupt_frames: u32,
    pub exceptions: u32,
    pub timeouts: u32,
    pub http_errors: u32,
    pub logical_retries: u32,
    pub recovered: u32,
}

/// Whether a failed exchange earns its single logical retry.
fn is_retryable(fault: Fault) -> bool {
    matches!(fault, Fault::CrcError | Fault::CorruptFrame) || fault.is_transient_exception()
}

/// Client for the inverter simulator.
pub struct ProtocolAdapter {
    read_url: String,
    write_url: String,
    api_key: String,
    stats: AdapterStats,
}

impl ProtocolAdapter {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            read_url: format!("{base}{READ_PATH}"),
            write_url: format!("{base}{WRITE_PATH}"),
            api_key: api_key.to_string(),
            stats: AdapterStats::default(),
        }
    }

    pub fn stats(&self) -> AdapterStats {
        self.stats
    }

    /// Read `selection` with one contiguous Read-Holding-Registers request
    /// and project the span back onto the selection order.
    pub fn read_registers(
        &mut self,
        net: &mut NetIo<'_>,
        slave: u8,
        selection: &RegisterSelection,
    ) -> Result<DecodedValues> {
        let (start, count) = selection.span();
        let frame = build_read_frame(slave, start, count);
        let url = self.read_url.clone();
        let words = self.exchange(net, &url, &frame, |reply| {
            parse_read_response(reply, slave, count)
        })?;
        Ok(project(start, &words, selection))
    }

    /// Write one holding register; the slave must echo the request.
    pub fn write_register(
        &mut self,
        net: &mut NetIo<'_>,
        slave: u8,
        address: u16,
        value: u16,
    ) -> Result<()> {
        let frame = build_write_frame(slave, address, value);
        let url = self.write_url.clone();
        self.exchange(net, &url, &frame, |reply| parse_write_response(reply, &frame))?;
        info!("{}: wrote register {} = {}", MODULE, address, value);
        Ok(())
    }

    fn exchange<T>(
        &mut self,
        net: &mut NetIo<'_>,
        url: &str,
        frame: &RequestFrame,
        parse: impl Fn(&[u8]) -> Result<T>,
    ) -> Result<T> {
        let mut retries: u8 = 0;
        loop {
            self.stats.requests += 1;
            let result = self.transact(net, url, frame).and_then(|reply| parse(&reply));
            match result {
                Ok(value) => {
                    self.stats.successes += 1;
                    if retries > 0 {
                        self.stats.recovered += 1;
                    }
                    return Ok(value);
                }
                Err(fault) => {
                    self.count(fault);
                    if retries == 0 && is_retryable(fault) {
                        let delay = retry_delay_ms(fault, retries);
                        warn!("{}: {}, retrying once in {} ms", MODULE, fault, delay);
                        self.stats.logical_retries += 1;
                        net.clock.sleep_ms(delay);
                        retries += 1;
                        self.report(net, fault, url, retries, true);
                        continue;
                    }
                    if retries > 0 {
                        self.report(net, fault, url, retries, false);
                    }
                    return Err(fault);
                }
            }
        }
    }

    /// Log the retry and POST the recovery event.  `attempting` marks the
    /// entry written when the retry is issued; the final outcome follows
    /// only when the retry also fails.
    fn report(&self, net: &mut NetIo<'_>, fault: Fault, url: &str, retries: u8, attempting: bool) {
        let now = net.clock.now_ms();
        let action = if attempting { "retry_request" } else { "retry_exhausted" };
        net.faults
            .log_fault(now, fault, url, MODULE, attempting, action, retries);
        net.faults.report_latest(&mut *net.http);
    }

    fn transact(&self, net: &mut NetIo<'_>, url: &str, frame: &RequestFrame) -> Result<Vec<u8>> {
        let hex = encode_hex(frame);
        let body = serde_json::to_vec(&FrameBody { frame: &hex }).map_err(|_| Fault::CorruptFrame)?;
        let headers = [
            ("Authorization", self.api_key.as_str()),
            ("Content-Type", "application/json"),
        ];
        let request = HttpRequest {
            method: HttpMethod::Post,
            url,
            headers: &headers,
            body: &body,
            timeout_ms: INVERTER_TIMEOUT_MS,
        };
        let response = net.send(MODULE, &request).map_err(|f| match f {
            Fault::Timeout => Fault::ModbusTimeout,
            other => other,
        })?;
        let reply: FrameReply =
            serde_json::from_slice(&response.body).map_err(|_| Fault::CorruptFrame)?;
        decode_hex(&reply.frame)
    }

    fn count(&mut self, fault: Fault) {
        match fault {
            Fault::CrcError => self.stats.crc_errors += 1,
            Fault::CorruptFrame => self.stats.corrupt_frames += 1,
            Fault::ModbusException(_) => self.stats.exceptions += 1,
            Fault::ModbusTimeout => self.stats.timeouts += 1,
            Fault::HttpError(_) | Fault::ConnectionFailed => self.stats.http_errors += 1,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{Clock, HttpPort, HttpResponse, TransportError};
    use crate::faults::FaultLogger;
    use crate::protocol::frame::{build_exception_response, build_read_response, FN_READ_HOLDING};
    use crate::registers::RegisterId;
    use core::cell::Cell;
    use std::collections::VecDeque;

    /// Replies with queued frames and records every request body.
    struct Simulator {
        replies: VecDeque<Vec<u8>>,
        requests: Vec<String>,
    }

    impl HttpPort for Simulator {
        fn send(
            &mut self,
            req: &HttpRequest<'_>,
        ) -> core::result::Result<HttpResponse, TransportError> {
            if !req.url.contains("/api/inverter/") {
                return Ok(HttpResponse { status: 200, body: Vec::new() });
            }
            self.requests.push(String::from_utf8(req.body.to_vec()).unwrap());
            let frame = self.replies.pop_front().ok_or(TransportError::Timeout)?;
            let body = format!("{{\"frame\":\"{}\"}}", encode_hex(&frame));
            Ok(HttpResponse { status: 200, body: body.into_bytes() })
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

    fn run<T>(
        replies: Vec<Vec<u8>>,
        f: impl FnOnce(&mut ProtocolAdapter, &mut NetIo<'_>) -> T,
    ) -> (T, Simulator, AdapterStats) {
        let mut sim = Simulator { replies: replies.into(), requests: Vec::new() };
        let clock = TestClock(Cell::new(0));
        let mut faults = FaultLogger::new("EW-1", None);
        let mut adapter = ProtocolAdapter::new("http://inverter/", "key");
        let out = {
            let mut net = NetIo::new(&mut sim, &clock, &mut faults);
            f(&mut adapter, &mut net)
        };
        (out, sim, adapter.stats())
    }

    #[test]
    fn reads_single_register() {
        let sel = RegisterSelection::new(&[RegisterId::Vac1]).unwrap();
        let (out, sim, _) = run(vec![build_read_response(0x11, &[2305])], |a, net| {
            a.read_registers(net, 0x11, &sel)
        });
        assert_eq!(out.unwrap().values.as_slice(), &[2305]);
        assert_eq!(sim.requests[0], r#"{"frame":"110300000001869A"}"#);
    }

    #[test]
    fn non_contiguous_selection_reads_span_once() {
        let sel = RegisterSelection::new(&[
            RegisterId::Vac1,
            RegisterId::Iac1,
            RegisterId::Ipv1,
            RegisterId::Pac,
        ])
        .unwrap();
        let words: Vec<u16> = (0..10).map(|i| 1000 + i).collect();
        let (out, sim, _) = run(vec![build_read_response(0x11, &words)], |a, net| {
            a.read_registers(net, 0x11, &sel)
        });
        assert_eq!(out.unwrap().values.as_slice(), &[1000, 1001, 1005, 1009]);
        assert_eq!(sim.requests.len(), 1);
        assert!(sim.requests[0].contains("11030000000A"));
    }

    #[test]
    fn transient_exception_is_retried_once() {
        let sel = RegisterSelection::new(&[RegisterId::Vac1]).unwrap();
        let busy = build_exception_response(0x11, FN_READ_HOLDING, 0x06);
        let (out, sim, stats) = run(vec![busy, build_read_response(0x11, &[7])], |a, net| {
            a.read_registers(net, 0x11, &sel)
        });
        assert_eq!(out.unwrap().values.as_slice(), &[7]);
        assert_eq!(sim.requests.len(), 2);
        assert_eq!(stats.logical_retries, 1);
        assert_eq!(stats.recovered, 1);
    }

    #[test]
    fn illegal_address_fails_immediately() {
        let sel = RegisterSelection::new(&[RegisterId::Vac1]).unwrap();
        let err = build_exception_response(0x11, FN_READ_HOLDING, 0x02);
        let (out, sim, stats) = run(vec![err], |a, net| a.read_registers(net, 0x11, &sel));
        assert_eq!(out, Err(Fault::ModbusException(0x02)));
        assert_eq!(sim.requests.len(), 1);
        assert_eq!(stats.exceptions, 1);
    }

    #[test]
    fn crc_error_after_retry_is_reported() {
        let sel = RegisterSelection::new(&[RegisterId::Vac1]).unwrap();
        let mut bad = build_read_response(0x11, &[1]);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let (out, _, stats) = run(vec![bad.clone(), bad], |a, net| {
            a.read_registers(net, 0x11, &sel)
        });
        assert_eq!(out, Err(Fault::CrcError));
        assert_eq!(stats.crc_errors, 2);
    }

    #[test]
    fn write_requires_echo() {
        let req = build_write_frame(0x11, 8, 40);
        let (out, _, _) = run(vec![req.to_vec()], |a, net| a.write_register(net, 0x11, 8, 40));
        assert!(out.is_ok());
    }
}
