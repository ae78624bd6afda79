//! HTTP client adapter.
//!
//! Implements [`HttpPort`] for the inverter API, the cloud upload, config,
//! command, fault and OTA endpoints.
//!
//! - **`target_os = "espidf"`**: one `EspHttpConnection` per request,
//!   wrapped in the `embedded-svc` client, with the certificate bundle
//!   attached for HTTPS URLs and the per-request timeout applied.
//! - **`not(target_os = "espidf")`**: no network stack; every request fails
//!   with [`TransportError::ConnectionFailed`].  Tests use scripted ports.

use log::{debug, warn};

use crate::app::ports::{HttpMethod, HttpPort, HttpRequest, HttpResponse, TransportError};

#[cfg(target_os = "espidf")]
use core::time::Duration;
#[cfg(target_os = "espidf")]
use embedded_svc::http::{Method, client::Client};
#[cfg(target_os = "espidf")]
use embedded_svc::io::{Read, Write};
#[cfg(target_os = "espidf")]
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
#[cfg(target_os = "espidf")]
use esp_idf_svc::io::EspIOError;

/// Responses larger than this are truncated reads we refuse to parse.
pub const MAX_RESPONSE_BYTES: usize = 16 * 1024;

#[cfg(target_os = "espidf")]
const READ_CHUNK: usize = 512;
#[cfg(target_os = "espidf")]
const MAX_HEADERS: usize = 8;

pub struct EspHttpClient {
    requests: u32,
    failures: u32,
}

impl Default for EspHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl EspHttpClient {
    pub fn new() -> Self {
        Self {
            requests: 0,
            failures: 0,
        }
    }

    pub fn requests(&self) -> u32 {
        self.requests
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

fn method_name(method: HttpMethod) -> &'static str {
    match method {
        HttpMethod::Get => "GET",
        HttpMethod::Post => "POST",
    }
}

impl HttpPort for EspHttpClient {
    fn send(&mut self, req: &HttpRequest<'_>) -> Result<HttpResponse, TransportError> {
        self.requests += 1;
        debug!(
            "Http: {} {} ({} B, timeout {} ms)",
            method_name(req.method),
            req.url,
            req.body.len(),
            req.timeout_ms
        );
        let result = self.platform_send(req);
        if let Err(e) = &result {
            self.failures += 1;
            warn!("Http: {} {} failed: {:?}", method_name(req.method), req.url, e);
        }
        result
    }
}

// ── Device ────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
fn classify(e: EspIOError) -> TransportError {
    if e.0.code() == esp_idf_sys::ESP_ERR_HTTP_EAGAIN as i32 {
        TransportError::Timeout
    } else {
        TransportError::ConnectionFailed
    }
}

#[cfg(target_os = "espidf")]
impl EspHttpClient {
    fn platform_send(&mut self, req: &HttpRequest<'_>) -> Result<HttpResponse, TransportError> {
        let conn = EspHttpConnection::new(&Configuration {
            timeout: Some(Duration::from_millis(u64::from(req.timeout_ms))),
            crt_bundle_attach: req
                .url
                .starts_with("https://")
                .then_some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        })
        .map_err(|e| {
            warn!("Http: connection setup failed: {}", e);
            TransportError::ConnectionFailed
        })?;
        let mut client = Client::wrap(conn);

        let content_length = req.body.len().to_string();
        let mut headers: heapless::Vec<(&str, &str), MAX_HEADERS> = heapless::Vec::new();
        for header in req.headers.iter().take(MAX_HEADERS - 1) {
            let _ = headers.push(*header);
        }
        if req.method == HttpMethod::Post {
            let _ = headers.push(("Content-Length", content_length.as_str()));
        }

        let method = match req.method {
            HttpMethod::Get => Method::Get,
            HttpMethod::Post => Method::Post,
        };
        let mut request = client.request(method, req.url, &headers).map_err(classify)?;
        if !req.body.is_empty() {
            request.write_all(req.body).map_err(classify)?;
            request.flush().map_err(classify)?;
        }
        let mut response = request.submit().map_err(classify)?;
        let status = response.status();

        let mut body = Vec::new();
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = response.read(&mut buf).map_err(classify)?;
            if n == 0 {
                break;
            }
            if body.len() + n > MAX_RESPONSE_BYTES {
                warn!("Http: response from {} exceeds {} B", req.url, MAX_RESPONSE_BYTES);
                return Err(TransportError::Io);
            }
            body.extend_from_slice(&buf[..n]);
        }
        Ok(HttpResponse { status, body })
    }
}

// ── Host ──────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl EspHttpClient {
    fn platform_send(&mut self, _req: &HttpRequest<'_>) -> Result<HttpResponse, TransportError> {
        Err(TransportError::ConnectionFailed)
    }
}
