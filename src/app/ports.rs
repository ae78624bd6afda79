//! Port traits: the hexagonal boundary between the gateway domain and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ GatewayService (domain)
//! ```
//!
//! Driven adapters (NVS, HTTP client, WiFi, clock, OTA partition, platform
//! services, RS-485 transceiver) implement these traits. The domain receives
//! them as `&mut dyn` trait objects bundled in [`Ports`], so every
//! component runs unchanged against the mocks in `tests/integration`.
//!
//! ## Security notes
//!
//! - **StoragePort** implementations SHOULD keep the `security` namespace on
//!   the encrypted NVS partition.
//! - **HttpPort** implementations MUST enforce the per-request timeout.

use crate::scheduler::TaskId;

use super::events::AppEvent;

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage.
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic: no partial writes on power loss.
///   The ESP-IDF NVS API guarantees this natively; in-memory simulation
///   achieves it trivially.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

/// Longest string value stored through [`TypedStorage`].
pub const MAX_STORED_STR: usize = 1024;

/// Typed get/put helpers layered over any [`StoragePort`].
///
/// Integers are stored little-endian; strings as raw UTF-8. A missing key, a
/// short read or invalid UTF-8 all read back as `None`.
pub trait TypedStorage: StoragePort {
    fn get_u32(&self, namespace: &str, key: &str) -> Option<u32> {
        let mut buf = [0u8; 4];
        match self.read(namespace, key, &mut buf) {
            Ok(4) => Some(u32::from_le_bytes(buf)),
            _ => None,
        }
    }

    fn put_u32(&mut self, namespace: &str, key: &str, value: u32) -> Result<(), StorageError> {
        self.write(namespace, key, &value.to_le_bytes())
    }

    fn get_u64(&self, namespace: &str, key: &str) -> Option<u64> {
        let mut buf = [0u8; 8];
        match self.read(namespace, key, &mut buf) {
            Ok(8) => Some(u64::from_le_bytes(buf)),
            _ => None,
        }
    }

    fn put_u64(&mut self, namespace: &str, key: &str, value: u64) -> Result<(), StorageError> {
        self.write(namespace, key, &value.to_le_bytes())
    }

    fn get_str(&self, namespace: &str, key: &str) -> Option<String> {
        let mut buf = vec![0u8; MAX_STORED_STR];
        let len = self.read(namespace, key, &mut buf).ok()?;
        buf.truncate(len);
        String::from_utf8(buf).ok()
    }

    fn put_str(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StorageError> {
        if value.len() > MAX_STORED_STR {
            return Err(StorageError::Full);
        }
        self.write(namespace, key, value.as_bytes())
    }
}

impl<S: StoragePort + ?Sized> TypedStorage for S {}

// ───────────────────────────────────────────────────────────────
// HTTP port (driven adapter: domain → inverter simulator / cloud)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One outbound request. The body is sent as-is; JSON callers add the
/// `Content-Type` header themselves.
#[derive(Debug, Clone, Copy)]
pub struct HttpRequest<'a> {
    pub method: HttpMethod,
    pub url: &'a str,
    pub headers: &'a [(&'a str, &'a str)],
    pub body: &'a [u8],
    pub timeout_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking HTTP client. At most one request is in flight at a time.
pub trait HttpPort {
    fn send(&mut self, request: &HttpRequest<'_>) -> Result<HttpResponse, TransportError>;
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic time plus cooperative sleep.
pub trait Clock {
    /// Microseconds since boot.
    fn now_us(&self) -> u64;

    /// Block the calling task.  The only suspension point besides HTTP calls.
    fn sleep_ms(&self, ms: u64);

    /// Milliseconds since boot.
    fn now_ms(&self) -> u64 {
        self.now_us() / 1000
    }

    /// Best-effort wall-clock seconds since the Unix epoch.
    fn unix_time(&self) -> Option<u64> {
        None
    }
}

// ───────────────────────────────────────────────────────────────
// Platform port (heap, CPU frequency, reset)
// ───────────────────────────────────────────────────────────────

pub trait PlatformPort {
    /// Currently free heap in bytes.
    fn free_heap(&self) -> u32;

    /// Lock the CPU to `mhz`.  Idempotent.
    fn set_cpu_frequency_mhz(&mut self, mhz: u32) -> Result<(), PlatformError>;

    /// Reboot the device.  On hardware this does not return.
    fn restart(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformError {
    Unsupported,
    Rejected,
}

// ───────────────────────────────────────────────────────────────
// Connectivity port (driven adapter: domain ↔ WiFi station)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    NoCredentials,
    InvalidSsid,
    InvalidPassword,
    ConnectionFailed,
    AlreadyConnected,
}

impl core::fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no WiFi credentials configured"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => {
                write!(f, "password invalid (must be 8-64 bytes for WPA2, or empty for open)")
            }
            Self::ConnectionFailed => write!(f, "WiFi connection failed"),
            Self::AlreadyConnected => write!(f, "already connected to AP"),
        }
    }
}

pub trait ConnectivityPort {
    fn connect(&mut self) -> Result<(), ConnectivityError>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    /// Drive reconnection.  Returns `true` on the tick the link comes back.
    fn poll(&mut self) -> bool;
    fn set_credentials(&mut self, ssid: &str, password: &str) -> Result<(), ConnectivityError>;
    fn rssi(&self) -> Option<i8>;
}

// ───────────────────────────────────────────────────────────────
// Firmware slot port (driven adapter: OTA engine ↔ inactive partition)
// ───────────────────────────────────────────────────────────────

/// The inactive firmware partition, exclusively owned by the OTA engine.
pub trait FirmwareSlot {
    /// Prepare the inactive slot for an image of `image_size` bytes.  With
    /// `resume` set the existing contents are kept.
    fn begin(&mut self, image_size: u32, resume: bool) -> Result<(), SlotError>;

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), SlotError>;

    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<usize, SlotError>;

    /// Make the inactive slot the next boot target.
    fn set_boot(&mut self) -> Result<(), SlotError>;

    /// Drop a partially written image.
    fn abort(&mut self);

    /// Whether the running image still awaits post-update validation.
    fn is_pending_verify(&self) -> bool;

    /// Confirm the running image (cancels automatic rollback).
    fn mark_valid(&mut self) -> Result<(), SlotError>;

    /// Mark the running image invalid so the next boot returns to the
    /// previous slot.
    fn mark_invalid(&mut self) -> Result<(), SlotError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    NoPartition,
    OutOfRange,
    WriteFailed,
    ReadFailed,
    BootSetFailed,
}

// ───────────────────────────────────────────────────────────────
// Transceiver port (RS-485 / UART power gate)
// ───────────────────────────────────────────────────────────────

/// Power gate for the inverter-side serial transceiver.
///
/// Both calls MUST be idempotent and safe inside a task iteration.
pub trait TransceiverPort {
    fn uart_on(&mut self, now_ms: u64);
    fn uart_off(&mut self, now_ms: u64);
    fn stats(&self) -> crate::peripheral::PeripheralStats;
    fn reset_stats(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (decouples scheduler from the task bodies)
// ───────────────────────────────────────────────────────────────

/// Callback trait that the scheduler invokes when a task is due.
///
/// The scheduler only tracks periods, deadlines and priorities; the
/// [`GatewayService`](super::service::GatewayService) implements this to
/// run the actual task body.
pub trait TaskDelegate {
    /// Run one iteration of `task`.  `now_us` is the firing time.
    fn run_task(&mut self, task: TaskId, now_us: u64);
}

// ───────────────────────────────────────────────────────────────
// Port bundle
// ───────────────────────────────────────────────────────────────

/// Every driven adapter the gateway needs for one scheduler pass.
pub struct Ports<'a> {
    pub storage: &'a mut dyn StoragePort,
    pub http: &'a mut dyn HttpPort,
    pub clock: &'a dyn Clock,
    pub wifi: &'a mut dyn ConnectivityPort,
    pub platform: &'a mut dyn PlatformPort,
    pub slot: &'a mut dyn FirmwareSlot,
    pub transceiver: &'a mut dyn TransceiverPort,
    pub events: &'a mut dyn EventSink,
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

/// Errors from [`HttpPort::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    ConnectionFailed,
    Io,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out"),
            Self::ConnectionFailed => write!(f, "connection failed"),
            Self::Io => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for SlotError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoPartition => write!(f, "no inactive OTA partition available"),
            Self::OutOfRange => write!(f, "write outside partition bounds"),
            Self::WriteFailed => write!(f, "partition write failed"),
            Self::ReadFailed => write!(f, "partition read failed"),
            Self::BootSetFailed => write!(f, "set boot partition failed"),
        }
    }
}
