//! Unified fault taxonomy for the EcoWatt gateway.
//!
//! Every fallible domain operation returns [`Fault`]. Variants are `Copy` so
//! they can be stored in the fault log, passed to the retry helpers and
//! compared in tests without allocation. `Display` renders the wire value
//! used in fault-recovery reports (`crc_error`, `http_error(503)`, ...).

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level fault
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The inverter answered with a Modbus exception frame.
    ModbusException(u8),
    /// The inverter endpoint did not answer within the request timeout.
    ModbusTimeout,
    /// Response frame failed CRC-16/Modbus verification.
    CrcError,
    /// Response JSON/hex was malformed or the frame fields are inconsistent.
    CorruptFrame,
    /// A bounded buffer overflowed and data was dropped.
    BufferOverflow,
    /// A cloud or inverter endpoint returned a non-success HTTP status.
    HttpError(u16),
    /// A cloud request timed out.
    Timeout,
    /// No connection could be established (DNS, TCP, TLS).
    ConnectionFailed,
    CompressionFailure,
    UploadFailure,
    OtaManifestInvalid,
    OtaChunkInvalid,
    OtaHashMismatch,
    OtaSignatureInvalid,
    ConfigParseError,
    SecurityMacMismatch,
    SecurityReplay,
    /// No pre-shared key is provisioned; the envelope fails closed.
    SecurityKeyMissing,
    /// Persistent storage rejected a read or write.
    StorageFailure,
    ResourceExhausted(Resource),
}

/// Which resource ran out for [`Fault::ResourceExhausted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Heap,
    Buffer,
    Partition,
}

impl Fault {
    /// Transient Modbus exception codes: 0x05 Acknowledge, 0x06 Busy.
    pub const fn is_transient_exception(self) -> bool {
        matches!(self, Self::ModbusException(0x05 | 0x06))
    }

    /// Faults caused by the network path rather than by the peer's data.
    pub const fn is_network(self) -> bool {
        matches!(
            self,
            Self::ModbusTimeout | Self::Timeout | Self::ConnectionFailed | Self::HttpError(_)
        )
    }

    /// HTTP statuses that indicate a configuration problem and are never retried.
    pub const fn is_configuration_error(self) -> bool {
        matches!(self, Self::HttpError(400 | 401 | 404))
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModbusException(code) => write!(f, "modbus_exception(0x{code:02x})"),
            Self::ModbusTimeout => write!(f, "modbus_timeout"),
            Self::CrcError => write!(f, "crc_error"),
            Self::CorruptFrame => write!(f, "corrupt_frame"),
            Self::BufferOverflow => write!(f, "buffer_overflow"),
            Self::HttpError(status) => write!(f, "http_error({status})"),
            Self::Timeout => write!(f, "timeout"),
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::CompressionFailure => write!(f, "compression_failure"),
            Self::UploadFailure => write!(f, "upload_failure"),
            Self::OtaManifestInvalid => write!(f, "ota_manifest_invalid"),
            Self::OtaChunkInvalid => write!(f, "ota_chunk_invalid"),
            Self::OtaHashMismatch => write!(f, "ota_hash_mismatch"),
            Self::OtaSignatureInvalid => write!(f, "ota_signature_invalid"),
            Self::ConfigParseError => write!(f, "config_parse_error"),
            Self::SecurityMacMismatch => write!(f, "security_mac_mismatch"),
            Self::SecurityReplay => write!(f, "security_replay"),
            Self::SecurityKeyMissing => write!(f, "security_key_missing"),
            Self::StorageFailure => write!(f, "storage_failure"),
            Self::ResourceExhausted(r) => write!(f, "resource_exhausted({r})"),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heap => write!(f, "heap"),
            Self::Buffer => write!(f, "buffer"),
            Self::Partition => write!(f, "partition"),
        }
    }
}

// ---------------------------------------------------------------------------
// Port error conversions
// ---------------------------------------------------------------------------

impl From<crate::app::ports::StorageError> for Fault {
    fn from(_: crate::app::ports::StorageError) -> Self {
        Self::StorageFailure
    }
}

impl From<crate::app::ports::TransportError> for Fault {
    fn from(e: crate::app::ports::TransportError) -> Self {
        match e {
            crate::app::ports::TransportError::Timeout => Self::Timeout,
            crate::app::ports::TransportError::ConnectionFailed
            | crate::app::ports::TransportError::Io => Self::ConnectionFailed,
        }
    }
}

impl From<crate::app::ports::SlotError> for Fault {
    fn from(e: crate::app::ports::SlotError) -> Self {
        match e {
            crate::app::ports::SlotError::NoPartition | crate::app::ports::SlotError::OutOfRange => {
                Self::ResourceExhausted(Resource::Partition)
            }
            crate::app::ports::SlotError::WriteFailed
            | crate::app::ports::SlotError::ReadFailed
            | crate::app::ports::SlotError::BootSetFailed => Self::OtaChunkInvalid,
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Gateway-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Fault>;
