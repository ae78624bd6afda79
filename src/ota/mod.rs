//! Pull-based firmware updates.
//!
//! Flow: check manifest → initiate session → N × (fetch, decrypt, write)
//! → SHA-256 read-back → RSA signature → set boot slot → reboot → boot
//! validation.
//!
//! ```text
//!   idle ─▶ checking ─▶ downloading ─▶ verifying ─▶ applying ─▶ completed
//!              │             │              │            │
//!              └─────────────┴──────┬───────┴────────────┘
//!                                   ▼
//!                                 error ─▶ rollback
//! ```
//!
//! Download progress is persisted so a reboot resumes at the next
//! unfinished chunk.

use core::fmt;

use serde::Serialize;

pub mod crypto;
pub mod engine;
pub mod manifest;
pub mod progress;
pub mod signature;

pub use engine::{BootCheck, OtaContext, OtaEngine, OtaStats};
pub use manifest::Manifest;
pub use progress::DownloadProgress;

// ── State machine ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OtaState {
    Idle,
    Checking,
    Downloading,
    Verifying,
    Applying,
    Completed,
    Error,
    Rollback,
}

impl OtaState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Downloading => "downloading",
            Self::Verifying => "verifying",
            Self::Applying => "applying",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Rollback => "rollback",
        }
    }

    /// Persisted form in `ota_progress/state`.
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        [
            Self::Idle,
            Self::Checking,
            Self::Downloading,
            Self::Verifying,
            Self::Applying,
            Self::Completed,
            Self::Error,
            Self::Rollback,
        ]
        .into_iter()
        .find(|s| s.code() == code)
    }

    /// Whether `self → next` is a legal edge.
    pub fn can_transition(self, next: Self) -> bool {
        use OtaState::*;
        matches!(
            (self, next),
            (Idle, Checking)
                | (Idle, Downloading)
                | (Checking, Idle)
                | (Checking, Downloading)
                | (Downloading, Verifying)
                | (Verifying, Applying)
                | (Applying, Completed)
                | (Error, Rollback)
                | (Error, Idle)
                | (Rollback, Idle)
                | (Completed, Idle)
        ) || (next == Error && !matches!(self, Idle | Error | Rollback))
    }
}

impl fmt::Display for OtaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Completion report ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Success,
    RolledBack,
    Failed,
    PendingVerify,
}

// ── Fault injection ───────────────────────────────────────────

/// Recovery-path exercise, active only when a fault name is provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaTestFault {
    /// First decrypted chunk is corrupted after download.
    CorruptChunk,
    /// The manifest signature is corrupted before verification.
    BadHmac,
    /// The expected image hash is corrupted before verification.
    BadHash,
    /// Chunk fetches from the midpoint on time out.
    NetworkTimeout,
    /// The last chunk is never fetched.
    IncompleteDownload,
}

impl OtaTestFault {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "corrupt_chunk" => Some(Self::CorruptChunk),
            "bad_hmac" => Some(Self::BadHmac),
            "bad_hash" => Some(Self::BadHash),
            "network_timeout" => Some(Self::NetworkTimeout),
            "incomplete_download" => Some(Self::IncompleteDownload),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes_round_trip() {
        for code in 0..8 {
            assert_eq!(OtaState::from_code(code).map(OtaState::code), Some(code));
        }
        assert_eq!(OtaState::from_code(8), None);
    }

    #[test]
    fn transitions_follow_the_diagram() {
        assert!(OtaState::Idle.can_transition(OtaState::Checking));
        assert!(OtaState::Downloading.can_transition(OtaState::Error));
        assert!(OtaState::Error.can_transition(OtaState::Rollback));
        assert!(!OtaState::Idle.can_transition(OtaState::Applying));
        assert!(!OtaState::Rollback.can_transition(OtaState::Error));
    }

    #[test]
    fn fault_names() {
        assert_eq!(OtaTestFault::parse("bad_hash"), Some(OtaTestFault::BadHash));
        assert_eq!(OtaTestFault::parse(""), None);
    }
}
