//! Persisted download progress (`ota_progress` namespace).

use crate::app::ports::{StoragePort, TypedStorage};
use crate::error::Result;

use super::OtaState;
use super::manifest::IV_LEN;

pub const NAMESPACE: &str = "ota_progress";

const KEY_CHUNKS_RECV: &str = "chunks_recv";
const KEY_TOTAL_CHUNKS: &str = "total_chunks";
const KEY_BYTES_DOWN: &str = "bytes_down";
const KEY_PERCENTAGE: &str = "percentage";
const KEY_STATE: &str = "state";
const KEY_VERSION: &str = "version";
const KEY_FIRMWARE_SIZE: &str = "firmware_size";
const KEY_LAST_ACTIVITY: &str = "last_activity";
const KEY_IV_NEXT: &str = "iv_next";

/// Where a download stands.  `iv_next` is the CBC chaining value for chunk
/// `chunks_received`, so a resumed download decrypts exactly like an
/// uninterrupted one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    pub version: String,
    pub chunks_received: u32,
    pub total_chunks: u32,
    /// Decrypted bytes written to the inactive slot.
    pub bytes_written: u32,
    pub firmware_size: u32,
    pub state: OtaState,
    pub last_activity_ms: u64,
    pub iv_next: [u8; IV_LEN],
}

impl DownloadProgress {
    pub fn start(version: &str, total_chunks: u32, firmware_size: u32, iv: [u8; IV_LEN]) -> Self {
        Self {
            version: version.to_string(),
            chunks_received: 0,
            total_chunks,
            bytes_written: 0,
            firmware_size,
            state: OtaState::Downloading,
            last_activity_ms: 0,
            iv_next: iv,
        }
    }

    pub fn percentage(&self) -> u8 {
        if self.total_chunks == 0 {
            return 0;
        }
        (u64::from(self.chunks_received.min(self.total_chunks)) * 100 / u64::from(self.total_chunks))
            as u8
    }

    pub fn is_complete(&self) -> bool {
        self.chunks_received >= self.total_chunks
    }

    pub fn save(&self, storage: &mut dyn StoragePort) -> Result<()> {
        storage.put_str(NAMESPACE, KEY_VERSION, &self.version)?;
        storage.put_u32(NAMESPACE, KEY_CHUNKS_RECV, self.chunks_received)?;
        storage.put_u32(NAMESPACE, KEY_TOTAL_CHUNKS, self.total_chunks)?;
        storage.put_u32(NAMESPACE, KEY_BYTES_DOWN, self.bytes_written)?;
        storage.put_u32(NAMESPACE, KEY_PERCENTAGE, u32::from(self.percentage()))?;
        storage.put_u32(NAMESPACE, KEY_STATE, self.state.code())?;
        storage.put_u32(NAMESPACE, KEY_FIRMWARE_SIZE, self.firmware_size)?;
        storage.put_u64(NAMESPACE, KEY_LAST_ACTIVITY, self.last_activity_ms)?;
        storage.write(NAMESPACE, KEY_IV_NEXT, &self.iv_next)?;
        Ok(())
    }

    pub fn load(storage: &dyn StoragePort) -> Option<Self> {
        let mut iv_next = [0u8; IV_LEN];
        if storage.read(NAMESPACE, KEY_IV_NEXT, &mut iv_next).ok()? != IV_LEN {
            return None;
        }
        Some(Self {
            version: storage.get_str(NAMESPACE, KEY_VERSION)?,
            chunks_received: storage.get_u32(NAMESPACE, KEY_CHUNKS_RECV)?,
            total_chunks: storage.get_u32(NAMESPACE, KEY_TOTAL_CHUNKS)?,
            bytes_written: storage.get_u32(NAMESPACE, KEY_BYTES_DOWN)?,
            firmware_size: storage.get_u32(NAMESPACE, KEY_FIRMWARE_SIZE)?,
            state: OtaState::from_code(storage.get_u32(NAMESPACE, KEY_STATE)?)?,
            last_activity_ms: storage.get_u64(NAMESPACE, KEY_LAST_ACTIVITY).unwrap_or(0),
            iv_next,
        })
    }

    pub fn clear(storage: &mut dyn StoragePort) -> Result<()> {
        for key in [
            KEY_CHUNKS_RECV,
            KEY_TOTAL_CHUNKS,
            KEY_BYTES_DOWN,
            KEY_PERCENTAGE,
            KEY_STATE,
            KEY_VERSION,
            KEY_FIRMWARE_SIZE,
            KEY_LAST_ACTIVITY,
            KEY_IV_NEXT,
        ] {
            storage.delete(NAMESPACE, key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::nvs::NvsAdapter;

    #[test]
    fn progress_survives_a_reboot() {
        let mut nvs = NvsAdapter::new().unwrap();
        let mut p = DownloadProgress::start("1.1.0", 8, 2000, [3u8; 16]);
        p.chunks_received = 3;
        p.bytes_written = 768;
        p.iv_next = [9u8; 16];
        p.last_activity_ms = 42;
        p.save(&mut nvs).unwrap();
        assert_eq!(DownloadProgress::load(&nvs), Some(p.clone()));
        assert_eq!(p.percentage(), 37);

        DownloadProgress::clear(&mut nvs).unwrap();
        assert_eq!(DownloadProgress::load(&nvs), None);
    }
}
