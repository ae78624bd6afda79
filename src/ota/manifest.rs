//! Update manifest: parsing, validation and persistence.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::warn;
use serde::Deserialize;

use crate::app::ports::{StoragePort, TypedStorage};
use crate::error::{Fault, Result};

pub const NAMESPACE: &str = "ota";

const KEY_VERSION: &str = "version";
const KEY_TOTAL_CHUNKS: &str = "total_chunks";
const KEY_HASH: &str = "hash";
const KEY_SIGNATURE: &str = "signature";
const KEY_IV: &str = "iv";
const KEY_ENC_SIZE: &str = "enc_size";
const KEY_ORIG_SIZE: &str = "orig_size";
const KEY_CHUNK_SIZE: &str = "chunk_size";

pub const IV_LEN: usize = 16;
/// Largest image the inactive slot accepts.
pub const MAX_FIRMWARE_SIZE: u32 = 4 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub(crate) struct CheckResponse {
    #[serde(default)]
    pub update_available: bool,
    pub update_info: Option<UpdateInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateInfo {
    pub latest_version: String,
    pub sha256_hash: String,
    pub signature: String,
    pub iv: String,
    pub original_size: u32,
    pub encrypted_size: u32,
    pub chunk_size: u32,
    pub total_chunks: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub version: String,
    pub sha256: [u8; 32],
    pub signature: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub original_size: u32,
    pub encrypted_size: u32,
    pub chunk_size: u32,
    pub total_chunks: u32,
}

impl Manifest {
    /// Validate the wire manifest.  Every inconsistency is
    /// [`Fault::OtaManifestInvalid`].
    pub(crate) fn from_info(info: &UpdateInfo) -> Result<Self> {
        let invalid = |what: &str| {
            warn!("OTA: manifest rejected: {}", what);
            Fault::OtaManifestInvalid
        };

        if info.latest_version.trim().is_empty() {
            return Err(invalid("empty version"));
        }
        let mut sha256 = [0u8; 32];
        hex::decode_to_slice(info.sha256_hash.trim(), &mut sha256)
            .map_err(|_| invalid("hash is not 64 hex characters"))?;
        let iv: [u8; IV_LEN] = STANDARD
            .decode(info.iv.trim())
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| invalid("IV is not 16 bytes of base64"))?;
        let signature = STANDARD
            .decode(info.signature.trim())
            .map_err(|_| invalid("signature is not base64"))?;
        if signature.is_empty() {
            return Err(invalid("empty signature"));
        }
        if info.original_size == 0 || info.original_size > MAX_FIRMWARE_SIZE {
            return Err(invalid("image size out of range"));
        }
        if info.chunk_size == 0 || info.chunk_size % IV_LEN as u32 != 0 {
            return Err(invalid("chunk size is not a positive multiple of 16"));
        }
        if info.encrypted_size % IV_LEN as u32 != 0 || info.encrypted_size <= info.original_size {
            return Err(invalid("encrypted size inconsistent with PKCS#7 padding"));
        }
        if info.total_chunks != info.encrypted_size.div_ceil(info.chunk_size) {
            return Err(invalid("chunk count does not cover the encrypted image"));
        }

        Ok(Self {
            version: info.latest_version.trim().to_string(),
            sha256,
            signature,
            iv,
            original_size: info.original_size,
            encrypted_size: info.encrypted_size,
            chunk_size: info.chunk_size,
            total_chunks: info.total_chunks,
        })
    }

    pub fn save(&self, storage: &mut dyn StoragePort) -> Result<()> {
        storage.put_str(NAMESPACE, KEY_VERSION, &self.version)?;
        storage.write(NAMESPACE, KEY_HASH, &self.sha256)?;
        storage.write(NAMESPACE, KEY_SIGNATURE, &self.signature)?;
        storage.write(NAMESPACE, KEY_IV, &self.iv)?;
        storage.put_u32(NAMESPACE, KEY_TOTAL_CHUNKS, self.total_chunks)?;
        storage.put_u32(NAMESPACE, KEY_ENC_SIZE, self.encrypted_size)?;
        storage.put_u32(NAMESPACE, KEY_ORIG_SIZE, self.original_size)?;
        storage.put_u32(NAMESPACE, KEY_CHUNK_SIZE, self.chunk_size)?;
        Ok(())
    }

    /// The persisted manifest, if one is complete.
    pub fn load(storage: &dyn StoragePort) -> Option<Self> {
        let mut sha256 = [0u8; 32];
        if storage.read(NAMESPACE, KEY_HASH, &mut sha256).ok()? != sha256.len() {
            return None;
        }
        let mut iv = [0u8; IV_LEN];
        if storage.read(NAMESPACE, KEY_IV, &mut iv).ok()? != IV_LEN {
            return None;
        }
        let mut sig = vec![0u8; 1024];
        let len = storage.read(NAMESPACE, KEY_SIGNATURE, &mut sig).ok()?;
        sig.truncate(len);

        Some(Self {
            version: storage.get_str(NAMESPACE, KEY_VERSION)?,
            sha256,
            signature: sig,
            iv,
            original_size: storage.get_u32(NAMESPACE, KEY_ORIG_SIZE)?,
            encrypted_size: storage.get_u32(NAMESPACE, KEY_ENC_SIZE)?,
            chunk_size: storage.get_u32(NAMESPACE, KEY_CHUNK_SIZE)?,
            total_chunks: storage.get_u32(NAMESPACE, KEY_TOTAL_CHUNKS)?,
        })
    }

    pub fn clear(storage: &mut dyn StoragePort) -> Result<()> {
        for key in [
            KEY_VERSION,
            KEY_HASH,
            KEY_SIGNATURE,
            KEY_IV,
            KEY_TOTAL_CHUNKS,
            KEY_ENC_SIZE,
            KEY_ORIG_SIZE,
            KEY_CHUNK_SIZE,
        ] {
            storage.delete(NAMESPACE, key)?;
        }
        Ok(())
    }

    pub fn is_last_chunk(&self, index: u32) -> bool {
        index + 1 == self.total_chunks
    }
}
