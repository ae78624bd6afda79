//! Firmware chunk decryption: AES-256-CBC with a rolling IV.
//!
//! The image is encrypted as one CBC stream and served in chunks.  Each
//! chunk is decrypted with the last ciphertext block of the previous chunk
//! as its IV; PKCS#7 padding only appears at the end of the final chunk.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use sha2::{Digest, Sha256};

use crate::error::{Fault, Result};

use super::manifest::IV_LEN;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// First byte of every valid application image.
pub const FIRMWARE_MAGIC: u8 = 0xE9;

/// AES key derived from the provisioned firmware secret.
pub fn derive_key(secret: &[u8]) -> [u8; 32] {
    Sha256::digest(secret).into()
}

/// Strip and validate PKCS#7 padding.
pub fn strip_pkcs7(data: &mut Vec<u8>) -> Result<()> {
    let pad = *data.last().ok_or(Fault::OtaChunkInvalid)? as usize;
    if pad == 0 || pad > IV_LEN || pad > data.len() {
        return Err(Fault::OtaChunkInvalid);
    }
    if !data[data.len() - pad..].iter().all(|&b| b as usize == pad) {
        return Err(Fault::OtaChunkInvalid);
    }
    data.truncate(data.len() - pad);
    Ok(())
}

pub struct ChunkDecryptor {
    key: [u8; 32],
    iv: [u8; IV_LEN],
}

impl ChunkDecryptor {
    pub fn new(key: [u8; 32], iv: [u8; IV_LEN]) -> Self {
        Self { key, iv }
    }

    /// IV for the next chunk.
    pub fn iv(&self) -> [u8; IV_LEN] {
        self.iv
    }

    /// Decrypt one chunk and advance the IV.  `last` strips the padding.
    pub fn decrypt(&mut self, ciphertext: &[u8], last: bool) -> Result<Vec<u8>> {
        if ciphertext.is_empty() || ciphertext.len() % IV_LEN != 0 {
            return Err(Fault::OtaChunkInvalid);
        }
        let dec = Aes256CbcDec::new_from_slices(&self.key, &self.iv)
            .map_err(|_| Fault::OtaChunkInvalid)?;
        let mut plain = dec
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(|_| Fault::OtaChunkInvalid)?;
        if last {
            strip_pkcs7(&mut plain)?;
        }
        self.iv.copy_from_slice(&ciphertext[ciphertext.len() - IV_LEN..]);
        Ok(plain)
    }
}
