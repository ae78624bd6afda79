//! Security envelope: persistent nonce, HMAC-SHA256 tag, optional AES-CBC.
//!
//! A secured message is
//!
//! ```json
//! {"nonce": 2, "encrypted": false, "payload": "<base64>", "mac": "<hex>"}
//! ```
//!
//! where `mac = HMAC-SHA256(psk, "{nonce}:{payload}")` over the base64 text.
//! The nonce is incremented and persisted before every message, so the
//! sequence stays strictly monotonic across reboots.  Inbound messages must
//! carry a nonce above the last accepted one and, once a nonce has been
//! accepted, no more than [`REPLAY_WINDOW`] ahead of it.
//!
//! Crypto is handled by `hmac-sha256` (constant-time verification) and the
//! RustCrypto `aes` + `cbc` crates, identical on ESP-IDF and host targets.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{StoragePort, TypedStorage};
use crate::error::{Fault, Result};

pub const NAMESPACE: &str = "security";
const KEY_PSK: &str = "psk";
const KEY_NONCE: &str = "nonce";
const KEY_LAST_NONCE: &str = "last_nonce";

pub const PSK_LEN: usize = 32;
/// Forward tolerance for out-of-order inbound nonces.
pub const REPLAY_WINDOW: u32 = 10;

const IV_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Wire shape of a secured message.  Field order is the emitted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuredMessage {
    pub nonce: u32,
    pub encrypted: bool,
    pub payload: String,
    pub mac: String,
}

/// Reversible payload transformation applied before the MAC when
/// `encrypted` is requested.
pub trait PayloadCipher {
    fn encrypt(&self, key: &[u8; PSK_LEN], plain: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, key: &[u8; PSK_LEN], data: &[u8]) -> Result<Vec<u8>>;
}

/// AES-256-CBC with PKCS#7 padding.  A fresh random IV is prepended to the
/// ciphertext.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesCbcCipher;

impl PayloadCipher for AesCbcCipher {
    fn encrypt(&self, key: &[u8; PSK_LEN], plain: &[u8]) -> Result<Vec<u8>> {
        let iv = fill_random_iv();
        let enc = Aes256CbcEnc::new_from_slices(key, &iv).map_err(|_| Fault::SecurityKeyMissing)?;
        let mut out = iv.to_vec();
        out.extend_from_slice(&enc.encrypt_padded_vec_mut::<Pkcs7>(plain));
        Ok(out)
    }

    fn decrypt(&self, key: &[u8; PSK_LEN], data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < IV_LEN * 2 || data.len() % IV_LEN != 0 {
            return Err(Fault::SecurityMacMismatch);
        }
        let (iv, ct) = data.split_at(IV_LEN);
        let dec = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| Fault::SecurityKeyMissing)?;
        dec.decrypt_padded_vec_mut::<Pkcs7>(ct)
            .map_err(|_| Fault::SecurityMacMismatch)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeStats {
    pub secured: u32,
    pub accepted: u32,
    pub mac_failures: u32,
    pub replays: u32,
}

/// Parse a provisioned key: 64 hex characters or 32 raw bytes.
pub fn parse_psk(raw: &[u8]) -> Option<[u8; PSK_LEN]> {
    if raw.len() == PSK_LEN * 2 {
        let text = core::str::from_utf8(raw).ok()?;
        let mut key = [0u8; PSK_LEN];
        hex::decode_to_slice(text.trim(), &mut key).ok()?;
        return Some(key);
    }
    raw.try_into().ok()
}

fn mac_input(nonce: u32, payload: &str) -> String {
    format!("{nonce}:{payload}")
}

/// Owner of the nonce sequence and the pre-shared key.
pub struct SecurityEnvelope<C: PayloadCipher = AesCbcCipher> {
    psk: Option<[u8; PSK_LEN]>,
    nonce: u32,
    last_valid_nonce: u32,
    cipher: C,
    stats: EnvelopeStats,
}

impl SecurityEnvelope<AesCbcCipher> {
    /// Load key and counters from the `security` namespace.
    pub fn load(storage: &dyn StoragePort) -> Self {
        Self::load_with_cipher(storage, AesCbcCipher)
    }
}

impl<C: PayloadCipher> SecurityEnvelope<C> {
    pub fn load_with_cipher(storage: &dyn StoragePort, cipher: C) -> Self {
        let mut buf = [0u8; PSK_LEN * 2];
        let psk = storage
            .read(NAMESPACE, KEY_PSK, &mut buf)
            .ok()
            .and_then(|len| parse_psk(&buf[..len]));
        if psk.is_none() {
            warn!("Security: no pre-shared key provisioned, envelope will fail closed");
        }
        let nonce = storage.get_u32(NAMESPACE, KEY_NONCE).unwrap_or(0);
        let last_valid_nonce = storage.get_u32(NAMESPACE, KEY_LAST_NONCE).unwrap_or(0);
        info!(
            "Security: loaded (nonce={}, last_valid={})",
            nonce, last_valid_nonce
        );
        Self {
            psk,
            nonce,
            last_valid_nonce,
            cipher,
            stats: EnvelopeStats::default(),
        }
    }

    /// Store a hex-encoded key and start using it.
    pub fn provision_psk(&mut self, storage: &mut dyn StoragePort, hex_key: &str) -> Result<()> {
        let key = parse_psk(hex_key.trim().as_bytes()).ok_or(Fault::SecurityKeyMissing)?;
        storage.write(NAMESPACE, KEY_PSK, hex_key.trim().as_bytes())?;
        self.psk = Some(key);
        info!("Security: pre-shared key provisioned");
        Ok(())
    }

    pub fn has_key(&self) -> bool {
        self.psk.is_some()
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    pub fn last_valid_nonce(&self) -> u32 {
        self.last_valid_nonce
    }

    pub fn stats(&self) -> EnvelopeStats {
        self.stats
    }

    /// Wrap `payload` into a secured message and return its JSON text.
    pub fn secure(
        &mut self,
        storage: &mut dyn StoragePort,
        payload: &[u8],
        encrypted: bool,
    ) -> Result<String> {
        let psk = self.psk.ok_or(Fault::SecurityKeyMissing)?;
        let nonce = self.nonce.checked_add(1).ok_or(Fault::SecurityReplay)?;
        storage.put_u32(NAMESPACE, KEY_NONCE, nonce)?;
        self.nonce = nonce;

        let body = if encrypted {
            STANDARD.encode(self.cipher.encrypt(&psk, payload)?)
        } else {
            STANDARD.encode(payload)
        };
        let tag = hmac_sha256::HMAC::mac(mac_input(nonce, &body).as_bytes(), psk);
        let message = SecuredMessage {
            nonce,
            encrypted,
            payload: body,
            mac: hex::encode(tag),
        };
        self.stats.secured += 1;
        serde_json::to_string(&message).map_err(|_| Fault::UploadFailure)
    }

    /// Verify and unwrap a secured message.
    pub fn unsecure(&mut self, storage: &mut dyn StoragePort, text: &str) -> Result<Vec<u8>> {
        let psk = self.psk.ok_or(Fault::SecurityKeyMissing)?;
        let message: SecuredMessage =
            serde_json::from_str(text).map_err(|_| Fault::ConfigParseError)?;

        let mut tag = [0u8; 32];
        let tag_ok = hex::decode_to_slice(&message.mac, &mut tag).is_ok()
            && hmac_sha256::HMAC::verify(
                mac_input(message.nonce, &message.payload).as_bytes(),
                psk,
                &tag,
            );
        if !tag_ok {
            self.stats.mac_failures += 1;
            warn!("Security: MAC verification failed (nonce={})", message.nonce);
            return Err(Fault::SecurityMacMismatch);
        }

        let too_far = self.last_valid_nonce > 0
            && message.nonce > self.last_valid_nonce.saturating_add(REPLAY_WINDOW);
        if message.nonce <= self.last_valid_nonce || too_far {
            self.stats.replays += 1;
            warn!(
                "Security: nonce {} rejected (last valid {})",
                message.nonce, self.last_valid_nonce
            );
            return Err(Fault::SecurityReplay);
        }

        let raw = STANDARD
            .decode(message.payload.as_bytes())
            .map_err(|_| Fault::ConfigParseError)?;
        let payload = if message.encrypted {
            self.cipher.decrypt(&psk, &raw)?
        } else {
            raw
        };

        storage.put_u32(NAMESPACE, KEY_LAST_NONCE, message.nonce)?;
        self.last_valid_nonce = message.nonce;
        self.stats.accepted += 1;
        Ok(payload)
    }
}

// ── Platform-specific IV generation ──────────────────────────

/// ESP-IDF: hardware RNG via `esp_fill_random`.
#[cfg(target_os = "espidf")]
fn fill_random_iv() -> [u8; IV_LEN] {
    let mut buf = [0u8; IV_LEN];
    // SAFETY: esp_fill_random writes `len` bytes into a valid, exclusively
    // owned buffer.
    unsafe {
        esp_idf_sys::esp_fill_random(buf.as_mut_ptr().cast(), buf.len());
    }
    buf
}

/// Simulation: `RandomState` entropy, not cryptographic.
#[cfg(not(target_os = "espidf"))]
fn fill_random_iv() -> [u8; IV_LEN] {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut buf = [0u8; IV_LEN];
    for chunk in buf.chunks_mut(8) {
        let val = RandomState::new().build_hasher().finish().to_le_bytes();
        chunk.copy_from_slice(&val[..chunk.len()]);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::nvs::NvsAdapter;

    fn psk_hex() -> String {
        (0u8..32).map(|b| format!("{b:02x}")).collect()
    }

    fn provisioned(nonce: u32) -> (SecurityEnvelope, NvsAdapter) {
        let mut nvs = NvsAdapter::new().unwrap();
        nvs.write(NAMESPACE, KEY_PSK, psk_hex().as_bytes()).unwrap();
        nvs.put_u32(NAMESPACE, KEY_NONCE, nonce).unwrap();
        (SecurityEnvelope::load(&nvs), nvs)
    }

    #[test]
    fn secure_matches_reference_mac() {
        let (mut env, mut nvs) = provisioned(1);
        let text = env.secure(&mut nvs, br#"{"x":1}"#, false).unwrap();
        assert_eq!(
            text,
            concat!(
                r#"{"nonce":2,"encrypted":false,"payload":"eyJ4IjoxfQ==","mac":""#,
                "63b81ea93e1c1889c83405bb7ee26c608a489c33adc486eecc30a54e0be57934",
                r#""}"#
            )
        );
        let second: SecuredMessage =
            serde_json::from_str(&env.secure(&mut nvs, br#"{"x":1}"#, false).unwrap()).unwrap();
        assert_eq!(second.nonce, 3);
        assert_eq!(
            second.mac,
            "d34378df7ca310fde4439ccf9f83b0c446a59dd5f3b9e2e598ef1f86907b3dc9"
        );
        assert_eq!(nvs.get_u32(NAMESPACE, KEY_NONCE), Some(3));
    }

    #[test]
    fn nonce_survives_reload() {
        let (mut env, mut nvs) = provisioned(41);
        env.secure(&mut nvs, b"a", false).unwrap();
        let reloaded = SecurityEnvelope::load(&nvs);
        assert_eq!(reloaded.nonce(), 42);
    }

    #[test]
    fn missing_key_fails_closed() {
        let mut nvs = NvsAdapter::new().unwrap();
        let mut env = SecurityEnvelope::load(&nvs);
        assert_eq!(env.secure(&mut nvs, b"a", false), Err(Fault::SecurityKeyMissing));
    }

    #[test]
    fn round_trip_and_replay_rejection() {
        let (mut env, mut nvs) = provisioned(0);
        let msg = env.secure(&mut nvs, b"hello", false).unwrap();
        assert_eq!(env.unsecure(&mut nvs, &msg).unwrap(), b"hello");
        assert_eq!(env.unsecure(&mut nvs, &msg), Err(Fault::SecurityReplay));
        assert_eq!(env.stats().replays, 1);
    }

    #[test]
    fn forward_window_is_enforced() {
        let (mut env, mut nvs) = provisioned(0);
        let first = env.secure(&mut nvs, b"1", false).unwrap();
        env.unsecure(&mut nvs, &first).unwrap();
        for _ in 0..REPLAY_WINDOW {
            env.secure(&mut nvs, b"skip", false).unwrap();
        }
        let far = env.secure(&mut nvs, b"far", false).unwrap();
        assert_eq!(env.unsecure(&mut nvs, &far), Err(Fault::SecurityReplay));
    }

    #[test]
    fn tampered_payload_fails_mac() {
        let (mut env, mut nvs) = provisioned(0);
        let msg = env.secure(&mut nvs, b"hello", false).unwrap();
        let tampered = msg.replace("aGVsbG8=", "aGVsbG9=");
        assert_eq!(env.unsecure(&mut nvs, &tampered), Err(Fault::SecurityMacMismatch));
    }

    #[test]
    fn encrypted_payload_round_trips() {
        let (mut env, mut nvs) = provisioned(0);
        let msg = env.secure(&mut nvs, b"secret reading", true).unwrap();
        let parsed: SecuredMessage = serde_json::from_str(&msg).unwrap();
        assert!(parsed.encrypted);
        assert_ne!(STANDARD.decode(&parsed.payload).unwrap(), b"secret reading");
        assert_eq!(env.unsecure(&mut nvs, &msg).unwrap(), b"secret reading");
    }

    #[test]
    fn psk_accepts_hex_or_raw() {
        assert_eq!(parse_psk(psk_hex().as_bytes()).unwrap()[31], 31);
        assert_eq!(parse_psk(&[7u8; 32]), Some([7u8; 32]));
        assert_eq!(parse_psk(b"short"), None);
    }
}
