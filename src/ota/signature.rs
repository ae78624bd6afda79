//! Release signature check: RSA-2048, PKCS#1 v1.5 over the SHA-256 digest.

use log::warn;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::Sha256;

use crate::error::{Fault, Result};

/// Release signing key baked into the firmware.
pub const FIRMWARE_PUBLIC_KEY_PEM: &str = include_str!("../../keys/firmware_signing.pub.pem");

/// Verify `signature` over an image whose SHA-256 is `digest`.
pub fn verify_digest(public_key_pem: &str, digest: &[u8; 32], signature: &[u8]) -> Result<()> {
    let key = RsaPublicKey::from_public_key_pem(public_key_pem).map_err(|e| {
        warn!("OTA: signing key unusable: {}", e);
        Fault::OtaSignatureInvalid
    })?;
    key.verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature)
        .map_err(|_| Fault::OtaSignatureInvalid)
}
