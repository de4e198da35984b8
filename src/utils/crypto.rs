//! Authenticated encryption for MFA secrets and backup codes.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{anyhow, Result};
use base64::Engine;
use rand::RngCore;

/// AES-256-GCM nonce size (96 bits).
const NONCE_SIZE: usize = 12;

/// AES-256-GCM cipher for values at rest.
///
/// Every `encrypt` call draws a fresh random nonce and binds it into the
/// authenticated encryption; the nonce travels with the ciphertext as a
/// prefix. Reusing a nonce under the same key would void the
/// authentication guarantee, so there is no caller-supplied nonce path.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl SecretCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Build a cipher from a 64-character hex key string.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key).map_err(|e| anyhow!("invalid hex key: {e}"))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow!("encryption key must be exactly 32 bytes"))?;
        Ok(Self::new(key))
    }

    /// Encrypt plaintext, returning base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow!("cipher init failed: {e}"))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("encryption failed: {e}"))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(combined))
    }

    /// Decrypt base64(nonce || ciphertext) back to plaintext.
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| anyhow!("invalid base64 ciphertext: {e}"))?;

        if combined.len() < NONCE_SIZE {
            return Err(anyhow!("ciphertext too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow!("cipher init failed: {e}"))?;

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow!("decryption failed: {e}"))?;

        String::from_utf8(plaintext).map_err(|e| anyhow!("invalid utf-8 in plaintext: {e}"))
    }
}
