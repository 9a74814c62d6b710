//! Sender credential codec
//!
//! Sender account passwords are stored as ChaCha20-Poly1305 envelopes and
//! decrypted only at transmission time. The key comes from required
//! configuration; nothing here generates one at runtime.

use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use volley_common::{Error, Result};

/// Nonce size for ChaCha20-Poly1305 (96 bits)
const NONCE_SIZE: usize = 12;

/// Key size for ChaCha20-Poly1305 (256 bits)
const KEY_SIZE: usize = 32;

/// Explicit encrypt/decrypt boundary for sender credentials.
///
/// The envelope format is `base64(nonce || ciphertext)` with a fresh random
/// nonce per encryption.
#[derive(Clone)]
pub struct CredentialCodec {
    key: [u8; KEY_SIZE],
}

impl CredentialCodec {
    /// Create a codec from a base64-encoded 32-byte key
    pub fn new(key_b64: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(key_b64.trim())
            .map_err(|e| Error::Crypto(format!("Invalid credential key encoding: {}", e)))?;

        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            Error::Crypto(format!("Credential key must be {} bytes", KEY_SIZE))
        })?;

        Ok(Self { key })
    }

    /// Encrypt a plaintext credential into an envelope
    pub fn encode(&self, plaintext: &str) -> Result<String> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| Error::Crypto(e.to_string()))?;

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

        let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(envelope))
    }

    /// Decrypt an envelope back into the plaintext credential
    pub fn decode(&self, envelope: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(envelope)
            .map_err(|e| Error::Crypto(format!("Invalid envelope encoding: {}", e)))?;

        if bytes.len() <= NONCE_SIZE {
            return Err(Error::Crypto("Envelope too short".to_string()));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);

        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| Error::Crypto(e.to_string()))?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| Error::Crypto(format!("Decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| Error::Crypto(format!("Decrypted credential is not UTF-8: {}", e)))
    }
}
