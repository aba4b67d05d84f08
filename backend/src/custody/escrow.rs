//! Escrow encryption for the agent secret
//!
//! Before the agent secret leaves the device it is sealed with AES-256-GCM.
//! The encryption key is `SHA-256(ESCROW_SALT || lowercase(owner address))`.
//!
//! # Limitation
//!
//! The key depends only on public information. Anyone who holds an escrow
//! record and knows the owner address can decrypt it, so this is
//! obfuscation against casual inspection of the backend, not protection
//! against a compromised backend. Recovery on a new device goes through
//! signature re-derivation instead (see `custody::AgentCustody::initialize`),
//! which never needs to decrypt this payload.

use crate::models::address::Address;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Salt mixed into the address-derived escrow key
const ESCROW_SALT: &str = "sentinel-agent-escrow-v1";

/// Prefix tagging the payload format
const PAYLOAD_PREFIX: &str = "v1:";

/// Size of the AES-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Errors raised while sealing or opening escrow payloads
#[derive(Debug, Error, PartialEq)]
pub enum EscrowCipherError {
    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed")]
    Decryption,

    #[error("malformed escrow payload: {0}")]
    Malformed(String),
}

/// Seals and opens escrowed agent secrets for one owner
pub struct EscrowCipher {
    cipher: Aes256Gcm,
}

impl EscrowCipher {
    pub fn for_owner(owner: &Address) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(ESCROW_SALT.as_bytes());
        hasher.update(owner.as_str().as_bytes());
        let key = hasher.finalize();
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    /// Encrypt `plaintext` into `v1:<base64(nonce || ciphertext)>`
    pub fn seal(&self, plaintext: &str) -> Result<String, EscrowCipherError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| EscrowCipherError::Encryption)?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", PAYLOAD_PREFIX, BASE64.encode(payload)))
    }

    /// Decrypt a payload produced by `seal`
    pub fn open(&self, sealed: &str) -> Result<String, EscrowCipherError> {
        let body = sealed
            .strip_prefix(PAYLOAD_PREFIX)
            .ok_or_else(|| EscrowCipherError::Malformed("unknown payload version".into()))?;
        let payload = BASE64
            .decode(body)
            .map_err(|e| EscrowCipherError::Malformed(e.to_string()))?;
        if payload.len() <= NONCE_SIZE {
            return Err(EscrowCipherError::Malformed("payload too short".into()));
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| EscrowCipherError::Decryption)?;
        String::from_utf8(plaintext).map_err(|e| EscrowCipherError::Malformed(e.to_string()))
    }
}
