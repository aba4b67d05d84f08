//! Deterministic agent key derivation
//!
//! The agent key is never generated randomly. The owner signs a fixed,
//! versioned authorization message and the agent's secp256k1 secret is the
//! Keccak-256 hash of that signature. Because wallet signatures over the
//! same message are deterministic (RFC 6979), the owner can re-create the
//! same agent on any device by signing again, and nobody can go from the
//! agent key back to the owner's signature.
//!
//! Bumping `AUTHORIZATION_MESSAGE_VERSION` changes the message and therefore
//! every derived agent address.

use crate::models::address::Address;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;
use sha3::{Digest, Keccak256};
use std::fmt;
use thiserror::Error;

/// Version embedded in the authorization message
pub const AUTHORIZATION_MESSAGE_VERSION: u32 = 1;

/// Errors raised while deriving or using an agent key
#[derive(Debug, Error, PartialEq)]
pub enum DerivationError {
    #[error("Signature is empty")]
    EmptySignature,

    #[error("Derived secret is not a valid secp256k1 scalar")]
    InvalidScalar,

    #[error("Stored secret is malformed: {0}")]
    MalformedSecret(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Message the owner signs to authorize (and later re-derive) the agent
///
/// The message binds the owner and network, so the same owner gets distinct
/// agents on distinct networks.
pub fn authorization_message(owner: &Address, network: &str) -> String {
    format!(
        "Sentinel Agent Wallet Authorization\n\n\
         I authorize a delegated agent wallet that can only pay my vault, \
         my savings plans and vendors I trust.\n\n\
         Owner: {}\nNetwork: {}\nVersion: {}",
        owner, network, AUTHORIZATION_MESSAGE_VERSION
    )
}

/// Secret signing key of the agent
///
/// `Debug` never prints the secret. The raw secret is only reachable through
/// `secret_hex`, which is crate-private and used for local persistence and
/// escrow encryption.
#[derive(Clone)]
pub struct AgentKey {
    signing_key: SigningKey,
    address: Address,
}

impl AgentKey {
    /// Derive the agent key from the owner's authorization signature
    ///
    /// `signature` is normally a `0x`-prefixed hex string; any other input is
    /// hashed as raw UTF-8 bytes.
    pub fn from_signature(signature: &str) -> Result<Self, DerivationError> {
        let bytes = signature_bytes(signature);
        if bytes.is_empty() {
            return Err(DerivationError::EmptySignature);
        }
        let secret = Keccak256::digest(&bytes);
        let signing_key =
            SigningKey::from_slice(&secret).map_err(|_| DerivationError::InvalidScalar)?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Rebuild a key from its persisted hex secret
    pub fn from_secret_hex(secret: &str) -> Result<Self, DerivationError> {
        let trimmed = secret.trim().trim_start_matches("0x");
        let bytes =
            hex::decode(trimmed).map_err(|e| DerivationError::MalformedSecret(e.to_string()))?;
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|_| DerivationError::MalformedSecret("not a valid scalar".into()))?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = address_of(&signing_key);
        Self {
            signing_key,
            address,
        }
    }

    /// Public address of the agent
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Sign a 32-byte digest, returning `r || s || v` (65 bytes)
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; 65], DerivationError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| DerivationError::Signing(e.to_string()))?;
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte();
        Ok(out)
    }

    pub(crate) fn secret_hex(&self) -> String {
        format!("0x{}", hex::encode(self.signing_key.to_bytes()))
    }
}

impl fmt::Debug for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentKey")
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Address of a key: last 20 bytes of Keccak-256(uncompressed pubkey)
fn address_of(signing_key: &SigningKey) -> Address {
    let public = PublicKey::from(signing_key.verifying_key());
    let uncompressed = public.to_encoded_point(false);
    // Skip the 0x04 SEC1 tag byte
    let digest = Keccak256::digest(&uncompressed.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..32]);
    Address::from_bytes(&out)
}

fn signature_bytes(signature: &str) -> Vec<u8> {
    let trimmed = signature.trim();
    if let Some(body) = trimmed.strip_prefix("0x") {
        if let Ok(decoded) = hex::decode(body) {
            return decoded;
        }
    }
    trimmed.as_bytes().to_vec()
}
