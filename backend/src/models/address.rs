//! Account address model
//!
//! Every address handled by the agent (owner, vault, vendors, contracts,
//! the agent itself) is stored lowercase. Normalizing once at construction
//! makes every comparison case-insensitive without callers remembering to
//! lowercase.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised when parsing an address
#[derive(Debug, Error, PartialEq)]
pub enum AddressError {
    #[error("Address must start with 0x: {0}")]
    MissingPrefix(String),

    #[error("Address must be 20 bytes (40 hex chars), got {len} chars: {raw}")]
    InvalidLength { raw: String, len: usize },

    #[error("Address contains non-hex characters: {0}")]
    InvalidHex(String),
}

/// Lowercase-normalized `0x`-prefixed 20-byte address
///
/// # Example
/// ```
/// use sentinel_core_rs::Address;
///
/// let a = Address::parse("0xABCDEFabcdef0123456789012345678901234567").unwrap();
/// let b = Address::parse("0xabcdefABCDEF0123456789012345678901234567").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "0xabcdefabcdef0123456789012345678901234567");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Parse and normalize an address
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let trimmed = raw.trim();
        let Some(body) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        else {
            return Err(AddressError::MissingPrefix(raw.to_string()));
        };

        if body.len() != 40 {
            return Err(AddressError::InvalidLength {
                raw: raw.to_string(),
                len: body.len(),
            });
        }

        if !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError::InvalidHex(raw.to_string()));
        }

        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }

    /// Build an address from raw bytes (used by key derivation)
    pub fn from_bytes(bytes: &[u8; 20]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    /// Lowercase string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against an arbitrary string
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Address::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_missing_prefix() {
        let err = Address::parse("abcdefabcdef0123456789012345678901234567").unwrap_err();
        assert!(matches!(err, AddressError::MissingPrefix(_)));
    }

    #[test]
    fn test_parse_rejects_short_address() {
        let err = Address::parse("0x1234").unwrap_err();
        assert_eq!(
            err,
            AddressError::InvalidLength {
                raw: "0x1234".to_string(),
                len: 4
            }
        );
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        assert!(Address::parse("0xzzzzefabcdef0123456789012345678901234567").is_err());
    }

    #[test]
    fn test_serde_normalizes_on_load() {
        let parsed: Address =
            serde_json::from_str("\"0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA\"").unwrap();
        assert_eq!(parsed.as_str(), "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    }

    #[test]
    fn test_matches_is_case_insensitive() {
        let a = Address::parse("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        assert!(a.matches("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"));
    }
}
