//! Serde helpers for token amounts
//!
//! Amounts are u128 base units. 18-decimal tokens overflow u64 at about 18
//! whole tokens, and `serde_json::Value` cannot hold numbers above u64, so
//! amounts are written as decimal strings. Reading accepts either a string or
//! a plain JSON integer.
//!
//! Use with `#[serde(with = "crate::models::amount")]`.

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::fmt;

pub fn serialize<S>(amount: &u128, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&amount.to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(AmountVisitor)
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = u128;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a non-negative integer amount as a string or number")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
        Ok(u128::from(v))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
        u128::try_from(v).map_err(|_| E::custom(format!("negative amount: {}", v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
        v.trim()
            .parse()
            .map_err(|_| E::custom(format!("invalid amount: {}", v)))
    }
}
