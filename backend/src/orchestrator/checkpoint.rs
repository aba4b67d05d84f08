//! Checkpoint - Versioned, checksummed persistence records
//!
//! Every record written to a `KeyValueStore` is wrapped in a
//! `VersionedRecord` carrying a schema version and a SHA-256 checksum of the
//! canonical JSON of its payload.
//!
//! # Critical Invariants
//!
//! - **Integrity**: A record whose checksum does not match the payload as
//!   stored is never loaded
//! - **Compatibility**: Records from other schema versions still load;
//!   missing fields take their serde defaults and unknown fields are ignored
//! - **No crash on bad state**: Corrupt records are reported as absent, with a warning

use crate::storage::{KeyValueStore, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

/// Schema version written by this build
pub const SCHEMA_VERSION: u32 = 1;

/// Errors raised while framing or unframing a record
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Envelope around every persisted payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedRecord<T> {
    pub schema_version: u32,
    pub checksum: String,
    pub data: T,
}

impl<T: Serialize> VersionedRecord<T> {
    pub fn wrap(data: T) -> Result<Self, CheckpointError> {
        let checksum = compute_hash(&data)?;
        Ok(Self {
            schema_version: SCHEMA_VERSION,
            checksum,
            data,
        })
    }

    /// Check the checksum against the payload
    ///
    /// On a `VersionedRecord<Value>` this hashes exactly what was stored,
    /// independent of the current shape of the payload type.
    pub fn verify(&self) -> Result<(), CheckpointError> {
        if compute_hash(&self.data)? != self.checksum {
            return Err(CheckpointError::ChecksumMismatch);
        }
        Ok(())
    }
}

/// Compute deterministic SHA256 hash of any serializable value
///
/// Uses canonical JSON serialization with sorted keys so that map iteration
/// order never changes the hash.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, CheckpointError> {
    use std::collections::BTreeMap;

    let value = serde_json::to_value(value)
        .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let json = serde_json::to_string(&canonicalize(value))
        .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Frame and write `data` under `key`
pub fn save_record<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    data: &T,
) -> Result<(), CheckpointError> {
    let record = VersionedRecord::wrap(data)?;
    let json = serde_json::to_string(&record)
        .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
    store.put(key, &json)?;
    Ok(())
}

/// Load and verify the record under `key`
///
/// The checksum is verified over the stored JSON before the payload is
/// decoded into `T`, so a record written by another schema version loads
/// with serde defaults for any field it lacks. Missing, unparseable, corrupt
/// and undecodable records all come back as `None`; everything except
/// "missing" is logged. Only store I/O failures are returned as errors.
pub fn load_record<T>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>, CheckpointError>
where
    T: DeserializeOwned,
{
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };

    let record: VersionedRecord<Value> = match serde_json::from_str(&raw) {
        Ok(record) => record,
        Err(e) => {
            warn!(key, error = %e, "discarding unreadable record");
            return Ok(None);
        }
    };

    if let Err(e) = record.verify() {
        warn!(key, error = %e, "discarding record that failed verification");
        return Ok(None);
    }

    if record.schema_version > SCHEMA_VERSION {
        warn!(
            key,
            found = record.schema_version,
            current = SCHEMA_VERSION,
            "loading record written by a newer schema"
        );
    } else if record.schema_version < SCHEMA_VERSION {
        debug!(key, found = record.schema_version, "upgrading record from older schema");
    }

    match serde_json::from_value(record.data) {
        Ok(data) => Ok(Some(data)),
        Err(e) => {
            warn!(key, error = %e, "discarding record with an incompatible payload");
            Ok(None)
        }
    }
}
