//! Local key-value persistence
//!
//! Everything the agent remembers between runs (identity, destination set,
//! schedules, savings plans, execution history) lives behind the
//! `KeyValueStore` trait. Stores are injected, never global, and every key is
//! scoped by owner and network through `StoreScope`.
//!
//! Values are opaque strings. Record framing and integrity checks live in
//! `orchestrator::checkpoint`.

use crate::models::address::Address;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

/// Errors raised by a store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Synchronous string key-value store
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// What kind of record a key holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Identity,
    Destinations,
    Schedules,
    SavingsPlans,
    History,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Identity => "agent",
            RecordKind::Destinations => "destinations",
            RecordKind::Schedules => "schedules",
            RecordKind::SavingsPlans => "savings",
            RecordKind::History => "history",
        }
    }
}

/// Owner + network namespace for store keys
///
/// # Example
/// ```
/// use sentinel_core_rs::Address;
/// use sentinel_core_rs::storage::{RecordKind, StoreScope};
///
/// let owner = Address::parse("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA").unwrap();
/// let scope = StoreScope::new(owner, "sepolia");
/// assert_eq!(
///     scope.key(RecordKind::Identity),
///     "sentinel:sepolia:0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa:agent"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreScope {
    owner: Address,
    network: String,
}

impl StoreScope {
    pub fn new(owner: Address, network: impl Into<String>) -> Self {
        Self {
            owner,
            network: network.into(),
        }
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn key(&self, kind: RecordKind) -> String {
        format!("sentinel:{}:{}:{}", self.network, self.owner, kind.as_str())
    }
}

/// In-memory store, used by tests and short-lived tools
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// Directory-backed store: one JSON file per key
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.json", file_name))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
