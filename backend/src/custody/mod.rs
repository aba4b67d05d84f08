//! Agent custody
//!
//! Owns the agent's signing identity for one (owner, network) pair.
//!
//! ```text
//! Uninitialized -> Loaded -> Verified -> Active                (local cache)
//! Uninitialized -> FetchedFromEscrow -> Verified -> Active     (new device)
//! Uninitialized -> SignatureRequested -> Derived -> Active     (first run)
//! ```
//!
//! CRITICAL: The owner's signer is only ever prompted from `initialize`,
//! and never while the identity lock is held. `ensure_loaded`,
//! `agent_address` and the execution pipeline never prompt, never touch the
//! network and never wait on an open signature request.
//!
//! Escrow and backend failures are logged and swallowed; only signer and
//! derivation failures are fatal.

pub mod derivation;
pub mod escrow;

use crate::models::address::Address;
use crate::orchestrator::checkpoint::{load_record, save_record, CheckpointError, SCHEMA_VERSION};
use crate::remote::{EscrowRecord, EscrowService};
use crate::storage::{KeyValueStore, RecordKind, StoreScope};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derivation::{authorization_message, AgentKey, DerivationError};
use escrow::EscrowCipher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub use derivation::AUTHORIZATION_MESSAGE_VERSION;

/// Errors surfaced by the owner's wallet
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SignerError {
    #[error("Wallet unavailable: {0}")]
    Unavailable(String),

    #[error("Signature request rejected: {0}")]
    Rejected(String),
}

/// Errors raised by custody operations
#[derive(Debug, Error)]
pub enum CustodyError {
    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error("Key derivation failed: {0}")]
    Derivation(#[from] DerivationError),

    #[error("Local store error: {0}")]
    Store(#[from] CheckpointError),

    #[error("Signer belongs to {actual}, expected owner {expected}")]
    OwnerMismatch { expected: Address, actual: Address },

    #[error("Agent wallet not set up")]
    NotSetUp,
}

/// Capability to ask the owner's wallet for a signature
#[async_trait]
pub trait OwnerSigner: Send + Sync {
    fn owner_address(&self) -> Address;

    /// Sign `message` (personal-sign style), returning a `0x` hex signature
    async fn sign_message(&self, message: &str) -> Result<String, SignerError>;
}

/// Where the custody manager is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CustodyState {
    #[default]
    Uninitialized,
    Loaded,
    FetchedFromEscrow,
    SignatureRequested,
    Derived,
    Verified,
    Active,
}

/// Outcome of an escrow sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowSync {
    Synced,
    /// Another sync on this manager is still running
    AlreadyInProgress,
    /// No escrow backend configured
    NoBackend,
    /// Backend call failed; logged, not fatal
    Failed(String),
}

/// Public description of the active agent (never contains the secret)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub owner_address: Address,
    pub vault_address: Address,
    pub address: Address,
    pub network: String,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
}

/// Identity as persisted in the local store
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredIdentity {
    owner_address: Address,
    vault_address: Address,
    agent_address: Address,
    #[serde(default)]
    network: String,
    secret: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    state: CustodyState,
    /// States entered since the last reset, in order
    trail: Vec<CustodyState>,
    active: Option<(AgentKey, AgentIdentity)>,
}

impl Inner {
    fn enter(&mut self, state: CustodyState) {
        self.state = state;
        self.trail.push(state);
    }
}

/// Custody manager for one (owner, network) pair
pub struct AgentCustody {
    scope: StoreScope,
    vault: Address,
    store: Arc<dyn KeyValueStore>,
    escrow: Option<Arc<dyn EscrowService>>,
    escrow_timeout: Duration,
    inner: Mutex<Inner>,
    /// Serializes `initialize` so concurrent callers share one prompt
    initializing: Mutex<()>,
    escrow_sync: Mutex<()>,
}

impl AgentCustody {
    pub fn new(
        owner: Address,
        vault: Address,
        network: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            scope: StoreScope::new(owner, network),
            vault,
            store,
            escrow: None,
            escrow_timeout: Duration::from_secs(10),
            inner: Mutex::new(Inner::default()),
            initializing: Mutex::new(()),
            escrow_sync: Mutex::new(()),
        }
    }

    /// Attach an escrow backend
    pub fn with_escrow(mut self, escrow: Arc<dyn EscrowService>, timeout: Duration) -> Self {
        self.escrow = Some(escrow);
        self.escrow_timeout = timeout;
        self
    }

    pub fn owner(&self) -> &Address {
        self.scope.owner()
    }

    pub fn vault(&self) -> &Address {
        &self.vault
    }

    pub fn network(&self) -> &str {
        self.scope.network()
    }

    pub async fn state(&self) -> CustodyState {
        self.inner.lock().await.state
    }

    /// States passed through since construction or the last `clear`
    pub async fn state_trail(&self) -> Vec<CustodyState> {
        self.inner.lock().await.trail.clone()
    }

    /// Bring the agent online, prompting the owner only if needed
    ///
    /// Tries, in order: the local cache, the escrow backend (confirmed by
    /// re-deriving from a fresh signature), and first-time derivation.
    pub async fn initialize(&self, signer: &dyn OwnerSigner) -> Result<AgentIdentity, CustodyError> {
        let signer_owner = signer.owner_address();
        if &signer_owner != self.owner() {
            return Err(CustodyError::OwnerMismatch {
                expected: self.owner().clone(),
                actual: signer_owner,
            });
        }

        let _initializing = self.initializing.lock().await;
        let identity = {
            let mut inner = self.inner.lock().await;
            if let Some((_, identity)) = &inner.active {
                return Ok(identity.clone());
            }

            self.activate_from_cache(&mut inner)
        };

        if let Some(identity) = identity {
            // Cached identity: refresh the escrow copy, never fail the call.
            if let EscrowSync::Failed(error) = self.sync_escrow().await {
                warn!(owner = %self.owner(), %error, "re-escrow after cache load failed");
            }
            return Ok(identity);
        }

        let escrowed = self.fetch_escrow().await;
        if escrowed.is_some() {
            self.inner.lock().await.enter(CustodyState::FetchedFromEscrow);
        }

        let key = self.derive(signer).await?;
        let mut inner = self.inner.lock().await;
        if let Some((_, identity)) = &inner.active {
            return Ok(identity.clone());
        }

        match escrowed {
            Some(record) if key.address() == &record.agent_address => {
                inner.enter(CustodyState::Verified);
                info!(owner = %self.owner(), agent = %key.address(), "agent recovered from escrow");
                let identity = self.activate(&mut inner, key, Utc::now());
                self.persist_identity(&inner);
                Ok(identity)
            }
            Some(record) => {
                // The escrowed record is for another key; the fresh derivation
                // becomes the identity and replaces it.
                warn!(
                    owner = %self.owner(),
                    escrowed = %record.agent_address,
                    derived = %key.address(),
                    "escrowed agent does not match derived key, using derived key"
                );
                Ok(self.adopt_new_identity(inner, key).await)
            }
            None => {
                info!(owner = %self.owner(), agent = %key.address(), "agent derived");
                Ok(self.adopt_new_identity(inner, key).await)
            }
        }
    }

    async fn adopt_new_identity(
        &self,
        mut inner: MutexGuard<'_, Inner>,
        key: AgentKey,
    ) -> AgentIdentity {
        let identity = self.activate(&mut inner, key, Utc::now());
        self.persist_identity(&inner);
        drop(inner);

        if let EscrowSync::Failed(error) = self.sync_escrow().await {
            warn!(owner = %self.owner(), %error, "initial escrow failed");
        }
        identity
    }

    /// Make sure an identity is in memory, using only the local cache
    ///
    /// Returns false if the agent has never been set up on this device.
    pub async fn ensure_loaded(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.active.is_some() {
            return true;
        }
        self.activate_from_cache(&mut inner).is_some()
    }

    /// Agent address from memory or the local cache
    pub async fn agent_address(&self) -> Option<Address> {
        if let Some((key, _)) = &self.inner.lock().await.active {
            return Some(key.address().clone());
        }
        self.load_cached().map(|(key, _)| key.address().clone())
    }

    pub async fn identity(&self) -> Option<AgentIdentity> {
        self.inner
            .lock()
            .await
            .active
            .as_ref()
            .map(|(_, identity)| identity.clone())
    }

    /// Signing key for the pipeline; loads from cache if needed
    pub async fn agent_key(&self) -> Result<AgentKey, CustodyError> {
        let mut inner = self.inner.lock().await;
        if inner.active.is_none() {
            self.activate_from_cache(&mut inner);
        }
        inner
            .active
            .as_ref()
            .map(|(key, _)| key.clone())
            .ok_or(CustodyError::NotSetUp)
    }

    /// Forget the agent: memory, local record and escrow copy
    pub async fn clear(&self) -> Result<(), CustodyError> {
        {
            let mut inner = self.inner.lock().await;
            *inner = Inner::default();
        }
        self.store
            .remove(&self.scope.key(RecordKind::Identity))
            .map_err(CheckpointError::from)?;

        if let Some(escrow) = &self.escrow {
            let call = escrow.delete_agent_wallet(self.owner(), self.network());
            match tokio::time::timeout(self.escrow_timeout, call).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(owner = %self.owner(), error = %e, "escrow delete failed"),
                Err(_) => warn!(owner = %self.owner(), "escrow delete timed out"),
            }
        }
        info!(owner = %self.owner(), "agent cleared");
        Ok(())
    }

    /// Push the encrypted agent secret to the escrow backend
    ///
    /// Single-flight: a call made while another is running returns
    /// `AlreadyInProgress` immediately instead of queueing.
    pub async fn sync_escrow(&self) -> EscrowSync {
        let Ok(_guard) = self.escrow_sync.try_lock() else {
            debug!(owner = %self.owner(), "escrow sync already in progress");
            return EscrowSync::AlreadyInProgress;
        };
        let Some(escrow) = &self.escrow else {
            return EscrowSync::NoBackend;
        };

        let active = self.inner.lock().await.active.clone();
        let Some((key, identity)) = active else {
            return EscrowSync::Failed(CustodyError::NotSetUp.to_string());
        };

        let encrypted_key = match EscrowCipher::for_owner(self.owner()).seal(&key.secret_hex()) {
            Ok(sealed) => sealed,
            Err(e) => return EscrowSync::Failed(e.to_string()),
        };
        let record = EscrowRecord {
            owner_address: identity.owner_address,
            agent_address: identity.address,
            vault_address: identity.vault_address,
            encrypted_key,
            network: identity.network,
        };

        match tokio::time::timeout(self.escrow_timeout, escrow.put_agent_wallet(&record)).await {
            Ok(Ok(())) => {
                debug!(owner = %self.owner(), "agent escrowed");
                EscrowSync::Synced
            }
            Ok(Err(e)) => EscrowSync::Failed(e.to_string()),
            Err(_) => EscrowSync::Failed("escrow call timed out".to_string()),
        }
    }

    async fn fetch_escrow(&self) -> Option<EscrowRecord> {
        let escrow = self.escrow.as_ref()?;
        let call = escrow.get_agent_wallet(self.owner(), self.network());
        match tokio::time::timeout(self.escrow_timeout, call).await {
            Ok(Ok(record)) => record.filter(|r| r.owner_address == *self.owner()),
            Ok(Err(e)) => {
                warn!(owner = %self.owner(), error = %e, "escrow fetch failed");
                None
            }
            Err(_) => {
                warn!(owner = %self.owner(), "escrow fetch timed out");
                None
            }
        }
    }

    /// Ask the owner to sign and derive the agent key
    ///
    /// The identity lock is only taken to record state, never across the
    /// signature request.
    async fn derive(&self, signer: &dyn OwnerSigner) -> Result<AgentKey, CustodyError> {
        self.inner.lock().await.enter(CustodyState::SignatureRequested);
        let message = authorization_message(self.owner(), self.network());
        let derived = match signer.sign_message(&message).await {
            Ok(signature) => AgentKey::from_signature(&signature).map_err(CustodyError::from),
            Err(e) => Err(CustodyError::from(e)),
        };

        let mut inner = self.inner.lock().await;
        if inner.active.is_none() {
            match &derived {
                Ok(_) => inner.enter(CustodyState::Derived),
                Err(_) => inner.enter(CustodyState::Uninitialized),
            }
        }
        derived
    }

    fn activate(&self, inner: &mut Inner, key: AgentKey, created_at: DateTime<Utc>) -> AgentIdentity {
        let identity = AgentIdentity {
            owner_address: self.owner().clone(),
            vault_address: self.vault.clone(),
            address: key.address().clone(),
            network: self.network().to_string(),
            created_at,
            schema_version: SCHEMA_VERSION,
        };
        inner.active = Some((key, identity.clone()));
        inner.enter(CustodyState::Active);
        identity
    }

    fn activate_from_cache(&self, inner: &mut Inner) -> Option<AgentIdentity> {
        let (stored, key) = self.read_cached()?;
        inner.enter(CustodyState::Loaded);
        if !self.verify_cached(&stored, &key) {
            inner.enter(CustodyState::Uninitialized);
            return None;
        }
        inner.enter(CustodyState::Verified);
        Some(self.activate(inner, key, stored.created_at))
    }

    /// Load and verify the cached identity; anything suspicious is ignored
    fn load_cached(&self) -> Option<(AgentKey, DateTime<Utc>)> {
        let (stored, key) = self.read_cached()?;
        self.verify_cached(&stored, &key)
            .then_some((key, stored.created_at))
    }

    fn read_cached(&self) -> Option<(StoredIdentity, AgentKey)> {
        let key_name = self.scope.key(RecordKind::Identity);
        let stored: StoredIdentity = match load_record(self.store.as_ref(), &key_name) {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                warn!(owner = %self.owner(), error = %e, "identity cache unreadable");
                return None;
            }
        };

        match AgentKey::from_secret_hex(&stored.secret) {
            Ok(key) => Some((stored, key)),
            Err(e) => {
                warn!(owner = %self.owner(), error = %e, "cached agent secret is malformed");
                None
            }
        }
    }

    /// Owner, network and key/address agreement of a cached identity
    fn verify_cached(&self, stored: &StoredIdentity, key: &AgentKey) -> bool {
        if stored.owner_address != *self.owner() {
            warn!(owner = %self.owner(), cached = %stored.owner_address, "cached agent belongs to another owner");
            return false;
        }
        if !stored.network.is_empty() && stored.network != self.network() {
            warn!(owner = %self.owner(), cached = %stored.network, "cached agent belongs to another network");
            return false;
        }
        if key.address() != &stored.agent_address {
            warn!(owner = %self.owner(), "cached agent address does not match its key");
            return false;
        }
        true
    }

    fn persist_identity(&self, inner: &Inner) {
        let Some((key, identity)) = &inner.active else {
            return;
        };
        let stored = StoredIdentity {
            owner_address: identity.owner_address.clone(),
            vault_address: identity.vault_address.clone(),
            agent_address: identity.address.clone(),
            network: identity.network.clone(),
            secret: key.secret_hex(),
            created_at: identity.created_at,
        };
        let key_name = self.scope.key(RecordKind::Identity);
        if let Err(e) = save_record(self.store.as_ref(), &key_name, &stored) {
            warn!(owner = %self.owner(), error = %e, "failed to persist agent identity");
        }
    }
}
