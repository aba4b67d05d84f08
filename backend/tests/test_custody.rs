//! Tests for agent custody
//!
//! Covers the three initialization paths (cache, escrow, first run), the
//! owner-only escrow encryption and single-flight escrow sync.

mod common;

use common::*;
use sentinel_core_rs::custody::derivation::{authorization_message, AgentKey};
use sentinel_core_rs::custody::escrow::{EscrowCipher, EscrowCipherError};
use async_trait::async_trait;
use sentinel_core_rs::custody::{
    CustodyError, CustodyState, EscrowSync, OwnerSigner, SignerError,
};
use sentinel_core_rs::remote::EscrowRecord;
use sentinel_core_rs::storage::{KeyValueStore, MemoryStore, RecordKind, StoreScope};
use sentinel_core_rs::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Wallet that shows the prompt and never answers
struct StalledSigner {
    prompted: Notify,
}

#[async_trait]
impl OwnerSigner for StalledSigner {
    fn owner_address(&self) -> Address {
        addr(OWNER)
    }

    async fn sign_message(&self, _message: &str) -> Result<String, SignerError> {
        self.prompted.notify_one();
        std::future::pending().await
    }
}

#[test]
fn test_derivation_is_deterministic() {
    let signature = format!("0x{}", "cd".repeat(65));
    let a = AgentKey::from_signature(&signature).unwrap();
    let b = AgentKey::from_signature(&signature).unwrap();
    assert_eq!(a.address(), b.address());

    let other = AgentKey::from_signature(&format!("0x{}", "ce".repeat(65))).unwrap();
    assert_ne!(a.address(), other.address());
}

#[test]
fn test_authorization_message_binds_owner_and_network() {
    let owner = addr(OWNER);
    let sepolia = authorization_message(&owner, "sepolia");
    assert!(sepolia.contains(OWNER));
    assert_ne!(sepolia, authorization_message(&owner, "mainnet"));
}

#[tokio::test]
async fn test_first_run_derives_and_escrows() {
    let h = Harness::new();
    assert_eq!(h.custody.state().await, CustodyState::Uninitialized);
    assert!(!h.custody.ensure_loaded().await);

    let identity = h.custody.initialize(&h.signer).await.unwrap();

    assert_eq!(h.signer.prompts(), 1);
    assert_eq!(h.custody.state().await, CustodyState::Active);
    assert_eq!(identity.owner_address, addr(OWNER));
    assert_eq!(identity.vault_address, addr(VAULT));
    assert_eq!(identity.network, NETWORK);

    let record = h.escrow.record(OWNER).expect("escrowed");
    assert_eq!(record.agent_address, identity.address);
    assert_eq!(h.escrow.puts(), 1);
    assert_eq!(
        h.custody.state_trail().await,
        vec![
            CustodyState::SignatureRequested,
            CustodyState::Derived,
            CustodyState::Active
        ]
    );
}

#[tokio::test]
async fn test_reinitialize_from_cache_never_prompts() {
    let h = Harness::new();
    let first = h.custody.initialize(&h.signer).await.unwrap();

    // Fresh manager over the same store: a new session on the same device
    let custody = custody_for(h.store.clone(), h.escrow.clone());
    let signer = StaticSigner::new(OWNER);
    let second = custody.initialize(&signer).await.unwrap();

    assert_eq!(signer.prompts(), 0);
    assert_eq!(second.address, first.address);
    assert_eq!(second.created_at, first.created_at);
    assert_eq!(
        custody.state_trail().await,
        vec![CustodyState::Loaded, CustodyState::Verified, CustodyState::Active]
    );
}

#[tokio::test]
async fn test_initialize_is_idempotent_in_memory() {
    let h = Harness::new();
    h.activate().await;
    h.activate().await;
    assert_eq!(h.signer.prompts(), 1);
}

#[tokio::test]
async fn test_new_device_recovers_from_escrow() {
    let h = Harness::new();
    let original = h.custody.initialize(&h.signer).await.unwrap();

    let device = custody_for(Arc::new(MemoryStore::new()), h.escrow.clone());
    let signer = StaticSigner::new(OWNER);
    let recovered = device.initialize(&signer).await.unwrap();

    assert_eq!(signer.prompts(), 1);
    assert_eq!(recovered.address, original.address);
    assert_eq!(device.state().await, CustodyState::Active);
    assert_eq!(
        device.state_trail().await,
        vec![
            CustodyState::FetchedFromEscrow,
            CustodyState::SignatureRequested,
            CustodyState::Derived,
            CustodyState::Verified,
            CustodyState::Active
        ]
    );
}

#[tokio::test]
async fn test_escrow_mismatch_adopts_derived_key() {
    let h = Harness::new();
    h.escrow.insert(EscrowRecord {
        owner_address: addr(OWNER),
        agent_address: addr(STRANGER),
        vault_address: addr(VAULT),
        encrypted_key: "v1:stale".to_string(),
        network: NETWORK.to_string(),
    });

    let identity = h.custody.initialize(&h.signer).await.unwrap();

    assert_ne!(identity.address, addr(STRANGER));
    assert_eq!(h.escrow.record(OWNER).unwrap().agent_address, identity.address);
}

#[tokio::test]
async fn test_owner_mismatch_rejected_without_prompt() {
    let h = Harness::new();
    let intruder = StaticSigner::new(STRANGER);

    let err = h.custody.initialize(&intruder).await.unwrap_err();
    assert!(matches!(err, CustodyError::OwnerMismatch { .. }));
    assert_eq!(intruder.prompts(), 0);
}

#[tokio::test]
async fn test_rejected_signature_leaves_agent_unset() {
    let h = Harness::new();
    h.signer.reject_next();

    let err = h.custody.initialize(&h.signer).await.unwrap_err();
    assert!(matches!(err, CustodyError::Signer(_)));
    assert_eq!(h.custody.state().await, CustodyState::Uninitialized);
    assert!(h.custody.agent_address().await.is_none());
    assert!(matches!(h.custody.agent_key().await, Err(CustodyError::NotSetUp)));
}

#[tokio::test(start_paused = true)]
async fn test_open_signature_request_does_not_block_readers() {
    let h = Harness::new();
    let signer = Arc::new(StalledSigner {
        prompted: Notify::new(),
    });

    let custody = h.custody.clone();
    let wallet = signer.clone();
    let initializing = tokio::spawn(async move { custody.initialize(wallet.as_ref()).await });
    signer.prompted.notified().await;

    let loaded = tokio::time::timeout(Duration::from_secs(2), h.custody.ensure_loaded()).await;
    assert_eq!(loaded, Ok(false));
    let address = tokio::time::timeout(Duration::from_secs(2), h.custody.agent_address()).await;
    assert_eq!(address, Ok(None));
    assert_eq!(h.custody.state().await, CustodyState::SignatureRequested);

    initializing.abort();
}

#[tokio::test]
async fn test_escrow_outage_does_not_fail_initialize() {
    let h = Harness::new();
    h.escrow.set_failing(true);

    let identity = h.custody.initialize(&h.signer).await.unwrap();
    assert_eq!(h.custody.agent_address().await, Some(identity.address));
    assert!(h.escrow.record(OWNER).is_none());
}

#[tokio::test]
async fn test_escrow_payload_opens_only_for_owner() {
    let h = Harness::new();
    let identity = h.custody.initialize(&h.signer).await.unwrap();
    let sealed = h.escrow.record(OWNER).unwrap().encrypted_key;

    let secret = EscrowCipher::for_owner(&addr(OWNER)).open(&sealed).unwrap();
    assert_eq!(AgentKey::from_secret_hex(&secret).unwrap().address(), &identity.address);

    assert_eq!(
        EscrowCipher::for_owner(&addr(STRANGER)).open(&sealed),
        Err(EscrowCipherError::Decryption)
    );
}

#[tokio::test]
async fn test_concurrent_escrow_sync_is_single_flight() {
    let h = Harness::new();
    h.activate().await;
    h.escrow.hold_puts();

    let custody = h.custody.clone();
    let first = tokio::spawn(async move { custody.sync_escrow().await });
    h.escrow.put_started().await;

    assert_eq!(h.custody.sync_escrow().await, EscrowSync::AlreadyInProgress);

    h.escrow.release();
    assert_eq!(first.await.unwrap(), EscrowSync::Synced);
}

#[tokio::test]
async fn test_sync_without_backend() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let custody = sentinel_core_rs::AgentCustody::new(addr(OWNER), addr(VAULT), NETWORK, store);
    let signer = StaticSigner::new(OWNER);
    custody.initialize(&signer).await.unwrap();
    assert_eq!(custody.sync_escrow().await, EscrowSync::NoBackend);
}

#[tokio::test]
async fn test_clear_forgets_everywhere() {
    let h = Harness::new();
    h.activate().await;

    h.custody.clear().await.unwrap();

    assert!(h.custody.agent_address().await.is_none());
    assert_eq!(h.custody.state().await, CustodyState::Uninitialized);
    assert!(h.escrow.record(OWNER).is_none());
    let scope = StoreScope::new(addr(OWNER), NETWORK);
    assert!(h.store.get(&scope.key(RecordKind::Identity)).unwrap().is_none());
}

#[tokio::test]
async fn test_tampered_cache_is_ignored() {
    let h = Harness::new();
    h.activate().await;

    let scope = StoreScope::new(addr(OWNER), NETWORK);
    let key = scope.key(RecordKind::Identity);
    let raw = h.store.get(&key).unwrap().unwrap();
    h.store
        .put(&key, &raw.replace(&OWNER[2..], "4444444444444444444444444444444444444444"))
        .unwrap();

    let custody = custody_for(h.store.clone(), h.escrow.clone());
    assert!(!custody.ensure_loaded().await);
}
