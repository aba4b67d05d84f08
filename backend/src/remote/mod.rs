//! Remote backend interfaces
//!
//! The backend is optional and never authoritative. It stores an encrypted
//! escrow copy of the agent secret and mirrors schedules and savings plans
//! for audit and cross-device sync. Every call site treats its errors as
//! non-fatal: log and carry on.

use crate::models::address::Address;
use crate::models::savings_plan::SavingsPlan;
use crate::models::schedule::Schedule;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a backend
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend rejected request: {0}")]
    Rejected(String),

    #[error("Backend call timed out")]
    Timeout,
}

/// Escrowed agent wallet as exchanged with the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowRecord {
    pub owner_address: Address,
    pub agent_address: Address,
    pub vault_address: Address,
    /// `custody::escrow::EscrowCipher` payload
    pub encrypted_key: String,
    pub network: String,
}

/// Escrow storage for the agent secret
#[async_trait]
pub trait EscrowService: Send + Sync {
    async fn put_agent_wallet(&self, record: &EscrowRecord) -> Result<(), BackendError>;

    async fn get_agent_wallet(
        &self,
        owner: &Address,
        network: &str,
    ) -> Result<Option<EscrowRecord>, BackendError>;

    async fn delete_agent_wallet(&self, owner: &Address, network: &str)
        -> Result<(), BackendError>;
}

/// Everything the backend mirrors for one owner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringSnapshot {
    #[serde(default)]
    pub schedules: Vec<Schedule>,
    #[serde(default)]
    pub savings_plans: Vec<SavingsPlan>,
}

/// Audit and sync sink for schedules and savings plans
#[async_trait]
pub trait RecurringBackend: Send + Sync {
    async fn upsert_schedule(&self, owner: &Address, schedule: &Schedule)
        -> Result<(), BackendError>;

    async fn upsert_savings_plan(
        &self,
        owner: &Address,
        plan: &SavingsPlan,
    ) -> Result<(), BackendError>;

    /// Push the full local state in one call
    async fn sync(&self, owner: &Address, snapshot: &RecurringSnapshot)
        -> Result<(), BackendError>;

    /// Pull whatever the backend holds for `owner`
    async fn fetch(&self, owner: &Address) -> Result<RecurringSnapshot, BackendError>;
}
