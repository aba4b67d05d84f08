//! Ledger service interface
//!
//! The ledger (chain RPC plus the token and savings contracts) is an external
//! collaborator. This module fixes the narrow surface the pipeline needs:
//! balance queries, signed submission, receipt waiting and the savings
//! contract's read methods.
//!
//! Implementations sign with the `AgentKey` they are handed; the key never
//! leaves the process.

use crate::custody::derivation::AgentKey;
use crate::models::address::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Substrings of submission errors that mean "the network already has this"
const ALREADY_SUBMITTED_MARKERS: [&str; 5] = [
    "already known",
    "known transaction",
    "duplicate",
    "nonce too low",
    "replacement transaction underpriced",
];

/// Error reported by a ledger implementation
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{message}")]
pub struct LedgerError {
    message: String,
}

impl LedgerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this submission failure means an earlier attempt was accepted
    pub fn is_already_submitted(&self) -> bool {
        is_already_submitted(&self.message)
    }
}

/// Match a raw submission error against the already-submitted conditions
///
/// # Example
/// ```
/// use sentinel_core_rs::ledger::is_already_submitted;
///
/// assert!(is_already_submitted("ALREADY KNOWN"));
/// assert!(is_already_submitted("err: nonce too low: next nonce 7"));
/// assert!(!is_already_submitted("execution reverted"));
/// ```
pub fn is_already_submitted(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    ALREADY_SUBMITTED_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Transaction hash as returned by the ledger
pub type TxHash = String;

/// Calls on the savings contract
#[derive(Debug, Clone, PartialEq)]
pub enum SavingsCall {
    CreatePlanWithDeposit {
        deposit_amount: u128,
        /// Seconds between deposits; zero for a one-off plan
        interval_secs: u64,
        lock_duration_secs: u64,
        total_deposits: u32,
    },
    DepositFromAgent {
        plan_id: u64,
        amount: u128,
        agent: Address,
    },
    Withdraw {
        plan_id: u64,
    },
    CancelPlan {
        plan_id: u64,
    },
}

impl SavingsCall {
    pub fn name(&self) -> &'static str {
        match self {
            SavingsCall::CreatePlanWithDeposit { .. } => "createPlanWithDeposit",
            SavingsCall::DepositFromAgent { .. } => "depositFromAgent",
            SavingsCall::Withdraw { .. } => "withdraw",
            SavingsCall::CancelPlan { .. } => "cancelPlan",
        }
    }
}

/// A state-changing request the agent signs and submits
#[derive(Debug, Clone, PartialEq)]
pub enum TxRequest {
    Transfer {
        token: Address,
        to: Address,
        amount: u128,
    },
    Approve {
        token: Address,
        spender: Address,
        amount: u128,
    },
    Savings {
        contract: Address,
        call: SavingsCall,
    },
}

/// Fee parameters for a submission
///
/// `gas_price: None` leaves fee selection to the ledger's fee market.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeeOptions {
    pub gas_price: Option<u128>,
}

/// Decoded contract log the pipeline cares about
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    PlanCreated { plan_id: u64, owner: Address },
    Deposited { plan_id: u64, amount: u128 },
    Withdrawn { plan_id: u64, amount: u128 },
    Other,
}

/// Result of a mined transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub success: bool,
    pub block_number: Option<u64>,
    pub logs: Vec<LedgerEvent>,
}

/// Savings plan as held by the contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainPlan {
    pub plan_id: u64,
    pub owner: Address,
    #[serde(with = "crate::models::amount")]
    pub deposit_amount: u128,
    #[serde(with = "crate::models::amount")]
    pub total_deposited: u128,
    pub deposits_made: u32,
    pub total_deposits: u32,
    /// Unix seconds
    pub unlock_time: i64,
    pub active: bool,
}

/// Chain access used by the execution pipeline
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn native_balance(&self, holder: &Address) -> Result<u128, LedgerError>;

    async fn token_balance(&self, token: &Address, holder: &Address) -> Result<u128, LedgerError>;

    async fn gas_price(&self) -> Result<u128, LedgerError>;

    /// Sign `request` with `signer` and broadcast it
    async fn submit(
        &self,
        signer: &AgentKey,
        request: &TxRequest,
        fees: &FeeOptions,
    ) -> Result<TxHash, LedgerError>;

    /// Wait until `tx_hash` is mined; may wait indefinitely
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<Receipt, LedgerError>;

    /// Plan ids owned by `owner`, oldest first
    async fn user_plans(&self, contract: &Address, owner: &Address)
        -> Result<Vec<u64>, LedgerError>;

    async fn plan(&self, contract: &Address, plan_id: u64) -> Result<OnChainPlan, LedgerError>;

    /// Seconds until the plan unlocks; zero once unlocked
    async fn time_until_unlock(&self, contract: &Address, plan_id: u64)
        -> Result<u64, LedgerError>;

    async fn is_unlocked(&self, contract: &Address, plan_id: u64) -> Result<bool, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_submitted_markers() {
        for message in [
            "already known",
            "Known transaction: 0xabc",
            "duplicate tx",
            "nonce too low",
            "replacement transaction underpriced",
        ] {
            assert!(LedgerError::new(message).is_already_submitted(), "{}", message);
        }
        assert!(!LedgerError::new("insufficient funds for gas").is_already_submitted());
    }
}
