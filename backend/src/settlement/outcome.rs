//! Pipeline outcomes and errors
//!
//! Operations return `Result<TxOutcome, PipelineError>`. Callers that need the
//! flat `{success, txId, error, needsGas, ...}` shape (UI bridges, the
//! backend audit trail) convert with `TxResult::from`.

use crate::core::config::format_units;
use crate::custody::CustodyError;
use crate::ledger::LedgerError;
use crate::policy::destination::UNTRUSTED_DESTINATION_REASON;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transaction id reported when the network already had the transaction
pub const PENDING_TX_ID: &str = "pending";

/// Fallback message for ledger errors without detail
pub const GENERIC_FAILURE: &str = "operation failed";

/// How far a submitted transaction got
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Mined successfully
    Confirmed,
    /// Already known to the network from an earlier attempt
    Pending,
    /// Submitted, but confirmation did not arrive before the timeout
    Unconfirmed,
}

/// Successful pipeline result
#[derive(Debug, Clone, PartialEq)]
pub struct TxOutcome {
    pub tx_id: String,
    pub status: TxStatus,
    /// Set when the agent's gas balance is below the recommended level
    pub gas_warning: Option<String>,
    /// On-chain plan id (plan creation only)
    pub plan_id: Option<u64>,
}

impl TxOutcome {
    pub fn is_confirmed(&self) -> bool {
        self.status == TxStatus::Confirmed
    }
}

/// Coarse error class, used to decide how a failure is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Agent missing or misconfigured: fatal, shown verbatim
    Setup,
    /// Recoverable by the user: fund the agent, pick a trusted destination, wait
    Validation,
    /// Unexpected ledger failure
    Ledger,
}

fn units(amount: &u128, decimals: &u8) -> String {
    format_units(*amount, *decimals)
}

/// Errors returned by pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{}", UNTRUSTED_DESTINATION_REASON)]
    UntrustedDestination { address: String },

    #[error("Agent wallet needs gas: balance {balance} wei is below the minimum {required} wei")]
    NeedsGas { balance: u128, required: u128 },

    #[error("Agent wallet not set up")]
    NotSetUp,

    #[error(
        "Insufficient token balance: have {}, need {}",
        units(.held, .decimals),
        units(.required, .decimals)
    )]
    InsufficientBalance {
        held: u128,
        required: u128,
        decimals: u8,
    },

    #[error("Savings plan is still locked: {days_remaining} day(s) remaining")]
    StillLocked { days_remaining: u64 },

    #[error("No savings contract configured for this network")]
    SavingsContractNotConfigured,

    #[error("Transaction reverted: {tx_id}")]
    Reverted { tx_id: String },

    #[error("{0}")]
    Ledger(String),

    #[error(transparent)]
    Custody(CustodyError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NotSetUp
            | PipelineError::SavingsContractNotConfigured
            | PipelineError::Custody(_) => ErrorKind::Setup,
            PipelineError::UntrustedDestination { .. }
            | PipelineError::NeedsGas { .. }
            | PipelineError::InsufficientBalance { .. }
            | PipelineError::StillLocked { .. } => ErrorKind::Validation,
            PipelineError::Reverted { .. } | PipelineError::Ledger(_) => ErrorKind::Ledger,
        }
    }

    pub fn needs_gas(&self) -> bool {
        matches!(self, PipelineError::NeedsGas { .. })
    }
}

impl From<LedgerError> for PipelineError {
    fn from(error: LedgerError) -> Self {
        let message = error.message().trim();
        if message.is_empty() {
            PipelineError::Ledger(GENERIC_FAILURE.to_string())
        } else {
            PipelineError::Ledger(message.to_string())
        }
    }
}

impl From<CustodyError> for PipelineError {
    fn from(error: CustodyError) -> Self {
        match error {
            CustodyError::NotSetUp => PipelineError::NotSetUp,
            other => PipelineError::Custody(other),
        }
    }
}

/// Flat result shape exchanged with callers outside the crate
///
/// # Example
/// ```
/// use sentinel_core_rs::settlement::{PipelineError, TxResult};
///
/// let result = TxResult::from(Err(PipelineError::NeedsGas { balance: 0, required: 1 }));
/// assert!(!result.success);
/// assert!(result.needs_gas);
///
/// let json = serde_json::to_value(&result).unwrap();
/// assert_eq!(json["needsGas"], true);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TxStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub needs_gas: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<u64>,
}

impl From<Result<TxOutcome, PipelineError>> for TxResult {
    fn from(result: Result<TxOutcome, PipelineError>) -> Self {
        match result {
            Ok(outcome) => TxResult {
                success: true,
                tx_id: Some(outcome.tx_id),
                status: Some(outcome.status),
                gas_warning: outcome.gas_warning,
                plan_id: outcome.plan_id,
                ..TxResult::default()
            },
            Err(error) => TxResult {
                success: false,
                needs_gas: error.needs_gas(),
                days_remaining: match &error {
                    PipelineError::StillLocked { days_remaining } => Some(*days_remaining),
                    _ => None,
                },
                error: Some(error.to_string()),
                ..TxResult::default()
            },
        }
    }
}
