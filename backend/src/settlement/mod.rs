//! Settlement Module
//!
//! Executes agent transactions against the ledger:
//! - Preflight (destination, gas, identity, token balance)
//! - Fee selection per network class
//! - Serialized submission with bounded confirmation
//! - Savings contract flows (approve then create/deposit, withdraw, cancel)
//!
//! # Critical Invariants
//!
//! 1. **Allow-list**: Transfers and approvals only reach trusted destinations
//! 2. **No false failures**: Duplicate submissions and confirmation timeouts
//!    are reported as success with a `Pending`/`Unconfirmed` status

pub mod outcome;
pub mod pipeline;
pub mod preflight;

// Re-export public API
pub use outcome::{ErrorKind, PipelineError, TxOutcome, TxResult, TxStatus, PENDING_TX_ID};
pub use pipeline::{deposit_interval_secs, Balances, ExecutionPipeline, SavingsPlanRequest};
pub use preflight::GasStatus;
