//! Sentinel Core - agent wallet custody and payment automation
//!
//! An owner delegates day-to-day payments to an agent wallet whose key is
//! derived from one owner signature. The agent pays only trusted
//! destinations and runs recurring vendor payments and time-locked savings
//! plans on the owner's behalf.
//!
//! # Architecture
//!
//! - **core**: Occurrence timing and configuration
//! - **models**: Domain types (Address, Schedule, SavingsPlan, EventLog)
//! - **policy**: Trusted destination guard
//! - **custody**: Agent key derivation, local cache, escrow recovery
//! - **ledger**: Ledger abstraction (balances, submission, receipts)
//! - **settlement**: Transaction execution pipeline
//! - **scheduling**: Recurring schedule and savings plan engines
//! - **orchestrator**: Automation loop and versioned persistence
//! - **storage**: Key-value stores scoped by owner and network
//! - **remote**: Escrow and recurring-sync backend seams
//!
//! # Critical Invariants
//!
//! 1. All token and native amounts are u128 base units
//! 2. The agent never pays an address outside the destination guard
//! 3. The owner's signer is prompted only when no identity can be recovered
//! 4. Every scheduled occurrence lies strictly in the future when computed

pub mod core;
pub mod custody;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod remote;
pub mod scheduling;
pub mod settlement;
pub mod storage;

// Re-exports for convenience
pub use crate::core::config::SentinelConfig;
pub use crate::core::time::Frequency;
pub use custody::{AgentCustody, AgentIdentity, CustodyError, CustodyState, OwnerSigner};
pub use ledger::{Ledger, LedgerError};
pub use models::{
    address::{Address, AddressError},
    event::{EventLog, ExecutionEvent},
    savings_plan::{SavingsError, SavingsPlan},
    schedule::{Schedule, ScheduleError},
};
pub use orchestrator::{Orchestrator, OrchestratorError, RunReport};
pub use policy::destination::DestinationGuard;
pub use scheduling::{SavingsBook, ScheduleBook};
pub use settlement::{ExecutionPipeline, PipelineError, TxOutcome, TxResult, TxStatus};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
