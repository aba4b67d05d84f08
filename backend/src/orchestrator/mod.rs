//! Orchestrator - automation loop and persistence
//!
//! - **engine**: drives due schedules and savings deposits through the
//!   execution pipeline
//! - **checkpoint**: versioned, checksummed records in the key-value store

pub mod checkpoint;
pub mod engine;

pub use checkpoint::{load_record, save_record, CheckpointError, VersionedRecord, SCHEMA_VERSION};
pub use engine::{Orchestrator, OrchestratorError, RunReport, Shortfall, AWAITING_PLAN_ID};
