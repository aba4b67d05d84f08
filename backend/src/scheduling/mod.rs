//! Scheduling engines
//!
//! - **recurring**: vendor payment schedules
//! - **savings**: time-locked savings plans
//!
//! Both are pure in-memory state machines driven by an explicit `now`.
//! Neither talks to the ledger; the orchestrator carries intents to the
//! execution pipeline and reports outcomes back.

pub mod recurring;
pub mod savings;

pub use recurring::{FailureOutcome, ScheduleBook, DEFAULT_FAILURE_THRESHOLD};
pub use savings::SavingsBook;
