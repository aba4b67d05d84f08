//! Domain models for the agent wallet

pub mod address;
pub mod amount;
pub mod event;
pub mod savings_plan;
pub mod schedule;

// Re-exports
pub use address::{Address, AddressError};
pub use event::{EventLog, ExecutionEvent};
pub use savings_plan::{total_deposits_for, SavingsError, SavingsPlan, SavingsPlanDraft};
pub use schedule::{Schedule, ScheduleDraft, ScheduleError, SchedulePatch};
