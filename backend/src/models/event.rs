//! Execution history for auditing automation runs.
//!
//! Every automated action the orchestrator takes (or fails to take) is
//! recorded as an `ExecutionEvent`. The log is persisted with the rest of the
//! owner's state and pruned after the configured retention period.
//!
//! # Event Types
//!
//! - **Schedule**: payment executed, failed, or schedule disabled
//! - **Savings**: deposit made or failed, plan disabled, withdrawn, cancelled
//! - **Balance**: projected shortfall for upcoming payments
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use sentinel_core_rs::models::event::{EventLog, ExecutionEvent};
//!
//! let mut log = EventLog::new();
//! log.log(ExecutionEvent::ScheduleFailed {
//!     at: Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap(),
//!     schedule_id: "sched_1".to_string(),
//!     error: "Insufficient token balance: have 5, need 15".to_string(),
//! });
//!
//! assert_eq!(log.events_for("sched_1").len(), 1);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Automation event capturing one action and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    /// Scheduled payment submitted successfully
    ScheduleExecuted {
        at: DateTime<Utc>,
        schedule_id: String,
        tx_id: String,
        vendor_name: String,
        #[serde(with = "crate::models::amount")]
        amount: u128,
        /// True when the ledger has not confirmed yet (pending or unconfirmed)
        pending: bool,
    },

    /// Scheduled payment attempt failed
    ScheduleFailed {
        at: DateTime<Utc>,
        schedule_id: String,
        error: String,
    },

    /// Schedule disabled after too many consecutive failures
    ScheduleDisabled {
        at: DateTime<Utc>,
        schedule_id: String,
        failed_count: u32,
    },

    /// Savings deposit submitted successfully
    DepositMade {
        at: DateTime<Utc>,
        plan_id: String,
        tx_id: String,
        #[serde(with = "crate::models::amount")]
        amount: u128,
    },

    /// Savings deposit attempt failed
    DepositFailed {
        at: DateTime<Utc>,
        plan_id: String,
        error: String,
    },

    /// Savings plan disabled after too many consecutive failures
    PlanDisabled {
        at: DateTime<Utc>,
        plan_id: String,
        failed_count: u32,
    },

    /// Savings plan withdrawn after unlock
    PlanWithdrawn {
        at: DateTime<Utc>,
        plan_id: String,
        tx_id: String,
    },

    /// Savings plan cancelled early
    PlanCancelled {
        at: DateTime<Utc>,
        plan_id: String,
        tx_id: String,
    },

    /// Upcoming payments exceed the agent's token balance
    LowBalance {
        at: DateTime<Utc>,
        #[serde(with = "crate::models::amount")]
        required: u128,
        #[serde(with = "crate::models::amount")]
        available: u128,
    },
}

impl ExecutionEvent {
    /// When the event happened
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            ExecutionEvent::ScheduleExecuted { at, .. }
            | ExecutionEvent::ScheduleFailed { at, .. }
            | ExecutionEvent::ScheduleDisabled { at, .. }
            | ExecutionEvent::DepositMade { at, .. }
            | ExecutionEvent::DepositFailed { at, .. }
            | ExecutionEvent::PlanDisabled { at, .. }
            | ExecutionEvent::PlanWithdrawn { at, .. }
            | ExecutionEvent::PlanCancelled { at, .. }
            | ExecutionEvent::LowBalance { at, .. } => *at,
        }
    }

    /// Get a short description of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            ExecutionEvent::ScheduleExecuted { .. } => "ScheduleExecuted",
            ExecutionEvent::ScheduleFailed { .. } => "ScheduleFailed",
            ExecutionEvent::ScheduleDisabled { .. } => "ScheduleDisabled",
            ExecutionEvent::DepositMade { .. } => "DepositMade",
            ExecutionEvent::DepositFailed { .. } => "DepositFailed",
            ExecutionEvent::PlanDisabled { .. } => "PlanDisabled",
            ExecutionEvent::PlanWithdrawn { .. } => "PlanWithdrawn",
            ExecutionEvent::PlanCancelled { .. } => "PlanCancelled",
            ExecutionEvent::LowBalance { .. } => "LowBalance",
        }
    }

    /// Get transaction ID if the event produced a transaction
    pub fn tx_id(&self) -> Option<&str> {
        match self {
            ExecutionEvent::ScheduleExecuted { tx_id, .. }
            | ExecutionEvent::DepositMade { tx_id, .. }
            | ExecutionEvent::PlanWithdrawn { tx_id, .. }
            | ExecutionEvent::PlanCancelled { tx_id, .. } => Some(tx_id),
            _ => None,
        }
    }

    /// Schedule or savings plan the event belongs to
    pub fn subject_id(&self) -> Option<&str> {
        match self {
            ExecutionEvent::ScheduleExecuted { schedule_id, .. }
            | ExecutionEvent::ScheduleFailed { schedule_id, .. }
            | ExecutionEvent::ScheduleDisabled { schedule_id, .. } => Some(schedule_id),
            ExecutionEvent::DepositMade { plan_id, .. }
            | ExecutionEvent::DepositFailed { plan_id, .. }
            | ExecutionEvent::PlanDisabled { plan_id, .. }
            | ExecutionEvent::PlanWithdrawn { plan_id, .. }
            | ExecutionEvent::PlanCancelled { plan_id, .. } => Some(plan_id),
            ExecutionEvent::LowBalance { .. } => None,
        }
    }
}

/// Event log for storing and querying execution events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<ExecutionEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Add an event to the log
    pub fn log(&mut self, event: ExecutionEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[ExecutionEvent] {
        &self.events
    }

    /// Get events of a specific type
    pub fn events_of_type(&self, event_type: &str) -> Vec<&ExecutionEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Get events for a specific transaction
    pub fn events_for_tx(&self, tx_id: &str) -> Vec<&ExecutionEvent> {
        self.events
            .iter()
            .filter(|e| e.tx_id() == Some(tx_id))
            .collect()
    }

    /// Get events for a specific schedule or savings plan
    pub fn events_for(&self, subject_id: &str) -> Vec<&ExecutionEvent> {
        self.events
            .iter()
            .filter(|e| e.subject_id() == Some(subject_id))
            .collect()
    }

    /// Drop events older than `cutoff`; returns how many were removed
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.events.len();
        self.events.retain(|e| e.at() >= cutoff);
        before - self.events.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
