//! Recurring payment schedule model
//!
//! A schedule pays a fixed amount to one vendor at a fixed time of day on a
//! daily, weekly, monthly or yearly cadence. Lifecycle:
//!
//! ```text
//! Active <-> Paused
//! Active --(failure_threshold consecutive failures)--> Disabled
//! ```
//!
//! Paused and Disabled are both `is_active == false`; `resume` brings either
//! back. Schedules live until explicitly deleted.
//!
//! CRITICAL: `amount` is u128 token base units and is always positive.

use crate::core::time::{next_occurrence, Frequency};
use crate::models::address::Address;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by schedule operations
#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("Schedule not found: {0}")]
    NotFound(String),

    #[error("Schedule amount must be positive")]
    InvalidAmount,

    #[error("Vendor name must not be empty")]
    MissingVendorName,
}

/// User input for a new schedule
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleDraft {
    pub vendor_name: String,
    pub vendor_address: Address,
    pub amount: u128,
    pub frequency: Frequency,
    pub execution_time: NaiveTime,
    /// Day the cadence is aligned to (weekday, day-of-month, date); defaults to now
    pub anchor_date: Option<DateTime<Utc>>,
}

/// Partial update of an existing schedule; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulePatch {
    pub vendor_name: Option<String>,
    pub vendor_address: Option<Address>,
    pub amount: Option<u128>,
    pub frequency: Option<Frequency>,
    pub execution_time: Option<NaiveTime>,
    pub anchor_date: Option<DateTime<Utc>>,
}

impl SchedulePatch {
    /// Whether the patch changes when the schedule fires
    fn affects_timing(&self) -> bool {
        self.frequency.is_some() || self.execution_time.is_some() || self.anchor_date.is_some()
    }
}

/// A recurring payment to one vendor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    /// Unique identifier, `sched_<uuid>`
    id: String,

    vendor_name: String,
    vendor_address: Address,

    #[serde(with = "crate::models::amount")]
    amount: u128,

    frequency: Frequency,

    /// Time of day (UTC) the payment fires
    execution_time: NaiveTime,

    /// Alignment reference for weekly/monthly/yearly cadence
    anchor_date: DateTime<Utc>,

    next_occurrence: DateTime<Utc>,

    #[serde(default = "default_true")]
    is_active: bool,

    #[serde(default)]
    execution_count: u32,

    /// Consecutive failures since the last success or resume
    #[serde(default)]
    failed_count: u32,

    #[serde(default)]
    last_executed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    last_error: Option<String>,

    #[serde(default)]
    last_tx_id: Option<String>,

    created_at: DateTime<Utc>,

    updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Schedule {
    /// Create a schedule from user input
    ///
    /// # Example
    /// ```
    /// use chrono::{NaiveTime, TimeZone, Utc};
    /// use sentinel_core_rs::core::time::Frequency;
    /// use sentinel_core_rs::models::schedule::{Schedule, ScheduleDraft};
    /// use sentinel_core_rs::Address;
    ///
    /// let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
    /// let schedule = Schedule::new(
    ///     ScheduleDraft {
    ///         vendor_name: "Hosting".to_string(),
    ///         vendor_address: Address::parse("0x2222222222222222222222222222222222222222").unwrap(),
    ///         amount: 15,
    ///         frequency: Frequency::Daily,
    ///         execution_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
    ///         anchor_date: None,
    ///     },
    ///     now,
    /// )
    /// .unwrap();
    ///
    /// assert!(schedule.id().starts_with("sched_"));
    /// assert!(schedule.next_occurrence() > now);
    /// ```
    pub fn new(draft: ScheduleDraft, now: DateTime<Utc>) -> Result<Self, ScheduleError> {
        if draft.amount == 0 {
            return Err(ScheduleError::InvalidAmount);
        }
        if draft.vendor_name.trim().is_empty() {
            return Err(ScheduleError::MissingVendorName);
        }

        let anchor_date = draft.anchor_date.unwrap_or(now);
        let next = next_occurrence(
            draft.frequency,
            Some(anchor_date),
            draft.execution_time,
            now,
        );

        Ok(Self {
            id: format!("sched_{}", Uuid::new_v4().simple()),
            vendor_name: draft.vendor_name.trim().to_string(),
            vendor_address: draft.vendor_address,
            amount: draft.amount,
            frequency: draft.frequency,
            execution_time: draft.execution_time,
            anchor_date,
            next_occurrence: next,
            is_active: true,
            execution_count: 0,
            failed_count: 0,
            last_executed_at: None,
            last_error: None,
            last_tx_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    // Getters

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn vendor_name(&self) -> &str {
        &self.vendor_name
    }

    pub fn vendor_address(&self) -> &Address {
        &self.vendor_address
    }

    pub fn amount(&self) -> u128 {
        self.amount
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn execution_time(&self) -> NaiveTime {
        self.execution_time
    }

    pub fn anchor_date(&self) -> DateTime<Utc> {
        self.anchor_date
    }

    pub fn next_occurrence(&self) -> DateTime<Utc> {
        self.next_occurrence
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn execution_count(&self) -> u32 {
        self.execution_count
    }

    pub fn failed_count(&self) -> u32 {
        self.failed_count
    }

    pub fn last_executed_at(&self) -> Option<DateTime<Utc>> {
        self.last_executed_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_tx_id(&self) -> Option<&str> {
        self.last_tx_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Active and due at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_occurrence <= now
    }

    // State transitions

    /// Apply a partial update
    ///
    /// Changing frequency, time of day or anchor recomputes the next
    /// occurrence from `now`.
    pub fn apply_patch(
        &mut self,
        patch: SchedulePatch,
        now: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        if patch.amount == Some(0) {
            return Err(ScheduleError::InvalidAmount);
        }
        if patch
            .vendor_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(ScheduleError::MissingVendorName);
        }

        let retime = patch.affects_timing();
        if let Some(name) = patch.vendor_name {
            self.vendor_name = name.trim().to_string();
        }
        if let Some(address) = patch.vendor_address {
            self.vendor_address = address;
        }
        if let Some(amount) = patch.amount {
            self.amount = amount;
        }
        if let Some(frequency) = patch.frequency {
            self.frequency = frequency;
        }
        if let Some(time) = patch.execution_time {
            self.execution_time = time;
        }
        if let Some(anchor) = patch.anchor_date {
            self.anchor_date = anchor;
        }
        if retime {
            self.next_occurrence = next_occurrence(
                self.frequency,
                Some(self.anchor_date),
                self.execution_time,
                now,
            );
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn pause(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.updated_at = now;
    }

    /// Re-activate, clearing failures and skipping missed occurrences
    pub fn resume(&mut self, now: DateTime<Utc>) {
        self.is_active = true;
        self.failed_count = 0;
        self.last_error = None;
        self.next_occurrence = next_occurrence(
            self.frequency,
            Some(self.anchor_date),
            self.execution_time,
            now,
        );
        self.updated_at = now;
    }

    /// Record a successful payment
    ///
    /// The next occurrence is computed from the previous one, not from
    /// `executed_at`, so a late run does not shift the cadence.
    pub fn mark_executed(&mut self, tx_id: &str, executed_at: DateTime<Utc>) {
        self.execution_count += 1;
        self.failed_count = 0;
        self.last_error = None;
        self.last_executed_at = Some(executed_at);
        self.last_tx_id = Some(tx_id.to_string());
        self.next_occurrence = next_occurrence(
            self.frequency,
            Some(self.anchor_date),
            self.execution_time,
            self.next_occurrence,
        );
        self.updated_at = executed_at;
    }

    /// Record a failed attempt; returns true if this failure disabled the schedule
    pub fn mark_failed(&mut self, error: &str, threshold: u32, now: DateTime<Utc>) -> bool {
        self.failed_count += 1;
        self.last_error = Some(error.to_string());
        self.updated_at = now;

        if self.is_active && self.failed_count >= threshold {
            self.is_active = false;
            return true;
        }
        false
    }
}
