//! Time-locked savings plan model
//!
//! A savings plan moves `deposit_amount` from the agent into the savings
//! contract, once (non-recurring) or on a cadence until `total_deposits`
//! deposits have been made. Funds stay locked until `unlock_date`.
//!
//! ```text
//! Active --(all deposits made, non-recurring)--> Inactive
//! Active/Inactive --(withdraw at/after unlock)--> Withdrawn
//! Active/Inactive --(cancel)--> Withdrawn + Cancelled
//! ```
//!
//! CRITICAL: All amounts are u128 token base units.
//! CRITICAL: `target_amount == deposit_amount * total_deposits` at creation.

use crate::core::time::{days_until, next_occurrence, Frequency};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by savings plan operations
#[derive(Debug, Error, PartialEq)]
pub enum SavingsError {
    #[error("Savings plan not found: {0}")]
    NotFound(String),

    #[error("Deposit amount must be positive")]
    InvalidAmount,

    #[error("Lock duration must be at least one day")]
    InvalidLockDuration,

    #[error("Savings plan is still locked for {days_remaining} more day(s)")]
    StillLocked { days_remaining: u64 },

    #[error("Savings plan {0} is already withdrawn or cancelled")]
    AlreadyClosed(String),

    #[error("Savings plan {0} has already received all deposits")]
    AlreadyComplete(String),
}

/// Number of deposits a plan makes over its lock period
///
/// Never less than one.
///
/// # Example
/// ```
/// use sentinel_core_rs::core::time::Frequency;
/// use sentinel_core_rs::models::savings_plan::total_deposits_for;
///
/// assert_eq!(total_deposits_for(Some(Frequency::Daily), 30), 30);
/// assert_eq!(total_deposits_for(Some(Frequency::Weekly), 30), 5);
/// assert_eq!(total_deposits_for(Some(Frequency::Monthly), 90), 3);
/// assert_eq!(total_deposits_for(Some(Frequency::Yearly), 30), 1);
/// assert_eq!(total_deposits_for(None, 365), 1);
/// ```
pub fn total_deposits_for(frequency: Option<Frequency>, lock_duration_days: u32) -> u32 {
    let deposits = match frequency {
        None => 1,
        Some(Frequency::Daily) => lock_duration_days,
        Some(Frequency::Weekly) => lock_duration_days.div_ceil(7),
        Some(Frequency::Monthly) => lock_duration_days.div_ceil(30),
        Some(Frequency::Yearly) => lock_duration_days.div_ceil(365),
    };
    deposits.max(1)
}

/// User input for a new savings plan
#[derive(Debug, Clone, PartialEq)]
pub struct SavingsPlanDraft {
    pub name: String,
    pub deposit_amount: u128,
    /// `None` makes a one-off deposit
    pub frequency: Option<Frequency>,
    pub lock_duration_days: u32,
    pub execution_time: NaiveTime,
}

/// A savings commitment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsPlan {
    /// Unique identifier, `plan_<uuid>`
    id: String,

    name: String,

    #[serde(with = "crate::models::amount")]
    deposit_amount: u128,

    #[serde(default)]
    frequency: Option<Frequency>,

    lock_duration_days: u32,

    execution_time: NaiveTime,

    created_at: DateTime<Utc>,

    unlock_date: DateTime<Utc>,

    is_recurring: bool,

    total_deposits: u32,

    #[serde(default)]
    deposits_completed: u32,

    #[serde(default, with = "crate::models::amount")]
    total_saved: u128,

    #[serde(with = "crate::models::amount")]
    target_amount: u128,

    #[serde(default)]
    next_deposit: Option<DateTime<Utc>>,

    #[serde(default)]
    last_deposit_at: Option<DateTime<Utc>>,

    #[serde(default = "default_true")]
    is_active: bool,

    #[serde(default)]
    withdrawn: bool,

    #[serde(default)]
    cancelled: bool,

    /// Identifier assigned by the savings contract
    #[serde(default)]
    on_chain_plan_id: Option<u64>,

    #[serde(default)]
    failed_count: u32,

    #[serde(default)]
    last_error: Option<String>,

    updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl SavingsPlan {
    /// Create a plan; the first deposit is due immediately
    pub fn new(draft: SavingsPlanDraft, now: DateTime<Utc>) -> Result<Self, SavingsError> {
        if draft.deposit_amount == 0 {
            return Err(SavingsError::InvalidAmount);
        }
        if draft.lock_duration_days == 0 {
            return Err(SavingsError::InvalidLockDuration);
        }

        let total_deposits = total_deposits_for(draft.frequency, draft.lock_duration_days);
        let target_amount = draft
            .deposit_amount
            .saturating_mul(u128::from(total_deposits));

        Ok(Self {
            id: format!("plan_{}", Uuid::new_v4().simple()),
            name: draft.name.trim().to_string(),
            deposit_amount: draft.deposit_amount,
            frequency: draft.frequency,
            lock_duration_days: draft.lock_duration_days,
            execution_time: draft.execution_time,
            created_at: now,
            unlock_date: now + Duration::days(i64::from(draft.lock_duration_days)),
            is_recurring: draft.frequency.is_some(),
            total_deposits,
            deposits_completed: 0,
            total_saved: 0,
            target_amount,
            next_deposit: Some(now),
            last_deposit_at: None,
            is_active: true,
            withdrawn: false,
            cancelled: false,
            on_chain_plan_id: None,
            failed_count: 0,
            last_error: None,
            updated_at: now,
        })
    }

    // Getters

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn deposit_amount(&self) -> u128 {
        self.deposit_amount
    }

    pub fn frequency(&self) -> Option<Frequency> {
        self.frequency
    }

    pub fn lock_duration_days(&self) -> u32 {
        self.lock_duration_days
    }

    pub fn execution_time(&self) -> NaiveTime {
        self.execution_time
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn unlock_date(&self) -> DateTime<Utc> {
        self.unlock_date
    }

    pub fn is_recurring(&self) -> bool {
        self.is_recurring
    }

    pub fn total_deposits(&self) -> u32 {
        self.total_deposits
    }

    pub fn deposits_completed(&self) -> u32 {
        self.deposits_completed
    }

    pub fn total_saved(&self) -> u128 {
        self.total_saved
    }

    pub fn target_amount(&self) -> u128 {
        self.target_amount
    }

    pub fn next_deposit(&self) -> Option<DateTime<Utc>> {
        self.next_deposit
    }

    pub fn last_deposit_at(&self) -> Option<DateTime<Utc>> {
        self.last_deposit_at
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn is_withdrawn(&self) -> bool {
        self.withdrawn
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn on_chain_plan_id(&self) -> Option<u64> {
        self.on_chain_plan_id
    }

    pub fn failed_count(&self) -> u32 {
        self.failed_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Deposits still to be made
    pub fn remaining_deposits(&self) -> u32 {
        self.total_deposits.saturating_sub(self.deposits_completed)
    }

    /// Active, open and with a deposit due at or before `now`
    pub fn is_deposit_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.withdrawn && self.next_deposit.is_some_and(|due| due <= now)
    }

    // State transitions

    /// Record a confirmed deposit
    ///
    /// Recurring plans with deposits left get a new `next_deposit` computed
    /// from the previous due date. Otherwise `next_deposit` is cleared, and
    /// non-recurring plans go inactive.
    pub fn record_deposit(&mut self, amount: u128, now: DateTime<Utc>) -> Result<(), SavingsError> {
        if amount == 0 {
            return Err(SavingsError::InvalidAmount);
        }
        if self.withdrawn {
            return Err(SavingsError::AlreadyClosed(self.id.clone()));
        }
        if self.deposits_completed >= self.total_deposits {
            return Err(SavingsError::AlreadyComplete(self.id.clone()));
        }

        self.deposits_completed += 1;
        self.total_saved = self.total_saved.saturating_add(amount);
        self.last_deposit_at = Some(now);
        self.failed_count = 0;
        self.last_error = None;

        match self.frequency {
            Some(frequency) if self.deposits_completed < self.total_deposits => {
                let reference = self.next_deposit.unwrap_or(now);
                self.next_deposit = Some(next_occurrence(
                    frequency,
                    Some(self.created_at),
                    self.execution_time,
                    reference,
                ));
            }
            _ => {
                self.next_deposit = None;
                if !self.is_recurring {
                    self.is_active = false;
                }
            }
        }

        self.updated_at = now;
        Ok(())
    }

    /// Record a failed deposit; returns true if this failure disabled the plan
    pub fn mark_deposit_failed(&mut self, error: &str, threshold: u32, now: DateTime<Utc>) -> bool {
        self.failed_count += 1;
        self.last_error = Some(error.to_string());
        self.updated_at = now;

        if self.is_active && self.failed_count >= threshold {
            self.is_active = false;
            return true;
        }
        false
    }

    pub fn set_on_chain_plan_id(&mut self, plan_id: u64, now: DateTime<Utc>) {
        self.on_chain_plan_id = Some(plan_id);
        self.updated_at = now;
    }

    /// Ok once `now` has reached the unlock date
    pub fn check_unlock(&self, now: DateTime<Utc>) -> Result<(), SavingsError> {
        if now >= self.unlock_date {
            return Ok(());
        }
        Err(SavingsError::StillLocked {
            days_remaining: days_until(now, self.unlock_date),
        })
    }

    pub fn mark_withdrawn(&mut self, now: DateTime<Utc>) -> Result<(), SavingsError> {
        if self.withdrawn {
            return Err(SavingsError::AlreadyClosed(self.id.clone()));
        }
        self.close(now);
        Ok(())
    }

    /// Terminal transition after an on-chain cancellation
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), SavingsError> {
        if self.withdrawn {
            return Err(SavingsError::AlreadyClosed(self.id.clone()));
        }
        self.cancelled = true;
        self.close(now);
        Ok(())
    }

    fn close(&mut self, now: DateTime<Utc>) {
        self.withdrawn = true;
        self.is_active = false;
        self.next_deposit = None;
        self.updated_at = now;
    }
}
