//! Savings plan engine
//!
//! Holds an owner's savings plans. The engine tracks deposits and lock
//! periods locally; the savings contract stays authoritative for funds, and
//! early cancellation policy is entirely the contract's.

use crate::models::savings_plan::{SavingsError, SavingsPlan, SavingsPlanDraft};
use crate::scheduling::recurring::{FailureOutcome, DEFAULT_FAILURE_THRESHOLD};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{info, warn};

/// An owner's savings plans
#[derive(Debug, Clone)]
pub struct SavingsBook {
    plans: HashMap<String, SavingsPlan>,
    failure_threshold: u32,
}

impl Default for SavingsBook {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl SavingsBook {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            plans: HashMap::new(),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Rebuild from persisted plans
    pub fn from_plans(plans: Vec<SavingsPlan>, failure_threshold: u32) -> Self {
        let mut book = Self::new(failure_threshold);
        for plan in plans {
            book.plans.insert(plan.id().to_string(), plan);
        }
        book
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Create a plan and return its id
    ///
    /// # Example
    /// ```
    /// use chrono::{NaiveTime, TimeZone, Utc};
    /// use sentinel_core_rs::models::savings_plan::SavingsPlanDraft;
    /// use sentinel_core_rs::scheduling::SavingsBook;
    ///
    /// let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
    /// let mut book = SavingsBook::default();
    /// let id = book
    ///     .create_plan(
    ///         SavingsPlanDraft {
    ///             name: "Rainy day".to_string(),
    ///             deposit_amount: 100,
    ///             frequency: None,
    ///             lock_duration_days: 30,
    ///             execution_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
    ///         },
    ///         now,
    ///     )
    ///     .unwrap();
    ///
    /// let plan = book.get(&id).unwrap();
    /// assert_eq!(plan.total_deposits(), 1);
    /// assert_eq!(plan.target_amount(), 100);
    /// ```
    pub fn create_plan(
        &mut self,
        draft: SavingsPlanDraft,
        now: DateTime<Utc>,
    ) -> Result<String, SavingsError> {
        let plan = SavingsPlan::new(draft, now)?;
        let id = plan.id().to_string();
        info!(
            plan_id = %id,
            deposits = plan.total_deposits(),
            unlock = %plan.unlock_date(),
            "savings plan created"
        );
        self.plans.insert(id.clone(), plan);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<&SavingsPlan> {
        self.plans.get(id)
    }

    /// All plans, oldest first
    pub fn list(&self) -> Vec<&SavingsPlan> {
        let mut all: Vec<&SavingsPlan> = self.plans.values().collect();
        all.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        all
    }

    /// Owned copies of every plan, for persistence and sync
    pub fn snapshot(&self) -> Vec<SavingsPlan> {
        self.list().into_iter().cloned().collect()
    }

    pub fn record_deposit(
        &mut self,
        id: &str,
        amount: u128,
        now: DateTime<Utc>,
    ) -> Result<(), SavingsError> {
        let plan = self.get_mut(id)?;
        plan.record_deposit(amount, now)?;
        info!(
            plan_id = id,
            completed = plan.deposits_completed(),
            total = plan.total_deposits(),
            "savings deposit recorded"
        );
        Ok(())
    }

    pub fn mark_deposit_failed(
        &mut self,
        id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, SavingsError> {
        let threshold = self.failure_threshold;
        let plan = self.get_mut(id)?;
        let was_active = plan.is_active();
        let disabled = plan.mark_deposit_failed(error, threshold, now);
        let failed_count = plan.failed_count();

        Ok(if disabled {
            warn!(plan_id = id, failed_count, error, "savings plan disabled after repeated failures");
            FailureOutcome::Disabled { failed_count }
        } else if was_active {
            warn!(plan_id = id, failed_count, error, "savings deposit failed");
            FailureOutcome::Retrying { failed_count }
        } else {
            FailureOutcome::AlreadyInactive { failed_count }
        })
    }

    pub fn set_on_chain_plan_id(
        &mut self,
        id: &str,
        plan_id: u64,
        now: DateTime<Utc>,
    ) -> Result<(), SavingsError> {
        self.get_mut(id)?.set_on_chain_plan_id(plan_id, now);
        Ok(())
    }

    /// Ok once unlocked; otherwise `StillLocked` with whole days remaining
    pub fn check_unlock(&self, id: &str, now: DateTime<Utc>) -> Result<(), SavingsError> {
        self.plans
            .get(id)
            .ok_or_else(|| SavingsError::NotFound(id.to_string()))?
            .check_unlock(now)
    }

    pub fn mark_withdrawn(&mut self, id: &str, now: DateTime<Utc>) -> Result<(), SavingsError> {
        self.get_mut(id)?.mark_withdrawn(now)?;
        info!(plan_id = id, "savings plan withdrawn");
        Ok(())
    }

    /// Check the lock and mark withdrawn in one step
    pub fn withdraw(&mut self, id: &str, now: DateTime<Utc>) -> Result<(), SavingsError> {
        self.check_unlock(id, now)?;
        self.mark_withdrawn(id, now)
    }

    pub fn cancel(&mut self, id: &str, now: DateTime<Utc>) -> Result<(), SavingsError> {
        self.get_mut(id)?.cancel(now)?;
        info!(plan_id = id, "savings plan cancelled");
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<SavingsPlan, SavingsError> {
        self.plans
            .remove(id)
            .ok_or_else(|| SavingsError::NotFound(id.to_string()))
    }

    /// Plans with a deposit due at or before `now`, earliest first
    pub fn get_due_deposits(&self, now: DateTime<Utc>) -> Vec<&SavingsPlan> {
        let mut due: Vec<&SavingsPlan> = self
            .plans
            .values()
            .filter(|p| p.is_deposit_due(now))
            .collect();
        due.sort_by(|a, b| {
            a.next_deposit()
                .cmp(&b.next_deposit())
                .then_with(|| a.id().cmp(b.id()))
        });
        due
    }

    /// Plans with a deposit due within `horizon` of `now` (overdue included)
    pub fn upcoming_deposits(&self, now: DateTime<Utc>, horizon: Duration) -> Vec<&SavingsPlan> {
        let cutoff = now + horizon;
        let mut upcoming: Vec<&SavingsPlan> = self
            .plans
            .values()
            .filter(|p| p.is_deposit_due(cutoff))
            .collect();
        upcoming.sort_by(|a, b| a.next_deposit().cmp(&b.next_deposit()));
        upcoming
    }

    /// Merge records from another device; the newer `updated_at` wins
    pub fn merge_remote(&mut self, remote: Vec<SavingsPlan>) -> usize {
        let mut changed = 0;
        for incoming in remote {
            let newer = self
                .plans
                .get(incoming.id())
                .map_or(true, |local| incoming.updated_at() > local.updated_at());
            if newer {
                self.plans.insert(incoming.id().to_string(), incoming);
                changed += 1;
            }
        }
        changed
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut SavingsPlan, SavingsError> {
        self.plans
            .get_mut(id)
            .ok_or_else(|| SavingsError::NotFound(id.to_string()))
    }
}
