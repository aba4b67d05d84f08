//! Recurring schedule engine
//!
//! Holds an owner's schedules and applies the lifecycle transitions defined
//! on `Schedule`. The engine is pull-based: `get_due(now)` answers what
//! should run, and the orchestrator polls it and reports back through
//! `mark_executed` / `mark_failed`.

use crate::models::schedule::{Schedule, ScheduleDraft, ScheduleError, SchedulePatch};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{info, warn};

/// Consecutive failures after which a schedule is disabled
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// What `mark_failed` did to the schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still active; will be retried at the same occurrence
    Retrying { failed_count: u32 },
    /// This failure crossed the threshold and disabled the schedule
    Disabled { failed_count: u32 },
    /// The schedule was already inactive
    AlreadyInactive { failed_count: u32 },
}

/// An owner's recurring payment schedules
///
/// # Example
/// ```
/// use chrono::{NaiveTime, TimeZone, Utc};
/// use sentinel_core_rs::core::time::Frequency;
/// use sentinel_core_rs::models::schedule::ScheduleDraft;
/// use sentinel_core_rs::scheduling::ScheduleBook;
/// use sentinel_core_rs::Address;
///
/// let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
/// let mut book = ScheduleBook::new(3);
/// let id = book
///     .create(
///         ScheduleDraft {
///             vendor_name: "Hosting".to_string(),
///             vendor_address: Address::parse("0x2222222222222222222222222222222222222222").unwrap(),
///             amount: 15,
///             frequency: Frequency::Daily,
///             execution_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
///             anchor_date: None,
///         },
///         now,
///     )
///     .unwrap();
///
/// assert!(book.get_due(now).is_empty());
/// let tomorrow = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
/// assert_eq!(book.get_due(tomorrow)[0].id(), id);
/// ```
#[derive(Debug, Clone)]
pub struct ScheduleBook {
    schedules: HashMap<String, Schedule>,
    failure_threshold: u32,
}

impl Default for ScheduleBook {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl ScheduleBook {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            schedules: HashMap::new(),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Rebuild from persisted schedules
    pub fn from_schedules(schedules: Vec<Schedule>, failure_threshold: u32) -> Self {
        let mut book = Self::new(failure_threshold);
        for schedule in schedules {
            book.schedules.insert(schedule.id().to_string(), schedule);
        }
        book
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    /// Create a schedule and return its id
    pub fn create(&mut self, draft: ScheduleDraft, now: DateTime<Utc>) -> Result<String, ScheduleError> {
        let schedule = Schedule::new(draft, now)?;
        let id = schedule.id().to_string();
        info!(
            schedule_id = %id,
            vendor = schedule.vendor_name(),
            frequency = %schedule.frequency(),
            next = %schedule.next_occurrence(),
            "schedule created"
        );
        self.schedules.insert(id.clone(), schedule);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<&Schedule> {
        self.schedules.get(id)
    }

    /// All schedules, soonest first
    pub fn list(&self) -> Vec<&Schedule> {
        let mut all: Vec<&Schedule> = self.schedules.values().collect();
        sort_by_next(&mut all);
        all
    }

    /// Owned copies of every schedule, for persistence and sync
    pub fn snapshot(&self) -> Vec<Schedule> {
        self.list().into_iter().cloned().collect()
    }

    pub fn update(
        &mut self,
        id: &str,
        patch: SchedulePatch,
        now: DateTime<Utc>,
    ) -> Result<&Schedule, ScheduleError> {
        let schedule = self.get_mut(id)?;
        schedule.apply_patch(patch, now)?;
        Ok(schedule)
    }

    pub fn pause(&mut self, id: &str, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        self.get_mut(id)?.pause(now);
        info!(schedule_id = id, "schedule paused");
        Ok(())
    }

    /// Re-activate; missed occurrences are skipped, not caught up
    pub fn resume(&mut self, id: &str, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        let schedule = self.get_mut(id)?;
        schedule.resume(now);
        info!(schedule_id = id, next = %schedule.next_occurrence(), "schedule resumed");
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<Schedule, ScheduleError> {
        self.schedules
            .remove(id)
            .ok_or_else(|| ScheduleError::NotFound(id.to_string()))
    }

    pub fn mark_executed(
        &mut self,
        id: &str,
        tx_id: &str,
        executed_at: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        let schedule = self.get_mut(id)?;
        schedule.mark_executed(tx_id, executed_at);
        info!(
            schedule_id = id,
            tx_id,
            count = schedule.execution_count(),
            next = %schedule.next_occurrence(),
            "schedule executed"
        );
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, ScheduleError> {
        let threshold = self.failure_threshold;
        let schedule = self.get_mut(id)?;
        let was_active = schedule.is_active();
        let disabled = schedule.mark_failed(error, threshold, now);
        let failed_count = schedule.failed_count();

        let outcome = if disabled {
            warn!(schedule_id = id, failed_count, error, "schedule disabled after repeated failures");
            FailureOutcome::Disabled { failed_count }
        } else if was_active {
            warn!(schedule_id = id, failed_count, error, "schedule execution failed");
            FailureOutcome::Retrying { failed_count }
        } else {
            FailureOutcome::AlreadyInactive { failed_count }
        };
        Ok(outcome)
    }

    /// Active schedules whose next occurrence is at or before `now`
    pub fn get_due(&self, now: DateTime<Utc>) -> Vec<&Schedule> {
        let mut due: Vec<&Schedule> = self
            .schedules
            .values()
            .filter(|s| s.is_due(now))
            .collect();
        sort_by_next(&mut due);
        due
    }

    /// Active schedules that fall due within `horizon` of `now` (overdue included)
    pub fn upcoming(&self, now: DateTime<Utc>, horizon: Duration) -> Vec<&Schedule> {
        let cutoff = now + horizon;
        let mut upcoming: Vec<&Schedule> = self
            .schedules
            .values()
            .filter(|s| s.is_active() && s.next_occurrence() <= cutoff)
            .collect();
        sort_by_next(&mut upcoming);
        upcoming
    }

    /// Merge records from another device; the newer `updated_at` wins
    ///
    /// Returns how many local records were inserted or replaced.
    pub fn merge_remote(&mut self, remote: Vec<Schedule>) -> usize {
        let mut changed = 0;
        for incoming in remote {
            let newer = self
                .schedules
                .get(incoming.id())
                .map_or(true, |local| incoming.updated_at() > local.updated_at());
            if newer {
                self.schedules.insert(incoming.id().to_string(), incoming);
                changed += 1;
            }
        }
        changed
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Schedule, ScheduleError> {
        self.schedules
            .get_mut(id)
            .ok_or_else(|| ScheduleError::NotFound(id.to_string()))
    }
}

fn sort_by_next(schedules: &mut [&Schedule]) {
    schedules.sort_by(|a, b| {
        a.next_occurrence()
            .cmp(&b.next_occurrence())
            .then_with(|| a.id().cmp(b.id()))
    });
}
