//! Tests for savings plans

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use proptest::prelude::*;
use sentinel_core_rs::models::savings_plan::{total_deposits_for, SavingsPlanDraft};
use sentinel_core_rs::scheduling::{FailureOutcome, SavingsBook};
use sentinel_core_rs::{Frequency, SavingsError, SavingsPlan};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
}

fn draft(amount: u128, frequency: Option<Frequency>, lock_days: u32) -> SavingsPlanDraft {
    SavingsPlanDraft {
        name: "Emergency fund".to_string(),
        deposit_amount: amount,
        frequency,
        lock_duration_days: lock_days,
        execution_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
    }
}

#[test]
fn test_one_off_plan_completes_after_single_deposit() {
    let mut book = SavingsBook::default();
    let id = book.create_plan(draft(100, None, 30), now()).unwrap();

    let plan = book.get(&id).unwrap();
    assert_eq!(plan.total_deposits(), 1);
    assert_eq!(plan.target_amount(), 100);
    assert_eq!(plan.unlock_date(), now() + Duration::days(30));
    assert!(!plan.is_recurring());

    book.record_deposit(&id, 100, now()).unwrap();

    let plan = book.get(&id).unwrap();
    assert_eq!(plan.deposits_completed(), 1);
    assert_eq!(plan.total_saved(), 100);
    assert_eq!(plan.next_deposit(), None);
    assert!(!plan.is_active());
}

#[test]
fn test_total_deposits_table() {
    assert_eq!(total_deposits_for(None, 365), 1);
    assert_eq!(total_deposits_for(Some(Frequency::Daily), 30), 30);
    assert_eq!(total_deposits_for(Some(Frequency::Weekly), 30), 5);
    assert_eq!(total_deposits_for(Some(Frequency::Weekly), 28), 4);
    assert_eq!(total_deposits_for(Some(Frequency::Monthly), 90), 3);
    assert_eq!(total_deposits_for(Some(Frequency::Monthly), 10), 1);
    assert_eq!(total_deposits_for(Some(Frequency::Yearly), 366), 2);
}

#[test]
fn test_recurring_plan_schedules_following_deposits() {
    let mut book = SavingsBook::default();
    let id = book
        .create_plan(draft(10, Some(Frequency::Weekly), 21), now())
        .unwrap();
    assert_eq!(book.get(&id).unwrap().total_deposits(), 3);

    book.record_deposit(&id, 10, now()).unwrap();
    let second = book.get(&id).unwrap().next_deposit().unwrap();
    assert!(second > now());
    assert!(second - now() <= Duration::days(7));
    assert!(book.get_due_deposits(now()).is_empty());

    book.record_deposit(&id, 10, second).unwrap();
    let third = book.get(&id).unwrap().next_deposit().unwrap();
    assert_eq!(third - second, Duration::days(7));

    book.record_deposit(&id, 10, third).unwrap();
    let plan = book.get(&id).unwrap();
    assert_eq!(plan.remaining_deposits(), 0);
    assert_eq!(plan.next_deposit(), None);
    assert_eq!(plan.total_saved(), 30);

    assert_eq!(
        book.record_deposit(&id, 10, third),
        Err(SavingsError::AlreadyComplete(id.clone()))
    );
}

#[test]
fn test_withdraw_before_unlock_reports_days() {
    let mut book = SavingsBook::default();
    let id = book.create_plan(draft(100, None, 30), now()).unwrap();

    assert_eq!(
        book.check_unlock(&id, now() + Duration::days(29) + Duration::hours(1)),
        Err(SavingsError::StillLocked { days_remaining: 1 })
    );
    assert_eq!(
        book.withdraw(&id, now()),
        Err(SavingsError::StillLocked { days_remaining: 30 })
    );
    assert!(!book.get(&id).unwrap().is_withdrawn());
}

#[test]
fn test_last_instant_before_unlock_still_reports_a_day() {
    let mut book = SavingsBook::default();
    let id = book.create_plan(draft(100, None, 30), now()).unwrap();
    let unlock = book.get(&id).unwrap().unlock_date();

    assert_eq!(
        book.check_unlock(&id, unlock - Duration::microseconds(500)),
        Err(SavingsError::StillLocked { days_remaining: 1 })
    );
    assert_eq!(book.check_unlock(&id, unlock), Ok(()));
}

#[test]
fn test_withdraw_after_unlock_closes_plan() {
    let mut book = SavingsBook::default();
    let id = book.create_plan(draft(100, Some(Frequency::Daily), 3), now()).unwrap();

    book.withdraw(&id, now() + Duration::days(3)).unwrap();

    let plan = book.get(&id).unwrap();
    assert!(plan.is_withdrawn());
    assert!(!plan.is_cancelled());
    assert_eq!(plan.next_deposit(), None);
    assert_eq!(
        book.mark_withdrawn(&id, now() + Duration::days(4)),
        Err(SavingsError::AlreadyClosed(id.clone()))
    );
}

#[test]
fn test_deposit_into_closed_plan_rejected() {
    let mut book = SavingsBook::default();
    let id = book.create_plan(draft(100, Some(Frequency::Daily), 3), now()).unwrap();
    book.cancel(&id, now()).unwrap();
    assert_eq!(
        book.record_deposit(&id, 100, now()),
        Err(SavingsError::AlreadyClosed(id.clone()))
    );
}

#[test]
fn test_deposit_failures_disable_after_threshold() {
    let mut book = SavingsBook::new(3);
    let id = book.create_plan(draft(5, Some(Frequency::Daily), 10), now()).unwrap();

    book.mark_deposit_failed(&id, "gas", now()).unwrap();
    book.mark_deposit_failed(&id, "gas", now()).unwrap();
    assert_eq!(book.get_due_deposits(now()).len(), 1);
    assert_eq!(
        book.mark_deposit_failed(&id, "gas", now()).unwrap(),
        FailureOutcome::Disabled { failed_count: 3 }
    );
    assert!(book.get_due_deposits(now()).is_empty());
}

#[test]
fn test_invalid_drafts_rejected() {
    let mut book = SavingsBook::default();
    assert_eq!(
        book.create_plan(draft(0, None, 30), now()),
        Err(SavingsError::InvalidAmount)
    );
    assert_eq!(
        book.create_plan(draft(10, None, 0), now()),
        Err(SavingsError::InvalidLockDuration)
    );
}

#[test]
fn test_on_chain_id_survives_serialization() {
    let mut plan = SavingsPlan::new(draft(u128::MAX / 2, None, 30), now()).unwrap();
    plan.set_on_chain_plan_id(42, now());

    let json = serde_json::to_value(&plan).unwrap();
    assert_eq!(json["onChainPlanId"], 42);
    assert_eq!(json["depositAmount"], (u128::MAX / 2).to_string());

    let restored: SavingsPlan = serde_json::from_value(json).unwrap();
    assert_eq!(restored, plan);
}

proptest! {
    #[test]
    fn prop_total_deposits_at_least_one(
        freq in prop::option::of(prop::sample::select(Frequency::ALL.to_vec())),
        lock in 1u32..3_650,
    ) {
        let total = total_deposits_for(freq, lock);
        prop_assert!(total >= 1);
        prop_assert!(total <= lock);
    }

    #[test]
    fn prop_locked_plan_reports_at_least_one_day(
        lock in 1u32..3_650,
        before_unlock_nanos in 1i64..400_000_000_000_000_000i64,
    ) {
        let plan = SavingsPlan::new(draft(100, None, lock), now()).unwrap();
        let remaining = before_unlock_nanos % (i64::from(lock) * 86_400_000_000_000) + 1;
        let at = plan.unlock_date() - Duration::nanoseconds(remaining);
        prop_assert!(at < plan.unlock_date());

        match plan.check_unlock(at) {
            Err(SavingsError::StillLocked { days_remaining }) => {
                prop_assert!(days_remaining > 0);
                prop_assert!(days_remaining <= u64::from(lock));
            }
            other => prop_assert!(false, "expected StillLocked, got {:?}", other),
        }
    }

    #[test]
    fn prop_target_is_amount_times_deposits(
        amount in 1u128..1_000_000_000_000_000_000_000u128,
        lock in 1u32..1_000,
    ) {
        let plan = SavingsPlan::new(draft(amount, Some(Frequency::Weekly), lock), now()).unwrap();
        prop_assert_eq!(plan.target_amount(), amount * u128::from(plan.total_deposits()));
    }
}
