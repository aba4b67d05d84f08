//! Occurrence calculation for recurring payments and deposits
//!
//! Every schedule and recurring savings plan carries a frequency, an anchor
//! date and a time-of-day. This module turns those into the next timestamp
//! at which the automation is due.
//!
//! All calculations are in UTC. The caller's notion of "now" is always an
//! explicit argument so results are reproducible in tests.
//!
//! # Date rollover
//!
//! Day-of-month arithmetic follows native calendar rollover: asking for the
//! 31st of a 30-day month yields the 1st of the following month, and the
//! 29th of February in a non-leap year yields the 1st of March.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SECS_PER_DAY: i64 = 86_400;

/// Errors raised when parsing schedule timing inputs
#[derive(Debug, Error, PartialEq)]
pub enum TimeError {
    #[error("Unknown frequency: {0} (expected daily, weekly, monthly or yearly)")]
    UnknownFrequency(String),

    #[error("Invalid time of day: {0} (expected HH:MM or HH:MM:SS)")]
    InvalidTimeOfDay(String),
}

/// How often a schedule or savings plan recurs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    /// All supported frequencies
    pub const ALL: [Frequency; 4] = [
        Frequency::Daily,
        Frequency::Weekly,
        Frequency::Monthly,
        Frequency::Yearly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Yearly => "yearly",
        }
    }

    /// Lenient parse used when loading stored records
    ///
    /// Unknown values fall back to `Monthly` so an old or foreign record never
    /// prevents the rest of a collection from loading.
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or(Frequency::Monthly)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "yearly" => Ok(Frequency::Yearly),
            _ => Err(TimeError::UnknownFrequency(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for Frequency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Frequency::parse_lenient(&raw))
    }
}

/// Parse a time of day in `HH:MM` or `HH:MM:SS` form
///
/// # Example
/// ```
/// use sentinel_core_rs::core::time::parse_time_of_day;
///
/// let t = parse_time_of_day("09:30").unwrap();
/// assert_eq!(t.to_string(), "09:30:00");
/// assert!(parse_time_of_day("9am").is_err());
/// ```
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, TimeError> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|_| TimeError::InvalidTimeOfDay(raw.to_string()))
}

/// Compute the next occurrence strictly after `now`
///
/// # Arguments
/// * `frequency` - Recurrence frequency
/// * `anchor` - Date the recurrence is aligned to (weekday for weekly,
///   day-of-month for monthly, date for yearly). `None` means "today".
/// * `time_of_day` - Wall-clock time (UTC) at which the occurrence fires
/// * `now` - Reference instant; the result is always later than this
///
/// # Weekly without anchor
///
/// A weekly recurrence without an anchor has no weekday to align to and
/// yields the next `time_of_day` (today or tomorrow), exactly like daily.
/// Callers that want weekly spacing must supply an anchor.
///
/// # Example
/// ```
/// use chrono::{NaiveTime, TimeZone, Utc};
/// use sentinel_core_rs::core::time::{next_occurrence, Frequency};
///
/// // Sunday 2026-10-18 12:00, anchored on Monday 2026-10-12
/// let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
/// let anchor = Utc.with_ymd_and_hms(2026, 10, 12, 0, 0, 0).unwrap();
/// let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
///
/// let next = next_occurrence(Frequency::Weekly, Some(anchor), nine, now);
/// assert_eq!(next, Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap());
/// ```
pub fn next_occurrence(
    frequency: Frequency,
    anchor: Option<DateTime<Utc>>,
    time_of_day: NaiveTime,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let reference = anchor.unwrap_or(now).date_naive();
    let base = first_future_at(reference, time_of_day, now);

    let next = match frequency {
        Frequency::Daily => Some(base),
        Frequency::Weekly => match anchor {
            Some(anchor) => align_to_weekday(base, anchor.weekday()),
            None => Some(base),
        },
        Frequency::Monthly => {
            let day = anchor.map(|a| a.day()).unwrap_or_else(|| reference.day());
            next_monthly(base, day, time_of_day, now)
        }
        Frequency::Yearly => next_yearly(reference, time_of_day, now),
    };

    // Only unreachable calendar ranges (year overflow) land here.
    next.filter(|candidate| *candidate > now)
        .unwrap_or_else(|| now + Duration::days(1))
}

/// Whole days remaining until `target`, rounded up; zero once reached
///
/// Any time left at all counts as a day, down to the nanosecond.
///
/// # Example
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use sentinel_core_rs::core::time::days_until;
///
/// let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
/// assert_eq!(days_until(now, now + Duration::hours(1)), 1);
/// assert_eq!(days_until(now, now + Duration::days(30)), 30);
/// assert_eq!(days_until(now, now), 0);
/// ```
pub fn days_until(now: DateTime<Utc>, target: DateTime<Utc>) -> u64 {
    if target <= now {
        return 0;
    }
    let delta = target - now;
    let mut secs = delta.num_seconds();
    if delta.subsec_nanos() > 0 {
        secs += 1;
    }
    let days = (secs + SECS_PER_DAY - 1) / SECS_PER_DAY;
    u64::try_from(days).unwrap_or(u64::MAX).max(1)
}

/// Combine a calendar date and a time of day into a UTC instant
pub fn at_time(date: NaiveDate, time_of_day: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time_of_day))
}

/// `time_of_day` on `reference`, moved forward a day at a time until it is
/// strictly after `now`
fn first_future_at(reference: NaiveDate, time_of_day: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
    // An anchor in the past behaves as if the day-by-day walk had already
    // reached today.
    let start = reference.max(now.date_naive());
    let mut candidate = at_time(start, time_of_day);
    while candidate <= now {
        candidate += Duration::days(1);
    }
    candidate
}

fn align_to_weekday(base: DateTime<Utc>, weekday: Weekday) -> Option<DateTime<Utc>> {
    let mut candidate = base;
    for _ in 0..7 {
        if candidate.weekday() == weekday {
            return Some(candidate);
        }
        candidate += Duration::days(1);
    }
    None
}

fn next_monthly(
    base: DateTime<Utc>,
    day: u32,
    time_of_day: NaiveTime,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let start = base.date_naive();
    for months_ahead in 0..=12 {
        let date = date_with_rollover(start.year(), start.month() as i32 + months_ahead, day)?;
        let candidate = at_time(date, time_of_day);
        if candidate > now {
            return Some(candidate);
        }
    }
    None
}

fn next_yearly(
    reference: NaiveDate,
    time_of_day: NaiveTime,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let first_year = (reference.year() + 1).max(now.year());
    for year in first_year..=first_year + 2 {
        let date = date_with_rollover(year, reference.month() as i32, reference.day())?;
        let candidate = at_time(date, time_of_day);
        if candidate > now {
            return Some(candidate);
        }
    }
    None
}

/// Build a date from possibly out-of-range month and day values
///
/// `month` may exceed 12 (carries into following years) and `day` may exceed
/// the length of the month (carries into the following month).
fn date_with_rollover(year: i32, month: i32, day: u32) -> Option<NaiveDate> {
    let zero_based = month - 1;
    let year = year + zero_based.div_euclid(12);
    let month = (zero_based.rem_euclid(12) + 1) as u32;
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    first.checked_add_signed(Duration::days(i64::from(day.max(1)) - 1))
}
