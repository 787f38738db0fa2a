//! Occurrence arithmetic for recurring tasks.
//!
//! All functions are pure over explicit instants so the worker can pass the
//! event's completion time and its own clock without hidden reads.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

use crate::models::Recurrence;

// Guard against pathological inputs (e.g. a base thousands of years in the
// past); the sweep gives up rather than spin.
const MAX_ADVANCE_STEPS: u32 = 100_000;

/// Compute the due instant of the successor occurrence.
///
/// Base is the source task's due instant when present, otherwise its
/// completion instant. One increment is always applied; if the result is not
/// strictly after `now`, increments are repeated so a long-overdue task
/// re-completed today does not spawn a backlog of stale successors.
///
/// Monthly increments land on the same day of the next month, clamped to
/// that month's last day when the source day does not exist (Jan 31 becomes
/// Feb 28, or Feb 29 in leap years).
///
/// Returns `None` for `Recurrence::None`.
pub fn next_due_at(
    recurrence: Recurrence,
    base: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !recurrence.is_recurring() {
        return None;
    }

    let mut candidate = step(recurrence, base)?;
    let mut steps = 1;
    while candidate <= now {
        if steps >= MAX_ADVANCE_STEPS {
            return None;
        }
        candidate = step(recurrence, candidate)?;
        steps += 1;
    }
    Some(candidate)
}

/// Compute the successor's reminder instant by preserving the source's
/// offset between reminder and due time. Requires both source instants and a
/// computed successor due; otherwise the successor has no reminder.
pub fn next_remind_at(
    source_remind_at: Option<DateTime<Utc>>,
    source_due_at: Option<DateTime<Utc>>,
    successor_due_at: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let remind = source_remind_at?;
    let due = source_due_at?;
    let next_due = successor_due_at?;
    Some(next_due - (due - remind))
}

fn step(recurrence: Recurrence, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match recurrence {
        Recurrence::None => None,
        Recurrence::Daily => Some(from + Duration::days(1)),
        Recurrence::Weekly => Some(from + Duration::days(7)),
        Recurrence::Monthly => add_one_month(from),
    }
}

fn add_one_month(from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if from.month() == 12 {
        (from.year() + 1, 1)
    } else {
        (from.year(), from.month() + 1)
    };
    let day = from.day().min(days_in_month(year, month));
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(Utc.from_utc_datetime(&date.and_time(from.time())))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}
