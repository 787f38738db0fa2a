//! Natural-language date resolution at the agent boundary.
//!
//! Expressions like "tomorrow", "next friday", or "in 3 days" resolve to an
//! absolute UTC instant against the caller's clock. Date-only expressions
//! land at 12:00 UTC so they are neither already past at resolution time nor
//! mistaken for a precise deadline; full RFC 3339 timestamps are taken
//! literally.

use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use regex::Regex;
use task_core::error::{CoreError, Result};

const NOON_HOUR: u32 = 12;

fn relative_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^in\s+(\d+)\s+(minute|hour|day|week|month)s?$").expect("valid pattern")
    })
}

fn weekday_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(next\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)$")
            .expect("valid pattern")
    })
}

/// Resolve a natural-language or ISO date expression to a UTC instant.
pub fn resolve_date(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let text = input.trim().to_lowercase();
    if text.is_empty() {
        return Err(CoreError::empty_field("date"));
    }

    if let Ok(instant) = DateTime::parse_from_rfc3339(input.trim()) {
        return Ok(instant.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
        return at_noon(date);
    }

    match text.as_str() {
        "today" => return at_noon(now.date_naive()),
        "tomorrow" => return at_noon(now.date_naive() + Duration::days(1)),
        "next week" => return at_noon(now.date_naive() + Duration::days(7)),
        "next month" => {
            let date = now.date_naive();
            let (year, month) = if date.month() == 12 {
                (date.year() + 1, 1)
            } else {
                (date.year(), date.month() + 1)
            };
            let day = date.day().min(last_day_of(year, month));
            let date = NaiveDate::from_ymd_opt(year, month, day)
                .ok_or_else(|| CoreError::Internal("month arithmetic".to_string()))?;
            return at_noon(date);
        }
        _ => {}
    }

    if let Some(captures) = relative_regex().captures(&text) {
        let amount: i64 = captures[1]
            .parse()
            .map_err(|_| CoreError::Validation(format!("invalid amount in date: '{input}'")))?;
        let duration = match &captures[2] {
            "minute" => Duration::minutes(amount),
            "hour" => Duration::hours(amount),
            "day" => Duration::days(amount),
            "week" => Duration::days(7 * amount),
            "month" => Duration::days(30 * amount),
            _ => unreachable!("constrained by the pattern"),
        };
        return Ok(now + duration);
    }

    if let Some(captures) = weekday_regex().captures(&text) {
        let target = match &captures[2] {
            "monday" => Weekday::Mon,
            "tuesday" => Weekday::Tue,
            "wednesday" => Weekday::Wed,
            "thursday" => Weekday::Thu,
            "friday" => Weekday::Fri,
            "saturday" => Weekday::Sat,
            "sunday" => Weekday::Sun,
            _ => unreachable!("constrained by the pattern"),
        };
        let today = now.date_naive();
        let mut ahead =
            i64::from(target.num_days_from_monday()) - i64::from(today.weekday().num_days_from_monday());
        // "friday" and "next friday" both mean the next occurrence, never today
        if ahead <= 0 {
            ahead += 7;
        }
        return at_noon(today + Duration::days(ahead));
    }

    Err(CoreError::Validation(format!(
        "could not understand date expression: '{input}'"
    )))
}

fn at_noon(date: NaiveDate) -> Result<DateTime<Utc>> {
    date.and_hms_opt(NOON_HOUR, 0, 0)
        .map(|dt| Utc.from_utc_datetime(&dt))
        .ok_or_else(|| CoreError::Internal("invalid time of day".to_string()))
}

fn last_day_of(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 {
                29
            } else {
                28
            }
        }
    }
}
