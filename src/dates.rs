//! Date handling: the two accepted wire forms plus meeting-notes phrases
//!
//! Inputs and outputs use `YYYY-MM-DD` or `YYYY-MM-DD HH:mm`, local time.
//! ISO strings with a timezone suffix are rejected so callers never smuggle
//! in an offset the host would reinterpret.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use thiserror::Error;

/// Wire form with time
const FORM_DATETIME: &str = "%Y-%m-%d %H:%M";
/// Wire form date-only
const FORM_DATE: &str = "%Y-%m-%d";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DateError {
    #[error("date '{value}' carries a timezone suffix; use YYYY-MM-DD or YYYY-MM-DD HH:mm (local time)")]
    TimezoneSuffix { value: String },

    #[error("date '{value}' is not one of the accepted forms YYYY-MM-DD or YYYY-MM-DD HH:mm")]
    Unparseable { value: String },
}

/// Parse a wire date, accepting exactly the two documented forms
///
/// Date-only input resolves to midnight. A `Z` suffix or a `+HH:MM`/`-HH:MM`
/// offset after the time component is an error, not a silent conversion.
pub fn parse_wire(value: &str) -> Result<NaiveDateTime, DateError> {
    let trimmed = value.trim();

    if has_timezone_suffix(trimmed) {
        return Err(DateError::TimezoneSuffix {
            value: value.to_string(),
        });
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, FORM_DATETIME) {
        return Ok(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, FORM_DATE) {
        return Ok(d.and_time(NaiveTime::MIN));
    }

    Err(DateError::Unparseable {
        value: value.to_string(),
    })
}

/// Format a datetime in the long wire form
pub fn format_wire(dt: NaiveDateTime) -> String {
    dt.format(FORM_DATETIME).to_string()
}

/// Format a date-only value in the short wire form
pub fn format_wire_date(d: NaiveDate) -> String {
    d.format(FORM_DATE).to_string()
}

/// Detect a timezone suffix on an otherwise date-shaped string
///
/// `Z`, `z`, or a `+HH:MM`/`-HH:MM` trailer after the time component. The
/// date's own dashes must not trip this, so only the tail past the first
/// 10 characters is inspected.
fn has_timezone_suffix(value: &str) -> bool {
    if value.len() <= 10 {
        return false;
    }
    let tail = &value[10..];
    if tail.ends_with('Z') || tail.ends_with('z') {
        return true;
    }
    // +02:00 / -0500 / +02 style trailers
    if let Some(pos) = tail.rfind(['+', '-']) {
        let offset = &tail[pos + 1..];
        return !offset.is_empty()
            && offset.chars().all(|c| c.is_ascii_digit() || c == ':')
            && offset.chars().any(|c| c.is_ascii_digit());
    }
    false
}

// ============================================================================
// NATURAL PHRASES (meeting notes)
// ============================================================================

/// Resolve a natural-language time phrase to a date, relative to `today`
///
/// Understands the phrases that show up in meeting notes: today, tomorrow,
/// weekday names ("friday", "by friday", "on monday"), "next week",
/// "next month", "in N days", "in N weeks", "end of week", "end of month",
/// plus the two wire forms. Returns `None` for anything else; callers keep
/// the raw text in that case.
pub fn parse_phrase(phrase: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lowered = phrase.trim().to_lowercase();
    let p = lowered
        .strip_prefix("by ")
        .or_else(|| lowered.strip_prefix("on "))
        .or_else(|| lowered.strip_prefix("due "))
        .unwrap_or(lowered.as_str());

    match p {
        "today" | "tonight" | "eod" | "end of day" => return Some(today),
        "tomorrow" => return Some(today + Duration::days(1)),
        "next week" => return Some(today + Duration::days(7)),
        "next month" => {
            let (y, m) = if today.month() == 12 {
                (today.year() + 1, 1)
            } else {
                (today.year(), today.month() + 1)
            };
            let day = today.day().min(last_day_of_month(y, m));
            return NaiveDate::from_ymd_opt(y, m, day);
        }
        "end of week" | "eow" => {
            let to_friday =
                (Weekday::Fri.num_days_from_monday() as i64 + 7
                    - today.weekday().num_days_from_monday() as i64)
                    % 7;
            return Some(today + Duration::days(to_friday));
        }
        "end of month" | "eom" => {
            return NaiveDate::from_ymd_opt(
                today.year(),
                today.month(),
                last_day_of_month(today.year(), today.month()),
            );
        }
        _ => {}
    }

    if let Some(weekday) = parse_weekday(p) {
        let mut delta = (weekday.num_days_from_monday() as i64
            - today.weekday().num_days_from_monday() as i64)
            .rem_euclid(7);
        if delta == 0 {
            delta = 7; // bare weekday names mean the next occurrence
        }
        return Some(today + Duration::days(delta));
    }

    if let Some(rest) = p.strip_prefix("in ") {
        let mut parts = rest.split_whitespace();
        let n: i64 = parts.next()?.parse().ok()?;
        return match parts.next()? {
            "day" | "days" => Some(today + Duration::days(n)),
            "week" | "weeks" => Some(today + Duration::days(7 * n)),
            "month" | "months" => Some(today + Duration::days(30 * n)),
            _ => None,
        };
    }

    parse_wire(p).ok().map(|dt| dt.date())
}

fn parse_weekday(s: &str) -> Option<Weekday> {
    match s {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}
