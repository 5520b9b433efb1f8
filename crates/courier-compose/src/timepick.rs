//! Operator-facing times: parsing, rendering and the custom picker grid.
//!
//! Operators read and type wall-clock times in the configured offset; all
//! instants handed to the state machine are UTC.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Timelike, Utc};

use crate::error::{ComposeError, Result};

/// Format accepted for typed times, e.g. `2026-10-18 21:30`.
pub const INPUT_FORMAT: &str = "%Y-%m-%d %H:%M";
/// [`INPUT_FORMAT`] as operators read it.
pub const INPUT_FORMAT_HINT: &str = "YYYY-MM-DD HH:MM";

const HOURLY_OPTIONS: i64 = 24;
const DAILY_OPTIONS: i64 = 7;

/// One button of the custom time picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeOption {
    pub label: String,
    pub at: DateTime<Utc>,
}

pub fn parse_local(input: &str, offset: FixedOffset) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(input.trim(), INPUT_FORMAT).map_err(|_| {
        ComposeError::Validation(format!(
            "could not read {:?} as a time; use {INPUT_FORMAT_HINT}",
            input.trim()
        ))
    })?;
    to_utc(naive, offset)
        .ok_or_else(|| ComposeError::Validation(format!("{input:?} is not a valid local time")))
}

pub fn format_local(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset).format(INPUT_FORMAT).to_string()
}

/// The next 24 whole local hours followed by the next 7 local midnights.
pub fn custom_options(now: DateTime<Utc>, offset: FixedOffset) -> Vec<TimeOption> {
    let local = now.with_timezone(&offset).naive_local();
    let Some(this_hour) = local.with_minute(0).and_then(|t| t.with_second(0)) else {
        return Vec::new();
    };
    let this_hour = this_hour.with_nanosecond(0).unwrap_or(this_hour);
    let midnight = local.date().and_time(chrono::NaiveTime::MIN);

    let hourly = (1..=HOURLY_OPTIONS).map(|h| this_hour + Duration::hours(h));
    let daily = (1..=DAILY_OPTIONS).map(|d| midnight + Duration::days(d));

    hourly
        .chain(daily)
        .filter_map(|naive| {
            let at = to_utc(naive, offset)?;
            Some(TimeOption {
                label: naive.format(INPUT_FORMAT).to_string(),
                at,
            })
        })
        .collect()
}

fn to_utc(naive: NaiveDateTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    naive
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
