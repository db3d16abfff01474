//! crates/tutoring_core/src/schedule.rs
//!
//! Calendar arithmetic for one-hour slots.

use chrono::{NaiveDate, NaiveTime, Timelike};

use crate::error::{ServiceError, ServiceResult};

const SLOT_MINUTES: u32 = 60;
const DAY_MINUTES: u32 = 24 * 60;

pub fn parse_date(raw: &str) -> ServiceResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        ServiceError::validation(format!("Invalid date '{}', expected YYYY-MM-DD", raw))
    })
}

pub fn parse_time(raw: &str) -> ServiceResult<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| ServiceError::validation(format!("Invalid time '{}', expected HH:MM", raw)))
}

fn minutes_of(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

fn time_at(minutes: u32) -> NaiveTime {
    let minutes = minutes % DAY_MINUTES;
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0).unwrap_or_default()
}

/// Splits `[start, end)` into consecutive one-hour `(start, end)` pairs.
///
/// `end` defaults to one hour after `start`. An `end` of `00:00` means
/// midnight at the close of the day.
pub fn hourly_slots(
    start: NaiveTime,
    end: Option<NaiveTime>,
) -> ServiceResult<Vec<(NaiveTime, NaiveTime)>> {
    let from = minutes_of(start);
    let to = match end {
        None => from + SLOT_MINUTES,
        Some(t) if minutes_of(t) == 0 && from > 0 => DAY_MINUTES,
        Some(t) => minutes_of(t),
    };
    if to <= from {
        return Err(ServiceError::validation("End time must be after start time"));
    }
    if (to - from) % SLOT_MINUTES != 0 {
        return Err(ServiceError::validation(
            "Time ranges must cover whole hours",
        ));
    }
    Ok((from..to)
        .step_by(SLOT_MINUTES as usize)
        .map(|m| (time_at(m), time_at(m + SLOT_MINUTES)))
        .collect())
}

/// Billable hours for a rescheduled session. An end hour at or before the
/// start hour means the session runs past midnight.
pub fn wrapped_hours(start: NaiveTime, end: NaiveTime) -> u32 {
    let (from, to) = (start.hour(), end.hour());
    if to <= from {
        to + 24 - from
    } else {
        to - from
    }
}
