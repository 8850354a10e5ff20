//! Turning what a user typed into task records, before anything reaches the store.

use crate::model::{minutes_from, Task};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

pub const TIME_FORMAT: &str = "%H:%M";
pub const DATE_FORMAT: &str = "%d-%m-%Y";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum InputError {
    #[error("message is required")]
    EmptyMessage,
    #[error("invalid time (use HH:MM): {0}")]
    BadTime(String),
    #[error("invalid date (use DD-MM-YYYY): {0}")]
    BadDate(String),
    #[error("{0} does not exist in the local timezone")]
    NonexistentLocalTime(NaiveDateTime),
    #[error("cannot move a task into the past")]
    InPast,
    #[error("minutes must be positive")]
    NonPositiveMinutes,
    #[error("{0} minutes is too far in the future")]
    TooFar(i64),
}

pub fn parse_time(raw: &str) -> Result<NaiveTime, InputError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, TIME_FORMAT).map_err(|_| InputError::BadTime(raw.to_string()))
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, InputError> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| InputError::BadDate(raw.to_string()))
}

fn non_empty(message: &str) -> Result<String, InputError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(InputError::EmptyMessage);
    }
    Ok(message.to_string())
}

fn localize<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Result<i64, InputError> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
        .ok_or(InputError::NonexistentLocalTime(naive))
}

/// Builds a new task from dialog fields. `date` defaults to today in `now`'s timezone.
///
/// A moment that is not in the future is taken to mean the same time tomorrow.
pub fn new_task<Tz: TimeZone>(
    message: &str,
    time: &str,
    date: Option<&str>,
    now: &DateTime<Tz>,
) -> Result<Task, InputError> {
    let message = non_empty(message)?;
    let time = parse_time(time)?;
    let date = match date.map(str::trim).filter(|d| !d.is_empty()) {
        Some(raw) => parse_date(raw)?,
        None => now.date_naive(),
    };
    let mut naive = date.and_time(time);
    if localize(&now.timezone(), naive)? <= now.timestamp() {
        naive += ChronoDuration::days(1);
    }
    let fire_at = localize(&now.timezone(), naive)?;
    Ok(Task::new(message, fire_at))
}

/// Copy of `existing` with the edited fields applied. Empty fields keep the old value.
pub fn edited_task<Tz: TimeZone>(
    existing: &Task,
    message: Option<&str>,
    time: Option<&str>,
    date: Option<&str>,
    now: &DateTime<Tz>,
) -> Result<Task, InputError> {
    let tz = now.timezone();
    let current = tz.timestamp_opt(existing.fire_at, 0).single();
    let pick = |field: Option<&str>| {
        field
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut edited = existing.clone();
    if let Some(message) = pick(message) {
        edited.message = message;
    } else if existing.message.trim().is_empty() {
        return Err(InputError::EmptyMessage);
    }

    let time = pick(time);
    let date = pick(date);
    if time.is_none() && date.is_none() {
        return Ok(edited);
    }
    let time = match time {
        Some(raw) => parse_time(&raw)?,
        None => current
            .as_ref()
            .map(|dt| dt.naive_local().time())
            .unwrap_or_default(),
    };
    let date = match date {
        Some(raw) => parse_date(&raw)?,
        None => current
            .as_ref()
            .map(|dt| dt.naive_local().date())
            .unwrap_or_else(|| now.date_naive()),
    };
    let fire_at = localize(&tz, date.and_time(time))?;
    if fire_at <= now.timestamp() {
        return Err(InputError::InPast);
    }
    edited.fire_at = fire_at;
    Ok(edited)
}

/// The instant `minutes` from `now`, rejected unless it is a real future date.
pub fn minutes_ahead<Tz: TimeZone>(minutes: i64, now: &DateTime<Tz>) -> Result<i64, InputError> {
    if minutes <= 0 {
        return Err(InputError::NonPositiveMinutes);
    }
    minutes_from(now.timestamp(), minutes)
        .filter(|&fire_at| now.timezone().timestamp_opt(fire_at, 0).single().is_some())
        .ok_or(InputError::TooFar(minutes))
}

/// Countdown task `minutes` from now.
pub fn timer_task<Tz: TimeZone>(
    message: &str,
    minutes: i64,
    now: &DateTime<Tz>,
) -> Result<Task, InputError> {
    let message = non_empty(message)?;
    let fire_at = minutes_ahead(minutes, now)?;
    Ok(Task::new(message, fire_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn new_task_in_the_future_is_kept() {
        let now = at(2026, 10, 19, 9, 0);
        let task = new_task("  stand-up  ", "09:30", Some("19-10-2026"), &now).unwrap();
        assert_eq!(task.message, "stand-up");
        assert_eq!(task.fire_at, at(2026, 10, 19, 9, 30).timestamp());
        assert!(task.id.is_some());
    }

    #[test]
    fn new_task_in_the_past_rolls_to_tomorrow() {
        let now = at(2026, 10, 19, 9, 0);
        let task = new_task("coffee", "08:15", None, &now).unwrap();
        assert_eq!(task.fire_at, at(2026, 10, 20, 8, 15).timestamp());

        let exactly_now = new_task("coffee", "09:00", None, &now).unwrap();
        assert_eq!(exactly_now.fire_at, at(2026, 10, 20, 9, 0).timestamp());
    }

    #[test]
    fn bad_fields_are_rejected() {
        let now = at(2026, 10, 19, 9, 0);
        assert_eq!(
            new_task("", "10:00", None, &now).unwrap_err(),
            InputError::EmptyMessage
        );
        assert_eq!(
            new_task("x", "25:00", None, &now).unwrap_err(),
            InputError::BadTime("25:00".into())
        );
        assert_eq!(
            new_task("x", "10:00", Some("2026-10-19"), &now).unwrap_err(),
            InputError::BadDate("2026-10-19".into())
        );
    }

    #[test]
    fn edit_refuses_the_past() {
        let now = at(2026, 10, 19, 9, 0);
        let task = Task::new("report", at(2026, 10, 19, 12, 0).timestamp());
        let err = edited_task(&task, None, Some("08:00"), None, &now).unwrap_err();
        assert_eq!(err, InputError::InPast);
    }

    #[test]
    fn edit_keeps_identity_and_unset_fields() {
        let now = at(2026, 10, 19, 9, 0);
        let mut task = Task::new("report", at(2026, 10, 19, 12, 0).timestamp());
        task.extra.insert("color".into(), "blue".into());

        let moved = edited_task(&task, Some(""), None, Some("21-10-2026"), &now).unwrap();
        assert_eq!(moved.id, task.id);
        assert_eq!(moved.message, "report");
        assert_eq!(moved.fire_at, at(2026, 10, 21, 12, 0).timestamp());
        assert_eq!(moved.extra, task.extra);

        let renamed = edited_task(&task, Some("final report"), None, None, &now).unwrap();
        assert_eq!(renamed.message, "final report");
        assert_eq!(renamed.fire_at, task.fire_at);
    }

    #[test]
    fn timers_count_minutes_from_now() {
        let now = at(2026, 10, 19, 9, 0);
        let task = timer_task("tea", 3, &now).unwrap();
        assert_eq!(task.fire_at, now.timestamp() + 180);
        assert_eq!(
            timer_task("tea", 0, &now).unwrap_err(),
            InputError::NonPositiveMinutes
        );
    }

    #[test]
    fn absurd_minute_counts_are_rejected() {
        let now = at(2026, 10, 19, 9, 0);
        assert_eq!(
            timer_task("tea", i64::MAX / 2, &now).unwrap_err(),
            InputError::TooFar(i64::MAX / 2)
        );
        // fits in i64 but lies beyond any calendar date
        assert_eq!(
            minutes_ahead(i64::MAX / 120, &now).unwrap_err(),
            InputError::TooFar(i64::MAX / 120)
        );
        assert_eq!(minutes_ahead(5, &now), Ok(now.timestamp() + 300));
    }
}
