#![forbid(unsafe_code)]

//! Resolves per-target date parameters into an inclusive, API-compliant
//! publication window.

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeDelta, Utc,
};
use serde::Serialize;

use crate::error::WindowError;

/// Longest span a single harvest window may cover.
pub const MAX_WINDOW_DAYS: i64 = 7;

/// Inclusive `[start, end]` publication range, always normalized to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateWindow {
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }

    /// True when `instant` predates the window; the listing is newest-first,
    /// so such an item means no later page can hold in-window items.
    pub fn is_before_start(&self, instant: DateTime<Utc>) -> bool {
        instant < self.start
    }

    pub fn start_iso(&self) -> String {
        to_iso(self.start)
    }

    pub fn end_iso(&self) -> String {
        to_iso(self.end)
    }
}

/// The shape of date input a target supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowRequest {
    Range { start: String, end: String },
    SingleDate(String),
    Yesterday,
}

impl WindowRequest {
    /// Builds a request from the raw optional descriptor fields, rejecting
    /// combinations that do not describe exactly one kind of window.
    pub fn from_parts(
        start: Option<&str>,
        end: Option<&str>,
        single: Option<&str>,
    ) -> Result<Self, WindowError> {
        let start = start.map(str::trim).filter(|value| !value.is_empty());
        let end = end.map(str::trim).filter(|value| !value.is_empty());
        let single = single.map(str::trim).filter(|value| !value.is_empty());

        match (start, end, single) {
            (None, None, None) => Ok(WindowRequest::Yesterday),
            (None, None, Some(single)) => Ok(WindowRequest::SingleDate(single.to_string())),
            (Some(start), Some(end), None) => Ok(WindowRequest::Range {
                start: start.to_string(),
                end: end.to_string(),
            }),
            (Some(_), None, None) => Err(WindowError::Incomplete { missing: "dateEnd" }),
            (None, Some(_), None) => Err(WindowError::Incomplete {
                missing: "dateStart",
            }),
            (_, _, Some(_)) => Err(WindowError::Contradictory),
        }
    }
}

/// Resolves a request into a window. `Ok(None)` is the "no valid window"
/// outcome for ranges whose start lies after their end.
pub fn resolve(
    request: &WindowRequest,
    today: NaiveDate,
) -> Result<Option<DateWindow>, WindowError> {
    match request {
        WindowRequest::Range { start, end } => {
            let start = parse_timestamp("dateStart", start)?;
            let end = parse_timestamp("dateEnd", end)?;
            Ok(clamp_range(start, end))
        }
        WindowRequest::SingleDate(value) => {
            let anchor = parse_timestamp_with_offset("singleDate", value)?;
            let offset = *anchor.offset();
            let date = anchor.date_naive();
            let start = at_offset(date, NaiveTime::MIN, offset);
            let end = at_offset(date, end_of_day(), offset);
            Ok(Some(DateWindow { start, end }))
        }
        WindowRequest::Yesterday => {
            let date = today.pred_opt().unwrap_or(today);
            let start = date.and_time(NaiveTime::MIN).and_utc();
            let end = date.and_time(end_of_day()).and_utc();
            Ok(Some(DateWindow { start, end }))
        }
    }
}

/// Validates `start <= end` and caps the span at [`MAX_WINDOW_DAYS`].
pub fn clamp_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<DateWindow> {
    if start > end {
        return None;
    }
    let limit = start + TimeDelta::days(MAX_WINDOW_DAYS);
    Some(DateWindow {
        start,
        end: end.min(limit),
    })
}

/// Parses an ISO 8601 timestamp into UTC. Values without an offset are read
/// as UTC, bare dates as midnight UTC.
pub fn parse_utc(value: &str) -> Option<DateTime<Utc>> {
    parse_fixed(value).map(|instant| instant.with_timezone(&Utc))
}

pub fn to_iso(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, WindowError> {
    parse_utc(value).ok_or_else(|| WindowError::Unparsable {
        field,
        value: value.to_string(),
    })
}

fn parse_timestamp_with_offset(
    field: &'static str,
    value: &str,
) -> Result<DateTime<FixedOffset>, WindowError> {
    parse_fixed(value).ok_or_else(|| WindowError::Unparsable {
        field,
        value: value.to_string(),
    })
}

fn parse_fixed(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Some(instant);
    }
    let utc = FixedOffset::east_opt(0)?;
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.and_local_timezone(utc).single();
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_time(NaiveTime::MIN).and_local_timezone(utc).single();
    }
    None
}

fn at_offset(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    // Fixed offsets have no gaps, so the local time always maps to one instant.
    let local = date.and_time(time);
    (local - offset).and_utc()
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}
