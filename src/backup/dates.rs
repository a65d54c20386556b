// ABOUTME: Normalizes date strings read from CSV files into MySQL DATETIME text
// ABOUTME: Accepts canonical, date-only, ISO 8601, JavaScript Date, and M/D/YYYY forms

use crate::model::DATETIME_FORMAT;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};

/// Result of normalizing one date string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedDate {
    /// Rewritten into `YYYY-MM-DD HH:MM:SS` (or already in that form).
    Canonical(String),
    /// Not recognised; the original text is passed through.
    Unrecognised(String),
}

impl NormalizedDate {
    pub fn into_string(self) -> String {
        match self {
            NormalizedDate::Canonical(s) | NormalizedDate::Unrecognised(s) => s,
        }
    }
}

/// Normalize a date or datetime string into `YYYY-MM-DD HH:MM:SS`.
///
/// Strings carrying a zone (ISO 8601 with an offset or `Z`, JavaScript
/// `Date` strings with `GMT`) are converted to local time.
///
/// # Examples
///
/// ```
/// # use table_replicator::backup::dates::{normalize_datetime, NormalizedDate};
/// assert_eq!(
///     normalize_datetime("2024-01-15"),
///     NormalizedDate::Canonical("2024-01-15 00:00:00".to_string())
/// );
/// assert_eq!(
///     normalize_datetime("1/5/2024"),
///     NormalizedDate::Canonical("2024-01-05 00:00:00".to_string())
/// );
/// ```
pub fn normalize_datetime(input: &str) -> NormalizedDate {
    let text = input.trim();

    if NaiveDateTime::parse_from_str(text, DATETIME_FORMAT).is_ok() && text.len() == 19 {
        return NormalizedDate::Canonical(text.to_string());
    }

    if text.len() == 10 {
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return NormalizedDate::Canonical(midnight(date));
        }
    }

    if text.contains("GMT") {
        if let Some(local) = parse_js_date(text) {
            return NormalizedDate::Canonical(local);
        }
    }

    if text.contains('T') || text.ends_with('Z') {
        if let Some(local) = parse_iso(text) {
            return NormalizedDate::Canonical(local);
        }
    }

    if let Some(formatted) = parse_month_day_year(text) {
        return NormalizedDate::Canonical(formatted);
    }

    NormalizedDate::Unrecognised(text.to_string())
}

fn midnight(date: NaiveDate) -> String {
    format!("{} 00:00:00", date.format("%Y-%m-%d"))
}

/// `Mon Jan 15 2024 10:30:00 GMT+0000 (Coordinated Universal Time)`
fn parse_js_date(text: &str) -> Option<String> {
    let without_zone_name = match text.find(" (") {
        Some(pos) => &text[..pos],
        None => text,
    };
    DateTime::parse_from_str(without_zone_name, "%a %b %d %Y %H:%M:%S GMT%z")
        .ok()
        .map(|dt| dt.with_timezone(&Local).format(DATETIME_FORMAT).to_string())
}

fn parse_iso(text: &str) -> Option<String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Local).format(DATETIME_FORMAT).to_string());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|dt| dt.format(DATETIME_FORMAT).to_string())
}

/// `M/D/YYYY` or `M-D-YYYY`, optionally followed by a time.
fn parse_month_day_year(text: &str) -> Option<String> {
    let (date_part, time_part) = match text.split_once(' ') {
        Some((d, t)) => (d, Some(t.trim())),
        None => (text, None),
    };
    let normalized = date_part.replace('-', "/");
    let date = NaiveDate::parse_from_str(&normalized, "%m/%d/%Y").ok()?;
    match time_part {
        None => Some(midnight(date)),
        Some(time) => ["%H:%M:%S", "%H:%M"]
            .iter()
            .find_map(|fmt| chrono::NaiveTime::parse_from_str(time, fmt).ok())
            .map(|t| date.and_time(t).format(DATETIME_FORMAT).to_string()),
    }
}
