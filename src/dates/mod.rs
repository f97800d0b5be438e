//! Date parsing, formatting and arithmetic helpers.
//!
//! Formatting goes through `write!` so a bad strftime pattern surfaces as a
//! `DateError` instead of a panic.

pub mod holidays;

use chrono::{
    DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday,
};
use std::fmt::{Display, Write};
use thiserror::Error;

pub use holidays::{calendar_for, HolidayCalendar, IrishHolidays};

pub const DEFAULT_INPUT_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_DISPLAY_FORMAT: &str = "%A, %B %e, %Y";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DateError {
    #[error("Please enter a valid datetime in format 'YYYY-MM-DDTHH:mm'")]
    InvalidDatetime(String),

    #[error("Invalid date format '{0}'")]
    InvalidFormat(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Date out of range")]
    OutOfRange,
}

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];

/// Accepts ISO-8601 datetimes (with or without offset) and plain dates.
pub fn validate(datetime_str: &str) -> Result<(), DateError> {
    parse(datetime_str).map(|_| ())
}

/// Parses a datetime; naive values are taken as UTC and bare dates as midnight.
pub fn parse(datetime_str: &str) -> Result<DateTime<Utc>, DateError> {
    let s = datetime_str.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Ok(Utc.from_utc_datetime(&naive));
            }
        }
    }
    Err(DateError::InvalidDatetime(datetime_str.to_string()))
}

pub fn parse_date(date_str: &str) -> Result<NaiveDate, DateError> {
    parse(date_str).map(|dt| dt.date_naive())
}

/// Re-renders a date string from `current_format` into `new_format`.
pub fn format_string(date_string: &str, current_format: &str, new_format: &str) -> Result<String, DateError> {
    let date = NaiveDate::parse_from_str(date_string, current_format)
        .map_err(|_| DateError::InvalidDate(date_string.to_string()))?;
    format_date(date, new_format)
}

/// Formats a datetime; `{S}` expands to the day with its ordinal suffix ("3rd").
pub fn format<Tz>(date: &DateTime<Tz>, new_format: &str) -> Result<String, DateError>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut out = String::new();
    write!(out, "{}", date.format(new_format)).map_err(|_| DateError::InvalidFormat(new_format.to_string()))?;
    Ok(expand_suffix(out, date.day()))
}

pub fn format_date(date: NaiveDate, new_format: &str) -> Result<String, DateError> {
    let mut out = String::new();
    write!(out, "{}", date.format(new_format)).map_err(|_| DateError::InvalidFormat(new_format.to_string()))?;
    Ok(expand_suffix(out, date.day()))
}

fn expand_suffix(formatted: String, day: u32) -> String {
    if formatted.contains("{S}") {
        formatted.replace("{S}", &format!("{}{}", day, suffix(day)))
    } else {
        formatted
    }
}

pub fn suffix(day: u32) -> &'static str {
    if (11..=13).contains(&day) {
        return "th";
    }
    match day % 10 {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}

pub fn create_date(day: u32, month: u32, year: i32) -> Result<NaiveDate, DateError> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| DateError::InvalidDate(format!("{:04}-{:02}-{:02}", year, month, day)))
}

/// Full weekday name, e.g. "Monday".
pub fn day(date: NaiveDate) -> &'static str {
    match date.weekday() {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn today() -> NaiveDate {
    now().date_naive()
}

pub fn tomorrow() -> Result<NaiveDate, DateError> {
    days_later(today(), 1)
}

pub fn yesterday() -> Result<NaiveDate, DateError> {
    days_ago(1, today())
}

pub fn days_ago(days: u64, date: NaiveDate) -> Result<NaiveDate, DateError> {
    date.checked_sub_days(Days::new(days)).ok_or(DateError::OutOfRange)
}

pub fn days_later(date: NaiveDate, day_count: u64) -> Result<NaiveDate, DateError> {
    date.checked_add_days(Days::new(day_count)).ok_or(DateError::OutOfRange)
}

/// Calendar month arithmetic; the day clamps to the end of a shorter month.
pub fn months_ago(months: u32, date: NaiveDate) -> Result<NaiveDate, DateError> {
    date.checked_sub_months(Months::new(months)).ok_or(DateError::OutOfRange)
}

pub fn months_later(months: u32, date: NaiveDate) -> Result<NaiveDate, DateError> {
    date.checked_add_months(Months::new(months)).ok_or(DateError::OutOfRange)
}

pub fn start_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn end_of_month(date: NaiveDate) -> NaiveDate {
    start_of_month(date)
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(date)
}

pub fn start_of_current_month() -> NaiveDate {
    start_of_month(today())
}

pub fn end_of_current_month() -> NaiveDate {
    end_of_month(today())
}

/// Weekend or a public holiday in the configured country.
pub fn is_holiday(date: NaiveDate) -> bool {
    is_holiday_in(date, &crate::config::config().dates.holiday_country)
}

pub fn is_holiday_in(date: NaiveDate, country: &str) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun) || calendar_for(country).is_holiday(date)
}

/// Steps back from `date` until `day_count` working days have been passed.
pub fn days_ago_excluding_holidays(day_count: u32, date: NaiveDate) -> Result<NaiveDate, DateError> {
    let mut current = date;
    let mut count = 0;
    while count < day_count {
        current = days_ago(1, current)?;
        if !is_holiday(current) {
            count += 1;
        }
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn validate_accepts_common_shapes() {
        assert!(validate("2024-03-01T10:30").is_ok());
        assert!(validate("2024-03-01T10:30:00Z").is_ok());
        assert!(validate("2024-03-01 10:30:00").is_ok());
        assert!(validate("2024-03-01").is_ok());

        let err = validate("yesterday-ish").unwrap_err();
        assert_eq!(err.to_string(), "Please enter a valid datetime in format 'YYYY-MM-DDTHH:mm'");
    }

    #[test]
    fn parse_normalizes_offsets() {
        let dt = parse("2024-03-01T10:30:00+02:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T08:30:00+00:00");
        assert_eq!(parse_date("2024-03-01T23:00:00").unwrap(), date(2024, 3, 1));
    }

    #[test]
    fn ordinal_suffixes() {
        assert_eq!(suffix(1), "st");
        assert_eq!(suffix(2), "nd");
        assert_eq!(suffix(3), "rd");
        assert_eq!(suffix(11), "th");
        assert_eq!(suffix(12), "th");
        assert_eq!(suffix(13), "th");
        assert_eq!(suffix(22), "nd");
        assert_eq!(suffix(31), "st");
    }

    #[test]
    fn formatting() {
        assert_eq!(
            format_string("2024-03-01", DEFAULT_INPUT_FORMAT, DEFAULT_DISPLAY_FORMAT).unwrap(),
            "Friday, March  1, 2024"
        );
        let dt = parse("2024-03-22T09:05:00Z").unwrap();
        assert_eq!(format(&dt, "%A {S} %B").unwrap(), "Friday 22nd March");
        assert_eq!(format(&dt, "%d/%m/%Y, %H:%M").unwrap(), "22/03/2024, 09:05");
        assert!(format_string("01-03-2024", DEFAULT_INPUT_FORMAT, "%Y").is_err());
    }

    #[test]
    fn month_arithmetic() {
        assert_eq!(months_ago(1, date(2024, 3, 31)).unwrap(), date(2024, 2, 29));
        assert_eq!(months_later(12, date(2023, 1, 15)).unwrap(), date(2024, 1, 15));
        assert_eq!(start_of_month(date(2024, 2, 17)), date(2024, 2, 1));
        assert_eq!(end_of_month(date(2024, 2, 17)), date(2024, 2, 29));
        assert_eq!(end_of_month(date(2023, 12, 5)), date(2023, 12, 31));
    }

    #[test]
    fn day_offsets_and_names() {
        assert_eq!(days_ago(3, date(2024, 3, 1)).unwrap(), date(2024, 2, 27));
        assert_eq!(days_later(date(2024, 12, 31), 1).unwrap(), date(2025, 1, 1));
        assert_eq!(day(date(2024, 3, 1)), "Friday");
        assert!(create_date(30, 2, 2024).is_err());
        assert_eq!(create_date(29, 2, 2024).unwrap(), date(2024, 2, 29));
    }

    #[test]
    fn business_days_skip_weekends_and_holidays() {
        assert!(is_holiday_in(date(2024, 3, 16), "IE"));
        assert!(is_holiday_in(date(2024, 3, 17), "XX"));
        assert!(is_holiday_in(date(2024, 3, 18), "IE") == false);
        assert!(is_holiday_in(date(2024, 12, 26), "IE"));

        // Tue 2 Apr 2024: Easter Monday and the weekend are skipped
        assert_eq!(days_ago_excluding_holidays(1, date(2024, 4, 2)).unwrap(), date(2024, 3, 29));
        assert_eq!(days_ago_excluding_holidays(2, date(2024, 4, 2)).unwrap(), date(2024, 3, 28));
    }
}
