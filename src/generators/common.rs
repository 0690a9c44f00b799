//! Common utilities for invoice generation.
//!
//! Date parsing and display, file name sanitizing and XML escaping.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use sanitize_filename::{sanitize_with_options, Options};
use std::ops::RangeInclusive;

/// Display format of dates on the invoice (`19/10/26`).
pub const DISPLAY_DATE_FORMAT: &str = "%d/%m/%y";
/// Display format of times on the invoice (`14:00`).
pub const DISPLAY_TIME_FORMAT: &str = "%H:%M";
/// Date format used by HTML date inputs.
pub const FORM_DATE_FORMAT: &str = "%Y-%m-%d";

const ACCEPTED_DATE_FORMATS: [&str; 3] = [FORM_DATE_FORMAT, "%d.%m.%Y", "%d.%m.%Y."];

/// Years an invoice date may fall in; archive folders are four digits.
pub const SUPPORTED_YEARS: RangeInclusive<i32> = 1000..=9999;

/// Truncate a timestamp to the start of its hour.
pub fn round_down_hour(dt: NaiveDateTime) -> NaiveDateTime {
    dt.date()
        .and_hms_opt(dt.hour(), 0, 0)
        .unwrap_or(dt)
}

/// Parse a date typed into the form. Dates outside [`SUPPORTED_YEARS`] are
/// rejected; `%Y` alone would accept signed years of any length.
pub fn parse_form_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    ACCEPTED_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .filter(|date| SUPPORTED_YEARS.contains(&date.year()))
}

/// Parse a `HH:MM` time typed into the form.
pub fn parse_form_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), DISPLAY_TIME_FORMAT).ok()
}

pub fn format_display_date(date: NaiveDate) -> String {
    date.format(DISPLAY_DATE_FORMAT).to_string()
}

pub fn format_display_date_time(dt: NaiveDateTime) -> String {
    format!(
        "{} {}",
        dt.format(DISPLAY_DATE_FORMAT),
        dt.format(DISPLAY_TIME_FORMAT)
    )
}

/// Default due date: `days` after the invoice date. `None` when the result
/// is not a representable date.
pub fn default_due_date(invoice_date: NaiveDate, days: i64) -> Option<NaiveDate> {
    TimeDelta::try_days(days).and_then(|delta| invoice_date.checked_add_signed(delta))
}

/// Client name as it appears in archive file names: whitespace removed,
/// separators and other unsafe characters replaced by `_`.
pub fn sanitize_client_name(name: &str) -> String {
    let compact: String = name.chars().filter(|c| !c.is_whitespace()).collect();
    let options = Options {
        replacement: "_",
        ..Options::default()
    };
    let sanitized = sanitize_with_options(compact, options);
    let sanitized = sanitized.trim_start_matches('.');

    if sanitized.is_empty() {
        return "client".to_string();
    }
    sanitized.to_string()
}

/// Invoice number as it appears in archive file names (`3/2/2` -> `3-2-2`).
pub fn sanitize_invoice_number(number: &str) -> String {
    let dashed = number.trim().replace(['/', '\\'], "-");
    let compact: String = dashed.chars().filter(|c| !c.is_whitespace()).collect();
    let sanitized = sanitize_with_options(compact, Options {
        replacement: "_",
        ..Options::default()
    });

    if sanitized.trim_matches('.').is_empty() {
        return "invoice".to_string();
    }
    sanitized
}

/// Escape text for inclusion in XML character data or attribute values.
pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}
