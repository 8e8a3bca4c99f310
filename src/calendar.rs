// src/calendar.rs

use time::macros::format_description;
use time::{Date, Month};

/// Month names as printed on the invoices.
const MONTH_NAMES: [&str; 12] = [
    "ENERO",
    "FEBRERO",
    "MARZO",
    "ABRIL",
    "MAYO",
    "JUNIO",
    "JULIO",
    "AGOSTO",
    "SEPTIEMBRE",
    "OCTUBRE",
    "NOVIEMBRE",
    "DICIEMBRE",
];

pub fn month_name(month: Month) -> &'static str {
    MONTH_NAMES[u8::from(month) as usize - 1]
}

/// Parse the date shapes the portal and its documents use:
/// `DD/MM/YYYY`, `DD-MM-YYYY` and ISO `YYYY-MM-DD` (a trailing time part is ignored).
pub fn parse_date(raw: &str) -> Option<Date> {
    let raw = raw.trim();
    let raw = raw.split(['T', ' ']).next().unwrap_or(raw);
    if raw.len() != 10 {
        return None;
    }

    if raw.as_bytes()[4] == b'-' {
        return Date::parse(raw, format_description!("[year]-[month]-[day]")).ok();
    }

    let normalized = raw.replace('-', "/");
    Date::parse(&normalized, format_description!("[day]/[month]/[year]")).ok()
}

/// Format a date the way the portal's filter inputs expect it.
pub fn format_portal_date(date: Date) -> String {
    date.format(format_description!("[day]/[month]/[year]"))
        .unwrap_or_default()
}

/// Absolute difference in whole days.
pub fn days_between(a: Date, b: Date) -> u32 {
    (b - a).whole_days().unsigned_abs() as u32
}

/// Month name of a raw date, if it parses.
pub fn billed_month(raw: &str) -> Option<&'static str> {
    parse_date(raw).map(|d| month_name(d.month()))
}
