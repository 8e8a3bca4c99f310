// src/request.rs

use crate::calendar::{format_portal_date, parse_date};
use crate::error::RequestError;
use regex::Regex;
use std::sync::LazyLock;
use time::Date;

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{2}/\d{2}/\d{4}$").unwrap());
static CUPS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2}[A-Z0-9]{20}$").unwrap());

/// Validated search parameters for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub from: Date,
    pub to: Date,
    pub cups: Option<String>,
}

impl SearchRequest {
    pub fn parse(from: &str, to: &str, cups: Option<&str>) -> Result<Self, RequestError> {
        let from_date = parse_input_date(from)?;
        let to_date = parse_input_date(to)?;
        if from_date > to_date {
            return Err(RequestError::Range {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let cups = match cups.map(str::trim).filter(|c| !c.is_empty()) {
            Some(c) if CUPS_RE.is_match(c) => Some(c.to_string()),
            Some(c) => return Err(RequestError::Cups(c.to_string())),
            None => None,
        };

        Ok(Self {
            from: from_date,
            to: to_date,
            cups,
        })
    }

    pub fn from_text(&self) -> String {
        format_portal_date(self.from)
    }

    pub fn to_text(&self) -> String {
        format_portal_date(self.to)
    }
}

fn parse_input_date(raw: &str) -> Result<Date, RequestError> {
    let raw = raw.trim();
    if !DATE_RE.is_match(raw) {
        return Err(RequestError::Date(raw.to_string()));
    }
    parse_date(raw).ok_or_else(|| RequestError::Date(raw.to_string()))
}
