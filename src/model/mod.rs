// src/model/mod.rs

mod fields;

pub use fields::{FIELDS, Field, FieldKind, FieldValue, field};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Which portal a record (and a run) belongs to. The two share the
/// pipeline but differ in table layout, documents and export columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortalVariant {
    /// Commercial portal: one implicit entity, XML invoices.
    #[default]
    Client,
    /// Distribution portal: switchable roles, PDF invoices, per-row error flag.
    Distribution,
}

impl PortalVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortalVariant::Client => "client",
            PortalVariant::Distribution => "distribution",
        }
    }
}

/// Fields read synchronously from the results table. Extractors never
/// write these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceHeader {
    pub emission_date: String,
    pub invoice_number: String,
    pub period_start: String,
    pub period_end: String,
    pub table_amount: Option<f64>,
    pub contract: String,
    pub cups: String,
    pub sequence: String,
    pub status: String,
    pub installment: String,
    pub invoice_type: String,
    /// Opaque per-row value used to locate the row's download buttons.
    /// Only meaningful within the session that read it.
    #[serde(skip_serializing)]
    pub download_token: String,
}

/// The canonical field schema every extractor writes into.
///
/// `None` means "never observed"; an observed zero is `Some(0.0)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BillingDetail {
    pub billed_month: Option<String>,
    pub tariff: Option<String>,
    pub supply_address: Option<String>,

    pub power_p1: Option<f64>,
    pub power_p2: Option<f64>,
    pub power_p3: Option<f64>,
    pub power_p4: Option<f64>,
    pub power_p5: Option<f64>,
    pub power_p6: Option<f64>,
    pub power_amount: Option<f64>,

    pub days: Option<u32>,
    pub consumption_kwh_p1: Option<f64>,
    pub consumption_kwh_p2: Option<f64>,
    pub consumption_kwh_p3: Option<f64>,
    pub consumption_kwh_p4: Option<f64>,
    pub consumption_kwh_p5: Option<f64>,
    pub consumption_kwh_p6: Option<f64>,
    pub total_kwh: Option<f64>,

    pub consumption_cost_p1: Option<f64>,
    pub consumption_cost_p2: Option<f64>,
    pub consumption_cost_p3: Option<f64>,
    pub consumption_cost_p4: Option<f64>,
    pub consumption_cost_p5: Option<f64>,
    pub consumption_cost_p6: Option<f64>,

    pub indexed_energy_p1: Option<f64>,
    pub indexed_energy_p2: Option<f64>,
    pub indexed_energy_p3: Option<f64>,
    pub indexed_energy_p4: Option<f64>,
    pub indexed_energy_p5: Option<f64>,
    pub indexed_energy_p6: Option<f64>,
    pub consumption_amount: Option<f64>,

    pub social_bonus: Option<f64>,
    pub electricity_tax: Option<f64>,
    pub meter_rental: Option<f64>,
    pub other_charges: Option<f64>,

    pub excess_power_p1: Option<f64>,
    pub excess_power_p2: Option<f64>,
    pub excess_power_p3: Option<f64>,
    pub excess_power_p4: Option<f64>,
    pub excess_power_p5: Option<f64>,
    pub excess_power_p6: Option<f64>,
    pub excess_power_amount: Option<f64>,

    pub reactive_amount: Option<f64>,
    pub taxable_base: Option<f64>,
    pub invoiced_amount: Option<f64>,
    pub due_date: Option<String>,
    pub total_amount: Option<f64>,
    pub settlement_date: Option<String>,

    pub power_toll: Option<f64>,
    pub power_charges: Option<f64>,
    pub energy_toll: Option<f64>,
    pub energy_charges: Option<f64>,
    pub atr_amount: Option<f64>,
}

impl BillingDetail {
    /// Copy every observed field of `other` over `self`.
    pub fn overlay(&mut self, other: &BillingDetail) {
        for f in FIELDS {
            if let Some(value) = f.get(other) {
                f.set(self, value);
            }
        }
    }

    /// Round all monetary fields to cents.
    pub fn round_money(&mut self) {
        for f in FIELDS.iter().filter(|f| f.kind == FieldKind::Money) {
            if let Some(FieldValue::Number(v)) = f.get(self) {
                f.set(self, FieldValue::Number(round2(v)));
            }
        }
    }

    /// How many fields hold a value, out of the full schema.
    pub fn coverage(&self) -> (usize, usize) {
        let filled = FIELDS.iter().filter(|f| f.get(self).is_some()).count();
        (filled, FIELDS.len())
    }
}

/// A value seen in one extractor that disagrees with what the record already
/// holds. The record keeps `kept`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub field: String,
    pub kept: String,
    pub proposed: String,
}

/// One result row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    #[serde(flatten)]
    pub header: InvoiceHeader,
    #[serde(flatten)]
    pub detail: BillingDetail,
    pub error: bool,
    pub diagnostic: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discrepancies: Vec<Discrepancy>,
}

impl InvoiceRecord {
    pub fn from_header(header: InvoiceHeader) -> Self {
        Self {
            header,
            ..Default::default()
        }
    }

    /// Set the error flag and append `message` to the diagnostic.
    pub fn flag(&mut self, message: impl AsRef<str>) {
        self.error = true;
        if !self.diagnostic.is_empty() {
            self.diagnostic.push_str("; ");
        }
        self.diagnostic.push_str(message.as_ref());
    }

    /// File-name key for this row's documents.
    ///
    /// Rows without an invoice number are keyed by their download token and
    /// dates instead, so they do not overwrite each other's files.
    pub fn document_key(&self) -> (&str, Cow<'_, str>) {
        let h = &self.header;
        let cups = if h.cups.is_empty() { "SIN_CUPS" } else { h.cups.as_str() };
        if !h.invoice_number.is_empty() {
            return (cups, Cow::Borrowed(h.invoice_number.as_str()));
        }
        let parts: Vec<&str> = [&h.download_token, &h.emission_date, &h.period_start, &h.period_end]
            .into_iter()
            .map(String::as_str)
            .filter(|p| !p.is_empty())
            .collect();
        (cups, Cow::Owned(format!("SIN_NUMERO_{}", parts.join("_"))))
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Parse an amount as printed by the portal or its documents:
/// `1.234,56 €`, `-12,30`, `98.07`, `1,234.56`.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => cleaned.replace(',', "."),
        _ => cleaned,
    };
    normalized.parse().ok()
}

/// Supply-point identifier check for ids read from the results table:
/// two letters then 18 to 20 alphanumerics.
pub fn is_valid_cups(cups: &str) -> bool {
    let bytes = cups.as_bytes();
    (20..=22).contains(&bytes.len())
        && bytes[..2].iter().all(u8::is_ascii_uppercase)
        && bytes[2..]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_european_and_plain_amounts() {
        assert_eq!(parse_amount("1.234,56 €"), Some(1234.56));
        assert_eq!(parse_amount("-12,30"), Some(-12.30));
        assert_eq!(parse_amount("98.07"), Some(98.07));
        assert_eq!(parse_amount("1,234.56"), Some(1234.56));
        assert_eq!(parse_amount("—"), None);
    }

    #[test]
    fn round_money_leaves_quantities_alone() {
        let mut d = BillingDetail {
            power_p1: Some(10.005_1),
            consumption_kwh_p1: Some(123.456),
            ..Default::default()
        };
        d.round_money();
        assert_eq!(d.power_p1, Some(10.01));
        assert_eq!(d.consumption_kwh_p1, Some(123.456));
    }

    #[test]
    fn rows_without_invoice_number_get_distinct_document_keys() {
        let row = |token: &str, end: &str| {
            InvoiceRecord::from_header(InvoiceHeader {
                cups: "ES0034111300275021NX0F".into(),
                download_token: token.into(),
                emission_date: "05/10/2025".into(),
                period_end: end.into(),
                ..Default::default()
            })
        };
        let a = row("t1", "30/09/2025");
        let b = row("t2", "30/09/2025");
        let c = row("", "31/08/2025");
        assert_eq!(a.document_key().1, "SIN_NUMERO_t1_05/10/2025_30/09/2025");
        assert_ne!(a.document_key(), b.document_key());
        assert_ne!(c.document_key(), row("", "30/09/2025").document_key());

        let mut numbered = row("t1", "30/09/2025");
        numbered.header.invoice_number = "FE25-1".into();
        assert_eq!(numbered.document_key(), ("ES0034111300275021NX0F", Cow::Borrowed("FE25-1")));
        numbered.header.cups.clear();
        assert_eq!(numbered.document_key().0, "SIN_CUPS");
    }

    #[test]
    fn overlay_copies_only_observed_fields() {
        let mut base = BillingDetail {
            tariff: Some("3.0TD".into()),
            power_p1: Some(1.0),
            ..Default::default()
        };
        let other = BillingDetail {
            power_p1: Some(0.0),
            days: Some(30),
            ..Default::default()
        };
        base.overlay(&other);
        assert_eq!(base.tariff.as_deref(), Some("3.0TD"));
        assert_eq!(base.power_p1, Some(0.0));
        assert_eq!(base.days, Some(30));
    }

    #[test]
    fn flag_accumulates_diagnostics() {
        let mut r = InvoiceRecord::default();
        r.flag("first");
        r.flag("second");
        assert!(r.error);
        assert_eq!(r.diagnostic, "first; second");
    }

    #[test]
    fn cups_shape() {
        assert!(is_valid_cups("ES0034111300275021NX0F"));
        assert!(is_valid_cups("ES0034111300275021NX"));
        assert!(!is_valid_cups("es0034111300275021NX0F"));
        assert!(!is_valid_cups("ES00341113"));
    }
}
