// src/merge.rs
//
// Reconciles extractor output into a record. Extractors only ever touch
// `InvoiceRecord::detail`; header fields come from the table and stay put.

use crate::calendar::{billed_month, days_between, parse_date};
use crate::model::{
    BillingDetail, Discrepancy, FieldKind, FieldValue, InvoiceRecord, PortalVariant, field,
    parse_amount, round2,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct MergeReport {
    /// Fields that were unset and took the proposed value.
    pub filled: Vec<&'static str>,
    /// Proposals equal to what the record already held.
    pub agreed: usize,
    pub discrepancies: Vec<Discrepancy>,
    /// Empty proposals and values that did not convert.
    pub skipped: usize,
    /// Names outside the detail schema (header fields included).
    pub ignored: Vec<String>,
}

/// Merge a flat `field -> value` proposal map into `detail`.
///
/// Unset fields take the proposal. Set fields keep their value; a differing
/// proposal is recorded as a discrepancy.
pub fn apply_proposals(detail: &mut BillingDetail, proposals: &Map<String, Value>) -> MergeReport {
    let mut report = MergeReport::default();

    for (name, raw) in proposals {
        if is_empty_proposal(raw) {
            report.skipped += 1;
            continue;
        }
        let Some(f) = field(name) else {
            report.ignored.push(name.clone());
            continue;
        };
        let Some(proposed) = to_field_value(f.kind, raw) else {
            debug!(field = f.name, value = %raw, "Proposal does not convert");
            report.skipped += 1;
            continue;
        };

        match f.get(detail) {
            None => {
                if f.set(detail, proposed) {
                    report.filled.push(f.name);
                } else {
                    report.skipped += 1;
                }
            }
            Some(current) if same_value(f.kind, &current, &proposed) => report.agreed += 1,
            Some(current) => {
                warn!(
                    field = f.name,
                    kept = %current,
                    proposed = %proposed,
                    "Extractors disagree; keeping existing value"
                );
                report.discrepancies.push(Discrepancy {
                    field: f.name.to_string(),
                    kept: current.to_string(),
                    proposed: proposed.to_string(),
                });
            }
        }
    }

    report
}

fn is_empty_proposal(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => {
            let s = s.trim();
            s.is_empty() || s.eq_ignore_ascii_case("null")
        }
        _ => false,
    }
}

fn to_field_value(kind: FieldKind, value: &Value) -> Option<FieldValue> {
    match (kind, value) {
        (FieldKind::Text, Value::String(s)) => Some(FieldValue::Text(s.trim().to_string())),
        (FieldKind::Text, other) => Some(FieldValue::Text(other.to_string())),
        (FieldKind::Days, Value::Number(n)) => n
            .as_f64()
            .and_then(|v| FieldValue::Number(v).as_u32())
            .map(FieldValue::Integer),
        (FieldKind::Days, Value::String(s)) => s.trim().parse().ok().map(FieldValue::Integer),
        (FieldKind::Money | FieldKind::Quantity, Value::Number(n)) => n.as_f64().map(FieldValue::Number),
        (FieldKind::Money | FieldKind::Quantity, Value::String(s)) => {
            parse_amount(s).map(FieldValue::Number)
        }
        _ => None,
    }
}

fn same_value(kind: FieldKind, a: &FieldValue, b: &FieldValue) -> bool {
    match kind {
        FieldKind::Money => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => round2(x) == round2(y),
            _ => false,
        },
        FieldKind::Quantity => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() < 1e-6,
            _ => false,
        },
        FieldKind::Days => a.as_u32() == b.as_u32(),
        FieldKind::Text => a.as_text().trim() == b.as_text().trim(),
    }
}

/// Rounded sum of the components that are set; `None` when none are.
fn sum_of(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        None
    } else {
        Some(round2(present.iter().sum()))
    }
}

/// Per-period totals of a structured-text extraction.
pub fn period_totals(d: &mut BillingDetail) {
    let power = [d.power_p1, d.power_p2, d.power_p3, d.power_p4, d.power_p5, d.power_p6];
    if let Some(total) = sum_of(&power) {
        d.power_amount = Some(total);
    }

    let consumption = [
        d.consumption_cost_p1,
        d.consumption_cost_p2,
        d.consumption_cost_p3,
        d.consumption_cost_p4,
        d.consumption_cost_p5,
        d.consumption_cost_p6,
        d.indexed_energy_p1,
        d.indexed_energy_p2,
        d.indexed_energy_p3,
        d.indexed_energy_p4,
        d.indexed_energy_p5,
        d.indexed_energy_p6,
    ];
    if let Some(total) = sum_of(&consumption) {
        d.consumption_amount = Some(total);
    }

    let excess = [
        d.excess_power_p1,
        d.excess_power_p2,
        d.excess_power_p3,
        d.excess_power_p4,
        d.excess_power_p5,
        d.excess_power_p6,
    ];
    if let Some(total) = sum_of(&excess) {
        d.excess_power_amount = Some(total);
    }

    let kwh = [
        d.consumption_kwh_p1,
        d.consumption_kwh_p2,
        d.consumption_kwh_p3,
        d.consumption_kwh_p4,
        d.consumption_kwh_p5,
        d.consumption_kwh_p6,
    ];
    if let Some(total) = sum_of(&kwh) {
        d.total_kwh = Some(total);
    }
}

/// Recompute derived fields from whatever components are now set. A derived
/// field is only overwritten when at least one of its inputs is present.
///
/// Money components are rounded to cents first, so every total equals the
/// rounded sum of the components as they are exported.
pub fn recompute_derived(record: &mut InvoiceRecord, variant: PortalVariant) {
    let start = parse_date(&record.header.period_start);
    let end = parse_date(&record.header.period_end);
    let d = &mut record.detail;
    d.round_money();

    if let (Some(start), Some(end)) = (start, end) {
        d.days = Some(days_between(start, end));
    }
    if let Some(month) = billed_month(&record.header.period_end) {
        d.billed_month = Some(month.to_string());
    }

    match variant {
        PortalVariant::Client => period_totals(d),
        PortalVariant::Distribution => {
            period_totals(d);
            if let Some(total) = sum_of(&[d.power_toll, d.power_charges]) {
                d.power_amount = Some(total);
            }
            if let Some(total) = sum_of(&[d.energy_toll, d.energy_charges]) {
                d.atr_amount = Some(total);
            }
        }
    }
}

/// Last step before a record leaves the row loop.
pub fn finalize(record: &mut InvoiceRecord) {
    record.detail.round_money();
}
