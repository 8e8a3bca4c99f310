// src/extract/xml.rs
//
// Pattern-based extraction from the structured (XML) invoice. The document
// is treated as text: namespaces are stripped and values are captured by tag
// or by line-item description.

use crate::calendar::billed_month;
use crate::error::ExtractError;
use crate::merge::period_totals;
use crate::model::{BillingDetail, FieldValue, field, parse_amount};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info};

static NAMESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(</?)[A-Za-z_][\w.-]*:").unwrap());

static INVOICE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<InvoiceLine(?:\s[^>]*)?>(.*?)</InvoiceLine>").unwrap());

/// Per-period line items: field prefix and the description printed on the
/// invoice, both completed with the period number.
const PERIOD_LINES: [(&str, &str); 4] = [
    ("power_p", "Pot. P"),
    ("consumption_cost_p", "Consumo P"),
    ("indexed_energy_p", "Energia precio indexado P"),
    ("excess_power_p", "Exceso Pot. P"),
];

const SINGLE_LINES: [(&str, &str); 3] = [
    ("electricity_tax", "Impuesto Electricidad"),
    ("meter_rental", "Alquiler del contador"),
    ("social_bonus", "Bono Social"),
];

/// The source system writes Latin-1.
fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn strip_namespaces(text: &str) -> String {
    NAMESPACE_RE.replace_all(text, "$1").into_owned()
}

/// Trimmed text of the first `<tag>` element.
fn simple_value(content: &str, tag: &str) -> Option<String> {
    let tag = regex::escape(tag);
    let re = Regex::new(&format!(r"(?s)<{tag}(?:\s[^>]*)?>(.*?)</{tag}>")).ok()?;
    re.captures(content)
        .map(|c| c[1].trim().to_string())
        .filter(|v| !v.is_empty())
}

fn simple_amount(content: &str, tag: &str) -> Option<f64> {
    simple_value(content, tag).and_then(|v| parse_amount(&v))
}

/// The `InvoiceLine` block whose description is exactly `description`.
/// Documents without line blocks are searched from the description onwards.
fn line_block<'a>(content: &'a str, description: &str) -> Option<&'a str> {
    let re = Regex::new(&format!(
        r"(?is)<ItemDescription>\s*{}\s*</ItemDescription>",
        regex::escape(description)
    ))
    .ok()?;

    let mut saw_lines = false;
    for caps in INVOICE_LINE_RE.captures_iter(content) {
        saw_lines = true;
        let block = caps.get(1)?.as_str();
        if let Some(m) = re.find(block) {
            return Some(&block[m.end()..]);
        }
    }
    if saw_lines {
        return None;
    }
    re.find(content).map(|m| &content[m.end()..])
}

fn line_value(content: &str, description: &str, tag: &str) -> Option<f64> {
    let block = line_block(content, description)?;
    simple_amount(block, tag)
}

fn period_kwh(content: &str, period: u8) -> Option<f64> {
    let re = Regex::new(&format!(
        r"(?s)<CodigoDH>\s*AEA{period}\s*</CodigoDH>.*?<ConsumoCalculado>([^<]*)</ConsumoCalculado>"
    ))
    .ok()?;
    re.captures(content).and_then(|c| parse_amount(&c[1]))
}

fn set_number(detail: &mut BillingDetail, name: &str, value: Option<f64>) -> bool {
    match (field(name), value) {
        (Some(f), Some(v)) => f.set(detail, FieldValue::Number(v)),
        _ => false,
    }
}

/// Extract every known field from raw document bytes.
///
/// Deterministic: the same bytes always give the same detail.
pub fn extract(bytes: &[u8]) -> BillingDetail {
    let content = strip_namespaces(&decode_latin1(bytes));
    let mut d = BillingDetail {
        tariff: simple_value(&content, "CodigoTarifa"),
        supply_address: simple_value(&content, "Direccion"),
        billed_month: simple_value(&content, "TransactionDate")
            .and_then(|raw| billed_month(&raw))
            .map(str::to_string),
        taxable_base: simple_amount(&content, "TotalGrossAmountBeforeTaxes"),
        invoiced_amount: simple_amount(&content, "InvoiceTotal"),
        total_amount: simple_amount(&content, "InstallmentAmount"),
        settlement_date: simple_value(&content, "InstallmentDueDate"),
        ..Default::default()
    };

    for period in 1..=6u8 {
        for (prefix, label) in PERIOD_LINES {
            let cost = line_value(&content, &format!("{label}{period}"), "TotalCost");
            set_number(&mut d, &format!("{prefix}{period}"), cost);
        }
        set_number(
            &mut d,
            &format!("consumption_kwh_p{period}"),
            period_kwh(&content, period),
        );
    }

    for (name, label) in SINGLE_LINES {
        set_number(&mut d, name, line_value(&content, label, "TotalCost"));
    }

    d.days = line_value(&content, "Alquiler del contador", "Quantity")
        .filter(|q| *q >= 0.0)
        .map(|q| q.trunc() as u32);

    period_totals(&mut d);

    let (filled, total) = d.coverage();
    debug!(filled, total, "Structured-text extraction");
    d
}

/// Read and extract a stored structured-text document.
pub fn extract_file(path: &Path) -> Result<BillingDetail, ExtractError> {
    if !path.is_file() {
        return Err(ExtractError::Missing(path.to_path_buf()));
    }
    let bytes = fs::read(path).map_err(|source| ExtractError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(ExtractError::Empty);
    }

    let detail = extract(&bytes);
    info!(
        path = %path.display(),
        taxable_base = ?detail.taxable_base,
        total_kwh = ?detail.total_kwh,
        "Structured document parsed"
    );
    Ok(detail)
}
