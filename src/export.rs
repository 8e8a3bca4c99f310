// src/export.rs
//
// `;`-separated export with a fixed column list per portal variant.

use crate::error::ExportError;
use crate::model::{FIELDS, Field, InvoiceHeader, InvoiceRecord, PortalVariant};
use csv::WriterBuilder;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{error, info};

const HEADER_COLUMNS: [&str; 11] = [
    "emission_date",
    "invoice_number",
    "period_start",
    "period_end",
    "table_amount",
    "contract",
    "cups",
    "sequence",
    "status",
    "installment",
    "invoice_type",
];

/// Detail fields only the distribution portal's invoices carry.
const DISTRIBUTION_ONLY: [&str; 5] = [
    "power_toll",
    "power_charges",
    "energy_toll",
    "energy_charges",
    "atr_amount",
];

#[derive(Clone, Copy)]
pub enum Column {
    Header(&'static str),
    Detail(&'static Field),
    Error,
    Diagnostic,
}

impl Column {
    pub fn name(&self) -> &'static str {
        match self {
            Column::Header(n) => *n,
            Column::Detail(f) => f.name,
            Column::Error => "error",
            Column::Diagnostic => "diagnostic",
        }
    }

    fn value(&self, record: &InvoiceRecord) -> String {
        match self {
            Column::Header(n) => header_value(&record.header, n),
            Column::Detail(f) => f
                .get(&record.detail)
                .map(|v| v.to_string())
                .unwrap_or_default(),
            Column::Error => record.error.to_string(),
            Column::Diagnostic => record.diagnostic.clone(),
        }
    }
}

fn header_value(h: &InvoiceHeader, name: &str) -> String {
    match name {
        "emission_date" => h.emission_date.clone(),
        "invoice_number" => h.invoice_number.clone(),
        "period_start" => h.period_start.clone(),
        "period_end" => h.period_end.clone(),
        "table_amount" => h.table_amount.map(|v| format!("{v:.2}")).unwrap_or_default(),
        "contract" => h.contract.clone(),
        "cups" => h.cups.clone(),
        "sequence" => h.sequence.clone(),
        "status" => h.status.clone(),
        "installment" => h.installment.clone(),
        "invoice_type" => h.invoice_type.clone(),
        _ => String::new(),
    }
}

/// Export columns, in order, for one variant.
pub fn columns(variant: PortalVariant) -> Vec<Column> {
    let mut cols: Vec<Column> = HEADER_COLUMNS.iter().map(|n| Column::Header(*n)).collect();
    match variant {
        PortalVariant::Client => {
            cols.extend(
                FIELDS
                    .iter()
                    .filter(|f| !DISTRIBUTION_ONLY.contains(&f.name))
                    .map(Column::Detail),
            );
        }
        PortalVariant::Distribution => cols.extend(FIELDS.iter().map(Column::Detail)),
    }
    cols.push(Column::Error);
    cols.push(Column::Diagnostic);
    cols
}

pub struct CsvExporter {
    path: PathBuf,
    columns: Vec<Column>,
}

impl CsvExporter {
    pub fn new(path: impl Into<PathBuf>, variant: PortalVariant) -> Self {
        Self {
            path: path.into(),
            columns: columns(variant),
        }
    }

    /// Exporter writing to a fresh, timestamped file under `dir`.
    pub fn timestamped(dir: &Path, variant: PortalVariant, at: OffsetDateTime) -> Self {
        let stamp = at
            .format(format_description!("[year][month][day]_[hour][minute][second]"))
            .unwrap_or_default();
        Self::new(dir.join(format!("facturas_{}_{stamp}.csv", variant.as_str())), variant)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn header_row(&self) -> Vec<&'static str> {
        self.columns.iter().map(Column::name).collect()
    }

    /// Write `records` to the file, replacing it.
    pub fn export(&self, records: &[InvoiceRecord]) -> Result<usize, ExportError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut writer = WriterBuilder::new()
            .delimiter(b';')
            .from_path(&self.path)?;
        writer.write_record(self.header_row())?;
        for record in records {
            writer.write_record(self.columns.iter().map(|c| c.value(record)))?;
        }
        writer.flush()?;
        Ok(records.len())
    }

    /// Append `records`, writing the header only when the file is new.
    pub fn append(&self, records: &[InvoiceRecord]) -> Result<usize, ExportError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let is_new = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = WriterBuilder::new().delimiter(b';').from_writer(file);
        if is_new {
            writer.write_record(self.header_row())?;
        }
        for record in records {
            writer.write_record(self.columns.iter().map(|c| c.value(record)))?;
        }
        writer.flush()?;
        Ok(records.len())
    }
}

/// Collects records in arrival order. With `incremental` set, each batch is
/// appended to the export as it arrives; otherwise everything is written by
/// `finish`. Export failures are logged, never returned.
pub struct Aggregator {
    records: Vec<InvoiceRecord>,
    exporter: Option<CsvExporter>,
    incremental: bool,
}

impl Aggregator {
    pub fn new(exporter: Option<CsvExporter>, incremental: bool) -> Self {
        Self {
            records: Vec::new(),
            exporter,
            incremental,
        }
    }

    pub fn push_batch(&mut self, batch: Vec<InvoiceRecord>) {
        if self.incremental && !batch.is_empty() {
            if let Some(exporter) = &self.exporter {
                match exporter.append(&batch) {
                    Ok(n) => info!(rows = n, path = %exporter.path().display(), "Batch exported"),
                    Err(e) => error!(error = %e, path = %exporter.path().display(), "Export failed"),
                }
            }
        }
        self.records.extend(batch);
    }

    pub fn finish(self) -> Vec<InvoiceRecord> {
        if !self.incremental {
            if let Some(exporter) = &self.exporter {
                match exporter.export(&self.records) {
                    Ok(n) => info!(rows = n, path = %exporter.path().display(), "Export written"),
                    Err(e) => error!(error = %e, path = %exporter.path().display(), "Export failed"),
                }
            }
        }
        self.records
    }
}
