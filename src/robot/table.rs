// src/robot/table.rs
//
// Paginated results grid:  Loading -> Stable -> { HasNext | End }

use super::profile::{ColumnMap, TableLayout};
use crate::config::Timeouts;
use crate::error::{PortalError, PortalResult};
use crate::model::{InvoiceHeader, InvoiceRecord, is_valid_cups, parse_amount};
use crate::portal::{Page, nth, within};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const SETTLE_POLL: Duration = Duration::from_millis(250);

pub const NEGATIVE_AMOUNT: &str = "rectifying invoice or negative amount";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Loading,
    Stable,
    HasNext,
    End,
}

/// A row of the current page plus the selector that addresses it while the
/// page is on screen.
#[derive(Debug, Clone)]
pub struct TableRow {
    pub selector: String,
    pub record: InvoiceRecord,
}

pub struct TableReader<'a> {
    layout: &'a TableLayout,
    timeouts: &'a Timeouts,
    state: PageState,
    pages_read: usize,
}

impl<'a> TableReader<'a> {
    pub fn new(layout: &'a TableLayout, timeouts: &'a Timeouts) -> Self {
        Self {
            layout,
            timeouts,
            state: PageState::Loading,
            pages_read: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> PageState {
        self.state
    }

    #[cfg(test)]
    pub fn pages_read(&self) -> usize {
        self.pages_read
    }

    /// Rows of the next page, or `None` once the table is exhausted.
    ///
    /// The rows stay addressable until the following call, which moves the
    /// portal to the next page.
    pub async fn next_page(&mut self, page: &mut dyn Page) -> PortalResult<Option<Vec<TableRow>>> {
        match self.state {
            PageState::End => return Ok(None),
            PageState::HasNext => {
                if !self.advance(page).await? {
                    self.state = PageState::End;
                    return Ok(None);
                }
                self.state = PageState::Loading;
            }
            PageState::Loading | PageState::Stable => {}
        }

        self.settle(page).await?;
        self.state = PageState::Stable;

        let rows = self.read_rows(page).await?;
        self.pages_read += 1;
        info!(page = self.pages_read, rows = rows.len(), "Results page read");

        self.state = match page.is_enabled(&self.layout.next).await {
            Ok(true) => PageState::HasNext,
            Ok(false) => PageState::End,
            Err(e) => {
                debug!(error = %e, "No usable next control; last page");
                PageState::End
            }
        };

        Ok(Some(rows))
    }

    /// Read every page into records.
    #[cfg(test)]
    pub async fn read_all(mut self, page: &mut dyn Page) -> PortalResult<Vec<InvoiceRecord>> {
        let mut records = Vec::new();
        while let Some(rows) = self.next_page(page).await? {
            records.extend(rows.into_iter().map(|r| r.record));
        }
        Ok(records)
    }

    async fn advance(&mut self, page: &mut dyn Page) -> PortalResult<bool> {
        match page.click(&self.layout.next, self.timeouts.next_page()).await {
            Ok(()) => Ok(true),
            Err(e @ (PortalError::Timeout { .. } | PortalError::NotFound { .. })) => {
                info!(error = %e, "Next page unavailable; end of table");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Wait until no cell shows the loading token. On timeout the page is read
    /// as-is.
    async fn settle(&self, page: &mut dyn Page) -> PortalResult<()> {
        let all_cells = within(&self.layout.rows, &self.layout.cells);
        let deadline = Instant::now() + self.timeouts.cell_settle();
        loop {
            let cells = page.texts(&all_cells).await?;
            if !cells.iter().any(|c| c.contains(&self.layout.loading_token)) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(
                    page = self.pages_read + 1,
                    "Table still loading after {:?}; reading incomplete data",
                    self.timeouts.cell_settle()
                );
                return Ok(());
            }
            tokio::time::sleep(SETTLE_POLL).await;
        }
    }

    async fn read_rows(&self, page: &mut dyn Page) -> PortalResult<Vec<TableRow>> {
        let count = page.count(&self.layout.rows).await?;
        let mut rows = Vec::with_capacity(count);

        for i in 0..count {
            let selector = nth(&self.layout.rows, i);
            let mut record = match page.texts(&within(&selector, &self.layout.cells)).await {
                Ok(cells) => parse_row(&cells, &self.layout.columns),
                Err(e) => {
                    warn!(row = i, error = %e, "Row unreadable");
                    let mut r = InvoiceRecord::default();
                    r.flag(format!("row unreadable: {e}"));
                    r
                }
            };

            let (source, attr) = &self.layout.token_source;
            match page.attribute(&within(&selector, source), attr).await {
                Ok(Some(token)) => record.header.download_token = token,
                Ok(None) => debug!(row = i, "Row has no download token"),
                Err(e) => debug!(row = i, error = %e, "Download token lookup failed"),
            }

            rows.push(TableRow { selector, record });
        }
        Ok(rows)
    }
}

/// Map one row's cells onto a record by column position.
pub fn parse_row(cells: &[String], columns: &ColumnMap) -> InvoiceRecord {
    let cell = |i: usize| cells.get(i).map(|c| c.trim().to_string()).unwrap_or_default();
    let optional = |i: Option<usize>| i.map(cell).unwrap_or_default();

    let raw_amount = cell(columns.amount);
    let raw_cups: String = cell(columns.cups)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();

    let header = InvoiceHeader {
        emission_date: cell(columns.emission_date),
        invoice_number: cell(columns.invoice_number),
        period_start: cell(columns.period_start),
        period_end: cell(columns.period_end),
        table_amount: parse_amount(&raw_amount),
        contract: optional(columns.contract),
        cups: raw_cups.clone(),
        sequence: optional(columns.sequence),
        status: optional(columns.status),
        installment: optional(columns.installment),
        invoice_type: optional(columns.invoice_type),
        download_token: String::new(),
    };
    let mut record = InvoiceRecord::from_header(header);

    if cells.len() < columns.width() {
        record.flag(format!(
            "expected {} cells, found {}",
            columns.width(),
            cells.len()
        ));
    }
    if record.header.invoice_number.is_empty() {
        record.flag("missing invoice number");
    }
    match record.header.table_amount {
        Some(v) if v < 0.0 => record.flag(NEGATIVE_AMOUNT),
        None if !raw_amount.is_empty() => record.flag(format!("unreadable amount '{raw_amount}'")),
        _ => {}
    }
    if !raw_cups.is_empty() && !is_valid_cups(&raw_cups) {
        record.header.cups.clear();
        record.flag(format!("unexpected supply point id '{raw_cups}'"));
    }

    record
}
