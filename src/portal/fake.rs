//! Scripted in-memory portal for tests.
//!
//! Selectors are opaque strings: a selector "exists" when it is in
//! `present`, clicks succeed unless scripted to time out, and a single
//! paginated results table is modelled explicitly.

use super::{Browser, LoadState, Page};
use crate::error::{PortalError, PortalResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) enum FakeDownload {
    Bytes(Vec<u8>),
    Timeout,
    Fail,
}

pub(crate) enum Reveal {
    Show(String),
}

#[derive(Default, Clone)]
pub(crate) struct FakeRow {
    pub cells: Vec<String>,
    /// (row-relative selector, attribute name) -> value
    pub attributes: HashMap<(String, String), String>,
}

impl FakeRow {
    pub fn new(cells: &[&str]) -> Self {
        Self {
            cells: cells.iter().map(|c| c.to_string()).collect(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, selector: &str, name: &str, value: &str) -> Self {
        self.attributes
            .insert((selector.to_string(), name.to_string()), value.to_string());
        self
    }
}

pub(crate) struct FakeTable {
    pub rows: String,
    pub cells: String,
    pub next: String,
    pub pages: Vec<Vec<FakeRow>>,
    pub current: usize,
    /// How many reads of the cell text report the loading token after each
    /// page change.
    pub loading_reads: usize,
    pub pending_loading: usize,
    /// Clicking "next" times out instead of reporting it disabled.
    pub next_times_out: bool,
    pub page_reads: usize,
}

#[derive(Default)]
pub(crate) struct FakePortal {
    pub present: HashSet<String>,
    pub texts: HashMap<String, Vec<String>>,
    pub attributes: HashMap<(String, String), String>,
    pub downloads: HashMap<String, FakeDownload>,
    pub on_click: HashMap<String, Vec<Reveal>>,
    pub click_timeouts: HashSet<String>,
    pub table: Option<FakeTable>,
    pub filled: Vec<(String, String)>,
    pub clicks: Vec<String>,
    pub visits: Vec<String>,
    pub sessions_opened: usize,
    pub sessions_closed: usize,
}

pub(crate) type Shared = Arc<Mutex<FakePortal>>;

impl FakePortal {
    pub fn show(&mut self, selector: impl Into<String>) {
        self.present.insert(selector.into());
    }

    pub fn on_click(&mut self, selector: impl Into<String>, reveal: Reveal) {
        self.on_click.entry(selector.into()).or_default().push(reveal);
    }

    fn row_scoped<'a>(&self, selector: &'a str) -> Option<(usize, &'a str)> {
        let table = self.table.as_ref()?;
        let prefix = format!("{} >> nth=", table.rows);
        let rest = selector.strip_prefix(prefix.as_str())?;
        let (index, inner) = match rest.split_once(" >> ") {
            Some((i, inner)) => (i, inner),
            None => (rest, ""),
        };
        Some((index.parse().ok()?, inner))
    }

    fn current_rows(&self) -> &[FakeRow] {
        self.table
            .as_ref()
            .and_then(|t| t.pages.get(t.current))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

pub(crate) struct FakePage {
    state: Shared,
}

impl FakePage {
    pub fn new(state: Shared) -> Self {
        Self { state }
    }
}

fn timeout(what: &str) -> PortalError {
    PortalError::timeout(what, Duration::from_millis(1))
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&mut self, url: &str, _ready: LoadState, _timeout: Duration) -> PortalResult<()> {
        self.state.lock().unwrap().visits.push(url.to_string());
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> PortalResult<()> {
        self.state
            .lock()
            .unwrap()
            .filled
            .push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn click(&mut self, selector: &str, _timeout: Duration) -> PortalResult<()> {
        let mut s = self.state.lock().unwrap();
        s.clicks.push(selector.to_string());

        if s.click_timeouts.contains(selector) {
            return Err(timeout(selector));
        }

        if let Some(table) = s.table.as_mut() {
            if table.next == selector {
                if table.next_times_out || table.current + 1 >= table.pages.len() {
                    return Err(timeout(selector));
                }
                table.current += 1;
                table.pending_loading = table.loading_reads;
                return Ok(());
            }
        }

        if let Some(reveals) = s.on_click.remove(selector) {
            for reveal in &reveals {
                match reveal {
                    Reveal::Show(sel) => {
                        s.present.insert(sel.clone());
                    }
                }
            }
            s.on_click.insert(selector.to_string(), reveals);
        }
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, _timeout: Duration) -> PortalResult<()> {
        let s = self.state.lock().unwrap();
        if s.present.contains(selector) {
            Ok(())
        } else {
            Err(timeout(selector))
        }
    }

    async fn wait_for_load(&mut self, _state: LoadState, _timeout: Duration) -> PortalResult<()> {
        Ok(())
    }

    async fn count(&mut self, selector: &str) -> PortalResult<usize> {
        let s = self.state.lock().unwrap();
        if let Some(table) = &s.table {
            if table.rows == selector {
                return Ok(s.current_rows().len());
            }
        }
        let found = s.present.contains(selector) || s.downloads.contains_key(selector);
        Ok(usize::from(found))
    }

    async fn texts(&mut self, selector: &str) -> PortalResult<Vec<String>> {
        let mut s = self.state.lock().unwrap();

        let all_cells = s
            .table
            .as_ref()
            .map(|t| super::within(&t.rows, &t.cells) == selector)
            .unwrap_or(false);
        if all_cells {
            let table = s.table.as_mut().unwrap();
            if table.pending_loading > 0 {
                table.pending_loading -= 1;
                return Ok(vec!["Cargando...".to_string()]);
            }
            table.page_reads += 1;
            return Ok(s
                .current_rows()
                .iter()
                .flat_map(|r| r.cells.iter().cloned())
                .collect());
        }

        if let Some((index, inner)) = s.row_scoped(selector) {
            let cells_selector = s.table.as_ref().unwrap().cells.clone();
            if inner == cells_selector {
                return Ok(s
                    .current_rows()
                    .get(index)
                    .map(|r| r.cells.clone())
                    .unwrap_or_default());
            }
        }

        Ok(s.texts.get(selector).cloned().unwrap_or_default())
    }

    async fn attribute(&mut self, selector: &str, name: &str) -> PortalResult<Option<String>> {
        let s = self.state.lock().unwrap();
        if let Some((index, inner)) = s.row_scoped(selector) {
            return Ok(s.current_rows().get(index).and_then(|r| {
                r.attributes
                    .get(&(inner.to_string(), name.to_string()))
                    .cloned()
            }));
        }
        Ok(s
            .attributes
            .get(&(selector.to_string(), name.to_string()))
            .cloned())
    }

    async fn is_visible(&mut self, selector: &str) -> PortalResult<bool> {
        Ok(self.state.lock().unwrap().present.contains(selector))
    }

    async fn is_enabled(&mut self, selector: &str) -> PortalResult<bool> {
        let s = self.state.lock().unwrap();
        if let Some(table) = &s.table {
            if table.next == selector {
                return Ok(table.next_times_out || table.current + 1 < table.pages.len());
            }
        }
        Ok(s.present.contains(selector))
    }

    async fn download(&mut self, trigger: &str, _timeout: Duration) -> PortalResult<Vec<u8>> {
        let mut s = self.state.lock().unwrap();
        s.clicks.push(trigger.to_string());
        match s.downloads.get(trigger) {
            Some(FakeDownload::Bytes(b)) => Ok(b.clone()),
            Some(FakeDownload::Timeout) => Err(timeout(trigger)),
            Some(FakeDownload::Fail) => Err(PortalError::Driver("download aborted".into())),
            None => Err(PortalError::NotFound {
                selector: trigger.to_string(),
            }),
        }
    }

    async fn close(&mut self) -> PortalResult<()> {
        self.state.lock().unwrap().sessions_closed += 1;
        Ok(())
    }
}

/// Hands out pages over one shared portal state. Login succeeds from the
/// `succeed_on`-th opened session onwards (never when `None`).
pub(crate) struct FakeBrowser {
    pub state: Shared,
    pub success_selector: String,
    pub succeed_on: Option<usize>,
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn open(&self) -> PortalResult<Box<dyn Page>> {
        let mut s = self.state.lock().unwrap();
        s.sessions_opened += 1;
        let ok = self.succeed_on.is_some_and(|n| s.sessions_opened >= n);
        if ok {
            s.present.insert(self.success_selector.clone());
        } else {
            s.present.remove(&self.success_selector);
        }
        drop(s);
        Ok(Box::new(FakePage::new(self.state.clone())))
    }
}
