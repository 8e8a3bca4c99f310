// src/robot/download.rs

use super::profile::{DocumentTriggers, Trigger};
use crate::config::Timeouts;
use crate::error::PortalError;
use crate::model::InvoiceRecord;
use crate::portal::{Page, has_text, within};
use crate::storage::{DocumentKind, DocumentStore};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Result of one download attempt. Only `Downloaded` leaves a file behind.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    /// The row has no control for this kind.
    Absent,
    TimedOut,
    Downloaded(PathBuf),
    Failed(String),
}

impl DownloadOutcome {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            DownloadOutcome::Downloaded(p) => Some(p),
            _ => None,
        }
    }

    /// Short diagnostic for a row's error field; `None` when downloaded.
    pub fn describe(&self, kind: DocumentKind) -> Option<String> {
        match self {
            DownloadOutcome::Downloaded(_) => None,
            DownloadOutcome::Absent => Some(format!("{kind} not available")),
            DownloadOutcome::TimedOut => Some(format!("{kind} download timed out")),
            DownloadOutcome::Failed(detail) => Some(format!("{kind} download failed: {detail}")),
        }
    }
}

fn trigger_for(triggers: &DocumentTriggers, kind: DocumentKind) -> Option<&Trigger> {
    match kind {
        DocumentKind::StructuredText => triggers.structured_text.as_ref(),
        DocumentKind::Rendered => triggers.rendered.as_ref(),
        DocumentKind::Presentation => triggers.presentation.as_ref(),
    }
}

/// Resolve a trigger to a selector scoped to `row`. `None` when the row has
/// no token to match against.
fn resolve(trigger: &Trigger, row: &str, token: &str) -> Option<String> {
    match trigger {
        Trigger::Token {
            selector,
            attribute,
        } => {
            if token.is_empty() {
                return None;
            }
            Some(within(row, &format!("{selector}[{attribute}=\"{}\"]", quoted(token))))
        }
        Trigger::Label { selector, label } => Some(within(row, &has_text(selector, label))),
    }
}

/// Escape a value for a double-quoted attribute selector.
fn quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

pub struct DocumentRetriever<'a> {
    triggers: &'a DocumentTriggers,
    store: &'a DocumentStore,
    timeouts: &'a Timeouts,
}

impl<'a> DocumentRetriever<'a> {
    pub fn new(triggers: &'a DocumentTriggers, store: &'a DocumentStore, timeouts: &'a Timeouts) -> Self {
        Self {
            triggers,
            store,
            timeouts,
        }
    }

    /// Kinds this portal offers at all, in download order.
    pub fn kinds(&self) -> Vec<DocumentKind> {
        DocumentKind::ALL
            .into_iter()
            .filter(|k| trigger_for(self.triggers, *k).is_some())
            .collect()
    }

    /// Try every offered kind for one row. Each attempt is independent.
    pub async fn retrieve_all(
        &self,
        page: &mut dyn Page,
        row: &str,
        record: &InvoiceRecord,
    ) -> Vec<(DocumentKind, DownloadOutcome)> {
        let mut outcomes = Vec::new();
        for kind in self.kinds() {
            let outcome = self.retrieve(page, row, record, kind).await;
            outcomes.push((kind, outcome));
        }
        outcomes
    }

    pub async fn retrieve(
        &self,
        page: &mut dyn Page,
        row: &str,
        record: &InvoiceRecord,
        kind: DocumentKind,
    ) -> DownloadOutcome {
        let key = record.document_key();
        let (cups, invoice) = (key.0, key.1.as_ref());

        let Some(trigger) = trigger_for(self.triggers, kind) else {
            return DownloadOutcome::Absent;
        };
        let Some(selector) = resolve(trigger, row, &record.header.download_token) else {
            info!(%kind, invoice, "No download token on row");
            return DownloadOutcome::Absent;
        };

        match page.count(&selector).await {
            Ok(0) => {
                info!(%kind, invoice, "No download control on row");
                return DownloadOutcome::Absent;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(%kind, invoice, error = %e, "Could not look up download control");
                return DownloadOutcome::Failed(e.to_string());
            }
        }

        let bytes = match page.download(&selector, self.timeouts.download()).await {
            Ok(bytes) => bytes,
            Err(PortalError::Timeout { timeout, .. }) => {
                warn!(%kind, invoice, ?timeout, "Download timed out");
                return DownloadOutcome::TimedOut;
            }
            Err(PortalError::NotFound { .. }) => {
                info!(%kind, invoice, "Download control vanished before click");
                return DownloadOutcome::Absent;
            }
            Err(e) => {
                warn!(%kind, invoice, error = %e, "Download failed");
                return DownloadOutcome::Failed(e.to_string());
            }
        };

        if bytes.is_empty() {
            warn!(%kind, invoice, "Download produced an empty file");
            return DownloadOutcome::Failed("empty download".into());
        }

        match self.store.write(kind, cups, invoice, &bytes) {
            Ok(path) => {
                debug!(%kind, invoice, path = %path.display(), "Downloaded");
                DownloadOutcome::Downloaded(path)
            }
            Err(e) => {
                warn!(%kind, invoice, error = %e, "Could not store download");
                DownloadOutcome::Failed(e.to_string())
            }
        }
    }
}
