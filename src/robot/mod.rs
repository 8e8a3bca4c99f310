//! The extraction run: login, entities, search, pages, rows, documents.
//!
//! Everything against the browser happens in sequence on one page. Failures
//! are contained at the smallest scope that can absorb them: a document, a
//! row, an entity. Only an exhausted login aborts the run.

pub mod auth;
pub mod download;
pub mod entities;
pub mod profile;
pub mod search;
pub mod table;

use crate::config::{Config, Credentials, OcrMode};
use crate::error::{PortalError, PortalResult, RobotError};
use crate::export::{Aggregator, CsvExporter};
use crate::extract::{AssistedExtractor, xml};
use crate::merge;
use crate::model::{InvoiceRecord, PortalVariant};
use crate::portal::{Browser, LoadState, Page};
use crate::request::SearchRequest;
use crate::storage::{DocumentKind, DocumentStore};
use download::DocumentRetriever;
use profile::PortalProfile;
use search::SearchOutcome;
use table::{TableReader, TableRow};
use time::OffsetDateTime;
use tracing::{Instrument, debug, error, info, info_span, warn};

pub struct Robot {
    config: Config,
    profile: PortalProfile,
    store: DocumentStore,
    browser: Box<dyn Browser>,
    assisted: Option<AssistedExtractor>,
}

impl Robot {
    pub fn new(config: Config, browser: Box<dyn Browser>, assisted: Option<AssistedExtractor>) -> Self {
        Self {
            profile: PortalProfile::for_variant(config.variant),
            store: DocumentStore::new(&config.paths.temp_root),
            config,
            browser,
            assisted,
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// One full extraction run for `request`.
    ///
    /// Returns every record read, in arrival order. The session is closed
    /// before returning, whatever happened after login.
    pub async fn run(
        &self,
        creds: &Credentials,
        request: &SearchRequest,
    ) -> Result<Vec<InvoiceRecord>, RobotError> {
        info!(
            variant = self.profile.variant.as_str(),
            from = %request.from_text(),
            to = %request.to_text(),
            cups = request.cups.as_deref().unwrap_or("-"),
            "Extraction run started"
        );

        let mut page = self.authenticate(creds).await?;
        let records = self.extract(page.as_mut(), request).await;

        if let Err(e) = page.close().await {
            warn!(error = %e, "Could not close browser session");
        }
        info!(records = records.len(), "Extraction run finished");
        Ok(records)
    }

    /// Bounded login retry. Each attempt gets a fresh session; a failed
    /// attempt's session is closed before the backoff.
    async fn authenticate(&self, creds: &Credentials) -> Result<Box<dyn Page>, RobotError> {
        let retry = &self.config.retry;
        let timeouts = &self.config.timeouts;

        for attempt in 1..=retry.max_attempts {
            let span = info_span!("login", attempt, max = retry.max_attempts);
            let outcome = async {
                let mut page = self.browser.open().await?;
                let result = self.attempt_login(page.as_mut(), creds).await;
                Ok::<_, PortalError>((page, result))
            }
            .instrument(span)
            .await;

            match outcome {
                Ok((mut page, Ok(true))) => {
                    if let Some(banner) = &self.profile.login.cookie_button {
                        auth::accept_cookies(page.as_mut(), banner, timeouts.cookie_banner()).await;
                    }
                    return Ok(page);
                }
                Ok((mut page, result)) => {
                    match result {
                        Err(e) => warn!(attempt, error = %e, "Login attempt failed"),
                        _ => warn!(attempt, "Login attempt rejected"),
                    }
                    if let Err(e) = page.close().await {
                        debug!(error = %e, "Closing failed session");
                    }
                }
                Err(e) => warn!(attempt, error = %e, "Could not open a browser session"),
            }

            if attempt < retry.max_attempts {
                tokio::time::sleep(retry.backoff()).await;
            }
        }

        error!(attempts = retry.max_attempts, "Authentication exhausted");
        Err(RobotError::AuthenticationExhausted {
            attempts: retry.max_attempts,
        })
    }

    async fn attempt_login(&self, page: &mut dyn Page, creds: &Credentials) -> PortalResult<bool> {
        let timeouts = &self.config.timeouts;
        page.goto(&self.config.portal.login_url, LoadState::Load, timeouts.navigation())
            .await?;
        auth::login(page, &self.profile.login, creds, timeouts).await
    }

    async fn extract(&self, page: &mut dyn Page, request: &SearchRequest) -> Vec<InvoiceRecord> {
        let variant = self.profile.variant;
        let exporter = CsvExporter::timestamped(
            &self.config.paths.export_dir,
            variant,
            OffsetDateTime::now_utc(),
        );
        let mut aggregator = Aggregator::new(Some(exporter), variant == PortalVariant::Distribution);

        let names = match &self.profile.entities {
            Some(sel) => entities::enumerate(page, sel, &self.config.timeouts)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Could not list entities; using the active one");
                    Vec::new()
                }),
            None => Vec::new(),
        };

        if names.is_empty() {
            let batch = self.entity_batch(page, None, request).await;
            aggregator.push_batch(batch);
        } else {
            for name in &names {
                let batch = self.entity_batch(page, Some(name), request).await;
                aggregator.push_batch(batch);
            }
        }

        aggregator.finish()
    }

    /// Records for one entity. A failure part-way keeps the rows already
    /// processed.
    async fn entity_batch(
        &self,
        page: &mut dyn Page,
        entity: Option<&str>,
        request: &SearchRequest,
    ) -> Vec<InvoiceRecord> {
        let span = info_span!("entity", name = entity.unwrap_or("default"));
        let mut batch = Vec::new();
        let result = self
            .process_entity(page, entity, request, &mut batch)
            .instrument(span.clone())
            .await;
        match result {
            Ok(()) => span.in_scope(|| info!(records = batch.len(), "Entity done")),
            Err(e) => span.in_scope(|| {
                error!(error = %e, kept = batch.len(), "Entity failed; continuing with the next")
            }),
        }
        batch
    }

    async fn process_entity(
        &self,
        page: &mut dyn Page,
        entity: Option<&str>,
        request: &SearchRequest,
        out: &mut Vec<InvoiceRecord>,
    ) -> PortalResult<()> {
        let timeouts = &self.config.timeouts;

        if let (Some(name), Some(sel)) = (entity, &self.profile.entities) {
            entities::select(page, sel, name, timeouts).await?;
        }

        let outcome = search::run(page, &self.profile, &self.config.portal, request, timeouts).await?;
        if outcome == SearchOutcome::NoResults {
            return Ok(());
        }

        let retriever = DocumentRetriever::new(&self.profile.documents, &self.store, timeouts);
        let mut reader = TableReader::new(&self.profile.table, timeouts);

        // Rows are processed while their page is on screen; their selectors
        // stop being valid once the reader advances.
        while let Some(rows) = reader.next_page(page).await? {
            for row in rows {
                let span = info_span!(
                    "row",
                    invoice = %row.record.header.invoice_number,
                    cups = %row.record.header.cups
                );
                let record = self.process_row(page, &retriever, row).instrument(span).await;
                out.push(record);
            }
        }
        Ok(())
    }

    async fn process_row(
        &self,
        page: &mut dyn Page,
        retriever: &DocumentRetriever<'_>,
        row: TableRow,
    ) -> InvoiceRecord {
        let TableRow {
            selector,
            mut record,
        } = row;
        let variant = self.profile.variant;

        let mut structured = None;
        let mut rendered = None;
        for (kind, outcome) in retriever.retrieve_all(page, &selector, &record).await {
            match kind {
                DocumentKind::StructuredText => structured = outcome.path().cloned(),
                DocumentKind::Rendered => {
                    if variant == PortalVariant::Distribution {
                        if let Some(message) = outcome.describe(kind) {
                            record.flag(message);
                        }
                    }
                    rendered = outcome.path().cloned();
                }
                DocumentKind::Presentation => {}
            }
        }

        if let Some(path) = &structured {
            match xml::extract_file(path) {
                Ok(detail) => record.detail.overlay(&detail),
                Err(e) => warn!(error = %e, "Structured extraction failed"),
            }
        }

        if let (Some(assisted), Some(path)) = (&self.assisted, &rendered) {
            if self.wants_assisted(&record) && !assisted.apply(path, &mut record).await {
                debug!("Row kept without assisted fields");
            }
        }

        merge::recompute_derived(&mut record, variant);
        merge::finalize(&mut record);

        if record.error {
            warn!(diagnostic = %record.diagnostic, "Row finished with errors");
        } else {
            debug!("Row finished");
        }
        record
    }

    fn wants_assisted(&self, record: &InvoiceRecord) -> bool {
        match self.config.ocr.mode {
            OcrMode::Off => false,
            OcrMode::Always => true,
            OcrMode::Fallback => {
                self.profile.variant == PortalVariant::Distribution
                    || record.detail.coverage().0 == 0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use crate::extract::fake::{Calls, FakeService, minimal_pdf};
    use crate::portal::fake::{FakeBrowser, FakeDownload, FakePortal, FakeRow, FakeTable};
    use crate::portal::{has_text, nth, with_text, within};
    use crate::robot::table::NEGATIVE_AMOUNT;
    use serde_json::{Value, json};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tempfile::{TempDir, tempdir};

    const CUPS: &str = "ES0034111300275021NX0F";

    fn config(variant: PortalVariant) -> (Config, TempDir) {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        let config = Config {
            variant,
            paths: PathsConfig {
                temp_root: root.join("temp"),
                export_dir: root.join("csv"),
                log_file: root.join("robot.log"),
            },
            ..Default::default()
        };
        (config, tmp)
    }

    fn creds() -> Credentials {
        Credentials::new("user@example.com", "s3cret")
    }

    fn request() -> SearchRequest {
        SearchRequest::parse("01/10/2025", "31/10/2025", None).unwrap()
    }

    /// Portal with login form, filters and results container in place.
    fn portal(profile: &PortalProfile, pages: Vec<Vec<FakeRow>>) -> FakePortal {
        let s = &profile.search;
        let mut portal = FakePortal::default();
        portal.show(profile.login.form.clone());
        portal.show(s.filter_container.clone());
        portal.show(s.search_box.clone());
        portal.show(s.limit_button.clone());
        portal.show(has_text(&s.limit_button, "50"));
        portal.show(with_text(&s.option, "50"));
        portal.show(profile.table.container.clone());
        portal.table = Some(FakeTable {
            rows: profile.table.rows.clone(),
            cells: profile.table.cells.clone(),
            next: profile.table.next.clone(),
            pages,
            current: 0,
            loading_reads: 0,
            pending_loading: 0,
            next_times_out: false,
            page_reads: 0,
        });
        portal
    }

    fn robot(config: Config, portal: FakePortal, succeed_on: Option<usize>) -> (Robot, Arc<Mutex<FakePortal>>) {
        robot_with(config, portal, succeed_on, None)
    }

    fn robot_with(
        config: Config,
        portal: FakePortal,
        succeed_on: Option<usize>,
        assisted: Option<AssistedExtractor>,
    ) -> (Robot, Arc<Mutex<FakePortal>>) {
        let profile = PortalProfile::for_variant(config.variant);
        let state = Arc::new(Mutex::new(portal));
        let browser = FakeBrowser {
            state: state.clone(),
            success_selector: profile.login.success.clone(),
            succeed_on,
        };
        (Robot::new(config, Box::new(browser), assisted), state)
    }

    fn client_row(invoice: &str, amount: &str, token: &str) -> FakeRow {
        FakeRow::new(&[
            "05/10/2025",
            invoice,
            "01/09/2025",
            "30/09/2025",
            amount,
            "CT-001",
            CUPS,
            "1",
            "Pagada",
            "No",
            "Ordinaria",
        ])
        .with_attribute("button[name=\"pdf\"]", "value", token)
    }

    fn distribution_row(invoice: &str, amount: &str, token: &str) -> FakeRow {
        FakeRow::new(&[
            CUPS,
            invoice,
            "05/10/2025",
            "01/09/2025",
            "30/09/2025",
            amount,
            "Emitida",
            "Normal",
        ])
        .with_attribute("button.download-pdf", "data-invoice", token)
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_login_aborts_with_no_records() {
        let (config, _tmp) = config(PortalVariant::Client);
        let profile = PortalProfile::client();
        let (robot, state) = robot(config, portal(&profile, vec![]), None);

        let err = robot.run(&creds(), &request()).await.unwrap_err();
        assert!(matches!(err, RobotError::AuthenticationExhausted { attempts: 5 }));

        let s = state.lock().unwrap();
        assert_eq!(s.sessions_opened, 5);
        assert_eq!(s.sessions_closed, 5);
        assert!(s.table.as_ref().unwrap().page_reads == 0);
    }

    #[tokio::test(start_paused = true)]
    async fn login_retries_with_fresh_sessions_until_success() {
        let (config, _tmp) = config(PortalVariant::Client);
        let profile = PortalProfile::client();
        let (robot, state) = robot(config, portal(&profile, vec![]), Some(3));

        let records = robot.run(&creds(), &request()).await.unwrap();
        assert!(records.is_empty());

        let s = state.lock().unwrap();
        assert_eq!(s.sessions_opened, 3);
        assert_eq!(s.sessions_closed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_results_is_an_empty_run_not_an_error() {
        let (config, _tmp) = config(PortalVariant::Client);
        let profile = PortalProfile::client();
        let mut p = portal(&profile, vec![]);
        p.present.remove(&profile.table.container);
        let (robot, state) = robot(config, p, Some(1));

        let records = robot.run(&creds(), &request()).await.unwrap();
        assert!(records.is_empty());
        assert_eq!(state.lock().unwrap().sessions_closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn client_rows_are_downloaded_and_extracted() {
        let (config, tmp) = config(PortalVariant::Client);
        let profile = PortalProfile::client();
        let rows = profile.table.rows.clone();
        let mut p = portal(
            &profile,
            vec![
                vec![client_row("F1", "107,93", "t1")],
                vec![client_row("R2", "-20,00", "t2")],
            ],
        );
        let xml = "<InvoiceLine><ItemDescription>Pot. P1</ItemDescription>\
                   <TotalCost>45,12</TotalCost></InvoiceLine>\
                   <CodigoTarifa>3.0TD</CodigoTarifa>";
        let row0 = nth(&rows, 0);
        p.downloads.insert(
            within(&row0, &has_text("button", "XML")),
            FakeDownload::Bytes(xml.as_bytes().to_vec()),
        );
        p.downloads.insert(
            within(&row0, "button[name=\"pdf\"][value=\"t1\"]"),
            FakeDownload::Bytes(b"%PDF-1.4".to_vec()),
        );
        p.downloads.insert(
            within(&row0, "button[name=\"pdf\"][value=\"t2\"]"),
            FakeDownload::Bytes(b"%PDF-1.4".to_vec()),
        );
        let (robot, state) = robot(config, p, Some(1));

        let records = robot.run(&creds(), &request()).await.unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert!(!first.error, "{}", first.diagnostic);
        assert_eq!(first.detail.power_p1, Some(45.12));
        assert_eq!(first.detail.power_amount, Some(45.12));
        assert_eq!(first.detail.tariff.as_deref(), Some("3.0TD"));
        assert_eq!(first.detail.billed_month.as_deref(), Some("SEPTIEMBRE"));
        assert_eq!(first.detail.days, Some(29));
        assert_eq!(first.header.table_amount, Some(107.93));
        assert!(robot.store().path(DocumentKind::StructuredText, CUPS, "F1").is_file());
        assert!(robot.store().path(DocumentKind::Rendered, CUPS, "F1").is_file());

        let second = &records[1];
        assert!(second.error);
        assert!(second.diagnostic.contains(NEGATIVE_AMOUNT));
        // Rectifying rows still get their documents.
        assert!(robot.store().path(DocumentKind::Rendered, CUPS, "R2").is_file());

        let exports: Vec<PathBuf> = fs::read_dir(tmp.path().join("csv"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(exports.len(), 1);
        let csv = fs::read_to_string(&exports[0]).unwrap();
        assert!(csv.lines().nth(2).unwrap().ends_with(NEGATIVE_AMOUNT));
        assert_eq!(state.lock().unwrap().sessions_closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn distribution_isolates_entities_and_flags_missing_documents() {
        let (config, tmp) = config(PortalVariant::Distribution);
        let profile = PortalProfile::distribution();
        let sel = profile.entities.clone().unwrap();
        let rows = profile.table.rows.clone();

        let mut p = portal(
            &profile,
            vec![vec![
                distribution_row("D1", "80,00", "d1"),
                distribution_row("D2", "15,00", "d2"),
            ]],
        );
        p.show(sel.items.clone());
        p.texts.insert(
            sel.items.clone(),
            vec!["ACME NORTE".to_string(), "ACME SUR".to_string()],
        );
        p.texts.insert(sel.active_item.clone(), vec!["ACME NORTE".to_string()]);
        p.click_timeouts.insert(with_text(&sel.items, "ACME SUR"));
        p.downloads.insert(
            within(&nth(&rows, 0), "button.download-pdf[data-invoice=\"d1\"]"),
            FakeDownload::Bytes(b"%PDF-1.4".to_vec()),
        );
        p.downloads.insert(
            within(&nth(&rows, 1), "button.download-pdf[data-invoice=\"d2\"]"),
            FakeDownload::Timeout,
        );
        let (robot, state) = robot(config, p, Some(1));

        let records = robot.run(&creds(), &request()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(!records[0].error);
        assert!(records[1].error);
        assert_eq!(records[1].diagnostic, "PDF download timed out");
        assert_eq!(records[0].detail.billed_month.as_deref(), Some("SEPTIEMBRE"));

        let exports: Vec<PathBuf> = fs::read_dir(tmp.path().join("csv"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(exports.len(), 1);
        let csv = fs::read_to_string(&exports[0]).unwrap();
        assert_eq!(csv.lines().count(), 3);
        assert!(csv.lines().next().unwrap().ends_with(";error;diagnostic"));

        assert_eq!(state.lock().unwrap().sessions_closed, 1);
    }

    fn assisted(reply: Value) -> (AssistedExtractor, Arc<Mutex<Calls>>) {
        let (service, calls) = FakeService::replying(Ok(reply));
        (AssistedExtractor::new(Box::new(service), "Read the invoice."), calls)
    }

    /// Client portal with one row whose PDF inspects as a real document.
    fn client_portal_with_pdf(profile: &PortalProfile, xml: Option<&str>) -> FakePortal {
        let row0 = nth(&profile.table.rows, 0);
        let mut p = portal(profile, vec![vec![client_row("F1", "107,93", "t1")]]);
        p.downloads.insert(
            within(&row0, "button[name=\"pdf\"][value=\"t1\"]"),
            FakeDownload::Bytes(minimal_pdf()),
        );
        if let Some(xml) = xml {
            p.downloads.insert(
                within(&row0, &has_text("button", "XML")),
                FakeDownload::Bytes(xml.as_bytes().to_vec()),
            );
        }
        p
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_skips_assisted_extraction_when_xml_populated_the_row() {
        let (mut config, _tmp) = config(PortalVariant::Client);
        config.ocr.mode = OcrMode::Fallback;
        let profile = PortalProfile::client();
        let xml = "<InvoiceLine><ItemDescription>Pot. P1</ItemDescription>\
                   <TotalCost>45,12</TotalCost></InvoiceLine>";
        let (extractor, calls) = assisted(json!({"power_p2": 7.0, "tariff": "2.0TD"}));
        let (robot, _) = robot_with(config, client_portal_with_pdf(&profile, Some(xml)), Some(1), Some(extractor));

        let records = robot.run(&creds(), &request()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].detail.power_p1, Some(45.12));
        assert_eq!(records[0].detail.power_p2, None);
        assert_eq!(records[0].detail.tariff, None);
        assert_eq!(calls.lock().unwrap().uploads, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_runs_assisted_extraction_when_client_row_has_no_xml() {
        let (mut config, _tmp) = config(PortalVariant::Client);
        config.ocr.mode = OcrMode::Fallback;
        let profile = PortalProfile::client();
        let (extractor, calls) = assisted(json!({
            "power_p1": 10.004,
            "power_p2": 5.003,
            "power_amount": 99.0,
            "billed_month": "OCTUBRE",
            "tariff": "2.0TD"
        }));
        let (robot, _) = robot_with(config, client_portal_with_pdf(&profile, None), Some(1), Some(extractor));

        let records = robot.run(&creds(), &request()).await.unwrap();
        let d = &records[0].detail;
        assert_eq!(d.tariff.as_deref(), Some("2.0TD"));
        assert_eq!((d.power_p1, d.power_p2), (Some(10.0), Some(5.0)));
        assert_eq!(d.power_amount, Some(15.0));
        assert_eq!(d.billed_month.as_deref(), Some("SEPTIEMBRE"));
        assert_eq!(d.days, Some(29));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.uploads, 1);
        assert_eq!(calls.deletes.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn always_mode_on_distribution_recomputes_proposed_totals() {
        let (mut config, _tmp) = config(PortalVariant::Distribution);
        config.ocr.mode = OcrMode::Always;
        let profile = PortalProfile::distribution();
        let mut p = portal(&profile, vec![vec![distribution_row("D1", "80,00", "d1")]]);
        p.downloads.insert(
            within(&nth(&profile.table.rows, 0), "button.download-pdf[data-invoice=\"d1\"]"),
            FakeDownload::Bytes(minimal_pdf()),
        );
        let (extractor, calls) = assisted(json!({
            "power_toll": 10.111,
            "power_charges": 2.0,
            "energy_toll": 5.5,
            "power_amount": 99.0,
            "atr_amount": 1.0,
            "days": 3,
            "billed_month": "AGOSTO"
        }));
        let (robot, _) = robot_with(config, p, Some(1), Some(extractor));

        let records = robot.run(&creds(), &request()).await.unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert!(!r.error, "{}", r.diagnostic);
        assert_eq!(r.detail.power_toll, Some(10.11));
        assert_eq!(r.detail.power_amount, Some(12.11));
        assert_eq!(r.detail.atr_amount, Some(5.5));
        assert_eq!(r.detail.days, Some(29));
        assert_eq!(r.detail.billed_month.as_deref(), Some("SEPTIEMBRE"));
        assert_eq!(calls.lock().unwrap().uploads, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn off_mode_never_calls_the_service() {
        let (mut config, _tmp) = config(PortalVariant::Client);
        config.ocr.mode = OcrMode::Off;
        let profile = PortalProfile::client();
        let (extractor, calls) = assisted(json!({"tariff": "2.0TD"}));
        let (robot, _) = robot_with(config, client_portal_with_pdf(&profile, None), Some(1), Some(extractor));

        let records = robot.run(&creds(), &request()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].detail.tariff, None);
        assert_eq!(calls.lock().unwrap().uploads, 0);
    }
}
