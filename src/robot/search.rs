// src/robot/search.rs

use super::profile::{PortalProfile, SearchSelectors};
use crate::config::{PortalConfig, Timeouts};
use crate::error::PortalResult;
use crate::portal::{LoadState, Page, by_label, has_text, with_text};
use crate::request::SearchRequest;
use std::time::Duration;
use tracing::{info, warn};

/// Pause after typing into a selector's search box so the option list can
/// filter itself.
const OPTION_FILTER_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The results table is on screen.
    Ready,
    /// The portal reported (or implied, by never showing a table) no data.
    NoResults,
}

/// Drive the filter screen for the active entity up to a results table.
pub async fn run(
    page: &mut dyn Page,
    profile: &PortalProfile,
    portal: &PortalConfig,
    request: &SearchRequest,
    timeouts: &Timeouts,
) -> PortalResult<SearchOutcome> {
    let sel = &profile.search;

    page.goto(&portal.search_url, LoadState::DomContentLoaded, timeouts.navigation())
        .await?;
    page.wait_for(&sel.filter_container, timeouts.results())
        .await?;
    info!("Search filters loaded");

    if let (Some(button), Some(group)) = (&sel.group_button, &portal.business_group) {
        pick_option(page, sel, button, group, timeouts).await?;
        info!(group = %group, "Business group filter applied");
    }

    if let Some(cups) = &request.cups {
        pick_option(page, sel, &sel.cups_button, cups, timeouts).await?;
        info!(cups = %cups, "Supply point filter applied");
    }

    page.fill(&by_label(&sel.date_from_label), &request.from_text())
        .await?;
    page.fill(&by_label(&sel.date_to_label), &request.to_text())
        .await?;

    set_result_limit(page, sel, portal.result_limit, timeouts).await?;

    page.click(&sel.submit, timeouts.element()).await?;
    info!(from = %request.from_text(), to = %request.to_text(), "Search submitted");

    wait_for_results(page, profile, timeouts).await
}

/// Open a selector, type `value` into the shared search box and click the
/// matching option.
async fn pick_option(
    page: &mut dyn Page,
    sel: &SearchSelectors,
    opener: &str,
    value: &str,
    timeouts: &Timeouts,
) -> PortalResult<()> {
    page.wait_for(opener, timeouts.element()).await?;
    page.click(opener, timeouts.element()).await?;
    page.wait_for(&sel.search_box, timeouts.element()).await?;
    page.fill(&sel.search_box, value).await?;

    tokio::time::sleep(OPTION_FILTER_DELAY).await;

    let option = with_text(&sel.option, value);
    page.wait_for(&option, timeouts.element()).await?;
    page.click(&option, timeouts.element()).await
}

async fn set_result_limit(
    page: &mut dyn Page,
    sel: &SearchSelectors,
    limit: u32,
    timeouts: &Timeouts,
) -> PortalResult<()> {
    let limit = limit.to_string();
    pick_option(page, sel, &sel.limit_button, &limit, timeouts).await?;

    let confirmed = has_text(&sel.limit_button, &limit);
    match page.wait_for(&confirmed, timeouts.element()).await {
        Ok(()) => info!(limit = %limit, "Result limit set"),
        Err(e) => warn!(limit = %limit, error = %e, "Result limit not confirmed on screen"),
    }
    Ok(())
}

async fn wait_for_results(
    page: &mut dyn Page,
    profile: &PortalProfile,
    timeouts: &Timeouts,
) -> PortalResult<SearchOutcome> {
    match page.wait_for(&profile.table.container, timeouts.results()).await {
        Ok(()) => {
            if page.is_visible(&profile.search.no_results).await? {
                info!("Portal reports no invoices for these filters");
                return Ok(SearchOutcome::NoResults);
            }
            Ok(SearchOutcome::Ready)
        }
        Err(e) if e.is_timeout() => {
            if page.is_visible(&profile.search.no_results).await.unwrap_or(false) {
                info!("Portal reports no invoices for these filters");
            } else {
                warn!(error = %e, "Results table never appeared; treating as no data");
            }
            Ok(SearchOutcome::NoResults)
        }
        Err(e) => Err(e),
    }
}
