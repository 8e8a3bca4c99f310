// src/robot/entities.rs
//
// Role ("entity") switching on portals that expose several sub-accounts
// behind one login.

use super::profile::EntitySelectors;
use crate::config::Timeouts;
use crate::error::PortalResult;
use crate::portal::{LoadState, Page, with_text};
use tracing::{info, warn};

/// Entries the role list uses as placeholders rather than real names.
const PLACEHOLDERS: [&str; 5] = ["", "null", "none", "-", "seleccione..."];

fn is_placeholder(name: &str) -> bool {
    PLACEHOLDERS.contains(&name.trim().to_lowercase().as_str())
}

/// Read the selectable entity names, in list order.
///
/// An empty result means the account has a single implicit entity.
pub async fn enumerate(
    page: &mut dyn Page,
    sel: &EntitySelectors,
    timeouts: &Timeouts,
) -> PortalResult<Vec<String>> {
    page.click(&sel.switch_button, timeouts.element()).await?;
    if let Err(e) = page.wait_for(&sel.items, timeouts.element()).await {
        warn!(error = %e, "Role list did not open; assuming a single entity");
        close_switch(page, sel, timeouts).await;
        return Ok(Vec::new());
    }

    let names: Vec<String> = page
        .texts(&sel.items)
        .await?
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !is_placeholder(n))
        .collect();

    close_switch(page, sel, timeouts).await;
    info!(count = names.len(), "Entities available");
    Ok(names)
}

/// Make `name` the active entity. Does nothing beyond closing the switch if
/// it already is.
pub async fn select(
    page: &mut dyn Page,
    sel: &EntitySelectors,
    name: &str,
    timeouts: &Timeouts,
) -> PortalResult<()> {
    page.click(&sel.switch_button, timeouts.element()).await?;
    page.wait_for(&sel.items, timeouts.element()).await?;

    let active = page.texts(&sel.active_item).await?;
    if active.iter().any(|a| a.trim() == name) {
        info!(entity = %name, "Entity already active");
        close_switch(page, sel, timeouts).await;
        return Ok(());
    }

    page.click(&with_text(&sel.items, name), timeouts.element())
        .await?;
    page.wait_for_load(LoadState::NetworkIdle, timeouts.network_idle())
        .await?;
    info!(entity = %name, "Entity selected");
    Ok(())
}

async fn close_switch(page: &mut dyn Page, sel: &EntitySelectors, timeouts: &Timeouts) {
    if let Err(e) = page.click(&sel.close_button, timeouts.element()).await {
        warn!(error = %e, "Could not close the role switch");
    }
}
