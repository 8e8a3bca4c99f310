// src/robot/auth.rs

use super::profile::LoginSelectors;
use crate::config::{Credentials, Timeouts};
use crate::error::{PortalError, PortalResult};
use crate::portal::Page;
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One login cycle on an already-loaded login page.
///
/// `Ok(false)` is an ordinary rejected login (wrong credentials, portal slow
/// to show the landing page). `Err` means the page is not what we expected,
/// e.g. the login form never showed up.
pub async fn login(
    page: &mut dyn Page,
    sel: &LoginSelectors,
    creds: &Credentials,
    timeouts: &Timeouts,
) -> PortalResult<bool> {
    info!(user = %creds.username, "Attempting login");

    page.wait_for(&sel.form, timeouts.login_form())
        .await
        .map_err(|e| match e {
            PortalError::Timeout { .. } => {
                PortalError::Structure(format!("login form '{}' never appeared", sel.form))
            }
            other => other,
        })?;

    page.fill(&sel.username, &creds.username).await?;
    page.fill(&sel.password, creds.password.expose_secret()).await?;
    page.click(&sel.submit, timeouts.element()).await?;

    match page.wait_for(&sel.success, timeouts.login_success()).await {
        Ok(()) => {
            info!("Login succeeded");
            Ok(true)
        }
        Err(e) if e.is_timeout() => {
            let rejected = page.is_visible(&sel.error_banner).await.unwrap_or(false);
            if rejected {
                warn!("Login rejected: credentials refused by the portal");
            } else {
                warn!("Login not confirmed: success indicator never appeared");
            }
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Dismiss the consent banner if it shows up; its absence is fine.
pub async fn accept_cookies(page: &mut dyn Page, selector: &str, bound: Duration) {
    match page.wait_for(selector, bound).await {
        Ok(()) => match page.click(selector, bound).await {
            Ok(()) => {
                info!("Cookie banner accepted");
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Err(e) => warn!(error = %e, "Could not click cookie banner"),
        },
        Err(e) if e.is_timeout() => debug!("No cookie banner, continuing"),
        Err(e) => warn!(error = %e, "Cookie banner check failed"),
    }
}
