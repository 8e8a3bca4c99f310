//! Browser capability used by the robot.
//!
//! A [`Page`] is one exclusively-owned browser tab. Every method takes
//! `&mut self`, so two interactions against the same page can never be in
//! flight at once. Every wait carries its own bound; there is no global
//! timeout.

mod bridge;
#[cfg(test)]
pub(crate) mod fake;

pub use bridge::{BridgeBrowser, BridgePage};

use crate::error::PortalResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Readiness condition for navigations and load waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

#[async_trait]
pub trait Page: Send {
    async fn goto(&mut self, url: &str, ready: LoadState, timeout: Duration) -> PortalResult<()>;

    async fn fill(&mut self, selector: &str, value: &str) -> PortalResult<()>;

    async fn click(&mut self, selector: &str, timeout: Duration) -> PortalResult<()>;

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> PortalResult<()>;

    async fn wait_for_load(&mut self, state: LoadState, timeout: Duration) -> PortalResult<()>;

    /// Number of elements matching `selector` right now.
    async fn count(&mut self, selector: &str) -> PortalResult<usize>;

    /// Visible text of every element matching `selector`, in document order.
    async fn texts(&mut self, selector: &str) -> PortalResult<Vec<String>>;

    async fn attribute(&mut self, selector: &str, name: &str) -> PortalResult<Option<String>>;

    async fn is_visible(&mut self, selector: &str) -> PortalResult<bool>;

    async fn is_enabled(&mut self, selector: &str) -> PortalResult<bool>;

    /// Arm download interception, click `trigger`, and return the bytes of
    /// the file it produces.
    async fn download(&mut self, trigger: &str, timeout: Duration) -> PortalResult<Vec<u8>>;

    /// Tear the session down. Called exactly once per opened page.
    async fn close(&mut self) -> PortalResult<()>;
}

/// Opens fresh, isolated browser sessions.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn open(&self) -> PortalResult<Box<dyn Page>>;
}

// Selector builders. The syntax is the automation driver's (CSS plus the
// `>>` chaining, `text=`, `nth=` and `internal:label=` engines).

/// The `index`-th (0-based) match of `selector`.
pub fn nth(selector: &str, index: usize) -> String {
    format!("{selector} >> nth={index}")
}

/// `inner` scoped to matches of `outer`.
pub fn within(outer: &str, inner: &str) -> String {
    format!("{outer} >> {inner}")
}

/// Elements matching `selector` whose text is exactly `text`.
pub fn with_text(selector: &str, text: &str) -> String {
    format!("{selector} >> text=\"{}\"", escape(text))
}

/// Elements matching `selector` that contain `text`.
pub fn has_text(selector: &str, text: &str) -> String {
    format!("{selector}:has-text(\"{}\")", escape(text))
}

/// Input addressed by its label.
pub fn by_label(label: &str) -> String {
    format!("internal:label=\"{}\"", escape(label))
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
