// src/portal/bridge.rs
//
// Page implementation that drives a browser-automation sidecar over HTTP.
// The sidecar owns the real browser; each session is one context + page.
//
//   POST   {url}/sessions             -> {"session_id": "..."}
//   POST   {url}/sessions/{id}/call   {"method", "params"} -> {"result"} | {"error"}
//   DELETE {url}/sessions/{id}

use super::{Browser, LoadState, Page};
use crate::config::BridgeConfig;
use crate::error::{PortalError, PortalResult};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Extra time allowed on the HTTP request beyond the in-browser bound.
const TRANSPORT_GRACE: Duration = Duration::from_secs(5);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct OpenRequest {
    headless: bool,
    accept_downloads: bool,
}

#[derive(Debug, Deserialize)]
struct OpenResponse {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct CallRequest<'a> {
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct CallResponse {
    #[serde(default)]
    result: Value,
    error: Option<CallError>,
}

#[derive(Debug, Deserialize)]
struct CallError {
    kind: String,
    #[serde(default)]
    message: String,
}

pub struct BridgeBrowser {
    client: Client,
    base_url: String,
    headless: bool,
}

impl BridgeBrowser {
    pub fn new(cfg: &BridgeConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: cfg.url.trim_end_matches('/').to_string(),
            headless: cfg.headless,
        }
    }
}

#[async_trait]
impl Browser for BridgeBrowser {
    async fn open(&self) -> PortalResult<Box<dyn Page>> {
        let resp = self
            .client
            .post(format!("{}/sessions", self.base_url))
            .json(&OpenRequest {
                headless: self.headless,
                accept_downloads: true,
            })
            .timeout(DEFAULT_CALL_TIMEOUT)
            .send()
            .await
            .map_err(|e| PortalError::Driver(format!("cannot reach automation bridge: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PortalError::Driver(format!(
                "bridge refused session {status}: {body}"
            )));
        }

        let opened: OpenResponse = resp
            .json()
            .await
            .map_err(|e| PortalError::Driver(format!("bad session response: {e}")))?;
        info!(session = %opened.session_id, headless = self.headless, "Browser session opened");

        Ok(Box::new(BridgePage {
            client: self.client.clone(),
            endpoint: format!("{}/sessions/{}", self.base_url, opened.session_id),
            closed: false,
        }))
    }
}

pub struct BridgePage {
    client: Client,
    endpoint: String,
    closed: bool,
}

impl BridgePage {
    async fn call(&self, method: &str, params: Value, bound: Option<Duration>) -> PortalResult<Value> {
        if self.closed {
            return Err(PortalError::Driver("session already closed".into()));
        }
        let bound = bound.unwrap_or(DEFAULT_CALL_TIMEOUT);
        debug!(method, "bridge call");

        let resp = self
            .client
            .post(format!("{}/call", self.endpoint))
            .json(&CallRequest { method, params })
            .timeout(bound + TRANSPORT_GRACE)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PortalError::timeout(method, bound)
                } else {
                    PortalError::Driver(e.to_string())
                }
            })?;

        let body: CallResponse = resp
            .json()
            .await
            .map_err(|e| PortalError::Driver(format!("bad bridge response to {method}: {e}")))?;

        match body.error {
            Some(err) => Err(map_error(method, err, bound)),
            None => Ok(body.result),
        }
    }
}

fn map_error(method: &str, err: CallError, bound: Duration) -> PortalError {
    match err.kind.as_str() {
        "timeout" => PortalError::timeout(format!("{method}: {}", err.message), bound),
        "not_found" => PortalError::NotFound {
            selector: err.message,
        },
        _ => PortalError::Driver(format!("{method}: {} ({})", err.message, err.kind)),
    }
}

fn decode_download(result: &Value) -> PortalResult<Vec<u8>> {
    let data = result
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| PortalError::Driver("download result carries no data".into()))?;
    STANDARD
        .decode(data)
        .map_err(|e| PortalError::Driver(format!("download payload is not base64: {e}")))
}

fn ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

#[async_trait]
impl Page for BridgePage {
    async fn goto(&mut self, url: &str, ready: LoadState, timeout: Duration) -> PortalResult<()> {
        self.call(
            "goto",
            json!({ "url": url, "wait_until": ready, "timeout_ms": ms(timeout) }),
            Some(timeout),
        )
        .await
        .map(drop)
    }

    async fn fill(&mut self, selector: &str, value: &str) -> PortalResult<()> {
        self.call("fill", json!({ "selector": selector, "value": value }), None)
            .await
            .map(drop)
    }

    async fn click(&mut self, selector: &str, timeout: Duration) -> PortalResult<()> {
        self.call(
            "click",
            json!({ "selector": selector, "timeout_ms": ms(timeout) }),
            Some(timeout),
        )
        .await
        .map(drop)
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> PortalResult<()> {
        self.call(
            "wait_for_selector",
            json!({ "selector": selector, "timeout_ms": ms(timeout) }),
            Some(timeout),
        )
        .await
        .map(drop)
    }

    async fn wait_for_load(&mut self, state: LoadState, timeout: Duration) -> PortalResult<()> {
        self.call(
            "wait_for_load_state",
            json!({ "state": state, "timeout_ms": ms(timeout) }),
            Some(timeout),
        )
        .await
        .map(drop)
    }

    async fn count(&mut self, selector: &str) -> PortalResult<usize> {
        let v = self.call("count", json!({ "selector": selector }), None).await?;
        v.as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| PortalError::Driver(format!("count returned {v}")))
    }

    async fn texts(&mut self, selector: &str) -> PortalResult<Vec<String>> {
        let v = self
            .call("all_inner_texts", json!({ "selector": selector }), None)
            .await?;
        serde_json::from_value(v).map_err(|e| PortalError::Driver(format!("texts: {e}")))
    }

    async fn attribute(&mut self, selector: &str, name: &str) -> PortalResult<Option<String>> {
        let v = self
            .call("get_attribute", json!({ "selector": selector, "name": name }), None)
            .await?;
        Ok(v.as_str().map(str::to_string))
    }

    async fn is_visible(&mut self, selector: &str) -> PortalResult<bool> {
        let v = self.call("is_visible", json!({ "selector": selector }), None).await?;
        Ok(v.as_bool().unwrap_or(false))
    }

    async fn is_enabled(&mut self, selector: &str) -> PortalResult<bool> {
        let v = self.call("is_enabled", json!({ "selector": selector }), None).await?;
        Ok(v.as_bool().unwrap_or(false))
    }

    async fn download(&mut self, trigger: &str, timeout: Duration) -> PortalResult<Vec<u8>> {
        let v = self
            .call(
                "expect_download",
                json!({ "trigger": trigger, "timeout_ms": ms(timeout) }),
                Some(timeout),
            )
            .await?;
        decode_download(&v)
    }

    async fn close(&mut self) -> PortalResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let resp = self
            .client
            .delete(&self.endpoint)
            .timeout(DEFAULT_CALL_TIMEOUT)
            .send()
            .await;
        match resp {
            Ok(r) if r.status().is_success() => {
                info!("Browser session closed");
                Ok(())
            }
            Ok(r) => {
                warn!(status = %r.status(), "Bridge refused to close session");
                Err(PortalError::Driver(format!("close failed: {}", r.status())))
            }
            Err(e) => Err(PortalError::Driver(format!("close failed: {e}"))),
        }
    }
}
