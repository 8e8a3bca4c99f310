use crate::error::ConfigError;
use crate::model::PortalVariant;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

/// Everything a run needs, built once at start and passed by reference.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub variant: PortalVariant,
    pub paths: PathsConfig,
    pub portal: PortalConfig,
    pub retry: RetryConfig,
    pub timeouts: Timeouts,
    pub ocr: OcrConfig,
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub temp_root: PathBuf,
    pub export_dir: PathBuf,
    pub log_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            temp_root: PathBuf::from("temp_endesa_downloads"),
            export_dir: PathBuf::from("csv_exports"),
            log_file: PathBuf::from("logs/robot.log"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub login_url: String,
    pub search_url: String,
    /// Organizational-group filter applied before the search, if any.
    pub business_group: Option<String>,
    pub result_limit: u32,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: "https://endesa-atenea.my.site.com/miempresa/s/login/?language=es".into(),
            search_url: "https://endesa-atenea.my.site.com/miempresa/s/asistente-busqueda?tab=f"
                .into(),
            business_group: None,
            result_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_secs: 5,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

/// Bounds for every wait, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub navigation_ms: u64,
    pub login_form_ms: u64,
    pub login_success_ms: u64,
    pub cookie_banner_ms: u64,
    pub element_ms: u64,
    pub network_idle_ms: u64,
    pub results_ms: u64,
    pub cell_settle_ms: u64,
    pub next_page_ms: u64,
    pub download_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation_ms: 60_000,
            login_form_ms: 10_000,
            login_success_ms: 30_000,
            cookie_banner_ms: 5_000,
            element_ms: 15_000,
            network_idle_ms: 30_000,
            results_ms: 20_000,
            cell_settle_ms: 10_000,
            next_page_ms: 5_000,
            download_ms: 30_000,
        }
    }
}

impl Timeouts {
    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }
    pub fn login_form(&self) -> Duration {
        Duration::from_millis(self.login_form_ms)
    }
    pub fn login_success(&self) -> Duration {
        Duration::from_millis(self.login_success_ms)
    }
    pub fn cookie_banner(&self) -> Duration {
        Duration::from_millis(self.cookie_banner_ms)
    }
    pub fn element(&self) -> Duration {
        Duration::from_millis(self.element_ms)
    }
    pub fn network_idle(&self) -> Duration {
        Duration::from_millis(self.network_idle_ms)
    }
    pub fn results(&self) -> Duration {
        Duration::from_millis(self.results_ms)
    }
    pub fn cell_settle(&self) -> Duration {
        Duration::from_millis(self.cell_settle_ms)
    }
    pub fn next_page(&self) -> Duration {
        Duration::from_millis(self.next_page_ms)
    }
    pub fn download(&self) -> Duration {
        Duration::from_millis(self.download_ms)
    }
}

/// When the assisted extractor runs for a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrMode {
    /// On every row with a rendered document.
    Always,
    /// Only when deterministic extraction did not populate the row.
    #[default]
    Fallback,
    Off,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub mode: OcrMode,
    pub base_url: String,
    pub model: String,
    /// Overrides the built-in extraction prompt.
    pub prompt_file: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            mode: OcrMode::Fallback,
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o".into(),
            prompt_file: None,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the browser-automation sidecar.
    pub url: String,
    pub headless: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:3900".into(),
            headless: false,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Portal login, read from `PORTAL_USER` / `PORTAL_PASSWORD`.
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn from_env() -> Option<Self> {
        let username = env::var("PORTAL_USER").ok()?;
        let password = env::var("PORTAL_PASSWORD").ok()?;
        Some(Self::new(username, password))
    }
}
