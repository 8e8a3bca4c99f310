//! Typed errors for the robot library.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a browser session.
#[derive(Debug, Error)]
pub enum PortalError {
    /// A bounded wait expired.
    #[error("timed out after {timeout:?} on {what}")]
    Timeout { what: String, timeout: Duration },

    /// The selector matched nothing.
    #[error("element not found: {selector}")]
    NotFound { selector: String },

    /// The automation driver failed or answered with something unexpected.
    #[error("driver error: {0}")]
    Driver(String),

    /// The page is in a shape the robot does not understand.
    #[error("unexpected page structure: {0}")]
    Structure(String),
}

impl PortalError {
    pub fn timeout(what: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            timeout,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type PortalResult<T> = Result<T, PortalError>;

/// Errors that abort a whole extraction run.
#[derive(Debug, Error)]
pub enum RobotError {
    #[error("authentication failed after {attempts} attempts")]
    AuthenticationExhausted { attempts: u32 },

    #[error("portal credentials missing: {0}")]
    MissingCredentials(&'static str),
}

/// Deterministic extraction failures. None of these abort a row.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("document not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("document is empty")]
    Empty,
}

/// Assisted (AI-OCR) extraction failures.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Missing API key or invalid settings
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection failed or timed out
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response from the service
    #[error("API error: {0}")]
    Api(String),

    /// Response body did not have the expected shape
    #[error("parse error: {0}")]
    Parse(String),

    /// The local document cannot be submitted
    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

pub type OcrResult<T> = Result<T, OcrError>;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no {kind} document stored for {cups}/{invoice}")]
    NotFound {
        kind: &'static str,
        cups: String,
        invoice: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Rejected search parameters.
#[derive(Debug, Error, PartialEq)]
pub enum RequestError {
    #[error("invalid date '{0}', expected DD/MM/YYYY (e.g. 01/10/2025)")]
    Date(String),

    #[error("date range is reversed: {from} > {to}")]
    Range { from: String, to: String },

    #[error("invalid supply point id '{0}', expected 2 letters followed by 20 alphanumerics")]
    Cups(String),
}
