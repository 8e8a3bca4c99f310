// src/storage.rs
//
// Downloaded artifacts on disk:  {temp_root}/{FOLDER}/{cups}_{invoice}.{ext}

use crate::error::StoreError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Machine-readable invoice (XML).
    StructuredText,
    /// Rendered invoice (PDF).
    Rendered,
    /// HTML presentation copy.
    Presentation,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 3] = [
        DocumentKind::StructuredText,
        DocumentKind::Rendered,
        DocumentKind::Presentation,
    ];

    pub fn folder(&self) -> &'static str {
        match self {
            DocumentKind::StructuredText => "XML",
            DocumentKind::Rendered => "PDF",
            DocumentKind::Presentation => "HTML",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::StructuredText => "xml",
            DocumentKind::Rendered => "pdf",
            DocumentKind::Presentation => "html",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder())
    }
}

impl FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xml" => Ok(DocumentKind::StructuredText),
            "pdf" => Ok(DocumentKind::Rendered),
            "html" => Ok(DocumentKind::Presentation),
            other => Err(format!("unknown document kind '{other}' (xml, pdf or html)")),
        }
    }
}

/// A stored document, base64-encoded for transport.
#[derive(Debug, Clone, Serialize)]
pub struct EncodedDocument {
    pub file_name: String,
    pub kind: DocumentKind,
    pub size: usize,
    pub content_base64: String,
}

#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, kind: DocumentKind, cups: &str, invoice: &str) -> PathBuf {
        self.root
            .join(kind.folder())
            .join(format!("{}_{}.{}", sanitize(cups), sanitize(invoice), kind.extension()))
    }

    /// Write `bytes` for the given key, replacing any earlier copy.
    pub fn write(
        &self,
        kind: DocumentKind,
        cups: &str,
        invoice: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let path = self.path(kind, cups, invoice);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "Document stored");
        Ok(path)
    }

    pub fn read(&self, kind: DocumentKind, cups: &str, invoice: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path(kind, cups, invoice);
        if !path.is_file() {
            return Err(StoreError::NotFound {
                kind: kind.folder(),
                cups: cups.to_string(),
                invoice: invoice.to_string(),
            });
        }
        Ok(fs::read(path)?)
    }

    pub fn read_base64(
        &self,
        kind: DocumentKind,
        cups: &str,
        invoice: &str,
    ) -> Result<EncodedDocument, StoreError> {
        let bytes = self.read(kind, cups, invoice)?;
        let file_name = self
            .path(kind, cups, invoice)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(EncodedDocument {
            file_name,
            kind,
            size: bytes.len(),
            content_base64: STANDARD.encode(&bytes),
        })
    }
}

/// Invoice numbers occasionally carry `/` or spaces.
fn sanitize(part: &str) -> String {
    part.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}
