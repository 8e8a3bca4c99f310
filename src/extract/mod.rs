// src/extract/mod.rs

#[cfg(test)]
pub(crate) mod fake;
pub mod ocr;
pub mod pdf;
pub mod xml;

pub use ocr::{AssistedExtractor, ExtractionService, OpenAiService};
