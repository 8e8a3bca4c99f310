// src/extract/pdf.rs

use lopdf::Document;
use tracing::{info, warn};

/// Result of inspecting a rendered invoice before it is sent for assisted
/// extraction.
#[derive(Debug)]
pub enum PdfContent {
    /// The PDF carries a text layer.
    Text(String),
    /// Image-only pages; only the service's OCR can read it.
    ScannedImage,
    /// Not a readable PDF at all.
    Error(String),
}

/// Minimum number of non-whitespace characters we expect from a
/// "real" text PDF. Below this threshold we treat it as scanned.
const MIN_TEXT_CHARS: usize = 30;

/// Longest text layer forwarded to the service as a hint.
pub const MAX_HINT_CHARS: usize = 12_000;

pub fn inspect(pdf_bytes: &[u8]) -> PdfContent {
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfContent::Error(format!("Failed to parse PDF: {e}")),
    };

    if looks_like_scanned(&doc) {
        info!("PDF structural check: likely scanned / image-only");
        return PdfContent::ScannedImage;
    }

    match pdf_extract::extract_text_from_mem(pdf_bytes) {
        Ok(text) => {
            let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
            if meaningful < MIN_TEXT_CHARS {
                info!(chars = meaningful, "Extracted text too short, treating as scanned");
                PdfContent::ScannedImage
            } else {
                info!(chars = meaningful, "Text layer extracted");
                PdfContent::Text(text)
            }
        }
        Err(e) => {
            warn!(error = %e, "pdf-extract failed, may be scanned or corrupted");
            PdfContent::ScannedImage
        }
    }
}

/// First `MAX_HINT_CHARS` characters of a text layer.
pub fn text_hint(text: &str) -> &str {
    match text.char_indices().nth(MAX_HINT_CHARS) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

/// A page with XObject images but no font resources is a scanned page.
/// The document counts as scanned when at least 80% of pages are.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false;
    }

    let mut image_only_pages = 0;

    for object_id in pages.values() {
        let Ok(page_dict) = doc.get_object(*object_id).and_then(|o| o.as_dict()) else {
            continue;
        };

        let resources = page_dict
            .get(b"Resources")
            .ok()
            .and_then(|r| doc.dereference(r).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok());

        let non_empty = |key: &[u8]| {
            resources
                .and_then(|res| res.get(key).ok())
                .and_then(|o| doc.dereference(o).ok())
                .and_then(|(_, resolved)| resolved.as_dict().ok())
                .is_some_and(|d| !d.is_empty())
        };

        if non_empty(b"XObject") && !non_empty(b"Font") {
            image_only_pages += 1;
        }
    }

    let total = pages.len();
    let ratio = image_only_pages as f64 / total as f64;
    info!(
        total_pages = total,
        image_only = image_only_pages,
        ratio = format!("{ratio:.2}"),
        "Scanned-page analysis"
    );

    ratio >= 0.8
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{Object, Stream, dictionary};

    fn single_page(resources: lopdf::Dictionary) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let resources_id = doc.add_object(resources);
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => resources_id
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    #[test]
    fn garbage_bytes_are_an_error() {
        let result = inspect(b"this is not a pdf");
        assert!(matches!(result, PdfContent::Error(_)));
    }

    #[test]
    fn image_only_page_is_scanned() {
        let mut doc = single_page(lopdf::Dictionary::new());
        let image_id = doc.add_object(Stream::new(
            dictionary! { "Type" => "XObject", "Subtype" => "Image" },
            Vec::new(),
        ));
        let resources_id = doc.add_object(dictionary! {
            "XObject" => dictionary! { "Im0" => image_id }
        });
        let page_id = *doc.get_pages().values().next().unwrap();
        doc.get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .unwrap()
            .set("Resources", resources_id);

        assert!(looks_like_scanned(&doc));
    }

    #[test]
    fn page_with_fonts_is_not_scanned() {
        let doc = single_page(dictionary! {
            "Font" => dictionary! { "F1" => dictionary! { "Type" => "Font" } }
        });
        assert!(!looks_like_scanned(&doc));
    }

    #[test]
    fn hint_is_cut_on_a_char_boundary() {
        let long = "ñ".repeat(MAX_HINT_CHARS + 5);
        assert_eq!(text_hint(&long).chars().count(), MAX_HINT_CHARS);
        assert_eq!(text_hint("corto"), "corto");
    }
}
