//! Scripted extraction service for tests, plus a PDF that passes inspection.

use super::ocr::ExtractionService;
use crate::error::{OcrError, OcrResult};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub(crate) struct Calls {
    pub uploads: usize,
    pub deletes: Vec<String>,
}

pub(crate) struct FakeService {
    pub calls: Arc<Mutex<Calls>>,
    pub reply: Result<Value, &'static str>,
}

impl FakeService {
    pub fn replying(reply: Result<Value, &'static str>) -> (Self, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        (
            Self {
                calls: calls.clone(),
                reply,
            },
            calls,
        )
    }
}

#[async_trait]
impl ExtractionService for FakeService {
    async fn upload(&self, _file_name: &str, _bytes: Vec<u8>) -> OcrResult<String> {
        self.calls.lock().unwrap().uploads += 1;
        Ok("file-123".into())
    }

    async fn extract(&self, _file_id: &str, _prompt: &str, _schema: &Value) -> OcrResult<Map<String, Value>> {
        match &self.reply {
            Ok(v) => Ok(v.as_object().cloned().unwrap()),
            Err(msg) => Err(OcrError::Api(msg.to_string())),
        }
    }

    async fn delete(&self, file_id: &str) -> OcrResult<()> {
        self.calls.lock().unwrap().deletes.push(file_id.to_string());
        Ok(())
    }
}

/// One empty page with a text-capable layout, so inspection passes and
/// the upload path runs.
pub(crate) fn minimal_pdf() -> Vec<u8> {
    use lopdf::{Dictionary, Document, Object, Stream, dictionary};
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(Dictionary::new(), Vec::new()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => Dictionary::new(),
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()]
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
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}
