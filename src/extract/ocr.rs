// src/extract/ocr.rs
//
// Assisted extraction: the rendered invoice is uploaded to an
// OpenAI-compatible service and read back as a flat field map constrained
// by a strict JSON schema of `BillingDetail`.

use super::pdf::{self, PdfContent};
use crate::config::OcrConfig;
use crate::error::{OcrError, OcrResult};
use crate::merge;
use crate::model::{BillingDetail, InvoiceRecord};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use schemars::schema_for;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const SCHEMA_NAME: &str = "invoice_extraction";

const DEFAULT_PROMPT: &str = r#"You are reading a Spanish electricity invoice (Endesa).
Extract the billing fields defined by the response schema.

Rules:
- Amounts are in euros. Return plain numbers with a dot as decimal separator (1234.56), no currency symbols.
- Per-period fields (_p1 .. _p6) refer to tariff periods P1..P6 as printed on the invoice.
- power_toll / power_charges are the "termino de potencia" toll and charges; energy_toll / energy_charges the "termino de energia" ones.
- consumption_kwh_* are energy quantities in kWh, not amounts.
- Dates as DD/MM/YYYY.
- Use null for anything that is not printed on the invoice. Never guess."#;

/// Operations the assisted extractor needs from the remote service.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Upload a document, returning the service's file id.
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> OcrResult<String>;

    /// Run structured extraction over an uploaded file.
    async fn extract(&self, file_id: &str, prompt: &str, schema: &Value) -> OcrResult<Map<String, Value>>;

    async fn delete(&self, file_id: &str) -> OcrResult<()>;
}

/// JSON schema of the detail fields in the shape strict structured output
/// requires: closed object, every property listed as required.
pub fn detail_schema() -> Value {
    let schema = schema_for!(BillingDetail);
    let mut value = serde_json::to_value(schema).unwrap_or_default();

    if let Value::Object(map) = &mut value {
        map.remove("$schema");
        map.remove("definitions");
        map.insert("additionalProperties".into(), Value::Bool(false));

        if let Some(Value::Object(props)) = map.get_mut("properties") {
            for prop in props.values_mut() {
                if let Value::Object(p) = prop {
                    p.remove("format");
                    p.remove("minimum");
                }
            }
        }
        let required: Vec<Value> = map
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().map(Value::String).collect())
            .unwrap_or_default();
        map.insert("required".into(), Value::Array(required));
    }
    value
}

/// Pull the model's JSON text out of a `/responses` body and parse it.
fn parse_output(body: &Value) -> OcrResult<Map<String, Value>> {
    let text = match body.get("output_text").and_then(Value::as_str) {
        Some(t) => t.to_string(),
        None => body
            .get("output")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|item| item.get("content").and_then(Value::as_array))
            .flatten()
            .filter(|c| c.get("type").and_then(Value::as_str) == Some("output_text"))
            .filter_map(|c| c.get("text").and_then(Value::as_str))
            .collect::<String>(),
    };

    if text.trim().is_empty() {
        return Err(OcrError::Parse("response carried no output text".into()));
    }

    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(OcrError::Parse(format!("expected a JSON object, got {other}"))),
        Err(e) => {
            let preview: String = text.chars().take(200).collect();
            Err(OcrError::Parse(format!("{e}: {preview}")))
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

/// OpenAI REST implementation.
pub struct OpenAiService {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl OpenAiService {
    pub fn new(cfg: &OcrConfig, api_key: Option<SecretString>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key,
        }
    }

    /// Key from `OPENAI_API_KEY`. A missing key surfaces on first use.
    pub fn from_env(cfg: &OcrConfig) -> Self {
        let key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);
        Self::new(cfg, key)
    }

    fn bearer(&self) -> OcrResult<String> {
        self.api_key
            .as_ref()
            .map(|k| format!("Bearer {}", k.expose_secret()))
            .ok_or_else(|| OcrError::Config("OPENAI_API_KEY is not set".into()))
    }

    async fn check(response: reqwest::Response) -> OcrResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, error = %body, "Extraction service error");
        Err(OcrError::Api(format!("{status}: {body}")))
    }
}

#[async_trait]
impl ExtractionService for OpenAiService {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> OcrResult<String> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .map_err(|e| OcrError::InvalidDocument(e.to_string()))?;
        let form = Form::new().text("purpose", "assistants").part("file", part);

        let response = self
            .client
            .post(format!("{}/files", self.base_url))
            .header("Authorization", self.bearer()?)
            .multipart(form)
            .send()
            .await
            .map_err(|e| OcrError::Network(e.to_string()))?;
        let uploaded: UploadResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| OcrError::Parse(e.to_string()))?;

        debug!(file_id = %uploaded.id, "Document uploaded");
        Ok(uploaded.id)
    }

    async fn extract(&self, file_id: &str, prompt: &str, schema: &Value) -> OcrResult<Map<String, Value>> {
        let request = json!({
            "model": self.model,
            "input": [{
                "role": "user",
                "content": [
                    {"type": "input_file", "file_id": file_id},
                    {"type": "input_text", "text": prompt}
                ]
            }],
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": SCHEMA_NAME,
                    "strict": true,
                    "schema": schema
                }
            }
        });

        let response = self
            .client
            .post(format!("{}/responses", self.base_url))
            .header("Authorization", self.bearer()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| OcrError::Network(e.to_string()))?;
        let body: Value = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| OcrError::Parse(e.to_string()))?;

        parse_output(&body)
    }

    async fn delete(&self, file_id: &str) -> OcrResult<()> {
        let response = self
            .client
            .delete(format!("{}/files/{file_id}", self.base_url))
            .header("Authorization", self.bearer()?)
            .send()
            .await
            .map_err(|e| OcrError::Network(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }
}

/// Prompt from the configured file, or the built-in one.
pub fn load_prompt(cfg: &OcrConfig) -> OcrResult<String> {
    match &cfg.prompt_file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| OcrError::Config(format!("prompt file {}: {e}", path.display()))),
        None => Ok(DEFAULT_PROMPT.to_string()),
    }
}

pub struct AssistedExtractor {
    service: Box<dyn ExtractionService>,
    prompt: String,
    schema: Value,
}

impl AssistedExtractor {
    pub fn new(service: Box<dyn ExtractionService>, prompt: impl Into<String>) -> Self {
        Self {
            service,
            prompt: prompt.into(),
            schema: detail_schema(),
        }
    }

    /// Field proposals for one rendered document. The upload is always
    /// deleted once it exists, whatever the extraction outcome.
    pub async fn propose(&self, path: &Path) -> OcrResult<Map<String, Value>> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| OcrError::InvalidDocument(format!("{}: {e}", path.display())))?;

        let prompt = match pdf::inspect(&bytes) {
            PdfContent::Error(e) => return Err(OcrError::InvalidDocument(e)),
            PdfContent::ScannedImage => self.prompt.clone(),
            PdfContent::Text(text) => format!(
                "{}\n\nText layer of the document (may be incomplete):\n{}",
                self.prompt,
                pdf::text_hint(&text)
            ),
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "invoice.pdf".into());

        let file_id = self.service.upload(&file_name, bytes).await?;
        let result = self.service.extract(&file_id, &prompt, &self.schema).await;
        if let Err(e) = self.service.delete(&file_id).await {
            warn!(file_id = %file_id, error = %e, "Could not delete uploaded document");
        }
        result
    }

    /// Merge the service's proposals into `record`. Returns `false` on any
    /// failure, leaving the record as it was.
    pub async fn apply(&self, path: &Path, record: &mut InvoiceRecord) -> bool {
        let proposals = match self.propose(path).await {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    invoice = %record.header.invoice_number,
                    error = %e,
                    "Assisted extraction failed"
                );
                return false;
            }
        };

        let report = merge::apply_proposals(&mut record.detail, &proposals);
        info!(
            invoice = %record.header.invoice_number,
            filled = report.filled.len(),
            agreed = report.agreed,
            discrepancies = report.discrepancies.len(),
            skipped = report.skipped,
            "Assisted extraction merged"
        );
        record.discrepancies.extend(report.discrepancies);
        true
    }
}
