//! Extraction subsystem - document bytes → confidence-scored fields
//!
//! 1. OCR the document.
//! 2. Keep OCR fields that are confident and structurally sound.
//! 3. If anything was rejected or a mandatory field is missing, ask the LLM
//!    to correct those fields and merge its answer over the weak ones.
//!
//! Nothing is persisted here; the pipeline owns the document record.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use onboard_core::blob::BlobError;
use onboard_core::config::ExtractionConfig;
use onboard_core::error::FailureKind;
use onboard_core::llm::{LlmBackend, LlmError};
use onboard_core::models::{DocumentType, ExtractedField, FieldProvenance, FieldSet};
use onboard_core::ocr::{OcrBackend, OcrError};
use regex::Regex;
use thiserror::Error;

use super::prompts;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("OCR produced no usable text")]
    NoUsableText,

    #[error("Unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("OCR backend failed: {0}")]
    OcrBackend(OcrError),

    #[error("LLM backend failed: {0}")]
    LlmBackend(#[from] LlmError),

    #[error("Blob unavailable: {0}")]
    Blob(#[from] BlobError),
}

impl From<OcrError> for ExtractionError {
    fn from(e: OcrError) -> Self {
        match e {
            OcrError::UnsupportedContent(ct) => ExtractionError::UnsupportedContent(ct),
            other => ExtractionError::OcrBackend(other),
        }
    }
}

impl ExtractionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExtractionError::NoUsableText | ExtractionError::UnsupportedContent(_) => {
                FailureKind::Permanent
            }
            ExtractionError::OcrBackend(e) if e.is_transient() => FailureKind::Transient,
            ExtractionError::OcrBackend(_) => FailureKind::Permanent,
            ExtractionError::LlmBackend(
                LlmError::Malformed(_) | LlmError::RetryExhausted { .. },
            ) => FailureKind::Transient,
            ExtractionError::LlmBackend(e) if e.is_transient() => FailureKind::Transient,
            ExtractionError::LlmBackend(_) => FailureKind::Permanent,
            ExtractionError::Blob(BlobError::Io(_)) => FailureKind::Transient,
            ExtractionError::Blob(_) => FailureKind::Permanent,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ExtractionError::NoUsableText => "no_usable_text",
            ExtractionError::UnsupportedContent(_) => "unsupported_content",
            ExtractionError::OcrBackend(_) => "ocr_backend",
            ExtractionError::LlmBackend(_) => "llm_backend",
            ExtractionError::Blob(_) => "blob_unavailable",
        }
    }
}

pub struct ExtractionService {
    ocr: Arc<dyn OcrBackend>,
    llm: Arc<dyn LlmBackend>,
    config: ExtractionConfig,
}

impl ExtractionService {
    pub fn new(ocr: Arc<dyn OcrBackend>, llm: Arc<dyn LlmBackend>, config: ExtractionConfig) -> Self {
        Self { ocr, llm, config }
    }

    pub async fn extract(
        &self,
        bytes: &[u8],
        content_type: &str,
        document_type: DocumentType,
    ) -> Result<FieldSet, ExtractionError> {
        let ocr = self.ocr.recognize(bytes, content_type).await?;

        if ocr.is_unusable() {
            return Err(ExtractionError::NoUsableText);
        }

        let mut fields: BTreeMap<String, ExtractedField> = BTreeMap::new();
        // Structurally sound but below threshold: kept unless the LLM does better.
        let mut weak: BTreeMap<String, ExtractedField> = BTreeMap::new();
        let mut focus: Vec<String> = Vec::new();

        for f in ocr.fields {
            let value = f.value.trim().to_string();
            let sound = is_structurally_sound(&f.name, &value);
            let field = ExtractedField {
                value,
                confidence: f.confidence.clamp(0.0, 1.0),
                provenance: FieldProvenance::Ocr,
            };

            if sound && field.confidence >= self.config.confidence_threshold {
                fields.insert(f.name, field);
            } else {
                if sound {
                    weak.insert(f.name.clone(), field);
                }
                if !focus.contains(&f.name) {
                    focus.push(f.name);
                }
            }
        }

        for name in document_type.mandatory_fields() {
            if !fields.contains_key(*name) && !focus.iter().any(|f| f == name) {
                focus.push(name.to_string());
            }
        }

        if !focus.is_empty() {
            tracing::debug!(
                document_type = %document_type,
                focus = ?focus,
                "Requesting LLM correction"
            );

            let prompt = prompts::extraction_prompt(document_type, &ocr.text, &focus);
            let response = self
                .llm
                .complete(&prompt, prompts::EXTRACTION_SCHEMA_HINT)
                .await?;

            for (name, field) in parse_llm_fields(&response, self.config.llm_default_confidence) {
                if fields.contains_key(&name) {
                    continue;
                }
                if let Some(existing) = weak.get(&name) {
                    if existing.confidence >= field.confidence {
                        continue;
                    }
                }
                weak.remove(&name);
                fields.insert(name, field);
            }
        }

        for (name, field) in weak {
            fields.entry(name).or_insert(field);
        }

        let unresolved: Vec<String> = document_type
            .mandatory_fields()
            .iter()
            .filter(|name| !fields.contains_key(**name))
            .map(|name| name.to_string())
            .collect();

        Ok(FieldSet { fields, unresolved })
    }
}

/// Read `{"fields": {name: {"value", "confidence"} | "value"}}` leniently,
/// dropping nulls and structurally unsound values.
fn parse_llm_fields(response: &serde_json::Value, default_confidence: f64) -> Vec<(String, ExtractedField)> {
    let map = match response.get("fields").and_then(|f| f.as_object()) {
        Some(m) => m,
        None => match response.as_object() {
            Some(m) => m,
            None => return Vec::new(),
        },
    };

    map.iter()
        .filter_map(|(name, entry)| {
            let (raw, confidence) = match entry {
                serde_json::Value::Object(o) => (
                    o.get("value")?.clone(),
                    o.get("confidence")
                        .and_then(|c| c.as_f64())
                        .unwrap_or(default_confidence),
                ),
                other => (other.clone(), default_confidence),
            };

            let value = match raw {
                serde_json::Value::String(s) => s.trim().to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => return None,
            };

            if !is_structurally_sound(name, &value) {
                return None;
            }

            Some((
                name.clone(),
                ExtractedField {
                    value,
                    confidence: confidence.clamp(0.0, 1.0),
                    provenance: FieldProvenance::LlmCorrected,
                },
            ))
        })
        .collect()
}

fn iso_date() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])$").ok())
        .as_ref()
}

/// Cheap shape checks: dates must be ISO, identifiers need an alphanumeric.
pub fn is_structurally_sound(name: &str, value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    if name == "date_of_birth" || name.ends_with("_date") {
        return iso_date().map_or(false, |re| re.is_match(value));
    }
    if name.ends_with("_number") || name == "tax_id" {
        return value.chars().any(|c| c.is_ascii_alphanumeric());
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use onboard_core::ocr::{OcrField, OcrOutput};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedOcr(Result<OcrOutput, fn() -> OcrError>);

    #[async_trait]
    impl OcrBackend for FixedOcr {
        async fn recognize(&self, _bytes: &[u8], _ct: &str) -> Result<OcrOutput, OcrError> {
            match &self.0 {
                Ok(o) => Ok(o.clone()),
                Err(f) => Err(f()),
            }
        }
    }

    struct ScriptedLlm {
        response: serde_json::Value,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(response: serde_json::Value) -> Self {
            Self {
                response,
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedLlm {
        async fn complete(&self, prompt: &str, _hint: &str) -> Result<serde_json::Value, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.response.clone())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn field(name: &str, value: &str, confidence: f64) -> OcrField {
        OcrField {
            name: name.to_string(),
            value: value.to_string(),
            confidence,
        }
    }

    fn service(ocr: OcrOutput, llm: Arc<ScriptedLlm>) -> ExtractionService {
        ExtractionService::new(Arc::new(FixedOcr(Ok(ocr))), llm, ExtractionConfig::default())
    }

    #[tokio::test]
    async fn test_confident_ocr_skips_llm() {
        let llm = Arc::new(ScriptedLlm::new(serde_json::json!({})));
        let ocr = OcrOutput {
            text: "ID CARD".to_string(),
            fields: vec![
                field("full_name", "Jane Doe", 0.95),
                field("id_number", "X1234567", 0.95),
                field("date_of_birth", "1990-04-01", 0.95),
            ],
        };

        let set = service(ocr, llm.clone())
            .extract(b"img", "image/png", DocumentType::IdCard)
            .await
            .unwrap();

        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
        assert!(set.is_complete());
        assert!(set
            .fields
            .values()
            .all(|f| f.provenance == FieldProvenance::Ocr));
    }

    #[tokio::test]
    async fn test_low_confidence_field_is_corrected_by_llm() {
        let llm = Arc::new(ScriptedLlm::new(serde_json::json!({
            "fields": {
                "id_number": { "value": "X1234567", "confidence": 0.9 },
                "full_name": { "value": "J0hn", "confidence": 0.99 }
            }
        })));
        let ocr = OcrOutput {
            text: "ID CARD".to_string(),
            fields: vec![
                field("full_name", "Jane Doe", 0.93),
                field("id_number", "X12S4567", 0.41),
                field("date_of_birth", "1990-04-01", 0.97),
            ],
        };

        let set = service(ocr, llm.clone())
            .extract(b"img", "image/png", DocumentType::IdCard)
            .await
            .unwrap();

        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        let id = set.get("id_number").unwrap();
        assert_eq!(id.value, "X1234567");
        assert_eq!(id.provenance, FieldProvenance::LlmCorrected);
        // High-confidence OCR output wins over the LLM.
        let name = set.get("full_name").unwrap();
        assert_eq!(name.value, "Jane Doe");
        assert_eq!(name.provenance, FieldProvenance::Ocr);
        assert!(set.is_complete());
    }

    #[tokio::test]
    async fn test_ambiguous_date_goes_to_llm_even_when_confident() {
        let llm = Arc::new(ScriptedLlm::new(serde_json::json!({
            "fields": { "date_of_birth": "1990-04-01" }
        })));
        let ocr = OcrOutput {
            text: "ID CARD".to_string(),
            fields: vec![
                field("full_name", "Jane Doe", 0.95),
                field("id_number", "X1234567", 0.95),
                field("date_of_birth", "01/04/90", 0.99),
            ],
        };

        let set = service(ocr, llm.clone())
            .extract(b"img", "image/png", DocumentType::IdCard)
            .await
            .unwrap();

        let dob = set.get("date_of_birth").unwrap();
        assert_eq!(dob.value, "1990-04-01");
        assert_eq!(dob.provenance, FieldProvenance::LlmCorrected);
        assert_eq!(dob.confidence, ExtractionConfig::default().llm_default_confidence);
        let prompt = llm.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("focus on them: date_of_birth"));
    }

    #[tokio::test]
    async fn test_missing_mandatory_field_stays_unresolved() {
        let llm = Arc::new(ScriptedLlm::new(serde_json::json!({
            "fields": { "id_number": { "value": null } }
        })));
        let ocr = OcrOutput {
            text: "ID CARD".to_string(),
            fields: vec![
                field("full_name", "Jane Doe", 0.95),
                field("date_of_birth", "1990-04-01", 0.95),
            ],
        };

        let set = service(ocr, llm.clone())
            .extract(b"img", "image/png", DocumentType::IdCard)
            .await
            .unwrap();

        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(set.unresolved, vec!["id_number".to_string()]);
    }

    #[tokio::test]
    async fn test_weak_ocr_value_kept_when_llm_has_nothing_better() {
        let llm = Arc::new(ScriptedLlm::new(serde_json::json!({ "fields": {} })));
        let ocr = OcrOutput {
            text: "BANK".to_string(),
            fields: vec![
                field("account_holder", "Jane Doe", 0.55),
                field("account_number", "12-34-56", 0.9),
                field("bank_name", "First Bank", 0.9),
            ],
        };

        let set = service(ocr, llm)
            .extract(b"pdf", "application/pdf", DocumentType::BankStatement)
            .await
            .unwrap();

        let holder = set.get("account_holder").unwrap();
        assert_eq!(holder.confidence, 0.55);
        assert_eq!(holder.provenance, FieldProvenance::Ocr);
        assert!(set.is_complete());
    }

    #[tokio::test]
    async fn test_blank_ocr_is_no_usable_text() {
        let llm = Arc::new(ScriptedLlm::new(serde_json::json!({})));
        let err = service(OcrOutput::default(), llm)
            .extract(b"", "image/png", DocumentType::Passport)
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractionError::NoUsableText));
        assert_eq!(err.kind(), FailureKind::Permanent);
    }

    #[tokio::test]
    async fn test_ocr_errors_map_to_failure_kinds() {
        let llm: Arc<dyn LlmBackend> = Arc::new(ScriptedLlm::new(serde_json::json!({})));

        let unsupported = ExtractionService::new(
            Arc::new(FixedOcr(Err(|| OcrError::UnsupportedContent("application/zip".into())))),
            llm.clone(),
            ExtractionConfig::default(),
        );
        let err = unsupported
            .extract(b"zip", "application/zip", DocumentType::Other)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unsupported_content");
        assert_eq!(err.kind(), FailureKind::Permanent);

        let unavailable = ExtractionService::new(
            Arc::new(FixedOcr(Err(|| OcrError::Api {
                code: 503,
                message: "down".into(),
            }))),
            llm,
            ExtractionConfig::default(),
        );
        let err = unavailable
            .extract(b"png", "image/png", DocumentType::Other)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ocr_backend");
        assert_eq!(err.kind(), FailureKind::Transient);
    }

    #[test]
    fn test_structural_checks() {
        assert!(is_structurally_sound("expiry_date", "2031-12-31"));
        assert!(!is_structurally_sound("expiry_date", "31.12.2031"));
        assert!(!is_structurally_sound("issue_date", "2031-13-01"));
        assert!(!is_structurally_sound("passport_number", "---"));
        assert!(is_structurally_sound("passport_number", "L898902C3"));
        assert!(!is_structurally_sound("full_name", ""));
        assert!(is_structurally_sound("nationality", "UTO"));
    }
}
