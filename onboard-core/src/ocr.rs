//! OCR backend interface and HTTP adapter.
//!
//! The OCR service receives raw document bytes and answers with the
//! recognized text plus the key/value fields it could locate, each with a
//! confidence in `[0, 1]`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::OcrSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrField {
    pub name: String,
    pub value: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    #[serde(default)]
    pub fields: Vec<OcrField>,
}

impl OcrOutput {
    /// No text and no located fields: nothing to extract from.
    pub fn is_unusable(&self) -> bool {
        self.text.trim().is_empty() && self.fields.iter().all(|f| f.value.trim().is_empty())
    }
}

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("OCR service error ({code}): {message}")]
    Api { code: u16, message: String },
}

impl OcrError {
    pub fn is_transient(&self) -> bool {
        match self {
            OcrError::Http(_) => true,
            OcrError::Api { code, .. } => *code == 429 || *code >= 500,
            OcrError::UnsupportedContent(_) => false,
        }
    }
}

#[async_trait]
pub trait OcrBackend: Send + Sync {
    async fn recognize(&self, bytes: &[u8], content_type: &str) -> Result<OcrOutput, OcrError>;
}

pub struct HttpOcrClient {
    client: Client,
    base_url: String,
}

impl HttpOcrClient {
    pub fn new(settings: &OcrSettings) -> Result<Self, OcrError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl OcrBackend for HttpOcrClient {
    async fn recognize(&self, bytes: &[u8], content_type: &str) -> Result<OcrOutput, OcrError> {
        let url = format!("{}/recognize", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .await?;

        let status = response.status();

        if status == StatusCode::UNSUPPORTED_MEDIA_TYPE {
            return Err(OcrError::UnsupportedContent(content_type.to_string()));
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(code = status.as_u16(), message = %message, "OCR service error");
            return Err(OcrError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let output: OcrOutput = response.json().await?;
        tracing::debug!(
            chars = output.text.len(),
            fields = output.fields.len(),
            "OCR recognized document"
        );
        Ok(output)
    }
}
