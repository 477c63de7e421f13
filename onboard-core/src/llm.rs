//! LLM module for Onboard - structured JSON completions
//!
//! Provides an `LlmBackend` trait used by two callers:
//! - **Extraction** - correcting low-confidence OCR fields
//! - **Assessment** - qualitative risk reasoning and narrative
//!
//! `OpenAiClient` talks to any OpenAI-compatible chat completions endpoint
//! in JSON mode and retries transient failures with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::LlmSettings;

// ============================================================================
// LlmBackend trait
// ============================================================================

/// Abstraction over LLM providers.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Send `prompt` and return the parsed JSON object the model produced.
    /// `schema_hint` describes the expected shape and is passed as the
    /// system instruction.
    async fn complete(
        &self,
        prompt: &str,
        schema_hint: &str,
    ) -> Result<serde_json::Value, LlmError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

impl LlmError {
    /// Rate limits, server errors and transport failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(_) => true,
            LlmError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// Config types
// ============================================================================

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl LlmConfig {
    /// Build from the `[llm]` section; the key comes from `OPENAI_API_KEY`
    /// unless given explicitly.
    pub fn from_settings(settings: &LlmSettings, api_key: Option<String>) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model: settings.model.clone(),
            temperature: settings.temperature,
            timeout: Duration::from_secs(settings.timeout_seconds),
            max_retries: settings.max_retries,
            retry_delay_ms: settings.retry_delay_ms,
        }
    }
}

// ============================================================================
// Chat completions API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// OpenAiClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    config: LlmConfig,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig, base_url: String) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn complete_once(
        &self,
        prompt: &str,
        schema_hint: &str,
    ) -> Result<serde_json::Value, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: schema_hint,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.config.temperature,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::warn!(code = status.as_u16(), message = %message, "LLM API error");

            return Err(LlmError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let chat: ChatResponse = response.json().await?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Malformed("no message content".to_string()))?;

        let value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| LlmError::Malformed(format!("content is not JSON: {}", e)))?;

        if !value.is_object() {
            return Err(LlmError::Malformed("content is not a JSON object".to_string()));
        }

        Ok(value)
    }
}

#[async_trait]
impl LlmBackend for OpenAiClient {
    async fn complete(
        &self,
        prompt: &str,
        schema_hint: &str,
    ) -> Result<serde_json::Value, LlmError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = RetryIf::spawn(
            retry_strategy,
            || self.complete_once(prompt, schema_hint),
            |e: &LlmError| e.is_transient(),
        )
        .await;

        match result {
            Ok(value) => Ok(value),
            Err(e) if e.is_transient() => {
                tracing::error!(
                    attempts = self.config.max_retries + 1,
                    error = %e,
                    "All LLM retry attempts failed"
                );
                Err(LlmError::RetryExhausted {
                    attempts: self.config.max_retries + 1,
                    last: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: &str) -> LlmConfig {
        LlmConfig {
            api_key: api_key.to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_delay_ms: 10,
        }
    }

    fn chat_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
    }

    #[tokio::test]
    async fn test_complete_parses_json_content() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(test_config("test-key"), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_body(r#"{"risk_status":"low","reasoning":"clean"}"#)),
            )
            .mount(&mock_server)
            .await;

        let value = client.complete("assess", "return JSON").await.unwrap();
        assert_eq!(value["risk_status"], "low");
        assert_eq!(value["reasoning"], "clean");
    }

    #[tokio::test]
    async fn test_complete_retries_on_429_then_succeeds() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(test_config("test-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit exceeded" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(r#"{"ok":true}"#)))
            .mount(&mock_server)
            .await;

        let value = client.complete("p", "s").await.expect("should succeed after retry");
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_complete_exhausts_retries_on_500() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(test_config("test-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "message": "boom" }
            })))
            .expect(3)
            .mount(&mock_server)
            .await;

        match client.complete("p", "s").await {
            Err(LlmError::RetryExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_does_not_retry_on_400() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(test_config("test-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "message": "bad request" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        match client.complete("p", "s").await {
            Err(LlmError::Api { code, message }) => {
                assert_eq!(code, 400);
                assert_eq!(message, "bad request");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_rejects_non_json_content() {
        let mock_server = MockServer::start().await;
        let client = OpenAiClient::new(test_config("test-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_body("I think the risk is low")),
            )
            .mount(&mock_server)
            .await;

        let result = client.complete("p", "s").await;
        assert!(matches!(result, Err(LlmError::Malformed(_))));
    }

    #[test]
    fn test_new_fails_with_missing_api_key() {
        let result = OpenAiClient::new(test_config(""), "http://localhost".to_string());
        assert!(matches!(result, Err(LlmError::MissingApiKey)));
    }
}
