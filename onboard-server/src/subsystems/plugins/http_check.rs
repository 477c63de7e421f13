//! Generic HTTP data-source check.
//!
//! POSTs the user profile as JSON to a configured endpoint and expects a
//! body with a numeric `risk_score` in `[0, 1]`. One instance is registered
//! per configured name, so several providers can share this implementation.

use std::time::Duration;

use async_trait::async_trait;
use onboard_core::models::UserProfile;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use super::{Plugin, PluginError};

pub const NAME: &str = "http_check";

pub struct HttpCheckPlugin {
    name: String,
    description: String,
    endpoint: String,
    client: Client,
}

impl HttpCheckPlugin {
    pub fn new(name: String, description: String, endpoint: String) -> Result<Self, PluginError> {
        // Backstop only; the registry enforces the per-plugin timeout.
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            name,
            description,
            endpoint,
            client,
        })
    }
}

fn risk_score(payload: &Value) -> Option<f64> {
    payload
        .get("risk_score")
        .and_then(|v| v.as_f64())
        .filter(|s| (0.0..=1.0).contains(s))
}

#[async_trait]
impl Plugin for HttpCheckPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, profile: &UserProfile) -> Result<Value, PluginError> {
        let response = self.client.post(&self.endpoint).json(profile).send().await?;
        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            // Non-JSON bodies are kept verbatim and fail validation.
            return Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)));
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("{} returned {}: {}", self.endpoint, status.as_u16(), body);

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(PluginError::Transient(message))
        } else {
            Err(PluginError::Permanent(message))
        }
    }

    fn validate_response(&self, payload: &Value) -> bool {
        risk_score(payload).is_some()
    }

    fn normalize(&self, payload: &Value) -> Option<f64> {
        risk_score(payload)
    }
}
