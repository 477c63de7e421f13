//! In-memory wiring and scripted backends for unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use onboard_core::blob::MemoryBlobStore;
use onboard_core::config::{
    DatabaseConfig, LlmSettings, OcrSettings, PipelineConfig, PluginSettings, ServiceConfig,
};
use onboard_core::llm::{LlmBackend, LlmError};
use onboard_core::ocr::{OcrBackend, OcrError, OcrField, OcrOutput};
use onboard_core::store::MemoryStore;
use onboard_core::OnboardConfig;

use crate::state::{AppState, Backends};
use crate::subsystems::plugins::{Plugin, PluginRegistry, SiftPlugin};

pub fn config() -> OnboardConfig {
    OnboardConfig {
        service: ServiceConfig {
            socket_path: "/tmp/onboard-test.sock".to_string(),
            log_level: "debug".to_string(),
            blob_root: "/tmp/onboard-test-blobs".to_string(),
        },
        database: DatabaseConfig {
            url: "postgresql://localhost/unused".to_string(),
            max_connections: 1,
        },
        llm: LlmSettings {
            base_url: "http://localhost:1".to_string(),
            model: "test".to_string(),
            timeout_seconds: 1,
            max_retries: 0,
            retry_delay_ms: 1,
            temperature: 0.0,
        },
        ocr: OcrSettings {
            base_url: "http://localhost:1".to_string(),
            timeout_seconds: 1,
        },
        extraction: Default::default(),
        pipeline: PipelineConfig {
            max_attempts: 3,
            retry_delay_ms: 1,
        },
        plugins: Default::default(),
        assessment: Default::default(),
        http: Default::default(),
    }
}

/// OCR that reads every passport field at 0.95.
pub struct ConfidentOcr;

#[async_trait]
impl OcrBackend for ConfidentOcr {
    async fn recognize(&self, _bytes: &[u8], _ct: &str) -> Result<OcrOutput, OcrError> {
        let f = |name: &str, value: &str| OcrField {
            name: name.to_string(),
            value: value.to_string(),
            confidence: 0.95,
        };
        Ok(OcrOutput {
            text: "PASSPORT UTOPIA ERIKSSON ANNA MARIA".to_string(),
            fields: vec![
                f("full_name", "Anna Maria Eriksson"),
                f("passport_number", "L898902C3"),
                f("nationality", "UTO"),
                f("date_of_birth", "1974-08-12"),
                f("expiry_date", "2032-04-15"),
            ],
        })
    }
}

pub struct NarratingLlm;

#[async_trait]
impl LlmBackend for NarratingLlm {
    async fn complete(&self, _p: &str, _h: &str) -> Result<serde_json::Value, LlmError> {
        Ok(serde_json::json!({
            "risk_status": "low",
            "reasoning": "Passport data is consistent with the profile.",
            "red_flags": []
        }))
    }

    fn name(&self) -> &str {
        "narrating"
    }
}

pub fn memory_state_with_plugins(plugins: Vec<Arc<dyn Plugin>>) -> Arc<AppState> {
    let mut registry = PluginRegistry::new();
    for plugin in plugins {
        registry
            .register(plugin, PluginSettings::default())
            .expect("test plugins have unique names");
    }

    let store = Arc::new(MemoryStore::new());
    let backends = Backends {
        documents: store.clone(),
        assessments: store,
        blobs: Arc::new(MemoryBlobStore::new()),
        ocr: Arc::new(ConfidentOcr),
        llm: Arc::new(NarratingLlm),
    };

    Arc::new(AppState::assemble(config(), None, backends, registry))
}

/// In-memory state with the `sift` plugin registered.
pub fn memory_state() -> Arc<AppState> {
    memory_state_with_plugins(vec![Arc::new(SiftPlugin)])
}
