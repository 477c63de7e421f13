//! Service wiring shared by the IPC and HTTP transports.

use std::sync::Arc;

use anyhow::Context;
use onboard_core::blob::{BlobStore, FsBlobStore, MemoryBlobStore};
use onboard_core::llm::{LlmBackend, LlmConfig, OpenAiClient};
use onboard_core::ocr::{HttpOcrClient, OcrBackend};
use onboard_core::store::{AssessmentStore, DocumentStore, MemoryStore, PgStore};
use onboard_core::OnboardConfig;
use sqlx::PgPool;

use crate::subsystems::assessment::RiskEngine;
use crate::subsystems::extraction::ExtractionService;
use crate::subsystems::pipeline::DocumentPipeline;
use crate::subsystems::plugins::PluginRegistry;

/// Collaborators the core is built from.
pub struct Backends {
    pub documents: Arc<dyn DocumentStore>,
    pub assessments: Arc<dyn AssessmentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub ocr: Arc<dyn OcrBackend>,
    pub llm: Arc<dyn LlmBackend>,
}

pub struct AppState {
    pub config: OnboardConfig,
    /// `None` when running with in-memory storage.
    pub pool: Option<PgPool>,
    pub pipeline: Arc<DocumentPipeline>,
    pub engine: Arc<RiskEngine>,
}

impl AppState {
    pub fn assemble(
        config: OnboardConfig,
        pool: Option<PgPool>,
        backends: Backends,
        registry: PluginRegistry,
    ) -> Self {
        let extractor = Arc::new(ExtractionService::new(
            backends.ocr,
            backends.llm.clone(),
            config.extraction.clone(),
        ));

        let pipeline = Arc::new(DocumentPipeline::new(
            backends.documents.clone(),
            backends.blobs,
            extractor,
            config.pipeline.clone(),
        ));

        let engine = Arc::new(RiskEngine::new(
            Arc::new(registry),
            backends.llm,
            backends.documents,
            backends.assessments,
            config.assessment.clone(),
        ));

        Self {
            config,
            pool,
            pipeline,
            engine,
        }
    }

    /// Build production collaborators. With `in_memory`, documents,
    /// assessments and blobs live in process memory and no database is used.
    pub async fn from_config(config: OnboardConfig, in_memory: bool) -> anyhow::Result<Self> {
        let registry = PluginRegistry::from_config(&config.plugins)
            .context("Failed to build plugin registry")?;

        let llm = OpenAiClient::new(
            LlmConfig::from_settings(&config.llm, None),
            config.llm.base_url.clone(),
        )
        .context("Failed to create LLM client")?;
        let ocr = HttpOcrClient::new(&config.ocr).context("Failed to create OCR client")?;

        let mut pool = None;
        let documents: Arc<dyn DocumentStore>;
        let assessments: Arc<dyn AssessmentStore>;
        let blobs: Arc<dyn BlobStore>;

        if in_memory {
            tracing::warn!("Using in-memory storage; nothing survives a restart");
            let store = Arc::new(MemoryStore::new());
            documents = store.clone();
            assessments = store;
            blobs = Arc::new(MemoryBlobStore::new());
        } else {
            let pg = onboard_core::db::create_pool(&config.database)
                .await
                .context("Failed to connect to database")?;
            onboard_core::db::ensure_schema(&pg)
                .await
                .context("Failed to create schema")?;
            let store = Arc::new(PgStore::new(pg.clone()));
            documents = store.clone();
            assessments = store;
            blobs = Arc::new(FsBlobStore::new(config.service.blob_root.clone()));
            pool = Some(pg);
        }

        let backends = Backends {
            documents,
            assessments,
            blobs,
            ocr: Arc::new(ocr),
            llm: Arc::new(llm),
        };

        Ok(Self::assemble(config, pool, backends, registry))
    }
}
