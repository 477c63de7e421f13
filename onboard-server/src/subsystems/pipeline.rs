//! Document pipeline - lifecycle of an uploaded document
//!
//! ```text
//! uploaded ──process──▶ extracting ──▶ extracted
//!                           │  ▲            │
//!                           ▼  └─reprocess──┤
//!                         failed ───────────┘
//! ```
//!
//! Each attempt fetches the blob and runs the extraction service. Permanent
//! errors fail the document at once; transient errors and incomplete field
//! sets consume an attempt until `max_attempts` is reached. Attempts are
//! spaced with exponential backoff starting at `retry_delay_ms`.
//!
//! A document has at most one extraction in flight. The token set is locked
//! only to claim or release a token, never across OCR/LLM calls.
//!
//! If the store fails mid-run, the document is moved to `failed` when the
//! store allows it. One still stuck in `extracting` can be reprocessed once
//! no attempt holds its token.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use onboard_core::blob::{BlobError, BlobStore};
use onboard_core::config::PipelineConfig;
use onboard_core::error::{FailureKind, StoreError};
use onboard_core::models::{Document, DocumentState, DocumentType, FailureReason, FieldSet};
use onboard_core::store::DocumentStore;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_retry::strategy::ExponentialBackoff;
use uuid::Uuid;

use super::extraction::{ExtractionError, ExtractionService};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Document not found: {0}")]
    NotFound(Uuid),

    #[error("Document {0} is already being processed")]
    AlreadyProcessing(Uuid),

    #[error("Document {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: DocumentState,
        to: DocumentState,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Blob error: {0}")]
    Blob(#[from] BlobError),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::AlreadyProcessing(_) | PipelineError::Store(_) => FailureKind::Transient,
            PipelineError::Blob(BlobError::Io(_)) => FailureKind::Transient,
            _ => FailureKind::Permanent,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::NotFound(_) => "not_found",
            PipelineError::AlreadyProcessing(_) => "already_processing",
            PipelineError::InvalidTransition { .. } => "invalid_transition",
            PipelineError::Store(_) => "store_error",
            PipelineError::Blob(_) => "blob_error",
        }
    }
}

/// Releases the in-flight token on drop, including on early return.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.id);
    }
}

pub struct DocumentPipeline {
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<ExtractionService>,
    config: PipelineConfig,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl DocumentPipeline {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<ExtractionService>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            documents,
            blobs,
            extractor,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Store the bytes and persist a new `uploaded` document.
    pub async fn ingest(
        &self,
        user_id: Uuid,
        document_type: DocumentType,
        file_name: String,
        content_type: String,
        bytes: &[u8],
    ) -> Result<Document, PipelineError> {
        let blob_ref = self.blobs.put(bytes).await?;
        let document = Document::new(user_id, document_type, file_name, content_type, blob_ref);
        self.documents.save_document(&document).await?;

        tracing::info!(
            document_id = %document.id,
            user_id = %user_id,
            document_type = %document_type,
            size = bytes.len(),
            "Document ingested"
        );

        Ok(document)
    }

    pub async fn get(&self, id: Uuid) -> Result<Document, PipelineError> {
        self.documents
            .load_document(id)
            .await?
            .ok_or(PipelineError::NotFound(id))
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Document>, PipelineError> {
        Ok(self.documents.list_documents(user_id).await?)
    }

    /// Move an `uploaded` document into extraction and run it to completion.
    pub async fn process(&self, id: Uuid) -> Result<Document, PipelineError> {
        let _guard = self.claim(id)?;
        let mut document = self.get(id).await?;

        if document.state != DocumentState::Uploaded {
            return Err(PipelineError::InvalidTransition {
                id,
                from: document.state,
                to: DocumentState::Extracting,
            });
        }

        transition(&mut document, DocumentState::Extracting)?;
        self.documents.save_document(&document).await?;

        self.run_guarded(document).await
    }

    /// Operator-triggered rerun of a finished document with a fresh attempt budget.
    pub async fn reprocess(&self, id: Uuid) -> Result<Document, PipelineError> {
        let _guard = self.claim(id)?;
        let mut document = self.get(id).await?;

        match document.state {
            DocumentState::Extracted | DocumentState::Failed => {
                transition(&mut document, DocumentState::Extracting)?;
            }
            // We hold the token, so no attempt is running: an earlier run died
            // before it could record an outcome.
            DocumentState::Extracting => {
                tracing::warn!(document_id = %id, "Recovering document stranded in extracting");
                document.processing_started_at = Some(Utc::now());
                document.updated_at = Utc::now();
            }
            DocumentState::Uploaded => {
                return Err(PipelineError::InvalidTransition {
                    id,
                    from: document.state,
                    to: DocumentState::Extracting,
                });
            }
        }

        document.attempts = 0;
        document.fields = None;
        document.failure = None;
        self.documents.save_document(&document).await?;

        tracing::info!(document_id = %id, "Document reprocessing requested");

        self.run_guarded(document).await
    }

    /// Run `process` on a background task; the caller gets the document id back immediately.
    pub fn spawn_process(self: &Arc<Self>, id: Uuid) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            match pipeline.process(id).await {
                Ok(doc) => tracing::info!(
                    document_id = %id,
                    state = %doc.state,
                    attempts = doc.attempts,
                    "Background extraction finished"
                ),
                Err(e) => tracing::warn!(document_id = %id, "Background extraction not run: {}", e),
            }
        })
    }

    fn claim(&self, id: Uuid) -> Result<InFlightGuard<'_>, PipelineError> {
        let mut set = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(id) {
            return Err(PipelineError::AlreadyProcessing(id));
        }
        Ok(InFlightGuard {
            set: &self.in_flight,
            id,
        })
    }

    async fn run_guarded(&self, document: Document) -> Result<Document, PipelineError> {
        let id = document.id;
        match self.run_attempts(document).await {
            Err(PipelineError::Store(e)) => {
                self.fail_after_store_error(id, &e).await;
                Err(PipelineError::Store(e))
            }
            other => other,
        }
    }

    /// Best effort: record the store failure so the document leaves `extracting`.
    async fn fail_after_store_error(&self, id: Uuid, cause: &StoreError) {
        let mut document = match self.documents.load_document(id).await {
            Ok(Some(d)) if d.state == DocumentState::Extracting => d,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(document_id = %id, "Document left in extracting: {}", e);
                return;
            }
        };

        document.failure = Some(FailureReason {
            kind: FailureKind::Transient,
            code: "store_error".to_string(),
            message: cause.to_string(),
        });
        if transition(&mut document, DocumentState::Failed).is_err() {
            return;
        }
        if let Err(e) = self.documents.save_document(&document).await {
            tracing::warn!(document_id = %id, "Document left in extracting: {}", e);
        }
    }

    async fn run_attempts(&self, mut document: Document) -> Result<Document, PipelineError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = attempt_backoff(&self.config);

        loop {
            document.attempts += 1;
            document.updated_at = Utc::now();
            self.documents.save_document(&document).await?;

            let outcome = self.attempt(&document).await;

            let reason = match outcome {
                Ok(fields) if fields.is_complete() => {
                    document.fields = Some(fields);
                    document.failure = None;
                    transition(&mut document, DocumentState::Extracted)?;
                    self.documents.save_document(&document).await?;
                    return Ok(document);
                }
                Ok(fields) => {
                    let reason = FailureReason {
                        kind: FailureKind::Permanent,
                        code: "unresolved_fields".to_string(),
                        message: format!(
                            "Mandatory fields unresolved: {}",
                            fields.unresolved.join(", ")
                        ),
                    };
                    // Keep the partial set for operators to inspect.
                    document.fields = Some(fields);
                    reason
                }
                Err(e) => {
                    let reason = FailureReason {
                        kind: e.kind(),
                        code: e.code().to_string(),
                        message: e.to_string(),
                    };
                    if reason.kind == FailureKind::Permanent {
                        tracing::warn!(
                            document_id = %document.id,
                            code = %reason.code,
                            "Extraction failed permanently: {}",
                            reason.message
                        );
                        return self.fail(document, reason).await;
                    }
                    reason
                }
            };

            if document.attempts >= max_attempts {
                tracing::warn!(
                    document_id = %document.id,
                    attempts = document.attempts,
                    code = %reason.code,
                    "Extraction attempts exhausted"
                );
                return self.fail(document, reason).await;
            }

            let delay = backoff.next().unwrap_or_default();
            tracing::debug!(
                document_id = %document.id,
                attempt = document.attempts,
                code = %reason.code,
                delay_ms = delay.as_millis() as u64,
                "Extraction attempt unsuccessful, retrying"
            );
            document.failure = Some(reason);
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, document: &Document) -> Result<FieldSet, ExtractionError> {
        let bytes = self.blobs.get(&document.blob_ref).await?;
        self.extractor
            .extract(&bytes, &document.content_type, document.document_type)
            .await
    }

    async fn fail(&self, mut document: Document, reason: FailureReason) -> Result<Document, PipelineError> {
        document.failure = Some(reason);
        transition(&mut document, DocumentState::Failed)?;
        self.documents.save_document(&document).await?;
        Ok(document)
    }
}

/// Pauses between attempts: `retry_delay_ms`, then doubling, capped at 30s.
pub fn attempt_backoff(config: &PipelineConfig) -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor((config.retry_delay_ms / 2).max(1))
        .max_delay(Duration::from_secs(30))
}

fn transition(document: &mut Document, next: DocumentState) -> Result<(), PipelineError> {
    if !document.state.can_transition_to(next) {
        return Err(PipelineError::InvalidTransition {
            id: document.id,
            from: document.state,
            to: next,
        });
    }

    tracing::info!(
        document_id = %document.id,
        from = %document.state,
        to = %next,
        "Document state transition"
    );

    let now = Utc::now();
    document.state = next;
    document.updated_at = now;
    match next {
        DocumentState::Extracting => {
            document.processing_started_at = Some(now);
            document.completed_at = None;
        }
        DocumentState::Extracted | DocumentState::Failed => document.completed_at = Some(now),
        DocumentState::Uploaded => {}
    }
    Ok(())
}
