pub mod blob;
pub mod config;
pub mod db;
pub mod error;
pub mod ipc;
pub mod llm;
pub mod models;
pub mod ocr;
pub mod store;

pub use blob::{BlobError, BlobRef, BlobStore, FsBlobStore, MemoryBlobStore};
pub use config::OnboardConfig;
pub use error::{FailureKind, StoreError};
pub use llm::{LlmBackend, LlmConfig, LlmError, OpenAiClient};
pub use ocr::{HttpOcrClient, OcrBackend, OcrError, OcrField, OcrOutput};
pub use store::{AssessmentStore, DocumentStore, MemoryStore, PgStore};
