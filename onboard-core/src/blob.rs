//! Raw document storage.
//!
//! The pipeline only needs `put` at ingestion and `get` before extraction,
//! so the trait stays that small. `FsBlobStore` keeps one file per blob under
//! a root directory; `MemoryBlobStore` backs tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Opaque key of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob reference: {0}")]
    InvalidRef(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bytes: &[u8]) -> Result<BlobRef, BlobError>;

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError>;
}

// ============================================================================
// FsBlobStore
// ============================================================================

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, blob: &BlobRef) -> Result<PathBuf, BlobError> {
        let key = blob.as_str();
        // Keys are generated UUIDs; refuse anything that could escape the root.
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(BlobError::InvalidRef(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, bytes: &[u8]) -> Result<BlobRef, BlobError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let blob = BlobRef::new(Uuid::new_v4().to_string());
        let path = self.path_for(&blob)?;
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(blob = blob.as_str(), size = bytes.len(), "Stored blob");
        Ok(blob)
    }

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(blob)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(blob.as_str().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// MemoryBlobStore
// ============================================================================

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: &[u8]) -> Result<BlobRef, BlobError> {
        let key = Uuid::new_v4().to_string();
        let mut blobs = self.blobs.lock().unwrap_or_else(|p| p.into_inner());
        blobs.insert(key.clone(), bytes.to_vec());
        Ok(BlobRef::new(key))
    }

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError> {
        let blobs = self.blobs.lock().unwrap_or_else(|p| p.into_inner());
        blobs
            .get(blob.as_str())
            .cloned()
            .ok_or_else(|| BlobError::NotFound(blob.as_str().to_string()))
    }
}
