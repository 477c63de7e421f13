//! Persistence for documents and assessments.
//!
//! Both the pipeline and the assessment engine only see the traits below.
//! `PgStore` is the production backend; `MemoryStore` is used by tests and
//! by the server when started with `--memory`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::blob::BlobRef;
use crate::error::StoreError;
use crate::models::{
    Assessment, Document, DocumentState, DocumentType, ExecutionStatus, FailureReason, FieldSet,
    Narrative, PluginResult, ValidationOutcome, Verdict,
};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the document row.
    async fn save_document(&self, document: &Document) -> Result<(), StoreError>;

    async fn load_document(&self, id: Uuid) -> Result<Option<Document>, StoreError>;

    /// All documents of a user, oldest upload first.
    async fn list_documents(&self, user_id: Uuid) -> Result<Vec<Document>, StoreError>;
}

#[async_trait]
pub trait AssessmentStore: Send + Sync {
    /// Persist a new assessment together with its plugin results.
    async fn save_assessment(&self, assessment: &Assessment) -> Result<(), StoreError>;

    async fn load_assessment(&self, id: Uuid) -> Result<Option<Assessment>, StoreError>;

    /// All assessments of a user, newest first.
    async fn list_assessments(&self, user_id: Uuid) -> Result<Vec<Assessment>, StoreError>;
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<Uuid, Document>>,
    assessments: Mutex<Vec<Assessment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assessment_count(&self) -> usize {
        self.assessments.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn save_document(&self, document: &Document) -> Result<(), StoreError> {
        let mut docs = self.documents.lock().unwrap_or_else(|p| p.into_inner());
        docs.insert(document.id, document.clone());
        Ok(())
    }

    async fn load_document(&self, id: Uuid) -> Result<Option<Document>, StoreError> {
        let docs = self.documents.lock().unwrap_or_else(|p| p.into_inner());
        Ok(docs.get(&id).cloned())
    }

    async fn list_documents(&self, user_id: Uuid) -> Result<Vec<Document>, StoreError> {
        let docs = self.documents.lock().unwrap_or_else(|p| p.into_inner());
        let mut out: Vec<Document> = docs
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|d| d.uploaded_at);
        Ok(out)
    }
}

#[async_trait]
impl AssessmentStore for MemoryStore {
    async fn save_assessment(&self, assessment: &Assessment) -> Result<(), StoreError> {
        let mut all = self.assessments.lock().unwrap_or_else(|p| p.into_inner());
        if all.iter().any(|a| a.id == assessment.id) {
            return Err(StoreError::Corrupt(format!(
                "assessment {} already exists",
                assessment.id
            )));
        }
        all.push(assessment.clone());
        Ok(())
    }

    async fn load_assessment(&self, id: Uuid) -> Result<Option<Assessment>, StoreError> {
        let all = self.assessments.lock().unwrap_or_else(|p| p.into_inner());
        Ok(all.iter().find(|a| a.id == id).cloned())
    }

    async fn list_assessments(&self, user_id: Uuid) -> Result<Vec<Assessment>, StoreError> {
        let all = self.assessments.lock().unwrap_or_else(|p| p.into_inner());
        let mut out: Vec<Assessment> = all
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}

// ============================================================================
// PgStore
// ============================================================================

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    user_id: Uuid,
    document_type: String,
    file_name: String,
    content_type: String,
    blob_ref: String,
    state: String,
    attempts: i32,
    fields: Option<serde_json::Value>,
    failure: Option<serde_json::Value>,
    uploaded_at: DateTime<Utc>,
    processing_started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DocumentRow> for Document {
    type Error = StoreError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        let state = DocumentState::parse(&row.state)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown document state {}", row.state)))?;
        let fields: Option<FieldSet> = row.fields.map(serde_json::from_value).transpose()?;
        let failure: Option<FailureReason> = row.failure.map(serde_json::from_value).transpose()?;

        Ok(Document {
            id: row.id,
            user_id: row.user_id,
            document_type: DocumentType::parse(&row.document_type).unwrap_or(DocumentType::Other),
            file_name: row.file_name,
            content_type: row.content_type,
            blob_ref: BlobRef::new(row.blob_ref),
            state,
            attempts: row.attempts.max(0) as u32,
            fields,
            failure,
            uploaded_at: row.uploaded_at,
            processing_started_at: row.processing_started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AssessmentRow {
    id: Uuid,
    user_id: Uuid,
    score: f64,
    verdict: String,
    llm_verdict: Option<String>,
    narrative: serde_json::Value,
    red_flags: serde_json::Value,
    plugin_score: Option<f64>,
    field_signal: Option<f64>,
    document_ids: Vec<Uuid>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct PluginResultRow {
    id: Uuid,
    plugin_name: String,
    payload: serde_json::Value,
    validation: String,
    status: String,
    error: Option<String>,
    attempts: i32,
    contribution: Option<f64>,
    latency_ms: i64,
}

impl TryFrom<PluginResultRow> for PluginResult {
    type Error = StoreError;

    fn try_from(row: PluginResultRow) -> Result<Self, Self::Error> {
        Ok(PluginResult {
            id: row.id,
            plugin_name: row.plugin_name,
            payload: row.payload,
            validation: ValidationOutcome::parse(&row.validation).ok_or_else(|| {
                StoreError::Corrupt(format!("unknown validation outcome {}", row.validation))
            })?,
            status: ExecutionStatus::parse(&row.status).ok_or_else(|| {
                StoreError::Corrupt(format!("unknown execution status {}", row.status))
            })?,
            error: row.error,
            attempts: row.attempts.max(0) as u32,
            contribution: row.contribution,
            latency_ms: row.latency_ms.max(0) as u64,
        })
    }
}

impl PgStore {
    async fn load_results(&self, assessment_id: Uuid) -> Result<Vec<PluginResult>, StoreError> {
        let rows: Vec<PluginResultRow> = sqlx::query_as(
            r#"
            SELECT id, plugin_name, payload, validation, status, error,
                   attempts, contribution, latency_ms
            FROM plugin_results
            WHERE assessment_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(assessment_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PluginResult::try_from).collect()
    }

    async fn hydrate(&self, row: AssessmentRow) -> Result<Assessment, StoreError> {
        let verdict = Verdict::parse(&row.verdict)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown verdict {}", row.verdict)))?;
        let narrative: Narrative = serde_json::from_value(row.narrative)?;
        let red_flags: Vec<String> = serde_json::from_value(row.red_flags)?;
        let results = self.load_results(row.id).await?;

        Ok(Assessment {
            id: row.id,
            user_id: row.user_id,
            score: row.score,
            verdict,
            llm_verdict: row.llm_verdict.as_deref().and_then(Verdict::parse),
            narrative,
            red_flags,
            plugin_score: row.plugin_score,
            field_signal: row.field_signal,
            results,
            document_ids: row.document_ids,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn save_document(&self, document: &Document) -> Result<(), StoreError> {
        let fields = document.fields.as_ref().map(serde_json::to_value).transpose()?;
        let failure = document.failure.as_ref().map(serde_json::to_value).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO documents (
                id, user_id, document_type, file_name, content_type, blob_ref,
                state, attempts, fields, failure,
                uploaded_at, processing_started_at, completed_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                state = EXCLUDED.state,
                attempts = EXCLUDED.attempts,
                fields = EXCLUDED.fields,
                failure = EXCLUDED.failure,
                processing_started_at = EXCLUDED.processing_started_at,
                completed_at = EXCLUDED.completed_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(document.id)
        .bind(document.user_id)
        .bind(document.document_type.as_str())
        .bind(&document.file_name)
        .bind(&document.content_type)
        .bind(document.blob_ref.as_str())
        .bind(document.state.as_str())
        .bind(document.attempts as i32)
        .bind(fields)
        .bind(failure)
        .bind(document.uploaded_at)
        .bind(document.processing_started_at)
        .bind(document.completed_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_document(&self, id: Uuid) -> Result<Option<Document>, StoreError> {
        let row: Option<DocumentRow> = sqlx::query_as("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Document::try_from).transpose()
    }

    async fn list_documents(&self, user_id: Uuid) -> Result<Vec<Document>, StoreError> {
        let rows: Vec<DocumentRow> = sqlx::query_as(
            "SELECT * FROM documents WHERE user_id = $1 ORDER BY uploaded_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Document::try_from).collect()
    }
}

#[async_trait]
impl AssessmentStore for PgStore {
    async fn save_assessment(&self, assessment: &Assessment) -> Result<(), StoreError> {
        let narrative = serde_json::to_value(&assessment.narrative)?;
        let red_flags = serde_json::to_value(&assessment.red_flags)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO assessments (
                id, user_id, score, verdict, llm_verdict, narrative, red_flags,
                plugin_score, field_signal, document_ids, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(assessment.id)
        .bind(assessment.user_id)
        .bind(assessment.score)
        .bind(assessment.verdict.as_str())
        .bind(assessment.llm_verdict.map(|v| v.as_str()))
        .bind(narrative)
        .bind(red_flags)
        .bind(assessment.plugin_score)
        .bind(assessment.field_signal)
        .bind(&assessment.document_ids)
        .bind(assessment.created_at)
        .execute(&mut *tx)
        .await?;

        for (position, result) in assessment.results.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO plugin_results (
                    id, assessment_id, position, plugin_name, payload, validation,
                    status, error, attempts, contribution, latency_ms
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(result.id)
            .bind(assessment.id)
            .bind(position as i32)
            .bind(&result.plugin_name)
            .bind(&result.payload)
            .bind(result.validation.as_str())
            .bind(result.status.as_str())
            .bind(&result.error)
            .bind(result.attempts as i32)
            .bind(result.contribution)
            .bind(result.latency_ms as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            assessment_id = %assessment.id,
            results = assessment.results.len(),
            "Persisted assessment"
        );

        Ok(())
    }

    async fn load_assessment(&self, id: Uuid) -> Result<Option<Assessment>, StoreError> {
        let row: Option<AssessmentRow> =
            sqlx::query_as("SELECT * FROM assessments WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_assessments(&self, user_id: Uuid) -> Result<Vec<Assessment>, StoreError> {
        let rows: Vec<AssessmentRow> = sqlx::query_as(
            "SELECT * FROM assessments WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.hydrate(row).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assessment_for(user_id: Uuid, created_at: DateTime<Utc>) -> Assessment {
        Assessment {
            id: Uuid::new_v4(),
            user_id,
            score: 0.2,
            verdict: Verdict::Low,
            llm_verdict: None,
            narrative: Narrative::Unavailable {
                reason: "test".to_string(),
            },
            red_flags: vec![],
            plugin_score: Some(0.2),
            field_signal: None,
            results: vec![],
            document_ids: vec![],
            created_at,
        }
    }

    #[tokio::test]
    async fn test_memory_store_lists_user_documents_in_upload_order() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();

        let mut first = Document::new(
            user,
            DocumentType::Passport,
            "a.png".into(),
            "image/png".into(),
            BlobRef::new("a"),
        );
        first.uploaded_at = Utc::now() - chrono::Duration::minutes(5);
        let second = Document::new(
            user,
            DocumentType::UtilityBill,
            "b.pdf".into(),
            "application/pdf".into(),
            BlobRef::new("b"),
        );
        let other = Document::new(
            Uuid::new_v4(),
            DocumentType::IdCard,
            "c.png".into(),
            "image/png".into(),
            BlobRef::new("c"),
        );

        store.save_document(&second).await.unwrap();
        store.save_document(&first).await.unwrap();
        store.save_document(&other).await.unwrap();

        let docs = store.list_documents(user).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, first.id);
        assert_eq!(docs[1].id, second.id);
    }

    #[tokio::test]
    async fn test_memory_store_assessments_are_append_only() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let older = assessment_for(user, Utc::now() - chrono::Duration::hours(1));
        let newer = assessment_for(user, Utc::now());

        store.save_assessment(&older).await.unwrap();
        store.save_assessment(&newer).await.unwrap();
        assert!(store.save_assessment(&older).await.is_err());

        let listed = store.list_assessments(user).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(store.assessment_count(), 2);
    }
}
