use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        document_type TEXT NOT NULL,
        file_name TEXT NOT NULL,
        content_type TEXT NOT NULL,
        blob_ref TEXT NOT NULL,
        state TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        fields JSONB,
        failure JSONB,
        uploaded_at TIMESTAMPTZ NOT NULL,
        processing_started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS documents_user_id_idx ON documents (user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS assessments (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        score DOUBLE PRECISION NOT NULL,
        verdict TEXT NOT NULL,
        llm_verdict TEXT,
        narrative JSONB NOT NULL,
        red_flags JSONB NOT NULL,
        plugin_score DOUBLE PRECISION,
        field_signal DOUBLE PRECISION,
        document_ids UUID[] NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS assessments_user_id_idx ON assessments (user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS plugin_results (
        id UUID PRIMARY KEY,
        assessment_id UUID NOT NULL REFERENCES assessments (id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        plugin_name TEXT NOT NULL,
        payload JSONB NOT NULL,
        validation TEXT NOT NULL,
        status TEXT NOT NULL,
        error TEXT,
        attempts INTEGER NOT NULL,
        contribution DOUBLE PRECISION,
        latency_ms BIGINT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS plugin_results_assessment_idx ON plugin_results (assessment_id, position)",
];

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Create the tables this service owns if they are missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
