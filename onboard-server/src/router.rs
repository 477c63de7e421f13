use onboard_core::ipc::{OnboardRequest, OnboardResponse};
use onboard_core::FailureKind;
use serde::Serialize;

use crate::state::AppState;
use crate::subsystems::assessment::AssessmentError;
use crate::subsystems::pipeline::PipelineError;

fn to_data<T: Serialize>(value: &T) -> OnboardResponse {
    match serde_json::to_value(value) {
        Ok(v) => OnboardResponse::ok(v),
        Err(e) => OnboardResponse::failure(
            "serialization",
            FailureKind::Permanent,
            format!("Failed to serialize response: {}", e),
        ),
    }
}

fn pipeline_failure(e: PipelineError) -> OnboardResponse {
    OnboardResponse::failure(e.code(), e.kind(), e.to_string())
}

fn assessment_failure(e: AssessmentError) -> OnboardResponse {
    OnboardResponse::failure(e.code(), e.kind(), e.to_string())
}

pub async fn handle_request(request: OnboardRequest, state: &AppState) -> OnboardResponse {
    match request {
        OnboardRequest::Ping => OnboardResponse::pong(),
        OnboardRequest::Health => match &state.pool {
            Some(pool) => match onboard_core::db::health_check(pool).await {
                Ok(v) => OnboardResponse::ok(serde_json::json!({
                    "postgresql": v,
                    "storage": "postgres",
                    "plugins": state.engine.registry().len(),
                    "status": "healthy"
                })),
                Err(e) => OnboardResponse::failure(
                    "unhealthy",
                    FailureKind::Transient,
                    format!("DB Health Check failed: {}", e),
                ),
            },
            None => OnboardResponse::ok(serde_json::json!({
                "storage": "memory",
                "plugins": state.engine.registry().len(),
                "status": "healthy"
            })),
        },
        OnboardRequest::Ingest {
            user_id,
            document_type,
            file_name,
            content_type,
            content,
            process,
        } => {
            if content.is_empty() {
                return OnboardResponse::failure(
                    "bad_request",
                    FailureKind::Permanent,
                    "Document content is empty",
                );
            }
            match state
                .pipeline
                .ingest(user_id, document_type, file_name, content_type, &content)
                .await
            {
                Ok(document) => {
                    if process {
                        state.pipeline.spawn_process(document.id);
                    }
                    OnboardResponse::ok(serde_json::json!({
                        "document": document,
                        "queued": process
                    }))
                }
                Err(e) => pipeline_failure(e),
            }
        }
        OnboardRequest::Process { document_id } => {
            match state.pipeline.process(document_id).await {
                Ok(document) => to_data(&document),
                Err(e) => pipeline_failure(e),
            }
        }
        OnboardRequest::Reprocess { document_id } => {
            match state.pipeline.reprocess(document_id).await {
                Ok(document) => to_data(&document),
                Err(e) => pipeline_failure(e),
            }
        }
        OnboardRequest::GetDocument { document_id } => {
            match state.pipeline.get(document_id).await {
                Ok(document) => to_data(&document),
                Err(e) => pipeline_failure(e),
            }
        }
        OnboardRequest::ListDocuments { user_id } => match state.pipeline.list(user_id).await {
            Ok(documents) => to_data(&documents),
            Err(e) => pipeline_failure(e),
        },
        OnboardRequest::Assess { profile } => match state.engine.run(&profile).await {
            Ok(assessment) => to_data(&assessment),
            Err(e) => assessment_failure(e),
        },
        OnboardRequest::GetAssessment { assessment_id } => {
            match state.engine.get(assessment_id).await {
                Ok(assessment) => to_data(&assessment),
                Err(e) => assessment_failure(e),
            }
        }
        OnboardRequest::ListAssessments { user_id } => match state.engine.list(user_id).await {
            Ok(assessments) => to_data(&assessments),
            Err(e) => assessment_failure(e),
        },
        OnboardRequest::ListPlugins => to_data(&state.engine.registry().descriptors()),
    }
}
