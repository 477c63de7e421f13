//! Onboard HTTP REST API
//!
//! Axum server exposing document intake and risk assessment over HTTP.
//! Runs alongside the Unix socket IPC server on port 8780 (configurable).
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! building an `OnboardRequest` and sending it through the shared router, so
//! both transports behave identically.
//!
//! Endpoints:
//! - GET  /health                      - health check with storage status
//! - GET  /version                     - server version info
//! - POST /documents                   - upload raw bytes (query: user_id, document_type, file_name, process)
//! - GET  /documents/:id               - document with state and fields
//! - POST /documents/:id/process       - run extraction on an uploaded document
//! - POST /documents/:id/reprocess     - rerun extraction on a finished document
//! - GET  /users/:id/documents         - a user's documents
//! - POST /assessments                 - assess a user profile
//! - GET  /assessments/:id             - stored assessment
//! - GET  /users/:id/assessments       - a user's assessments, newest first
//! - GET  /plugins                     - registered plugins

use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use onboard_core::ipc::{OnboardRequest, OnboardResponse, PROTOCOL_VERSION};
use onboard_core::models::{DocumentType, UserProfile};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::server::MAX_FRAME_BYTES;
use crate::state::AppState;

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/documents", post(upload_handler))
        .route("/documents/:id", get(document_handler))
        .route("/documents/:id/process", post(process_handler))
        .route("/documents/:id/reprocess", post(reprocess_handler))
        .route("/users/:id/documents", get(user_documents_handler))
        .route("/assessments", post(assess_handler))
        .route("/assessments/:id", get(assessment_handler))
        .route("/users/:id/assessments", get(user_assessments_handler))
        .route("/plugins", get(plugins_handler))
        .layer(DefaultBodyLimit::max(MAX_FRAME_BYTES))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Onboard HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub user_id: Option<Uuid>,
    pub document_type: Option<String>,
    pub file_name: Option<String>,
    #[serde(default)]
    pub process: bool,
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub async fn health_inner(state: &AppState) -> (StatusCode, serde_json::Value) {
    let response = crate::router::handle_request(OnboardRequest::Health, state).await;

    match response_to_http(response) {
        Ok(mut data) => {
            if let Some(obj) = data.as_object_mut() {
                obj.insert("version".to_string(), serde_json::json!(env!("CARGO_PKG_VERSION")));
                obj.insert(
                    "socket".to_string(),
                    serde_json::json!(state.config.service.socket_path),
                );
            }
            (StatusCode::OK, data)
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e,
            }),
        ),
    }
}

/// Version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION,
    })
}

pub async fn upload_inner(
    state: &AppState,
    params: UploadParams,
    content_type: Option<String>,
    body: Bytes,
) -> (StatusCode, serde_json::Value) {
    let user_id = match params.user_id {
        Some(id) => id,
        None => return bad_request("user_id query parameter is required"),
    };
    let document_type = match params.document_type.as_deref() {
        None => DocumentType::Other,
        Some(name) => match DocumentType::parse(name) {
            Some(t) => t,
            None => return bad_request(&format!("unknown document_type '{}'", name)),
        },
    };

    let request = OnboardRequest::Ingest {
        user_id,
        document_type,
        file_name: params
            .file_name
            .unwrap_or_else(|| format!("{}.bin", document_type.as_str())),
        content_type: content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
        content: body,
        process: params.process,
    };

    match dispatch(state, request).await {
        (StatusCode::OK, data) => (StatusCode::CREATED, data),
        other => other,
    }
}

pub async fn dispatch(state: &AppState, request: OnboardRequest) -> (StatusCode, serde_json::Value) {
    let response = crate::router::handle_request(request, state).await;
    let status = status_for(&response);
    let code = response.code.clone();
    let retryable = response.retryable;

    match response_to_http(response) {
        Ok(data) => (StatusCode::OK, data),
        Err(e) => (
            status,
            serde_json::json!({
                "error": e,
                "code": code,
                "retryable": retryable,
                "status": "error",
            }),
        ),
    }
}

// ============================================================================
// Axum handler wrappers (thin - delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let (status, body) = upload_inner(&state, params, content_type, body).await;
    (status, Json(body))
}

pub async fn document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = dispatch(&state, OnboardRequest::GetDocument { document_id: id }).await;
    (status, Json(body))
}

pub async fn process_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = dispatch(&state, OnboardRequest::Process { document_id: id }).await;
    (status, Json(body))
}

pub async fn reprocess_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = dispatch(&state, OnboardRequest::Reprocess { document_id: id }).await;
    (status, Json(body))
}

pub async fn user_documents_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = dispatch(&state, OnboardRequest::ListDocuments { user_id: id }).await;
    (status, Json(body))
}

pub async fn assess_handler(
    State(state): State<Arc<AppState>>,
    Json(profile): Json<UserProfile>,
) -> impl IntoResponse {
    let (status, body) = dispatch(&state, OnboardRequest::Assess { profile }).await;
    match status {
        StatusCode::OK => (StatusCode::CREATED, Json(body)),
        other => (other, Json(body)),
    }
}

pub async fn assessment_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) =
        dispatch(&state, OnboardRequest::GetAssessment { assessment_id: id }).await;
    (status, Json(body))
}

pub async fn user_assessments_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = dispatch(&state, OnboardRequest::ListAssessments { user_id: id }).await;
    (status, Json(body))
}

pub async fn plugins_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = dispatch(&state, OnboardRequest::ListPlugins).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

fn bad_request(msg: &str) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::BAD_REQUEST,
        serde_json::json!({
            "error": msg,
            "code": "bad_request",
            "status": "error",
        }),
    )
}

/// HTTP status for a router response, derived from its error code.
pub fn status_for(response: &OnboardResponse) -> StatusCode {
    if response.is_ok() {
        return StatusCode::OK;
    }
    match response.code.as_deref() {
        Some("not_found") => StatusCode::NOT_FOUND,
        Some("already_processing") | Some("invalid_transition") => StatusCode::CONFLICT,
        Some("insufficient_signal") => StatusCode::UNPROCESSABLE_ENTITY,
        Some("bad_request") => StatusCode::BAD_REQUEST,
        _ if response.retryable == Some(true) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert an IPC `OnboardResponse` into an HTTP body value, or an error string.
pub fn response_to_http(response: OnboardResponse) -> std::result::Result<serde_json::Value, String> {
    if response.status == "ok" {
        Ok(response.data.unwrap_or(serde_json::json!({})))
    } else {
        Err(response.error.unwrap_or_else(|| "unknown error".to_string()))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "onboard/1");
    }

    #[test]
    fn test_response_to_http_ok() {
        let resp = OnboardResponse::ok(serde_json::json!({"count": 0}));
        assert_eq!(response_to_http(resp).unwrap()["count"], 0);
    }

    #[test]
    fn test_response_to_http_error_no_message() {
        let mut resp = OnboardResponse::err("x");
        resp.error = None;
        assert_eq!(response_to_http(resp).unwrap_err(), "unknown error");
    }

    #[test]
    fn test_status_for_maps_codes() {
        use onboard_core::FailureKind;
        let busy = OnboardResponse::failure("already_processing", FailureKind::Transient, "busy");
        assert_eq!(status_for(&busy), StatusCode::CONFLICT);
        let missing = OnboardResponse::failure("not_found", FailureKind::Permanent, "gone");
        assert_eq!(status_for(&missing), StatusCode::NOT_FOUND);
        let store = OnboardResponse::failure("store_error", FailureKind::Transient, "db");
        assert_eq!(status_for(&store), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(&OnboardResponse::err("?")), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health_inner_memory() {
        let state = testing::memory_state();
        let (status, body) = health_inner(&state).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["socket"], "/tmp/onboard-test.sock");
    }

    #[tokio::test]
    async fn test_upload_requires_user_id() {
        let state = testing::memory_state();
        let params = UploadParams {
            user_id: None,
            document_type: Some("passport".to_string()),
            file_name: None,
            process: false,
        };
        let (status, body) = upload_inner(&state, params, None, Bytes::from_static(&[1])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_upload_rejects_unknown_document_type() {
        let state = testing::memory_state();
        let user_id = Uuid::new_v4();
        let params = UploadParams {
            user_id: Some(user_id),
            document_type: Some("pasport".to_string()),
            file_name: None,
            process: false,
        };
        let (status, body) = upload_inner(&state, params, None, Bytes::from_static(&[1])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");
        assert!(state.pipeline.list(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_then_process_over_http() {
        let app = build_router(testing::memory_state());
        let user_id = Uuid::new_v4();

        let upload = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!(
                        "/documents?user_id={}&document_type=passport&file_name=p.png",
                        user_id
                    ))
                    .header("content-type", "image/png")
                    .body(Body::from(vec![0x89, 0x50, 0x4e, 0x47]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(upload.status(), StatusCode::CREATED);
        let uploaded = body_json(upload).await;
        let id = uploaded["document"]["id"].as_str().unwrap().to_string();
        assert_eq!(uploaded["document"]["content_type"], "image/png");

        let processed = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/documents/{}/process", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(processed.status(), StatusCode::OK);
        let doc = body_json(processed).await;
        assert_eq!(doc["state"], "extracted");
        assert_eq!(doc["fields"]["fields"]["passport_number"]["provenance"], "ocr");

        let again = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/documents/{}/process", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(again).await["code"], "invalid_transition");
    }

    #[tokio::test]
    async fn test_unknown_assessment_is_404() {
        let app = build_router(testing::memory_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/assessments/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_assess_over_http_creates_assessment() {
        let app = build_router(testing::memory_state());
        let user_id = Uuid::new_v4();
        let profile = serde_json::json!({ "id": user_id, "sift_score": 35 });

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/assessments")
                    .header("content-type", "application/json")
                    .body(Body::from(profile.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let assessment = body_json(response).await;
        assert_eq!(assessment["verdict"], "medium");
        assert_eq!(assessment["results"][0]["plugin_name"], "sift");

        let listed = app
            .oneshot(
                Request::builder()
                    .uri(format!("/users/{}/assessments", user_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(listed.status(), StatusCode::OK);
        assert_eq!(body_json(listed).await.as_array().unwrap().len(), 1);
    }
}
