use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FailureKind;
use crate::models::{DocumentType, UserProfile};

pub const PROTOCOL_VERSION: &str = "onboard/1";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OnboardRequest {
    Ping,
    Health,
    Ingest {
        user_id: Uuid,
        document_type: DocumentType,
        file_name: String,
        content_type: String,
        /// Encoded as MessagePack `bin`, one byte on the wire per payload byte.
        content: Bytes,
        /// Start extraction in the background right after ingestion.
        #[serde(default)]
        process: bool,
    },
    Process {
        document_id: Uuid,
    },
    Reprocess {
        document_id: Uuid,
    },
    GetDocument {
        document_id: Uuid,
    },
    ListDocuments {
        user_id: Uuid,
    },
    Assess {
        profile: UserProfile,
    },
    GetAssessment {
        assessment_id: Uuid,
    },
    ListAssessments {
        user_id: Uuid,
    },
    ListPlugins,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OnboardResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Machine-readable error code, e.g. `already_processing`.
    #[serde(default)]
    pub code: Option<String>,
    /// Whether retrying the same request later can succeed.
    #[serde(default)]
    pub retryable: Option<bool>,
    pub version: String,
}

impl OnboardResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            code: None,
            retryable: None,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            code: None,
            retryable: None,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Error carrying a code and a transient/permanent classification.
    pub fn failure(code: &str, kind: FailureKind, msg: impl Into<String>) -> Self {
        let mut resp = Self::err(msg);
        resp.code = Some(code.to_string());
        resp.retryable = Some(kind.is_retryable());
        resp
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}
