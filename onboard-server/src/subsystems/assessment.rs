//! Risk assessment engine
//!
//! Score = blend of two signals:
//! - **plugin score**: weighted mean of the normalized contributions of
//!   successful, valid plugin results;
//! - **field signal**: mean uncertainty (`1 − confidence`) of the mandatory
//!   fields of the user's extracted documents, unresolved fields counting 1.0.
//!
//! If only one signal exists it is used alone. The verdict comes from the
//! configured thresholds. The LLM adds an advisory verdict, a narrative and
//! red flags; when it fails the assessment is still produced with the
//! narrative marked unavailable.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use onboard_core::config::AssessmentConfig;
use onboard_core::error::{FailureKind, StoreError};
use onboard_core::llm::LlmBackend;
use onboard_core::models::{
    Assessment, Document, ExecutionStatus, Narrative, PluginResult, UserProfile, Verdict,
};
use onboard_core::store::{AssessmentStore, DocumentStore};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use super::plugins::PluginRegistry;
use super::prompts;

#[derive(Error, Debug)]
pub enum AssessmentError {
    #[error("No scorable plugin result and no extracted document for user {0}")]
    InsufficientSignal(Uuid),

    #[error("Assessment not found: {0}")]
    NotFound(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl AssessmentError {
    pub fn kind(&self) -> FailureKind {
        match self {
            // More documents or a later plugin run may provide signal.
            AssessmentError::InsufficientSignal(_) | AssessmentError::Store(_) => {
                FailureKind::Transient
            }
            AssessmentError::NotFound(_) => FailureKind::Permanent,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AssessmentError::InsufficientSignal(_) => "insufficient_signal",
            AssessmentError::NotFound(_) => "not_found",
            AssessmentError::Store(_) => "store_error",
        }
    }
}

// ============================================================================
// Scoring (pure)
// ============================================================================

/// Σ wᵢ·cᵢ / Σ wᵢ over scorable results. `None` when nothing is scorable.
pub fn plugin_score(results: &[PluginResult], weight_of: impl Fn(&str) -> f64) -> Option<f64> {
    let (weighted, total) = results
        .iter()
        .filter(|r| r.is_scorable())
        .filter_map(|r| r.contribution.map(|c| (weight_of(&r.plugin_name).max(0.0), c)))
        .fold((0.0, 0.0), |(acc, sum), (w, c)| (acc + w * c, sum + w));

    if total > 0.0 {
        Some(weighted / total)
    } else {
        None
    }
}

/// Mean field uncertainty across extracted documents. `None` when no
/// extracted document contributes a field.
pub fn field_signal<'a>(documents: impl IntoIterator<Item = &'a Document>) -> Option<f64> {
    let mut contributions: Vec<f64> = Vec::new();

    for doc in documents {
        let Some(fields) = doc.extracted_fields() else {
            continue;
        };
        let mandatory = doc.document_type.mandatory_fields();

        if mandatory.is_empty() {
            contributions.extend(fields.fields.values().map(|f| 1.0 - f.confidence));
            continue;
        }

        for name in mandatory {
            match fields.get(name) {
                Some(f) => contributions.push(1.0 - f.confidence),
                None => contributions.push(1.0),
            }
        }
    }

    if contributions.is_empty() {
        None
    } else {
        Some(contributions.iter().sum::<f64>() / contributions.len() as f64)
    }
}

pub fn blend(plugin: Option<f64>, field: Option<f64>, ratio: f64) -> Option<f64> {
    let ratio = ratio.clamp(0.0, 1.0);
    match (plugin, field) {
        (Some(p), Some(f)) => Some(ratio * p + (1.0 - ratio) * f),
        (Some(p), None) => Some(p),
        (None, Some(f)) => Some(f),
        (None, None) => None,
    }
}

// ============================================================================
// LLM reasoning
// ============================================================================

struct Reasoning {
    verdict: Option<Verdict>,
    narrative: Narrative,
    red_flags: Vec<String>,
}

impl Reasoning {
    fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            verdict: None,
            narrative: Narrative::Unavailable {
                reason: reason.into(),
            },
            red_flags: Vec::new(),
        }
    }
}

fn parse_reasoning(response: &Value) -> Reasoning {
    let text = match response.get("reasoning").and_then(|v| v.as_str()) {
        Some(t) if !t.trim().is_empty() => t.trim().to_string(),
        _ => return Reasoning::unavailable("LLM response has no reasoning"),
    };

    let strings = |key: &str| -> Vec<String> {
        response
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default()
    };

    let mut red_flags = strings("red_flags");
    red_flags.extend(
        strings("discrepancies")
            .into_iter()
            .map(|d| format!("Discrepancy: {}", d)),
    );

    Reasoning {
        verdict: response
            .get("risk_status")
            .and_then(|v| v.as_str())
            .and_then(Verdict::parse),
        narrative: Narrative::Available { text },
        red_flags,
    }
}

fn documents_summary(documents: &[&Document]) -> Value {
    Value::Array(
        documents
            .iter()
            .map(|doc| {
                let fields: serde_json::Map<String, Value> = doc
                    .fields
                    .iter()
                    .flat_map(|set| set.fields.iter())
                    .map(|(name, f)| (name.clone(), json!(f.value)))
                    .collect();
                json!({
                    "document_type": doc.document_type.as_str(),
                    "data": fields,
                })
            })
            .collect(),
    )
}

fn third_party_summary(results: &[PluginResult]) -> Value {
    let map: serde_json::Map<String, Value> = results
        .iter()
        .map(|r| {
            let entry = match r.status {
                ExecutionStatus::Success => r.payload.clone(),
                _ => json!({ "status": r.status.as_str(), "error": r.error }),
            };
            (r.plugin_name.clone(), entry)
        })
        .collect();
    Value::Object(map)
}

// ============================================================================
// Engine
// ============================================================================

pub struct RiskEngine {
    registry: Arc<PluginRegistry>,
    llm: Arc<dyn LlmBackend>,
    documents: Arc<dyn DocumentStore>,
    assessments: Arc<dyn AssessmentStore>,
    config: AssessmentConfig,
}

impl RiskEngine {
    pub fn new(
        registry: Arc<PluginRegistry>,
        llm: Arc<dyn LlmBackend>,
        documents: Arc<dyn DocumentStore>,
        assessments: Arc<dyn AssessmentStore>,
        config: AssessmentConfig,
    ) -> Self {
        Self {
            registry,
            llm,
            documents,
            assessments,
            config,
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Load the user's documents, run every plugin, then assess.
    pub async fn run(&self, profile: &UserProfile) -> Result<Assessment, AssessmentError> {
        let documents = self.documents.list_documents(profile.id).await?;
        let results = self.registry.execute_all(profile).await;
        self.assess(profile, &documents, results).await
    }

    /// Score, reason and persist. Documents that are not `extracted` are ignored.
    pub async fn assess(
        &self,
        profile: &UserProfile,
        documents: &[Document],
        results: Vec<PluginResult>,
    ) -> Result<Assessment, AssessmentError> {
        let extracted: Vec<&Document> = documents
            .iter()
            .filter(|d| d.user_id == profile.id && d.extracted_fields().is_some())
            .collect();

        let plugin = plugin_score(&results, |name| self.registry.weight_of(name));
        let field = field_signal(extracted.iter().copied());

        let score = blend(plugin, field, self.config.blend_ratio)
            .ok_or(AssessmentError::InsufficientSignal(profile.id))?
            .clamp(0.0, 1.0);
        let verdict = Verdict::from_score(
            score,
            self.config.low_threshold,
            self.config.medium_threshold,
        );

        let reasoning = self.reason(profile, &extracted, &results, score).await;

        if let Some(llm_verdict) = reasoning.verdict {
            if llm_verdict != verdict {
                tracing::info!(
                    user_id = %profile.id,
                    verdict = %verdict,
                    llm_verdict = %llm_verdict,
                    "LLM verdict disagrees with threshold verdict"
                );
            }
        }

        let assessment = Assessment {
            id: Uuid::new_v4(),
            user_id: profile.id,
            score,
            verdict,
            llm_verdict: reasoning.verdict,
            narrative: reasoning.narrative,
            red_flags: reasoning.red_flags,
            plugin_score: plugin,
            field_signal: field,
            results,
            document_ids: extracted.iter().map(|d| d.id).collect(),
            created_at: Utc::now(),
        };

        self.assessments.save_assessment(&assessment).await?;

        tracing::info!(
            assessment_id = %assessment.id,
            user_id = %profile.id,
            score = assessment.score,
            verdict = %assessment.verdict,
            plugins = assessment.results.len(),
            documents = assessment.document_ids.len(),
            narrative = assessment.narrative.is_available(),
            "Assessment created"
        );

        Ok(assessment)
    }

    pub async fn get(&self, id: Uuid) -> Result<Assessment, AssessmentError> {
        self.assessments
            .load_assessment(id)
            .await?
            .ok_or(AssessmentError::NotFound(id))
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Assessment>, AssessmentError> {
        Ok(self.assessments.list_assessments(user_id).await?)
    }

    async fn reason(
        &self,
        profile: &UserProfile,
        documents: &[&Document],
        results: &[PluginResult],
        score: f64,
    ) -> Reasoning {
        let user = serde_json::to_value(profile).unwrap_or(Value::Null);
        let prompt = prompts::reasoning_prompt(
            &user,
            &documents_summary(documents),
            &third_party_summary(results),
            score,
        );

        let timeout = Duration::from_secs(self.config.reasoning_timeout_seconds);
        let call = self.llm.complete(&prompt, prompts::REASONING_SCHEMA_HINT);

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(response)) => parse_reasoning(&response),
            Ok(Err(e)) => {
                tracing::warn!(user_id = %profile.id, "LLM reasoning failed: {}", e);
                Reasoning::unavailable(e.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    user_id = %profile.id,
                    timeout_secs = self.config.reasoning_timeout_seconds,
                    "LLM reasoning timed out"
                );
                Reasoning::unavailable(format!(
                    "LLM reasoning timed out after {}s",
                    self.config.reasoning_timeout_seconds
                ))
            }
        }
    }
}
