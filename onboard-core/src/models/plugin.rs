use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Timeout,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ExecutionStatus::Success),
            "timeout" => Some(ExecutionStatus::Timeout),
            "error" => Some(ExecutionStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Valid,
    Invalid,
    /// No payload was produced, so nothing was validated.
    NotChecked,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Valid => "valid",
            ValidationOutcome::Invalid => "invalid",
            ValidationOutcome::NotChecked => "not_checked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "valid" => Some(ValidationOutcome::Valid),
            "invalid" => Some(ValidationOutcome::Invalid),
            "not_checked" => Some(ValidationOutcome::NotChecked),
            _ => None,
        }
    }
}

/// Public description of a registered plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub weight: f64,
    pub timeout_ms: u64,
    pub max_retries: usize,
}

/// Outcome of one plugin execution for one user. Never mutated after the
/// executor builds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginResult {
    pub id: Uuid,
    pub plugin_name: String,
    pub payload: serde_json::Value,
    pub validation: ValidationOutcome,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub attempts: u32,
    /// Normalized 0–1 risk contribution; only set for valid successes.
    pub contribution: Option<f64>,
    pub latency_ms: u64,
}

impl PluginResult {
    /// Whether this result takes part in score computation.
    pub fn is_scorable(&self) -> bool {
        self.status == ExecutionStatus::Success
            && self.validation == ValidationOutcome::Valid
            && self.contribution.is_some()
    }
}
