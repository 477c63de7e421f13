use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::plugin::PluginResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Low,
    Medium,
    High,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Low => "low",
            Verdict::Medium => "medium",
            Verdict::High => "high",
        }
    }

    /// Lenient parse for LLM output ("Low", " high ", ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Verdict::Low),
            "medium" => Some(Verdict::Medium),
            "high" => Some(Verdict::High),
            _ => None,
        }
    }

    /// Map a 0–1 score onto a verdict: `< low` → low, `< medium` → medium,
    /// otherwise high.
    pub fn from_score(score: f64, low: f64, medium: f64) -> Self {
        if score < low {
            Verdict::Low
        } else if score < medium {
            Verdict::Medium
        } else {
            Verdict::High
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory LLM explanation attached to an assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Narrative {
    Available { text: String },
    Unavailable { reason: String },
}

impl Narrative {
    pub fn is_available(&self) -> bool {
        matches!(self, Narrative::Available { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub score: f64,
    /// Threshold-derived verdict; authoritative for automated decisions.
    pub verdict: Verdict,
    pub llm_verdict: Option<Verdict>,
    pub narrative: Narrative,
    pub red_flags: Vec<String>,
    pub plugin_score: Option<f64>,
    pub field_signal: Option<f64>,
    /// In execution order.
    pub results: Vec<PluginResult>,
    pub document_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_from_score_boundaries() {
        assert_eq!(Verdict::from_score(0.0, 0.3, 0.7), Verdict::Low);
        assert_eq!(Verdict::from_score(0.2999, 0.3, 0.7), Verdict::Low);
        assert_eq!(Verdict::from_score(0.3, 0.3, 0.7), Verdict::Medium);
        assert_eq!(Verdict::from_score(0.6999, 0.3, 0.7), Verdict::Medium);
        assert_eq!(Verdict::from_score(0.7, 0.3, 0.7), Verdict::High);
        assert_eq!(Verdict::from_score(1.0, 0.3, 0.7), Verdict::High);
    }

    #[test]
    fn test_verdict_parse_is_lenient() {
        assert_eq!(Verdict::parse(" High "), Some(Verdict::High));
        assert_eq!(Verdict::parse("MEDIUM"), Some(Verdict::Medium));
        assert_eq!(Verdict::parse("severe"), None);
    }

    #[test]
    fn test_narrative_serializes_with_status_tag() {
        let n = Narrative::Unavailable {
            reason: "timeout".to_string(),
        };
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["status"], "unavailable");
        assert_eq!(v["reason"], "timeout");
    }
}
