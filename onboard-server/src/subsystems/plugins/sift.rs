//! Sift score plugin.
//!
//! Does not call Sift. Users upload their Sift score, which arrives in the
//! profile's extra attributes as `sift_score`; this plugin clamps it to
//! 0–100 and derives a coarse risk band.

use async_trait::async_trait;
use onboard_core::models::UserProfile;
use serde_json::{json, Value};

use super::{Plugin, PluginError};

pub const NAME: &str = "sift";

pub struct SiftPlugin;

fn risk_band(score: f64) -> &'static str {
    if score > 80.0 {
        "Very high Sift risk score"
    } else if score > 60.0 {
        "High Sift risk score"
    } else if score > 40.0 {
        "Medium Sift risk score"
    } else if score > 20.0 {
        "Low Sift risk score"
    } else {
        "Very low Sift risk score"
    }
}

fn parse_score(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|s| s.is_finite())
}

#[async_trait]
impl Plugin for SiftPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Manual Sift score processor"
    }

    async fn execute(&self, profile: &UserProfile) -> Result<Value, PluginError> {
        let raw = match profile.extra.get("sift_score") {
            None | Some(Value::Null) => {
                tracing::warn!(user_id = %profile.id, "No Sift score provided");
                return Ok(json!({
                    "score": 0.0,
                    "risk_factors": ["No Sift score provided"],
                    "has_score": false
                }));
            }
            Some(raw) => raw,
        };

        let score = match parse_score(raw) {
            Some(s) => s.clamp(0.0, 100.0),
            None => {
                tracing::warn!(user_id = %profile.id, value = %raw, "Invalid Sift score format");
                return Ok(json!({
                    "score": 0.0,
                    "risk_factors": ["Invalid Sift score format"],
                    "has_score": false
                }));
            }
        };

        Ok(json!({
            "score": score,
            "risk_factors": [risk_band(score)],
            "has_score": true
        }))
    }

    fn validate_response(&self, payload: &Value) -> bool {
        payload.is_object() && payload.get("score").is_some() && payload.get("risk_factors").is_some()
    }

    fn normalize(&self, payload: &Value) -> Option<f64> {
        // Placeholder payloads carry no signal.
        if payload.get("has_score").and_then(|v| v.as_bool()) == Some(false) {
            return None;
        }
        payload
            .get("score")
            .and_then(|v| v.as_f64())
            .map(|s| (s / 100.0).clamp(0.0, 1.0))
    }
}
