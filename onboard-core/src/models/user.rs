use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The slice of user data third-party checks run against. Anything the
/// caller sends beyond the known fields lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_business: bool,
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub tax_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with_extra(mut self, key: &str, value: serde_json::Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_keys_are_kept_in_extra() {
        let id = Uuid::new_v4();
        let profile: UserProfile = serde_json::from_value(serde_json::json!({
            "id": id,
            "full_name": "Ada Lovelace",
            "sift_score": 42
        }))
        .unwrap();

        assert_eq!(profile.full_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(profile.extra["sift_score"], 42);
        assert!(!profile.is_business);
    }
}
