use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A model offered through the quota-based subscription tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,
}

impl ModelDefinition {
    /// An empty role matches every model.
    pub fn supports_role(&self, role: &str) -> bool {
        role.is_empty() || self.roles.iter().any(|r| r == role)
    }

    /// Available unless the status explicitly says otherwise.
    pub fn is_available(&self) -> bool {
        self.status.is_empty() || self.status.eq_ignore_ascii_case("available")
    }
}

/// Payload of `GET {base}/api/subscription/v1/models`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelListResponse {
    pub models: Vec<ModelDefinition>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Router-facing result of a subscription selection.
#[derive(Debug, Clone)]
pub struct SubscriptionSelection {
    pub model: ModelDefinition,
    pub role: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str, status: &str, roles: &[&str]) -> ModelDefinition {
        ModelDefinition {
            id: id.to_string(),
            name: id.to_string(),
            display_name: None,
            description: None,
            status: status.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            created_at: None,
            max_concurrency: None,
        }
    }

    #[test]
    fn empty_role_matches_any_model() {
        let m = model("m1", "available", &["architect"]);
        assert!(m.supports_role(""));
        assert!(m.supports_role("architect"));
        assert!(!m.supports_role("debugging"));
    }

    #[test]
    fn availability_defaults_to_true() {
        assert!(model("m1", "", &[]).is_available());
        assert!(model("m1", "Available", &[]).is_available());
        assert!(!model("m1", "deprecated", &[]).is_available());
    }
}
