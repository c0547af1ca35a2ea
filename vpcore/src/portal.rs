//! Request and response bodies of the portal REST API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix every REST route is mounted under.
pub const API_PREFIX: &str = "/api";
pub const DEFAULT_LIST_LIMIT: u32 = 10;

/// Result of either login flavour. OTP logins also report remaining uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "bearer")]
    pub token_type: String,
    #[serde(default)]
    pub remaining_uses: Option<u32>,
}

fn bearer() -> String {
    "bearer".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct OtpLogin<'a> {
    pub otp_code: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordChange<'a> {
    pub current_password: &'a str,
    pub new_password: &'a str,
}

/// Generic `{message}` acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

/// Entry of the end-user agent list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub api_path: Option<String>,
    #[serde(default)]
    pub is_outbound: bool,
    #[serde(default)]
    pub primary_language: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl AgentSummary {
    /// Path the session's signaling requests are sent under.
    pub fn signaling_path(&self) -> String {
        crate::signaling::signaling_path_for(&self.id, self.api_path.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: u32,
    pub limit: u32,
    pub offset: u32,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentList {
    pub agents: Vec<AgentSummary>,
    pub pagination: Pagination,
}

/// Default page size of the admin monitoring lists. The backend caps it at 500.
pub const MONITORING_LIST_LIMIT: u32 = 100;

/// One OTP-authorised agent access, newest first in [`UsageList`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: i64,
    pub otp_id: i64,
    pub agent_type: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageList {
    pub data: Vec<UsageRecord>,
    pub pagination: Pagination,
}

/// Per-agent traffic counters. Only the agent and last activity are fixed;
/// the remaining counters are kept as reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRecord {
    pub agent_type: String,
    #[serde(default)]
    pub last_activity: Option<String>,
    #[serde(flatten)]
    pub counters: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficList {
    pub data: Vec<TrafficRecord>,
    pub pagination: Pagination,
}

/// Outcome of the usage and traffic clear routes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClearResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessRequest<'a> {
    pub agent_type: &'a str,
}

/// Successful access grant. `remaining_uses` is absent for admin tokens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessGrant {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub remaining_uses: Option<u32>,
}

/// Full agent definition as accepted by the admin create/update routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    pub name: String,
    pub description: String,
    pub api_path: String,
    pub startup_message: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
    pub voice_name: String,
    #[serde(default)]
    pub is_outbound: bool,
    #[serde(default)]
    pub languages: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub speech_context: Vec<String>,
    #[serde(default)]
    pub limitations: Vec<String>,
    #[serde(default)]
    pub llm_model_id: Option<i64>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub error_messages: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn enabled() -> bool {
    true
}

fn default_temperature() -> f64 {
    0.7
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Otp {
    pub id: i64,
    pub code: String,
    pub max_uses: u32,
    #[serde(default)]
    pub remaining_uses: Option<u32>,
    #[serde(default)]
    pub is_used: Option<bool>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct OtpCreate {
    pub count: u32,
    pub max_uses: u32,
}

impl Default for OtpCreate {
    fn default() -> Self {
        Self {
            count: 1,
            max_uses: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct OtpUpdate {
    pub max_uses: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmProvider {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LlmProviderInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmModel {
    pub id: i64,
    pub provider_id: i64,
    pub name: String,
    pub display_name: String,
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,
}

/// Body of model create (all of `provider_id`, `name`, `display_name` set)
/// and update (any subset).
#[derive(Debug, Clone, Default, Serialize)]
pub struct LlmModelInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_temperature: Option<f64>,
}

/// Keys of the system configuration document.
pub const SYSTEM_CONFIG_KEYS: [&str; 4] = [
    "language_codes",
    "model_config",
    "audio_options",
    "default_messages",
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_agent_list_decodes_backend_shape() {
        let body = json!({
            "agents": [{
                "id": "realestate",
                "name": "Real Estate",
                "description": "Property help",
                "api_path": "/api/voice-agents/realestate",
                "is_outbound": false,
                "primary_language": "en-IN",
                "tags": ["sales"],
                "websocket_endpoint": "/api/voice-agents/realestate",
                "auth_required": true
            }],
            "pagination": {"total": 1, "limit": 10, "offset": 0, "has_more": false}
        });
        let list: AgentList = serde_json::from_value(body).unwrap();
        assert_eq!(list.agents.len(), 1);
        assert_eq!(
            list.agents[0].signaling_path(),
            "/api/voice-agents/realestate"
        );
        assert!(!list.pagination.has_more);
    }

    #[test]
    fn test_stream_style_api_path_falls_back_to_mount() {
        let agent = AgentSummary {
            id: "hospital".into(),
            name: "Hospital".into(),
            description: String::new(),
            api_path: Some("/api/voice-agents/stream?agent_type=hospital".into()),
            is_outbound: false,
            primary_language: None,
            tags: vec![],
        };
        assert_eq!(agent.signaling_path(), "/api/voice-agents/hospital");
    }

    #[test]
    fn test_token_response_defaults() {
        let token: TokenResponse =
            serde_json::from_value(json!({"access_token": "t"})).unwrap();
        assert_eq!(token.token_type, "bearer");
        assert_eq!(token.remaining_uses, None);
    }

    #[test]
    fn test_model_update_omits_unset_fields() {
        let update = LlmModelInput {
            display_name: Some("GPT".into()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"display_name": "GPT"})
        );
    }
}
