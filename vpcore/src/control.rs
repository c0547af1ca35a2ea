//! Messages carried on the session's control data channel.

use crate::signaling::SessionToken;
use serde::{Deserialize, Serialize};

/// Default label of the control data channel.
pub const CONTROL_CHANNEL_LABEL: &str = "control";

/// Client → agent messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundControl {
    ClientReady { webrtc_id: SessionToken },
    ClientDisconnect { webrtc_id: SessionToken },
    Ping { webrtc_id: SessionToken },
    ClientMute { webrtc_id: SessionToken, muted: bool },
}

impl OutboundControl {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientReady { .. } => "client-ready",
            Self::ClientDisconnect { .. } => "client-disconnect",
            Self::Ping { .. } => "ping",
            Self::ClientMute { .. } => "client-mute",
        }
    }

    pub fn to_text(&self) -> String {
        // Only owned strings and bools; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Agent → client messages. Anything with an unrecognised `type` lands in
/// `Unknown`.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundControl {
    Response(serde_json::Value),
    Log(String),
    Error(String),
    Warning(String),
    Unknown {
        kind: String,
        payload: serde_json::Value,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ControlParseError {
    #[error("control payload is not json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("control payload has no type field")]
    MissingType,
}

impl InboundControl {
    /// Parses a text frame. `response` messages keep the whole payload (minus
    /// `type`); log-ish messages extract `message`/`data` as text.
    pub fn parse(text: &str) -> Result<Self, ControlParseError> {
        let mut value: serde_json::Value = serde_json::from_str(text)?;
        let object = value
            .as_object_mut()
            .ok_or(ControlParseError::MissingType)?;
        let kind = match object.remove("type") {
            Some(serde_json::Value::String(kind)) => kind,
            _ => return Err(ControlParseError::MissingType),
        };

        let text_of = |object: &serde_json::Map<String, serde_json::Value>| {
            object
                .get("message")
                .or_else(|| object.get("data"))
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default()
        };

        Ok(match kind.as_str() {
            "response" => Self::Response(value),
            "log" => Self::Log(text_of(object)),
            "error" => Self::Error(text_of(object)),
            "warning" => Self::Warning(text_of(object)),
            _ => Self::Unknown {
                kind,
                payload: value,
            },
        })
    }
}

/// Payload fields some agents attach to `response` messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AgentResponse {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

impl AgentResponse {
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn content(&self) -> Option<&str> {
        self.text.as_deref().or(self.data.as_deref())
    }
}
