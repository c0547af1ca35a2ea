//! Wire types for the HTTP signaling exchange with a voice agent.
//!
//! Every message is POSTed to `{agent_api_path}/webrtc/offer`; the `type`
//! field distinguishes offers from single and batched candidates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Path suffix of the signaling endpoint, relative to an agent's API path.
pub const OFFER_ENDPOINT: &str = "/webrtc/offer";

/// Prefix under which the backend mounts each agent's stream.
pub const AGENT_MOUNT_PREFIX: &str = "/api/voice-agents";

/// Opaque per-session token sent as `webrtc_id` in every signaling message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// 96 random bits, hex encoded.
    pub fn generate() -> Self {
        let bytes: [u8; 12] = rand::random();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A connectivity candidate in the browser's `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidateInit {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    /// An empty candidate string is the end-of-candidates marker.
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// `{ sdp, type: "offer", webrtc_id }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub webrtc_id: SessionToken,
}

impl OfferRequest {
    pub fn new(sdp: impl Into<String>, webrtc_id: SessionToken) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpType::Offer,
            webrtc_id,
        }
    }
}

/// The answer payload. `sdp` is optional on the wire; its absence is a
/// protocol error the negotiator reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPayload {
    #[serde(default)]
    pub sdp: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl AnswerPayload {
    /// The answer SDP, if present and non-blank.
    pub fn sdp(&self) -> Option<&str> {
        self.sdp.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Candidate messages, distinguished by their `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CandidateMessage {
    #[serde(rename = "ice-candidate")]
    Single {
        candidate: IceCandidateInit,
        webrtc_id: SessionToken,
    },
    #[serde(rename = "ice-candidates")]
    Batch {
        candidates: Vec<IceCandidateInit>,
        webrtc_id: SessionToken,
    },
}

/// Full URL of an agent's signaling endpoint. A query string on the agent
/// path is kept after the inserted `/webrtc/offer` segment.
pub fn offer_url(base_url: &str, agent_path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let (path, query) = match agent_path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (agent_path, None),
    };
    let path = path.trim_matches('/');

    let mut url = if path.is_empty() {
        format!("{base}{OFFER_ENDPOINT}")
    } else {
        format!("{base}/{path}{OFFER_ENDPOINT}")
    };
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(q);
    }
    url
}

/// Signaling path for an agent: its advertised `api_path` when that is a
/// plain mount path, otherwise the default mount under [`AGENT_MOUNT_PREFIX`].
pub fn signaling_path_for(agent_id: &str, api_path: Option<&str>) -> String {
    match api_path.map(str::trim) {
        Some(p) if p.starts_with('/') && !p.contains('?') && p.len() > 1 => {
            p.trim_end_matches('/').to_string()
        }
        _ => format!("{AGENT_MOUNT_PREFIX}/{agent_id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_offer_request_wire_shape() {
        let req = OfferRequest::new("v=0", SessionToken::new("abc123"));
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"sdp": "v=0", "type": "offer", "webrtc_id": "abc123"})
        );
    }

    #[test]
    fn test_answer_without_sdp() {
        let answer: AnswerPayload = serde_json::from_value(json!({"type": "answer"})).unwrap();
        assert!(answer.sdp().is_none());
        let blank: AnswerPayload =
            serde_json::from_value(json!({"type": "answer", "sdp": "  "})).unwrap();
        assert!(blank.sdp().is_none());
    }

    #[test]
    fn test_candidate_messages_wire_shape() {
        let mut c = IceCandidateInit::new("candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host");
        c.sdp_mid = Some("0".into());
        c.sdp_mline_index = Some(0);

        let single = CandidateMessage::Single {
            candidate: c.clone(),
            webrtc_id: SessionToken::new("abc123"),
        };
        assert_eq!(
            serde_json::to_value(&single).unwrap(),
            json!({
                "type": "ice-candidate",
                "webrtc_id": "abc123",
                "candidate": {
                    "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host",
                    "sdpMid": "0",
                    "sdpMLineIndex": 0
                }
            })
        );

        let batch = CandidateMessage::Batch {
            candidates: vec![c.clone(), c],
            webrtc_id: SessionToken::new("abc123"),
        };
        let v = serde_json::to_value(&batch).unwrap();
        assert_eq!(v["type"], "ice-candidates");
        assert_eq!(v["candidates"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_offer_url() {
        assert_eq!(
            offer_url("https://portal.example/", "/api/voice-agents/hospital"),
            "https://portal.example/api/voice-agents/hospital/webrtc/offer"
        );
        assert_eq!(
            offer_url(
                "https://portal.example",
                "/api/voice-agents/stream?agent_type=realestate"
            ),
            "https://portal.example/api/voice-agents/stream/webrtc/offer?agent_type=realestate"
        );
    }

    #[test]
    fn test_signaling_path_derivation() {
        assert_eq!(
            signaling_path_for("hospital", Some("/api/voice-agents/hospital/")),
            "/api/voice-agents/hospital"
        );
        assert_eq!(
            signaling_path_for("realestate", Some("/api/voice-agents/stream?agent_type=x")),
            "/api/voice-agents/realestate"
        );
        assert_eq!(signaling_path_for("x", None), "/api/voice-agents/x");
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_eq!(a.as_str().len(), 24);
        assert_ne!(a, b);
    }
}
