//! Error taxonomy shared by every layer of a voice session.

use std::time::Duration;
use thiserror::Error;

/// Microphone acquisition failures. Non-fatal: the user may retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio constraints not satisfiable: {0}")]
    ConstraintsNotSatisfiable(String),
}

/// Offer/answer negotiation failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("answer payload carried no sdp")]
    InvalidAnswer,

    #[error("peer connection setup failed: {0}")]
    TransportSetupFailed(String),

    #[error("signaling request failed: {0}")]
    SignalingRequestFailed(String),

    #[error("connection not established within {0:?}")]
    TimedOut(Duration),
}

/// The transport reported failed/disconnected/closed after being connected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("transport lost (state: {state})")]
pub struct TransportLostError {
    pub state: String,
}

/// Missing credentials or a backend-rejected access grant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("access rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },
}

/// Any error that can end or block a session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    TransportLost(#[from] TransportLostError),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
}

impl SessionError {
    /// Text shown to the end user for this class of failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Media(_) => "Please enable your microphone and try again.",
            Self::Negotiation(_) => "Could not connect to the agent. Please try again.",
            Self::TransportLost(_) => "Connection lost, try reconnecting.",
            Self::Authorization(_) => {
                "Your credentials are exhausted or invalid. Please contact support."
            }
        }
    }

    /// Whether the user can retry without new credentials.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Authorization(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages_are_distinct_per_class() {
        let media = SessionError::from(MediaError::PermissionDenied);
        let negotiation = SessionError::from(NegotiationError::InvalidAnswer);
        let lost = SessionError::from(TransportLostError {
            state: "failed".into(),
        });
        let auth = SessionError::from(AuthorizationError::NotAuthenticated);

        let messages = [
            media.user_message(),
            negotiation.user_message(),
            lost.user_message(),
            auth.user_message(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(!auth.is_retryable());
        assert!(media.is_retryable());
    }

    #[test]
    fn test_transparent_display() {
        let err = SessionError::from(NegotiationError::InvalidAnswer);
        assert_eq!(err.to_string(), "answer payload carried no sdp");
    }
}
