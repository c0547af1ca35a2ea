use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use vpcore::error::SessionError;
use vpcore::state::SessionPhase;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// What observers see on every phase change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    #[serde(flatten)]
    pub phase: SessionPhase,
    /// User-facing text for the error that caused `Failed`.
    pub error: Option<String>,
    /// Technical description of the same error, for logs.
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl SessionStatus {
    pub fn new(phase: SessionPhase, error: Option<&SessionError>) -> Self {
        let error = error.filter(|_| phase == SessionPhase::Failed);
        Self {
            phase,
            error: error.map(|e| e.user_message().to_string()),
            detail: error.map(ToString::to_string),
            at: Utc::now(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.phase.is_connected()
    }

    pub fn is_muted(&self) -> bool {
        matches!(self.phase, SessionPhase::Connected { muted: true })
    }
}

/// Receives status changes and agent messages.
///
/// Callbacks run on the session's tasks; implementations must not block
/// and must not call back into the client.
pub trait SessionObserver: Send + Sync {
    fn on_status_changed(&self, status: &SessionStatus);

    /// A `response` message from the agent.
    fn on_message(&self, _message: &serde_json::Value) {}
}

/// Observer that only logs.
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn on_status_changed(&self, status: &SessionStatus) {
        match &status.detail {
            Some(detail) => log::warn!(target: "Client", "Status {:?}: {detail}", status.phase),
            None => log::info!(target: "Client", "Status {:?}", status.phase),
        }
    }

    fn on_message(&self, message: &serde_json::Value) {
        log::info!(target: "Client", "Agent response: {message}");
    }
}

/// Broadcast fan-out for observers that prefer channels over callbacks.
#[derive(Debug)]
pub struct SessionEventBus {
    pub status: broadcast::Sender<Arc<SessionStatus>>,
    pub messages: broadcast::Sender<Arc<serde_json::Value>>,
}

impl SessionEventBus {
    pub fn new() -> Self {
        Self {
            status: broadcast::channel(CHANNEL_CAPACITY).0,
            messages: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }
}

impl Default for SessionEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionObserver for SessionEventBus {
    fn on_status_changed(&self, status: &SessionStatus) {
        let _ = self.status.send(Arc::new(status.clone()));
    }

    fn on_message(&self, message: &serde_json::Value) {
        let _ = self.messages.send(Arc::new(message.clone()));
    }
}
