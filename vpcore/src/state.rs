//! Session state machine.

use crate::error::{MediaError, NegotiationError, SessionError, TransportLostError};
use serde::Serialize;

/// Connection phase of the voice link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    AcquiringMedia,
    Negotiating,
    /// Media is flowing; `muted` is the local mute toggle.
    Connected { muted: bool },
    Disconnecting,
    Disconnected,
    Failed,
}

impl SessionPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }

    /// Phases in which a new microphone request or connect may start.
    pub fn is_resting(&self) -> bool {
        matches!(self, Self::Idle | Self::Disconnected | Self::Failed)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone)]
pub enum SessionTransition {
    MicrophoneRequested,
    MediaAcquired,
    MediaFailed(MediaError),
    ConnectRequested,
    TransportConnected,
    NegotiationFailed(NegotiationError),
    TransportLost(TransportLostError),
    MuteChanged { muted: bool },
    DisconnectRequested,
    ResourcesReleased,
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// Current phase plus the data that outlives individual phases: the mute
/// flag and the error that caused the last failure.
#[derive(Debug, Clone, Default)]
pub struct SessionStateMachine {
    phase: SessionPhase,
    muted: bool,
    last_error: Option<SessionError>,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    /// Applies a transition. Returns `Ok(true)` when the phase changed,
    /// `Ok(false)` for accepted no-ops, and an error (phase untouched) for
    /// transitions the current phase does not allow.
    pub fn apply_transition(
        &mut self,
        transition: SessionTransition,
    ) -> Result<bool, InvalidTransition> {
        use SessionPhase as P;
        use SessionTransition as T;

        let next = match (self.phase, transition) {
            (current, T::MicrophoneRequested) if current.is_resting() => {
                self.last_error = None;
                P::AcquiringMedia
            }
            (P::AcquiringMedia, T::MediaAcquired) => P::Idle,
            (P::AcquiringMedia, T::ConnectRequested) => P::Negotiating,
            (P::AcquiringMedia, T::MediaFailed(err)) => {
                self.last_error = Some(err.into());
                P::Failed
            }
            (P::Negotiating, T::TransportConnected) => P::Connected { muted: self.muted },
            (P::Connected { .. }, T::TransportConnected) => return Ok(false),
            (P::Negotiating, T::NegotiationFailed(err)) => {
                self.last_error = Some(err.into());
                P::Failed
            }
            (P::Negotiating, T::TransportLost(lost)) => {
                self.last_error = Some(
                    NegotiationError::TransportSetupFailed(format!(
                        "transport {} before connecting",
                        lost.state
                    ))
                    .into(),
                );
                P::Failed
            }
            (P::Connected { .. }, T::TransportLost(lost)) => {
                self.last_error = Some(lost.into());
                P::Failed
            }
            (current, T::MuteChanged { muted }) => {
                self.muted = muted;
                match current {
                    P::Connected { muted: was } if was != muted => P::Connected { muted },
                    _ => return Ok(false),
                }
            }
            (P::Disconnected, T::DisconnectRequested) => return Ok(false),
            (P::Idle, T::DisconnectRequested) => return Ok(false),
            (_, T::DisconnectRequested) => P::Disconnecting,
            (P::Disconnecting, T::ResourcesReleased) => P::Disconnected,
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };

        let changed = next != self.phase;
        self.phase = next;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> SessionStateMachine {
        let mut m = SessionStateMachine::new();
        m.apply_transition(SessionTransition::MicrophoneRequested)
            .unwrap();
        m.apply_transition(SessionTransition::ConnectRequested)
            .unwrap();
        m.apply_transition(SessionTransition::TransportConnected)
            .unwrap();
        m
    }

    /// Flow: Idle → AcquiringMedia → Negotiating → Connected → Disconnecting → Disconnected
    #[test]
    fn test_full_session_flow() {
        let mut m = connected();
        assert_eq!(m.phase(), SessionPhase::Connected { muted: false });

        assert!(
            m.apply_transition(SessionTransition::DisconnectRequested)
                .unwrap()
        );
        assert_eq!(m.phase(), SessionPhase::Disconnecting);
        assert!(
            m.apply_transition(SessionTransition::ResourcesReleased)
                .unwrap()
        );
        assert_eq!(m.phase(), SessionPhase::Disconnected);

        // Disconnecting again is accepted and changes nothing.
        assert!(
            !m.apply_transition(SessionTransition::DisconnectRequested)
                .unwrap()
        );
        assert_eq!(m.phase(), SessionPhase::Disconnected);
    }

    #[test]
    fn test_duplicate_connected_is_noop() {
        let mut m = connected();
        assert!(
            !m.apply_transition(SessionTransition::TransportConnected)
                .unwrap()
        );
    }

    #[test]
    fn test_mute_keeps_phase_connected() {
        let mut m = connected();
        assert!(
            m.apply_transition(SessionTransition::MuteChanged { muted: true })
                .unwrap()
        );
        assert_eq!(m.phase(), SessionPhase::Connected { muted: true });
        assert!(m.phase().is_connected());
        assert!(
            !m.apply_transition(SessionTransition::MuteChanged { muted: true })
                .unwrap()
        );
    }

    #[test]
    fn test_mute_before_connect_is_remembered() {
        let mut m = SessionStateMachine::new();
        m.apply_transition(SessionTransition::MicrophoneRequested)
            .unwrap();
        m.apply_transition(SessionTransition::ConnectRequested)
            .unwrap();
        assert!(
            !m.apply_transition(SessionTransition::MuteChanged { muted: true })
                .unwrap()
        );
        m.apply_transition(SessionTransition::TransportConnected)
            .unwrap();
        assert_eq!(m.phase(), SessionPhase::Connected { muted: true });
    }

    #[test]
    fn test_media_failure() {
        let mut m = SessionStateMachine::new();
        m.apply_transition(SessionTransition::MicrophoneRequested)
            .unwrap();
        m.apply_transition(SessionTransition::MediaFailed(MediaError::PermissionDenied))
            .unwrap();
        assert_eq!(m.phase(), SessionPhase::Failed);
        assert!(matches!(m.last_error(), Some(SessionError::Media(_))));

        // Retry clears the error.
        m.apply_transition(SessionTransition::MicrophoneRequested)
            .unwrap();
        assert!(m.last_error().is_none());
    }

    #[test]
    fn test_transport_lost_while_negotiating_is_negotiation_error() {
        let mut m = SessionStateMachine::new();
        m.apply_transition(SessionTransition::MicrophoneRequested)
            .unwrap();
        m.apply_transition(SessionTransition::ConnectRequested)
            .unwrap();
        m.apply_transition(SessionTransition::TransportLost(TransportLostError {
            state: "failed".into(),
        }))
        .unwrap();
        assert_eq!(m.phase(), SessionPhase::Failed);
        assert!(matches!(
            m.last_error(),
            Some(SessionError::Negotiation(
                NegotiationError::TransportSetupFailed(_)
            ))
        ));
    }

    #[test]
    fn test_connected_transport_lost() {
        let mut m = connected();
        m.apply_transition(SessionTransition::TransportLost(TransportLostError {
            state: "disconnected".into(),
        }))
        .unwrap();
        assert_eq!(m.phase(), SessionPhase::Failed);
        assert!(matches!(
            m.last_error(),
            Some(SessionError::TransportLost(_))
        ));
    }

    #[test]
    fn test_failed_can_be_disconnected() {
        let mut m = connected();
        m.apply_transition(SessionTransition::TransportLost(TransportLostError {
            state: "closed".into(),
        }))
        .unwrap();
        m.apply_transition(SessionTransition::DisconnectRequested)
            .unwrap();
        m.apply_transition(SessionTransition::ResourcesReleased)
            .unwrap();
        assert_eq!(m.phase(), SessionPhase::Disconnected);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut m = SessionStateMachine::new();
        assert!(
            m.apply_transition(SessionTransition::TransportConnected)
                .is_err()
        );
        assert!(
            m.apply_transition(SessionTransition::ConnectRequested)
                .is_err()
        );
        assert!(
            m.apply_transition(SessionTransition::ResourcesReleased)
                .is_err()
        );
        assert_eq!(m.phase(), SessionPhase::Idle);

        let mut m = connected();
        assert!(
            m.apply_transition(SessionTransition::MicrophoneRequested)
                .is_err()
        );
        assert!(
            m.apply_transition(SessionTransition::NegotiationFailed(
                NegotiationError::InvalidAnswer
            ))
            .is_err()
        );
    }
}
