//! Voice-agent portal client.
//!
//! [`VoiceClient`] drives a single real-time audio session with a remote
//! voice agent: microphone acquisition, offer/answer negotiation against the
//! agent's signaling endpoint, candidate exchange, the control data channel
//! and teardown. [`PortalApi`] covers the REST side of the portal.

pub use vpcore::{candidates, sdp, state};

pub mod audio_out;
pub mod auth;
pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod media;
pub mod observer;
pub mod peer;
pub mod portal;
pub mod session;
pub mod signaling;
pub mod status;
pub mod webrtc_peer;

#[cfg(test)]
pub mod test_utils;

pub use client::{VoiceClient, VoiceClientBuilder};
pub use config::ClientConfig;
pub use error::{ClientError, PortalError};
pub use observer::{SessionEventBus, SessionObserver, SessionStatus};
pub use portal::PortalApi;
pub use session::{Negotiated, Session};
pub use vpcore::error::{
    AuthorizationError, MediaError, NegotiationError, SessionError, TransportLostError,
};
pub use vpcore::state::SessionPhase;
