//! Runtime-agnostic core of the voice portal client.
//!
//! Everything here is sans-IO: wire types, the SDP transform, the candidate
//! queue and the session state machine take their inputs as plain values and
//! return decisions. The root crate drives them from a tokio runtime.

pub mod candidates;
pub mod control;
pub mod error;
pub mod media;
pub mod net;
pub mod portal;
pub mod sdp;
pub mod signaling;
pub mod state;

pub use candidates::{CandidateBatchPolicy, CandidateFlush, CandidateKind, CandidateQueue};
pub use error::{AuthorizationError, MediaError, NegotiationError, SessionError, TransportLostError};
pub use signaling::{IceCandidateInit, SessionToken};
pub use state::{InvalidTransition, SessionPhase, SessionStateMachine, SessionTransition};
