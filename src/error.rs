use thiserror::Error;
use vpcore::error::{AuthorizationError, MediaError, SessionError};
use vpcore::state::InvalidTransition;

/// Errors returned by [`crate::portal::PortalApi`].
#[derive(Debug, Error)]
pub enum PortalError {
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error("portal request failed ({status}): {detail}")]
    Http { status: u16, detail: String },

    #[error("portal transport error: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("failed to decode portal response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("token storage error: {0}")]
    TokenStore(#[from] std::io::Error),
}

impl PortalError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Authorization(AuthorizationError::Rejected { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

/// Errors returned by [`crate::client::VoiceClient`] operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Portal(PortalError),

    #[error("operation not allowed now: {0}")]
    InvalidState(#[from] InvalidTransition),
}

impl From<MediaError> for ClientError {
    fn from(e: MediaError) -> Self {
        Self::Session(e.into())
    }
}

impl From<PortalError> for ClientError {
    fn from(e: PortalError) -> Self {
        match e {
            PortalError::Authorization(auth) => Self::Session(auth.into()),
            other => Self::Portal(other),
        }
    }
}

impl ClientError {
    /// Text suitable for showing to the end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Session(e) => e.user_message().to_string(),
            Self::Portal(e) => e.to_string(),
            Self::InvalidState(_) => "Please wait for the current call to finish.".to_string(),
        }
    }
}
