//! Peer-connection seam.
//!
//! Sessions talk to the media stack only through these traits so the
//! negotiation and teardown logic can run against a mock in tests. The
//! production backend is [`crate::webrtc_peer`].

use crate::config::IceServer;
use crate::media::LocalAudioTrack;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use vpcore::signaling::IceCandidateInit;

const REMOTE_FRAME_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// Terminal-for-us states: the media path is gone.
    pub fn is_lost(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

/// Inbound audio from the agent, as a fan-out of encoded frames.
#[derive(Debug, Clone)]
pub struct RemoteAudioStream {
    id: String,
    frames: broadcast::Sender<Bytes>,
}

impl RemoteAudioStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            frames: broadcast::channel(REMOTE_FRAME_CAPACITY).0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn publish(&self, frame: Bytes) {
        let _ = self.frames.send(frame);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.frames.subscribe()
    }
}

/// Everything a peer connection reports back to its session, on one stream.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local candidate was gathered.
    IceCandidate(IceCandidateInit),
    GatheringComplete,
    ConnectionState(PeerConnectionState),
    RemoteTrack(RemoteAudioStream),
    ControlOpen,
    ControlMessage(String),
    ControlClosed,
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: String) -> Result<(), anyhow::Error>;

    async fn close(&self) -> Result<(), anyhow::Error>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Sends frames of `track` while it is enabled.
    async fn add_audio_track(&self, track: Arc<LocalAudioTrack>) -> Result<(), anyhow::Error>;

    /// Negotiates an audio m-line with no local source.
    async fn add_receive_only_audio(&self) -> Result<(), anyhow::Error>;

    /// Creates the ordered control data channel. Its open/message/close
    /// notifications arrive on the peer event stream.
    async fn create_control_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, anyhow::Error>;

    async fn create_offer(&self) -> Result<String, anyhow::Error>;

    async fn set_local_description(&self, sdp: String) -> Result<(), anyhow::Error>;

    async fn set_remote_answer(&self, sdp: String) -> Result<(), anyhow::Error>;

    /// Stops event delivery. The event receiver ends once it is drained.
    fn detach_observers(&self);

    async fn close(&self) -> Result<(), anyhow::Error>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create_peer_connection(
        &self,
        ice_servers: &[IceServer],
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>), anyhow::Error>;
}
