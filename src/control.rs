use crate::observer::SessionObserver;
use crate::peer::DataChannel;
use log::{debug, info, warn};
use std::sync::Arc;
use vpcore::control::{InboundControl, OutboundControl};
use vpcore::signaling::SessionToken;

/// The session's control data channel.
#[derive(Clone)]
pub struct ControlChannel {
    channel: Arc<dyn DataChannel>,
    token: SessionToken,
}

impl ControlChannel {
    pub fn new(channel: Arc<dyn DataChannel>, token: SessionToken) -> Self {
        Self { channel, token }
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub async fn send(&self, message: OutboundControl) -> Result<(), anyhow::Error> {
        if !self.channel.is_open() {
            anyhow::bail!("control channel is not open");
        }
        debug!(target: "Session/Control", "Sending {}", message.kind());
        self.channel.send_text(message.to_text()).await
    }

    pub async fn send_ready(&self) -> Result<(), anyhow::Error> {
        self.send(OutboundControl::ClientReady {
            webrtc_id: self.token.clone(),
        })
        .await
    }

    pub async fn send_disconnect(&self) -> Result<(), anyhow::Error> {
        self.send(OutboundControl::ClientDisconnect {
            webrtc_id: self.token.clone(),
        })
        .await
    }

    pub async fn send_ping(&self) -> Result<(), anyhow::Error> {
        self.send(OutboundControl::Ping {
            webrtc_id: self.token.clone(),
        })
        .await
    }

    pub async fn send_mute(&self, muted: bool) -> Result<(), anyhow::Error> {
        self.send(OutboundControl::ClientMute {
            webrtc_id: self.token.clone(),
            muted,
        })
        .await
    }

    pub async fn close(&self) -> Result<(), anyhow::Error> {
        self.channel.close().await
    }
}

/// Routes one inbound text frame. Malformed frames are logged and dropped.
pub(crate) fn dispatch_inbound(text: &str, observer: &dyn SessionObserver) {
    match InboundControl::parse(text) {
        Ok(InboundControl::Response(payload)) => observer.on_message(&payload),
        Ok(InboundControl::Log(msg)) => info!(target: "Session/Control", "Agent log: {msg}"),
        Ok(InboundControl::Warning(msg)) => warn!(target: "Session/Control", "Agent warning: {msg}"),
        Ok(InboundControl::Error(msg)) => warn!(target: "Session/Control", "Agent error: {msg}"),
        Ok(InboundControl::Unknown { kind, .. }) => {
            debug!(target: "Session/Control", "Ignoring control message of type {kind}")
        }
        Err(e) => warn!(target: "Session/Control", "Dropping control message: {e}"),
    }
}
