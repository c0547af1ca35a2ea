//! webrtc-rs backed [`PeerConnection`].

use crate::config::IceServer;
use crate::media::LocalAudioTrack;
use crate::peer::{
    DataChannel, PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent,
    RemoteAudioStream,
};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, watch};
use vpcore::media::FRAME_DURATION;
use vpcore::signaling::IceCandidateInit;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// Opus RTP clock rate and channel count are fixed by RFC 7587 regardless of
/// the capture format.
const OPUS_CLOCK_RATE: u32 = 48_000;
const OPUS_RTP_CHANNELS: u16 = 2;

/// Shared slot the webrtc callbacks emit through. Emptying it detaches every
/// callback at once.
type EventSlot = Arc<Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>>;

fn emit(slot: &EventSlot, event: PeerEvent) {
    if let Ok(guard) = slot.lock()
        && let Some(tx) = guard.as_ref()
    {
        let _ = tx.send(event);
    }
}

fn map_state(state: RTCPeerConnectionState) -> PeerConnectionState {
    match state {
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        _ => PeerConnectionState::New,
    }
}

#[derive(Debug, Clone, Default)]
pub struct WebRtcPeerFactory;

impl WebRtcPeerFactory {
    pub fn new() -> Self {
        Self
    }

    fn create_api() -> Result<webrtc::api::API, webrtc::Error> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let mut setting_engine = SettingEngine::default();
        setting_engine.set_ice_multicast_dns_mode(webrtc::ice::mdns::MulticastDnsMode::Disabled);

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build())
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create_peer_connection(
        &self,
        ice_servers: &[IceServer],
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>), anyhow::Error> {
        let api = Self::create_api()?;
        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|s| RTCIceServer {
                    urls: s.urls.clone(),
                    username: s.username.clone().unwrap_or_default(),
                    credential: s.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await?);

        let (tx, rx) = mpsc::unbounded_channel();
        let events: EventSlot = Arc::new(Mutex::new(Some(tx)));
        let (closed_tx, _) = watch::channel(false);

        let slot = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            match candidate {
                Some(c) => match c.to_json() {
                    Ok(init) => emit(
                        &slot,
                        PeerEvent::IceCandidate(IceCandidateInit {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }),
                    ),
                    Err(e) => warn!(target: "Session/Candidates", "Failed to serialize candidate: {e}"),
                },
                None => emit(&slot, PeerEvent::GatheringComplete),
            }
            Box::pin(async {})
        }));

        let slot = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!(target: "Session/Negotiate", "Peer connection state: {state}");
            emit(&slot, PeerEvent::ConnectionState(map_state(state)));
            Box::pin(async {})
        }));

        let slot = events.clone();
        let closed_rx = closed_tx.subscribe();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                if track.kind() == RTPCodecType::Audio {
                    let remote = RemoteAudioStream::new(track.stream_id());
                    info!(target: "Session/Negotiate", "Remote audio track {}", remote.id());
                    emit(&slot, PeerEvent::RemoteTrack(remote.clone()));

                    let mut closed = closed_rx.clone();
                    tokio::spawn(async move {
                        loop {
                            tokio::select! {
                                read = track.read_rtp() => match read {
                                    Ok((packet, _)) => remote.publish(packet.payload.clone()),
                                    Err(_) => break,
                                },
                                _ = closed.changed() => break,
                            }
                        }
                    });
                }
                Box::pin(async {})
            },
        ));

        let peer = WebRtcPeer {
            pc,
            events,
            closed: closed_tx,
        };
        Ok((Arc::new(peer), rx))
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    events: EventSlot,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_audio_track(&self, track: Arc<LocalAudioTrack>) -> Result<(), anyhow::Error> {
        let rtc_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: OPUS_RTP_CHANNELS,
                ..Default::default()
            },
            track.id().to_string(),
            "voice-portal".to_string(),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&rtc_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP has to be drained for interceptors to work.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let mut frames = track.subscribe();
        let mut closed = self.closed.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = frames.recv() => match frame {
                        Ok(data) => {
                            if !track.is_enabled() {
                                continue;
                            }
                            let sample = Sample {
                                data,
                                duration: FRAME_DURATION,
                                ..Default::default()
                            };
                            if let Err(e) = rtc_track.write_sample(&sample).await {
                                debug!(target: "Media", "Dropping local frame: {e}");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(target: "Media", "Local frame forwarder lagged by {n}");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = closed.changed() => break,
                }
            }
        });
        Ok(())
    }

    async fn add_receive_only_audio(&self) -> Result<(), anyhow::Error> {
        self.pc
            .add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;
        Ok(())
    }

    async fn create_control_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, anyhow::Error> {
        let dc = self
            .pc
            .create_data_channel(
                label,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await?;

        let slot = self.events.clone();
        dc.on_open(Box::new(move || {
            emit(&slot, PeerEvent::ControlOpen);
            Box::pin(async {})
        }));

        let slot = self.events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            if msg.is_string {
                let text = String::from_utf8_lossy(&msg.data).into_owned();
                emit(&slot, PeerEvent::ControlMessage(text));
            }
            Box::pin(async {})
        }));

        let slot = self.events.clone();
        dc.on_close(Box::new(move || {
            emit(&slot, PeerEvent::ControlClosed);
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcDataChannel {
            label: label.to_string(),
            dc,
        }))
    }

    async fn create_offer(&self) -> Result<String, anyhow::Error> {
        let offer = self.pc.create_offer(None).await?;
        Ok(offer.sdp)
    }

    async fn set_local_description(&self, sdp: String) -> Result<(), anyhow::Error> {
        let desc = RTCSessionDescription::offer(sdp)?;
        self.pc.set_local_description(desc).await?;
        Ok(())
    }

    async fn set_remote_answer(&self, sdp: String) -> Result<(), anyhow::Error> {
        let desc = RTCSessionDescription::answer(sdp)?;
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    fn detach_observers(&self) {
        match self.events.lock() {
            Ok(mut slot) => {
                slot.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        self.closed.send_replace(true);
        self.pc.close().await?;
        Ok(())
    }
}

struct WebRtcDataChannel {
    label: String,
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: String) -> Result<(), anyhow::Error> {
        self.dc.send_text(text).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        self.dc.close().await?;
        Ok(())
    }
}
