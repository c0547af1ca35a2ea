use crate::audio_out::{AudioOutput, OutputSlot};
use crate::auth::{FileTokenStore, MemoryTokenStore, TokenStore};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::media::{LocalAudioStream, MediaAcquirer};
use crate::observer::{LoggingObserver, SessionObserver, SessionStatus};
use crate::peer::PeerConnectionFactory;
use crate::portal::PortalApi;
use crate::session::{Negotiated, Session, SessionParams};
use crate::signaling::SignalingClient;
use crate::status::StatusPublisher;
use crate::webrtc_peer::WebRtcPeerFactory;
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use vpcore::net::HttpClient;
use vpcore::portal::AgentSummary;
use vpcore::state::{SessionPhase, SessionTransition};
use voice_portal_ureq_http_client::UreqHttpClient;

/// Entry point for applications: holds the microphone, the current session
/// and the portal API.
pub struct VoiceClient {
    config: ClientConfig,
    portal: PortalApi,
    acquirer: Arc<dyn MediaAcquirer>,
    factory: Arc<dyn PeerConnectionFactory>,
    output: Arc<dyn AudioOutput>,
    observer: Arc<dyn SessionObserver>,
    status: Arc<StatusPublisher>,
    local: Mutex<Option<Arc<LocalAudioStream>>>,
    session: Mutex<Option<Arc<Session>>>,
    /// Serializes connect/disconnect bookkeeping. Never held across
    /// negotiation.
    lifecycle: Mutex<()>,
}

pub struct VoiceClientBuilder {
    config: ClientConfig,
    http: Option<Arc<dyn HttpClient>>,
    tokens: Option<Arc<dyn TokenStore>>,
    acquirer: Option<Arc<dyn MediaAcquirer>>,
    factory: Option<Arc<dyn PeerConnectionFactory>>,
    output: Option<Arc<dyn AudioOutput>>,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl VoiceClientBuilder {
    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_token_store(mut self, tokens: Arc<dyn TokenStore>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_media_acquirer(mut self, acquirer: Arc<dyn MediaAcquirer>) -> Self {
        self.acquirer = Some(acquirer);
        self
    }

    pub fn with_peer_factory(mut self, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_audio_output(mut self, output: Arc<dyn AudioOutput>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> VoiceClient {
        let http = self
            .http
            .unwrap_or_else(|| Arc::new(UreqHttpClient::new()));
        let tokens = self.tokens.unwrap_or_else(|| match &self.config.token_file {
            Some(path) => Arc::new(FileTokenStore::new(path)),
            None => Arc::new(MemoryTokenStore::new()),
        });
        let acquirer = self.acquirer.unwrap_or_else(default_acquirer);
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(LoggingObserver));

        VoiceClient {
            portal: PortalApi::new(http, &self.config.base_url, tokens),
            acquirer,
            factory: self
                .factory
                .unwrap_or_else(|| Arc::new(WebRtcPeerFactory::new())),
            output: self.output.unwrap_or_else(|| Arc::new(OutputSlot::new())),
            status: Arc::new(StatusPublisher::new(observer.clone())),
            observer,
            config: self.config,
            local: Mutex::new(None),
            session: Mutex::new(None),
            lifecycle: Mutex::new(()),
        }
    }
}

#[cfg(feature = "capture")]
fn default_acquirer() -> Arc<dyn MediaAcquirer> {
    Arc::new(crate::media::CpalMicrophone::new())
}

#[cfg(not(feature = "capture"))]
fn default_acquirer() -> Arc<dyn MediaAcquirer> {
    Arc::new(crate::media::SilentMicrophone::new())
}

impl VoiceClient {
    pub fn builder(config: ClientConfig) -> VoiceClientBuilder {
        VoiceClientBuilder {
            config,
            http: None,
            tokens: None,
            acquirer: None,
            factory: None,
            output: None,
            observer: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn portal(&self) -> &PortalApi {
        &self.portal
    }

    pub fn status(&self) -> SessionStatus {
        self.status.snapshot()
    }

    pub fn phase(&self) -> SessionPhase {
        self.status.phase()
    }

    pub async fn current_session(&self) -> Option<Arc<Session>> {
        self.session.lock().await.clone()
    }

    /// Returns the held microphone stream, acquiring it first if needed.
    pub async fn acquire_microphone(&self) -> Result<Arc<LocalAudioStream>, ClientError> {
        let _guard = self.lifecycle.lock().await;
        if let Some(stream) = self.held_microphone().await {
            return Ok(stream);
        }
        let epoch = self.status.epoch();
        let stream = self.ensure_microphone(epoch).await?;
        self.status
            .apply(epoch, SessionTransition::MediaAcquired)?;
        Ok(stream)
    }

    async fn held_microphone(&self) -> Option<Arc<LocalAudioStream>> {
        self.local
            .lock()
            .await
            .as_ref()
            .filter(|s| !s.is_released())
            .cloned()
    }

    /// Moves to `AcquiringMedia` and makes sure a live stream is held.
    async fn ensure_microphone(&self, epoch: u64) -> Result<Arc<LocalAudioStream>, ClientError> {
        self.status
            .apply(epoch, SessionTransition::MicrophoneRequested)?;

        let mut local = self.local.lock().await;
        if let Some(stream) = local.as_ref().filter(|s| !s.is_released()) {
            return Ok(stream.clone());
        }

        match self.acquirer.acquire(&self.config.audio).await {
            Ok(stream) => {
                if self.status.is_muted() {
                    stream.set_muted(true);
                }
                info!(target: "Client", "Microphone acquired ({} tracks)", stream.audio_tracks().len());
                *local = Some(stream.clone());
                Ok(stream)
            }
            Err(e) => {
                warn!(target: "Client", "Microphone acquisition failed: {e}");
                let _ = self
                    .status
                    .apply(epoch, SessionTransition::MediaFailed(e.clone()));
                Err(e.into())
            }
        }
    }

    /// Connects to `agent`, replacing any existing session.
    ///
    /// The access grant is checked first; a missing or rejected credential
    /// fails here without touching the microphone or the network path.
    pub async fn connect(&self, agent: &AgentSummary) -> Result<Arc<Session>, ClientError> {
        let session = {
            let _guard = self.lifecycle.lock().await;

            if let Some(previous) = self.session.lock().await.take() {
                info!(target: "Client", "Replacing session {}", previous.token());
                previous.teardown().await;
            }

            let grant = self.portal.request_access(&agent.id).await?;
            if let Some(remaining) = grant.remaining_uses {
                info!(target: "Client", "Access to {} granted, {remaining} uses left", agent.id);
            }
            let bearer = self.portal.token().await?;

            let epoch = self.status.begin_epoch();
            let local = self.ensure_microphone(epoch).await?;
            self.status
                .apply(epoch, SessionTransition::ConnectRequested)?;

            let signaling = SignalingClient::new(
                self.portal.http_client(),
                &self.config.base_url,
                &agent.signaling_path(),
                bearer,
            );
            let session = Session::create(SessionParams {
                agent_id: agent.id.clone(),
                epoch,
                signaling,
                local,
                factory: self.factory.clone(),
                output: self.output.clone(),
                observer: self.observer.clone(),
                status: self.status.clone(),
                config: self.config.clone(),
            })
            .await
            .map_err(|e| ClientError::Session(e.into()))?;

            *self.session.lock().await = Some(session.clone());
            session
        };

        match session.negotiate().await {
            Ok(Negotiated::Answered) => {}
            Ok(Negotiated::Abandoned) => {
                info!(target: "Client", "Connect to {} abandoned by disconnect", agent.id);
            }
            Err(e) => return Err(ClientError::Session(e)),
        }
        Ok(session)
    }

    /// Toggles the local microphone. Never changes the connection phase.
    pub async fn set_muted(&self, muted: bool) -> Result<(), ClientError> {
        if let Some(local) = self.local.lock().await.as_ref() {
            local.set_muted(muted);
        }
        self.status
            .apply_current(SessionTransition::MuteChanged { muted })?;

        if self.config.announce_mute
            && let Some(session) = self.current_session().await
        {
            session.announce_mute(muted).await;
        }
        Ok(())
    }

    /// Ends the current session. The microphone stays acquired.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        let session = self.session.lock().await.take();
        match session {
            Some(session) => session.teardown().await,
            None => {
                if let Ok(true) = self
                    .status
                    .apply_current(SessionTransition::DisconnectRequested)
                {
                    let _ = self
                        .status
                        .apply_current(SessionTransition::ResourcesReleased);
                }
            }
        }
    }

    /// Stops the microphone tracks. Only called explicitly or on shutdown.
    pub async fn release_device(&self) {
        if let Some(stream) = self.local.lock().await.take() {
            stream.release();
        }
    }

    /// Disconnects and releases the microphone.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.release_device().await;
    }
}

impl std::fmt::Debug for VoiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceClient")
            .field("config", &self.config)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryTokenStore;
    use crate::peer::{PeerConnectionState, PeerEvent};
    use crate::test_utils::{MockMicrophone, MockPeerFactory, RecordingObserver, ScriptedHttpClient};
    use serde_json::json;
    use std::time::Duration;
    use vpcore::error::{AuthorizationError, MediaError, NegotiationError, SessionError};

    struct Fixture {
        client: VoiceClient,
        http: Arc<ScriptedHttpClient>,
        tokens: Arc<MemoryTokenStore>,
        microphone: Arc<MockMicrophone>,
        factory: Arc<MockPeerFactory>,
        observer: Arc<RecordingObserver>,
    }

    fn fixture_with(microphone: MockMicrophone) -> Fixture {
        let http = Arc::new(ScriptedHttpClient::new());
        http.respond_json(
            "/webrtc/offer",
            200,
            &json!({"sdp": "v=0 answer", "type": "answer"}),
        );
        let tokens = Arc::new(MemoryTokenStore::new());
        let microphone = Arc::new(microphone);
        let factory = Arc::new(MockPeerFactory::new());
        let observer = Arc::new(RecordingObserver::new());
        let config = ClientConfig {
            base_url: "http://portal.local".to_string(),
            heartbeat_interval: None,
            announce_mute: true,
            ..ClientConfig::default()
        };
        let client = VoiceClient::builder(config)
            .with_http_client(http.clone())
            .with_token_store(tokens.clone())
            .with_media_acquirer(microphone.clone())
            .with_peer_factory(factory.clone())
            .with_observer(observer.clone())
            .build();
        Fixture {
            client,
            http,
            tokens,
            microphone,
            factory,
            observer,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockMicrophone::new())
    }

    fn agent() -> AgentSummary {
        serde_json::from_value(json!({"id": "hospital", "name": "Hospital"})).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_without_credentials_makes_no_request() {
        let f = fixture();

        let err = f.client.connect(&agent()).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Session(SessionError::Authorization(
                AuthorizationError::NotAuthenticated
            ))
        ));
        assert!(f.http.requests().is_empty());
        assert_eq!(f.microphone.acquired(), 0);
        assert!(f.factory.peers().is_empty());
        assert_eq!(f.client.phase(), SessionPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_flow() {
        let f = fixture();
        f.tokens.store("jwt").await.unwrap();

        let session = f.client.connect(&agent()).await.unwrap();
        assert_eq!(session.agent_id(), "hospital");
        let requests = f.http.requests();
        assert!(requests[0].url.ends_with("/api/agents/access"));
        assert!(requests[1].url.ends_with("/webrtc/offer"));
        assert_eq!(
            requests[1].headers.get("Authorization").map(String::as_str),
            Some("Bearer jwt")
        );

        f.factory
            .last()
            .emit(PeerEvent::ConnectionState(PeerConnectionState::Connected));
        settle().await;

        assert_eq!(
            f.observer.phases(),
            vec![
                SessionPhase::AcquiringMedia,
                SessionPhase::Negotiating,
                SessionPhase::Connected { muted: false },
            ]
        );
        assert!(f.client.status().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_rejection_surfaces_support_message() {
        let f = fixture();
        f.tokens.store("jwt").await.unwrap();
        f.http.respond(
            "/agents/access",
            vpcore::net::HttpResponse::json(403, &json!({"detail": "OTP exhausted"})),
        );

        let err = f.client.connect(&agent()).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Session(SessionError::Authorization(AuthorizationError::Rejected { .. }))
        ));
        assert!(err.user_message().contains("contact support"));
        assert!(f.factory.peers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_failure_is_reported() {
        let f = fixture_with(MockMicrophone::failing(MediaError::PermissionDenied));
        f.tokens.store("jwt").await.unwrap();

        let err = f.client.connect(&agent()).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Session(SessionError::Media(MediaError::PermissionDenied))
        ));
        assert_eq!(f.client.phase(), SessionPhase::Failed);
        assert!(f.factory.peers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_keeps_phase_and_tracks() {
        let f = fixture();
        f.tokens.store("jwt").await.unwrap();
        f.client.connect(&agent()).await.unwrap();
        let peer = f.factory.last();
        peer.open_control();
        peer.emit(PeerEvent::ConnectionState(PeerConnectionState::Connected));
        settle().await;

        f.client.set_muted(true).await.unwrap();
        assert_eq!(f.client.phase(), SessionPhase::Connected { muted: true });
        assert!(f.client.phase().is_connected());
        let stream = f.client.acquire_microphone().await.unwrap();
        assert!(stream.is_muted());
        assert!(!stream.audio_tracks()[0].is_enabled());
        assert!(!stream.audio_tracks()[0].is_stopped());
        assert_eq!(
            peer.control().sent_types(),
            vec!["client-ready", "client-mute"]
        );

        f.client.set_muted(false).await.unwrap();
        assert_eq!(f.client.phase(), SessionPhase::Connected { muted: false });
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_keeps_microphone_for_reconnect() {
        let f = fixture();
        f.tokens.store("jwt").await.unwrap();
        f.client.connect(&agent()).await.unwrap();
        f.client.disconnect().await;
        f.client.disconnect().await;

        assert_eq!(f.client.phase(), SessionPhase::Disconnected);
        assert!(f.client.current_session().await.is_none());
        let stream = f.client.acquire_microphone().await.unwrap();
        assert!(!stream.is_released());
        assert!(stream.audio_tracks()[0].is_enabled());

        f.client.connect(&agent()).await.unwrap();
        assert_eq!(f.microphone.acquired(), 1);
        assert_eq!(f.factory.peers().len(), 2);

        f.client.shutdown().await;
        assert!(stream.is_released());
        assert!(stream.audio_tracks()[0].is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_replaces_previous_session() {
        let f = fixture();
        f.tokens.store("jwt").await.unwrap();
        let first = f.client.connect(&agent()).await.unwrap();
        let second = f.client.connect(&agent()).await.unwrap();

        assert!(!first.is_live());
        assert!(second.is_live());
        assert_eq!(f.factory.peers()[0].close_count(), 1);
        assert_eq!(f.factory.peers()[1].close_count(), 0);
        assert_eq!(f.client.phase(), SessionPhase::Negotiating);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_negotiating() {
        let f = fixture();
        f.tokens.store("jwt").await.unwrap();
        let gate = f.http.respond_gated(
            "/webrtc/offer",
            vpcore::net::HttpResponse::json(200, &json!({"sdp": "v=0 late"})),
        );
        let client = Arc::new(f.client);

        let connecting = tokio::spawn({
            let client = client.clone();
            async move { client.connect(&agent()).await }
        });
        settle().await;
        client.disconnect().await;
        gate.notify_one();

        let session = connecting.await.unwrap().unwrap();
        assert!(!session.is_live());
        assert_eq!(client.phase(), SessionPhase::Disconnected);
        assert!(f.factory.last().remote_description().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reports_timeout_while_offer_pending() {
        let f = fixture();
        f.tokens.store("jwt").await.unwrap();
        let _gate = f.http.respond_gated(
            "/webrtc/offer",
            vpcore::net::HttpResponse::json(200, &json!({"sdp": "v=0 late"})),
        );
        let connect_timeout = ClientConfig::default().connect_timeout;
        let client = Arc::new(f.client);

        let connecting = tokio::spawn({
            let client = client.clone();
            async move { client.connect(&agent()).await }
        });
        tokio::time::sleep(connect_timeout + Duration::from_secs(1)).await;

        assert!(connecting.is_finished());
        let err = connecting.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ClientError::Session(SessionError::Negotiation(NegotiationError::TimedOut(t)))
                if t == connect_timeout
        ));
        assert_eq!(client.phase(), SessionPhase::Failed);
        assert_eq!(f.observer.count(SessionPhase::Failed), 1);
        assert_eq!(f.factory.last().close_count(), 1);
    }
}
