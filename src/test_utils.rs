use crate::config::IceServer;
use crate::media::{LocalAudioStream, LocalAudioTrack, MediaAcquirer};
use crate::observer::{SessionObserver, SessionStatus};
use crate::peer::{DataChannel, PeerConnection, PeerConnectionFactory, PeerEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc};
use vpcore::error::MediaError;
use vpcore::media::AudioConstraints;
use vpcore::net::{HttpClient, HttpRequest, HttpResponse};
use vpcore::state::SessionPhase;

pub const MOCK_OFFER_SDP: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=mid:0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=0\r\n";

struct Rule {
    pattern: String,
    response: HttpResponse,
    gate: Option<Arc<Notify>>,
}

/// HTTP client answering from a list of url-substring rules. The most
/// recently added matching rule wins; unmatched requests get `200 {}`.
/// Every request is recorded.
#[derive(Default)]
pub struct ScriptedHttpClient {
    rules: Mutex<Vec<Rule>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, response: HttpResponse) {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            response,
            gate: None,
        });
    }

    pub fn respond_json(&self, pattern: &str, status: u16, body: &serde_json::Value) {
        self.respond(pattern, HttpResponse::json(status, body));
    }

    /// Like [`respond`](Self::respond), but the response is held until the
    /// returned gate is notified.
    pub fn respond_gated(&self, pattern: &str, response: HttpResponse) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            response,
            gate: Some(gate.clone()),
        });
        gate
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, pattern: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.contains(pattern))
            .collect()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        let matched = {
            let rules = self.rules.lock().unwrap();
            rules
                .iter()
                .rev()
                .find(|r| request.url.contains(&r.pattern))
                .map(|r| (r.response.clone(), r.gate.clone()))
        };
        self.requests.lock().unwrap().push(request);

        match matched {
            Some((response, gate)) => {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                Ok(response)
            }
            None => Ok(HttpResponse::json(200, &serde_json::json!({}))),
        }
    }
}

/// Records statuses and agent messages.
pub struct RecordingObserver {
    statuses: Mutex<Vec<SessionStatus>>,
    messages: Mutex<Vec<serde_json::Value>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self {
            statuses: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn statuses(&self) -> Vec<SessionStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn phases(&self) -> Vec<SessionPhase> {
        self.statuses().into_iter().map(|s| s.phase).collect()
    }

    pub fn count(&self, phase: SessionPhase) -> usize {
        self.phases().into_iter().filter(|p| *p == phase).count()
    }

    pub fn messages(&self) -> Vec<serde_json::Value> {
        self.messages.lock().unwrap().clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_status_changed(&self, status: &SessionStatus) {
        self.statuses.lock().unwrap().push(status.clone());
    }

    fn on_message(&self, message: &serde_json::Value) {
        self.messages.lock().unwrap().push(message.clone());
    }
}

pub struct MockDataChannel {
    label: String,
    open: AtomicBool,
    closed: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl MockDataChannel {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.is_closed()
    }

    async fn send_text(&self, text: String) -> Result<(), anyhow::Error> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        self.closed.store(true, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Scriptable peer connection. Events are injected with [`emit`](Self::emit).
pub struct MockPeerConnection {
    events: Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
    control: Arc<MockDataChannel>,
    calls: Mutex<Vec<String>>,
    local_description: Mutex<Option<String>>,
    remote_description: Mutex<Option<String>>,
    close_count: AtomicUsize,
    fail_on: Option<&'static str>,
}

impl MockPeerConnection {
    fn record(&self, call: &str) -> Result<(), anyhow::Error> {
        self.calls.lock().unwrap().push(call.to_string());
        if self.fail_on == Some(call) {
            anyhow::bail!("{call} failed");
        }
        Ok(())
    }

    /// Delivers an event as the backend would. Returns false once observers
    /// are detached.
    pub fn emit(&self, event: PeerEvent) -> bool {
        match self.events.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Opens the control channel and reports it.
    pub fn open_control(&self) {
        self.control.set_open(true);
        self.emit(PeerEvent::ControlOpen);
    }

    pub fn control(&self) -> Arc<MockDataChannel> {
        self.control.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn observers_detached(&self) -> bool {
        self.events.lock().unwrap().is_none()
    }

    pub fn local_description(&self) -> Option<String> {
        self.local_description.lock().unwrap().clone()
    }

    pub fn remote_description(&self) -> Option<String> {
        self.remote_description.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn add_audio_track(&self, _track: Arc<LocalAudioTrack>) -> Result<(), anyhow::Error> {
        self.record("add_audio_track")
    }

    async fn add_receive_only_audio(&self) -> Result<(), anyhow::Error> {
        self.record("add_receive_only_audio")
    }

    async fn create_control_channel(
        &self,
        _label: &str,
    ) -> Result<Arc<dyn DataChannel>, anyhow::Error> {
        self.record("create_control_channel")?;
        Ok(self.control.clone())
    }

    async fn create_offer(&self) -> Result<String, anyhow::Error> {
        self.record("create_offer")?;
        Ok(MOCK_OFFER_SDP.to_string())
    }

    async fn set_local_description(&self, sdp: String) -> Result<(), anyhow::Error> {
        self.record("set_local_description")?;
        *self.local_description.lock().unwrap() = Some(sdp);
        Ok(())
    }

    async fn set_remote_answer(&self, sdp: String) -> Result<(), anyhow::Error> {
        self.record("set_remote_answer")?;
        *self.remote_description.lock().unwrap() = Some(sdp);
        Ok(())
    }

    fn detach_observers(&self) {
        self.events.lock().unwrap().take();
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        self.calls.lock().unwrap().push("close".to_string());
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPeerFactory {
    peers: Mutex<Vec<Arc<MockPeerConnection>>>,
    fail_on: Option<&'static str>,
}

impl MockPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peers created by this factory fail the named operation.
    pub fn failing_on(call: &'static str) -> Self {
        Self {
            peers: Mutex::new(Vec::new()),
            fail_on: Some(call),
        }
    }

    pub fn peers(&self) -> Vec<Arc<MockPeerConnection>> {
        self.peers.lock().unwrap().clone()
    }

    pub fn last(&self) -> Arc<MockPeerConnection> {
        self.peers()
            .last()
            .cloned()
            .expect("no peer connection created")
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerFactory {
    async fn create_peer_connection(
        &self,
        _ice_servers: &[IceServer],
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>), anyhow::Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Arc::new(MockPeerConnection {
            events: Mutex::new(Some(tx)),
            control: Arc::new(MockDataChannel::new("control")),
            calls: Mutex::new(Vec::new()),
            local_description: Mutex::new(None),
            remote_description: Mutex::new(None),
            close_count: AtomicUsize::new(0),
            fail_on: self.fail_on,
        });
        self.peers.lock().unwrap().push(peer.clone());
        Ok((peer, rx))
    }
}

/// Microphone that hands out a single track, or a fixed error.
pub struct MockMicrophone {
    error: Option<MediaError>,
    acquired: AtomicUsize,
}

impl MockMicrophone {
    pub fn new() -> Self {
        Self {
            error: None,
            acquired: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: MediaError) -> Self {
        Self {
            error: Some(error),
            acquired: AtomicUsize::new(0),
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaAcquirer for MockMicrophone {
    async fn acquire(
        &self,
        _constraints: &AudioConstraints,
    ) -> Result<Arc<LocalAudioStream>, MediaError> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(LocalAudioStream::new(vec![LocalAudioTrack::new("mock-mic")]))
    }
}
