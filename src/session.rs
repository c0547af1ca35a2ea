//! One conversation attempt with a voice agent.
//!
//! A [`Session`] owns its peer connection, control channel and candidate
//! queue. It borrows the local microphone stream and never stops its tracks.
//! All of it is released exactly once, either by [`Session::teardown`] or by
//! the failure path.

use crate::audio_out::AudioOutput;
use crate::config::ClientConfig;
use crate::control::{ControlChannel, dispatch_inbound};
use crate::media::LocalAudioStream;
use crate::observer::SessionObserver;
use crate::peer::{PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent};
use crate::signaling::SignalingClient;
use crate::status::StatusPublisher;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::Instant;
use vpcore::candidates::{CandidateFlush, CandidateQueue};
use vpcore::error::{NegotiationError, SessionError, TransportLostError};
use vpcore::sdp::{OpusParams, normalize_opus};
use vpcore::signaling::SessionToken;
use vpcore::state::SessionTransition;

/// Everything a session needs from its client.
pub struct SessionParams {
    pub agent_id: String,
    pub epoch: u64,
    pub signaling: SignalingClient,
    pub local: Arc<LocalAudioStream>,
    pub factory: Arc<dyn PeerConnectionFactory>,
    pub output: Arc<dyn AudioOutput>,
    pub observer: Arc<dyn SessionObserver>,
    pub status: Arc<StatusPublisher>,
    pub config: ClientConfig,
}

/// Outcome of [`Session::negotiate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiated {
    /// The answer was applied; the transport is connecting.
    Answered,
    /// A disconnect ended the session while negotiating. No answer was
    /// applied. A session that failed instead reports the failure as `Err`.
    Abandoned,
}

pub struct Session {
    token: SessionToken,
    agent_id: String,
    epoch: u64,
    live: AtomicBool,
    released: AtomicBool,
    farewell: AtomicBool,
    connected: AtomicBool,
    failure: Mutex<Option<SessionError>>,
    pc: Arc<dyn PeerConnection>,
    control: Mutex<Option<ControlChannel>>,
    queue: Mutex<CandidateQueue>,
    signaling: SignalingClient,
    status: Arc<StatusPublisher>,
    observer: Arc<dyn SessionObserver>,
    output: Arc<dyn AudioOutput>,
    opus: OpusParams,
    shutdown: watch::Sender<bool>,
    wake: Notify,
}

fn setup_failed(e: anyhow::Error) -> NegotiationError {
    NegotiationError::TransportSetupFailed(e.to_string())
}

/// Candidate queue time. Derived from tokio's clock so paused-time tests
/// drive the batching delay.
fn queue_now() -> std::time::Instant {
    Instant::now().into_std()
}

impl Session {
    /// Builds the peer connection, attaches the local audio and the control
    /// channel, and starts the event loop. On failure nothing survives and
    /// the phase moves to `Failed`.
    pub async fn create(params: SessionParams) -> Result<Arc<Session>, NegotiationError> {
        let SessionParams {
            agent_id,
            epoch,
            signaling,
            local,
            factory,
            output,
            observer,
            status,
            config,
        } = params;

        let fail = |e: NegotiationError| {
            let _ = status.apply(epoch, SessionTransition::NegotiationFailed(e.clone()));
            e
        };

        let (pc, events) = factory
            .create_peer_connection(&config.ice_servers)
            .await
            .map_err(|e| fail(setup_failed(e)))?;

        let attached = async {
            let tracks = local.audio_tracks();
            if tracks.is_empty() {
                pc.add_receive_only_audio().await?;
            } else {
                for track in tracks {
                    pc.add_audio_track(track.clone()).await?;
                }
            }
            let channel = pc
                .create_control_channel(&config.control_channel_label)
                .await?;
            Ok::<_, anyhow::Error>(channel)
        }
        .await;

        let channel = match attached {
            Ok(channel) => channel,
            Err(e) => {
                pc.detach_observers();
                if let Err(close_err) = pc.close().await {
                    debug!(target: "Session/Negotiate", "Closing half-built peer connection: {close_err}");
                }
                return Err(fail(setup_failed(e)));
            }
        };

        let token = SessionToken::generate();
        info!(target: "Session/Negotiate", "Created session {token} for agent {agent_id}");

        let session = Arc::new(Session {
            control: Mutex::new(Some(ControlChannel::new(channel, token.clone()))),
            token,
            agent_id,
            epoch,
            live: AtomicBool::new(true),
            released: AtomicBool::new(false),
            farewell: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            failure: Mutex::new(None),
            pc,
            queue: Mutex::new(CandidateQueue::new(config.candidate_batch.clone())),
            signaling,
            status,
            observer,
            output,
            opus: config.opus.clone(),
            shutdown: watch::channel(false).0,
            wake: Notify::new(),
        });

        tokio::spawn(session.clone().run_events(
            events,
            config.connect_timeout,
            config.heartbeat_interval,
        ));

        Ok(session)
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// False once teardown or the failure path has started.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    fn queue(&self) -> MutexGuard<'_, CandidateQueue> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn control(&self) -> Option<ControlChannel> {
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The error that failed this session, if it failed.
    pub fn failure(&self) -> Option<SessionError> {
        self.failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Runs the offer/answer exchange. Returns as soon as the session ends,
    /// even if the offer is still in flight.
    pub async fn negotiate(self: &Arc<Self>) -> Result<Negotiated, SessionError> {
        match self.exchange().await {
            Ok(Negotiated::Answered) => Ok(Negotiated::Answered),
            Err(e) if self.is_live() => {
                warn!(target: "Session/Negotiate", "Negotiation failed for {}: {e}", self.token);
                self.fail(SessionTransition::NegotiationFailed(e.clone()))
                    .await;
                Err(e.into())
            }
            outcome => match self.failure() {
                Some(err) => {
                    debug!(target: "Session/Negotiate", "Negotiation for {} ended by failure: {err}", self.token);
                    Err(err)
                }
                None => {
                    if outcome.is_err() {
                        debug!(target: "Session/Negotiate", "Negotiation error after teardown ignored");
                    }
                    Ok(Negotiated::Abandoned)
                }
            },
        }
    }

    async fn exchange(self: &Arc<Self>) -> Result<Negotiated, NegotiationError> {
        let offer = self.pc.create_offer().await.map_err(setup_failed)?;
        if !self.is_live() {
            return Ok(Negotiated::Abandoned);
        }

        let offer = normalize_opus(&offer, &self.opus);
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(setup_failed)?;
        if !self.is_live() {
            return Ok(Negotiated::Abandoned);
        }

        let mut shutdown = self.shutdown.subscribe();
        let answer = tokio::select! {
            answer = self.signaling.send_offer(&offer, &self.token) => answer?,
            _ = async {
                let _ = shutdown.wait_for(|stopped| *stopped).await;
            } => {
                debug!(target: "Session/Negotiate", "Offer for {} dropped by shutdown", self.token);
                return Ok(Negotiated::Abandoned);
            }
        };
        if !self.is_live() {
            debug!(target: "Session/Negotiate", "Answer for {} arrived after teardown", self.token);
            return Ok(Negotiated::Abandoned);
        }

        self.pc.set_remote_answer(answer).await.map_err(setup_failed)?;
        if !self.is_live() {
            return Ok(Negotiated::Abandoned);
        }

        let flush = self.queue().mark_remote_applied(queue_now());
        if let Some(flush) = flush {
            self.send_candidates(flush);
        }
        self.wake.notify_one();
        info!(target: "Session/Negotiate", "Remote answer applied for {}", self.token);
        Ok(Negotiated::Answered)
    }

    /// Tells the agent about a local mute toggle, if the channel is open.
    pub async fn announce_mute(&self, muted: bool) {
        if let Some(control) = self.control().filter(|c| c.is_open())
            && let Err(e) = control.send_mute(muted).await
        {
            debug!(target: "Session/Control", "Mute announcement failed: {e}");
        }
    }

    /// Ends the session. Safe from any phase, any number of times and
    /// concurrently with negotiation.
    pub async fn teardown(&self) {
        self.live.store(false, Ordering::Release);
        let disconnecting = self
            .status
            .apply(self.epoch, SessionTransition::DisconnectRequested)
            .unwrap_or(false);

        if !self.released.load(Ordering::Acquire)
            && !self.farewell.swap(true, Ordering::AcqRel)
            && let Some(control) = self.control().filter(|c| c.is_open())
            && let Err(e) = control.send_disconnect().await
        {
            debug!(target: "Session/Control", "client-disconnect not delivered: {e}");
        }

        self.release().await;

        if disconnecting {
            let _ = self
                .status
                .apply(self.epoch, SessionTransition::ResourcesReleased);
            info!(target: "Session/Negotiate", "Session {} disconnected", self.token);
        }
    }

    /// Failure path: publish the failure, then release without notifying
    /// the agent.
    async fn fail(&self, transition: SessionTransition) {
        self.live.store(false, Ordering::Release);
        let error = match &transition {
            SessionTransition::NegotiationFailed(e) => Some(SessionError::from(e.clone())),
            SessionTransition::TransportLost(lost) => Some(SessionError::from(lost.clone())),
            _ => None,
        };
        if let Some(error) = error {
            self.failure
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get_or_insert(error);
        }
        let _ = self.status.apply(self.epoch, transition);
        self.release().await;
    }

    /// Releases control channel, observers, peer connection and output
    /// audio. Runs once; every step swallows its own error.
    async fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.live.store(false, Ordering::Release);
        self.shutdown.send_replace(true);

        let control = self
            .control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(control) = control
            && let Err(e) = control.close().await
        {
            debug!(target: "Session/Control", "Closing control channel: {e}");
        }

        self.pc.detach_observers();
        if let Err(e) = self.pc.close().await {
            warn!(target: "Session/Negotiate", "Closing peer connection: {e}");
        }

        self.output.detach();

        let dropped = self.queue().discard();
        if dropped > 0 {
            debug!(target: "Session/Candidates", "Discarded {dropped} unsent candidates");
        }
    }

    fn send_candidates(&self, flush: CandidateFlush) {
        debug!(target: "Session/Candidates", "Flushing {} candidate(s)", flush.len());
        let signaling = self.signaling.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            if let Err(e) = signaling.send_candidates(flush, &token).await {
                warn!(target: "Session/Candidates", "Candidate post failed: {e}");
            }
        });
    }

    async fn run_events(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<PeerEvent>,
        connect_timeout: Duration,
        heartbeat: Option<Duration>,
    ) {
        let mut shutdown = self.shutdown.subscribe();
        let connect_deadline = Instant::now() + connect_timeout;
        let mut heartbeat =
            heartbeat.map(|period| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            if *shutdown.borrow() {
                break;
            }
            let candidate_deadline = self.queue().next_deadline().map(Instant::from_std);
            let awaiting_connect = !self.connected.load(Ordering::Acquire);

            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = async {
                    match candidate_deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => {
                    let flush = self.queue().poll(queue_now());
                    if let Some(flush) = flush {
                        self.send_candidates(flush);
                    }
                }
                _ = tokio::time::sleep_until(connect_deadline), if awaiting_connect => {
                    warn!(target: "Session/Negotiate", "Session {} not connected after {connect_timeout:?}", self.token);
                    self.fail(SessionTransition::NegotiationFailed(NegotiationError::TimedOut(connect_timeout)))
                        .await;
                }
                _ = async {
                    match heartbeat.as_mut() {
                        Some(interval) => {
                            interval.tick().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if let Some(control) = self.control().filter(|c| c.is_open())
                        && let Err(e) = control.send_ping().await
                    {
                        debug!(target: "Session/Control", "Heartbeat failed: {e}");
                    }
                }
                _ = self.wake.notified() => {}
                _ = shutdown.changed() => break,
            }
        }
        debug!(target: "Session/Negotiate", "Event loop for {} exited", self.token);
    }

    async fn handle_event(&self, event: PeerEvent) {
        if !self.is_live() {
            return;
        }
        match event {
            PeerEvent::IceCandidate(candidate) => {
                let flush = self.queue().push(candidate, queue_now());
                if let Some(flush) = flush {
                    self.send_candidates(flush);
                }
            }
            PeerEvent::GatheringComplete => {
                debug!(target: "Session/Candidates", "Gathering complete for {}", self.token);
                let flush = self.queue().gathering_complete(queue_now());
                if let Some(flush) = flush {
                    self.send_candidates(flush);
                }
            }
            PeerEvent::ConnectionState(PeerConnectionState::Connected) => {
                self.connected.store(true, Ordering::Release);
                if let Ok(true) = self
                    .status
                    .apply(self.epoch, SessionTransition::TransportConnected)
                {
                    info!(target: "Session/Negotiate", "Session {} connected", self.token);
                }
            }
            PeerEvent::ConnectionState(state) if state.is_lost() => {
                warn!(target: "Session/Negotiate", "Transport {} for {}", state.as_str(), self.token);
                self.fail(SessionTransition::TransportLost(TransportLostError {
                    state: state.as_str().to_string(),
                }))
                .await;
            }
            PeerEvent::ConnectionState(state) => {
                debug!(target: "Session/Negotiate", "Transport {} for {}", state.as_str(), self.token);
            }
            PeerEvent::RemoteTrack(stream) => self.output.attach(stream),
            PeerEvent::ControlOpen => {
                if let Some(control) = self.control()
                    && let Err(e) = control.send_ready().await
                {
                    warn!(target: "Session/Control", "client-ready not delivered: {e}");
                }
            }
            PeerEvent::ControlMessage(text) => dispatch_inbound(&text, self.observer.as_ref()),
            PeerEvent::ControlClosed => {
                debug!(target: "Session/Control", "Control channel closed for {}", self.token);
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token)
            .field("agent_id", &self.agent_id)
            .field("epoch", &self.epoch)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}
