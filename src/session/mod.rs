//! The call orchestrator.
//!
//! [`CallSession`] owns the local call state and reconciles three event
//! sources into it: user operations (`start_call`, `accept_call`,
//! `hangup`), descriptor/candidate/teardown changes pushed by the shared
//! store, and callbacks from the connection object. All of them are handled
//! by `&mut self` methods, so whoever drives the session (see
//! [`crate::commands`]) serialises them on one loop. Pushed events that
//! arrive while a user operation is in flight wait in their channels and are
//! checked against the phase and role current when they are handled.
//!
//! ```text
//! Idle ──start_call──▶ Calling ───remote stream──▶ Connected
//!  │                                                  ▲
//!  └──offer observed──▶ Receiving ──accept_call──▶ ···┘
//!
//! any phase ──hangup / remote teardown──▶ Idle
//! ```

pub mod cleanup;


use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::logger;
use crate::peer::connection::{ConnectionAdapter, ConnectionEvent, PeerConnection};
use crate::peer::ice::{analyze_candidates, apply_pending_candidates, CandidateBuffer};
use crate::peer::media::{MediaSource, MediaStream};
use crate::peer::state::{CallState, Phase, Role};
use crate::peer::types::{IceCandidate, SessionDescription, SessionRecord};
use crate::signaling::SignalingChannel;
use crate::store::DocumentStore;
use crate::subscription::Subscription;

pub use cleanup::{CleanupCoordinator, CleanupReport};

/// Notifications for the UI collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    PhaseChanged(Phase),
    /// Present "incoming call" affordances
    IncomingCall,
    /// The offer went away before the user answered
    IncomingCallRetracted,
    LocalStream(MediaStream),
    RemoteStream(MediaStream),
    /// Drop any rendered media
    StreamsCleared,
    Error(String),
}

/// One pushed event, as taken off the session's sources.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    Descriptor(SessionRecord),
    RemoteCandidate(IceCandidate),
    RemoteTeardown,
    Connection(ConnectionEvent),
    NegotiationTimeout,
    /// A watch failed or ended while it was still needed
    SignalingLost(CallError),
}

/// What one wait on the sources produced.
enum Polled {
    Input(SessionInput),
    SessionWatchEnded,
    Exhausted,
}

/// Resources of the call in progress. Dropped on hangup.
struct ActiveCall {
    role: Role,
    connection: Arc<dyn PeerConnection>,
    connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    remote_candidates: Subscription<Result<IceCandidate>>,
    remote_teardown: Subscription<Result<()>>,
    candidates: CandidateBuffer,
    local_candidates: Vec<IceCandidate>,
    /// The descriptor was seen holding an offer during this call
    offer_seen: bool,
    deadline: Option<Instant>,
    started_at: DateTime<Utc>,
}

pub struct CallSession {
    config: CallConfig,
    signaling: SignalingChannel,
    connector: Arc<dyn ConnectionAdapter>,
    media: Arc<dyn MediaSource>,
    state: CallState,
    call: Option<ActiveCall>,
    session_watch: Option<Subscription<Result<SessionRecord>>>,
    events: broadcast::Sender<CallEvent>,
    disposed: bool,
}

impl CallSession {
    /// Validates `config` and starts watching the session descriptor.
    pub fn new(
        config: CallConfig,
        store: Arc<dyn DocumentStore>,
        connector: Arc<dyn ConnectionAdapter>,
        media: Arc<dyn MediaSource>,
    ) -> Result<Self> {
        config.validate()?;
        logger::init(&config.logging);
        let signaling = SignalingChannel::new(store, &config);
        let (events, _) = broadcast::channel(config.event_capacity);
        let session_watch = Some(signaling.watch_session());
        info!("Call session ready on {}", signaling.session_path());

        Ok(Self {
            config,
            signaling,
            connector,
            media,
            state: CallState::default(),
            call: None,
            session_watch,
            events,
            disposed: false,
        })
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn role(&self) -> Option<Role> {
        self.state.role
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn signaling(&self) -> &SignalingChannel {
        &self.signaling
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<CallEvent> {
        self.events.clone()
    }

    fn emit(&self, event: CallEvent) {
        debug!("emit {:?}", event);
        // No receivers is fine: nobody is rendering.
        let _ = self.events.send(event);
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.state.phase != phase {
            info!("Phase {:?} -> {:?}", self.state.phase, phase);
            self.state.phase = phase;
            self.emit(CallEvent::PhaseChanged(phase));
        }
    }

    /// Resets the state, announcing `Idle` if the phase changes.
    fn return_to_idle(&mut self) {
        let previous = self.state.phase;
        self.state.reset();
        if previous != Phase::Idle {
            info!("Phase {:?} -> {:?}", previous, Phase::Idle);
            self.emit(CallEvent::PhaseChanged(Phase::Idle));
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.disposed {
            Err(CallError::Closed)
        } else {
            Ok(())
        }
    }

    /// Calls out: acquire media, create the connection, publish the offer.
    ///
    /// Returns once the offer is published; `Connected` follows when remote
    /// media arrives.
    pub async fn start_call(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state.phase != Phase::Idle || !self.state.claim(Role::Caller) {
            return Err(CallError::InvalidPhase {
                operation: "start_call",
                phase: self.state.phase,
            });
        }
        info!("Calling");

        let stream = match self.media.acquire().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot start call: {e}");
                self.state.reset();
                self.emit(CallEvent::Error(e.to_string()));
                return Err(e);
            }
        };
        self.state.local_stream = Some(stream.clone());
        self.emit(CallEvent::LocalStream(stream.clone()));
        self.set_phase(Phase::Calling);

        if let Err(e) = self.negotiate_as_caller(&stream).await {
            self.fail_call(&e).await;
            return Err(e);
        }
        Ok(())
    }

    async fn negotiate_as_caller(&mut self, stream: &MediaStream) -> Result<()> {
        let connection = self.establish(Role::Caller, stream).await?;
        let offer = connection.create_offer().await?;
        connection.set_local_description(offer.clone()).await?;
        self.signaling.publish_offer(&offer).await
    }

    /// Answers the incoming call announced by the last `IncomingCall`.
    pub async fn accept_call(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state.phase != Phase::Receiving || !self.state.claim(Role::Callee) {
            return Err(CallError::InvalidPhase {
                operation: "accept_call",
                phase: self.state.phase,
            });
        }
        info!("Joining the call");

        let offer = match self.signaling.read_session().await {
            Ok(SessionRecord {
                offer: Some(offer), ..
            }) => offer,
            Ok(_) => {
                let e =
                    CallError::Consistency("offer was withdrawn before it was accepted".into());
                warn!("Cannot accept call: {e}");
                self.emit(CallEvent::IncomingCallRetracted);
                self.emit(CallEvent::Error(e.to_string()));
                self.return_to_idle();
                return Err(e);
            }
            Err(e) => {
                self.fail_call(&e).await;
                return Err(e);
            }
        };

        let stream = match self.media.acquire().await {
            Ok(stream) => stream,
            Err(e) => {
                // Declines the call so the caller is not left waiting.
                self.fail_call(&e).await;
                return Err(e);
            }
        };
        self.state.local_stream = Some(stream.clone());
        self.emit(CallEvent::LocalStream(stream.clone()));

        if let Err(e) = self.negotiate_as_callee(offer, &stream).await {
            self.fail_call(&e).await;
            return Err(e);
        }
        Ok(())
    }

    async fn negotiate_as_callee(
        &mut self,
        offer: SessionDescription,
        stream: &MediaStream,
    ) -> Result<()> {
        let connection = self.establish(Role::Callee, stream).await?;
        self.apply_remote_description(offer).await?;
        let answer = connection.create_answer().await?;
        connection.set_local_description(answer.clone()).await?;
        self.signaling.publish_answer(&answer).await
    }

    /// Creates the connection object, attaches local media and starts the
    /// candidate exchange for `role`.
    async fn establish(
        &mut self,
        role: Role,
        stream: &MediaStream,
    ) -> Result<Arc<dyn PeerConnection>> {
        let handle = self.connector.create(&self.config).await?;
        let connection = handle.connection.clone();
        let deadline = self
            .config
            .negotiation_timeout_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        // Stored before anything else can fail so cleanup sees the connection.
        self.call = Some(ActiveCall {
            role,
            connection: connection.clone(),
            connection_events: handle.events,
            remote_candidates: self.signaling.watch_remote_candidates(role),
            remote_teardown: self.signaling.watch_remote_teardown(role),
            candidates: CandidateBuffer::new(),
            local_candidates: Vec::new(),
            offer_seen: false,
            deadline,
            started_at: Utc::now(),
        });

        connection.attach_local_stream(stream).await?;
        debug!(
            "Candidate exchange started: local {}, remote {}",
            role.candidate_collection(),
            role.opposite().candidate_collection()
        );
        Ok(connection)
    }

    /// Sets the remote description once, then flushes early candidates.
    async fn apply_remote_description(&mut self, desc: SessionDescription) -> Result<()> {
        let Some(call) = self.call.as_mut() else {
            return Ok(());
        };
        if call.candidates.remote_description_set() {
            debug!("Remote description already set, ignoring repeat");
            return Ok(());
        }
        call.connection.set_remote_description(desc).await?;
        let pending = call.candidates.mark_remote_description_set();
        if !pending.is_empty() {
            let applied = apply_pending_candidates(call.connection.as_ref(), pending).await;
            debug!("Applied {applied} early remote candidates");
        }
        Ok(())
    }

    /// Ends the call from any phase. A no-op while idle.
    pub async fn hangup(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state.phase == Phase::Idle && self.call.is_none() && self.state.role.is_none() {
            debug!("Hangup while idle ignored");
            return Ok(());
        }
        self.teardown().await;
        Ok(())
    }

    /// Rejects an incoming call, or hangs up an established one.
    pub async fn decline_or_hangup(&mut self) -> Result<()> {
        self.hangup().await
    }

    async fn fail_call(&mut self, err: &CallError) {
        error!("Call failed: {err}");
        self.emit(CallEvent::Error(err.to_string()));
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        let call = self.call.take();
        let connection = match call {
            Some(mut call) => {
                call.remote_candidates.cancel();
                call.remote_teardown.cancel();
                let seconds = (Utc::now() - call.started_at).num_seconds();
                info!("Hanging up {:?} call after {seconds} s", call.role);
                Some(call.connection)
            }
            None => None,
        };

        let local_stream = self.state.local_stream.take();
        self.state.remote_stream = None;
        self.emit(CallEvent::StreamsCleared);

        let report = CleanupCoordinator::new(self.media.as_ref(), &self.signaling)
            .run(local_stream, connection)
            .await;
        if !report.is_clean() {
            warn!("Cleanup finished with failures: {:?}", report.failures);
        }

        let was_ringing = self.state.phase == Phase::Receiving && self.state.role.is_none();
        if was_ringing {
            self.emit(CallEvent::IncomingCallRetracted);
        }
        self.return_to_idle();

        // Snapshots queued on the old watch describe the session just torn
        // down; start over from the store's current state.
        self.resubscribe();
    }

    fn resubscribe(&mut self) {
        if let Some(mut watch) = self.session_watch.take() {
            watch.cancel();
        }
        if !self.disposed {
            self.session_watch = Some(self.signaling.watch_session());
        }
    }

    /// Hangs up an accepted or outgoing call and stops watching the
    /// descriptor. An unanswered incoming call is left to its caller. Later
    /// operations fail with `Closed`.
    pub async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if self.call.is_some() || self.state.role.is_some() {
            self.teardown().await;
        } else if self.state.phase == Phase::Receiving {
            self.emit(CallEvent::IncomingCallRetracted);
            self.return_to_idle();
        }
        if let Some(mut watch) = self.session_watch.take() {
            watch.cancel();
        }
        info!("Call session disposed");
    }

    /// Waits for the next pushed event. `None` once no source is left.
    pub async fn next_input(&mut self) -> Option<SessionInput> {
        let watching = self.session_watch.is_some();
        let session_watch = self.session_watch.as_mut();
        let in_call = self.call.is_some();
        let (candidates, teardown, connection, deadline) = match self.call.as_mut() {
            Some(call) => (
                Some(&mut call.remote_candidates),
                Some(&mut call.remote_teardown),
                Some(&mut call.connection_events),
                call.deadline,
            ),
            None => (None, None, None, None),
        };

        let polled = tokio::select! {
            biased;
            item = next_item(session_watch), if watching => match item {
                Some(item) => Polled::Input(watched(item, SessionInput::Descriptor)),
                None => Polled::SessionWatchEnded,
            },
            item = next_item(candidates), if in_call => Polled::Input(match item {
                Some(item) => watched(item, SessionInput::RemoteCandidate),
                None => watch_ended("remote candidate"),
            }),
            Some(event) = next_event(connection) => Polled::Input(SessionInput::Connection(event)),
            item = next_item(teardown), if in_call => Polled::Input(match item {
                Some(item) => watched(item, |()| SessionInput::RemoteTeardown),
                None => watch_ended("remote teardown"),
            }),
            _ = wait_until(deadline), if deadline.is_some() => {
                Polled::Input(SessionInput::NegotiationTimeout)
            }
            else => Polled::Exhausted,
        };

        match polled {
            Polled::Input(input) => Some(input),
            Polled::SessionWatchEnded => {
                self.session_watch = None;
                Some(watch_ended("session descriptor"))
            }
            Polled::Exhausted => None,
        }
    }

    /// Waits for and handles one event. `false` once no source is left.
    pub async fn process_next(&mut self) -> bool {
        match self.next_input().await {
            Some(input) => {
                self.handle_input(input).await;
                true
            }
            None => false,
        }
    }

    /// Handles one event if one is ready, without waiting.
    pub async fn try_process_next(&mut self) -> bool {
        let ready = tokio::task::unconstrained(self.next_input()).now_or_never();
        match ready {
            Some(Some(input)) => {
                self.handle_input(input).await;
                true
            }
            _ => false,
        }
    }

    /// Handles everything already queued; returns how many events ran.
    pub async fn drain(&mut self) -> usize {
        let mut handled = 0;
        while self.try_process_next().await {
            handled += 1;
        }
        handled
    }

    pub async fn handle_input(&mut self, input: SessionInput) {
        if self.disposed {
            return;
        }
        match input {
            SessionInput::Descriptor(record) => self.on_descriptor(record).await,
            SessionInput::RemoteCandidate(candidate) => self.on_remote_candidate(candidate).await,
            SessionInput::RemoteTeardown => {
                if self.call.is_some() {
                    info!("Remote participant hung up");
                    self.teardown().await;
                }
            }
            SessionInput::Connection(ConnectionEvent::LocalCandidate(candidate)) => {
                self.on_local_candidate(candidate).await
            }
            SessionInput::Connection(ConnectionEvent::RemoteStream(stream)) => {
                self.on_remote_stream(stream)
            }
            SessionInput::NegotiationTimeout => {
                if self.call.is_some() && self.state.phase != Phase::Connected {
                    let secs = self.config.negotiation_timeout_secs.unwrap_or_default();
                    self.fail_call(&CallError::NegotiationTimeout(secs)).await;
                }
            }
            SessionInput::SignalingLost(err) => self.on_signaling_lost(err).await,
        }
    }

    async fn on_signaling_lost(&mut self, err: CallError) {
        if self.call.is_some() || self.state.role.is_some() {
            // Without the watches the remote hangup would never be seen.
            self.fail_call(&err).await;
            return;
        }
        warn!("Signaling problem while idle: {err}");
        self.emit(CallEvent::Error(err.to_string()));
        if self.state.phase == Phase::Receiving {
            self.emit(CallEvent::IncomingCallRetracted);
            self.return_to_idle();
        }
        if matches!(err, CallError::SignalingIo(_)) {
            self.resubscribe();
        }
    }

    async fn on_descriptor(&mut self, record: SessionRecord) {
        if let Some(call) = self.call.as_mut() {
            if record.offer.is_some() {
                call.offer_seen = true;
            } else if call.offer_seen {
                info!("Session descriptor deleted by the remote participant");
                self.teardown().await;
                return;
            }

            if call.role == Role::Caller {
                if let Some(answer) = record.answer {
                    if !call.candidates.remote_description_set() {
                        info!("Answer received, completing negotiation");
                        if let Err(e) = self.apply_remote_description(answer).await {
                            self.fail_call(&e).await;
                        }
                    }
                }
            }
            return;
        }

        match self.state.phase {
            Phase::Idle if record.offer.is_some() && record.answer.is_none() => {
                if self.state.may_ring() {
                    info!("Incoming call");
                    self.set_phase(Phase::Receiving);
                    self.emit(CallEvent::IncomingCall);
                }
            }
            Phase::Receiving if record.offer.is_none() && self.state.role.is_none() => {
                info!("Incoming call withdrawn");
                self.emit(CallEvent::IncomingCallRetracted);
                self.set_phase(Phase::Idle);
            }
            _ => {}
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        if let Some(candidate) = call.candidates.admit(candidate) {
            if let Err(e) = call.connection.add_ice_candidate(candidate).await {
                warn!("Failed to add remote candidate: {e}");
            }
        }
    }

    async fn on_local_candidate(&mut self, candidate: IceCandidate) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        let role = call.role;
        call.local_candidates.push(candidate.clone());
        if let Err(e) = self.signaling.publish_local_candidate(role, &candidate).await {
            // The other side would never learn this path; give up the call.
            self.fail_call(&e).await;
        }
    }

    fn on_remote_stream(&mut self, stream: MediaStream) {
        let Some(call) = self.call.as_mut() else {
            debug!("Remote stream {} after hangup ignored", stream.id);
            return;
        };
        call.deadline = None;
        analyze_candidates(&call.local_candidates);
        self.state.remote_stream = Some(stream.clone());
        self.emit(CallEvent::RemoteStream(stream));
        self.set_phase(Phase::Connected);
    }
}

async fn next_item<S: Stream + Unpin>(stream: Option<&mut S>) -> Option<S::Item> {
    match stream {
        Some(stream) => stream.next().await,
        None => None,
    }
}

fn watched<T>(item: Result<T>, input: impl FnOnce(T) -> SessionInput) -> SessionInput {
    match item {
        Ok(value) => input(value),
        Err(e) => SessionInput::SignalingLost(e),
    }
}

fn watch_ended(watch: &str) -> SessionInput {
    SessionInput::SignalingLost(CallError::SignalingIo(format!("{watch} watch ended")))
}

async fn next_event<T>(rx: Option<&mut mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}
