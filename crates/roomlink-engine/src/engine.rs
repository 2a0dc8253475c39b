//! The connection engine.
//!
//! One worker task owns all connection state and consumes an [`EventQueue`]:
//!
//! ```text
//!   Engine API ─┐
//!   signal   ───┼──▶ EventQueue ──▶ worker: match state { .. } ──▶ exit / enter hooks
//!   peers    ───┤                                            └──▶ EngineNotification
//!   timers   ───┘
//! ```
//!
//! Handlers return the next state; hooks never transition. Every resource of a
//! connection attempt (signal client, peers, publish loop) lives in the
//! worker's `Session` and is dropped on entry to `Disconnected` or `Backoff`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use roomlink_common::config::EngineConfig;
use roomlink_common::protocol::{
    AddTrackRequest, BackupCodecPolicy, DataPacket, IceServer, JoinResponse, ParticipantInfo,
    RoomInfo, SignalResponse, SignalTarget, TrackInfo, TrackKind, TrackSource, VideoLayer,
    VideoQuality,
};
use roomlink_common::{ConnectionState, FailureReason};
use roomlink_peer::media::{AudioFrame, AudioStreamInfo, MediaOptions, VideoFrame, VideoStreamInfo};
use roomlink_peer::{
    DataSender, Peer, PeerListener, PeerOptions, PeerRole, PeerState, Publisher, RtcConnector,
    Subscriber,
};
use roomlink_signal::endpoint::validate_server_url;
use roomlink_signal::{SignalClient, SignalConnector, SignalFailure, SignalListener, SignalState};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::backoff;
use crate::error::{EngineError, EngineResult};
use crate::event::Event;
use crate::media::{CaptureSink, MediaLoop, Renderer};
use crate::queue::{EventQueue, QueueError};

/// Internal state driving the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

/// Snapshot of the worker's state, republished after every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub state: EngineState,
    pub failure: FailureReason,
    pub retry_count: u16,
    /// Delay of the armed retry timer while in `Backoff`.
    pub retry_delay: Option<Duration>,
    /// Whether the media publish loop is running.
    pub publishing: bool,
}

impl EngineStatus {
    fn initial() -> Self {
        Self {
            state: EngineState::Disconnected,
            failure: FailureReason::None,
            retry_count: 0,
            retry_delay: None,
            publishing: false,
        }
    }

    /// Public projection. Connecting during a retry cycle stays `Reconnecting`.
    pub fn connection_state(&self) -> ConnectionState {
        match self.state {
            EngineState::Disconnected if self.failure.is_none() => ConnectionState::Disconnected,
            EngineState::Disconnected => ConnectionState::Failed,
            EngineState::Connecting if self.retry_count > 0 => ConnectionState::Reconnecting,
            EngineState::Connecting => ConnectionState::Connecting,
            EngineState::Connected => ConnectionState::Connected,
            EngineState::Backoff => ConnectionState::Reconnecting,
        }
    }
}

/// What the engine reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotification {
    StateChanged(ConnectionState),
    RoomInfo(RoomInfo),
    ParticipantInfo { info: ParticipantInfo, is_local: bool },
    /// Inbound data packet from either peer, delivered outside the event queue.
    DataPacket(DataPacket),
}

/// Transport implementations the engine builds connections with.
#[derive(Clone)]
pub struct EngineDeps {
    pub signal: Arc<dyn SignalConnector>,
    pub rtc: Arc<dyn RtcConnector>,
}

/// Media the engine publishes and accepts.
#[derive(Clone, Default)]
pub struct EngineOptions {
    /// Streams sent on the publisher peer. Requires `capture`.
    pub publish: MediaOptions,
    /// Streams accepted on the subscriber peer. Requires `renderer`.
    pub subscribe: MediaOptions,
    pub capture: Option<Arc<dyn CaptureSink>>,
    pub renderer: Option<Arc<dyn Renderer>>,
}

/// Queue slots kept for timer and retry-limit events beyond `queue_capacity`.
const INTERNAL_RESERVE: usize = 2;

type DataSlot = Arc<Mutex<Option<DataSender>>>;

fn lock_slot(slot: &Mutex<Option<DataSender>>) -> MutexGuard<'_, Option<DataSender>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sends data packets on the current publisher while connected. Cheap to clone.
#[derive(Clone)]
pub struct DataPublisher {
    slot: DataSlot,
    status: watch::Receiver<EngineStatus>,
}

impl DataPublisher {
    pub fn send(&self, packet: &DataPacket, reliable: bool) -> EngineResult<()> {
        if self.status.borrow().state != EngineState::Connected {
            return Err(EngineError::NotConnected);
        }
        let sender = lock_slot(&self.slot).clone().ok_or(EngineError::NotConnected)?;
        sender.send(packet, reliable)?;
        Ok(())
    }
}

/// Handle to a running engine.
pub struct Engine {
    queue: Arc<EventQueue<Event>>,
    status: watch::Receiver<EngineStatus>,
    data: DataPublisher,
    worker: Option<JoinHandle<()>>,
    grace: Duration,
}

impl Engine {
    /// Start an engine. Must be called from within a Tokio runtime.
    pub fn new(
        config: EngineConfig,
        deps: EngineDeps,
        options: EngineOptions,
    ) -> (Self, mpsc::UnboundedReceiver<EngineNotification>) {
        Self::with_rng(config, deps, options, StdRng::from_os_rng())
    }

    /// Like [`Engine::new`] with a given source of backoff jitter.
    pub fn with_rng(
        config: EngineConfig,
        deps: EngineDeps,
        options: EngineOptions,
        rng: StdRng,
    ) -> (Self, mpsc::UnboundedReceiver<EngineNotification>) {
        let queue = Arc::new(EventQueue::with_reserve(config.queue_capacity, INTERNAL_RESERVE));
        let (status_tx, status_rx) = watch::channel(EngineStatus::initial());
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let slot: DataSlot = Arc::new(Mutex::new(None));
        let grace = config.shutdown_grace();

        let worker = Worker {
            config,
            deps,
            options,
            queue: Arc::clone(&queue),
            notifier: Notifier(notify_tx),
            status: status_tx,
            data: Arc::clone(&slot),
            rng,
            state: EngineState::Disconnected,
            failure: FailureReason::None,
            retry_count: 0,
            target: None,
            epoch: 0,
            session: None,
            media_loop: None,
            retry_timer: None,
            last_public: ConnectionState::Disconnected,
        };
        let worker = tokio::spawn(worker.run());

        let engine = Self {
            queue,
            data: DataPublisher { slot, status: status_rx.clone() },
            status: status_rx,
            worker: Some(worker),
            grace,
        };
        (engine, notify_rx)
    }

    fn enqueue(&self, event: Event) -> EngineResult<()> {
        let priority = event.priority();
        self.queue.push(event, priority).map_err(|e| match e {
            QueueError::Full => EngineError::QueueFull,
            QueueError::Closed => EngineError::ShuttingDown,
        })
    }

    /// Start connecting. Only local validation is reported here.
    pub fn connect(&self, server_url: &str, token: &str) -> EngineResult<()> {
        if token.is_empty() {
            return Err(EngineError::InvalidArgument("token must not be empty".into()));
        }
        validate_server_url(server_url)?;
        self.enqueue(Event::Connect { url: server_url.to_owned(), token: token.to_owned() })
    }

    /// Leave the room and tear everything down, from any state.
    pub fn close(&self) -> EngineResult<()> {
        self.enqueue(Event::Close)
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().connection_state()
    }

    /// Why the last connection ended or is being retried.
    pub fn failure_reason(&self) -> FailureReason {
        self.status.borrow().failure
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    pub fn send_data_packet(&self, packet: &DataPacket, reliable: bool) -> EngineResult<()> {
        self.data.send(packet, reliable)
    }

    pub fn data_publisher(&self) -> DataPublisher {
        self.data.clone()
    }

    /// Stop the worker. Queued events are discarded; the worker gets the
    /// configured grace period to tear down before it is aborted.
    pub async fn shutdown(mut self) {
        self.queue.close();
        if let Some(mut worker) = self.worker.take() {
            if tokio::time::timeout(self.grace, &mut worker).await.is_err() {
                warn!(grace = ?self.grace, "Engine worker did not stop in time, aborting");
                worker.abort();
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

#[derive(Clone)]
struct Notifier(mpsc::UnboundedSender<EngineNotification>);

impl Notifier {
    fn send(&self, notification: EngineNotification) {
        // The owner may have stopped listening; that is not an engine error.
        let _ = self.0.send(notification);
    }
}

fn enqueue(queue: &EventQueue<Event>, event: Event) {
    let name = event.name();
    let priority = event.priority();
    if let Err(e) = queue.push(event, priority) {
        error!(event = name, error = %e, "Dropping engine event");
    }
}

/// Backoff's own events go into the queue's reserve so a full queue cannot
/// strand the engine in Backoff.
fn enqueue_internal(queue: &EventQueue<Event>, event: Event) {
    let name = event.name();
    let priority = event.priority();
    if let Err(e) = queue.push_reserved(event, priority) {
        error!(event = name, error = %e, "Dropping internal engine event");
    }
}

struct SignalBridge {
    epoch: u64,
    queue: Arc<EventQueue<Event>>,
}

impl SignalListener for SignalBridge {
    fn on_state_changed(&self, state: SignalState) {
        enqueue(&self.queue, Event::SignalState { epoch: self.epoch, state });
    }

    fn on_response(&self, response: SignalResponse) {
        enqueue(&self.queue, Event::SignalResponse { epoch: self.epoch, response });
    }
}

struct PeerBridge {
    epoch: u64,
    queue: Arc<EventQueue<Event>>,
    notifier: Notifier,
    renderer: Option<Arc<dyn Renderer>>,
}

impl PeerListener for PeerBridge {
    fn on_state_changed(&self, state: PeerState, role: PeerRole) {
        enqueue(&self.queue, Event::PeerState { epoch: self.epoch, state, role });
    }

    fn on_sdp(&self, sdp: String, role: PeerRole) {
        enqueue(&self.queue, Event::PeerSdp { epoch: self.epoch, sdp, role });
    }

    fn on_data_packet(&self, packet: DataPacket, _role: PeerRole) {
        self.notifier.send(EngineNotification::DataPacket(packet));
    }

    fn on_audio_info(&self, info: AudioStreamInfo) {
        if let Some(renderer) = &self.renderer {
            renderer.on_audio_info(info);
        }
    }

    fn on_audio_frame(&self, frame: AudioFrame) {
        if let Some(renderer) = &self.renderer {
            renderer.on_audio_frame(frame);
        }
    }

    fn on_video_info(&self, info: VideoStreamInfo) {
        if let Some(renderer) = &self.renderer {
            renderer.on_video_info(info);
        }
    }

    fn on_video_frame(&self, frame: VideoFrame) {
        if let Some(renderer) = &self.renderer {
            renderer.on_video_frame(frame);
        }
    }
}

struct Target {
    url: String,
    token: String,
}

/// Resources of one connection attempt. Field order is drop order: peers go
/// before the signal client.
struct Session {
    publisher: Option<Peer<Publisher>>,
    subscriber: Option<Peer<Subscriber>>,
    signal: SignalClient,
    subscriber_primary: bool,
    local_sid: Option<String>,
    subscribed_audio: Option<String>,
}

impl Session {
    fn new(signal: SignalClient) -> Self {
        Self {
            publisher: None,
            subscriber: None,
            signal,
            subscriber_primary: false,
            local_sid: None,
            subscribed_audio: None,
        }
    }

    /// The peer whose connection completes the session.
    fn primary_role(&self) -> PeerRole {
        if self.subscriber_primary {
            PeerRole::Subscriber
        } else {
            PeerRole::Publisher
        }
    }

    /// Subscribe to the first audio track in `tracks`.
    fn subscribe_tracks(&mut self, tracks: &[TrackInfo]) -> EngineResult<()> {
        if self.subscribed_audio.is_some() {
            return Err(EngineError::MaxSubscriptions);
        }
        let Some(track) = tracks.iter().find(|t| t.kind == TrackKind::Audio) else {
            return Ok(());
        };
        self.signal.send_update_subscription(vec![track.sid.clone()], true)?;
        info!(track = %track.sid, "Subscribed to audio track");
        self.subscribed_audio = Some(track.sid.clone());
        Ok(())
    }

    fn send_leave(&self) {
        if let Err(e) = self.signal.send_leave() {
            warn!(error = %e, "Failed to send leave");
        }
    }
}

struct Worker {
    config: EngineConfig,
    deps: EngineDeps,
    options: EngineOptions,
    queue: Arc<EventQueue<Event>>,
    notifier: Notifier,
    status: watch::Sender<EngineStatus>,
    data: DataSlot,
    rng: StdRng,
    state: EngineState,
    failure: FailureReason,
    retry_count: u16,
    target: Option<Target>,
    /// Id of the current connection attempt; events tagged otherwise are stale.
    epoch: u64,
    session: Option<Session>,
    media_loop: Option<MediaLoop>,
    retry_timer: Option<(JoinHandle<()>, Duration)>,
    last_public: ConnectionState,
}

impl Worker {
    async fn run(mut self) {
        debug!("Engine worker started");
        while let Some(event) = self.queue.pop().await {
            if event.epoch().is_some_and(|epoch| epoch != self.epoch) {
                debug!(event = event.name(), "Dropping event from a previous connection attempt");
                continue;
            }
            debug!(state = ?self.state, event = event.name(), "Handling event");

            let next = match self.state {
                EngineState::Disconnected => self.on_disconnected(event),
                EngineState::Connecting => self.on_connecting(event),
                EngineState::Connected => self.on_connected(event),
                EngineState::Backoff => self.on_backoff(event),
            };
            if let Some(next) = next {
                self.transition(next);
            }
            self.publish_status();
        }

        self.stop_retry_timer();
        self.teardown();
        self.publish_status();
        debug!("Engine worker stopped");
    }

    fn transition(&mut self, next: EngineState) {
        if next == self.state {
            return;
        }
        let previous = self.state;
        self.exit(previous);
        self.state = next;
        self.enter(next);
        info!(
            from = ?previous,
            to = ?next,
            retry = self.retry_count,
            failure = %self.failure,
            "Engine state changed"
        );

        let public = self.snapshot().connection_state();
        if public != self.last_public {
            self.last_public = public;
            self.notifier.send(EngineNotification::StateChanged(public));
        }
    }

    fn enter(&mut self, state: EngineState) {
        match state {
            EngineState::Disconnected => {
                self.teardown();
                self.retry_count = 0;
            }
            EngineState::Connecting => self.open_signal(),
            EngineState::Connected => {
                self.retry_count = 0;
                self.failure = FailureReason::None;
                self.start_media_loop();
            }
            EngineState::Backoff => {
                self.teardown();
                self.retry_count = self.retry_count.saturating_add(1);
                if self.retry_count > self.config.max_retries {
                    enqueue_internal(&self.queue, Event::MaxRetriesReached);
                    return;
                }
                let delay = backoff(self.retry_count, &mut self.rng);
                info!(
                    delay = ?delay,
                    attempt = self.retry_count,
                    max = self.config.max_retries,
                    reason = %self.failure,
                    "Reconnecting after backoff"
                );
                self.start_retry_timer(delay);
            }
        }
    }

    fn exit(&mut self, state: EngineState) {
        match state {
            EngineState::Connected => self.media_loop = None,
            EngineState::Backoff => self.stop_retry_timer(),
            EngineState::Disconnected | EngineState::Connecting => {}
        }
    }

    fn on_disconnected(&mut self, event: Event) -> Option<EngineState> {
        match event {
            Event::Connect { url, token } => {
                self.target = Some(Target { url, token });
                self.failure = FailureReason::None;
                Some(EngineState::Connecting)
            }
            other => {
                debug!(event = other.name(), "Ignored while disconnected");
                None
            }
        }
    }

    fn on_connecting(&mut self, event: Event) -> Option<EngineState> {
        match event {
            Event::Close => self.leave(),
            Event::SignalState { state: SignalState::Connected, .. } => {
                self.announce_tracks();
                None
            }
            Event::SignalState { state, .. } => self.on_signal_state(state),
            Event::SignalResponse { response, .. } => self.on_response(response),
            Event::PeerState { state: PeerState::Connected, role, .. } => {
                let primary = self.session.as_ref().map(Session::primary_role);
                if primary == Some(role) {
                    Some(EngineState::Connected)
                } else {
                    debug!(role = %role, "Secondary peer connected");
                    None
                }
            }
            Event::PeerState { state, role, .. } => self.on_peer_state(state, role),
            Event::PeerSdp { sdp, role, .. } => {
                self.forward_sdp(sdp, role);
                None
            }
            other => {
                debug!(event = other.name(), "Ignored while connecting");
                None
            }
        }
    }

    fn on_connected(&mut self, event: Event) -> Option<EngineState> {
        match event {
            Event::Close => self.leave(),
            Event::SignalState { state, .. } => self.on_signal_state(state),
            Event::SignalResponse { response: SignalResponse::Join(_), .. } => {
                warn!("Unexpected join while connected");
                None
            }
            Event::SignalResponse { response, .. } => self.on_response(response),
            Event::PeerState { state, role, .. } => self.on_peer_state(state, role),
            Event::PeerSdp { role: PeerRole::Publisher, .. } => {
                warn!("Unexpected SDP from publisher");
                None
            }
            Event::PeerSdp { sdp, role, .. } => {
                self.forward_sdp(sdp, role);
                None
            }
            other => {
                debug!(event = other.name(), "Ignored while connected");
                None
            }
        }
    }

    fn on_backoff(&mut self, event: Event) -> Option<EngineState> {
        match event {
            Event::MaxRetriesReached => {
                self.failure = FailureReason::MaxRetries;
                Some(EngineState::Disconnected)
            }
            Event::RetryTimerExpired { attempt } if attempt == self.retry_count => {
                Some(EngineState::Connecting)
            }
            Event::Close => {
                self.failure = FailureReason::None;
                Some(EngineState::Disconnected)
            }
            other => {
                debug!(event = other.name(), "Ignored during backoff");
                None
            }
        }
    }

    /// User close from Connecting or Connected. Not an error, so any reason
    /// left by an earlier drop is cleared.
    fn leave(&mut self) -> Option<EngineState> {
        if let Some(session) = &self.session {
            session.send_leave();
        }
        self.failure = FailureReason::None;
        Some(EngineState::Disconnected)
    }

    fn on_signal_state(&mut self, state: SignalState) -> Option<EngineState> {
        match state {
            SignalState::Disconnected => {
                self.failure = FailureReason::Other;
                Some(EngineState::Backoff)
            }
            SignalState::Failed(failure) => {
                self.failure = failure_reason(failure);
                if failure.is_client() {
                    Some(EngineState::Disconnected)
                } else {
                    Some(EngineState::Backoff)
                }
            }
            SignalState::Connecting | SignalState::Connected => None,
        }
    }

    fn on_peer_state(&mut self, state: PeerState, role: PeerRole) -> Option<EngineState> {
        match state {
            PeerState::Disconnected | PeerState::Failed => {
                warn!(role = %role, state = ?state, "Peer connection lost");
                self.failure = FailureReason::Rtc;
                Some(EngineState::Backoff)
            }
            PeerState::Connecting | PeerState::Connected => None,
        }
    }

    fn on_response(&mut self, response: SignalResponse) -> Option<EngineState> {
        match response {
            SignalResponse::Join(join) => {
                if let Err(e) = self.handle_join(*join) {
                    error!(error = %e, "Failed to set up session from join");
                    self.failure = FailureReason::Rtc;
                    return Some(EngineState::Backoff);
                }
                None
            }
            SignalResponse::Answer(answer) => {
                match self.session.as_ref().and_then(|s| s.publisher.as_ref()) {
                    Some(publisher) => {
                        let _ = publisher.handle_sdp(&answer.sdp);
                    }
                    None => debug!("Answer without a publisher"),
                }
                None
            }
            SignalResponse::Offer(offer) => {
                match self.session.as_ref().and_then(|s| s.subscriber.as_ref()) {
                    Some(subscriber) => {
                        let _ = subscriber.handle_sdp(&offer.sdp);
                    }
                    None => debug!("Offer without a subscriber"),
                }
                None
            }
            SignalResponse::Trickle(trickle) => {
                let candidate = match trickle.candidate() {
                    Ok(candidate) => candidate,
                    Err(e) => {
                        warn!(error = %e, "Dropping malformed trickle candidate");
                        return None;
                    }
                };
                let Some(session) = self.session.as_ref() else { return None };
                let handled = match trickle.target {
                    SignalTarget::Publisher => {
                        session.publisher.as_ref().map(|p| p.handle_ice_candidate(&candidate))
                    }
                    SignalTarget::Subscriber => {
                        session.subscriber.as_ref().map(|p| p.handle_ice_candidate(&candidate))
                    }
                };
                if handled.is_none() {
                    debug!(
                        target = ?trickle.target,
                        "Candidate for a peer that does not exist yet"
                    );
                }
                None
            }
            SignalResponse::Update(update) => {
                let Some(session) = self.session.as_mut() else { return None };
                let mut local_seen = false;
                for participant in update.participants {
                    let is_local = !local_seen
                        && session.local_sid.as_deref() == Some(participant.sid.as_str());
                    local_seen |= is_local;
                    if !is_local {
                        match session.subscribe_tracks(&participant.tracks) {
                            Ok(()) | Err(EngineError::MaxSubscriptions) => {}
                            Err(e) => warn!(
                                participant = %participant.identity,
                                error = %e,
                                "Subscription failed"
                            ),
                        }
                    }
                    self.notifier
                        .send(EngineNotification::ParticipantInfo { info: participant, is_local });
                }
                None
            }
            SignalResponse::RoomUpdate(update) => {
                if let Some(room) = update.room {
                    self.notifier.send(EngineNotification::RoomInfo(room));
                }
                None
            }
            SignalResponse::Leave(leave) => {
                info!(
                    reason = ?leave.reason,
                    can_reconnect = leave.can_reconnect,
                    "Server requested leave"
                );
                self.failure = FailureReason::from(leave.reason);
                Some(EngineState::Disconnected)
            }
            SignalResponse::Pong(_) => None,
        }
    }

    fn handle_join(&mut self, join: JoinResponse) -> EngineResult<()> {
        let session = self.session.as_mut().ok_or(EngineError::NotConnected)?;
        session.subscriber_primary = join.subscriber_primary;
        session.local_sid = Some(join.participant.sid.clone());
        info!(
            participant = %join.participant.sid,
            subscriber_primary = join.subscriber_primary,
            server_version = %join.server_version,
            "Joined room"
        );

        if let Some(room) = join.room {
            self.notifier.send(EngineNotification::RoomInfo(room));
        }
        self.notifier.send(EngineNotification::ParticipantInfo {
            info: join.participant,
            is_local: true,
        });
        for participant in &join.other_participants {
            self.notifier.send(EngineNotification::ParticipantInfo {
                info: participant.clone(),
                is_local: false,
            });
        }

        let force_relay = join.client_configuration.is_some_and(|c| c.force_relay);
        self.establish_peers(join.ice_servers, force_relay)?;

        let session = self.session.as_mut().ok_or(EngineError::NotConnected)?;
        for participant in &join.other_participants {
            match session.subscribe_tracks(&participant.tracks) {
                Ok(()) => {}
                Err(EngineError::MaxSubscriptions) => break,
                Err(e) => warn!(
                    participant = %participant.identity,
                    error = %e,
                    "Subscription failed"
                ),
            }
        }
        Ok(())
    }

    fn establish_peers(
        &mut self,
        ice_servers: Vec<IceServer>,
        force_relay: bool,
    ) -> EngineResult<()> {
        let ice_servers = flatten_ice_servers(ice_servers, self.config.max_ice_servers);
        if ice_servers.is_empty() {
            return Err(EngineError::InvalidArgument("join carried no usable ICE servers".into()));
        }

        let listener: Arc<dyn PeerListener> = Arc::new(PeerBridge {
            epoch: self.epoch,
            queue: Arc::clone(&self.queue),
            notifier: self.notifier.clone(),
            renderer: self.options.renderer.clone(),
        });
        let publisher = Peer::<Publisher>::create(
            self.deps.rtc.as_ref(),
            PeerOptions {
                ice_servers: ice_servers.clone(),
                force_relay,
                media: self.options.publish,
            },
            Arc::clone(&listener),
        )?;
        let subscriber = Peer::<Subscriber>::create(
            self.deps.rtc.as_ref(),
            PeerOptions { ice_servers, force_relay, media: self.options.subscribe },
            listener,
        )?;
        publisher.connect()?;
        subscriber.connect()?;

        *lock_slot(&self.data) = Some(publisher.data_sender());
        let session = self.session.as_mut().ok_or(EngineError::NotConnected)?;
        session.publisher = Some(publisher);
        session.subscriber = Some(subscriber);
        debug!(force_relay, "Peers established");
        Ok(())
    }

    /// Announce published tracks. Must precede the publisher's offer.
    fn announce_tracks(&self) {
        let Some(session) = &self.session else { return };
        let publish = self.options.publish;

        if let Some(audio) = publish.audio {
            let request = AddTrackRequest {
                cid: "a0".into(),
                name: self.config.audio_track_name.clone(),
                kind: TrackKind::Audio,
                source: TrackSource::Microphone,
                width: 0,
                height: 0,
                stereo: audio.channels == 2,
                layers: vec![],
                backup_codec_policy: None,
            };
            if let Err(e) = session.signal.send_add_track(request) {
                warn!(error = %e, "Failed to announce audio track");
            }
        }
        if let Some(video) = publish.video {
            let request = AddTrackRequest {
                cid: "v0".into(),
                name: self.config.video_track_name.clone(),
                kind: TrackKind::Video,
                source: TrackSource::Camera,
                width: video.width,
                height: video.height,
                stereo: false,
                layers: vec![VideoLayer {
                    quality: VideoQuality::High,
                    width: video.width,
                    height: video.height,
                }],
                backup_codec_policy: Some(BackupCodecPolicy::Regression),
            };
            if let Err(e) = session.signal.send_add_track(request) {
                warn!(error = %e, "Failed to announce video track");
            }
        }
    }

    fn forward_sdp(&self, sdp: String, role: PeerRole) {
        let Some(session) = &self.session else { return };
        let sent = match role {
            PeerRole::Publisher => session.signal.send_offer(sdp),
            PeerRole::Subscriber => session.signal.send_answer(sdp),
        };
        if let Err(e) = sent {
            warn!(role = %role, error = %e, "Failed to send SDP");
        }
    }

    fn open_signal(&mut self) {
        self.epoch += 1;
        let Some(target) = &self.target else {
            error!("No server to connect to");
            enqueue(
                &self.queue,
                Event::SignalState {
                    epoch: self.epoch,
                    state: SignalState::Failed(SignalFailure::ClientOther),
                },
            );
            return;
        };
        let listener = Arc::new(SignalBridge { epoch: self.epoch, queue: Arc::clone(&self.queue) });
        let connector = self.deps.signal.as_ref();
        match SignalClient::connect(connector, &target.url, &target.token, listener) {
            Ok(signal) => self.session = Some(Session::new(signal)),
            Err(e) => {
                error!(error = %e, "Failed to open signal channel");
                enqueue(
                    &self.queue,
                    Event::SignalState {
                        epoch: self.epoch,
                        state: SignalState::Failed(SignalFailure::ClientOther),
                    },
                );
            }
        }
    }

    fn start_media_loop(&mut self) {
        let publish = self.options.publish;
        if publish.audio.is_none() && publish.video.is_none() {
            return;
        }
        let Some(capture) = self.options.capture.clone() else {
            warn!("Publishing configured without a capture sink");
            return;
        };
        let Some(publisher) = self.session.as_ref().and_then(|s| s.publisher.as_ref()) else {
            return;
        };
        self.media_loop = Some(MediaLoop::start(
            publisher.media_sender(),
            capture,
            publish,
            self.config.publish_interval(),
        ));
    }

    fn start_retry_timer(&mut self, delay: Duration) {
        let queue = Arc::clone(&self.queue);
        let attempt = self.retry_count;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            enqueue_internal(&queue, Event::RetryTimerExpired { attempt });
        });
        self.retry_timer = Some((handle, delay));
    }

    fn stop_retry_timer(&mut self) {
        if let Some((handle, _)) = self.retry_timer.take() {
            handle.abort();
        }
    }

    /// Release everything owned by the current connection attempt.
    fn teardown(&mut self) {
        self.media_loop = None;
        *lock_slot(&self.data) = None;
        if self.session.take().is_some() {
            debug!("Connection resources released");
        }
    }

    fn snapshot(&self) -> EngineStatus {
        EngineStatus {
            state: self.state,
            failure: self.failure,
            retry_count: self.retry_count,
            retry_delay: self.retry_timer.as_ref().map(|(_, delay)| *delay),
            publishing: self.media_loop.is_some(),
        }
    }

    fn publish_status(&self) {
        let status = self.snapshot();
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// One entry per URL, keeping each server's credentials, capped at `max` URLs.
fn flatten_ice_servers(servers: Vec<IceServer>, max: usize) -> Vec<IceServer> {
    let mut flat = Vec::new();
    for server in servers {
        for url in server.urls {
            if flat.len() >= max {
                warn!(max, "ICE server list capacity exceeded");
                return flat;
            }
            flat.push(IceServer {
                urls: vec![url],
                username: server.username.clone(),
                credential: server.credential.clone(),
            });
        }
    }
    flat
}

fn failure_reason(failure: SignalFailure) -> FailureReason {
    match failure {
        SignalFailure::Unreachable => FailureReason::Unreachable,
        SignalFailure::PingTimeout => FailureReason::PingTimeout,
        SignalFailure::BadToken => FailureReason::BadToken,
        SignalFailure::Unauthorized => FailureReason::Unauthorized,
        SignalFailure::Internal | SignalFailure::ClientOther => FailureReason::Other,
    }
}
