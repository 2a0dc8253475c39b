//! Signal client: one socket, one connection attempt.
//!
//! The client owns a driver task that consumes [`SocketEvent`]s and runs two timers
//! once the join response arrives:
//!
//! ```text
//!   ping interval (periodic) ──▶ send Ping { timestamp, rtt }
//!   ping timeout  (one-shot) ──▶ close the socket; reset by every Pong
//! ```
//!
//! A socket that closes after the ping timeout fired is reported as
//! `Failed(PingTimeout)`; any other close as `Disconnected`. After the first
//! terminal state the driver stops and reports nothing further.

use std::future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use roomlink_common::codec;
use roomlink_common::protocol::{
    AddTrackRequest, JoinResponse, LeaveRequest, Ping, Pong, SessionDescription, SignalRequest,
    SignalResponse, UpdateSubscription,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use crate::endpoint::build_rtc_url;
use crate::error::{SignalError, SignalResult};
use crate::socket::{SignalConnector, SignalSocket, SocketEvent};

/// Signal channel state as reported to the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    Disconnected,
    Connecting,
    Connected,
    Failed(SignalFailure),
}

impl SignalState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed(_))
    }
}

/// Why the signal channel failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalFailure {
    /// The socket never opened.
    Unreachable,
    /// The server stopped answering pings.
    PingTimeout,
    /// Server-side handshake failure (5xx or anything unexpected).
    Internal,
    /// HTTP 400.
    BadToken,
    /// HTTP 401.
    Unauthorized,
    /// Any other 4xx.
    ClientOther,
}

impl SignalFailure {
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => Self::BadToken,
            401 => Self::Unauthorized,
            402..=499 => Self::ClientOther,
            _ => Self::Internal,
        }
    }

    /// Failures caused by the client's own request; retrying will not help.
    pub fn is_client(&self) -> bool {
        matches!(self, Self::BadToken | Self::Unauthorized | Self::ClientOther)
    }
}

/// Receives everything the signal channel surfaces.
pub trait SignalListener: Send + Sync + 'static {
    fn on_state_changed(&self, state: SignalState);

    /// A decoded response other than `Pong`.
    fn on_response(&self, response: SignalResponse);
}

/// Handle to one signal connection. Dropping it closes the socket silently.
pub struct SignalClient {
    socket: Arc<dyn SignalSocket>,
    rtt: Arc<AtomicI64>,
    driver: JoinHandle<()>,
}

impl SignalClient {
    /// Open the socket and start the driver. Returns as soon as the open is
    /// under way; the outcome is reported through `listener`.
    pub fn connect(
        connector: &dyn SignalConnector,
        server_url: &str,
        token: &str,
        listener: Arc<dyn SignalListener>,
    ) -> SignalResult<Self> {
        if token.is_empty() {
            return Err(SignalError::InvalidToken);
        }
        let url = build_rtc_url(server_url)?;
        info!(url = %url, "Connecting to signal server");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let socket = connector.open(&url, token, events_tx)?;
        listener.on_state_changed(SignalState::Connecting);

        let rtt = Arc::new(AtomicI64::new(0));
        let driver = Driver {
            socket: Arc::clone(&socket),
            listener,
            rtt: Arc::clone(&rtt),
            state: SignalState::Connecting,
            keepalive: None,
            ping_timed_out: false,
        };
        let driver = tokio::spawn(driver.run(events_rx));

        Ok(Self { socket, rtt, driver })
    }

    /// Encode and send a request.
    pub fn send(&self, request: &SignalRequest) -> SignalResult<()> {
        let frame = codec::encode(request)?;
        self.socket.send(frame)
    }

    pub fn send_leave(&self) -> SignalResult<()> {
        self.send(&SignalRequest::Leave(LeaveRequest::client_initiated()))
    }

    pub fn send_offer(&self, sdp: impl Into<String>) -> SignalResult<()> {
        self.send(&SignalRequest::Offer(SessionDescription::offer(sdp)))
    }

    pub fn send_answer(&self, sdp: impl Into<String>) -> SignalResult<()> {
        self.send(&SignalRequest::Answer(SessionDescription::answer(sdp)))
    }

    pub fn send_add_track(&self, request: AddTrackRequest) -> SignalResult<()> {
        self.send(&SignalRequest::AddTrack(request))
    }

    pub fn send_update_subscription(
        &self,
        track_sids: Vec<String>,
        subscribe: bool,
    ) -> SignalResult<()> {
        self.send(&SignalRequest::Subscription(UpdateSubscription { track_sids, subscribe }))
    }

    /// Last measured round trip to the server in milliseconds (0 before the first pong).
    pub fn rtt(&self) -> i64 {
        self.rtt.load(Ordering::Relaxed)
    }
}

impl Drop for SignalClient {
    fn drop(&mut self) {
        self.driver.abort();
        self.socket.close();
    }
}

struct KeepAlive {
    interval: Interval,
    timeout: Duration,
    deadline: Pin<Box<Sleep>>,
}

impl KeepAlive {
    /// Server values are in seconds; anything below one second is raised to one.
    fn from_join(join: &JoinResponse) -> Self {
        let period = Duration::from_secs(u64::from(join.ping_interval.max(1)));
        let timeout = Duration::from_secs(u64::from(join.ping_timeout.max(1)));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            timeout,
            deadline: Box::pin(tokio::time::sleep(timeout)),
        }
    }

    fn reset_deadline(&mut self) {
        let next = Instant::now() + self.timeout;
        self.deadline.as_mut().reset(next);
    }
}

enum Timer {
    Ping,
    Timeout,
}

async fn next_timer(keepalive: &mut Option<KeepAlive>) -> Timer {
    match keepalive {
        Some(k) => tokio::select! {
            _ = &mut k.deadline => Timer::Timeout,
            _ = k.interval.tick() => Timer::Ping,
        },
        None => future::pending().await,
    }
}

struct Driver {
    socket: Arc<dyn SignalSocket>,
    listener: Arc<dyn SignalListener>,
    rtt: Arc<AtomicI64>,
    state: SignalState,
    keepalive: Option<KeepAlive>,
    ping_timed_out: bool,
}

impl Driver {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SocketEvent>) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    self.handle_socket_event(event);
                    if self.state.is_terminal() {
                        break;
                    }
                }
                timer = next_timer(&mut self.keepalive) => match timer {
                    Timer::Ping => self.send_ping(),
                    Timer::Timeout => {
                        let timeout = self.keepalive.as_ref().map(|k| k.timeout);
                        warn!(timeout = ?timeout, "Ping timeout, closing signal socket");
                        self.ping_timed_out = true;
                        self.keepalive = None;
                        self.socket.close();
                    }
                },
            }
        }
        debug!(state = ?self.state, "Signal driver stopped");
    }

    fn change_state(&mut self, state: SignalState) {
        self.state = state;
        self.listener.on_state_changed(state);
    }

    fn handle_socket_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Connected => {
                info!("Signal channel connected");
                self.change_state(SignalState::Connected);
            }
            SocketEvent::Frame(frame) => self.handle_frame(&frame),
            SocketEvent::Closed => {
                self.keepalive = None;
                let state = if self.ping_timed_out {
                    SignalState::Failed(SignalFailure::PingTimeout)
                } else {
                    SignalState::Disconnected
                };
                info!(state = ?state, "Signal channel closed");
                self.change_state(state);
            }
            SocketEvent::Error { http_status } => {
                self.keepalive = None;
                let failure = http_status
                    .map(SignalFailure::from_http_status)
                    .unwrap_or(SignalFailure::Unreachable);
                warn!(status = ?http_status, failure = ?failure, "Signal channel failed");
                self.change_state(SignalState::Failed(failure));
            }
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let response: SignalResponse = match codec::decode(frame) {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, len = frame.len(), "Dropping undecodable signal frame");
                return;
            }
        };
        match response {
            SignalResponse::Pong(pong) => self.handle_pong(pong),
            SignalResponse::Join(join) => {
                let keepalive = KeepAlive::from_join(&join);
                debug!(
                    interval = ?keepalive.interval.period(),
                    timeout = ?keepalive.timeout,
                    "Starting keep-alive"
                );
                self.keepalive = Some(keepalive);
                self.listener.on_response(SignalResponse::Join(join));
            }
            other => self.listener.on_response(other),
        }
    }

    fn handle_pong(&mut self, pong: Pong) {
        let rtt = chrono::Utc::now().timestamp_millis() - pong.last_ping_timestamp;
        self.rtt.store(rtt, Ordering::Relaxed);
        if let Some(keepalive) = self.keepalive.as_mut() {
            keepalive.reset_deadline();
        }
        debug!(rtt_ms = rtt, "Pong");
    }

    fn send_ping(&self) {
        let ping = Ping {
            timestamp: chrono::Utc::now().timestamp_millis(),
            rtt: self.rtt.load(Ordering::Relaxed),
        };
        let sent = codec::encode(&SignalRequest::Ping(ping))
            .map_err(SignalError::from)
            .and_then(|frame| self.socket.send(frame));
        if let Err(e) = sent {
            debug!(error = %e, "Ping not sent");
        }
    }
}
