//! `RelayConnection` - one persistent WebSocket relay channel.
//!
//! Each open session runs in its own task. The task owns the socket and a
//! [`ConnectionFsm`]; it publishes every state change on a watch channel and
//! every state change and decoded message on an unbounded mpsc, in the order
//! they happen. Nothing else touches the socket.
//!
//! # Lifecycle
//!
//! 1. `open()` moves `Idle -> Connecting` synchronously and spawns the task
//! 2. The task connects, reads until the channel drops, then sleeps for the
//!    backoff and connects again
//! 3. `close()` cancels the task (including a pending retry sleep) and waits
//!    for it to finish, so no event is emitted after it returns

use super::state::{ConnectionFsm, ConnectionState, FsmEffect, FsmInput, ReconnectPolicy};
use crate::errors::ConnectionError;
use common::secret::AccessToken;
use futures_util::StreamExt;
use relay_protocol::address::{ChannelAddress, RelayMode, RelayTarget};
use relay_protocol::codec::{decode_event_message, EventMessage};
use relay_protocol::event::RecognitionEvent;
use relay_protocol::frame::RelayFrame;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the server's close frame carries none.
const NO_STATUS_CLOSE_CODE: u16 = 1005;

/// Everything a relay connection reports, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// The connection moved to a new state
    StateChanged(ConnectionState),
    /// A binary frame arrived (`RelayFrames` mode)
    Frame(RelayFrame),
    /// A recognition result arrived (`EventFeed` mode)
    Recognition(RecognitionEvent),
    /// A reconnect will be attempted after `delay`
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// The attempt budget is spent; the connection is back to `Idle`
    ReconnectExhausted { attempts: u32 },
}

struct Session {
    target: RelayTarget,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

/// Handle to one relay channel.
///
/// At most one session (and so one socket) is live per instance.
pub struct RelayConnection {
    label: String,
    address: ChannelAddress,
    policy: ReconnectPolicy,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    events_tx: mpsc::UnboundedSender<RelayEvent>,
    session: Option<Session>,
}

impl RelayConnection {
    /// Create an idle connection and the receiver for its events.
    ///
    /// `label` names the connection in logs (e.g. `frames`, `events`).
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        address: ChannelAddress,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<RelayEvent>) {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let connection = Self {
            label: label.into(),
            address,
            policy,
            state_tx: Arc::new(state_tx),
            events_tx,
            session: None,
        };

        (connection, events_rx)
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Target of the current session, if any.
    #[must_use]
    pub fn target(&self) -> Option<&RelayTarget> {
        self.session
            .as_ref()
            .filter(|_| self.state() != ConnectionState::Idle)
            .map(|s| &s.target)
    }

    /// Start a session. Returns immediately; progress is reported through
    /// events.
    ///
    /// Does nothing and returns `Ok(false)` unless the connection is `Idle`
    /// (a pending retry counts as active).
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::Address` if the channel URL cannot be
    /// built; the connection stays `Idle`.
    pub fn open(
        &mut self,
        target: RelayTarget,
        token: &AccessToken,
        mode: RelayMode,
    ) -> Result<bool, ConnectionError> {
        if self.state() != ConnectionState::Idle {
            debug!(
                target: "relay.connection",
                relay = %self.label,
                state = %self.state(),
                "Open ignored, connection is active"
            );
            return Ok(false);
        }

        let url = self
            .address
            .url_for(&target, token)
            .map_err(|e| ConnectionError::Address(e.to_string()))?;

        let mut fsm = ConnectionFsm::new(self.policy);
        fsm.handle(FsmInput::Open);

        let cancel_token = CancellationToken::new();
        let task = SessionTask {
            label: self.label.clone(),
            target: target.clone(),
            url,
            mode,
            fsm,
            state_tx: Arc::clone(&self.state_tx),
            events_tx: self.events_tx.clone(),
            cancel_token: cancel_token.clone(),
        };
        task.publish_state();

        info!(
            target: "relay.connection",
            relay = %self.label,
            channel = %target,
            mode = ?mode,
            "Opening relay"
        );

        self.session = Some(Session {
            target,
            cancel_token,
            task: tokio::spawn(task.run()),
        });

        Ok(true)
    }

    /// Close the session and cancel any pending retry. Idempotent.
    ///
    /// Waits for the session task to exit, so no events follow the final
    /// `StateChanged(Idle)`.
    pub async fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        session.cancel_token.cancel();
        if let Err(e) = session.task.await {
            warn!(
                target: "relay.connection",
                relay = %self.label,
                error = %e,
                "Relay task ended abnormally"
            );
            self.state_tx.send_replace(ConnectionState::Idle);
        }

        debug!(target: "relay.connection", relay = %self.label, "Relay closed");
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.cancel_token.cancel();
        }
    }
}

/// State owned by a running session task.
struct SessionTask {
    label: String,
    target: RelayTarget,
    url: Url,
    mode: RelayMode,
    fsm: ConnectionFsm,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    events_tx: mpsc::UnboundedSender<RelayEvent>,
    cancel_token: CancellationToken,
}

impl SessionTask {
    #[instrument(
        skip_all,
        name = "relay.connection",
        fields(relay = %self.label, channel = %self.target)
    )]
    async fn run(mut self) {
        loop {
            let connected = tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break,
                result = connect_async(self.url.as_str()) => result,
            };

            let cause = match connected {
                Ok((socket, _response)) => {
                    self.apply(FsmInput::HandshakeSucceeded);
                    info!(target: "relay.connection", relay = %self.label, "Relay open");

                    match self.pump(socket).await {
                        Some(cause) => cause,
                        None => break,
                    }
                }
                Err(e) => ConnectionError::Handshake(e.to_string()),
            };

            if cause.is_unauthorized() {
                warn!(
                    target: "relay.connection",
                    relay = %self.label,
                    "Relay rejected the access token"
                );
            }
            warn!(
                target: "relay.connection",
                relay = %self.label,
                error = %cause,
                "Relay dropped"
            );

            match self.apply(FsmInput::Dropped) {
                Some(FsmEffect::ScheduleRetry { attempt, delay }) => {
                    info!(
                        target: "relay.connection",
                        relay = %self.label,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Reconnect scheduled"
                    );
                    self.emit(RelayEvent::ReconnectScheduled { attempt, delay });

                    tokio::select! {
                        biased;
                        () = self.cancel_token.cancelled() => break,
                        () = tokio::time::sleep(delay) => {
                            self.apply(FsmInput::RetryElapsed);
                        }
                    }
                }
                Some(FsmEffect::GiveUp { attempts }) => {
                    warn!(
                        target: "relay.connection",
                        relay = %self.label,
                        attempts,
                        "Reconnect attempts exhausted"
                    );
                    self.emit(RelayEvent::ReconnectExhausted { attempts });
                    return;
                }
                _ => return,
            }
        }

        self.apply(FsmInput::Close);
        debug!(target: "relay.connection", relay = %self.label, "Relay task cancelled");
    }

    /// Read until the channel drops. Returns `None` when cancelled.
    async fn pump(&mut self, mut socket: RelaySocket) -> Option<ConnectionError> {
        let mut sequence: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => {
                    if let Err(e) = socket.close(None).await {
                        debug!(target: "relay.connection", relay = %self.label, error = %e, "Close handshake failed");
                    }
                    return None;
                }
                next = socket.next() => next,
            };

            match next {
                None => return Some(ConnectionError::Ended),
                Some(Err(e)) => return Some(ConnectionError::Transport(e.to_string())),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or_else(
                        || (NO_STATUS_CLOSE_CODE, String::new()),
                        |f| (u16::from(f.code), f.reason.as_str().to_string()),
                    );
                    return Some(ConnectionError::ClosedByServer { code, reason });
                }
                Some(Ok(Message::Binary(payload))) => match self.mode {
                    RelayMode::RelayFrames => {
                        self.emit(RelayEvent::Frame(RelayFrame::new(sequence, payload)));
                        sequence += 1;
                    }
                    RelayMode::EventFeed => {
                        debug!(
                            target: "relay.connection",
                            relay = %self.label,
                            len = payload.len(),
                            "Binary message on event feed dropped"
                        );
                    }
                },
                Some(Ok(Message::Text(text))) => match self.mode {
                    RelayMode::EventFeed => self.handle_text(text.as_str()),
                    RelayMode::RelayFrames => {
                        debug!(
                            target: "relay.connection",
                            relay = %self.label,
                            len = text.len(),
                            "Text message on frame relay dropped"
                        );
                    }
                },
                // Pings are answered by the protocol layer.
                Some(Ok(_)) => {}
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match decode_event_message(text) {
            Ok(EventMessage::Recognition(events)) => {
                for event in events {
                    self.emit(RelayEvent::Recognition(event));
                }
            }
            Ok(EventMessage::Ignored { kind }) => {
                debug!(
                    target: "relay.connection",
                    relay = %self.label,
                    kind = %kind,
                    "Unhandled event type ignored"
                );
            }
            Err(e) => {
                warn!(
                    target: "relay.connection",
                    relay = %self.label,
                    error = %e,
                    "Malformed event message dropped"
                );
            }
        }
    }

    fn apply(&mut self, input: FsmInput) -> Option<FsmEffect> {
        let before = self.fsm.state();
        let effect = self.fsm.handle(input);
        if self.fsm.state() != before {
            self.publish_state();
        }
        effect
    }

    fn publish_state(&self) {
        let state = self.fsm.state();
        self.state_tx.send_replace(state);
        self.emit(RelayEvent::StateChanged(state));
    }

    fn emit(&self, event: RelayEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.events_tx.send(event);
    }
}
