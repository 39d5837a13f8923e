// Transport connection: one logical connection to the relay.
//
// Owns the socket lifecycle (open, identity wait, close), the connect deadline
// and the reconnect timer. Readiness requires the relay's identity frame; until
// then `send` hands messages back to be queued. Socket establishment is
// abstracted via `Connector` for testability.

pub mod ws;

use std::time::Duration;

use docsync_common::protocol::ws::{encode_message, WsMessage};
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ConnectError;

pub use ws::WsConnector;

// ── Socket abstraction ──────────────────────────────────────────────

/// Inbound socket traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Frame(String),
    Closed { reason: String },
}

/// An open socket: text frames out, events in. Dropping it closes the socket.
#[derive(Debug)]
pub struct Socket {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Opens sockets to the relay.
pub trait Connector: Send + 'static {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<Socket, ConnectError>>;
}

/// The dispatcher's view of the connection.
pub trait RelayLink {
    /// Send on the ready connection, or hand the message back when not ready.
    fn send(&mut self, message: WsMessage) -> Result<(), WsMessage>;

    /// The relay assigned an identity: accept sends and release `connect()` waiters.
    fn mark_ready(&mut self);
}

pub type ConnectWaiter = oneshot::Sender<Result<(), ConnectError>>;

/// Accept only `ws://` and `wss://` relay URLs.
pub fn validate_relay_url(value: &str) -> Result<Url, ConnectError> {
    let parsed = Url::parse(value).map_err(|error| ConnectError::InvalidUrl {
        url: value.to_string(),
        reason: error.to_string(),
    })?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(ConnectError::InvalidUrl {
            url: value.to_string(),
            reason: format!("unsupported scheme `{other}` (expected ws or wss)"),
        }),
    }
}

// ── Connection state ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Opening,
    AwaitingIdentity,
    Ready,
}

/// What the connection reports to the client task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    /// A ready connection closed without `close()` being called.
    Closed { reason: String },
    /// An attempt failed before the relay assigned an identity.
    AttemptFailed(ConnectError),
    /// The scheduled reconnect delay elapsed.
    ReconnectDue,
}

type OpenResult = (u64, Result<Socket, ConnectError>);

pub struct TransportConnection<C> {
    connector: C,
    url: String,
    connect_timeout: Duration,
    phase: Phase,
    generation: u64,
    socket: Option<Socket>,
    opened_tx: mpsc::UnboundedSender<OpenResult>,
    opened_rx: mpsc::UnboundedReceiver<OpenResult>,
    deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
    waiters: Vec<ConnectWaiter>,
}

impl<C: Connector> TransportConnection<C> {
    pub fn new(connector: C, url: &str, connect_timeout: Duration) -> Result<Self, ConnectError> {
        validate_relay_url(url)?;
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Ok(Self {
            connector,
            url: url.to_string(),
            connect_timeout,
            phase: Phase::Idle,
            generation: 0,
            socket: None,
            opened_tx,
            opened_rx,
            deadline: None,
            reconnect_at: None,
            waiters: Vec::new(),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self.phase, Phase::Opening | Phase::AwaitingIdentity)
    }

    pub fn reconnect_scheduled(&self) -> bool {
        self.reconnect_at.is_some()
    }

    /// Start (or join) a connection attempt. `waiter` resolves once the relay
    /// assigns an identity, or with the error that ended the attempt.
    pub fn connect(&mut self, waiter: Option<ConnectWaiter>) {
        match self.phase {
            Phase::Ready => {
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Ok(()));
                }
            }
            Phase::Opening | Phase::AwaitingIdentity => {
                self.waiters.extend(waiter);
            }
            Phase::Idle => {
                self.waiters.extend(waiter);
                self.start_attempt();
            }
        }
    }

    fn start_attempt(&mut self) {
        self.generation += 1;
        self.phase = Phase::Opening;
        self.reconnect_at = None;
        self.deadline = Some(Instant::now() + self.connect_timeout);

        let generation = self.generation;
        let open = self.connector.open(&self.url);
        let opened_tx = self.opened_tx.clone();
        tokio::spawn(async move {
            let _ = opened_tx.send((generation, open.await));
        });
        debug!(generation, url = %self.url, "opening relay socket");
    }

    /// Arm the reconnect timer.
    pub fn schedule_reconnect(&mut self, delay: Duration) {
        self.reconnect_at = Some(Instant::now() + delay);
    }

    /// Deliberate close: never triggers a reconnect and cancels pending `connect()` calls.
    pub fn close(&mut self) {
        if self.socket.is_some() || self.phase != Phase::Idle {
            info!("closing relay connection");
        }
        self.generation += 1;
        self.socket = None;
        self.phase = Phase::Idle;
        self.deadline = None;
        self.reconnect_at = None;
        self.reject_waiters(ConnectError::Cancelled);
    }

    /// Wait for the next thing the client task must react to. Cancel safe.
    pub async fn next_event(&mut self) -> TransportEvent {
        loop {
            tokio::select! {
                Some((generation, result)) = self.opened_rx.recv() => {
                    if let Some(event) = self.on_opened(generation, result) {
                        return event;
                    }
                }
                event = recv_socket(&mut self.socket) => {
                    return match event {
                        Some(SocketEvent::Frame(text)) => TransportEvent::Frame(text),
                        Some(SocketEvent::Closed { reason }) => self.on_socket_closed(reason),
                        None => self.on_socket_closed("socket dropped".into()),
                    };
                }
                () = sleep_until(self.deadline) => {
                    if let Some(event) = self.on_deadline() {
                        return event;
                    }
                }
                () = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    return TransportEvent::ReconnectDue;
                }
            }
        }
    }

    fn on_opened(&mut self, generation: u64, result: Result<Socket, ConnectError>) -> Option<TransportEvent> {
        if generation != self.generation || self.phase != Phase::Opening {
            debug!(generation, "discarding stale socket");
            return None;
        }
        match result {
            Ok(socket) => {
                debug!(generation, "socket open; waiting for identity");
                self.socket = Some(socket);
                self.phase = Phase::AwaitingIdentity;
                None
            }
            Err(error) => Some(self.fail_attempt(error)),
        }
    }

    fn on_deadline(&mut self) -> Option<TransportEvent> {
        self.deadline = None;
        if !self.is_connecting() {
            return None;
        }
        warn!(timeout_ms = self.connect_timeout.as_millis() as u64, "relay did not assign an identity in time");
        Some(self.fail_attempt(ConnectError::Timeout))
    }

    fn on_socket_closed(&mut self, reason: String) -> TransportEvent {
        if self.phase == Phase::Ready {
            self.socket = None;
            self.phase = Phase::Idle;
            TransportEvent::Closed { reason }
        } else {
            self.fail_attempt(ConnectError::Transport(reason))
        }
    }

    // Drop the socket (closing it) before reporting the failure.
    fn fail_attempt(&mut self, error: ConnectError) -> TransportEvent {
        self.socket = None;
        self.phase = Phase::Idle;
        self.deadline = None;
        self.reject_waiters(error.clone());
        TransportEvent::AttemptFailed(error)
    }

    fn reject_waiters(&mut self, error: ConnectError) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
    }
}

impl<C: Connector> RelayLink for TransportConnection<C> {
    fn send(&mut self, message: WsMessage) -> Result<(), WsMessage> {
        let Some(socket) = self.socket.as_ref().filter(|_| self.phase == Phase::Ready) else {
            return Err(message);
        };
        match encode_message(&message) {
            Ok(text) => {
                if socket.outbound.send(text).is_err() {
                    return Err(message);
                }
                Ok(())
            }
            Err(error) => {
                warn!(%error, "dropping unencodable message");
                Ok(())
            }
        }
    }

    fn mark_ready(&mut self) {
        if self.phase != Phase::AwaitingIdentity {
            debug!(phase = ?self.phase, "identity frame outside of connect");
        }
        self.phase = Phase::Ready;
        self.deadline = None;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }
}

async fn recv_socket(socket: &mut Option<Socket>) -> Option<SocketEvent> {
    match socket {
        Some(socket) => socket.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
