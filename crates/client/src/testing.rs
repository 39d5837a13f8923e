// Test doubles: an in-process relay link and a channel-backed connector.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use docsync_common::protocol::ws::{decode_message, encode_message, WsMessage};
use futures_util::future::{self, BoxFuture, FutureExt};
use tokio::sync::mpsc;

use crate::error::ConnectError;
use crate::transport::{Connector, RelayLink, Socket, SocketEvent};

/// Records everything sent while ready; hands messages back otherwise.
#[derive(Debug, Default)]
pub struct RecordingLink {
    pub ready: bool,
    pub sent: Vec<WsMessage>,
    pub ready_calls: usize,
}

impl RecordingLink {
    pub fn ready() -> Self {
        Self { ready: true, ..Self::default() }
    }
}

impl RelayLink for RecordingLink {
    fn send(&mut self, message: WsMessage) -> Result<(), WsMessage> {
        if !self.ready {
            return Err(message);
        }
        self.sent.push(message);
        Ok(())
    }

    fn mark_ready(&mut self) {
        self.ready = true;
        self.ready_calls += 1;
    }
}

/// Connector whose sockets are plain channels. Each successful `open` hands the
/// relay side of the socket to the test through the receiver from `new`.
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    remotes: mpsc::UnboundedSender<RemoteEnd>,
    failures: Arc<Mutex<VecDeque<String>>>,
}

impl ChannelConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        (Self { remotes, failures: Arc::default() }, rx)
    }

    /// Make the next `open` fail with a transport error.
    pub fn fail_next(&self, reason: &str) {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).push_back(reason.to_string());
    }
}

impl Connector for ChannelConnector {
    fn open(&self, _url: &str) -> BoxFuture<'static, Result<Socket, ConnectError>> {
        let failure = self.failures.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        if let Some(reason) = failure {
            return future::ready(Err(ConnectError::Transport(reason))).boxed();
        }

        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let _ = self.remotes.send(RemoteEnd { to_client, from_client });
        future::ready(Ok(Socket { outbound, inbound })).boxed()
    }
}

/// The relay's side of a test socket.
#[derive(Debug)]
pub struct RemoteEnd {
    to_client: mpsc::UnboundedSender<SocketEvent>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl RemoteEnd {
    pub fn push_frame(&self, text: &str) {
        let _ = self.to_client.send(SocketEvent::Frame(text.to_string()));
    }

    pub fn push(&self, message: &WsMessage) {
        let text = encode_message(message).expect("test message should encode");
        self.push_frame(&text);
    }

    pub fn close(&self, reason: &str) {
        let _ = self.to_client.send(SocketEvent::Closed { reason: reason.to_string() });
    }

    /// Next frame the client sent, or `None` once the client dropped the socket.
    pub async fn next_sent(&mut self) -> Option<WsMessage> {
        let text = self.from_client.recv().await?;
        Some(decode_message(&text).expect("client frame should decode"))
    }

    /// True once the client dropped its end. Discards unread frames.
    pub async fn is_closed(&mut self) -> bool {
        loop {
            match self.from_client.try_recv() {
                Ok(_) => continue,
                Err(mpsc::error::TryRecvError::Empty) => return false,
                Err(mpsc::error::TryRecvError::Disconnected) => return true,
            }
        }
    }
}
