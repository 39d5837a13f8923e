// Notifications from the sync core to the application.

use std::time::Duration;

use docsync_common::types::HistoryEntry;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The relay assigned an identity; the connection is ready.
    Connected { client_id: String },
    /// The connection dropped or was closed.
    Disconnected { reason: String },
    /// An automatic reconnect will be attempted after `delay`.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Automatic reconnects are exhausted. Only an explicit `connect()` recovers.
    ReconnectFailed { attempts: u32 },
    /// A remote mutation was accepted into the local document.
    RenderRequested { channel: String },
    PeerJoined { channel: String, client_id: String },
    PeerLeft { channel: String, client_id: String },
    HistoryReceived { channel: String, entries: Vec<HistoryEntry> },
}

/// Sending half of the event stream. Events are dropped once the
/// application stops listening.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SyncEvent>,
}

impl EventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }
}
