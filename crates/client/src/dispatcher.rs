// Dispatcher: decodes relay frames and routes them through the session state,
// the change coordinator and the document collaborators.
//
// Owns every piece of sync state so one `&mut` borrow covers a whole handler
// invocation. Local commands enter here too, so inbound and outbound paths
// share the same session and re-entrancy guard.

use docsync_common::protocol::ws::{decode_message, WsMessage};
use docsync_common::types::{Change, HistoryEntry};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::collab::{Completion, DocumentHistory, DocumentStore};
use crate::coordinator::ChangeCoordinator;
use crate::event::{EventSink, SyncEvent};
use crate::session::SessionState;
use crate::transport::RelayLink;

// ── Re-entrancy guard ───────────────────────────────────────────────

/// Holds the session's "applying remote operation" flag up until every
/// collaborator completion from remote mutations has resolved.
#[derive(Debug, Default)]
pub struct RemoteApplyGuard {
    pending: FuturesUnordered<oneshot::Receiver<()>>,
}

impl RemoteApplyGuard {
    pub fn enter(&mut self, session: &mut SessionState) {
        session.set_applying_remote_operation(true);
    }

    /// Track the mutation's completion and drop the flag if nothing is outstanding.
    pub fn hold(&mut self, session: &mut SessionState, completion: Option<Completion>) {
        if let Some(receiver) = completion.and_then(Completion::into_receiver) {
            self.pending.push(receiver);
        }
        self.release_if_settled(session);
    }

    pub fn release_if_settled(&mut self, session: &mut SessionState) {
        if self.pending.is_empty() {
            session.set_applying_remote_operation(false);
        }
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Resolves when one outstanding completion fires (or its signal is
    /// dropped). Never resolves while nothing is outstanding.
    pub async fn next_settled(&mut self) {
        if self.pending.is_empty() {
            std::future::pending::<()>().await;
        }
        let _ = self.pending.next().await;
    }
}

// ── Snapshot outcome ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Applied,
    /// Content already matched the local document.
    Unchanged,
    /// Older than or as old as the newest snapshot seen for the channel.
    Stale,
    Failed,
}

// ── Dispatcher ──────────────────────────────────────────────────────

pub struct Dispatcher<S, H> {
    session: SessionState,
    coordinator: ChangeCoordinator,
    store: S,
    history: H,
    guard: RemoteApplyGuard,
    events: EventSink,
}

impl<S: DocumentStore, H: DocumentHistory> Dispatcher<S, H> {
    pub fn new(session: SessionState, store: S, history: H, events: EventSink) -> Self {
        Self {
            session,
            coordinator: ChangeCoordinator::new(),
            store,
            history,
            guard: RemoteApplyGuard::default(),
            events,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    pub fn coordinator(&self) -> &ChangeCoordinator {
        &self.coordinator
    }

    pub fn guard(&self) -> &RemoteApplyGuard {
        &self.guard
    }

    pub fn emit(&self, event: SyncEvent) {
        self.events.emit(event);
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Decode and dispatch one text frame. Malformed frames are dropped.
    pub fn handle_frame<L: RelayLink>(&mut self, raw: &str, link: &mut L) {
        match decode_message(raw) {
            Ok(message) => self.handle_message(message, link),
            Err(error) => warn!(%error, "dropping malformed frame"),
        }
    }

    pub fn handle_message<L: RelayLink>(&mut self, message: WsMessage, link: &mut L) {
        match message {
            WsMessage::Assigned { client_id } => self.on_assigned(client_id, link),
            WsMessage::ChannelJoined { channel, snapshot, timestamp, history, last_operation_sequence } => {
                self.on_channel_joined(channel, snapshot, timestamp, history, last_operation_sequence)
            }
            WsMessage::FullSync { channel, snapshot, timestamp, origin_client_id } => {
                self.on_full_sync(channel, snapshot, timestamp, origin_client_id)
            }
            WsMessage::Change { channel, change } => self.on_remote_change(channel, change),
            WsMessage::Undo { channel, change_id } => {
                if !self.accepts(&channel, "undo") {
                    return;
                }
                self.guard.enter(&mut self.session);
                let outcome = self.coordinator.handle_remote_undo(&mut self.history, &channel, &change_id);
                self.finish_remote(&channel, outcome);
            }
            WsMessage::Redo { channel, change_id } => {
                if !self.accepts(&channel, "redo") {
                    return;
                }
                self.guard.enter(&mut self.session);
                let outcome = self.coordinator.handle_remote_redo(&mut self.history, &channel, &change_id);
                self.finish_remote(&channel, outcome);
            }
            WsMessage::PeerJoined { channel, client_id } => {
                info!(channel = %channel, client_id = %client_id, "peer joined");
                self.events.emit(SyncEvent::PeerJoined { channel, client_id });
            }
            WsMessage::PeerLeft { channel, client_id } => {
                info!(channel = %channel, client_id = %client_id, "peer left");
                self.events.emit(SyncEvent::PeerLeft { channel, client_id });
            }
            WsMessage::History { channel, history } => {
                debug!(channel = %channel, entries = history.len(), "history received");
                self.events.emit(SyncEvent::HistoryReceived { channel, entries: history });
            }
            WsMessage::Join { .. } | WsMessage::Leave { .. } | WsMessage::GetHistory { .. } => {
                debug!(kind = message.kind(), "ignoring relay-bound message");
            }
            WsMessage::Unknown => debug!("ignoring unknown message type"),
        }
    }

    fn on_assigned<L: RelayLink>(&mut self, client_id: String, link: &mut L) {
        info!(client_id = %client_id, "relay assigned identity");
        self.session.set_client_id(Some(client_id.clone()));
        self.session.set_connection_state(true);
        link.mark_ready();

        self.coordinator.flush_pending(&self.session, link);
        if let Some(channel) = self.session.take_pending_file_join() {
            self.coordinator.join_channel(&mut self.session, link, &channel);
        }
        self.events.emit(SyncEvent::Connected { client_id });
    }

    fn on_channel_joined(
        &mut self,
        channel: String,
        snapshot: Value,
        timestamp: f64,
        history: Vec<HistoryEntry>,
        last_operation_sequence: u64,
    ) {
        let expected = self.session.is_active_channel(&channel)
            || self.session.pending_file_join() == Some(channel.as_str());
        if !expected {
            debug!(channel = %channel, "discarding snapshot for a channel we are not on");
            return;
        }

        self.session.update_last_synced_sequence(last_operation_sequence);
        self.coordinator.seed_history(&mut self.history, &channel, &history);
        match self.apply_snapshot(&channel, snapshot, timestamp) {
            SnapshotOutcome::Applied | SnapshotOutcome::Unchanged => {
                self.session.mark_file_synced(&channel)
            }
            SnapshotOutcome::Stale | SnapshotOutcome::Failed => {}
        }
    }

    fn on_full_sync(
        &mut self,
        channel: String,
        snapshot: Value,
        timestamp: f64,
        origin_client_id: Option<String>,
    ) {
        if origin_client_id.is_some() && origin_client_id.as_deref() == self.session.client_id() {
            debug!(channel = %channel, "ignoring our own full sync");
            return;
        }
        if !self.accepts(&channel, "full_sync") {
            return;
        }
        self.apply_snapshot(&channel, snapshot, timestamp);
    }

    fn on_remote_change(&mut self, channel: String, change: Change) {
        if !self.accepts(&channel, "change") {
            return;
        }
        if let Some(sequence) = change.sequence {
            self.session.update_last_synced_sequence(sequence);
        }
        if change.origin_client_id.is_some()
            && change.origin_client_id.as_deref() == self.session.client_id()
        {
            debug!(change_id = %change.id, "ignoring our own change");
            return;
        }

        self.guard.enter(&mut self.session);
        let outcome = self.coordinator.apply_remote_change(&mut self.history, &channel, &change);
        self.finish_remote(&channel, outcome);
    }

    /// Whole-document last-writer-wins application.
    pub fn apply_snapshot(&mut self, channel: &str, snapshot: Value, timestamp: f64) -> SnapshotOutcome {
        if let Some(last) = self.session.last_snapshot_timestamp(channel) {
            if timestamp <= last {
                debug!(channel = %channel, timestamp, last, "ignoring stale snapshot");
                return SnapshotOutcome::Stale;
            }
        }

        let current = match self.store.load(channel) {
            Ok(current) => current,
            Err(error) => {
                warn!(channel = %channel, %error, "failed to load document for comparison");
                None
            }
        };
        if current.as_ref() == Some(&snapshot) {
            debug!(channel = %channel, "snapshot matches local content");
            self.session.record_snapshot_timestamp(channel, timestamp);
            return SnapshotOutcome::Unchanged;
        }

        self.guard.enter(&mut self.session);
        match self.store.save(channel, snapshot) {
            Ok(completion) => {
                self.guard.hold(&mut self.session, Some(completion));
                self.session.record_snapshot_timestamp(channel, timestamp);
                self.events.emit(SyncEvent::RenderRequested { channel: channel.to_string() });
                SnapshotOutcome::Applied
            }
            Err(error) => {
                self.guard.release_if_settled(&mut self.session);
                warn!(channel = %channel, %error, "failed to save snapshot");
                SnapshotOutcome::Failed
            }
        }
    }

    fn accepts(&self, channel: &str, kind: &str) -> bool {
        if self.session.is_active_channel(channel) {
            return true;
        }
        debug!(channel = %channel, kind, "ignoring message for inactive channel");
        false
    }

    fn finish_remote(&mut self, channel: &str, outcome: Option<Completion>) {
        let applied = outcome.is_some();
        self.guard.hold(&mut self.session, outcome);
        if applied {
            self.events.emit(SyncEvent::RenderRequested { channel: channel.to_string() });
        }
    }

    // ── Guard completion ────────────────────────────────────────────

    pub async fn guard_settled(&mut self) {
        self.guard.next_settled().await;
    }

    pub fn release_guard_if_settled(&mut self) {
        self.guard.release_if_settled(&mut self.session);
    }

    // ── Connection lifecycle ────────────────────────────────────────

    /// An established connection dropped. The active channel becomes the
    /// pending join so it is rejoined after reconnecting.
    pub fn on_connection_lost(&mut self, reason: &str) {
        self.session.set_connection_state(false);
        self.session.set_client_id(None);
        if let Some(channel) = self.session.active_channel().map(str::to_string) {
            if self.session.pending_file_join().is_none() {
                self.session.set_pending_file_join(Some(channel));
            }
            self.session.set_active_channel(None);
        }
        self.events.emit(SyncEvent::Disconnected { reason: reason.to_string() });
    }

    /// A connect attempt failed before the relay assigned an identity.
    pub fn on_attempt_failed(&mut self) {
        self.session.set_connection_state(false);
        self.session.set_client_id(None);
    }

    /// The application closed the connection.
    pub fn on_closed_by_client(&mut self) {
        let was_connected = self.session.is_connected();
        self.session.set_connection_state(false);
        self.session.set_client_id(None);
        self.session.set_active_channel(None);
        if was_connected {
            self.events.emit(SyncEvent::Disconnected { reason: "closed by client".into() });
        }
    }

    // ── Local commands ──────────────────────────────────────────────

    pub fn join_channel<L: RelayLink>(&mut self, link: &mut L, channel: &str) {
        self.coordinator.join_channel(&mut self.session, link, channel);
    }

    pub fn leave_channel<L: RelayLink>(&mut self, link: &mut L, channel: &str) {
        self.coordinator.leave_channel(&mut self.session, link, channel);
    }

    pub fn send_change<L: RelayLink>(&mut self, link: &mut L, channel: Option<String>, change: Change) {
        self.coordinator.send_change(&mut self.session, link, channel, change);
    }

    pub fn send_undo<L: RelayLink>(&mut self, link: &mut L, change_id: &str) {
        self.coordinator.send_undo(&self.session, link, change_id);
    }

    pub fn send_redo<L: RelayLink>(&mut self, link: &mut L, change_id: &str) {
        self.coordinator.send_redo(&self.session, link, change_id);
    }

    pub fn publish_snapshot<L: RelayLink>(&mut self, link: &mut L, channel: &str) {
        self.coordinator.publish_snapshot(&mut self.session, link, &mut self.store, channel);
    }

    pub fn request_history<L: RelayLink>(&mut self, link: &mut L, channel: &str) {
        self.coordinator.request_history(link, channel);
    }
}
