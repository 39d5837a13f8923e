// Change coordinator: mediates between local document mutations and the relay.
//
// Outbound: channel join/leave, change submission with FIFO buffering while
// the connection or channel isn't ready, undo/redo requests, snapshot
// publication. Inbound: idempotent application of remote changes, undos and
// redos through the document-history collaborator.

use std::collections::HashSet;

use docsync_common::protocol::ws::WsMessage;
use docsync_common::types::{now_millis, Change, HistoryEntry};
use tracing::{debug, warn};

use crate::collab::{Completion, DocumentHistory, DocumentStore};
use crate::outbox::{Outbox, PendingSend};
use crate::session::SessionState;
use crate::transport::RelayLink;

/// Change ids this client has applied or seen undone.
#[derive(Debug, Default)]
struct ChangeLedger {
    applied: HashSet<String>,
    undone: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct ChangeCoordinator {
    outbox: Outbox,
    ledger: ChangeLedger,
}

impl ChangeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn pending_len(&self) -> usize {
        self.outbox.len()
    }

    pub fn is_undone(&self, change_id: &str) -> bool {
        self.ledger.undone.contains(change_id)
    }

    // ── Channels ────────────────────────────────────────────────────

    /// Join `name`, leaving the previous channel. Before identity assignment
    /// the join is recorded and executed once the relay assigns one.
    pub fn join_channel<L: RelayLink>(&mut self, session: &mut SessionState, link: &mut L, name: &str) {
        if !session.is_identified() {
            debug!(channel = %name, "not identified yet; recording pending join");
            session.set_pending_file_join(Some(name.to_string()));
            return;
        }
        if session.is_active_channel(name) && session.has_synced_file(name) {
            debug!(channel = %name, "channel already joined and synced");
            return;
        }

        if let Some(previous) = session.active_channel().filter(|active| *active != name) {
            let previous = previous.to_string();
            debug!(channel = %previous, "leaving previous channel");
            self.transmit(link, WsMessage::Leave { channel: previous });
        }
        if session.pending_file_join() == Some(name) {
            session.set_pending_file_join(None);
        }

        self.transmit(link, WsMessage::Join { channel: name.to_string() });
        session.set_active_channel(Some(name.to_string()));
        self.flush_pending(session, link);
    }

    /// Leave `name`. The relay is told only when connected and `name` is the
    /// active channel.
    pub fn leave_channel<L: RelayLink>(&mut self, session: &mut SessionState, link: &mut L, name: &str) {
        if session.pending_file_join() == Some(name) {
            session.set_pending_file_join(None);
        }
        if !session.is_active_channel(name) {
            debug!(channel = %name, "leave ignored; channel is not active");
            return;
        }
        if session.is_identified() {
            self.transmit(link, WsMessage::Leave { channel: name.to_string() });
        }
        session.set_active_channel(None);
    }

    // ── Changes ─────────────────────────────────────────────────────

    /// Submit a local change. Sent immediately when connected, identified
    /// and on a channel with nothing queued ahead of it; queued otherwise.
    pub fn send_change<L: RelayLink>(
        &mut self,
        session: &mut SessionState,
        link: &mut L,
        channel: Option<String>,
        change: Change,
    ) {
        if session.is_applying_remote_operation() {
            debug!(change_id = %change.id, "suppressing change raised while applying remote operation");
            return;
        }

        self.ledger.applied.insert(change.id.clone());
        let channel = channel
            .or_else(|| session.active_channel().map(str::to_string))
            .or_else(|| session.pending_file_join().map(str::to_string));
        self.outbox.push(PendingSend::Change { channel, change });

        if session.is_identified() {
            self.flush_pending(session, link);
        } else {
            debug!(pending = self.outbox.len(), "not connected; change queued");
        }
    }

    /// Release queued sends in submission order. Stops (keeping the rest
    /// queued) at a change with no channel to send it on, or when the link
    /// is not ready. Returns the number of items sent.
    pub fn flush_pending<L: RelayLink>(&mut self, session: &SessionState, link: &mut L) -> usize {
        let mut released = 0;
        while let Some(item) = self.outbox.pop() {
            let message = match item {
                PendingSend::Message(message) => message,
                PendingSend::Change { channel, change } => {
                    match channel.or_else(|| session.active_channel().map(str::to_string)) {
                        Some(channel) if !awaiting_join(session, &channel) => {
                            WsMessage::Change { channel, change }
                        }
                        channel => {
                            debug!(change_id = %change.id, "channel not joined yet; holding queue");
                            self.outbox.requeue_front(PendingSend::Change { channel, change });
                            break;
                        }
                    }
                }
            };

            if let Err(message) = link.send(message) {
                self.outbox.requeue_front(PendingSend::Message(message));
                break;
            }
            released += 1;
        }

        if released > 0 {
            debug!(released, remaining = self.outbox.len(), "flushed pending sends");
        }
        released
    }

    // ── Undo / redo requests ────────────────────────────────────────

    /// Broadcast a local undo. Offline undos stay local; they are never queued.
    pub fn send_undo<L: RelayLink>(&mut self, session: &SessionState, link: &mut L, change_id: &str) {
        self.ledger.undone.insert(change_id.to_string());
        let Some(channel) = ready_channel(session) else {
            debug!(change_id, "not connected to a channel; undo stays local");
            return;
        };
        let message = WsMessage::Undo { channel, change_id: change_id.to_string() };
        if link.send(message).is_err() {
            debug!(change_id, "connection not ready; undo stays local");
        }
    }

    /// Broadcast a local redo. Same delivery rules as [`Self::send_undo`].
    pub fn send_redo<L: RelayLink>(&mut self, session: &SessionState, link: &mut L, change_id: &str) {
        self.ledger.undone.remove(change_id);
        let Some(channel) = ready_channel(session) else {
            debug!(change_id, "not connected to a channel; redo stays local");
            return;
        };
        let message = WsMessage::Redo { channel, change_id: change_id.to_string() };
        if link.send(message).is_err() {
            debug!(change_id, "connection not ready; redo stays local");
        }
    }

    // ── Snapshots and history ───────────────────────────────────────

    /// Broadcast the stored content of `channel` as a whole-document sync.
    pub fn publish_snapshot<L: RelayLink, S: DocumentStore>(
        &mut self,
        session: &mut SessionState,
        link: &mut L,
        store: &mut S,
        channel: &str,
    ) {
        if session.is_applying_remote_operation() {
            debug!(channel = %channel, "suppressing snapshot raised while applying remote operation");
            return;
        }
        let snapshot = match store.load(channel) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!(channel = %channel, "nothing stored to publish");
                return;
            }
            Err(error) => {
                warn!(channel = %channel, %error, "failed to load document for publishing");
                return;
            }
        };

        let timestamp = now_millis();
        session.record_snapshot_timestamp(channel, timestamp);
        let message = WsMessage::FullSync {
            channel: channel.to_string(),
            snapshot,
            timestamp,
            origin_client_id: session.client_id().map(str::to_string),
        };
        self.transmit(link, message);
    }

    pub fn request_history<L: RelayLink>(&mut self, link: &mut L, channel: &str) {
        self.transmit(link, WsMessage::GetHistory { channel: channel.to_string() });
    }

    /// Seed the ledger and the history collaborator from a join snapshot's
    /// history, which the snapshot content already reflects.
    pub fn seed_history<H: DocumentHistory>(
        &mut self,
        history: &mut H,
        channel: &str,
        entries: &[HistoryEntry],
    ) {
        history.record_history(channel, entries);
        for entry in entries {
            self.ledger.applied.insert(entry.change.id.clone());
            if entry.undone {
                self.ledger.undone.insert(entry.change.id.clone());
            } else {
                self.ledger.undone.remove(&entry.change.id);
            }
        }
    }

    // ── Remote operations ───────────────────────────────────────────

    /// Apply a relayed change once. Returns the collaborator's completion
    /// when the document was mutated.
    pub fn apply_remote_change<H: DocumentHistory>(
        &mut self,
        history: &mut H,
        channel: &str,
        change: &Change,
    ) -> Option<Completion> {
        if !self.ledger.applied.insert(change.id.clone()) {
            debug!(change_id = %change.id, "change already applied");
            return None;
        }
        match history.apply_change(channel, change) {
            Ok(completion) => Some(completion),
            Err(error) => {
                self.ledger.applied.remove(&change.id);
                warn!(change_id = %change.id, %error, "failed to apply remote change");
                None
            }
        }
    }

    /// Undo a change on behalf of a peer, unless it is already undone here.
    pub fn handle_remote_undo<H: DocumentHistory>(
        &mut self,
        history: &mut H,
        channel: &str,
        change_id: &str,
    ) -> Option<Completion> {
        if self.ledger.undone.contains(change_id) {
            debug!(change_id, "change already undone");
            return None;
        }
        match history.undo_change(channel, change_id) {
            Ok(completion) => {
                self.ledger.undone.insert(change_id.to_string());
                Some(completion)
            }
            Err(error) => {
                warn!(change_id, %error, "failed to undo remote change");
                None
            }
        }
    }

    /// Redo a change on behalf of a peer, only if it is currently undone here.
    pub fn handle_remote_redo<H: DocumentHistory>(
        &mut self,
        history: &mut H,
        channel: &str,
        change_id: &str,
    ) -> Option<Completion> {
        if !self.ledger.undone.contains(change_id) {
            debug!(change_id, "change is not undone; ignoring redo");
            return None;
        }
        match history.redo_change(channel, change_id) {
            Ok(completion) => {
                self.ledger.undone.remove(change_id);
                Some(completion)
            }
            Err(error) => {
                warn!(change_id, %error, "failed to redo remote change");
                None
            }
        }
    }

    // Send now or queue for after identity assignment.
    fn transmit<L: RelayLink>(&mut self, link: &mut L, message: WsMessage) {
        if let Err(message) = link.send(message) {
            debug!(kind = message.kind(), "connection not ready; queueing message");
            self.outbox.push(PendingSend::Message(message));
        }
    }
}

fn ready_channel(session: &SessionState) -> Option<String> {
    if !session.is_identified() {
        return None;
    }
    session.active_channel().map(str::to_string)
}

// Changes for a channel whose join has not been sent yet go out after the join.
fn awaiting_join(session: &SessionState, channel: &str) -> bool {
    session.pending_file_join() == Some(channel) && !session.is_active_channel(channel)
}
