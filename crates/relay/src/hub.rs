// Relay hub: connected clients, channel membership and document state shared
// by every socket task.

use std::collections::{HashMap, HashSet};

use docsync_common::channel::validate_channel_name;
use docsync_common::protocol::ws::{WsMessage, JOIN_HISTORY_LIMIT};
use docsync_common::types::Change;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::docs::{Document, SnapshotVerdict};
use crate::storage::DocumentFiles;

#[derive(Debug)]
struct ClientSession {
    outbound: mpsc::UnboundedSender<WsMessage>,
    channels: HashSet<String>,
}

#[derive(Debug)]
pub struct Hub {
    clients: RwLock<HashMap<String, ClientSession>>,
    documents: RwLock<HashMap<String, Document>>,
    files: DocumentFiles,
    history_limit: usize,
}

impl Hub {
    pub fn new(files: DocumentFiles, history_limit: usize) -> Self {
        Self {
            clients: RwLock::default(),
            documents: RwLock::default(),
            files,
            history_limit,
        }
    }

    // ── Connections ─────────────────────────────────────────────────

    /// Register a new client. Its outbound queue starts with the `connected`
    /// frame carrying the assigned identity.
    pub async fn connect(&self) -> (String, mpsc::UnboundedReceiver<WsMessage>) {
        let client_id = format!("client_{}", Uuid::new_v4().simple());
        let (outbound, receiver) = mpsc::unbounded_channel();
        let _ = outbound.send(WsMessage::Assigned { client_id: client_id.clone() });
        self.clients
            .write()
            .await
            .insert(client_id.clone(), ClientSession { outbound, channels: HashSet::new() });
        info!(client_id = %client_id, "client connected");
        (client_id, receiver)
    }

    /// Drop a client and tell its channels' peers it left.
    pub async fn disconnect(&self, client_id: &str) {
        let Some(session) = self.clients.write().await.remove(client_id) else {
            return;
        };
        for channel in session.channels {
            self.broadcast(
                &channel,
                WsMessage::PeerLeft { channel: channel.clone(), client_id: client_id.to_string() },
                Some(client_id),
            )
            .await;
        }
        info!(client_id = %client_id, "client disconnected");
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Current content of a loaded document.
    pub async fn document(&self, channel: &str) -> Option<Value> {
        self.documents.read().await.get(channel).map(|doc| doc.data().clone())
    }

    // ── Inbound frames ──────────────────────────────────────────────

    pub async fn handle(&self, client_id: &str, message: WsMessage) {
        if let Some(channel) = message.channel() {
            if let Err(error) = validate_channel_name(channel) {
                warn!(client_id = %client_id, %error, kind = message.kind(), "rejecting frame for invalid channel");
                return;
            }
        }

        match message {
            WsMessage::Join { channel } => self.join(client_id, channel).await,
            WsMessage::Leave { channel } => self.leave(client_id, channel).await,
            WsMessage::FullSync { channel, snapshot, timestamp, .. } => {
                self.full_sync(client_id, channel, snapshot, timestamp).await
            }
            WsMessage::Change { channel, change } => self.change(client_id, channel, change).await,
            WsMessage::Undo { channel, change_id } => self.undo(client_id, channel, change_id).await,
            WsMessage::Redo { channel, change_id } => self.redo(client_id, channel, change_id).await,
            WsMessage::GetHistory { channel } => self.history(client_id, channel).await,
            other => debug!(client_id = %client_id, kind = other.kind(), "ignoring frame"),
        }
    }

    async fn join(&self, client_id: &str, channel: String) {
        {
            let mut clients = self.clients.write().await;
            let Some(session) = clients.get_mut(client_id) else {
                return;
            };
            session.channels.insert(channel.clone());
        }

        let reply = self
            .with_document(&channel, |doc| WsMessage::ChannelJoined {
                channel: channel.clone(),
                snapshot: doc.data().clone(),
                timestamp: doc.join_timestamp(),
                history: doc.recent_history(JOIN_HISTORY_LIMIT),
                last_operation_sequence: doc.sequence(),
            })
            .await;
        self.send_to(client_id, reply).await;
        info!(client_id = %client_id, channel = %channel, "client joined channel");

        self.broadcast(
            &channel,
            WsMessage::PeerJoined { channel: channel.clone(), client_id: client_id.to_string() },
            Some(client_id),
        )
        .await;
    }

    async fn leave(&self, client_id: &str, channel: String) {
        if let Some(session) = self.clients.write().await.get_mut(client_id) {
            session.channels.remove(&channel);
        }
        debug!(client_id = %client_id, channel = %channel, "client left channel");
        self.broadcast(
            &channel,
            WsMessage::PeerLeft { channel: channel.clone(), client_id: client_id.to_string() },
            Some(client_id),
        )
        .await;
    }

    async fn full_sync(&self, client_id: &str, channel: String, snapshot: Value, timestamp: f64) {
        if snapshot.is_null() {
            debug!(client_id = %client_id, channel = %channel, "ignoring empty snapshot");
            return;
        }

        let mut documents = self.documents.write().await;
        let doc = self.load_into(&mut documents, &channel).await;
        match doc.accept_snapshot(snapshot.clone(), timestamp) {
            SnapshotVerdict::Stale { current } => {
                debug!(channel = %channel, received = timestamp, current, "ignoring older snapshot");
                return;
            }
            SnapshotVerdict::Accepted => {}
        }
        self.persist(&channel, doc).await;
        drop(documents);

        self.broadcast(
            &channel,
            WsMessage::FullSync {
                channel: channel.clone(),
                snapshot,
                timestamp,
                origin_client_id: Some(client_id.to_string()),
            },
            Some(client_id),
        )
        .await;
    }

    async fn change(&self, client_id: &str, channel: String, change: Change) {
        let mut documents = self.documents.write().await;
        let doc = self.load_into(&mut documents, &channel).await;
        let change_id = change.id.clone();
        let stamped = match doc.apply_change(change, client_id) {
            Ok(Some(stamped)) => stamped,
            Ok(None) => {
                debug!(change_id = %change_id, "ignoring duplicate change");
                return;
            }
            Err(error) => {
                warn!(client_id = %client_id, channel = %channel, change_id = %change_id, %error, "change does not apply");
                return;
            }
        };
        self.persist(&channel, doc).await;
        drop(documents);

        self.broadcast(&channel, WsMessage::Change { channel: channel.clone(), change: stamped }, Some(client_id))
            .await;
    }

    async fn undo(&self, client_id: &str, channel: String, change_id: String) {
        let mut documents = self.documents.write().await;
        let doc = self.load_into(&mut documents, &channel).await;
        match doc.undo(&change_id) {
            Ok(true) => {}
            Ok(false) => {
                debug!(change_id = %change_id, "undo ignored; change unknown or already undone");
                return;
            }
            Err(error) => {
                warn!(client_id = %client_id, change_id = %change_id, %error, "undo does not apply");
                return;
            }
        }
        self.persist(&channel, doc).await;
        drop(documents);

        self.broadcast(&channel, WsMessage::Undo { channel: channel.clone(), change_id }, None).await;
    }

    async fn redo(&self, client_id: &str, channel: String, change_id: String) {
        let mut documents = self.documents.write().await;
        let doc = self.load_into(&mut documents, &channel).await;
        match doc.redo(&change_id) {
            Ok(true) => {}
            Ok(false) => {
                debug!(change_id = %change_id, "redo ignored; change unknown or not undone");
                return;
            }
            Err(error) => {
                warn!(client_id = %client_id, change_id = %change_id, %error, "redo does not apply");
                return;
            }
        }
        self.persist(&channel, doc).await;
        drop(documents);

        self.broadcast(&channel, WsMessage::Redo { channel: channel.clone(), change_id }, None).await;
    }

    async fn history(&self, client_id: &str, channel: String) {
        let history = self.with_document(&channel, Document::history).await;
        self.send_to(client_id, WsMessage::History { channel, history }).await;
    }

    // ── Documents ───────────────────────────────────────────────────

    async fn with_document<R>(&self, channel: &str, f: impl FnOnce(&Document) -> R) -> R {
        let mut documents = self.documents.write().await;
        let doc = self.load_into(&mut documents, channel).await;
        f(doc)
    }

    // Load from disk on first use. Unreadable files start as an empty document.
    async fn load_into<'a>(
        &self,
        documents: &'a mut HashMap<String, Document>,
        channel: &str,
    ) -> &'a mut Document {
        if !documents.contains_key(channel) {
            let doc = match self.files.load(channel).await {
                Ok(Some(stored)) => Document::from_stored(stored, self.history_limit),
                Ok(None) => Document::new(self.history_limit),
                Err(error) => {
                    warn!(channel = %channel, error = %format!("{error:#}"), "failed to load document; starting empty");
                    Document::new(self.history_limit)
                }
            };
            documents.insert(channel.to_string(), doc);
        }
        documents.entry(channel.to_string()).or_insert_with(|| Document::new(self.history_limit))
    }

    async fn persist(&self, channel: &str, doc: &Document) {
        if let Err(error) = self.files.save(channel, doc.data(), doc.timestamp()).await {
            warn!(channel = %channel, error = %format!("{error:#}"), "failed to persist document");
        }
    }

    // ── Fan-out ─────────────────────────────────────────────────────

    async fn send_to(&self, client_id: &str, message: WsMessage) {
        if let Some(session) = self.clients.read().await.get(client_id) {
            let _ = session.outbound.send(message);
        }
    }

    /// Send to every client on `channel` except `exclude`. Returns the number
    /// of recipients.
    async fn broadcast(&self, channel: &str, message: WsMessage, exclude: Option<&str>) -> usize {
        let recipients: Vec<mpsc::UnboundedSender<WsMessage>> = {
            let clients = self.clients.read().await;
            clients
                .iter()
                .filter(|(id, session)| {
                    Some(id.as_str()) != exclude && session.channels.contains(channel)
                })
                .map(|(_, session)| session.outbound.clone())
                .collect()
        };

        let mut sent_count = 0;
        for recipient in recipients {
            if recipient.send(message.clone()).is_ok() {
                sent_count += 1;
            }
        }
        sent_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_common::types::ChangeOperation;
    use serde_json::json;

    fn hub(dir: &tempfile::TempDir) -> Hub {
        Hub::new(DocumentFiles::new(dir.path()), 1000)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WsMessage>) -> Vec<WsMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    async fn joined_pair(hub: &Hub) -> ((String, mpsc::UnboundedReceiver<WsMessage>), (String, mpsc::UnboundedReceiver<WsMessage>)) {
        let (a, mut a_rx) = hub.connect().await;
        let (b, mut b_rx) = hub.connect().await;
        hub.handle(&a, WsMessage::Join { channel: "doc".into() }).await;
        hub.handle(&b, WsMessage::Join { channel: "doc".into() }).await;
        drain(&mut a_rx);
        drain(&mut b_rx);
        ((a, a_rx), (b, b_rx))
    }

    #[tokio::test]
    async fn connect_queues_identity_frame() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let hub = hub(&dir);
        let (client_id, mut rx) = hub.connect().await;

        assert!(client_id.starts_with("client_"));
        assert_eq!(drain(&mut rx), vec![WsMessage::Assigned { client_id }]);
        assert_eq!(hub.client_count().await, 1);
    }

    #[tokio::test]
    async fn join_replies_with_snapshot_and_notifies_peers() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        std::fs::write(dir.path().join("doc"), r#"{ "title": "saved", "_lastSyncTimestamp": 42.0 }"#)
            .expect("fixture should be written");
        let hub = hub(&dir);
        let (a, mut a_rx) = hub.connect().await;
        let (b, mut b_rx) = hub.connect().await;
        hub.handle(&a, WsMessage::Join { channel: "doc".into() }).await;
        drain(&mut a_rx);

        hub.handle(&b, WsMessage::Join { channel: "doc".into() }).await;

        match drain(&mut b_rx).pop() {
            Some(WsMessage::ChannelJoined { channel, snapshot, timestamp, history, last_operation_sequence }) => {
                assert_eq!(channel, "doc");
                assert_eq!(snapshot, json!({ "title": "saved" }));
                assert_eq!(timestamp, 42.0);
                assert!(history.is_empty());
                assert_eq!(last_operation_sequence, 0);
            }
            other => panic!("expected file_joined, got {other:?}"),
        }
        assert_eq!(
            drain(&mut a_rx),
            vec![WsMessage::PeerJoined { channel: "doc".into(), client_id: b }]
        );
    }

    #[tokio::test]
    async fn change_is_relayed_to_peers_only_and_persisted() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let hub = hub(&dir);
        let ((a, mut a_rx), (_b, mut b_rx)) = joined_pair(&hub).await;

        let change = Change::with_id("c-1", ChangeOperation::set(vec!["title".into()], json!("hi")));
        hub.handle(&a, WsMessage::Change { channel: "doc".into(), change }).await;

        assert!(drain(&mut a_rx).is_empty(), "sender must not get its own change back");
        match drain(&mut b_rx).as_slice() {
            [WsMessage::Change { change, .. }] => {
                assert_eq!(change.id, "c-1");
                assert_eq!(change.origin_client_id.as_deref(), Some(a.as_str()));
                assert_eq!(change.sequence, Some(1));
            }
            other => panic!("expected one relayed change, got {other:?}"),
        }
        assert_eq!(hub.document("doc").await, Some(json!({ "title": "hi" })));
        let raw = std::fs::read_to_string(dir.path().join("doc")).expect("document should be persisted");
        assert!(raw.contains("\"hi\""));
    }

    #[tokio::test]
    async fn undo_reaches_everyone_and_ignores_repeats() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let hub = hub(&dir);
        let ((a, mut a_rx), (_b, mut b_rx)) = joined_pair(&hub).await;
        let change = Change::with_id("c-1", ChangeOperation::set(vec!["n".into()], json!(1)));
        hub.handle(&a, WsMessage::Change { channel: "doc".into(), change }).await;
        drain(&mut b_rx);

        let undo = WsMessage::Undo { channel: "doc".into(), change_id: "c-1".into() };
        hub.handle(&a, undo.clone()).await;
        hub.handle(&a, undo.clone()).await;

        assert_eq!(drain(&mut a_rx), vec![undo.clone()]);
        assert_eq!(drain(&mut b_rx), vec![undo]);
        assert_eq!(hub.document("doc").await, Some(json!({})));

        let redo = WsMessage::Redo { channel: "doc".into(), change_id: "c-1".into() };
        hub.handle(&a, redo.clone()).await;
        assert_eq!(drain(&mut b_rx), vec![redo]);
        assert_eq!(hub.document("doc").await, Some(json!({ "n": 1 })));
    }

    #[tokio::test]
    async fn stale_full_sync_is_dropped() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let hub = hub(&dir);
        let ((a, _a_rx), (b, mut b_rx)) = joined_pair(&hub).await;

        hub.handle(&a, WsMessage::FullSync {
            channel: "doc".into(),
            snapshot: json!({ "v": 2 }),
            timestamp: 200.0,
            origin_client_id: None,
        })
        .await;
        assert_eq!(
            drain(&mut b_rx),
            vec![WsMessage::FullSync {
                channel: "doc".into(),
                snapshot: json!({ "v": 2 }),
                timestamp: 200.0,
                origin_client_id: Some(a.clone()),
            }]
        );

        hub.handle(&b, WsMessage::FullSync {
            channel: "doc".into(),
            snapshot: json!({ "v": 1 }),
            timestamp: 100.0,
            origin_client_id: None,
        })
        .await;
        assert_eq!(hub.document("doc").await, Some(json!({ "v": 2 })));
    }

    #[tokio::test]
    async fn disconnect_notifies_channel_peers() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let hub = hub(&dir);
        let ((a, _a_rx), (b, mut b_rx)) = joined_pair(&hub).await;

        hub.disconnect(&a).await;

        assert_eq!(drain(&mut b_rx), vec![WsMessage::PeerLeft { channel: "doc".into(), client_id: a }]);
        assert_eq!(hub.client_count().await, 1);
        hub.disconnect(&b).await;
        assert_eq!(hub.client_count().await, 0);
    }

    #[tokio::test]
    async fn invalid_channel_names_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let hub = hub(&dir);
        let (a, mut a_rx) = hub.connect().await;
        drain(&mut a_rx);

        hub.handle(&a, WsMessage::Join { channel: "../escape".into() }).await;

        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(hub.document("../escape").await, None);
    }

    #[tokio::test]
    async fn history_request_returns_full_history() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let hub = hub(&dir);
        let ((a, mut a_rx), _) = joined_pair(&hub).await;
        for n in 0..3 {
            let change = Change::with_id(format!("c-{n}"), ChangeOperation::set(vec!["n".into()], json!(n)));
            hub.handle(&a, WsMessage::Change { channel: "doc".into(), change }).await;
        }

        hub.handle(&a, WsMessage::GetHistory { channel: "doc".into() }).await;

        match drain(&mut a_rx).as_slice() {
            [WsMessage::History { history, .. }] => assert_eq!(history.len(), 3),
            other => panic!("expected history reply, got {other:?}"),
        }
    }
}
