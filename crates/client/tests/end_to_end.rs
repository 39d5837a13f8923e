// Sync clients talking to a live relay over real WebSockets.

use std::sync::Arc;
use std::time::Duration;

use docsync_client::transport::WsConnector;
use docsync_client::{
    ClientConfig, DocumentHistory, MemoryWorkspace, SyncClient, SyncEvent, SyncHandle,
};
use docsync_common::types::ChangeOperation;
use docsync_relay::{serve, DocumentFiles, Hub};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

struct Peer {
    handle: SyncHandle,
    events: UnboundedReceiver<SyncEvent>,
    workspace: MemoryWorkspace,
}

async fn start_relay(dir: &std::path::Path) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
    let addr = listener.local_addr().expect("listener should expose local address");
    let hub = Arc::new(Hub::new(DocumentFiles::new(dir), 1000));
    tokio::spawn(async move {
        serve(listener, hub, std::future::pending()).await.expect("relay should run for test");
    });
    format!("ws://{addr}/ws")
}

fn config(url: &str) -> ClientConfig {
    ClientConfig {
        relay_url: url.to_string(),
        connect_timeout_ms: 2_000,
        reconnect_base_delay_ms: 50,
        ..ClientConfig::default()
    }
}

async fn peer(url: &str, channel: &str) -> Peer {
    let workspace = MemoryWorkspace::new();
    let (handle, mut events) =
        SyncClient::spawn(&config(url), WsConnector::new(), workspace.clone(), workspace.clone())
            .expect("client should start");
    handle.connect().await.expect("client should connect to relay");
    handle.join_channel(channel).expect("client should accept commands");
    wait_for(&mut events, |event| matches!(event, SyncEvent::RenderRequested { .. })).await;
    Peer { handle, events, workspace }
}

async fn wait_for<F>(events: &mut UnboundedReceiver<SyncEvent>, mut matches: F) -> SyncEvent
where
    F: FnMut(&SyncEvent) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream should stay open");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for sync event")
}

async fn wait_for_render(peer: &mut Peer) {
    wait_for(&mut peer.events, |event| matches!(event, SyncEvent::RenderRequested { .. })).await;
}

#[tokio::test]
async fn change_undo_and_redo_reach_the_other_client() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let url = start_relay(dir.path()).await;
    let mut alice = peer(&url, "notes").await;
    let mut bob = peer(&url, "notes").await;

    let change = alice
        .workspace
        .edit("notes", ChangeOperation::set(vec!["title".into()], json!("draft")))
        .expect("local edit should apply");
    alice.handle.send_change(change.clone()).expect("client should accept commands");

    wait_for_render(&mut bob).await;
    assert_eq!(bob.workspace.document("notes"), Some(json!({ "title": "draft" })));

    alice.workspace.clone().undo_change("notes", &change.id).expect("local undo should apply");
    alice.handle.send_undo(&change.id).expect("client should accept commands");
    wait_for_render(&mut bob).await;
    assert_eq!(bob.workspace.document("notes"), Some(json!({})));

    alice.workspace.clone().redo_change("notes", &change.id).expect("local redo should apply");
    alice.handle.send_redo(&change.id).expect("client should accept commands");
    wait_for_render(&mut bob).await;
    assert_eq!(bob.workspace.document("notes"), Some(json!({ "title": "draft" })));

    // Alice's own undo came back from the relay without being applied twice.
    assert_eq!(alice.workspace.document("notes"), Some(json!({ "title": "draft" })));
}

#[tokio::test]
async fn published_snapshot_replaces_peer_document() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let url = start_relay(dir.path()).await;
    let alice = peer(&url, "notes").await;
    let mut bob = peer(&url, "notes").await;

    alice
        .workspace
        .edit("notes", ChangeOperation::set(vec!["body".into()], json!("full text")))
        .expect("local edit should apply");
    alice.handle.publish_snapshot("notes").expect("client should accept commands");

    wait_for_render(&mut bob).await;
    assert_eq!(bob.workspace.document("notes"), Some(json!({ "body": "full text" })));
}

#[tokio::test]
async fn changes_made_before_connecting_are_delivered_in_order() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let url = start_relay(dir.path()).await;
    let mut bob = peer(&url, "list").await;

    let workspace = MemoryWorkspace::new();
    let (handle, mut events) =
        SyncClient::spawn(&config(&url), WsConnector::new(), workspace.clone(), workspace.clone())
            .expect("client should start");
    handle.join_channel("list").expect("client should accept commands");
    for n in 0..3usize {
        let change = workspace
            .edit("list", ChangeOperation::add(vec!["items".into(), n.into()], json!(n)))
            .expect("local edit should apply");
        handle.send_change(change).expect("client should accept commands");
    }

    handle.connect().await.expect("client should connect to relay");
    wait_for(&mut events, |event| matches!(event, SyncEvent::Connected { .. })).await;

    for _ in 0..3 {
        wait_for_render(&mut bob).await;
    }
    assert_eq!(bob.workspace.document("list"), Some(json!({ "items": [0, 1, 2] })));
}

#[tokio::test]
async fn peers_see_each_other_join_and_leave() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let url = start_relay(dir.path()).await;
    let mut alice = peer(&url, "notes").await;
    let bob = peer(&url, "notes").await;

    let joined = wait_for(&mut alice.events, |event| matches!(event, SyncEvent::PeerJoined { .. })).await;
    let SyncEvent::PeerJoined { channel, client_id: bob_id } = joined else {
        unreachable!("wait_for only returns matching events");
    };
    assert_eq!(channel, "notes");

    bob.handle.leave_channel("notes").expect("client should accept commands");
    let left = wait_for(&mut alice.events, |event| matches!(event, SyncEvent::PeerLeft { .. })).await;
    assert_eq!(left, SyncEvent::PeerLeft { channel: "notes".into(), client_id: bob_id });
}
