// Client actor: one task owns the transport and the dispatcher; the
// application talks to it through a cloneable `SyncHandle`.

use docsync_common::types::Change;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::collab::{DocumentHistory, DocumentStore};
use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ConnectError;
use crate::event::{EventSink, SyncEvent};
use crate::session::SessionState;
use crate::transport::{ConnectWaiter, Connector, TransportConnection, TransportEvent};

#[derive(Debug)]
enum Command {
    Connect { reply: ConnectWaiter },
    JoinChannel { channel: String },
    LeaveChannel { channel: String },
    SendChange { channel: Option<String>, change: Change },
    SendUndo { change_id: String },
    SendRedo { change_id: String },
    PublishSnapshot { channel: String },
    RequestHistory { channel: String },
    Disconnect,
    Shutdown,
}

pub struct SyncClient<C, S, H> {
    transport: TransportConnection<C>,
    dispatcher: Dispatcher<S, H>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl<C, S, H> SyncClient<C, S, H>
where
    C: Connector,
    S: DocumentStore + Send + 'static,
    H: DocumentHistory + Send + 'static,
{
    /// Start the client task. Nothing connects until `SyncHandle::connect`.
    pub fn spawn(
        config: &ClientConfig,
        connector: C,
        store: S,
        history: H,
    ) -> Result<(SyncHandle, mpsc::UnboundedReceiver<SyncEvent>), ConnectError> {
        let transport =
            TransportConnection::new(connector, &config.relay_url, config.connect_timeout())?;
        let session =
            SessionState::new(config.reconnect_base_delay(), config.max_reconnect_attempts);
        let (events, event_rx) = EventSink::new();
        let (command_tx, commands) = mpsc::unbounded_channel();

        let client = Self {
            transport,
            dispatcher: Dispatcher::new(session, store, history, events),
            commands,
        };
        tokio::spawn(client.run());
        debug!(relay_url = %config.relay_url, "sync client started");

        Ok((SyncHandle { commands: command_tx }, event_rx))
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                event = self.transport.next_event() => self.on_transport_event(event),
                () = self.dispatcher.guard_settled() => self.dispatcher.release_guard_if_settled(),
            }
        }
        self.transport.close();
        self.dispatcher.on_closed_by_client();
        debug!("sync client stopped");
    }

    fn on_command(&mut self, command: Command) {
        let link = &mut self.transport;
        match command {
            Command::Connect { reply } => {
                // An explicit connect starts a fresh retry budget.
                if !link.is_ready() && !link.is_connecting() {
                    self.dispatcher.session_mut().reset_reconnect_attempts();
                }
                link.connect(Some(reply));
            }
            Command::JoinChannel { channel } => self.dispatcher.join_channel(link, &channel),
            Command::LeaveChannel { channel } => self.dispatcher.leave_channel(link, &channel),
            Command::SendChange { channel, change } => {
                self.dispatcher.send_change(link, channel, change)
            }
            Command::SendUndo { change_id } => self.dispatcher.send_undo(link, &change_id),
            Command::SendRedo { change_id } => self.dispatcher.send_redo(link, &change_id),
            Command::PublishSnapshot { channel } => {
                self.dispatcher.publish_snapshot(link, &channel)
            }
            Command::RequestHistory { channel } => self.dispatcher.request_history(link, &channel),
            Command::Disconnect => {
                link.close();
                self.dispatcher.on_closed_by_client();
            }
            Command::Shutdown => {}
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(text) => self.dispatcher.handle_frame(&text, &mut self.transport),
            TransportEvent::Closed { reason } => {
                warn!(%reason, "relay connection lost");
                self.dispatcher.on_connection_lost(&reason);
                self.schedule_reconnect();
            }
            TransportEvent::AttemptFailed(error) => {
                warn!(%error, "connect attempt failed");
                self.dispatcher.on_attempt_failed();
                self.schedule_reconnect();
            }
            TransportEvent::ReconnectDue => {
                debug!(attempt = self.dispatcher.session().reconnect_attempts(), "reconnecting");
                self.transport.connect(None);
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        let session = self.dispatcher.session_mut();
        if session.has_reached_max_reconnect_attempts() {
            let attempts = session.reconnect_attempts();
            warn!(attempts, "giving up on automatic reconnects");
            self.dispatcher.emit(SyncEvent::ReconnectFailed { attempts });
            return;
        }
        let attempt = session.increment_reconnect_attempts();
        let delay = session.reconnect_delay();
        info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        self.transport.schedule_reconnect(delay);
        self.dispatcher.emit(SyncEvent::ReconnectScheduled { attempt, delay });
    }
}

/// Cloneable command sender for a running `SyncClient`.
///
/// Every method except `connect` is fire-and-forget; they fail only with
/// `ConnectError::Stopped` once the client task has exited. The task stops
/// when the last handle is dropped.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SyncHandle {
    /// Open the connection and wait until the relay assigns an identity.
    /// Resolves immediately when already connected.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect { reply })?;
        rx.await.unwrap_or(Err(ConnectError::Stopped))
    }

    pub fn join_channel(&self, channel: &str) -> Result<(), ConnectError> {
        self.send(Command::JoinChannel { channel: channel.to_string() })
    }

    pub fn leave_channel(&self, channel: &str) -> Result<(), ConnectError> {
        self.send(Command::LeaveChannel { channel: channel.to_string() })
    }

    /// Submit a change for the active channel (or the channel being joined).
    pub fn send_change(&self, change: Change) -> Result<(), ConnectError> {
        self.send(Command::SendChange { channel: None, change })
    }

    pub fn send_change_to(&self, channel: &str, change: Change) -> Result<(), ConnectError> {
        self.send(Command::SendChange { channel: Some(channel.to_string()), change })
    }

    pub fn send_undo(&self, change_id: &str) -> Result<(), ConnectError> {
        self.send(Command::SendUndo { change_id: change_id.to_string() })
    }

    pub fn send_redo(&self, change_id: &str) -> Result<(), ConnectError> {
        self.send(Command::SendRedo { change_id: change_id.to_string() })
    }

    /// Broadcast the stored document as a whole-document snapshot.
    pub fn publish_snapshot(&self, channel: &str) -> Result<(), ConnectError> {
        self.send(Command::PublishSnapshot { channel: channel.to_string() })
    }

    pub fn request_history(&self, channel: &str) -> Result<(), ConnectError> {
        self.send(Command::RequestHistory { channel: channel.to_string() })
    }

    /// Close the connection without scheduling a reconnect.
    pub fn disconnect(&self) -> Result<(), ConnectError> {
        self.send(Command::Disconnect)
    }

    /// Close the connection and stop the client task.
    pub fn shutdown(&self) -> Result<(), ConnectError> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> Result<(), ConnectError> {
        self.commands.send(command).map_err(|_| ConnectError::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWorkspace;
    use crate::testing::{ChannelConnector, RemoteEnd};
    use docsync_common::protocol::ws::WsMessage;
    use docsync_common::types::ChangeOperation;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;

    fn config() -> ClientConfig {
        ClientConfig { relay_url: "ws://relay.test/ws".into(), ..ClientConfig::default() }
    }

    fn start(
        connector: ChannelConnector,
    ) -> (SyncHandle, mpsc::UnboundedReceiver<SyncEvent>, MemoryWorkspace) {
        let workspace = MemoryWorkspace::new();
        let (handle, events) =
            SyncClient::spawn(&config(), connector, workspace.clone(), workspace.clone())
                .expect("client should start");
        (handle, events, workspace)
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<SyncEvent>) -> SyncEvent {
        events.recv().await.expect("event stream should stay open")
    }

    async fn accept(remotes: &mut mpsc::UnboundedReceiver<RemoteEnd>, client_id: &str) -> RemoteEnd {
        let remote = remotes.recv().await.expect("client should open a socket");
        remote.push(&WsMessage::Assigned { client_id: client_id.into() });
        remote
    }

    #[test]
    fn spawn_rejects_non_websocket_url() {
        let (connector, _remotes) = ChannelConnector::new();
        let workspace = MemoryWorkspace::new();
        let config = ClientConfig { relay_url: "http://relay.test".into(), ..ClientConfig::default() };
        let result = SyncClient::spawn(&config, connector, workspace.clone(), workspace);
        assert!(matches!(result, Err(ConnectError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn connect_resolves_after_identity_and_flushes_queue() {
        let (connector, mut remotes) = ChannelConnector::new();
        let (handle, mut events, _) = start(connector);

        handle.join_channel("doc").expect("client should accept commands");
        let change = Change::with_id("c-1", ChangeOperation::set(vec!["k".into()], json!(1)));
        handle.send_change(change.clone()).expect("client should accept commands");

        let connecting = tokio::spawn({
            let handle = handle.clone();
            async move { handle.connect().await }
        });
        let mut remote = accept(&mut remotes, "c1").await;

        assert_eq!(connecting.await.expect("connect task should finish"), Ok(()));
        assert_eq!(next_event(&mut events).await, SyncEvent::Connected { client_id: "c1".into() });
        assert_eq!(remote.next_sent().await, Some(WsMessage::Join { channel: "doc".into() }));
        assert_eq!(
            remote.next_sent().await,
            Some(WsMessage::Change { channel: "doc".into(), change })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_back_off_exponentially_then_give_up_once() {
        let (connector, _remotes) = ChannelConnector::new();
        for _ in 0..11 {
            connector.fail_next("connection refused");
        }
        let (handle, mut events, _) = start(connector);

        let result = handle.connect().await;
        assert_eq!(result, Err(ConnectError::Transport("connection refused".into())));

        for attempt in 1..=10u32 {
            let started = Instant::now();
            let expected = Duration::from_secs(1) * 2u32.pow(attempt - 1);
            assert_eq!(
                next_event(&mut events).await,
                SyncEvent::ReconnectScheduled { attempt, delay: expected }
            );
            if attempt > 1 {
                assert!(started.elapsed() >= Duration::from_secs(1) * 2u32.pow(attempt - 2));
            }
        }
        assert_eq!(next_event(&mut events).await, SyncEvent::ReconnectFailed { attempts: 10 });

        tokio::time::sleep(Duration::from_secs(3_600)).await;
        assert!(events.try_recv().is_err(), "no further attempts after giving up");
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_connect_after_giving_up_starts_over() {
        let (connector, mut remotes) = ChannelConnector::new();
        for _ in 0..11 {
            connector.fail_next("connection refused");
        }
        let (handle, mut events, _) = start(connector);
        let _ = handle.connect().await;
        loop {
            if let SyncEvent::ReconnectFailed { .. } = next_event(&mut events).await {
                break;
            }
        }

        let connecting = tokio::spawn({
            let handle = handle.clone();
            async move { handle.connect().await }
        });
        let _remote = accept(&mut remotes, "c2").await;
        assert_eq!(connecting.await.expect("connect task should finish"), Ok(()));
        assert_eq!(next_event(&mut events).await, SyncEvent::Connected { client_id: "c2".into() });
    }

    #[tokio::test(start_paused = true)]
    async fn connect_times_out_without_identity() {
        let (connector, mut remotes) = ChannelConnector::new();
        let (handle, mut events, _) = start(connector);

        let result = handle.connect().await;
        assert_eq!(result, Err(ConnectError::Timeout));
        let mut remote = remotes.recv().await.expect("socket should have been opened");
        assert!(remote.is_closed().await);
        assert!(matches!(
            next_event(&mut events).await,
            SyncEvent::ReconnectScheduled { attempt: 1, .. }
        ));
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_connect_and_never_reconnects() {
        let (connector, mut remotes) = ChannelConnector::new();
        let (handle, mut events, _) = start(connector);

        let connecting = tokio::spawn({
            let handle = handle.clone();
            async move { handle.connect().await }
        });
        let _remote = remotes.recv().await.expect("socket should have been opened");
        handle.disconnect().expect("client should accept commands");

        assert_eq!(connecting.await.expect("connect task should finish"), Err(ConnectError::Cancelled));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(events.try_recv().is_err(), "a deliberate close emits nothing before identity");
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_close_reconnects_and_rejoins() {
        let (connector, mut remotes) = ChannelConnector::new();
        let (handle, mut events, _) = start(connector);

        let connecting = tokio::spawn({
            let handle = handle.clone();
            async move { handle.connect().await }
        });
        let mut remote = accept(&mut remotes, "c1").await;
        connecting.await.expect("connect task should finish").expect("connect should succeed");
        assert_eq!(next_event(&mut events).await, SyncEvent::Connected { client_id: "c1".into() });
        handle.join_channel("doc").expect("client should accept commands");
        assert_eq!(remote.next_sent().await, Some(WsMessage::Join { channel: "doc".into() }));

        remote.close("server restart");
        assert_eq!(
            next_event(&mut events).await,
            SyncEvent::Disconnected { reason: "server restart".into() }
        );
        assert_eq!(
            next_event(&mut events).await,
            SyncEvent::ReconnectScheduled { attempt: 1, delay: Duration::from_secs(1) }
        );

        let mut second = accept(&mut remotes, "c2").await;
        assert_eq!(next_event(&mut events).await, SyncEvent::Connected { client_id: "c2".into() });
        assert_eq!(second.next_sent().await, Some(WsMessage::Join { channel: "doc".into() }));
    }

    #[tokio::test]
    async fn commands_fail_once_the_client_is_shut_down() {
        let (connector, _remotes) = ChannelConnector::new();
        let (handle, mut events, _) = start(connector);
        handle.shutdown().expect("client should accept commands");

        assert!(events.recv().await.is_none(), "event stream closes with the task");
        assert_eq!(handle.join_channel("doc"), Err(ConnectError::Stopped));
        assert_eq!(handle.connect().await, Err(ConnectError::Stopped));
    }
}
