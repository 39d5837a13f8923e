// A short-lived sync session on one channel, shared by the subcommands.

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use docsync_client::transport::WsConnector;
use docsync_client::{ClientConfig, MemoryWorkspace, SyncClient, SyncEvent, SyncHandle};
use docsync_common::types::{Change, HistoryEntry};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tracing::debug;

const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ChannelSession {
    pub handle: SyncHandle,
    pub events: UnboundedReceiver<SyncEvent>,
    pub workspace: MemoryWorkspace,
    pub channel: String,
}

impl ChannelSession {
    /// Connect to the relay and join `channel`, returning once its snapshot
    /// has been loaded into the workspace.
    pub async fn open(config: &ClientConfig, channel: &str) -> anyhow::Result<Self> {
        let workspace = MemoryWorkspace::new();
        let (handle, events) =
            SyncClient::spawn(config, WsConnector::new(), workspace.clone(), workspace.clone())
                .context("failed to start sync client")?;
        handle
            .connect()
            .await
            .with_context(|| format!("failed to connect to relay at {}", config.relay_url))?;
        handle.join_channel(channel)?;

        let mut session = Self { handle, events, workspace, channel: channel.to_string() };
        session
            .wait_for(|event| matches!(event, SyncEvent::RenderRequested { channel: c } if c == channel))
            .await
            .with_context(|| format!("failed to join `{channel}`"))?;
        debug!(channel, "document loaded");
        Ok(session)
    }

    pub fn document(&self) -> Value {
        self.workspace.document(&self.channel).unwrap_or_else(|| Value::Object(Default::default()))
    }

    pub fn send_change(&self, change: Change) -> anyhow::Result<()> {
        self.handle.send_change_to(&self.channel, change)?;
        Ok(())
    }

    /// Fetch the channel history. The relay answers in order, so the reply
    /// also confirms every earlier frame was processed.
    pub async fn history(&mut self) -> anyhow::Result<Vec<HistoryEntry>> {
        self.handle.request_history(&self.channel)?;
        let channel = self.channel.clone();
        let event = self
            .wait_for(|event| matches!(event, SyncEvent::HistoryReceived { channel: c, .. } if *c == channel))
            .await
            .context("no history reply from relay")?;
        match event {
            SyncEvent::HistoryReceived { entries, .. } => Ok(entries),
            other => Err(anyhow!("unexpected event {other:?}")),
        }
    }

    pub async fn close(self) -> anyhow::Result<()> {
        self.handle.shutdown()?;
        Ok(())
    }

    async fn wait_for<F>(&mut self, mut matches: F) -> anyhow::Result<SyncEvent>
    where
        F: FnMut(&SyncEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + REPLY_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = match timeout(remaining, self.events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => bail!("sync client stopped"),
                Err(_) => bail!("timed out waiting for the relay"),
            };
            match event {
                SyncEvent::Disconnected { reason } => bail!("disconnected: {reason}"),
                event if matches(&event) => return Ok(event),
                _ => {}
            }
        }
    }
}
