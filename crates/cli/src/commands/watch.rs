// `docsync watch`: print a document, then every remote update, until Ctrl-C.

use clap::Args;
use docsync_client::{ClientConfig, SyncEvent};
use serde_json::{json, Value};

use crate::output::{self, OutputFormat};
use crate::session::ChannelSession;

#[derive(Debug, Args)]
pub struct WatchArgs {
    channel: String,
}

pub async fn run(args: WatchArgs, config: &ClientConfig, format: OutputFormat) -> anyhow::Result<()> {
    let mut session = ChannelSession::open(config, &args.channel).await?;
    print_document(format, &args.channel, &session.document())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = session.events.recv() => {
                let Some(event) = event else { break };
                if let SyncEvent::RenderRequested { channel } = &event {
                    if *channel == args.channel {
                        print_document(format, channel, &session.document())?;
                        continue;
                    }
                }
                if let Some(line) = describe(&event) {
                    output::print_output(format, &line, |line| {
                        line["message"].as_str().unwrap_or_default().to_string()
                    })?;
                }
            }
        }
    }

    session.close().await
}

fn print_document(format: OutputFormat, channel: &str, document: &Value) -> std::io::Result<()> {
    let value = json!({ "event": "document", "channel": channel, "data": document });
    output::print_output(format, &value, |value| {
        serde_json::to_string_pretty(&value["data"]).unwrap_or_default()
    })
}

// Connection and presence events as one JSON object each.
fn describe(event: &SyncEvent) -> Option<Value> {
    let (kind, message) = match event {
        SyncEvent::Connected { client_id } => ("connected", format!("connected as {client_id}")),
        SyncEvent::Disconnected { reason } => ("disconnected", format!("disconnected: {reason}")),
        SyncEvent::ReconnectScheduled { attempt, delay } => (
            "reconnect_scheduled",
            format!("reconnecting in {}ms (attempt {attempt})", delay.as_millis()),
        ),
        SyncEvent::ReconnectFailed { attempts } => {
            ("reconnect_failed", format!("gave up after {attempts} reconnect attempts"))
        }
        SyncEvent::PeerJoined { client_id, .. } => ("peer_joined", format!("{client_id} joined")),
        SyncEvent::PeerLeft { client_id, .. } => ("peer_left", format!("{client_id} left")),
        SyncEvent::RenderRequested { .. } | SyncEvent::HistoryReceived { .. } => return None,
    };
    Some(json!({ "event": kind, "message": message }))
}
