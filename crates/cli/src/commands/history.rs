// `docsync history`: list the relay's recorded changes for a document.

use clap::Args;
use docsync_client::ClientConfig;
use docsync_common::types::HistoryEntry;

use crate::output::{self, OutputFormat};
use crate::session::ChannelSession;

#[derive(Debug, Args)]
pub struct HistoryArgs {
    channel: String,
    /// Show only the newest N entries.
    #[arg(long)]
    limit: Option<usize>,
}

pub async fn run(args: HistoryArgs, config: &ClientConfig, format: OutputFormat) -> anyhow::Result<()> {
    let mut session = ChannelSession::open(config, &args.channel).await?;
    let mut entries = session.history().await?;
    session.close().await?;

    if let Some(limit) = args.limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }
    output::print_output(format, &entries, |entries| format_human(entries))?;
    Ok(())
}

fn format_human(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "No changes recorded.".into();
    }
    entries
        .iter()
        .map(|entry| {
            let change = &entry.change;
            let path: Vec<String> = change.operation.path().iter().map(ToString::to_string).collect();
            format!(
                "{:>4} {} {:<6} {}{}",
                change.sequence.map(|n| n.to_string()).unwrap_or_default(),
                change.id,
                change.operation.kind(),
                path.join("."),
                if entry.undone { " (undone)" } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
