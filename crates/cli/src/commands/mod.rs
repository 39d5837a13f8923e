// CLI subcommand dispatch.

use anyhow::bail;
use clap::Subcommand;
use docsync_client::ClientConfig;
use docsync_common::types::PathSegment;

use crate::output::OutputFormat;

pub mod edit;
pub mod history;
pub mod undo;
pub mod watch;

#[derive(Subcommand)]
pub enum Command {
    /// Print a document and follow remote changes until interrupted
    Watch(watch::WatchArgs),
    /// Set a value at a dotted path (`items.0.title`)
    Set(edit::SetArgs),
    /// Delete the value at a dotted path
    Delete(edit::DeleteArgs),
    /// Undo a change on every client of the channel
    Undo(undo::UndoArgs),
    /// Re-apply an undone change on every client of the channel
    Redo(undo::UndoArgs),
    /// List the relay's change history for a document
    History(history::HistoryArgs),
}

pub async fn run(cmd: Command, config: ClientConfig, format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        Command::Watch(args) => watch::run(args, &config, format).await,
        Command::Set(args) => edit::run_set(args, &config, format).await,
        Command::Delete(args) => edit::run_delete(args, &config, format).await,
        Command::Undo(args) => undo::run(args, &config, format, undo::Direction::Undo).await,
        Command::Redo(args) => undo::run(args, &config, format, undo::Direction::Redo).await,
        Command::History(args) => history::run(args, &config, format).await,
    }
}

/// Split a dotted path into segments; purely numeric parts address array slots.
pub fn parse_path(raw: &str) -> anyhow::Result<Vec<PathSegment>> {
    if raw.is_empty() {
        bail!("path must not be empty");
    }
    raw.split('.')
        .map(|part| {
            if part.is_empty() {
                bail!("path `{raw}` has an empty segment");
            }
            Ok(match part.parse::<usize>() {
                Ok(index) => PathSegment::Index(index),
                Err(_) => PathSegment::Key(part.to_string()),
            })
        })
        .collect()
}
