// `docsync undo` / `docsync redo`: broadcast an undo or redo by change id.

use anyhow::bail;
use clap::Args;
use docsync_client::ClientConfig;
use serde::Serialize;

use crate::output::{self, OutputFormat};
use crate::session::ChannelSession;

#[derive(Debug, Args)]
pub struct UndoArgs {
    channel: String,
    /// Id of the change, as printed by `docsync set` or `docsync history`.
    change_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Undo,
    Redo,
}

#[derive(Debug, Serialize)]
struct UndoResult {
    action: Direction,
    change_id: String,
    undone: bool,
}

pub async fn run(
    args: UndoArgs,
    config: &ClientConfig,
    format: OutputFormat,
    direction: Direction,
) -> anyhow::Result<()> {
    let mut session = ChannelSession::open(config, &args.channel).await?;

    let known = session.history().await?;
    if !known.iter().any(|entry| entry.change.id == args.change_id) {
        session.close().await?;
        bail!("change `{}` is not in the history of `{}`", args.change_id, args.channel);
    }

    match direction {
        Direction::Undo => session.handle.send_undo(&args.change_id)?,
        Direction::Redo => session.handle.send_redo(&args.change_id)?,
    }
    let after = session.history().await?;
    let undone = after.iter().any(|entry| entry.change.id == args.change_id && entry.undone);

    let result = UndoResult { action: direction, change_id: args.change_id, undone };
    session.close().await?;
    output::print_output(format, &result, |result| {
        let state = if result.undone { "undone" } else { "applied" };
        format!("{} is {state}", result.change_id)
    })?;
    Ok(())
}
