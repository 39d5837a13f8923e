// `docsync set` / `docsync delete`: apply one change and broadcast it.

use anyhow::Context;
use clap::Args;
use docsync_client::ClientConfig;
use docsync_common::types::ChangeOperation;
use serde::Serialize;
use serde_json::Value;

use super::parse_path;
use crate::output::{self, OutputFormat};
use crate::session::ChannelSession;

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Document (channel) name, e.g. `notes.json`.
    channel: String,
    /// Dotted path to the value.
    path: String,
    /// New value as JSON. Anything that does not parse is taken as a string.
    value: String,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    channel: String,
    path: String,
}

#[derive(Debug, Serialize)]
pub struct EditResult {
    pub change_id: String,
    pub channel: String,
    pub document: Value,
}

pub async fn run_set(args: SetArgs, config: &ClientConfig, format: OutputFormat) -> anyhow::Result<()> {
    let path = parse_path(&args.path)?;
    let value = parse_value(&args.value);
    apply(config, format, &args.channel, ChangeOperation::set(path, value)).await
}

pub async fn run_delete(
    args: DeleteArgs,
    config: &ClientConfig,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let path = parse_path(&args.path)?;
    apply(config, format, &args.channel, ChangeOperation::delete(path)).await
}

async fn apply(
    config: &ClientConfig,
    format: OutputFormat,
    channel: &str,
    operation: ChangeOperation,
) -> anyhow::Result<()> {
    let mut session = ChannelSession::open(config, channel).await?;
    let change = session
        .workspace
        .edit(channel, operation)
        .with_context(|| format!("change does not apply to `{channel}`"))?;
    let change_id = change.id.clone();
    session.send_change(change)?;
    // The history reply arrives after the relay has recorded the change.
    session.history().await?;

    let result =
        EditResult { change_id, channel: channel.to_string(), document: session.document() };
    session.close().await?;
    output::print_output(format, &result, format_human)?;
    Ok(())
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn format_human(result: &EditResult) -> String {
    format!("{} {}", result.channel, result.change_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_parse_as_json_with_string_fallback() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("{\"done\":true}"), json!({ "done": true }));
        assert_eq!(parse_value("\"quoted\""), json!("quoted"));
        assert_eq!(parse_value("plain words"), json!("plain words"));
    }

    #[test]
    fn human_output_names_the_change() {
        let result = EditResult {
            change_id: "c-1".into(),
            channel: "notes.json".into(),
            document: json!({}),
        };
        assert_eq!(format_human(&result), "notes.json c-1");
    }
}
