// Document files: one pretty-printed JSON file per channel under the data
// directory. The last accepted snapshot timestamp is stored alongside the
// content in the `_lastSyncTimestamp` key and stripped on load.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use docsync_common::channel::validate_channel_name;
use serde_json::{Map, Value};

pub const TIMESTAMP_KEY: &str = "_lastSyncTimestamp";

/// A document as read from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub data: Value,
    pub timestamp: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct DocumentFiles {
    dir: PathBuf,
}

impl DocumentFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for `channel`, rejecting names that could escape the data directory.
    pub fn path_for(&self, channel: &str) -> Result<PathBuf> {
        let name = validate_channel_name(channel)
            .with_context(|| format!("invalid document name `{channel}`"))?;
        Ok(self.dir.join(name))
    }

    /// Read `channel`, or `None` when it was never saved.
    pub async fn load(&self, channel: &str) -> Result<Option<StoredDocument>> {
        let path = self.path_for(channel)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read document `{}`", path.display()))
            }
        };
        let mut data: Value = serde_json::from_str(&raw)
            .with_context(|| format!("document `{}` is not valid JSON", path.display()))?;

        let timestamp = match data.as_object_mut() {
            Some(object) => object.remove(TIMESTAMP_KEY).and_then(|value| value.as_f64()),
            None => None,
        };
        Ok(Some(StoredDocument { data, timestamp }))
    }

    /// Write `channel` through a temp file so readers never see a partial document.
    pub async fn save(&self, channel: &str, data: &Value, timestamp: Option<f64>) -> Result<()> {
        let path = self.path_for(channel)?;
        let tmp_path = self.dir.join(format!(".{channel}.tmp"));
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create data dir `{}`", self.dir.display()))?;

        let contents = serde_json::to_string_pretty(&with_timestamp(data, timestamp))
            .context("failed to encode document")?;
        tokio::fs::write(&tmp_path, contents)
            .await
            .with_context(|| format!("failed to write `{}`", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &path).await.with_context(|| {
            format!("failed to move `{}` to `{}`", tmp_path.display(), path.display())
        })
    }
}

fn with_timestamp(data: &Value, timestamp: Option<f64>) -> Value {
    match (data, timestamp) {
        (Value::Object(object), Some(timestamp)) => {
            let mut object: Map<String, Value> = object.clone();
            object.insert(TIMESTAMP_KEY.to_string(), Value::from(timestamp));
            Value::Object(object)
        }
        _ => data.clone(),
    }
}
