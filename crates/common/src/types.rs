// Core document-change types shared by the sync client and the relay.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One step of a path into a JSON document: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl PathSegment {
    /// Index interpretation of this segment. Numeric string keys count as
    /// indices so paths produced by string-keyed editors still address arrays.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(index) => Some(*index),
            Self::Key(key) => key.parse().ok(),
        }
    }

    /// Object-key interpretation of this segment.
    pub fn as_key(&self) -> String {
        match self {
            Self::Index(index) => index.to_string(),
            Self::Key(key) => key.clone(),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Key(key) => f.write_str(key),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(value: &str) -> Self {
        Self::Key(value.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

/// A single path-addressed mutation of a JSON document.
///
/// `old_value` is captured when the operation is applied so the operation can
/// later be reverted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ChangeOperation {
    /// Replace (or create) the value at `path`.
    Set {
        path: Vec<PathSegment>,
        value: Value,
        #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
        old_value: Option<Value>,
    },
    /// Remove the value at `path`.
    Delete {
        path: Vec<PathSegment>,
        #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
        old_value: Option<Value>,
    },
    /// Append to the array at the parent of `path`, or set an object key.
    Add {
        path: Vec<PathSegment>,
        value: Value,
        #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
        old_value: Option<Value>,
    },
    /// Insert into the array at the parent of `path`, shifting later items.
    Insert { path: Vec<PathSegment>, value: Value },
}

impl ChangeOperation {
    pub fn set(path: Vec<PathSegment>, value: Value) -> Self {
        Self::Set { path, value, old_value: None }
    }

    pub fn delete(path: Vec<PathSegment>) -> Self {
        Self::Delete { path, old_value: None }
    }

    pub fn add(path: Vec<PathSegment>, value: Value) -> Self {
        Self::Add { path, value, old_value: None }
    }

    pub fn insert(path: Vec<PathSegment>, value: Value) -> Self {
        Self::Insert { path, value }
    }

    pub fn path(&self) -> &[PathSegment] {
        match self {
            Self::Set { path, .. }
            | Self::Delete { path, .. }
            | Self::Add { path, .. }
            | Self::Insert { path, .. } => path,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Set { .. } => "set",
            Self::Delete { .. } => "delete",
            Self::Add { .. } => "add",
            Self::Insert { .. } => "insert",
        }
    }
}

// An explicit `null` old value means the slot held null; a missing field means
// nothing was there.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// An immutable, identified document change.
///
/// The id is minted by the submitting client and correlates later undo/redo
/// requests. The relay stamps origin, timestamp and sequence on receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    #[serde(rename = "changeId")]
    pub id: String,
    #[serde(flatten)]
    pub operation: ChangeOperation,
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    pub origin_client_id: Option<String>,
    /// RFC 3339 receipt time assigned by the relay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Relay-assigned per-document operation sequence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl Change {
    /// Create a change with a fresh random id.
    pub fn new(operation: ChangeOperation) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), operation)
    }

    pub fn with_id(id: impl Into<String>, operation: ChangeOperation) -> Self {
        Self { id: id.into(), operation, origin_client_id: None, timestamp: None, sequence: None }
    }
}

/// A change as recorded in a relay document history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub change: Change,
    #[serde(default)]
    pub undone: bool,
}

/// Current wall-clock time in fractional Unix milliseconds, the unit used for
/// snapshot timestamps on the wire.
pub fn now_millis() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1000.0
}
