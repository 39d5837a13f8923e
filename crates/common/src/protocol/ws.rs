// WebSocket message types for the docsync relay protocol.
//
// Frames are JSON text objects tagged by `type`. Field names follow the relay's
// camelCase wire format; the document channel travels as `filename`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{Change, HistoryEntry};

/// Number of history entries the relay includes in a join snapshot.
pub const JOIN_HISTORY_LIMIT: usize = 50;

/// Every message kind spoken between clients and the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WsMessage {
    /// Relay -> Client: identity assignment. The connection is ready once this arrives.
    #[serde(rename = "connected")]
    Assigned { client_id: String },

    /// Client -> Relay: join a document channel.
    #[serde(rename = "join_file")]
    Join {
        #[serde(rename = "filename")]
        channel: String,
    },

    /// Client -> Relay: leave a document channel.
    #[serde(rename = "leave_file")]
    Leave {
        #[serde(rename = "filename")]
        channel: String,
    },

    /// Relay -> Client: full snapshot for a channel the client just joined.
    #[serde(rename = "file_joined")]
    ChannelJoined {
        #[serde(rename = "filename")]
        channel: String,
        #[serde(rename = "data")]
        snapshot: Value,
        timestamp: f64,
        #[serde(default)]
        history: Vec<HistoryEntry>,
        #[serde(default)]
        last_operation_sequence: u64,
    },

    /// Bidirectional: whole-document re-sync, last writer wins.
    FullSync {
        #[serde(rename = "filename")]
        channel: String,
        #[serde(rename = "data")]
        snapshot: Value,
        timestamp: f64,
        #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
        origin_client_id: Option<String>,
    },

    /// Bidirectional: a single document change.
    Change {
        #[serde(rename = "filename")]
        channel: String,
        change: Change,
    },

    /// Bidirectional: undo the identified change.
    Undo {
        #[serde(rename = "filename")]
        channel: String,
        change_id: String,
    },

    /// Bidirectional: redo the identified change.
    Redo {
        #[serde(rename = "filename")]
        channel: String,
        change_id: String,
    },

    /// Relay -> Client: another participant joined the channel.
    #[serde(rename = "client_joined")]
    PeerJoined {
        #[serde(rename = "filename")]
        channel: String,
        client_id: String,
    },

    /// Relay -> Client: another participant left the channel.
    #[serde(rename = "client_left")]
    PeerLeft {
        #[serde(rename = "filename")]
        channel: String,
        client_id: String,
    },

    /// Client -> Relay: request the channel's change history.
    GetHistory {
        #[serde(rename = "filename")]
        channel: String,
    },

    /// Relay -> Client: change history for a channel.
    History {
        #[serde(rename = "filename")]
        channel: String,
        history: Vec<HistoryEntry>,
    },

    /// Any message type this build does not know about.
    #[serde(other)]
    Unknown,
}

impl WsMessage {
    /// Wire `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Assigned { .. } => "connected",
            Self::Join { .. } => "join_file",
            Self::Leave { .. } => "leave_file",
            Self::ChannelJoined { .. } => "file_joined",
            Self::FullSync { .. } => "full_sync",
            Self::Change { .. } => "change",
            Self::Undo { .. } => "undo",
            Self::Redo { .. } => "redo",
            Self::PeerJoined { .. } => "client_joined",
            Self::PeerLeft { .. } => "client_left",
            Self::GetHistory { .. } => "get_history",
            Self::History { .. } => "history",
            Self::Unknown => "unknown",
        }
    }

    /// Channel this message refers to, if any.
    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::Join { channel }
            | Self::Leave { channel }
            | Self::ChannelJoined { channel, .. }
            | Self::FullSync { channel, .. }
            | Self::Change { channel, .. }
            | Self::Undo { channel, .. }
            | Self::Redo { channel, .. }
            | Self::PeerJoined { channel, .. }
            | Self::PeerLeft { channel, .. }
            | Self::GetHistory { channel }
            | Self::History { channel, .. } => Some(channel),
            Self::Assigned { .. } | Self::Unknown => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode {kind} frame: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub fn decode_message(raw: &str) -> Result<WsMessage, ProtocolError> {
    serde_json::from_str::<WsMessage>(raw).map_err(ProtocolError::Decode)
}

pub fn encode_message(message: &WsMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(message)
        .map_err(|source| ProtocolError::Encode { kind: message.kind(), source })
}
