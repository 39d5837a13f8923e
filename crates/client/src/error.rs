// Error types surfaced by the sync client and its collaborators.

use docsync_common::patch::PatchError;
use thiserror::Error;

/// Why a `connect()` call did not reach the ready state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// The socket could not be opened or closed before identity assignment.
    #[error("transport error: {0}")]
    Transport(String),

    /// No identity frame arrived within the connect window.
    #[error("timed out waiting for the relay to assign an identity")]
    Timeout,

    /// The connection was closed deliberately while the call was pending.
    #[error("connect cancelled by disconnect")]
    Cancelled,

    #[error("invalid relay url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The client task is no longer running.
    #[error("sync client stopped")]
    Stopped,
}

/// Failure reported by a [`DocumentStore`](crate::collab::DocumentStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document `{0}` is unavailable")]
    Unavailable(String),

    #[error("document store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by a [`DocumentHistory`](crate::collab::DocumentHistory).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("unknown change `{0}`")]
    UnknownChange(String),

    #[error("change `{change_id}` could not be applied: {source}")]
    Patch {
        change_id: String,
        #[source]
        source: PatchError,
    },
}
