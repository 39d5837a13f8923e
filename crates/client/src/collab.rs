// Collaborator interfaces consumed by the sync core: the document store and
// the document history manager.

use docsync_common::types::{Change, HistoryEntry};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{HistoryError, StoreError};

/// Signals when a collaborator's side effects from one mutation have finished.
///
/// The re-entrancy guard stays raised until every outstanding completion
/// resolves, so saves and renders triggered by a remote mutation are not
/// mistaken for local edits.
#[derive(Debug, Default)]
pub struct Completion(Option<oneshot::Receiver<()>>);

impl Completion {
    /// The mutation had no asynchronous tail.
    pub fn done() -> Self {
        Self(None)
    }

    /// The mutation finishes later; fire (or drop) the signal when it does.
    pub fn pending() -> (Self, CompletionSignal) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(rx)), CompletionSignal(tx))
    }

    pub fn is_done(&self) -> bool {
        self.0.is_none()
    }

    pub(crate) fn into_receiver(self) -> Option<oneshot::Receiver<()>> {
        self.0
    }
}

#[derive(Debug)]
pub struct CompletionSignal(oneshot::Sender<()>);

impl CompletionSignal {
    pub fn complete(self) {
        let _ = self.0.send(());
    }
}

/// Named document storage.
pub trait DocumentStore {
    /// Current content of `name`, or `None` if it has never been saved.
    fn load(&mut self, name: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the content of `name`.
    fn save(&mut self, name: &str, content: Value) -> Result<Completion, StoreError>;
}

/// Per-document change history able to apply, undo and redo by change id.
pub trait DocumentHistory {
    fn apply_change(&mut self, channel: &str, change: &Change) -> Result<Completion, HistoryError>;

    /// Learn changes the relay reports on join. Their effects are already in
    /// the joined snapshot; they are recorded only so later undo/redo by id
    /// can find them.
    fn record_history(&mut self, channel: &str, entries: &[HistoryEntry]);

    fn undo_change(&mut self, channel: &str, change_id: &str) -> Result<Completion, HistoryError>;

    fn redo_change(&mut self, channel: &str, change_id: &str) -> Result<Completion, HistoryError>;
}
