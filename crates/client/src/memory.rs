// In-memory workspace implementing both collaborator traits.
//
// Clones share state, so the application can keep a handle to inspect or edit
// documents while the client task owns another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use docsync_common::patch::{apply_operation, revert_operation, PatchError};
use docsync_common::types::{Change, ChangeOperation, HistoryEntry};
use serde_json::{Map, Value};

use crate::collab::{Completion, DocumentHistory, DocumentStore};
use crate::error::{HistoryError, StoreError};

#[derive(Debug, Clone, Default)]
pub struct MemoryWorkspace {
    inner: Arc<Mutex<WorkspaceState>>,
}

#[derive(Debug, Default)]
struct WorkspaceState {
    documents: HashMap<String, Value>,
    changes: HashMap<String, RecordedChange>,
    saves: usize,
    mutations: usize,
}

#[derive(Debug, Clone)]
struct RecordedChange {
    channel: String,
    operation: ChangeOperation,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, WorkspaceState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn document(&self, name: &str) -> Option<Value> {
        self.state().documents.get(name).cloned()
    }

    /// Number of `save` calls received.
    pub fn save_count(&self) -> usize {
        self.state().saves
    }

    /// Number of document mutations of any kind (saves, applies, undos, redos).
    pub fn mutation_count(&self) -> usize {
        self.state().mutations
    }

    /// Apply a local edit and return the change to submit to the relay.
    pub fn edit(&self, channel: &str, operation: ChangeOperation) -> Result<Change, HistoryError> {
        let change = Change::new(operation);
        let operation = self.apply_to(channel, &change)?;
        Ok(Change { operation, ..change })
    }

    fn apply_to(&self, channel: &str, change: &Change) -> Result<ChangeOperation, HistoryError> {
        let mut state = self.state();
        let document =
            state.documents.entry(channel.to_string()).or_insert_with(|| Value::Object(Map::new()));
        let applied = apply_operation(document, &change.operation).map_err(|source| {
            HistoryError::Patch { change_id: change.id.clone(), source }
        })?;
        state.changes.insert(
            change.id.clone(),
            RecordedChange { channel: channel.to_string(), operation: applied.clone() },
        );
        state.mutations += 1;
        Ok(applied)
    }

    fn recorded(&self, change_id: &str) -> Result<RecordedChange, HistoryError> {
        self.state()
            .changes
            .get(change_id)
            .cloned()
            .ok_or_else(|| HistoryError::UnknownChange(change_id.to_string()))
    }

    // Undo and redo target the document the change was originally applied to.
    fn mutate<F>(&self, change_id: &str, f: F) -> Result<Completion, HistoryError>
    where
        F: FnOnce(&mut Value, &ChangeOperation) -> Result<(), PatchError>,
    {
        let recorded = self.recorded(change_id)?;
        let mut state = self.state();
        let document = state
            .documents
            .entry(recorded.channel.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        f(document, &recorded.operation).map_err(|source| HistoryError::Patch {
            change_id: change_id.to_string(),
            source,
        })?;
        state.mutations += 1;
        Ok(Completion::done())
    }
}

impl DocumentStore for MemoryWorkspace {
    fn load(&mut self, name: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.document(name))
    }

    fn save(&mut self, name: &str, content: Value) -> Result<Completion, StoreError> {
        let mut state = self.state();
        state.documents.insert(name.to_string(), content);
        state.saves += 1;
        state.mutations += 1;
        Ok(Completion::done())
    }
}

impl DocumentHistory for MemoryWorkspace {
    fn apply_change(&mut self, channel: &str, change: &Change) -> Result<Completion, HistoryError> {
        self.apply_to(channel, change)?;
        Ok(Completion::done())
    }

    fn record_history(&mut self, channel: &str, entries: &[HistoryEntry]) {
        let mut state = self.state();
        for entry in entries {
            state.changes.entry(entry.change.id.clone()).or_insert_with(|| RecordedChange {
                channel: channel.to_string(),
                operation: entry.change.operation.clone(),
            });
        }
    }

    fn undo_change(&mut self, _channel: &str, change_id: &str) -> Result<Completion, HistoryError> {
        self.mutate(change_id, revert_operation)
    }

    fn redo_change(&mut self, _channel: &str, change_id: &str) -> Result<Completion, HistoryError> {
        self.mutate(change_id, |document, operation| {
            apply_operation(document, operation).map(|_| ())
        })
    }
}
