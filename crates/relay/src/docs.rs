// Per-document relay state: content, last-writer-wins timestamp, bounded
// change history and the operation sequence.

use std::collections::VecDeque;

use chrono::{SecondsFormat, Utc};
use docsync_common::patch::{apply_operation, revert_operation, PatchError};
use docsync_common::types::{now_millis, Change, HistoryEntry};
use serde_json::{Map, Value};

use crate::storage::StoredDocument;

#[derive(Debug, Clone)]
pub struct Document {
    data: Value,
    timestamp: Option<f64>,
    history: VecDeque<HistoryEntry>,
    sequence: u64,
    history_limit: usize,
}

/// Result of submitting a full-document snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SnapshotVerdict {
    Accepted,
    /// Older than the stored snapshot; carries the stored timestamp.
    Stale { current: f64 },
}

impl Document {
    pub fn new(history_limit: usize) -> Self {
        Self {
            data: Value::Object(Map::new()),
            timestamp: None,
            history: VecDeque::new(),
            sequence: 0,
            history_limit: history_limit.max(1),
        }
    }

    pub fn from_stored(stored: StoredDocument, history_limit: usize) -> Self {
        Self { data: stored.data, timestamp: stored.timestamp, ..Self::new(history_limit) }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Timestamp reported to joining clients: the stored one, else now.
    pub fn join_timestamp(&self) -> f64 {
        self.timestamp.unwrap_or_else(now_millis)
    }

    /// The newest `limit` history entries, oldest first.
    pub fn recent_history(&self, limit: usize) -> Vec<HistoryEntry> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.iter().cloned().collect()
    }

    /// Replace the content with a client snapshot unless it is older than
    /// the one already stored. Equal timestamps are accepted.
    pub fn accept_snapshot(&mut self, data: Value, timestamp: f64) -> SnapshotVerdict {
        let current = self.timestamp.unwrap_or(0.0);
        if timestamp < current {
            return SnapshotVerdict::Stale { current };
        }
        self.data = data;
        self.timestamp = Some(timestamp);
        SnapshotVerdict::Accepted
    }

    /// Stamp, apply and record a client change. Returns the change as it is
    /// relayed to peers, or `None` for an id already in the history.
    pub fn apply_change(
        &mut self,
        change: Change,
        client_id: &str,
    ) -> Result<Option<Change>, PatchError> {
        if self.history.iter().any(|entry| entry.change.id == change.id) {
            return Ok(None);
        }

        let operation = apply_operation(&mut self.data, &change.operation)?;
        self.sequence += 1;
        let stamped = Change {
            operation,
            origin_client_id: Some(client_id.to_string()),
            timestamp: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            sequence: Some(self.sequence),
            ..change
        };

        self.history.push_back(HistoryEntry { change: stamped.clone(), undone: false });
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
        self.touch();
        Ok(Some(stamped))
    }

    /// Revert a recorded change. `Ok(false)` when the id is unknown or
    /// already undone.
    pub fn undo(&mut self, change_id: &str) -> Result<bool, PatchError> {
        let Some(entry) =
            self.history.iter_mut().rev().find(|entry| entry.change.id == change_id && !entry.undone)
        else {
            return Ok(false);
        };
        revert_operation(&mut self.data, &entry.change.operation)?;
        entry.undone = true;
        self.touch();
        Ok(true)
    }

    /// Re-apply an undone change. `Ok(false)` when the id is unknown or not undone.
    pub fn redo(&mut self, change_id: &str) -> Result<bool, PatchError> {
        let Some(entry) =
            self.history.iter_mut().rev().find(|entry| entry.change.id == change_id && entry.undone)
        else {
            return Ok(false);
        };
        apply_operation(&mut self.data, &entry.change.operation)?;
        entry.undone = false;
        self.touch();
        Ok(true)
    }

    // Incremental mutations make the content newer than any earlier snapshot,
    // so a client that missed them accepts the next join snapshot.
    fn touch(&mut self) {
        let now = now_millis();
        self.timestamp = Some(match self.timestamp {
            Some(previous) if previous >= now => previous + 1.0,
            _ => now,
        });
    }
}
