// Pending-send queue: frames and changes submitted before the connection (or a
// channel) was ready, released in submission order.

use std::collections::VecDeque;

use docsync_common::protocol::ws::WsMessage;
use docsync_common::types::Change;

/// A queued outbound item.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingSend {
    /// A fully formed frame, sent as-is.
    Message(WsMessage),
    /// A document change. `channel` is the channel known at submission time;
    /// when absent the active channel at flush time is used.
    Change { channel: Option<String>, change: Change },
}

#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<PendingSend>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: PendingSend) {
        self.queue.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn front(&self) -> Option<&PendingSend> {
        self.queue.front()
    }

    pub fn pop(&mut self) -> Option<PendingSend> {
        self.queue.pop_front()
    }

    /// Put an item back at the head after a failed release.
    pub fn requeue_front(&mut self, item: PendingSend) {
        self.queue.push_front(item);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingSend> {
        self.queue.iter()
    }
}
