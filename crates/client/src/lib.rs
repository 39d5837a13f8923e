// docsync-client: real-time sync core. Keeps a local document view consistent
// with other clients through the relay, survives reconnects, and coordinates
// distributed undo/redo.

pub mod client;
pub mod collab;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod memory;
pub mod outbox;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{SyncClient, SyncHandle};
pub use collab::{Completion, CompletionSignal, DocumentHistory, DocumentStore};
pub use config::ClientConfig;
pub use error::{ConnectError, HistoryError, StoreError};
pub use event::SyncEvent;
pub use memory::MemoryWorkspace;
