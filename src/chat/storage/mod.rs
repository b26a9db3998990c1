//! Conversation state persistence.

pub mod checkpoint;
pub mod checkpoint_store;

pub use checkpoint::{Checkpoint, InterruptWrite, Namespace, NewCheckpoint, Node};
pub use checkpoint_store::{CheckpointStore, SqliteCheckpointStore, StoreFuture};
