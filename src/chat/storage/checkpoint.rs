//! Checkpoint data model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::core::ids::{CheckpointId, ThreadId};
use crate::chat::core::interrupt::PendingInterrupt;
use crate::chat::core::state::{ConversationState, StateUpdate};

/// Independent checkpoint chains of a thread.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// Turn graph.
    Main,
    /// History compaction graph.
    Finalize,
}

impl Namespace {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "main" => Ok(Self::Main),
            "finalize" => Ok(Self::Finalize),
            _ => Err(value.to_string()),
        }
    }
}

/// State machine node a checkpoint was taken at.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    /// Input stored, nothing run yet.
    Idle,
    /// Classification running.
    Classifying,
    /// Task classified, dispatching.
    Routing,
    /// Inquiry handler.
    InquiryHandler,
    /// Document search handler.
    DocumentSearchHandler,
    /// General handler.
    GeneralHandler,
    /// Email handler.
    EmailHandler,
    /// Turn finished.
    TurnComplete,
    /// Compaction running.
    Finalizing,
    /// Compaction finished.
    Done,
}

impl Node {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Classifying => "classifying",
            Self::Routing => "routing",
            Self::InquiryHandler => "inquiry_handler",
            Self::DocumentSearchHandler => "document_search_handler",
            Self::GeneralHandler => "general_handler",
            Self::EmailHandler => "email_handler",
            Self::TurnComplete => "turn_complete",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        }
    }

    /// Whether nothing follows this node in its namespace.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::TurnComplete | Self::Done)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Node {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let node = match value {
            "idle" => Self::Idle,
            "classifying" => Self::Classifying,
            "routing" => Self::Routing,
            "inquiry_handler" => Self::InquiryHandler,
            "document_search_handler" => Self::DocumentSearchHandler,
            "general_handler" => Self::GeneralHandler,
            "email_handler" => Self::EmailHandler,
            "turn_complete" => Self::TurnComplete,
            "finalizing" => Self::Finalizing,
            "done" => Self::Done,
            _ => return Err(value.to_string()),
        };
        Ok(node)
    }
}

/// Immutable snapshot of a thread's state at one node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint id.
    pub id: CheckpointId,
    /// Owning thread.
    pub thread_id: ThreadId,
    /// Chain the checkpoint belongs to.
    pub namespace: Namespace,
    /// Position in the chain, starting at 1.
    pub seq: i64,
    /// Node the snapshot was taken at.
    pub node: Node,
    /// Full state.
    pub state: ConversationState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// What to do with the thread's pending interrupt when appending.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum InterruptWrite {
    /// Leave it as is.
    #[default]
    Keep,
    /// Record a new pending interrupt.
    Set(PendingInterrupt),
    /// Remove any pending interrupt.
    Clear,
}

/// A checkpoint about to be appended.
#[derive(Clone, Debug, PartialEq)]
pub struct NewCheckpoint {
    /// Owning thread.
    pub thread_id: ThreadId,
    /// Target chain.
    pub namespace: Namespace,
    /// Node reached.
    pub node: Node,
    /// State after the step.
    pub state: ConversationState,
    /// Partial write that produced `state`.
    pub write: Option<StateUpdate>,
    /// Interrupt change applied in the same transaction.
    pub interrupt: InterruptWrite,
}

impl NewCheckpoint {
    /// Checkpoint with no recorded write and no interrupt change.
    #[must_use]
    pub const fn new(
        thread_id: ThreadId,
        namespace: Namespace,
        node: Node,
        state: ConversationState,
    ) -> Self {
        Self {
            thread_id,
            namespace,
            node,
            state,
            write: None,
            interrupt: InterruptWrite::Keep,
        }
    }

    /// Record the write that produced the state.
    #[must_use]
    pub fn with_write(mut self, write: StateUpdate) -> Self {
        self.write = Some(write);
        self
    }

    /// Apply an interrupt change in the same transaction.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: InterruptWrite) -> Self {
        self.interrupt = interrupt;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_roundtrip_and_terminal() {
        for node in [
            Node::Idle,
            Node::Classifying,
            Node::Routing,
            Node::InquiryHandler,
            Node::DocumentSearchHandler,
            Node::GeneralHandler,
            Node::EmailHandler,
            Node::TurnComplete,
            Node::Finalizing,
            Node::Done,
        ] {
            assert_eq!(node.as_str().parse::<Node>(), Ok(node));
        }
        assert!(Node::TurnComplete.is_terminal());
        assert!(!Node::EmailHandler.is_terminal());
    }

    #[test]
    fn test_namespace_parse() {
        assert_eq!("finalize".parse::<Namespace>(), Ok(Namespace::Finalize));
        assert!("other".parse::<Namespace>().is_err());
    }
}
