//! Document-grounded chat: classification, hybrid retrieval, task handlers
//! and the checkpointed conversation state machine.

pub mod classify;
pub mod core;
pub mod email;
pub mod embedding;
pub mod engine;
pub mod handlers;
pub mod llm;
pub mod retrieval;
pub mod storage;
pub mod summarization;

#[cfg(test)]
pub(crate) mod test_support;

pub use self::core::config::ScholarConfig;
pub use self::core::errors::{ChatError, ChatResult};
pub use self::core::ids::ThreadId;
pub use self::core::state::{ConversationState, UserInput};
pub use self::engine::{ConversationOrchestrator, TurnEvent};
