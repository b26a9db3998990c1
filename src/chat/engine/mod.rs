//! Turn orchestration: routing, event stream and the per-thread state machine.

pub mod events;
pub mod orchestrator;
pub mod router;

pub use events::{EventSink, TurnEvent};
pub use orchestrator::{ChatBackends, ConversationOrchestrator, TurnStatus};
pub use router::Route;
