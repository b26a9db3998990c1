//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::chat::{ChatResult, ConversationOrchestrator, ScholarConfig};

/// Shared application state.
pub struct AppState {
    /// Conversation engine.
    pub orchestrator: ConversationOrchestrator,
}

impl AppState {
    /// Build the engine with Ollama and `SQLite` backends.
    ///
    /// # Errors
    /// Returns an error if any backend cannot be initialized.
    pub async fn new(config: &ScholarConfig) -> ChatResult<Arc<Self>> {
        let orchestrator = ConversationOrchestrator::from_config(config).await?;
        Ok(Self::with_orchestrator(orchestrator))
    }

    /// Wrap an existing engine.
    #[must_use]
    pub fn with_orchestrator(orchestrator: ConversationOrchestrator) -> Arc<Self> {
        Arc::new(Self { orchestrator })
    }
}
