//! Rolling-summary compaction of the conversation log.

use std::sync::Arc;

use tracing::debug;

use crate::chat::core::config::FinalizeConfig;
use crate::chat::core::errors::ChatResult;
use crate::chat::core::state::{ConversationState, StateUpdate};
use crate::chat::llm::{GenerationRequest, TextGenerator};

/// Folds the message log into the rolling summary and prunes old messages.
pub struct SummaryFinalizer {
    generator: Arc<dyn TextGenerator>,
    keep_messages: usize,
    temperature: f64,
}

impl SummaryFinalizer {
    /// Create a finalizer.
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>, config: &FinalizeConfig) -> Self {
        Self {
            generator,
            keep_messages: config.keep_messages,
            temperature: config.temperature,
        }
    }

    /// Compute the compaction write for `state`.
    ///
    /// # Errors
    /// Returns an error if the summary cannot be generated.
    pub async fn compact(&self, state: &ConversationState) -> ChatResult<StateUpdate> {
        let messages = &state.chat_messages;
        let existing = state
            .values
            .historical_summary
            .as_deref()
            .filter(|summary| !summary.trim().is_empty());

        let historical_summary = if messages.is_empty() {
            existing.map(str::to_string)
        } else {
            let prompt = summary_prompt(existing);
            let request = GenerationRequest::new(prompt)
                .with_messages(messages.clone())
                .with_temperature(self.temperature);
            Some(self.generator.generate(request).await?)
        };

        let remove_messages = if messages.len() > self.keep_messages {
            let cut = messages.len() - self.keep_messages;
            messages[..cut].iter().map(|message| message.id).collect()
        } else {
            Vec::new()
        };
        debug!(
            messages = messages.len(),
            pruned = remove_messages.len(),
            "conversation compacted"
        );

        Ok(StateUpdate {
            remove_messages,
            historical_summary,
            is_finalized: Some(true),
            ..StateUpdate::default()
        })
    }
}

fn summary_prompt(existing: Option<&str>) -> String {
    match existing {
        Some(summary) => format!(
            "This is a summary of the conversation to date: {summary}\n\n\
             Extend the summary by taking into account the new messages above:"
        ),
        None => "Create a summary of the conversation above:".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::core::state::{ChatMessage, UserInput};
    use crate::chat::test_support::ScriptedGenerator;

    fn state_with(count: usize, summary: Option<&str>) -> ConversationState {
        let mut state = ConversationState::for_new_turn(None, UserInput::new("q"));
        for i in 0..count {
            let message = if i % 2 == 0 {
                ChatMessage::user(format!("u{i}"))
            } else {
                ChatMessage::assistant(format!("a{i}"))
            };
            state.apply(StateUpdate {
                append_messages: vec![message],
                ..StateUpdate::default()
            });
        }
        state.values.historical_summary = summary.map(str::to_string);
        state
    }

    fn finalizer(generator: Arc<ScriptedGenerator>) -> SummaryFinalizer {
        SummaryFinalizer::new(generator, &FinalizeConfig::default())
    }

    #[tokio::test]
    async fn test_six_messages_keep_last_four() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["new summary"]));
        let mut state = state_with(6, None);
        let update = finalizer(generator.clone()).compact(&state).await.unwrap();
        state.apply(update);

        assert_eq!(state.chat_messages.len(), 4);
        assert_eq!(state.chat_messages[0].content, "u2");
        assert!(state.values.is_finalized);
        assert_eq!(state.values.historical_summary.as_deref(), Some("new summary"));

        let request = generator.requests().remove(0);
        assert_eq!(request.prompt, "Create a summary of the conversation above:");
        assert_eq!(request.messages.len(), 6);
        assert_eq!(request.options.temperature, Some(0.1));
    }

    #[tokio::test]
    async fn test_short_log_is_untouched_and_summary_extended() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["extended"]));
        let mut state = state_with(4, Some("earlier"));
        let before = state.chat_messages.clone();
        let update = finalizer(generator.clone()).compact(&state).await.unwrap();
        state.apply(update);

        assert_eq!(state.chat_messages, before);
        assert!(state.values.is_finalized);
        let prompt = generator.requests().remove(0).prompt;
        assert!(prompt.starts_with("This is a summary of the conversation to date: earlier"));
        assert!(prompt.ends_with("Extend the summary by taking into account the new messages above:"));
    }

    #[tokio::test]
    async fn test_empty_log_skips_generation() {
        let generator = Arc::new(ScriptedGenerator::new(vec![]));
        let update = finalizer(generator.clone())
            .compact(&state_with(0, Some("kept")))
            .await
            .unwrap();
        assert_eq!(update.historical_summary.as_deref(), Some("kept"));
        assert_eq!(update.is_finalized, Some(true));
        assert!(generator.requests().is_empty());
    }
}
