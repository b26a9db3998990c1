//! Few-shot example banks for task classification.
//!
//! Defaults are compiled in; a directory may override either bank with a file
//! of the same name.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::state::{ChatMessage, ChatRole};
use crate::chat::core::task::Task;

const FRESH_DEFAULT: &str = include_str!("prompts/fresh_classification.json");
const CHAT_DEFAULT: &str = include_str!("prompts/chat_classification.json");

/// Which prompt strategy a bank serves.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PromptKind {
    /// Thread without history.
    Fresh,
    /// Thread with prior messages.
    Continuation,
}

impl PromptKind {
    /// Override file name.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Fresh => "fresh_classification.json",
            Self::Continuation => "chat_classification.json",
        }
    }

    const fn default_source(self) -> &'static str {
        match self {
            Self::Fresh => FRESH_DEFAULT,
            Self::Continuation => CHAT_DEFAULT,
        }
    }
}

/// One message of an example conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleMessage {
    /// `human` or `ai`.
    pub role: String,
    /// Message text.
    pub content: String,
}

/// A worked classification example.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FewShotExample {
    /// Example query.
    pub query: String,
    /// Whether documents were selected in the example.
    pub has_selected_documents: bool,
    /// Example conversation (continuation bank only).
    #[serde(default)]
    pub chat_messages: Vec<ExampleMessage>,
    /// Expected task.
    pub output: Task,
}

impl FewShotExample {
    /// Example conversation as chat messages, `Human: Hi` when empty.
    #[must_use]
    pub fn conversation(&self) -> Vec<ChatMessage> {
        if self.chat_messages.is_empty() {
            return vec![ChatMessage::user("Hi")];
        }
        self.chat_messages
            .iter()
            .map(|message| {
                let role = message.role.parse().unwrap_or(ChatRole::User);
                ChatMessage::new(role, message.content.clone())
            })
            .collect()
    }
}

/// System prompt, human template and examples of one strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExampleBank {
    /// Classification instructions.
    pub system_prompt: String,
    /// Template of the user turn (`{{query}}`, `{{has_selected_documents}}`,
    /// `{{chat_messages}}`).
    pub human_prompt: String,
    /// Worked examples.
    pub few_shots: Vec<FewShotExample>,
}

impl ExampleBank {
    /// Load a bank, preferring `override_dir/<file_name>` when it exists.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or does not parse.
    pub fn load(kind: PromptKind, override_dir: Option<&Path>) -> ChatResult<Self> {
        if let Some(dir) = override_dir {
            let path = dir.join(kind.file_name());
            if path.is_file() {
                info!(path = %path.display(), "loading classification examples override");
                let raw = std::fs::read_to_string(&path)?;
                return Self::parse(&raw);
            }
        }
        Self::parse(kind.default_source())
    }

    /// Parse a bank from JSON.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the JSON is malformed or has no examples.
    pub fn parse(raw: &str) -> ChatResult<Self> {
        let bank: Self = serde_json::from_str(raw)
            .map_err(|err| ChatError::InvalidConfig(format!("invalid example bank: {err}")))?;
        if bank.few_shots.is_empty() {
            return Err(ChatError::InvalidConfig(
                "example bank has no examples".to_string(),
            ));
        }
        Ok(bank)
    }

    /// Examples whose selection flag matches the request.
    #[must_use]
    pub fn matching(&self, has_selected_documents: bool) -> Vec<&FewShotExample> {
        self.few_shots
            .iter()
            .filter(|example| example.has_selected_documents == has_selected_documents)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::core::task::{Scope, TaskType};

    #[test]
    fn test_default_banks_parse() {
        let fresh = ExampleBank::load(PromptKind::Fresh, None).unwrap();
        let chat = ExampleBank::load(PromptKind::Continuation, None).unwrap();
        assert!(fresh.human_prompt.contains("{{query}}"));
        assert!(chat.human_prompt.contains("{{chat_messages}}"));
        assert!(!fresh.matching(true).is_empty());
        assert!(!chat.matching(false).is_empty());
    }

    #[test]
    fn test_default_bank_covers_reference_scenarios() {
        let fresh = ExampleBank::load(PromptKind::Fresh, None).unwrap();
        let hello = fresh
            .few_shots
            .iter()
            .find(|example| example.query == "Hello there!")
            .unwrap();
        assert_eq!(hello.output.task_type, TaskType::General);
        assert_eq!(hello.output.scope, Scope::Generic);

        let selected = fresh
            .few_shots
            .iter()
            .find(|example| example.query.starts_with("Summarize the selected documents"))
            .unwrap();
        assert_eq!(selected.output.task_type, TaskType::Inquiry);
        assert!(selected.output.generated_search_queries.is_empty());
        assert_eq!(selected.output.scope, Scope::SelectedDocuments);
    }

    #[test]
    fn test_override_dir_wins() {
        let dir = std::env::temp_dir().join(format!("scholar-bank-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let raw = r#"{"system_prompt":"S","human_prompt":"{{query}}","few_shots":[
            {"query":"q","has_selected_documents":false,"output":{"type":"general",
            "generated_search_queries":[],"generated_llm_prompt":"","depend_on_last_task":false,"scope":"generic"}}]}"#;
        std::fs::write(dir.join("fresh_classification.json"), raw).unwrap();

        let bank = ExampleBank::load(PromptKind::Fresh, Some(&dir)).unwrap();
        assert_eq!(bank.system_prompt, "S");
        let chat = ExampleBank::load(PromptKind::Continuation, Some(&dir)).unwrap();
        assert_ne!(chat.system_prompt, "S");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_bank_rejected() {
        let raw = r#"{"system_prompt":"S","human_prompt":"{{query}}","few_shots":[]}"#;
        assert!(matches!(ExampleBank::parse(raw), Err(ChatError::InvalidConfig(_))));
    }

    #[test]
    fn test_example_conversation_defaults_to_hi() {
        let fresh = ExampleBank::load(PromptKind::Fresh, None).unwrap();
        let conversation = fresh.few_shots[0].conversation();
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation[0].content, "Hi");
    }
}
