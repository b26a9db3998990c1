//! Conversation state: an append-only message log plus last-value-wins fields.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chat::core::document::RetrievedDocument;
use crate::chat::core::filter::UserFilter;
use crate::chat::core::ids::MessageId;
use crate::chat::core::task::Task;

/// Role of a chat message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// User input.
    User,
    /// Assistant response.
    Assistant,
    /// System instruction.
    System,
}

impl ChatRole {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A role-tagged message in the conversation log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message identifier, used by pruning.
    pub id: MessageId,
    /// Author role.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Build a message with a fresh id.
    #[must_use]
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
        }
    }

    /// Build a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    /// Build an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    /// Build a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }
}

/// Render messages as a `Role: text` transcript.
#[must_use]
pub fn buffer_string(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(match message.role {
            ChatRole::User => "Human: ",
            ChatRole::Assistant => "AI: ",
            ChatRole::System => "System: ",
        });
        out.push_str(&message.content);
    }
    out
}

/// Input of one user turn.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInput {
    /// Query text.
    pub query: String,
    /// Optional metadata filter.
    #[serde(default)]
    pub filter: Option<UserFilter>,
    /// Explicitly selected document ids.
    #[serde(default)]
    pub selected_documents: Option<Vec<String>>,
}

impl UserInput {
    /// Build an input with only a query.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filter: None,
            selected_documents: None,
        }
    }

    /// Selected document ids (empty when none).
    #[must_use]
    pub fn selected_ids(&self) -> &[String] {
        self.selected_documents.as_deref().unwrap_or_default()
    }

    /// Whether the user explicitly selected documents.
    #[must_use]
    pub fn has_selected_documents(&self) -> bool {
        !self.selected_ids().is_empty()
    }
}

/// Result of the last completed turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Task that was handled.
    pub task: Task,
    /// Documents retrieved for the turn, if any.
    pub documents: Option<Vec<RetrievedDocument>>,
    /// User request.
    pub request: ChatMessage,
    /// Assistant response.
    pub response: ChatMessage,
}

/// Progress indicator shown while a turn runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMessage {
    /// Progress text.
    pub content: String,
    /// Step that produced it.
    pub source: String,
}

impl ToolMessage {
    /// Build a progress message.
    #[must_use]
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
        }
    }
}

/// Last-value-wins part of the state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateValues {
    /// Task of the current turn.
    pub task: Option<Task>,
    /// Last completed conversation.
    pub last_conversation: Option<Conversation>,
    /// Rolling summary.
    pub historical_summary: Option<String>,
    /// Progress indicators of the latest step.
    #[serde(default)]
    pub tool_messages: Vec<ToolMessage>,
    /// Set once a compaction cycle completes.
    #[serde(default)]
    pub is_finalized: bool,
}

/// Full conversation state held by a checkpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Input of the current turn.
    pub user_input: UserInput,
    /// Append-only message log (pruned only by compaction).
    #[serde(default)]
    pub chat_messages: Vec<ChatMessage>,
    /// Last-value-wins fields.
    #[serde(flatten)]
    pub values: StateValues,
}

/// A partial write produced by one state-machine step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// Messages to append (a message with a known id replaces it in place).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub append_messages: Vec<ChatMessage>,
    /// Message ids to remove.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_messages: Vec<MessageId>,
    /// New task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    /// New last conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_conversation: Option<Conversation>,
    /// New rolling summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_summary: Option<String>,
    /// New progress indicators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_messages: Option<Vec<ToolMessage>>,
    /// New finalized flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_finalized: Option<bool>,
}

impl StateUpdate {
    /// Update that only replaces the progress indicator.
    #[must_use]
    pub fn progress(source: &str, content: impl Into<String>) -> Self {
        Self {
            tool_messages: Some(vec![ToolMessage::new(source, content)]),
            ..Self::default()
        }
    }

    /// Append a request/response pair and record it as the last conversation.
    #[must_use]
    pub fn exchange(
        task: &Task,
        query: &str,
        reply: impl Into<String>,
        documents: Option<Vec<RetrievedDocument>>,
    ) -> Self {
        let request = ChatMessage::user(query);
        let response = ChatMessage::assistant(reply);
        Self {
            append_messages: vec![request.clone(), response.clone()],
            last_conversation: Some(Conversation {
                task: task.clone(),
                documents,
                request,
                response,
            }),
            ..Self::default()
        }
    }

    /// Attach a progress indicator.
    #[must_use]
    pub fn with_progress(mut self, source: &str, content: impl Into<String>) -> Self {
        self.tool_messages = Some(vec![ToolMessage::new(source, content)]);
        self
    }
}

impl ConversationState {
    /// Fresh state for a new turn, carrying over the log and the summary.
    #[must_use]
    pub fn for_new_turn(previous: Option<&Self>, user_input: UserInput) -> Self {
        let (chat_messages, historical_summary) = previous.map_or_else(
            || (Vec::new(), None),
            |state| {
                (
                    state.chat_messages.clone(),
                    state.values.historical_summary.clone(),
                )
            },
        );
        Self {
            user_input,
            chat_messages,
            values: StateValues {
                historical_summary,
                ..StateValues::default()
            },
        }
    }

    /// Apply a step's write: the log merges, every other field overwrites.
    pub fn apply(&mut self, update: StateUpdate) {
        if !update.remove_messages.is_empty() {
            self.chat_messages
                .retain(|message| !update.remove_messages.contains(&message.id));
        }
        for message in update.append_messages {
            match self.chat_messages.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => *existing = message,
                None => self.chat_messages.push(message),
            }
        }
        if let Some(task) = update.task {
            self.values.task = Some(task);
        }
        if let Some(conversation) = update.last_conversation {
            self.values.last_conversation = Some(conversation);
        }
        if let Some(summary) = update.historical_summary {
            self.values.historical_summary = Some(summary);
        }
        if let Some(tool_messages) = update.tool_messages {
            self.values.tool_messages = tool_messages;
        }
        if let Some(is_finalized) = update.is_finalized {
            self.values.is_finalized = is_finalized;
        }
    }

    /// Newest assistant message in the log.
    #[must_use]
    pub fn last_assistant_message(&self) -> Option<&ChatMessage> {
        self.chat_messages
            .iter()
            .rev()
            .find(|message| message.role == ChatRole::Assistant && !message.content.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_appends_and_overwrites() {
        let mut state = ConversationState::for_new_turn(None, UserInput::new("hi"));
        let task = Task::general();
        state.apply(StateUpdate::progress("classify", "Thinking"));
        state.apply(StateUpdate::exchange(&task, "hi", "hello", None).with_progress("general", "done"));
        assert_eq!(state.chat_messages.len(), 2);
        assert_eq!(state.values.tool_messages.len(), 1);
        assert_eq!(state.values.tool_messages[0].content, "done");
        assert_eq!(
            state.values.last_conversation.as_ref().map(|c| c.response.content.as_str()),
            Some("hello")
        );
    }

    #[test]
    fn test_apply_removes_by_id() {
        let mut state = ConversationState::default();
        let first = ChatMessage::user("a");
        let second = ChatMessage::assistant("b");
        state.apply(StateUpdate {
            append_messages: vec![first.clone(), second.clone()],
            ..StateUpdate::default()
        });
        state.apply(StateUpdate {
            remove_messages: vec![first.id],
            ..StateUpdate::default()
        });
        assert_eq!(state.chat_messages, vec![second]);
    }

    #[test]
    fn test_new_turn_carries_log_and_summary_only() {
        let mut previous = ConversationState::for_new_turn(None, UserInput::new("one"));
        previous.apply(StateUpdate::exchange(&Task::general(), "one", "two", None));
        previous.values.historical_summary = Some("so far".to_string());
        previous.values.is_finalized = true;

        let next = ConversationState::for_new_turn(Some(&previous), UserInput::new("three"));
        assert_eq!(next.chat_messages.len(), 2);
        assert_eq!(next.values.historical_summary.as_deref(), Some("so far"));
        assert!(next.values.task.is_none());
        assert!(next.values.last_conversation.is_none());
        assert!(!next.values.is_finalized);
    }

    #[test]
    fn test_user_input_accepts_null_selection() {
        let input: UserInput =
            serde_json::from_str(r#"{"query":"q","filter":null,"selected_documents":null}"#)
                .unwrap();
        assert!(!input.has_selected_documents());
    }

    #[test]
    fn test_buffer_string() {
        let text = buffer_string(&[ChatMessage::user("hi"), ChatMessage::assistant("hello")]);
        assert_eq!(text, "Human: hi\nAI: hello");
    }
}
