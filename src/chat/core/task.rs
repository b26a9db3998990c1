//! Task descriptor produced by classification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of work requested by the user.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Chit-chat, no retrieval.
    General,
    /// Retrieval followed by synthesis.
    #[serde(alias = "technical")]
    Inquiry,
    /// Retrieval listing only, no synthesis.
    FindDocuments,
    /// Email the latest summary.
    SendEmail,
    /// Any tag the classifier produced that this build does not know.
    #[serde(other)]
    Unknown,
}

impl TaskType {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Inquiry => "inquiry",
            Self::FindDocuments => "find_documents",
            Self::SendEmail => "send_email",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which documents a task is about.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Whole corpus, optionally narrowed by the user filter.
    #[default]
    Generic,
    /// Only the documents explicitly selected by the user.
    SelectedDocuments,
}

/// Structured task descriptor, immutable for the rest of the turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Task {
    /// Task kind.
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Semantic queries to run against the index, in order.
    pub generated_search_queries: Vec<String>,
    /// Instruction for the synthesis step.
    pub generated_llm_prompt: String,
    /// Whether the request builds on the previous turn.
    pub depend_on_last_task: bool,
    /// Document scope.
    pub scope: Scope,
}

impl Task {
    /// Build a general task with no queries.
    #[must_use]
    pub fn general() -> Self {
        Self {
            task_type: TaskType::General,
            generated_search_queries: Vec::new(),
            generated_llm_prompt: String::new(),
            depend_on_last_task: false,
            scope: Scope::Generic,
        }
    }

    /// Human-readable progress label for this task.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self.task_type {
            TaskType::FindDocuments => "Finding documents",
            TaskType::Inquiry => "Handling inquiry",
            TaskType::SendEmail => "Preparing email",
            TaskType::General | TaskType::Unknown => "General chat",
        }
    }

    /// Queries with blank entries removed.
    #[must_use]
    pub fn search_queries(&self) -> Vec<String> {
        self.generated_search_queries
            .iter()
            .map(|query| query.trim())
            .filter(|query| !query.is_empty())
            .map(str::to_string)
            .collect()
    }
}
