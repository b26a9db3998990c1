//! Task classification: few-shot prompt, deterministic generation, strict parse.

use std::sync::Arc;

use tracing::{debug, info};

use crate::chat::classify::few_shots::{ExampleBank, PromptKind};
use crate::chat::classify::prompt::build_request;
use crate::chat::classify::ranker::ExampleRanker;
use crate::chat::core::config::ClassifierConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::state::ChatMessage;
use crate::chat::core::task::Task;
use crate::chat::llm::TextGenerator;

/// Converts a query plus short-term context into a [`Task`].
pub struct TaskClassifier {
    generator: Arc<dyn TextGenerator>,
    ranker: Arc<dyn ExampleRanker>,
    fresh: ExampleBank,
    continuation: ExampleBank,
    fresh_top_n: usize,
    continuation_top_n: usize,
}

impl TaskClassifier {
    /// Create a classifier, loading both example banks.
    ///
    /// # Errors
    /// Returns an error if an example bank cannot be loaded.
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        ranker: Arc<dyn ExampleRanker>,
        config: &ClassifierConfig,
    ) -> ChatResult<Self> {
        let dir = config.prompts_dir.as_deref();
        Ok(Self {
            generator,
            ranker,
            fresh: ExampleBank::load(PromptKind::Fresh, dir)?,
            continuation: ExampleBank::load(PromptKind::Continuation, dir)?,
            fresh_top_n: config.fresh_top_n,
            continuation_top_n: config.continuation_top_n,
        })
    }

    /// Classify `query`.
    ///
    /// Uses the fresh strategy when `recent_messages` is empty, otherwise the
    /// continuation strategy.
    ///
    /// # Errors
    /// Returns `Classification` if the output does not parse as a task;
    /// generation and ranking failures propagate unchanged.
    pub async fn classify(
        &self,
        query: &str,
        has_selected_documents: bool,
        recent_messages: &[ChatMessage],
        historical_summary: Option<&str>,
    ) -> ChatResult<Task> {
        let (kind, bank, top_n) = if recent_messages.is_empty() {
            (PromptKind::Fresh, &self.fresh, self.fresh_top_n)
        } else {
            (PromptKind::Continuation, &self.continuation, self.continuation_top_n)
        };

        let candidates = bank.matching(has_selected_documents);
        let candidate_queries: Vec<String> =
            candidates.iter().map(|example| example.query.clone()).collect();
        let order = self.ranker.rank(query, &candidate_queries, top_n).await?;
        let examples: Vec<_> = order
            .into_iter()
            .filter_map(|index| candidates.get(index).copied())
            .collect();
        debug!(?kind, examples = examples.len(), "classification prompt");

        let request = build_request(
            bank,
            kind,
            &examples,
            query,
            has_selected_documents,
            recent_messages,
            historical_summary,
        );
        let raw = self.generator.generate(request).await?;
        let task = parse_task(&raw)?;
        info!(
            task_type = %task.task_type,
            queries = task.generated_search_queries.len(),
            "query classified"
        );
        Ok(task)
    }
}

/// Parse generator output into a task, tolerating code fences around the
/// JSON object.
///
/// # Errors
/// Returns `Classification` if no object parses against the task schema.
pub fn parse_task(raw: &str) -> ChatResult<Task> {
    let trimmed = raw.trim();
    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    };
    serde_json::from_str(candidate).map_err(|err| {
        ChatError::Classification(format!("output does not match the task schema: {err}"))
    })
}
