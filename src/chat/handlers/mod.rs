//! Task handlers, one per routed task type.
//!
//! Each handler is a step function over the current state. Handlers that
//! need input from the caller return [`HandlerOutcome::Suspend`] with a
//! named suspension point instead of blocking.

pub mod document_search;
pub mod email;
pub mod general;
pub mod inquiry;

use std::sync::Arc;

use futures::StreamExt;

use crate::chat::core::config::RetrievalConfig;
use crate::chat::core::errors::ChatResult;
use crate::chat::core::interrupt::PendingInterrupt;
use crate::chat::core::state::{StateUpdate, UserInput};
use crate::chat::email::EmailSender;
use crate::chat::engine::events::EventSink;
use crate::chat::llm::{GenerationRequest, TextGenerator};
use crate::chat::retrieval::{DocumentCatalog, RetrievalEngine};

/// Reply used when there is nothing to search for.
pub const INVALID_QUERY_REPLY: &str = "Please provide valid query";
/// Reply when the index cannot be searched.
pub const RETRIEVAL_FAILED_REPLY: &str =
    "I could not search the documents right now. Please try again later.";

/// Collaborators shared by every handler.
#[derive(Clone)]
pub struct HandlerContext {
    /// Multi-query retrieval.
    pub retrieval: RetrievalEngine,
    /// `k`, `fetch_k`, weights and cutoffs.
    pub retrieval_config: RetrievalConfig,
    /// Streaming text model for replies.
    pub generator: Arc<dyn TextGenerator>,
    /// Resolves user filters to file ids.
    pub catalog: Arc<dyn DocumentCatalog>,
    /// Email delivery.
    pub email: Arc<dyn EmailSender>,
    /// System instructions of the general handler.
    pub general_chat_prompt: String,
}

/// Result of running or resuming a handler.
#[derive(Clone, Debug, PartialEq)]
pub enum HandlerOutcome {
    /// The handler finished; apply the write and complete the turn.
    Complete(StateUpdate),
    /// The handler is parked until the caller answers.
    Suspend(PendingInterrupt),
}

/// File ids the turn is scoped to: the explicit selection, else the ids
/// matching the user filter, else no restriction.
///
/// # Errors
/// Returns an error if the filter is invalid or the catalog fails.
pub async fn resolve_file_ids(
    catalog: &dyn DocumentCatalog,
    input: &UserInput,
) -> ChatResult<Option<Vec<String>>> {
    if input.has_selected_documents() {
        return Ok(Some(input.selected_ids().to_vec()));
    }
    match &input.filter {
        Some(filter) if !filter.is_empty() => Ok(Some(catalog.file_ids(filter.clone()).await?)),
        _ => Ok(None),
    }
}

fn has_ids(ids: Option<&[String]>) -> bool {
    ids.is_some_and(|ids| !ids.is_empty())
}

/// Stream a reply to `events` and return the full text.
async fn stream_reply(
    generator: &dyn TextGenerator,
    request: GenerationRequest,
    events: &EventSink,
) -> ChatResult<String> {
    let mut tokens = generator.stream(request).await?;
    let mut reply = String::new();
    while let Some(token) = tokens.next().await {
        let token = token?;
        events.token(&token).await;
        reply.push_str(&token);
    }
    Ok(reply)
}
