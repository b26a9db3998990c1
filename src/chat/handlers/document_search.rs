//! Listing-only document search.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::chat::core::document::RetrievedDocument;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::state::{ConversationState, StateUpdate};
use crate::chat::core::task::Task;
use crate::chat::handlers::{
    HandlerContext, INVALID_QUERY_REPLY, RETRIEVAL_FAILED_REPLY, has_ids, resolve_file_ids,
};
use crate::chat::retrieval::{RetrievalRequest, apply_cutoff};

const SOURCE: &str = "find_documents";

/// Count the documents matching the task's queries within the turn scope.
///
/// # Errors
/// Returns an error if the scope cannot be resolved. Index failures become
/// a reply.
pub async fn run(
    ctx: &HandlerContext,
    state: &ConversationState,
    task: &Task,
) -> ChatResult<StateUpdate> {
    let query = &state.user_input.query;
    let file_ids = resolve_file_ids(ctx.catalog.as_ref(), &state.user_input).await?;
    let mut queries = task.search_queries();

    if queries.is_empty() {
        if !has_ids(file_ids.as_deref()) {
            return Ok(StateUpdate::exchange(task, query, INVALID_QUERY_REPLY, None));
        }
        queries.push(String::new());
    }

    let request = RetrievalRequest::from_config(&ctx.retrieval_config, queries, file_ids);
    let documents = match ctx.retrieval.retrieve(request).await {
        Ok(documents) => apply_cutoff(documents, ctx.retrieval_config.listing_cutoff),
        Err(err @ ChatError::Retrieval(_)) => {
            warn!(error = %err, "document search failed");
            return Ok(StateUpdate::exchange(task, query, RETRIEVAL_FAILED_REPLY, None));
        }
        Err(err) => return Err(err),
    };
    let reply = listing_message(&documents);
    info!(documents = documents.len(), reply = %reply, "document search complete");

    Ok(StateUpdate::exchange(task, query, reply.clone(), Some(documents)).with_progress(SOURCE, reply))
}

/// "No documents found", "1 document found." or "N documents found.",
/// counting distinct files.
#[must_use]
pub fn listing_message(documents: &[RetrievedDocument]) -> String {
    let files: HashSet<&str> = documents.iter().filter_map(RetrievedDocument::file_id).collect();
    match files.len() {
        _ if documents.is_empty() => "No documents found".to_string(),
        1 => "1 document found.".to_string(),
        n => format!("{n} documents found."),
    }
}
