//! Retrieval-grounded answers.

use tracing::{debug, warn};

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::state::{ChatMessage, ConversationState, StateUpdate};
use crate::chat::core::task::Task;
use crate::chat::engine::events::EventSink;
use crate::chat::handlers::{
    HandlerContext, INVALID_QUERY_REPLY, RETRIEVAL_FAILED_REPLY, has_ids, resolve_file_ids,
    stream_reply,
};
use crate::chat::llm::GenerationRequest;
use crate::chat::retrieval::{RetrievalRequest, apply_cutoff, build_context};

/// Answer the query strictly from retrieved context.
///
/// With selected or filtered documents and no generated queries, the whole
/// scope is read instead of searched.
///
/// # Errors
/// Returns an error if the scope cannot be resolved or generation fails.
/// Index failures become a reply.
pub async fn run(
    ctx: &HandlerContext,
    state: &ConversationState,
    task: &Task,
    events: &EventSink,
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
        Ok(documents) => apply_cutoff(documents, ctx.retrieval_config.inquiry_cutoff),
        Err(err @ ChatError::Retrieval(_)) => {
            warn!(error = %err, "inquiry retrieval failed");
            events.token(RETRIEVAL_FAILED_REPLY).await;
            return Ok(StateUpdate::exchange(task, query, RETRIEVAL_FAILED_REPLY, None));
        }
        Err(err) => return Err(err),
    };
    let context = build_context(&documents);
    debug!(documents = documents.len(), context_chars = context.len(), "inquiry context");

    let mut messages = state.chat_messages.clone();
    messages.push(ChatMessage::system(
        "use ONLY the provided context to do the following.",
    ));
    messages.push(ChatMessage::system(task.generated_llm_prompt.clone()));
    let request = GenerationRequest::new(format!(
        "user query:\n{query}\n\ncontext:\n{context}\n\nAnswer:"
    ))
    .with_messages(messages);

    let reply = stream_reply(ctx.generator.as_ref(), request, events).await?;
    Ok(StateUpdate::exchange(task, query, reply, Some(documents)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::chat::core::task::{Scope, TaskType};
    use crate::chat::email::EmailResult;
    use crate::chat::handlers::fixtures;
    use crate::chat::test_support::{
        RecordingEmailSender, ScriptedGenerator, ScriptedIndex, StaticCatalog, hit,
    };

    fn inquiry(queries: &[&str], scope: Scope) -> Task {
        Task {
            task_type: TaskType::Inquiry,
            generated_search_queries: queries.iter().map(|q| (*q).to_string()).collect(),
            generated_llm_prompt: "Summarize the documents.".to_string(),
            depend_on_last_task: false,
            scope,
        }
    }

    #[tokio::test]
    async fn test_selected_documents_read_without_semantic_query() {
        let index = Arc::new(ScriptedIndex::default().with_hits(
            "",
            vec![
                hit("d1:0", "d1", "errors are values", 1.0),
                hit("other:0", "other", "unrelated", 1.0),
            ],
        ));
        let generator = Arc::new(ScriptedGenerator::new(vec!["They cover Result."]));
        let mut ctx = fixtures::context(
            ScriptedIndex::default(),
            generator.clone(),
            Arc::new(StaticCatalog::new(&[])),
            Arc::new(RecordingEmailSender::new(EmailResult::sent())),
        );
        ctx.retrieval = crate::chat::retrieval::RetrievalEngine::new(index.clone());

        let mut state = fixtures::state("Summarize the selected documents about error handling.");
        state.user_input.selected_documents = Some(vec!["d1".to_string()]);
        let task = inquiry(&[], Scope::SelectedDocuments);

        let update = run(&ctx, &state, &task, &EventSink::discard()).await.unwrap();

        let calls = index.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].query, "");
        assert_eq!(calls[0].document_ids, Some(vec!["d1".to_string()]));
        let documents = update.last_conversation.unwrap().documents.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(update.append_messages[1].content, "They cover Result.");

        let request = generator.requests().remove(0);
        assert!(request.prompt.starts_with("user query:\nSummarize the selected documents"));
        assert!(request.prompt.contains("context:\nerrors are values\n\nAnswer:"));
        let system: Vec<&str> = request.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            system,
            vec!["use ONLY the provided context to do the following.", "Summarize the documents."]
        );
    }

    #[tokio::test]
    async fn test_context_drops_low_scores() {
        let index = ScriptedIndex::default().with_hits(
            "tokio",
            vec![hit("a:0", "a", "kept", 0.8), hit("b:0", "b", "dropped", 0.4)],
        );
        let ctx = fixtures::simple_context(index, vec!["answer"]);
        let update = run(
            &ctx,
            &fixtures::state("what is tokio"),
            &inquiry(&["tokio"], Scope::Generic),
            &EventSink::discard(),
        )
        .await
        .unwrap();
        let documents = update.last_conversation.unwrap().documents.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].content, "kept");
    }

    #[tokio::test]
    async fn test_no_query_no_scope() {
        let ctx = fixtures::simple_context(ScriptedIndex::default(), vec![]);
        let update = run(
            &ctx,
            &fixtures::state("?"),
            &inquiry(&[], Scope::Generic),
            &EventSink::discard(),
        )
        .await
        .unwrap();
        assert_eq!(update.append_messages[1].content, INVALID_QUERY_REPLY);
    }

    #[tokio::test]
    async fn test_index_failure_becomes_reply() {
        let index = ScriptedIndex::default().failing_on("tokio");
        let ctx = fixtures::simple_context(index, vec![]);
        let update = run(
            &ctx,
            &fixtures::state("what is tokio"),
            &inquiry(&["tokio"], Scope::Generic),
            &EventSink::discard(),
        )
        .await
        .unwrap();
        assert_eq!(update.append_messages[1].content, RETRIEVAL_FAILED_REPLY);
    }
}
