//! Free-form chat.

use tracing::debug;

use crate::chat::core::errors::ChatResult;
use crate::chat::core::state::{ChatMessage, ConversationState, StateUpdate};
use crate::chat::core::task::Task;
use crate::chat::engine::events::EventSink;
use crate::chat::handlers::{HandlerContext, stream_reply};
use crate::chat::llm::GenerationRequest;

/// Answer from the system prompt, the rolling summary and the recent log.
///
/// # Errors
/// Returns an error if generation fails.
pub async fn run(
    ctx: &HandlerContext,
    state: &ConversationState,
    task: &Task,
    events: &EventSink,
) -> ChatResult<StateUpdate> {
    let query = &state.user_input.query;
    let request = GenerationRequest::new(query.clone()).with_messages(prompt_messages(ctx, state));
    debug!(chars = request.char_count(), "general prompt");

    let reply = stream_reply(ctx.generator.as_ref(), request, events).await?;
    Ok(StateUpdate::exchange(task, query, reply, None))
}

fn prompt_messages(ctx: &HandlerContext, state: &ConversationState) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(ctx.general_chat_prompt.clone())];

    if let Some(summary) = state
        .values
        .historical_summary
        .as_deref()
        .filter(|summary| !summary.is_empty())
    {
        messages.push(ChatMessage::system(
            "You will be provided with Historical Summary for the conversations",
        ));
        messages.push(ChatMessage::system(format!(
            "This is the Historical Summary :\n{summary}"
        )));
    }

    // Framing stays next to the log it wraps; system text would be hoisted
    // into the preamble.
    if !state.chat_messages.is_empty() {
        messages.push(ChatMessage::user(format!(
            "The following are the latest {} chat messages:",
            state.chat_messages.len()
        )));
        messages.extend(state.chat_messages.iter().cloned());
        messages.push(ChatMessage::user("End of Chat messages"));
    }
    messages
}
