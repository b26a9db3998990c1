//! Emailing the latest summary.
//!
//! The handler runs as a small state machine: [`start`] either finishes
//! immediately or parks at [`SuspensionPoint::EmailAwaitingRecipient`];
//! [`resume`] advances from the stored point using the caller's answer.

use serde_json::Value;
use tracing::{info, warn};

use crate::chat::core::errors::ChatError;
use crate::chat::core::interrupt::{
    EMAIL_SUBJECT, InterruptRequest, PendingInterrupt, RecipientResponse, SuspensionPoint,
    is_confirmed,
};
use crate::chat::core::state::{ConversationState, StateUpdate};
use crate::chat::core::task::Task;
use crate::chat::email::EmailMessage;
use crate::chat::handlers::{HandlerContext, HandlerOutcome};

const SOURCE: &str = "send_email";
const SUMMARY_KEYS: [&str; 5] = ["text", "summary", "content", "body", "message"];

/// Reply when there is nothing to send.
pub const NO_SUMMARY_REPLY: &str = "I don't have any summary to send. Please ask me to summarize \
     some documents first, then request the email.";
/// Reply when the recipient answer is incomplete.
pub const MISSING_RECIPIENT_REPLY: &str = "Email address and name are required. Please try again.";
/// Reply when the send is not confirmed.
pub const CANCELLED_REPLY: &str = "Email sending cancelled.";

/// Begin the email flow.
#[must_use]
pub fn start(state: &ConversationState, task: &Task) -> HandlerOutcome {
    let Some(summary) = summary_content(state) else {
        info!("no summary available for email");
        return HandlerOutcome::Complete(StateUpdate::exchange(
            task,
            &state.user_input.query,
            NO_SUMMARY_REPLY,
            None,
        ));
    };
    HandlerOutcome::Suspend(PendingInterrupt {
        request: InterruptRequest::email_input(),
        point: SuspensionPoint::EmailAwaitingRecipient { summary },
    })
}

/// Continue from `point` with the caller's `answer`.
pub async fn resume(
    ctx: &HandlerContext,
    state: &ConversationState,
    task: &Task,
    point: SuspensionPoint,
    answer: &Value,
) -> HandlerOutcome {
    let query = &state.user_input.query;
    match point {
        SuspensionPoint::EmailAwaitingRecipient { summary } => {
            let recipient = RecipientResponse::from_resume(answer);
            if let Err(err) = recipient.validate() {
                info!(error = %err, "recipient rejected");
                return HandlerOutcome::Complete(StateUpdate::exchange(
                    task,
                    query,
                    MISSING_RECIPIENT_REPLY,
                    None,
                ));
            }
            HandlerOutcome::Suspend(PendingInterrupt {
                request: InterruptRequest::email_confirmation(
                    &recipient.email,
                    &recipient.name,
                    &summary,
                ),
                point: SuspensionPoint::EmailAwaitingConfirmation {
                    summary,
                    email: recipient.email,
                    name: recipient.name,
                },
            })
        }
        SuspensionPoint::EmailAwaitingConfirmation {
            summary,
            email,
            name,
        } => {
            if !is_confirmed(answer) {
                return HandlerOutcome::Complete(StateUpdate::exchange(
                    task,
                    query,
                    CANCELLED_REPLY,
                    None,
                ));
            }
            let result = ctx
                .email
                .send_email(EmailMessage {
                    to_email: email.clone(),
                    to_name: name.clone(),
                    subject: EMAIL_SUBJECT.to_string(),
                    body: summary,
                })
                .await;

            let (reply, progress) = if result.success {
                info!(to = %email, "summary email sent");
                (format!("Email sent successfully to {name} ({email})."), "Email sent")
            } else {
                let reason = result
                    .error_message
                    .unwrap_or_else(|| "unknown error".to_string());
                warn!(error = %ChatError::EmailDelivery(reason.clone()), "summary email failed");
                (
                    format!("Failed to send email: {reason}. Please try again later."),
                    "Email failed",
                )
            };
            HandlerOutcome::Complete(
                StateUpdate::exchange(task, query, reply, None).with_progress(SOURCE, progress),
            )
        }
    }
}

/// Most recent summary-like content: the rolling summary, else the last
/// response, else the newest assistant message.
fn summary_content(state: &ConversationState) -> Option<String> {
    let non_empty = |text: &str| (!text.trim().is_empty()).then(|| text.to_string());
    state
        .values
        .historical_summary
        .as_deref()
        .and_then(non_empty)
        .or_else(|| {
            state
                .values
                .last_conversation
                .as_ref()
                .and_then(|conversation| non_empty(&conversation.response.content))
        })
        .or_else(|| {
            state
                .last_assistant_message()
                .and_then(|message| non_empty(&message.content))
        })
        .map(|content| unwrap_json_text(&content))
}

/// Text of the first string field among [`SUMMARY_KEYS`] when `content` is a
/// JSON object, else `content` unchanged.
fn unwrap_json_text(content: &str) -> String {
    serde_json::from_str::<Value>(content)
        .ok()
        .and_then(|value| {
            let object = value.as_object()?;
            SUMMARY_KEYS
                .iter()
                .find_map(|key| object.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::chat::core::state::ChatMessage;
    use crate::chat::core::task::{Scope, TaskType};
    use crate::chat::email::EmailResult;
    use crate::chat::handlers::fixtures;
    use crate::chat::test_support::{
        RecordingEmailSender, ScriptedGenerator, ScriptedIndex, StaticCatalog,
    };

    fn email_task() -> Task {
        Task {
            task_type: TaskType::SendEmail,
            generated_search_queries: Vec::new(),
            generated_llm_prompt: String::new(),
            depend_on_last_task: true,
            scope: Scope::Generic,
        }
    }

    fn context_with(sender: Arc<RecordingEmailSender>) -> HandlerContext {
        fixtures::context(
            ScriptedIndex::default(),
            Arc::new(ScriptedGenerator::new(vec![])),
            Arc::new(StaticCatalog::new(&[])),
            sender,
        )
    }

    fn with_summary(summary: &str) -> ConversationState {
        let mut state = fixtures::state("email this summary");
        state.values.historical_summary = Some(summary.to_string());
        state
    }

    fn reply(outcome: HandlerOutcome) -> String {
        match outcome {
            HandlerOutcome::Complete(update) => update.append_messages[1].content.clone(),
            HandlerOutcome::Suspend(pending) => panic!("unexpected suspension at {}", pending.point.name()),
        }
    }

    #[test]
    fn test_nothing_to_send() {
        let outcome = start(&fixtures::state("email it"), &email_task());
        assert_eq!(reply(outcome), NO_SUMMARY_REPLY);
    }

    #[test]
    fn test_summary_source_order() {
        let mut state = fixtures::state("q");
        state.chat_messages = vec![ChatMessage::user("hi"), ChatMessage::assistant("older reply")];
        assert_eq!(summary_content(&state).as_deref(), Some("older reply"));

        state.values.historical_summary = Some("rolling".to_string());
        assert_eq!(summary_content(&state).as_deref(), Some("rolling"));
    }

    #[test]
    fn test_json_summary_is_unwrapped() {
        assert_eq!(unwrap_json_text(r#"{"title": 1, "summary": "plain"}"#), "plain");
        assert_eq!(unwrap_json_text(r#"{"other": "x"}"#), r#"{"other": "x"}"#);
        assert_eq!(unwrap_json_text("not json"), "not json");
    }

    #[tokio::test]
    async fn test_full_flow_sends_summary() {
        let sender = Arc::new(RecordingEmailSender::new(EmailResult::sent()));
        let ctx = context_with(sender.clone());
        let state = with_summary("Quarterly numbers are up.");
        let task = email_task();

        let HandlerOutcome::Suspend(first) = start(&state, &task) else {
            panic!("expected recipient request");
        };
        assert_eq!(first.request, InterruptRequest::email_input());

        let answer = json!({"email": "ann@example.com", "name": "Ann"});
        let HandlerOutcome::Suspend(second) = resume(&ctx, &state, &task, first.point, &answer).await else {
            panic!("expected confirmation request");
        };
        assert_eq!(second.point.name(), "email.awaiting_confirmation");

        let outcome = resume(&ctx, &state, &task, second.point, &json!({"confirmed": true})).await;
        let HandlerOutcome::Complete(update) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(
            update.append_messages[1].content,
            "Email sent successfully to Ann (ann@example.com)."
        );
        assert_eq!(update.tool_messages.unwrap()[0].content, "Email sent");

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Document Summary");
        assert_eq!(sent[0].body, "Quarterly numbers are up.");
    }

    #[tokio::test]
    async fn test_blank_recipient_is_rejected() {
        let sender = Arc::new(RecordingEmailSender::new(EmailResult::sent()));
        let ctx = context_with(sender.clone());
        let state = with_summary("s");
        let point = SuspensionPoint::EmailAwaitingRecipient {
            summary: "s".to_string(),
        };
        let outcome = resume(&ctx, &state, &email_task(), point, &json!({"email": "", "name": "x"})).await;
        assert_eq!(reply(outcome), MISSING_RECIPIENT_REPLY);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_declined_confirmation_cancels() {
        let sender = Arc::new(RecordingEmailSender::new(EmailResult::sent()));
        let ctx = context_with(sender.clone());
        let point = SuspensionPoint::EmailAwaitingConfirmation {
            summary: "s".to_string(),
            email: "a@b.c".to_string(),
            name: "A".to_string(),
        };
        let outcome = resume(&ctx, &with_summary("s"), &email_task(), point, &json!({"confirmed": false})).await;
        assert_eq!(reply(outcome), CANCELLED_REPLY);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_is_reported_verbatim() {
        let sender = Arc::new(RecordingEmailSender::new(EmailResult::failed("relay refused")));
        let ctx = context_with(sender);
        let point = SuspensionPoint::EmailAwaitingConfirmation {
            summary: "s".to_string(),
            email: "a@b.c".to_string(),
            name: "A".to_string(),
        };
        let outcome = resume(&ctx, &with_summary("s"), &email_task(), point, &json!({"confirmed": true})).await;
        let HandlerOutcome::Complete(update) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(
            update.append_messages[1].content,
            "Failed to send email: relay refused. Please try again later."
        );
        assert_eq!(update.tool_messages.unwrap()[0].content, "Email failed");
    }
}
