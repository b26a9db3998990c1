//! Classification prompt assembly: system rules, ranked examples, then the
//! current request.

use crate::chat::classify::few_shots::{ExampleBank, FewShotExample, PromptKind};
use crate::chat::core::state::{ChatMessage, buffer_string};
use crate::chat::llm::GenerationRequest;

/// Values substituted into the human template.
#[derive(Clone, Copy, Debug)]
pub struct PromptInputs<'a> {
    /// User query.
    pub query: &'a str,
    /// Whether documents are selected.
    pub has_selected_documents: bool,
    /// Rendered conversation (continuation strategy).
    pub chat_messages: &'a str,
}

/// Substitute `{{name}}` / `{{ name }}` placeholders.
#[must_use]
pub fn render(template: &str, inputs: PromptInputs<'_>) -> String {
    let flag = if inputs.has_selected_documents { "true" } else { "false" };
    let mut out = template.to_string();
    for (name, value) in [
        ("query", inputs.query),
        ("has_selected_documents", flag),
        ("chat_messages", inputs.chat_messages),
    ] {
        out = out
            .replace(&format!("{{{{{name}}}}}"), value)
            .replace(&format!("{{{{ {name} }}}}"), value);
    }
    out
}

fn example_turn(bank: &ExampleBank, kind: PromptKind, example: &FewShotExample) -> [ChatMessage; 2] {
    let conversation = match kind {
        PromptKind::Fresh => String::new(),
        PromptKind::Continuation => buffer_string(&example.conversation()),
    };
    let human = render(
        &bank.human_prompt,
        PromptInputs {
            query: &example.query,
            has_selected_documents: example.has_selected_documents,
            chat_messages: &conversation,
        },
    );
    let output = serde_json::to_string(&example.output).unwrap_or_default();
    [ChatMessage::user(human), ChatMessage::assistant(output)]
}

/// Build the deterministic classification request.
#[must_use]
pub fn build_request(
    bank: &ExampleBank,
    kind: PromptKind,
    examples: &[&FewShotExample],
    query: &str,
    has_selected_documents: bool,
    recent_messages: &[ChatMessage],
    historical_summary: Option<&str>,
) -> GenerationRequest {
    let mut messages: Vec<ChatMessage> = examples
        .iter()
        .flat_map(|example| example_turn(bank, kind, example))
        .collect();

    if let Some(summary) = historical_summary.filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage::system(format!(
            "Summary of the earlier conversation:\n{summary}"
        )));
    }

    let conversation = match kind {
        PromptKind::Fresh => String::new(),
        PromptKind::Continuation if recent_messages.is_empty() => {
            buffer_string(&[ChatMessage::user("Hi")])
        }
        PromptKind::Continuation => buffer_string(recent_messages),
    };
    let prompt = render(
        &bank.human_prompt,
        PromptInputs {
            query,
            has_selected_documents,
            chat_messages: &conversation,
        },
    );

    GenerationRequest::new(prompt)
        .with_preamble(bank.system_prompt.clone())
        .with_messages(messages)
        .deterministic()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::core::state::ChatRole;

    #[test]
    fn test_render_both_placeholder_styles() {
        let out = render(
            "q={{query}} s={{ has_selected_documents }} c={{chat_messages}}",
            PromptInputs {
                query: "hi",
                has_selected_documents: true,
                chat_messages: "Human: x",
            },
        );
        assert_eq!(out, "q=hi s=true c=Human: x");
    }

    #[test]
    fn test_continuation_request_layout() {
        let bank = ExampleBank::load(PromptKind::Continuation, None).unwrap();
        let examples: Vec<_> = bank.matching(false).into_iter().take(2).collect();
        let recent = vec![ChatMessage::user("How do refunds work?"), ChatMessage::assistant("Quickly.")];
        let request = build_request(
            &bank,
            PromptKind::Continuation,
            &examples,
            "and then?",
            false,
            &recent,
            Some("Refund talk."),
        );
        assert!(request.options.deterministic);
        assert_eq!(request.messages.len(), 5);
        assert_eq!(request.messages[0].role, ChatRole::User);
        assert_eq!(request.messages[1].role, ChatRole::Assistant);
        assert!(request.messages[1].content.contains("\"type\""));
        assert_eq!(request.messages[4].role, ChatRole::System);
        assert!(request.prompt.contains("Human: How do refunds work?\nAI: Quickly."));
        assert!(request.prompt.contains("query: and then?"));
        assert_eq!(request.preamble.as_deref(), Some(bank.system_prompt.as_str()));
    }

    #[test]
    fn test_fresh_request_has_no_conversation() {
        let bank = ExampleBank::load(PromptKind::Fresh, None).unwrap();
        let request = build_request(&bank, PromptKind::Fresh, &[], "Hello there!", false, &[], None);
        assert!(request.messages.is_empty());
        assert_eq!(request.prompt, "has_selected_documents: false\nquery: Hello there!");
    }
}
