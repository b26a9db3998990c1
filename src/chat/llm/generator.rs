//! Text generation capability backed by Rig + Ollama.
//!
//! Handlers talk to [`TextGenerator`] only; the Ollama adapter maps a
//! [`GenerationRequest`] onto a Rig completion request.

use std::future::Future;
use std::pin::Pin;

use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client as ReqwestClient;
use rig::client::{CompletionClient, Nothing};
use rig::completion::CompletionModel;
use rig::message::{AssistantContent, Message};
use rig::providers::ollama;
use rig::streaming::StreamedAssistantContent;
use serde_json::json;
use tracing::debug;

use crate::chat::core::config::LlmConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::state::{ChatMessage, ChatRole};

/// Boxed future type for generator operations.
pub type GenerateFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Incremental text chunks of a streamed generation.
pub type TokenStream = BoxStream<'static, ChatResult<String>>;

/// Sampling options of one request.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GenerationOptions {
    /// Sampling temperature; `None` keeps the backend default.
    pub temperature: Option<f64>,
    /// Ask for JSON-constrained, temperature-0 output.
    pub deterministic: bool,
}

/// One generation request: instructions, prior messages, then the prompt.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationRequest {
    /// System instructions.
    pub preamble: Option<String>,
    /// Messages preceding the prompt, in order.
    pub messages: Vec<ChatMessage>,
    /// Final user prompt.
    pub prompt: String,
    /// Sampling options.
    pub options: GenerationOptions,
}

impl GenerationRequest {
    /// Request with only a prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Set system instructions.
    #[must_use]
    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    /// Set the messages preceding the prompt.
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Set the temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f64) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    /// Request deterministic JSON output.
    #[must_use]
    pub const fn deterministic(mut self) -> Self {
        self.options.deterministic = true;
        self.options.temperature = Some(0.0);
        self
    }

    /// Rough size of the request, for logs.
    #[must_use]
    pub fn char_count(&self) -> usize {
        self.preamble.as_ref().map_or(0, String::len)
            + self.messages.iter().map(|m| m.content.len()).sum::<usize>()
            + self.prompt.len()
    }
}

/// Capability to generate text from a prompt.
pub trait TextGenerator: Send + Sync {
    /// Generate a full response.
    ///
    /// # Errors
    /// Returns an error if the backend call fails.
    fn generate(&self, request: GenerationRequest) -> GenerateFuture<'_, ChatResult<String>>;

    /// Generate a response as a stream of text chunks.
    ///
    /// # Errors
    /// Returns an error if the backend call cannot be started.
    fn stream(&self, request: GenerationRequest) -> GenerateFuture<'_, ChatResult<TokenStream>>;
}

/// Ollama generator using Rig provider.
#[derive(Clone)]
pub struct OllamaGenerator {
    model: ollama::CompletionModel,
    temperature: f64,
}

impl OllamaGenerator {
    /// Create a new Ollama generator from config.
    ///
    /// # Errors
    /// Returns an error if the Ollama client cannot be built.
    pub fn new(config: &LlmConfig) -> ChatResult<Self> {
        let builder = ollama::Client::<ReqwestClient>::builder().api_key(Nothing);
        let builder = if let Some(base_url) = &config.base_url {
            builder.base_url(base_url)
        } else {
            builder
        };
        let client = builder.build().map_err(ChatError::from)?;
        let model = client.completion_model(config.model.clone());
        Ok(Self {
            model,
            temperature: config.temperature,
        })
    }

    fn build_request(&self, request: GenerationRequest) -> rig::completion::CompletionRequest {
        let (preamble, history) = split_messages(request.preamble, request.messages);
        let temperature = request.options.temperature.unwrap_or(self.temperature);
        let mut builder = self
            .model
            .completion_request(request.prompt)
            .messages(history)
            .temperature(temperature);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if request.options.deterministic {
            builder = builder.additional_params(json!({ "format": "json" }));
        }
        builder.build()
    }
}

impl TextGenerator for OllamaGenerator {
    fn generate(&self, request: GenerationRequest) -> GenerateFuture<'_, ChatResult<String>> {
        Box::pin(async move {
            debug!(chars = request.char_count(), "generation request");
            let request = self.build_request(request);
            let response = self
                .model
                .completion(request)
                .await
                .map_err(ChatError::generation)?;
            Ok(extract_text(&response.choice))
        })
    }

    fn stream(&self, request: GenerationRequest) -> GenerateFuture<'_, ChatResult<TokenStream>> {
        Box::pin(async move {
            debug!(chars = request.char_count(), "streaming generation request");
            let request = self.build_request(request);
            let response = self
                .model
                .stream(request)
                .await
                .map_err(ChatError::generation)?;
            let tokens = response
                .filter_map(|item| async move {
                    match item {
                        Ok(StreamedAssistantContent::Text(text)) => Some(Ok(text.text)),
                        Ok(_) => None,
                        Err(err) => Some(Err(ChatError::generation(err))),
                    }
                })
                .boxed();
            Ok(tokens)
        })
    }
}

/// System messages join the preamble; the rest become chat history.
fn split_messages(
    preamble: Option<String>,
    messages: Vec<ChatMessage>,
) -> (Option<String>, Vec<Message>) {
    let mut system_parts: Vec<String> = preamble.into_iter().collect();
    let mut history = Vec::with_capacity(messages.len());
    for message in messages {
        match message.role {
            ChatRole::System => system_parts.push(message.content),
            ChatRole::User => history.push(Message::user(message.content)),
            ChatRole::Assistant => history.push(Message::assistant(message.content)),
        }
    }
    let preamble = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (preamble, history)
}

/// Extract text from assistant response.
fn extract_text(choice: &rig::OneOrMany<AssistantContent>) -> String {
    let mut out = String::new();
    for content in choice.iter() {
        if let AssistantContent::Text(text) = content {
            out.push_str(&text.text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_messages_moves_system_to_preamble() {
        let (preamble, history) = split_messages(
            Some("base".to_string()),
            vec![
                ChatMessage::user("hi"),
                ChatMessage::system("use context"),
                ChatMessage::assistant("hello"),
            ],
        );
        assert_eq!(preamble.as_deref(), Some("base\n\nuse context"));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_split_messages_keeps_user_framing_in_order() {
        let (preamble, history) = split_messages(
            None,
            vec![
                ChatMessage::system("base"),
                ChatMessage::user("The following are the latest 1 chat messages:"),
                ChatMessage::assistant("hello"),
                ChatMessage::user("End of Chat messages"),
            ],
        );
        assert_eq!(preamble.as_deref(), Some("base"));
        assert_eq!(
            history,
            vec![
                Message::user("The following are the latest 1 chat messages:"),
                Message::assistant("hello"),
                Message::user("End of Chat messages"),
            ]
        );
    }

    #[test]
    fn test_split_messages_without_system() {
        let (preamble, history) = split_messages(None, vec![ChatMessage::user("hi")]);
        assert!(preamble.is_none());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_deterministic_forces_zero_temperature() {
        let request = GenerationRequest::new("q").with_temperature(0.7).deterministic();
        assert!(request.options.deterministic);
        assert_eq!(request.options.temperature, Some(0.0));
    }

    #[test]
    fn test_ollama_generator_builds_offline() {
        assert!(OllamaGenerator::new(&LlmConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_generation_error() {
        let generator = OllamaGenerator::new(&LlmConfig {
            base_url: Some("http://127.0.0.1:1".to_string()),
            ..LlmConfig::default()
        })
        .unwrap();
        let result = generator.generate(GenerationRequest::new("hello")).await;
        assert!(matches!(result, Err(ChatError::Generation(_))));
    }
}
