//! Scripted fakes for the external capabilities.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::StreamExt;
use serde_json::{Map, Value};

use crate::chat::core::document::RetrievedDocument;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::filter::UserFilter;
use crate::chat::email::{EmailFuture, EmailMessage, EmailResult, EmailSender};
use crate::chat::embedding::{EmbedFuture, Embedder};
use crate::chat::llm::{GenerateFuture, GenerationRequest, TextGenerator, TokenStream};
use crate::chat::retrieval::{DocumentCatalog, HybridQuery, HybridSearchIndex, IndexFuture};

/// Embeds text as keyword occurrence counts.
pub struct KeywordEmbedder {
    keywords: Vec<String>,
    embedded: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(keywords: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            embedded: AtomicUsize::new(0),
        }
    }

    pub fn embedded_texts(&self) -> usize {
        self.embedded.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str) -> Vec<f64> {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        self.keywords
            .iter()
            .map(|keyword| words.iter().filter(|w| **w == keyword.as_str()).count() as f64)
            .collect()
    }
}

impl Embedder for KeywordEmbedder {
    fn embed_texts(&self, texts: Vec<String>) -> EmbedFuture<'_, ChatResult<Vec<Vec<f64>>>> {
        Box::pin(async move {
            self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|text| self.vector(text)).collect())
        })
    }

    fn ndims(&self) -> usize {
        self.keywords.len()
    }
}

/// Build a retrieved passage with a primary key.
pub fn hit(pk: &str, file_id: &str, content: &str, score: f64) -> RetrievedDocument {
    let mut metadata = Map::new();
    metadata.insert("pk".to_string(), Value::String(pk.to_string()));
    metadata.insert("file_id".to_string(), Value::String(file_id.to_string()));
    RetrievedDocument {
        content: content.to_string(),
        metadata,
        score,
    }
}

/// Returns fixed hits per query text and records every call.
#[derive(Default)]
pub struct ScriptedIndex {
    hits: HashMap<String, Vec<RetrievedDocument>>,
    failing: Vec<String>,
    calls: Mutex<Vec<HybridQuery>>,
}

impl ScriptedIndex {
    pub fn with_hits(mut self, query: &str, hits: Vec<RetrievedDocument>) -> Self {
        self.hits.insert(query.to_string(), hits);
        self
    }

    pub fn failing_on(mut self, query: &str) -> Self {
        self.failing.push(query.to_string());
        self
    }

    pub fn calls(&self) -> Vec<HybridQuery> {
        self.calls.lock().unwrap().clone()
    }
}

impl HybridSearchIndex for ScriptedIndex {
    fn search_hybrid(&self, query: HybridQuery) -> IndexFuture<'_, ChatResult<Vec<RetrievedDocument>>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(query.clone());
            if self.failing.contains(&query.query) {
                return Err(ChatError::retrieval("index unavailable"));
            }
            let hits = self.hits.get(&query.query).cloned().unwrap_or_default();
            Ok(hits
                .into_iter()
                .filter(|hit| match &query.document_ids {
                    Some(ids) => hit.file_id().is_some_and(|id| ids.iter().any(|i| i == id)),
                    None => true,
                })
                .take(query.fetch_k)
                .collect())
        })
    }
}

/// Replies with scripted outputs in order and records requests.
pub struct ScriptedGenerator {
    replies: Mutex<Vec<String>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().rev().map(str::to_string).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, request: GenerationRequest) -> ChatResult<String> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| ChatError::Generation("script exhausted".to_string()))
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, request: GenerationRequest) -> GenerateFuture<'_, ChatResult<String>> {
        Box::pin(async move { self.next_reply(request) })
    }

    fn stream(&self, request: GenerationRequest) -> GenerateFuture<'_, ChatResult<TokenStream>> {
        Box::pin(async move {
            let reply = self.next_reply(request)?;
            let tokens: Vec<ChatResult<String>> = reply
                .split_inclusive(' ')
                .map(|token| Ok(token.to_string()))
                .collect();
            Ok(futures::stream::iter(tokens).boxed())
        })
    }
}

/// Resolves every filter to a fixed id list.
pub struct StaticCatalog {
    ids: Vec<String>,
    filters: Mutex<Vec<UserFilter>>,
}

impl StaticCatalog {
    pub fn new(ids: &[&str]) -> Self {
        Self {
            ids: ids.iter().map(|id| (*id).to_string()).collect(),
            filters: Mutex::new(Vec::new()),
        }
    }

    pub fn filters(&self) -> Vec<UserFilter> {
        self.filters.lock().unwrap().clone()
    }
}

impl DocumentCatalog for StaticCatalog {
    fn file_ids(&self, filter: UserFilter) -> IndexFuture<'_, ChatResult<Vec<String>>> {
        Box::pin(async move {
            self.filters.lock().unwrap().push(filter);
            Ok(self.ids.clone())
        })
    }
}

/// Records messages and answers with a fixed result.
pub struct RecordingEmailSender {
    result: EmailResult,
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingEmailSender {
    pub fn new(result: EmailResult) -> Self {
        Self {
            result,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl EmailSender for RecordingEmailSender {
    fn send_email(&self, message: EmailMessage) -> EmailFuture<'_, EmailResult> {
        Box::pin(async move {
            self.sent.lock().unwrap().push(message);
            self.result.clone()
        })
    }
}
