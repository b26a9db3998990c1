//! Error types for the conversation subsystem.

use thiserror::Error;

/// Conversation subsystem error type.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The generation backend returned output that does not parse as a task.
    #[error("classification failed: {0}")]
    Classification(String),
    /// A hybrid index call failed.
    #[error("retrieval failed: {0}")]
    Retrieval(String),
    /// A resume payload is missing required fields.
    #[error("invalid resume payload: {0}")]
    InterruptValidation(String),
    /// The email capability reported a failure.
    #[error("email delivery failed: {0}")]
    EmailDelivery(String),
    /// Checkpoint store failure.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// Text generation failed.
    #[error("generation error: {0}")]
    Generation(String),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Operation not allowed in the current thread state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// User filter cannot be turned into a predicate.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] rig::embeddings::EmbeddingError),
    /// HTTP client error from Rig.
    #[error("http client error: {0}")]
    HttpClient(#[from] rig::http_client::Error),
    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Map any storage failure into a persistence error.
    #[must_use]
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    /// Map any completion backend failure into a generation error.
    #[must_use]
    pub fn generation(err: impl std::fmt::Display) -> Self {
        Self::Generation(err.to_string())
    }

    /// Map any index failure into a retrieval error.
    #[must_use]
    pub fn retrieval(err: impl std::fmt::Display) -> Self {
        Self::Retrieval(err.to_string())
    }
}

/// Convenience result alias for conversation operations.
pub type ChatResult<T> = Result<T, ChatError>;
