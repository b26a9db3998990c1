//! Configuration for the document assistant.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::filter::check_column_identifier;

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Top-level configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScholarConfig {
    /// Storage settings.
    pub storage: StorageConfig,
    /// Conversational model settings.
    pub llm: LlmConfig,
    /// Deterministic model used for classification and summaries.
    pub instruct: LlmConfig,
    /// Embedding model settings.
    pub embedding: EmbeddingConfig,
    /// Retrieval settings.
    pub retrieval: RetrievalConfig,
    /// Classifier settings.
    pub classifier: ClassifierConfig,
    /// History compaction settings.
    pub finalize: FinalizeConfig,
    /// Email delivery settings.
    pub email: EmailConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
    /// System instructions of the general chat handler.
    pub general_chat_prompt: String,
}

impl Default for ScholarConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            llm: LlmConfig::default(),
            instruct: LlmConfig {
                temperature: 0.0,
                ..LlmConfig::default()
            },
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            classifier: ClassifierConfig::default(),
            finalize: FinalizeConfig::default(),
            email: EmailConfig::default(),
            server: ServerConfig::default(),
            general_chat_prompt: "You are a helpful assistant for a document library. \
                Answer conversationally and concisely."
                .to_string(),
        }
    }
}

impl ScholarConfig {
    /// Defaults overlaid with `SCHOLAR_*` environment variables.
    ///
    /// # Errors
    /// Returns an error if a numeric variable does not parse or the result
    /// fails validation.
    pub fn from_env() -> ChatResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    ///
    /// # Errors
    /// Same as [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> ChatResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = get("SCHOLAR_OLLAMA_URL") {
            config.llm.base_url = Some(url.clone());
            config.instruct.base_url = Some(url.clone());
            config.embedding.base_url = Some(url);
        }
        if let Some(model) = get("SCHOLAR_TEXT_MODEL") {
            config.llm.model = model;
        }
        if let Some(model) = get("SCHOLAR_INSTRUCT_MODEL") {
            config.instruct.model = model;
        }
        if let Some(model) = get("SCHOLAR_EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Some(ndims) = get("SCHOLAR_EMBEDDING_NDIMS") {
            config.embedding.ndims = parse_number("SCHOLAR_EMBEDDING_NDIMS", &ndims)?;
        }
        if let Some(path) = get("SCHOLAR_SQLITE_PATH") {
            config.storage.documents_path = PathBuf::from(path);
        }
        if let Some(path) = get("SCHOLAR_CHECKPOINT_PATH") {
            config.storage.checkpoint_path = PathBuf::from(path);
        }
        if let Some(ids) = get("SCHOLAR_CATEGORY_IDS") {
            config.storage.category_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(port) = get("SCHOLAR_PORT") {
            config.server.port = parse_number("SCHOLAR_PORT", &port)?;
        }
        if let Some(dir) = get("SCHOLAR_PROMPTS_DIR") {
            config.classifier.prompts_dir = Some(PathBuf::from(dir));
        }
        if let Some(prompt) = get("SCHOLAR_GENERAL_CHAT_PROMPT") {
            config.general_chat_prompt = prompt;
        }
        if let Some(url) = get("SCHOLAR_EMAIL_RELAY_URL") {
            config.email.relay_url = Some(url);
        }
        config.email.api_key = get("SCHOLAR_EMAIL_API_KEY");
        if let Some(sender) = get("SCHOLAR_SENDER_EMAIL") {
            config.email.sender_email = sender;
        }
        if let Some(name) = get("SCHOLAR_SENDER_NAME") {
            config.email.sender_name = name;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        if self.retrieval.k == 0 {
            return Err(ChatError::InvalidConfig(
                "retrieval.k must be > 0".to_string(),
            ));
        }

        if self.retrieval.fetch_k < self.retrieval.k {
            return Err(ChatError::InvalidConfig(
                "retrieval.fetch_k must be >= retrieval.k".to_string(),
            ));
        }

        if self.retrieval.dense_weight < 0.0 || self.retrieval.sparse_weight < 0.0 {
            return Err(ChatError::InvalidConfig(
                "retrieval weights must be >= 0".to_string(),
            ));
        }

        if self.classifier.fresh_top_n == 0 || self.classifier.continuation_top_n == 0 {
            return Err(ChatError::InvalidConfig(
                "classifier example counts must be > 0".to_string(),
            ));
        }

        if self.finalize.keep_messages == 0 {
            return Err(ChatError::InvalidConfig(
                "finalize.keep_messages must be > 0".to_string(),
            ));
        }

        if self.embedding.ndims == 0 {
            return Err(ChatError::InvalidConfig(
                "embedding.ndims must be > 0".to_string(),
            ));
        }

        for (index, id) in self.storage.category_ids.iter().enumerate() {
            check_column_identifier(id)
                .map_err(|err| ChatError::InvalidConfig(err.to_string()))?;
            if RESERVED_FILE_COLUMNS.contains(&id.as_str())
                || self.storage.category_ids[..index].contains(id)
            {
                return Err(ChatError::InvalidConfig(format!(
                    "storage.category_ids: {id:?} is reserved or repeated"
                )));
            }
        }

        for base_url in [
            &self.llm.base_url,
            &self.instruct.base_url,
            &self.embedding.base_url,
            &self.email.relay_url,
        ]
        .into_iter()
        .flatten()
        {
            Url::parse(base_url)?;
        }

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> ChatResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ChatError::InvalidConfig(format!("{key} is not a valid number: {value}")))
}

const RESERVED_FILE_COLUMNS: [&str; 6] = [
    "id",
    "original_file_name",
    "author",
    "folder",
    "created_at",
    "updated_at",
];

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database holding the document catalog and the chunk index.
    pub documents_path: PathBuf,
    /// `SQLite` database holding conversation checkpoints.
    pub checkpoint_path: PathBuf,
    /// File metadata table.
    pub files_table: String,
    /// Chunk table of the hybrid index.
    pub chunks_table: String,
    /// Checkpoint table.
    pub checkpoints_table: String,
    /// Per-checkpoint write table.
    pub writes_table: String,
    /// Pending interrupt table.
    pub interrupts_table: String,
    /// Category ids, one TEXT column each in the files table.
    #[serde(default)]
    pub category_ids: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            documents_path: PathBuf::from("scholar.sqlite"),
            checkpoint_path: PathBuf::from("checkpoints.sqlite"),
            files_table: "files".to_string(),
            chunks_table: "document_chunks".to_string(),
            checkpoints_table: "checkpoints".to_string(),
            writes_table: "writes".to_string(),
            interrupts_table: "pending_interrupts".to_string(),
            category_ids: Vec::new(),
        }
    }
}

/// Completion model settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama completion model name.
    pub model: String,
    /// Temperature for generation.
    pub temperature: f64,
    /// Optional custom base URL.
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "llama3.1:8b".to_string(),
            temperature: 0.4,
            base_url: None,
        }
    }
}

/// Embedding model settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Ollama embedding model name.
    pub model: String,
    /// Embedding vector dimensions.
    pub ndims: usize,
    /// Optional custom base URL.
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            ndims: 768,
            base_url: None,
        }
    }
}

/// Retrieval settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Documents kept per turn.
    pub k: usize,
    /// Candidates fetched per query.
    pub fetch_k: usize,
    /// Weight of the dense signal.
    pub dense_weight: f64,
    /// Weight of the sparse signal.
    pub sparse_weight: f64,
    /// Minimum score for inquiry context.
    pub inquiry_cutoff: f64,
    /// Minimum score for document listings.
    pub listing_cutoff: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 5,
            fetch_k: 30,
            dense_weight: 0.7,
            sparse_weight: 0.3,
            inquiry_cutoff: 0.5,
            listing_cutoff: 0.7,
        }
    }
}

/// Classifier settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Examples used when the thread has no history.
    pub fresh_top_n: usize,
    /// Examples used when the thread has history.
    pub continuation_top_n: usize,
    /// Directory with example bank overrides.
    pub prompts_dir: Option<PathBuf>,
    /// Capacity of the example embedding cache.
    pub cache_capacity: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            fresh_top_n: 3,
            continuation_top_n: 5,
            prompts_dir: None,
            cache_capacity: 256,
        }
    }
}

/// History compaction settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalizeConfig {
    /// Raw messages kept after compaction.
    pub keep_messages: usize,
    /// Temperature of the summary request.
    pub temperature: f64,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            keep_messages: 4,
            temperature: 0.1,
        }
    }
}

/// Email delivery settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmailConfig {
    /// HTTP relay endpoint; delivery is disabled when unset.
    pub relay_url: Option<String>,
    /// Bearer token for the relay.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Sender address.
    pub sender_email: String,
    /// Sender display name.
    pub sender_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            api_key: None,
            sender_email: "noreply@localhost".to_string(),
            sender_name: "Document Scholar".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ScholarConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retrieval.k, 5);
        assert_eq!(config.retrieval.fetch_k, 30);
        assert_eq!(config.finalize.keep_messages, 4);
        assert!(config.instruct.temperature.abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_lookup_overlays_values() {
        let config = ScholarConfig::from_lookup(lookup(&[
            ("SCHOLAR_OLLAMA_URL", "http://gpu:11434"),
            ("SCHOLAR_TEXT_MODEL", "mistral"),
            ("SCHOLAR_PORT", "8080"),
            ("SCHOLAR_PROMPTS_DIR", "/etc/prompts"),
        ]))
        .unwrap();
        assert_eq!(config.llm.model, "mistral");
        assert_eq!(config.embedding.base_url.as_deref(), Some("http://gpu:11434"));
        assert_eq!(config.server.port, 8080);
        assert_eq!(
            config.classifier.prompts_dir,
            Some(PathBuf::from("/etc/prompts"))
        );
    }

    #[test]
    fn test_category_ids_overlay_and_validation() {
        let config = ScholarConfig::from_lookup(lookup(&[(
            "SCHOLAR_CATEGORY_IDS",
            "department, region,,",
        )]))
        .unwrap();
        assert_eq!(config.storage.category_ids, vec!["department", "region"]);

        for bad in ["author", "region,region", "drop table"] {
            let result = ScholarConfig::from_lookup(lookup(&[("SCHOLAR_CATEGORY_IDS", bad)]));
            assert!(matches!(result, Err(ChatError::InvalidConfig(_))), "{bad}");
        }
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        assert!(ScholarConfig::from_lookup(lookup(&[("SCHOLAR_PORT", "eighty")])).is_err());
        assert!(ScholarConfig::from_lookup(lookup(&[("SCHOLAR_OLLAMA_URL", "not a url")])).is_err());
    }

    #[test]
    fn test_validate_rejects_fetch_k_below_k() {
        let mut config = ScholarConfig::default();
        config.retrieval.fetch_k = 2;
        assert!(matches!(config.validate(), Err(ChatError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_negative_weight() {
        let mut config = ScholarConfig::default();
        config.retrieval.sparse_weight = -0.1;
        assert!(config.validate().is_err());
    }
}
