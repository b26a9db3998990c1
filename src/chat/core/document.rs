//! Retrieved document passages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata key carrying the index-assigned primary key.
pub const PRIMARY_KEY_FIELD: &str = "pk";
/// Metadata key carrying the source file identifier.
pub const FILE_ID_FIELD: &str = "file_id";

/// A passage returned by retrieval, scoped to one turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    /// Passage text.
    pub content: String,
    /// Index metadata (source file, chunk position, primary key, ...).
    pub metadata: Map<String, Value>,
    /// Fused relevance score reported by the index.
    pub score: f64,
}

impl RetrievedDocument {
    /// Source file identifier, when the index reported one.
    #[must_use]
    pub fn file_id(&self) -> Option<&str> {
        self.metadata.get(FILE_ID_FIELD).and_then(Value::as_str)
    }

    /// Stable identity used for de-duplication across queries.
    ///
    /// Prefers the index primary key; otherwise falls back to the content
    /// plus the whole metadata map (serialized with sorted keys).
    #[must_use]
    pub fn dedup_key(&self) -> String {
        match self.metadata.get(PRIMARY_KEY_FIELD) {
            Some(Value::String(pk)) if !pk.is_empty() => format!("pk:{pk}"),
            Some(Value::Number(pk)) => format!("pk:{pk}"),
            _ => {
                let metadata = Value::Object(self.metadata.clone()).to_string();
                format!("doc:{}\u{1f}{metadata}", self.content)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(content: &str, metadata: Value, score: f64) -> RetrievedDocument {
        let Value::Object(metadata) = metadata else {
            panic!("metadata must be an object");
        };
        RetrievedDocument {
            content: content.to_string(),
            metadata,
            score,
        }
    }

    #[test]
    fn test_dedup_key_prefers_primary_key() {
        let a = doc("one", json!({"pk": "42", "file_id": "f1"}), 0.9);
        let b = doc("two", json!({"pk": "42", "file_id": "f2"}), 0.1);
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn test_dedup_key_fallback_uses_content_and_metadata() {
        let a = doc("same", json!({"file_id": "f1", "page": 1}), 0.9);
        let b = doc("same", json!({"page": 1, "file_id": "f1"}), 0.3);
        let c = doc("same", json!({"file_id": "f1", "page": 2}), 0.9);
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn test_file_id() {
        let a = doc("x", json!({"file_id": "f9"}), 0.0);
        assert_eq!(a.file_id(), Some("f9"));
    }
}
