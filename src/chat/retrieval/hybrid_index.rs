//! Hybrid (dense + sparse) passage index.
//!
//! The `SQLite` implementation keeps chunk text, metadata and embedding in one
//! table and mirrors the text into an FTS5 table for the lexical signal.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rusqlite::params_from_iter;
use serde_json::{Map, Value};
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::chat::core::config::StorageConfig;
use crate::chat::core::document::{FILE_ID_FIELD, PRIMARY_KEY_FIELD, RetrievedDocument};
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::embedding::{Embedder, cosine_similarity};

/// Boxed future type for index operations.
pub type IndexFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Weights of the dense and sparse signals in the fused score.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FusionWeights {
    /// Dense (vector) weight.
    pub dense: f64,
    /// Sparse (lexical) weight.
    pub sparse: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            dense: 0.7,
            sparse: 0.3,
        }
    }
}

/// One hybrid search call.
#[derive(Clone, Debug, PartialEq)]
pub struct HybridQuery {
    /// Query text; empty means a filter-only scan.
    pub query: String,
    /// Maximum hits returned.
    pub fetch_k: usize,
    /// Restrict hits to these source files.
    pub document_ids: Option<Vec<String>>,
    /// Score fusion weights.
    pub weights: FusionWeights,
}

/// Document store supporting weighted dense + sparse search.
pub trait HybridSearchIndex: Send + Sync {
    /// Search the index, returning hits annotated with a fused score.
    ///
    /// # Errors
    /// Returns an error if the index cannot be queried.
    fn search_hybrid(&self, query: HybridQuery) -> IndexFuture<'_, ChatResult<Vec<RetrievedDocument>>>;
}

/// A chunk to store in the index.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkRecord {
    /// Source file id.
    pub file_id: String,
    /// Position of the chunk in its file.
    pub chunk_index: i64,
    /// Chunk text.
    pub content: String,
    /// Extra metadata (file name, page, author, ...).
    pub metadata: Map<String, Value>,
}

impl ChunkRecord {
    fn primary_key(&self) -> String {
        format!("{}:{}", self.file_id, self.chunk_index)
    }
}

/// `SQLite` reference implementation of [`HybridSearchIndex`].
pub struct SqliteHybridIndex {
    conn: Connection,
    table: String,
    embedder: Arc<dyn Embedder>,
}

impl SqliteHybridIndex {
    /// Open the index in the documents database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the schema cannot be created.
    pub async fn new(config: &StorageConfig, embedder: Arc<dyn Embedder>) -> ChatResult<Self> {
        let conn = Connection::open(&config.documents_path).await?;
        Self::with_connection(conn, config.chunks_table.clone(), embedder).await
    }

    /// Create the index on an existing connection.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn with_connection(
        conn: Connection,
        table: String,
        embedder: Arc<dyn Embedder>,
    ) -> ChatResult<Self> {
        let table_name = table.clone();
        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    pk TEXT PRIMARY KEY,
                    file_id TEXT NOT NULL,
                    chunk_index INTEGER NOT NULL,
                    content TEXT NOT NULL,
                    metadata_json TEXT NOT NULL,
                    embedding_json TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS {table_name}_file_idx
                    ON {table_name}(file_id, chunk_index);
                CREATE VIRTUAL TABLE IF NOT EXISTS {table_name}_fts
                    USING fts5(content, pk UNINDEXED);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            table,
            embedder,
        })
    }

    /// Insert or replace chunks, embedding their content.
    ///
    /// # Errors
    /// Returns an error if embedding or storage fails.
    pub async fn upsert_chunks(&self, chunks: Vec<ChunkRecord>) -> ChatResult<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let vectors = self.embedder.embed_texts(texts).await?;
        if vectors.len() != chunks.len() {
            return Err(ChatError::retrieval(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let mut rows = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            rows.push((
                chunk.primary_key(),
                serde_json::to_string(&chunk.metadata)?,
                serde_json::to_string(&vector)?,
                chunk,
            ));
        }

        let table = self.table.clone();
        let count = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (pk, metadata_json, embedding_json, chunk) in &rows {
                    tx.execute(
                        &format!(
                            "INSERT OR REPLACE INTO {table}
                                (pk, file_id, chunk_index, content, metadata_json, embedding_json)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                        ),
                        rusqlite::params![
                            pk,
                            chunk.file_id,
                            chunk.chunk_index,
                            chunk.content,
                            metadata_json,
                            embedding_json
                        ],
                    )?;
                    tx.execute(&format!("DELETE FROM {table}_fts WHERE pk = ?1"), [pk])?;
                    tx.execute(
                        &format!("INSERT INTO {table}_fts (content, pk) VALUES (?1, ?2)"),
                        rusqlite::params![chunk.content, pk],
                    )?;
                }
                tx.commit()?;
                Ok(rows.len())
            })
            .await?;
        Ok(count)
    }

    async fn filter_scan(
        &self,
        document_ids: Vec<String>,
        fetch_k: usize,
    ) -> ChatResult<Vec<RetrievedDocument>> {
        let table = self.table.clone();
        let limit = i64::try_from(fetch_k).unwrap_or(i64::MAX);
        let rows = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT pk, file_id, chunk_index, content, metadata_json, embedding_json
                     FROM {table}
                     WHERE file_id IN ({})
                     ORDER BY file_id, chunk_index
                     LIMIT {limit}",
                    placeholders(document_ids.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(document_ids.iter()), ChunkRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|row| row.into_document(1.0))
            .collect()
    }

    async fn scored_search(&self, query: HybridQuery) -> ChatResult<Vec<RetrievedDocument>> {
        let query_vector = self
            .embedder
            .embed_texts(vec![query.query.clone()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::retrieval("embedder returned no vector for the query"))?;

        let table = self.table.clone();
        let match_expr = fts_match_expression(&query.query);
        let document_ids = query.document_ids.clone();
        let (rows, lexical) = self
            .conn
            .call(move |conn| {
                let rows = match &document_ids {
                    Some(ids) => {
                        let sql = format!(
                            "SELECT pk, file_id, chunk_index, content, metadata_json, embedding_json
                             FROM {table} WHERE file_id IN ({})",
                            placeholders(ids.len())
                        );
                        let mut stmt = conn.prepare(&sql)?;
                        let rows = stmt
                            .query_map(params_from_iter(ids.iter()), ChunkRow::from_row)?
                            .collect::<Result<Vec<_>, _>>()?;
                        rows
                    }
                    None => {
                        let sql = format!(
                            "SELECT pk, file_id, chunk_index, content, metadata_json, embedding_json
                             FROM {table}"
                        );
                        let mut stmt = conn.prepare(&sql)?;
                        let rows = stmt
                            .query_map([], ChunkRow::from_row)?
                            .collect::<Result<Vec<_>, _>>()?;
                        rows
                    }
                };

                let mut lexical = HashMap::new();
                if let Some(expr) = match_expr {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT pk, bm25({table}_fts) FROM {table}_fts WHERE {table}_fts MATCH ?1"
                    ))?;
                    let hits = stmt.query_map([expr], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                    })?;
                    for hit in hits {
                        let (pk, bm25) = hit?;
                        lexical.insert(pk, bm25);
                    }
                }
                Ok((rows, lexical))
            })
            .await?;

        debug!(
            candidates = rows.len(),
            lexical_hits = lexical.len(),
            "hybrid index candidates"
        );

        let mut scored = Vec::with_capacity(rows.len());
        let max_bm25 = lexical.values().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        for row in rows {
            let vector: Vec<f64> = serde_json::from_str(&row.embedding_json)?;
            let dense = cosine_similarity(&query_vector, &vector);
            let sparse = lexical
                .get(&row.pk)
                .map_or(0.0, |bm25| normalize_bm25(*bm25, max_bm25));
            scored.push((fuse(dense, sparse, query.weights), row));
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(query.fetch_k);

        scored
            .into_iter()
            .map(|(score, row)| row.into_document(score))
            .collect()
    }
}

impl HybridSearchIndex for SqliteHybridIndex {
    fn search_hybrid(&self, query: HybridQuery) -> IndexFuture<'_, ChatResult<Vec<RetrievedDocument>>> {
        Box::pin(async move {
            if let Some(ids) = &query.document_ids {
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
            }
            if query.query.trim().is_empty() {
                return match query.document_ids {
                    Some(ids) => self.filter_scan(ids, query.fetch_k).await,
                    None => Ok(Vec::new()),
                };
            }
            self.scored_search(query).await
        })
    }
}

struct ChunkRow {
    pk: String,
    file_id: String,
    chunk_index: i64,
    content: String,
    metadata_json: String,
    embedding_json: String,
}

impl ChunkRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            pk: row.get(0)?,
            file_id: row.get(1)?,
            chunk_index: row.get(2)?,
            content: row.get(3)?,
            metadata_json: row.get(4)?,
            embedding_json: row.get(5)?,
        })
    }

    fn into_document(self, score: f64) -> ChatResult<RetrievedDocument> {
        let mut metadata = match serde_json::from_str::<Value>(&self.metadata_json)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        metadata.insert(PRIMARY_KEY_FIELD.to_string(), Value::String(self.pk));
        metadata.insert(FILE_ID_FIELD.to_string(), Value::String(self.file_id));
        metadata.insert("chunk_index".to_string(), Value::from(self.chunk_index));
        Ok(RetrievedDocument {
            content: self.content,
            metadata,
            score,
        })
    }
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build an FTS5 query matching any word of `query`.
fn fts_match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{term}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// FTS5 bm25 is negative, better matches are more negative.
fn normalize_bm25(bm25: f64, max_abs: f64) -> f64 {
    if max_abs <= f64::EPSILON {
        0.0
    } else {
        bm25.abs() / max_abs
    }
}

fn fuse(dense: f64, sparse: f64, weights: FusionWeights) -> f64 {
    weights.dense.mul_add(dense, weights.sparse * sparse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::test_support::KeywordEmbedder;
    use serde_json::json;

    async fn index() -> SqliteHybridIndex {
        let conn = Connection::open_in_memory().await.unwrap();
        SqliteHybridIndex::with_connection(
            conn,
            "document_chunks".to_string(),
            Arc::new(KeywordEmbedder::new(&["rust", "error", "garden"])),
        )
        .await
        .unwrap()
    }

    fn chunk(file_id: &str, chunk_index: i64, content: &str) -> ChunkRecord {
        let Value::Object(metadata) = json!({"original_file_name": format!("{file_id}.pdf")}) else {
            panic!("object expected");
        };
        ChunkRecord {
            file_id: file_id.to_string(),
            chunk_index,
            content: content.to_string(),
            metadata,
        }
    }

    async fn seeded() -> SqliteHybridIndex {
        let index = index().await;
        index
            .upsert_chunks(vec![
                chunk("f1", 0, "rust error handling with result"),
                chunk("f1", 1, "rust traits and generics"),
                chunk("f2", 0, "garden planning in spring"),
            ])
            .await
            .unwrap();
        index
    }

    fn query(text: &str, ids: Option<Vec<&str>>) -> HybridQuery {
        HybridQuery {
            query: text.to_string(),
            fetch_k: 30,
            document_ids: ids.map(|ids| ids.into_iter().map(str::to_string).collect()),
            weights: FusionWeights::default(),
        }
    }

    #[test]
    fn test_fts_match_expression() {
        assert_eq!(
            fts_match_expression("error-handling, please!").as_deref(),
            Some("\"error\" OR \"handling\" OR \"please\"")
        );
        assert!(fts_match_expression("  ?! ").is_none());
    }

    #[test]
    fn test_fuse_weights() {
        let score = fuse(1.0, 0.5, FusionWeights::default());
        assert!((score - 0.85).abs() < 1e-9);
        assert!((normalize_bm25(-2.0, 4.0) - 0.5).abs() < 1e-9);
        assert!(normalize_bm25(-2.0, 0.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_search_ranks_matching_chunk_first() {
        let index = seeded().await;
        let hits = index
            .search_hybrid(query("rust error", None))
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].metadata["pk"], "f1:0");
        assert_eq!(hits[0].file_id(), Some("f1"));
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].metadata["original_file_name"], "f1.pdf");
    }

    #[tokio::test]
    async fn test_search_respects_document_filter() {
        let index = seeded().await;
        let hits = index
            .search_hybrid(query("rust error", Some(vec!["f2"])))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_id(), Some("f2"));
    }

    #[tokio::test]
    async fn test_empty_query_scans_selected_documents() {
        let index = seeded().await;
        let hits = index.search_hybrid(query("", Some(vec!["f1"]))).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata["chunk_index"], 0);
        assert_eq!(hits[1].metadata["chunk_index"], 1);
        assert!(hits.iter().all(|hit| (hit.score - 1.0).abs() < f64::EPSILON));
    }

    #[tokio::test]
    async fn test_empty_query_without_filter_returns_nothing() {
        let index = seeded().await;
        assert!(index.search_hybrid(query("  ", None)).await.unwrap().is_empty());
        assert!(
            index
                .search_hybrid(query("rust", Some(Vec::new())))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_chunk() {
        let index = seeded().await;
        index
            .upsert_chunks(vec![chunk("f2", 0, "rust in the garden")])
            .await
            .unwrap();
        let hits = index.search_hybrid(query("", Some(vec!["f2"]))).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "rust in the garden");
    }

    #[tokio::test]
    async fn test_fetch_k_bounds_hits() {
        let index = seeded().await;
        let mut q = query("rust", None);
        q.fetch_k = 1;
        assert_eq!(index.search_hybrid(q).await.unwrap().len(), 1);
    }
}
