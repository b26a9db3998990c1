//! Multi-query retrieval: concurrent fan-out, de-duplication and top-k.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info};

use crate::chat::core::config::RetrievalConfig;
use crate::chat::core::document::RetrievedDocument;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::retrieval::hybrid_index::{FusionWeights, HybridQuery, HybridSearchIndex};

/// Parameters of one retrieval batch.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievalRequest {
    /// Queries, issued concurrently.
    pub queries: Vec<String>,
    /// Restrict every query to these files.
    pub document_ids: Option<Vec<String>>,
    /// Documents kept after merging.
    pub k: usize,
    /// Candidates fetched per query.
    pub fetch_k: usize,
    /// Fusion weights passed to the index.
    pub weights: FusionWeights,
}

impl RetrievalRequest {
    /// Request using the configured `k`, `fetch_k` and weights.
    #[must_use]
    pub fn from_config(
        config: &RetrievalConfig,
        queries: Vec<String>,
        document_ids: Option<Vec<String>>,
    ) -> Self {
        Self {
            queries,
            document_ids,
            k: config.k,
            fetch_k: config.fetch_k,
            weights: FusionWeights {
                dense: config.dense_weight,
                sparse: config.sparse_weight,
            },
        }
    }
}

/// Runs query batches against a [`HybridSearchIndex`].
#[derive(Clone)]
pub struct RetrievalEngine {
    index: Arc<dyn HybridSearchIndex>,
}

impl RetrievalEngine {
    /// Create an engine over `index`.
    #[must_use]
    pub fn new(index: Arc<dyn HybridSearchIndex>) -> Self {
        Self { index }
    }

    /// Retrieve at most `k` distinct documents for all queries.
    ///
    /// Every query runs concurrently; the batch fails if any call fails.
    ///
    /// # Errors
    /// Returns `Retrieval` if an index call fails.
    pub async fn retrieve(&self, request: RetrievalRequest) -> ChatResult<Vec<RetrievedDocument>> {
        let calls = request.queries.iter().map(|query| {
            self.index.search_hybrid(HybridQuery {
                query: query.clone(),
                fetch_k: request.fetch_k,
                document_ids: request.document_ids.clone(),
                weights: request.weights,
            })
        });
        let batches = try_join_all(calls).await.map_err(|err| match err {
            ChatError::Retrieval(_) => err,
            other => ChatError::retrieval(other),
        })?;

        for (query, hits) in request.queries.iter().zip(&batches) {
            debug!(query = %query, hits = hits.len(), "query results");
        }

        let merged = merge_ranked(batches.into_iter().flatten(), request.k);
        info!(
            queries = request.queries.len(),
            filtered = request.document_ids.is_some(),
            kept = merged.len(),
            "retrieval complete"
        );
        Ok(merged)
    }
}

/// De-duplicate (first occurrence wins), rank by descending absolute score and
/// keep `k`.
///
/// Ranking on the magnitude treats strongly negative similarity as relevant,
/// which only makes sense for indexes reporting signed distances.
#[must_use]
pub fn merge_ranked(
    candidates: impl IntoIterator<Item = RetrievedDocument>,
    k: usize,
) -> Vec<RetrievedDocument> {
    let mut seen = HashSet::new();
    let mut deduped: Vec<RetrievedDocument> = candidates
        .into_iter()
        .filter(|doc| seen.insert(doc.dedup_key()))
        .collect();
    deduped.sort_by(|a, b| b.score.abs().total_cmp(&a.score.abs()));
    deduped.truncate(k);
    deduped
}

/// Keep documents scoring at least `min_score`.
#[must_use]
pub fn apply_cutoff(documents: Vec<RetrievedDocument>, min_score: f64) -> Vec<RetrievedDocument> {
    documents
        .into_iter()
        .filter(|doc| doc.score >= min_score)
        .collect()
}

/// Join passage texts into one context block.
#[must_use]
pub fn build_context(documents: &[RetrievedDocument]) -> String {
    documents
        .iter()
        .map(|doc| doc.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::test_support::{ScriptedIndex, hit};

    fn request(queries: &[&str], ids: Option<Vec<&str>>, k: usize) -> RetrievalRequest {
        RetrievalRequest {
            queries: queries.iter().map(|q| (*q).to_string()).collect(),
            document_ids: ids.map(|ids| ids.into_iter().map(str::to_string).collect()),
            k,
            fetch_k: 30,
            weights: FusionWeights::default(),
        }
    }

    #[tokio::test]
    async fn test_merges_and_dedups_across_queries() {
        let index = Arc::new(
            ScriptedIndex::default()
                .with_hits("a", vec![hit("p1", "f1", "one", 0.9), hit("p2", "f1", "two", 0.6)])
                .with_hits("b", vec![hit("p1", "f1", "one", 0.4), hit("p3", "f2", "three", 0.8)]),
        );
        let engine = RetrievalEngine::new(index.clone());
        let docs = engine.retrieve(request(&["a", "b"], None, 5)).await.unwrap();
        let pks: Vec<_> = docs.iter().map(|d| d.metadata["pk"].clone()).collect();
        assert_eq!(pks, vec!["p1", "p3", "p2"]);
        assert!((docs[0].score - 0.9).abs() < f64::EPSILON);
        assert_eq!(index.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_never_returns_more_than_k() {
        let hits = (0..20)
            .map(|i| hit(&format!("p{i}"), "f", "x", f64::from(i) / 20.0))
            .collect();
        let engine = RetrievalEngine::new(Arc::new(ScriptedIndex::default().with_hits("q", hits)));
        let docs = engine.retrieve(request(&["q"], None, 5)).await.unwrap();
        assert_eq!(docs.len(), 5);
        let keys: HashSet<_> = docs.iter().map(RetrievedDocument::dedup_key).collect();
        assert_eq!(keys.len(), 5);
    }

    #[tokio::test]
    async fn test_document_filter_reaches_every_call() {
        let index = Arc::new(ScriptedIndex::default());
        let engine = RetrievalEngine::new(index.clone());
        let docs = engine
            .retrieve(request(&["a", "b"], Some(vec!["f1"]), 5))
            .await
            .unwrap();
        assert!(docs.is_empty());
        for call in index.calls() {
            assert_eq!(call.document_ids, Some(vec!["f1".to_string()]));
        }
    }

    #[tokio::test]
    async fn test_failure_fails_the_batch() {
        let index = Arc::new(ScriptedIndex::default().failing_on("b"));
        let engine = RetrievalEngine::new(index);
        let result = engine.retrieve(request(&["a", "b"], None, 5)).await;
        assert!(matches!(result, Err(ChatError::Retrieval(_))));
    }

    #[test]
    fn test_rank_uses_absolute_score() {
        let docs = merge_ranked(
            vec![hit("p1", "f", "a", 0.5), hit("p2", "f", "b", -0.9)],
            5,
        );
        assert_eq!(docs[0].metadata["pk"], "p2");
    }

    #[test]
    fn test_cutoff_and_context() {
        let docs = apply_cutoff(
            vec![hit("p1", "f", "alpha", 0.7), hit("p2", "f", "beta", 0.69)],
            0.7,
        );
        assert_eq!(docs.len(), 1);
        assert_eq!(
            build_context(&[hit("p1", "f", "alpha", 0.1), hit("p2", "f", "beta", 0.1)]),
            "alpha\n\nbeta"
        );
    }
}
