//! Ranking of few-shot examples by similarity to the query.

use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::embedding::{Embedder, cosine_similarity};

/// Boxed future type for ranker operations.
pub type RankFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Orders candidate texts by relevance to a query.
pub trait ExampleRanker: Send + Sync {
    /// Indices of the `top_n` most relevant candidates, best first.
    ///
    /// # Errors
    /// Returns an error if ranking signals cannot be computed.
    fn rank<'a>(
        &'a self,
        query: &'a str,
        candidates: &'a [String],
        top_n: usize,
    ) -> RankFuture<'a, ChatResult<Vec<usize>>>;
}

/// Cosine ranking over embeddings, caching candidate vectors.
pub struct EmbeddingExampleRanker {
    embedder: Arc<dyn Embedder>,
    cache: Mutex<LruCache<String, Vec<f64>>>,
}

impl EmbeddingExampleRanker {
    /// Create a ranker caching up to `capacity` candidate embeddings.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `capacity` is zero.
    pub fn new(embedder: Arc<dyn Embedder>, capacity: usize) -> ChatResult<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            ChatError::InvalidConfig("classifier.cache_capacity must be > 0".to_string())
        })?;
        Ok(Self {
            embedder,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    async fn candidate_vectors(&self, query: &str, candidates: &[String]) -> ChatResult<(Vec<f64>, Vec<Vec<f64>>)> {
        let mut cached: Vec<Option<Vec<f64>>> = {
            let mut cache = self.cache.lock().await;
            candidates.iter().map(|text| cache.get(text).cloned()).collect()
        };

        let mut missing: Vec<String> = cached
            .iter()
            .zip(candidates)
            .filter(|(vector, _)| vector.is_none())
            .map(|(_, text)| text.clone())
            .collect();
        debug!(
            candidates = candidates.len(),
            uncached = missing.len(),
            "ranking examples"
        );
        missing.push(query.to_string());

        let mut vectors = self.embedder.embed_texts(missing.clone()).await?;
        if vectors.len() != missing.len() {
            return Err(ChatError::Classification(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                missing.len()
            )));
        }
        let query_vector = vectors.pop().unwrap_or_default();

        let mut fresh = missing.into_iter().zip(vectors);
        {
            let mut cache = self.cache.lock().await;
            for slot in &mut cached {
                if slot.is_none() {
                    if let Some((text, vector)) = fresh.next() {
                        cache.put(text, vector.clone());
                        *slot = Some(vector);
                    }
                }
            }
        }

        Ok((query_vector, cached.into_iter().map(Option::unwrap_or_default).collect()))
    }
}

impl ExampleRanker for EmbeddingExampleRanker {
    fn rank<'a>(
        &'a self,
        query: &'a str,
        candidates: &'a [String],
        top_n: usize,
    ) -> RankFuture<'a, ChatResult<Vec<usize>>> {
        Box::pin(async move {
            if candidates.is_empty() || top_n == 0 {
                return Ok(Vec::new());
            }
            let (query_vector, vectors) = self.candidate_vectors(query, candidates).await?;
            let mut scored: Vec<(usize, f64)> = vectors
                .iter()
                .enumerate()
                .map(|(index, vector)| (index, cosine_similarity(&query_vector, vector)))
                .collect();
            scored.sort_by(|a, b| b.1.total_cmp(&a.1));
            Ok(scored.into_iter().take(top_n).map(|(index, _)| index).collect())
        })
    }
}
