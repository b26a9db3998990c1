//! Document retrieval: hybrid index, file catalog and the multi-query engine.

pub mod catalog;
pub mod engine;
pub mod hybrid_index;

pub use catalog::{DocumentCatalog, FileRecord, SqliteDocumentCatalog};
pub use engine::{RetrievalEngine, RetrievalRequest, apply_cutoff, build_context, merge_ranked};
pub use hybrid_index::{
    ChunkRecord, FusionWeights, HybridQuery, HybridSearchIndex, IndexFuture, SqliteHybridIndex,
};
