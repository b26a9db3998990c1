//! History compaction.

pub mod finalizer;

pub use finalizer::SummaryFinalizer;
