//! Task classification.

pub mod classifier;
pub mod few_shots;
pub mod prompt;
pub mod ranker;

pub use classifier::{TaskClassifier, parse_task};
pub use few_shots::{ExampleBank, FewShotExample, PromptKind};
pub use ranker::{EmbeddingExampleRanker, ExampleRanker, RankFuture};
