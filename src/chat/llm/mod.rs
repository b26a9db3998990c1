//! Text generation modules.

pub mod generator;

pub use generator::{
    GenerateFuture, GenerationOptions, GenerationRequest, OllamaGenerator, TextGenerator,
    TokenStream,
};
