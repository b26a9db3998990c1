//! Core types shared by every layer of the chat engine.

/// Configuration.
pub mod config;
/// Retrieved passages.
pub mod document;
/// Error taxonomy.
pub mod errors;
/// Metadata filter predicate.
pub mod filter;
/// Identifiers.
pub mod ids;
/// Interrupt payloads and suspension points.
pub mod interrupt;
/// Conversation state and its reducer.
pub mod state;
/// Task descriptor produced by classification.
pub mod task;
