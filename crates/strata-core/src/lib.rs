//! Core types, configuration, and error handling for the Strata retrieval engine.
//!
//! This crate provides the shared foundation used by all other Strata crates:
//! - [`StrataError`]: unified error type using `thiserror` and `miette`
//! - [`StrataConfig`]: configuration loaded from `.strata.toml`
//! - Shared types: [`ChunkNode`], [`NodeId`], [`Span`], [`Document`],
//!   [`ScoredNode`], [`Passage`], [`RetrievalMode`], [`OutputFormat`]
//! - Collaborator traits: [`Embedder`], [`Scorer`], [`Generator`]

mod config;
mod error;
pub mod provider;
mod types;

pub use config::{
    ChunkingConfig, EmbeddingConfig, IndexConfig, LlmConfig, RerankConfig, RerankFailurePolicy,
    RetrievalConfig, ScoreAggregate, SizeUnit, StrataConfig,
};
pub use error::StrataError;
pub use provider::{CompletionOptions, Embedder, Generator, ModelMetadata, Scorer, TextStream};
pub use types::{
    ChunkNode, Document, NodeId, OutputFormat, Passage, RetrievalMode, ScoredNode, Span,
    ORIGINAL_TEXT_KEY, SENTENCE_INDEX_KEY, WINDOW_END_KEY, WINDOW_KEY, WINDOW_START_KEY,
};

/// A convenience `Result` type for Strata operations.
pub type Result<T> = std::result::Result<T, StrataError>;
