//! Document chunking for Strata.
//!
//! Three shapes of index are produced from the same splitter:
//! - [`HierarchicalChunker`]: a tree with one tier per configured size
//! - [`SentenceWindowParser`]: one node per sentence with a surrounding window
//! - [`FlatChunker`]: a single tier of overlapping chunks

pub mod flat;
pub mod hierarchical;
pub mod splitter;
pub mod window;

pub use flat::FlatChunker;
pub use hierarchical::{ChunkTree, HierarchicalChunker};
pub use splitter::TextSplitter;
pub use window::SentenceWindowParser;

use strata_core::{ChunkingConfig, Document, RetrievalMode, StrataError};

/// Chunk documents the way `mode` expects them indexed.
///
/// # Errors
///
/// Returns [`StrataError::Chunking`] for invalid sizes or blank documents.
pub fn chunk_for_mode(
    mode: RetrievalMode,
    config: &ChunkingConfig,
    docs: &[Document],
) -> Result<ChunkTree, StrataError> {
    match mode {
        RetrievalMode::Hierarchical => HierarchicalChunker::from_config(config)?.chunk_all(docs),
        RetrievalMode::Window => SentenceWindowParser::new(config.window_size).parse_all(docs),
        RetrievalMode::Flat => FlatChunker::from_config(config)?.chunk_all(docs),
    }
}
