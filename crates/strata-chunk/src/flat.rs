//! Single-size overlapping chunks for the flat pipeline.

use strata_core::{ChunkNode, ChunkingConfig, Document, Span, StrataError};
use tracing::debug;

use crate::hierarchical::{ensure_not_blank, ensure_unique_ids, ChunkTree};
use crate::splitter::TextSplitter;

/// Splits documents into one tier of overlapping chunks.
///
/// # Examples
///
/// ```
/// use strata_chunk::FlatChunker;
/// use strata_core::{Document, SizeUnit};
///
/// let chunker = FlatChunker::new(24, 6, SizeUnit::Chars).unwrap();
/// let doc = Document::new("d", "one two three four five six seven eight nine ten");
/// let tree = chunker.chunk(&doc).unwrap();
///
/// assert!(tree.nodes.len() > 1);
/// assert!(tree.nodes.iter().all(|n| n.is_root() && n.is_leaf()));
/// ```
#[derive(Debug, Clone)]
pub struct FlatChunker {
    splitter: TextSplitter,
}

impl FlatChunker {
    /// Create a chunker.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Chunking`] if `chunk_size` is zero or
    /// `overlap >= chunk_size`.
    pub fn new(
        chunk_size: usize,
        overlap: usize,
        unit: strata_core::SizeUnit,
    ) -> Result<Self, StrataError> {
        let splitter = TextSplitter::new(chunk_size, unit)?.with_overlap(overlap)?;
        Ok(Self { splitter })
    }

    /// Create a chunker from the `[chunking]` config section.
    pub fn from_config(config: &ChunkingConfig) -> Result<Self, StrataError> {
        Self::new(config.chunk_size, config.chunk_overlap, config.unit)
    }

    /// Chunk one document.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Chunking`] if the document is blank.
    pub fn chunk(&self, doc: &Document) -> Result<ChunkTree, StrataError> {
        ensure_not_blank(doc)?;
        let nodes: Vec<ChunkNode> = self
            .splitter
            .split(&doc.text)
            .into_iter()
            .map(|r| ChunkNode::new(&doc.id, 0, Span::new(r.start, r.end), &doc.text[r]))
            .collect();
        debug!(source = %doc.id, chunks = nodes.len(), "chunked document (flat)");
        let leaf_ids = nodes.iter().map(|n| n.id.clone()).collect();
        Ok(ChunkTree { nodes, leaf_ids })
    }

    /// Chunk several documents.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Chunking`] if any document is blank or two
    /// documents share an id.
    pub fn chunk_all(&self, docs: &[Document]) -> Result<ChunkTree, StrataError> {
        ensure_unique_ids(docs)?;
        let mut tree = ChunkTree::default();
        for doc in docs {
            let chunked = self.chunk(doc)?;
            tree.nodes.extend(chunked.nodes);
            tree.leaf_ids.extend(chunked.leaf_ids);
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::SizeUnit;

    #[test]
    fn overlap_must_be_smaller_than_size() {
        assert!(matches!(
            FlatChunker::new(20, 20, SizeUnit::Chars),
            Err(StrataError::Chunking(_))
        ));
        assert!(FlatChunker::new(20, 19, SizeUnit::Chars).is_ok());
    }

    #[test]
    fn successive_chunks_overlap() {
        let chunker = FlatChunker::new(30, 10, SizeUnit::Chars).unwrap();
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";
        let tree = chunker.chunk(&Document::new("d", text)).unwrap();
        for pair in tree.nodes.windows(2) {
            assert!(pair[1].span.start < pair[0].span.end);
        }
        assert_eq!(tree.nodes.last().unwrap().span.end, text.len());
    }

    #[test]
    fn zero_overlap_partitions() {
        let chunker = FlatChunker::new(16, 0, SizeUnit::Chars).unwrap();
        let text = "First bit. Second bit. Third bit here.";
        let tree = chunker.chunk(&Document::new("d", text)).unwrap();
        let rebuilt: String = tree.nodes.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn blank_document_rejected() {
        let chunker = FlatChunker::new(16, 0, SizeUnit::Chars).unwrap();
        assert!(chunker.chunk(&Document::new("d", "")).is_err());
    }
}
