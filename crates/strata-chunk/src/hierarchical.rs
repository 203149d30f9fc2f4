//! Multi-tier chunk trees.
//!
//! A document is split into the largest tier first; every node is then split
//! again with the next tier's bound, down to the smallest tier. Children of a
//! node partition its span exactly, so the leaves of one document cover the
//! whole text in order.

use std::collections::HashSet;

use strata_core::{ChunkNode, ChunkingConfig, Document, NodeId, SizeUnit, Span, StrataError};
use tracing::debug;

use crate::splitter::TextSplitter;

/// All nodes cut from a document set, in tier-major order.
///
/// Within a tier, nodes appear in document order. `leaf_ids` lists the
/// nodes of the deepest tier in the same order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkTree {
    /// Every node across every tier.
    pub nodes: Vec<ChunkNode>,
    /// Ids of the searchable leaf nodes.
    pub leaf_ids: Vec<NodeId>,
}

impl ChunkTree {
    /// Iterate over the leaf nodes.
    pub fn leaves(&self) -> impl Iterator<Item = &ChunkNode> {
        self.nodes.iter().filter(|n| n.is_leaf())
    }

    /// Total node count.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no nodes were produced.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn extend(&mut self, other: ChunkTree) {
        self.nodes.extend(other.nodes);
        self.leaf_ids.extend(other.leaf_ids);
    }

    /// Put nodes back into tier-major order after several documents were
    /// appended one after another.
    fn sort_tier_major(&mut self) {
        self.nodes.sort_by_key(|n| n.tier);
    }
}

/// Splits documents into a tree of chunks with one tier per configured size.
///
/// # Examples
///
/// ```
/// use strata_chunk::HierarchicalChunker;
/// use strata_core::{Document, SizeUnit};
///
/// let chunker = HierarchicalChunker::new(&[64, 16], SizeUnit::Chars).unwrap();
/// let doc = Document::new("doc", "Cats purr. Dogs bark. Birds sing loudly at dawn.");
/// let tree = chunker.chunk(&doc).unwrap();
///
/// assert_eq!(tree.nodes[0].tier, 0);
/// assert!(tree.leaves().all(|n| n.tier == 1));
/// ```
#[derive(Debug, Clone)]
pub struct HierarchicalChunker {
    tiers: Vec<TextSplitter>,
}

impl HierarchicalChunker {
    /// Create a chunker from a strictly descending list of sizes.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Chunking`] if `chunk_sizes` is empty, contains
    /// zero, or is not strictly descending.
    pub fn new(chunk_sizes: &[usize], unit: SizeUnit) -> Result<Self, StrataError> {
        if chunk_sizes.is_empty() {
            return Err(StrataError::Chunking("chunk sizes must not be empty".into()));
        }
        if let Some(pair) = chunk_sizes.windows(2).find(|w| w[0] <= w[1]) {
            return Err(StrataError::Chunking(format!(
                "chunk sizes must be strictly descending, got {} then {}",
                pair[0], pair[1]
            )));
        }

        let tiers = chunk_sizes
            .iter()
            .map(|&size| TextSplitter::new(size, unit))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { tiers })
    }

    /// Create a chunker from the `[chunking]` config section.
    pub fn from_config(config: &ChunkingConfig) -> Result<Self, StrataError> {
        Self::new(&config.chunk_sizes, config.unit)
    }

    /// Number of tiers.
    pub fn depth(&self) -> usize {
        self.tiers.len()
    }

    /// Chunk one document.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Chunking`] if the document is empty or
    /// whitespace only.
    pub fn chunk(&self, doc: &Document) -> Result<ChunkTree, StrataError> {
        ensure_not_blank(doc)?;

        let mut nodes: Vec<ChunkNode> = Vec::new();
        let mut frontier: Vec<usize> = Vec::new();

        for range in self.tiers[0].split(&doc.text) {
            let span = Span::new(range.start, range.end);
            frontier.push(nodes.len());
            nodes.push(ChunkNode::new(&doc.id, 0, span, &doc.text[range]));
        }

        for (tier, splitter) in self.tiers.iter().enumerate().skip(1) {
            let mut next = Vec::new();
            for &parent_slot in &frontier {
                let parent_id = nodes[parent_slot].id.clone();
                let parent_start = nodes[parent_slot].span.start;
                let parent_text = nodes[parent_slot].text.clone();

                let mut child_ids = Vec::new();
                for range in splitter.split(&parent_text) {
                    let span = Span::new(parent_start + range.start, parent_start + range.end);
                    let mut child = ChunkNode::new(&doc.id, tier, span, &parent_text[range]);
                    child.parent_id = Some(parent_id.clone());
                    child_ids.push(child.id.clone());
                    next.push(nodes.len());
                    nodes.push(child);
                }
                nodes[parent_slot].child_ids = child_ids;
            }
            frontier = next;
        }

        let leaf_ids = frontier.iter().map(|&slot| nodes[slot].id.clone()).collect();
        debug!(
            source = %doc.id,
            nodes = nodes.len(),
            tiers = self.tiers.len(),
            "chunked document"
        );

        Ok(ChunkTree { nodes, leaf_ids })
    }

    /// Chunk several documents into one tree.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Chunking`] if any document is blank or two
    /// documents share an id.
    pub fn chunk_all(&self, docs: &[Document]) -> Result<ChunkTree, StrataError> {
        ensure_unique_ids(docs)?;
        let mut tree = ChunkTree::default();
        for doc in docs {
            tree.extend(self.chunk(doc)?);
        }
        tree.sort_tier_major();
        Ok(tree)
    }
}

pub(crate) fn ensure_not_blank(doc: &Document) -> Result<(), StrataError> {
    if doc.text.trim().is_empty() {
        return Err(StrataError::Chunking(format!(
            "document '{}' is empty",
            doc.id
        )));
    }
    Ok(())
}

pub(crate) fn ensure_unique_ids(docs: &[Document]) -> Result<(), StrataError> {
    let mut seen = HashSet::new();
    for doc in docs {
        if !seen.insert(doc.id.as_str()) {
            return Err(StrataError::Chunking(format!(
                "duplicate document id '{}'",
                doc.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text() -> String {
        let para = "The merge step climbs the tree. Siblings vote for their parent. \
                    A parent wins when enough children are present. ";
        let mut text = String::new();
        for i in 0..6 {
            text.push_str(&format!("Section {i}. "));
            text.push_str(&para.repeat(3));
            text.push_str("\n\n");
        }
        text
    }

    #[test]
    fn rejects_bad_size_sequences() {
        assert!(HierarchicalChunker::new(&[], SizeUnit::Chars).is_err());
        assert!(HierarchicalChunker::new(&[128, 512, 2048], SizeUnit::Chars).is_err());
        assert!(HierarchicalChunker::new(&[512, 512], SizeUnit::Chars).is_err());
        assert!(HierarchicalChunker::new(&[512, 0], SizeUnit::Chars).is_err());
        assert!(HierarchicalChunker::new(&[2048, 512, 128], SizeUnit::Chars).is_ok());
    }

    #[test]
    fn rejects_blank_document() {
        let chunker = HierarchicalChunker::new(&[64, 16], SizeUnit::Chars).unwrap();
        let err = chunker.chunk(&Document::new("d", "")).unwrap_err();
        assert!(matches!(err, StrataError::Chunking(_)));
        let err = chunker.chunk(&Document::new("d", " \n\t ")).unwrap_err();
        assert!(matches!(err, StrataError::Chunking(_)));
    }

    #[test]
    fn children_partition_parent_span() {
        let text = sample_text();
        let doc = Document::new("doc", text.clone());
        let chunker = HierarchicalChunker::new(&[512, 128, 32], SizeUnit::Chars).unwrap();
        let tree = chunker.chunk(&doc).unwrap();

        for node in &tree.nodes {
            assert_eq!(node.text, &text[node.span.start..node.span.end]);
            if node.is_leaf() {
                continue;
            }
            let mut cursor = node.span.start;
            for child_id in &node.child_ids {
                let child = tree.nodes.iter().find(|n| &n.id == child_id).unwrap();
                assert_eq!(child.parent_id.as_ref(), Some(&node.id));
                assert_eq!(child.tier, node.tier + 1);
                assert_eq!(child.span.start, cursor);
                cursor = child.span.end;
            }
            assert_eq!(cursor, node.span.end);
        }
    }

    #[test]
    fn each_tier_covers_the_document() {
        let text = sample_text();
        let doc = Document::new("doc", text.clone());
        let chunker = HierarchicalChunker::new(&[512, 128, 32], SizeUnit::Chars).unwrap();
        let tree = chunker.chunk(&doc).unwrap();

        for tier in 0..3 {
            let rebuilt: String = tree
                .nodes
                .iter()
                .filter(|n| n.tier == tier)
                .map(|n| n.text.as_str())
                .collect();
            assert_eq!(rebuilt, text, "tier {tier} does not reconstruct the text");
        }
    }

    #[test]
    fn leaves_are_deepest_tier_in_order() {
        let doc = Document::new("doc", sample_text());
        let chunker = HierarchicalChunker::new(&[512, 128, 32], SizeUnit::Chars).unwrap();
        let tree = chunker.chunk(&doc).unwrap();

        let leaf_ids: Vec<_> = tree.leaves().map(|n| n.id.clone()).collect();
        assert_eq!(leaf_ids, tree.leaf_ids);
        assert!(tree.leaves().all(|n| n.tier == 2));
        assert!(tree.nodes.windows(2).all(|w| w[0].tier <= w[1].tier));
    }

    #[test]
    fn ids_are_stable_and_unique() {
        let doc = Document::new("doc", sample_text());
        let chunker = HierarchicalChunker::new(&[512, 128], SizeUnit::Chars).unwrap();
        let a = chunker.chunk(&doc).unwrap();
        let b = chunker.chunk(&doc).unwrap();
        assert_eq!(a, b);

        let unique: HashSet<_> = a.nodes.iter().map(|n| n.id.clone()).collect();
        assert_eq!(unique.len(), a.nodes.len());
    }

    #[test]
    fn single_tier_nodes_are_roots_and_leaves() {
        let chunker = HierarchicalChunker::new(&[40], SizeUnit::Chars).unwrap();
        let tree = chunker.chunk(&Document::new("d", sample_text())).unwrap();
        assert!(tree.nodes.iter().all(|n| n.is_root() && n.is_leaf()));
        assert_eq!(tree.leaf_ids.len(), tree.len());
    }

    #[test]
    fn chunk_all_rejects_duplicate_ids() {
        let chunker = HierarchicalChunker::new(&[64, 16], SizeUnit::Chars).unwrap();
        let docs = vec![Document::new("a", "One."), Document::new("a", "Two.")];
        assert!(matches!(
            chunker.chunk_all(&docs),
            Err(StrataError::Chunking(_))
        ));
    }

    #[test]
    fn chunk_all_keeps_tier_major_order() {
        let chunker = HierarchicalChunker::new(&[64, 16], SizeUnit::Chars).unwrap();
        let docs = vec![
            Document::new("a", "Alpha beta gamma. Delta epsilon."),
            Document::new("b", "Zeta eta theta. Iota kappa lambda."),
        ];
        let tree = chunker.chunk_all(&docs).unwrap();
        assert!(tree.nodes.windows(2).all(|w| w[0].tier <= w[1].tier));
        assert_eq!(tree.nodes[0].source_id, "a");
        assert_eq!(tree.nodes[1].source_id, "b");
    }
}
