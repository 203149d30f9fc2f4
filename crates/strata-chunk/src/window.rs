//! Sentence-window parsing.
//!
//! Every sentence becomes a node. The node is embedded on its own sentence
//! (`original_text`) but carries the surrounding `window` of sentences, which
//! replaces it at retrieval time.

use strata_core::{
    ChunkNode, Document, Span, StrataError, ORIGINAL_TEXT_KEY, SENTENCE_INDEX_KEY,
    WINDOW_END_KEY, WINDOW_KEY, WINDOW_START_KEY,
};
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

use crate::hierarchical::{ensure_not_blank, ensure_unique_ids, ChunkTree};

/// Default number of sentences on each side of a window.
pub const DEFAULT_WINDOW_SIZE: usize = 3;

/// Splits documents into sentence nodes with surrounding windows.
///
/// # Examples
///
/// ```
/// use strata_chunk::SentenceWindowParser;
/// use strata_core::{Document, WINDOW_KEY};
///
/// let parser = SentenceWindowParser::new(1);
/// let doc = Document::new("d", "One. Two. Three.");
/// let tree = parser.parse(&doc).unwrap();
///
/// assert_eq!(tree.nodes.len(), 3);
/// assert_eq!(tree.nodes[1].metadata[WINDOW_KEY], "One. Two. Three.");
/// assert_eq!(tree.nodes[0].metadata[WINDOW_KEY], "One. Two. ");
/// ```
#[derive(Debug, Clone)]
pub struct SentenceWindowParser {
    window_size: usize,
}

impl Default for SentenceWindowParser {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl SentenceWindowParser {
    /// Create a parser keeping `window_size` sentences on each side.
    pub fn new(window_size: usize) -> Self {
        Self { window_size }
    }

    /// Parse one document into sentence nodes.
    ///
    /// Whitespace-only segments are attached to the preceding sentence so the
    /// nodes still cover the whole text.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Chunking`] if the document is empty or
    /// whitespace only.
    pub fn parse(&self, doc: &Document) -> Result<ChunkTree, StrataError> {
        ensure_not_blank(doc)?;

        let sentences = sentence_spans(&doc.text);
        let mut nodes = Vec::with_capacity(sentences.len());

        for (i, span) in sentences.iter().enumerate() {
            let lo = i.saturating_sub(self.window_size);
            let hi = (i + self.window_size).min(sentences.len() - 1);
            let text = &doc.text[span.start..span.end];
            let window = &doc.text[sentences[lo].start..sentences[hi].end];

            let mut node = ChunkNode::new(&doc.id, 0, *span, text);
            node.metadata.insert(WINDOW_KEY.into(), window.to_string());
            node.metadata
                .insert(ORIGINAL_TEXT_KEY.into(), text.trim().to_string());
            node.metadata.insert(SENTENCE_INDEX_KEY.into(), i.to_string());
            node.metadata.insert(WINDOW_START_KEY.into(), lo.to_string());
            node.metadata.insert(WINDOW_END_KEY.into(), hi.to_string());
            nodes.push(node);
        }

        debug!(source = %doc.id, sentences = nodes.len(), "parsed sentence windows");
        let leaf_ids = nodes.iter().map(|n| n.id.clone()).collect();
        Ok(ChunkTree { nodes, leaf_ids })
    }

    /// Parse several documents.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Chunking`] if any document is blank or two
    /// documents share an id.
    pub fn parse_all(&self, docs: &[Document]) -> Result<ChunkTree, StrataError> {
        ensure_unique_ids(docs)?;
        let mut tree = ChunkTree::default();
        for doc in docs {
            let parsed = self.parse(doc)?;
            tree.nodes.extend(parsed.nodes);
            tree.leaf_ids.extend(parsed.leaf_ids);
        }
        Ok(tree)
    }
}

fn sentence_spans(text: &str) -> Vec<Span> {
    let mut spans: Vec<Span> = Vec::new();
    let mut pending_start: Option<usize> = None;

    for (start, sentence) in text.split_sentence_bound_indices() {
        let end = start + sentence.len();
        if sentence.trim().is_empty() {
            match spans.last_mut() {
                Some(last) => last.end = end,
                None => pending_start = Some(pending_start.unwrap_or(start)),
            }
            continue;
        }
        spans.push(Span::new(pending_start.take().unwrap_or(start), end));
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_are_clamped_at_edges() {
        let parser = SentenceWindowParser::new(2);
        let doc = Document::new("d", "A one. B two. C three. D four. E five.");
        let tree = parser.parse(&doc).unwrap();

        assert_eq!(tree.nodes.len(), 5);
        let first = &tree.nodes[0];
        assert_eq!(first.metadata_usize(WINDOW_START_KEY), Some(0));
        assert_eq!(first.metadata_usize(WINDOW_END_KEY), Some(2));
        let last = &tree.nodes[4];
        assert_eq!(last.metadata_usize(WINDOW_START_KEY), Some(2));
        assert_eq!(last.metadata_usize(WINDOW_END_KEY), Some(4));
        assert_eq!(last.metadata[WINDOW_KEY], "C three. D four. E five.");
    }

    #[test]
    fn original_text_is_trimmed_sentence() {
        let parser = SentenceWindowParser::default();
        let doc = Document::new("d", "Musk founded xAI. It launched Grok.");
        let tree = parser.parse(&doc).unwrap();
        assert_eq!(tree.nodes[0].text, "Musk founded xAI. ");
        assert_eq!(tree.nodes[0].embedding_text(), "Musk founded xAI.");
        assert_eq!(tree.nodes[1].metadata_usize(SENTENCE_INDEX_KEY), Some(1));
    }

    #[test]
    fn sentences_cover_the_text() {
        let text = "  Leading space. Then more.\n\n\nAnd a paragraph.  ";
        let tree = SentenceWindowParser::new(1)
            .parse(&Document::new("d", text))
            .unwrap();
        let rebuilt: String = tree.nodes.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(rebuilt, text);
        assert!(tree.nodes.iter().all(|n| !n.text.trim().is_empty()));
    }

    #[test]
    fn rejects_blank_document() {
        let parser = SentenceWindowParser::default();
        assert!(matches!(
            parser.parse(&Document::new("d", "   ")),
            Err(StrataError::Chunking(_))
        ));
    }

    #[test]
    fn zero_window_is_the_sentence() {
        let tree = SentenceWindowParser::new(0)
            .parse(&Document::new("d", "One. Two."))
            .unwrap();
        assert_eq!(tree.nodes[0].metadata[WINDOW_KEY], tree.nodes[0].text);
    }
}
