use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata key holding the surrounding-sentence text of a window-mode node.
pub const WINDOW_KEY: &str = "window";
/// Metadata key holding the single sentence a window-mode node was cut from.
pub const ORIGINAL_TEXT_KEY: &str = "original_text";
/// Metadata key holding a sentence's position in its source document.
pub const SENTENCE_INDEX_KEY: &str = "sentence_index";
/// Metadata key holding the first sentence index covered by a window.
pub const WINDOW_START_KEY: &str = "window_start";
/// Metadata key holding the last sentence index (inclusive) covered by a window.
pub const WINDOW_END_KEY: &str = "window_end";

/// Stable identifier of a chunk node.
///
/// # Examples
///
/// ```
/// use strata_core::NodeId;
///
/// let id = NodeId::new("a1b2c3");
/// assert_eq!(id.as_str(), "a1b2c3");
/// assert_eq!(id.to_string(), "a1b2c3");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the id of a chunk from where it was cut.
    ///
    /// The id is the first 16 bytes of `SHA-256(source_id:tier:start:end)`,
    /// hex encoded, so rebuilding the same corpus yields the same ids.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_core::{NodeId, Span};
    ///
    /// let a = NodeId::derive("doc", 1, Span::new(0, 128));
    /// let b = NodeId::derive("doc", 1, Span::new(0, 128));
    /// let c = NodeId::derive("doc", 2, Span::new(0, 128));
    /// assert_eq!(a, b);
    /// assert_ne!(a, c);
    /// assert_eq!(a.as_str().len(), 32);
    /// ```
    pub fn derive(source_id: &str, tier: usize, span: Span) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{source_id}:{tier}:{}:{}", span.start, span.end).as_bytes());
        let digest = hasher.finalize();
        Self(digest[..16].iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Half-open byte range `[start, end)` into a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    /// First byte of the span.
    pub start: usize,
    /// One past the last byte of the span.
    pub end: usize,
}

impl Span {
    /// Create a span.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Length of the span in bytes.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Whether the span covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A source document handed to the chunker.
///
/// # Examples
///
/// ```
/// use strata_core::Document;
///
/// let doc = Document::new("notes.txt", "First line.\n\nSecond line.");
/// assert_eq!(doc.id, "notes.txt");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier, used as the `source_id` of its nodes.
    pub id: String,
    /// Full document text.
    pub text: String,
}

impl Document {
    /// Create a document.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }

    /// Join several documents into one, separated by blank lines.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_core::Document;
    ///
    /// let docs = vec![Document::new("a", "Alpha."), Document::new("b", "Beta.")];
    /// let joined = Document::concat("corpus", &docs);
    /// assert_eq!(joined.text, "Alpha.\n\nBeta.");
    /// ```
    pub fn concat(id: impl Into<String>, documents: &[Document]) -> Self {
        let text = documents
            .iter()
            .map(|d| d.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        Self::new(id, text)
    }

    /// SHA-256 over the ids and texts of a document set, hex encoded.
    ///
    /// Used to detect that a persisted index was built from different content.
    pub fn fingerprint(documents: &[Document]) -> String {
        let mut hasher = Sha256::new();
        for doc in documents {
            hasher.update(doc.id.as_bytes());
            hasher.update([0u8]);
            hasher.update(doc.text.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// A unit of text in the chunk hierarchy.
///
/// # Examples
///
/// ```
/// use strata_core::{ChunkNode, NodeId, Span};
///
/// let node = ChunkNode::new("doc", 0, Span::new(0, 5), "Hello");
/// assert!(node.is_root());
/// assert!(node.is_leaf());
/// assert_eq!(node.embedding_text(), "Hello");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkNode {
    /// Stable unique id.
    pub id: NodeId,
    /// Exact slice of the source text covered by `span`.
    pub text: String,
    /// Depth in the hierarchy; 0 is the largest tier.
    pub tier: usize,
    /// The node one tier up whose span contains this one.
    pub parent_id: Option<NodeId>,
    /// Nodes one tier down, in document order.
    #[serde(default)]
    pub child_ids: Vec<NodeId>,
    /// Id of the document this node was cut from.
    pub source_id: String,
    /// Byte range in the source document.
    pub span: Span,
    /// Open key/value metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ChunkNode {
    /// Create an unlinked node whose id is derived from its position.
    pub fn new(source_id: &str, tier: usize, span: Span, text: impl Into<String>) -> Self {
        Self {
            id: NodeId::derive(source_id, tier, span),
            text: text.into(),
            tier,
            parent_id: None,
            child_ids: Vec::new(),
            source_id: source_id.to_string(),
            span,
            metadata: BTreeMap::new(),
        }
    }

    /// Whether the node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.child_ids.is_empty()
    }

    /// Text used to embed this node: the original sentence for window-mode
    /// nodes, the node text otherwise.
    pub fn embedding_text(&self) -> &str {
        self.metadata
            .get(ORIGINAL_TEXT_KEY)
            .map(String::as_str)
            .unwrap_or(&self.text)
    }

    /// Parse a numeric metadata value.
    pub fn metadata_usize(&self, key: &str) -> Option<usize> {
        self.metadata.get(key).and_then(|v| v.parse().ok())
    }
}

/// A node id tagged with a similarity score and its position in the ranking
/// it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredNode {
    /// Node id.
    pub id: NodeId,
    /// Similarity score (higher is better).
    pub score: f32,
    /// Zero-based position in the originating ranking.
    pub rank: usize,
}

/// A retrieved passage ready for reranking or prompt assembly.
///
/// # Examples
///
/// ```
/// use strata_core::{NodeId, Passage, Span};
///
/// let passage = Passage {
///     id: NodeId::new("n1"),
///     text: "Musk founded xAI in 2023.".into(),
///     score: 0.82,
///     rerank_score: None,
///     tier: 2,
///     source_id: "corpus".into(),
///     span: Span::new(0, 25),
///     merged_from: vec![],
/// };
/// assert!(passage.merged_from.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Passage {
    /// Node the passage text belongs to.
    pub id: NodeId,
    /// Passage text.
    pub text: String,
    /// Retrieval score (after merge aggregation).
    pub score: f32,
    /// Cross-encoder score, once reranked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    /// Tier of the node.
    pub tier: usize,
    /// Source document id.
    pub source_id: String,
    /// Byte range in the source document.
    pub span: Span,
    /// Matched node ids this passage replaced, empty when returned as-is.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<NodeId>,
}

impl Passage {
    /// Build a passage that carries a node's own text.
    pub fn from_node(node: &ChunkNode, score: f32) -> Self {
        Self {
            id: node.id.clone(),
            text: node.text.clone(),
            score,
            rerank_score: None,
            tier: node.tier,
            source_id: node.source_id.clone(),
            span: node.span,
            merged_from: Vec::new(),
        }
    }

    /// The score the passage is currently ranked by.
    pub fn effective_score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.score)
    }
}

/// How the index is organised and queried.
///
/// # Examples
///
/// ```
/// use strata_core::RetrievalMode;
///
/// let mode: RetrievalMode = "window".parse().unwrap();
/// assert_eq!(mode, RetrievalMode::Window);
/// assert_eq!(RetrievalMode::default().to_string(), "hierarchical");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Tiered chunk tree with auto-merging.
    #[default]
    Hierarchical,
    /// Flat sentence list with window replacement.
    Window,
    /// Single-size overlapping chunks returned as-is.
    Flat,
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalMode::Hierarchical => write!(f, "hierarchical"),
            RetrievalMode::Window => write!(f, "window"),
            RetrievalMode::Flat => write!(f, "flat"),
        }
    }
}

impl FromStr for RetrievalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hierarchical" | "merge" | "auto-merging" => Ok(RetrievalMode::Hierarchical),
            "window" | "sentence-window" => Ok(RetrievalMode::Window),
            "flat" | "basic" => Ok(RetrievalMode::Flat),
            other => Err(format!("unknown retrieval mode: {other}")),
        }
    }
}

/// Output format for CLI results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieval_mode_from_str() {
        assert_eq!(
            "hierarchical".parse::<RetrievalMode>().unwrap(),
            RetrievalMode::Hierarchical
        );
        assert_eq!("WINDOW".parse::<RetrievalMode>().unwrap(), RetrievalMode::Window);
        assert_eq!("basic".parse::<RetrievalMode>().unwrap(), RetrievalMode::Flat);
        assert!("graph".parse::<RetrievalMode>().is_err());
    }

    #[test]
    fn output_format_round_trips_through_display() {
        for fmt in [OutputFormat::Text, OutputFormat::Json] {
            assert_eq!(fmt.to_string().parse::<OutputFormat>().unwrap(), fmt);
        }
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn embedding_text_prefers_original_sentence() {
        let mut node = ChunkNode::new("doc", 0, Span::new(0, 20), "window text here");
        node.metadata
            .insert(ORIGINAL_TEXT_KEY.into(), "the sentence".into());
        assert_eq!(node.embedding_text(), "the sentence");
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let a = vec![Document::new("d", "one")];
        let b = vec![Document::new("d", "two")];
        assert_eq!(Document::fingerprint(&a), Document::fingerprint(&a));
        assert_ne!(Document::fingerprint(&a), Document::fingerprint(&b));
    }

    #[test]
    fn node_serializes_camel_case() {
        let node = ChunkNode::new("doc", 1, Span::new(3, 9), "abcdef");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["sourceId"], "doc");
        assert_eq!(json["span"]["start"], 3);
        assert!(json["parentId"].is_null());
    }

    #[test]
    fn effective_score_prefers_rerank() {
        let node = ChunkNode::new("doc", 0, Span::new(0, 1), "a");
        let mut passage = Passage::from_node(&node, 0.4);
        assert_eq!(passage.effective_score(), 0.4);
        passage.rerank_score = Some(3.5);
        assert_eq!(passage.effective_score(), 3.5);
    }
}
