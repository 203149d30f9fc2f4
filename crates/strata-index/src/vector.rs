//! Leaf embeddings with exhaustive cosine search.
//!
//! Only leaf nodes are embedded. Search is a linear scan computed in Rust,
//! which is adequate for the per-query corpora this engine indexes.

use std::cmp::Ordering;

use strata_core::{ChunkNode, Embedder, NodeId, ScoredNode, StrataError};
use tracing::{debug, info};

/// Embedding vectors for the leaf nodes of an index.
///
/// # Examples
///
/// ```
/// use strata_core::NodeId;
/// use strata_index::LeafVectorIndex;
///
/// let index = LeafVectorIndex::from_parts(
///     vec![NodeId::new("a"), NodeId::new("b")],
///     vec![vec![1.0, 0.0], vec![0.0, 1.0]],
/// )
/// .unwrap();
///
/// let hits = index.query_vector(&[0.9, 0.1], 1).unwrap();
/// assert_eq!(hits[0].id.as_str(), "a");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafVectorIndex {
    ids: Vec<NodeId>,
    vectors: Vec<Vec<f32>>,
    dimensions: usize,
}

impl LeafVectorIndex {
    /// Embed every leaf, `batch_size` texts per embedding call.
    ///
    /// `on_progress(done, total)` is called after each batch.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Embedding`] if the embedder fails, returns the
    /// wrong number of vectors, or returns vectors of differing dimensions.
    /// No partial index is produced.
    pub async fn build<F>(
        leaves: &[&ChunkNode],
        embedder: &dyn Embedder,
        batch_size: usize,
        mut on_progress: F,
    ) -> Result<Self, StrataError>
    where
        F: FnMut(usize, usize) + Send,
    {
        let batch_size = batch_size.max(1);
        let total = leaves.len();
        let mut ids = Vec::with_capacity(total);
        let mut vectors = Vec::with_capacity(total);

        for batch in leaves.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|n| n.embedding_text().to_string()).collect();
            let embedded = embedder.embed_documents(&texts).await?;
            if embedded.len() != texts.len() {
                return Err(StrataError::Embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    texts.len()
                )));
            }
            ids.extend(batch.iter().map(|n| n.id.clone()));
            vectors.extend(embedded);
            on_progress(ids.len(), total);
        }

        let index = Self::from_parts(ids, vectors)?;
        info!(
            leaves = index.len(),
            dimensions = index.dimensions,
            model = embedder.model(),
            "built leaf vector index"
        );
        Ok(index)
    }

    /// Assemble an index from already-computed vectors.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Embedding`] if the lengths differ, a vector is
    /// empty, or dimensions disagree.
    pub fn from_parts(ids: Vec<NodeId>, vectors: Vec<Vec<f32>>) -> Result<Self, StrataError> {
        if ids.len() != vectors.len() {
            return Err(StrataError::Embedding(format!(
                "{} ids but {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
        if !vectors.is_empty() && dimensions == 0 {
            return Err(StrataError::Embedding("empty embedding vector".into()));
        }
        if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dimensions) {
            return Err(StrataError::Embedding(format!(
                "vector for {} has {} dimensions, expected {dimensions}",
                ids[i],
                v.len()
            )));
        }
        Ok(Self {
            ids,
            vectors,
            dimensions,
        })
    }

    /// Embed `query` once and return the `k` most similar leaves.
    ///
    /// # Errors
    ///
    /// Propagates embedder failures; see also [`LeafVectorIndex::query_vector`].
    pub async fn query(
        &self,
        query: &str,
        k: usize,
        embedder: &dyn Embedder,
    ) -> Result<Vec<ScoredNode>, StrataError> {
        let vector = embedder.embed_query(query).await?;
        self.query_vector(&vector, k)
    }

    /// Return the `k` most similar leaves to a pre-computed vector.
    ///
    /// Results are ordered by descending score, ties by ascending node id.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Embedding`] if the vector's dimension does not
    /// match the index.
    pub fn query_vector(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredNode>, StrataError> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.dimensions {
            return Err(StrataError::Embedding(format!(
                "query vector has {} dimensions, index has {}",
                vector.len(),
                self.dimensions
            )));
        }

        let mut scored: Vec<(f32, &NodeId)> = self
            .ids
            .iter()
            .zip(&self.vectors)
            .map(|(id, v)| (cosine_similarity(vector, v) as f32, id))
            .collect();

        scored.sort_by(|a, b| match b.0.total_cmp(&a.0) {
            Ordering::Equal => a.1.cmp(b.1),
            other => other,
        });
        scored.truncate(k);

        debug!(k, hits = scored.len(), "vector search");
        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(rank, (score, id))| ScoredNode {
                id: id.clone(),
                score,
                rank,
            })
            .collect())
    }

    /// Vector stored for a leaf.
    pub fn vector(&self, id: &NodeId) -> Option<&[f32]> {
        self.ids
            .iter()
            .position(|x| x == id)
            .map(|i| self.vectors[i].as_slice())
    }

    /// `(id, vector)` pairs in build order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &[f32])> {
        self.ids.iter().zip(self.vectors.iter().map(Vec::as_slice))
    }

    /// Indexed leaf ids in build order.
    pub fn ids(&self) -> &[NodeId] {
        &self.ids
    }

    /// Vector dimensionality (0 when empty).
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of indexed leaves.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    dot / denom
}
