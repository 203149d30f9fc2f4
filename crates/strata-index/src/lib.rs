//! Node storage, leaf vectors and index persistence.
//!
//! An [`Index`] bundles the [`NodeStore`] (every node of every tier), the
//! [`LeafVectorIndex`] (embeddings of the leaves) and the [`Manifest`]
//! describing how they were built. Both parts are immutable once built and
//! shared through `Arc`.

pub mod docstore;
pub mod loader;
pub mod persist;
pub mod vector;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use strata_chunk::chunk_for_mode;
use strata_core::{
    ChunkNode, ChunkingConfig, Document, Embedder, RetrievalMode, StrataConfig, StrataError,
};
use tracing::{info, warn};

pub use docstore::NodeStore;
pub use loader::load_documents;
pub use persist::Manifest;
pub use vector::LeafVectorIndex;

/// Parameters that shape a built index.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Which retrieval mode the nodes are cut for.
    pub mode: RetrievalMode,
    /// Chunking parameters.
    pub chunking: ChunkingConfig,
    /// Texts per embedding call.
    pub batch_size: usize,
}

impl IndexSettings {
    /// Take the index-relevant parts of a full configuration.
    pub fn from_config(config: &StrataConfig) -> Self {
        Self {
            mode: config.retrieval.mode,
            chunking: config.chunking.clone(),
            batch_size: config.embedding.batch_size,
        }
    }
}

/// How [`Index::open_or_build`] treats an existing directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    /// Ignore any existing index and build from scratch.
    pub rebuild: bool,
    /// Rebuild when the stored corpus fingerprint differs.
    pub verify_fingerprint: bool,
}

/// Where an opened index came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrigin {
    /// Built because no index existed.
    Built,
    /// Deserialized from disk.
    Loaded,
    /// Rebuilt over an existing directory.
    Rebuilt,
}

/// A built or loaded index.
#[derive(Debug, Clone)]
pub struct Index {
    manifest: Manifest,
    store: Arc<NodeStore>,
    vectors: Arc<LeafVectorIndex>,
}

impl Index {
    /// Chunk `docs`, embed the leaves and assemble an index.
    ///
    /// `on_progress(done, total)` reports embedding progress.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Chunking`] for invalid sizes or blank
    /// documents and [`StrataError::Embedding`] for embedder failures.
    pub async fn build<F>(
        docs: &[Document],
        settings: &IndexSettings,
        embedder: &dyn Embedder,
        on_progress: F,
    ) -> Result<Self, StrataError>
    where
        F: FnMut(usize, usize) + Send,
    {
        let tree = chunk_for_mode(settings.mode, &settings.chunking, docs)?;
        let leaf_ids = tree.leaf_ids;
        let store = NodeStore::from_nodes(tree.nodes)?;
        store.validate()?;

        let leaves: Vec<&ChunkNode> = leaf_ids
            .iter()
            .map(|id| store.get(id))
            .collect::<Result<_, _>>()?;
        info!(
            mode = %settings.mode,
            nodes = store.len(),
            leaves = leaves.len(),
            "chunked corpus"
        );

        let vectors =
            LeafVectorIndex::build(&leaves, embedder, settings.batch_size, on_progress).await?;

        let manifest = Manifest {
            mode: settings.mode,
            chunk_sizes: settings.chunking.chunk_sizes.clone(),
            unit: settings.chunking.unit,
            chunk_size: settings.chunking.chunk_size,
            chunk_overlap: settings.chunking.chunk_overlap,
            window_size: settings.chunking.window_size,
            embedding_model: embedder.model().to_string(),
            dimensions: vectors.dimensions(),
            fingerprint: Document::fingerprint(docs),
            built_at: Utc::now(),
            node_count: store.len(),
            leaf_count: vectors.len(),
        };

        Ok(Self {
            manifest,
            store: Arc::new(store),
            vectors: Arc::new(vectors),
        })
    }

    /// Persist to `dir`.
    ///
    /// # Errors
    ///
    /// See [`persist::save`].
    pub fn save(&self, dir: &Path) -> Result<(), StrataError> {
        persist::save(dir, &self.store, &self.vectors, &self.manifest)
    }

    /// Load from `dir`.
    ///
    /// # Errors
    ///
    /// See [`persist::load`].
    pub fn load(dir: &Path) -> Result<Self, StrataError> {
        let (store, vectors, manifest) = persist::load(dir)?;
        Ok(Self {
            manifest,
            store: Arc::new(store),
            vectors: Arc::new(vectors),
        })
    }

    /// Load the index at `dir` if the directory exists, otherwise build and
    /// save it.
    ///
    /// The directory path is the cache key. When the stored corpus
    /// fingerprint differs from `docs`, the index is rebuilt if
    /// `verify_fingerprint` is set; otherwise a staleness warning is logged
    /// and the stored index is used.
    ///
    /// # Errors
    ///
    /// Build errors, plus [`StrataError::CorruptIndex`] for an existing but
    /// unreadable directory.
    pub async fn open_or_build<F>(
        dir: &Path,
        docs: &[Document],
        settings: &IndexSettings,
        embedder: &dyn Embedder,
        options: OpenOptions,
        on_progress: F,
    ) -> Result<(Self, IndexOrigin), StrataError>
    where
        F: FnMut(usize, usize) + Send,
    {
        let existed = dir.exists();
        if existed && !options.rebuild {
            let index = Self::load(dir)?;
            let fresh = index.manifest.fingerprint == Document::fingerprint(docs);

            if !fresh && options.verify_fingerprint {
                warn!(dir = %dir.display(), "corpus changed since the index was built, rebuilding");
            } else {
                if !fresh {
                    warn!(
                        dir = %dir.display(),
                        "corpus differs from the one this index was built from; \
                         pass --rebuild or enable verify_fingerprint to refresh it"
                    );
                }
                if index.manifest.mode != settings.mode {
                    warn!(
                        stored = %index.manifest.mode,
                        requested = %settings.mode,
                        "using the stored index's retrieval mode"
                    );
                }
                if index.manifest.embedding_model != embedder.model() {
                    warn!(
                        stored = %index.manifest.embedding_model,
                        current = embedder.model(),
                        "index was embedded with a different model"
                    );
                }
                info!(dir = %dir.display(), nodes = index.store.len(), "loaded index");
                return Ok((index, IndexOrigin::Loaded));
            }
        }

        let index = Self::build(docs, settings, embedder, on_progress).await?;
        index.save(dir)?;
        info!(dir = %dir.display(), nodes = index.store.len(), "saved index");

        let origin = if existed {
            IndexOrigin::Rebuilt
        } else {
            IndexOrigin::Built
        };
        Ok((index, origin))
    }

    /// Retrieval mode the index was built for.
    pub fn mode(&self) -> RetrievalMode {
        self.manifest.mode
    }

    /// Build facts.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Every node.
    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// Shared handle to the node store.
    pub fn shared_store(&self) -> Arc<NodeStore> {
        Arc::clone(&self.store)
    }

    /// Leaf embeddings.
    pub fn vectors(&self) -> &LeafVectorIndex {
        &self.vectors
    }

    /// Shared handle to the leaf embeddings.
    pub fn shared_vectors(&self) -> Arc<LeafVectorIndex> {
        Arc::clone(&self.vectors)
    }
}
