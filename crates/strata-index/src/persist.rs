//! On-disk layout of a built index.
//!
//! ```text
//! <storage_dir>/
//!   docstore.json   every node with its links
//!   vectors.db      SQLite: `metadata` (manifest) + `vectors` (leaf BLOBs)
//! ```
//!
//! Both files are written to a temporary name and renamed into place.
//! Loading re-checks every link and vector invariant; any violation is
//! reported as [`StrataError::CorruptIndex`].

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_core::{NodeId, RetrievalMode, SizeUnit, StrataError};
use tracing::debug;

use crate::docstore::NodeStore;
use crate::vector::LeafVectorIndex;

/// Node store file name.
pub const DOCSTORE_FILE: &str = "docstore.json";
/// Vector database file name.
pub const VECTORS_FILE: &str = "vectors.db";

/// Facts about how an index was built.
///
/// Stored one field per row in the `metadata` table, values JSON-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Retrieval mode the nodes were cut for.
    pub mode: RetrievalMode,
    /// Tier sizes (hierarchical mode).
    pub chunk_sizes: Vec<usize>,
    /// Unit the sizes are measured in.
    pub unit: SizeUnit,
    /// Chunk size (flat mode).
    pub chunk_size: usize,
    /// Chunk overlap (flat mode).
    pub chunk_overlap: usize,
    /// Sentences per window side (window mode).
    pub window_size: usize,
    /// Embedding model used for the leaves.
    pub embedding_model: String,
    /// Embedding dimensionality.
    pub dimensions: usize,
    /// SHA-256 over the document ids and texts.
    pub fingerprint: String,
    /// Build time.
    pub built_at: DateTime<Utc>,
    /// Total node count.
    pub node_count: usize,
    /// Leaf (embedded) node count.
    pub leaf_count: usize,
}

/// Write the store, vectors and manifest to `dir`, creating it if needed.
///
/// # Errors
///
/// Returns [`StrataError::Io`] for filesystem failures and
/// [`StrataError::Database`] for SQLite failures.
pub fn save(
    dir: &Path,
    store: &NodeStore,
    vectors: &LeafVectorIndex,
    manifest: &Manifest,
) -> Result<(), StrataError> {
    fs::create_dir_all(dir)?;

    let docstore_tmp = dir.join(format!("{DOCSTORE_FILE}.tmp"));
    fs::write(&docstore_tmp, store.to_json()?)?;
    fs::rename(&docstore_tmp, dir.join(DOCSTORE_FILE))?;

    let vectors_tmp = dir.join(format!("{VECTORS_FILE}.tmp"));
    if vectors_tmp.exists() {
        fs::remove_file(&vectors_tmp)?;
    }
    write_vectors(&vectors_tmp, vectors, manifest)?;
    fs::rename(&vectors_tmp, dir.join(VECTORS_FILE))?;

    debug!(dir = %dir.display(), nodes = store.len(), "saved index");
    Ok(())
}

/// Read an index back from `dir`.
///
/// # Errors
///
/// Returns [`StrataError::CorruptIndex`] if a file is missing, unreadable or
/// malformed, if node links are inconsistent, if a vector belongs to an
/// unknown or non-leaf node, if a leaf has no vector, or if dimensions
/// disagree.
pub fn load(dir: &Path) -> Result<(NodeStore, LeafVectorIndex, Manifest), StrataError> {
    let docstore_path = dir.join(DOCSTORE_FILE);
    let vectors_path = dir.join(VECTORS_FILE);

    if !docstore_path.is_file() {
        return Err(corrupt(dir, format!("{DOCSTORE_FILE} is missing")));
    }
    if !vectors_path.is_file() {
        return Err(corrupt(dir, format!("{VECTORS_FILE} is missing")));
    }

    let json = fs::read_to_string(&docstore_path)
        .map_err(|e| corrupt(&docstore_path, format!("unreadable: {e}")))?;
    let store = NodeStore::from_json(&json).map_err(|e| corrupt(&docstore_path, e.to_string()))?;
    store
        .validate()
        .map_err(|e| corrupt(&docstore_path, e.to_string()))?;

    let (manifest, rows) = read_vectors(&vectors_path)?;

    let mut seen = HashSet::new();
    for (id, vector) in &rows {
        let node = store
            .lookup(id)
            .ok_or_else(|| corrupt(&vectors_path, format!("vector for unknown node {id}")))?;
        if !node.is_leaf() {
            return Err(corrupt(&vectors_path, format!("vector for non-leaf node {id}")));
        }
        if vector.len() != manifest.dimensions {
            return Err(corrupt(
                &vectors_path,
                format!(
                    "vector for {id} has {} dimensions, manifest says {}",
                    vector.len(),
                    manifest.dimensions
                ),
            ));
        }
        seen.insert(id.clone());
    }
    if let Some(leaf) = store.leaves().find(|n| !seen.contains(&n.id)) {
        return Err(corrupt(&vectors_path, format!("leaf {} has no vector", leaf.id)));
    }

    let (ids, vecs): (Vec<NodeId>, Vec<Vec<f32>>) = rows.into_iter().unzip();
    let vectors =
        LeafVectorIndex::from_parts(ids, vecs).map_err(|e| corrupt(&vectors_path, e.to_string()))?;

    debug!(dir = %dir.display(), nodes = store.len(), leaves = vectors.len(), "loaded index");
    Ok((store, vectors, manifest))
}

fn write_vectors(
    path: &Path,
    vectors: &LeafVectorIndex,
    manifest: &Manifest,
) -> Result<(), StrataError> {
    let mut conn = Connection::open(path)
        .map_err(|e| StrataError::Database(format!("failed to open database: {e}")))?;

    conn.execute_batch(
        "
        CREATE TABLE metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE vectors (
            position INTEGER PRIMARY KEY,
            node_id TEXT NOT NULL UNIQUE,
            embedding BLOB NOT NULL
        );
        ",
    )
    .map_err(|e| StrataError::Database(format!("failed to create schema: {e}")))?;

    let tx = conn
        .transaction()
        .map_err(|e| StrataError::Database(format!("failed to begin transaction: {e}")))?;

    if let Value::Object(fields) = serde_json::to_value(manifest)? {
        for (key, value) in fields {
            tx.execute(
                "INSERT INTO metadata (key, value) VALUES (?1, ?2)",
                params![key, value.to_string()],
            )
            .map_err(|e| StrataError::Database(format!("failed to set metadata '{key}': {e}")))?;
        }
    }

    for (position, (id, vector)) in vectors.iter().enumerate() {
        tx.execute(
            "INSERT INTO vectors (position, node_id, embedding) VALUES (?1, ?2, ?3)",
            params![position as i64, id.as_str(), floats_to_bytes(vector)],
        )
        .map_err(|e| StrataError::Database(format!("failed to insert vector: {e}")))?;
    }

    tx.commit()
        .map_err(|e| StrataError::Database(format!("failed to commit vectors: {e}")))?;
    Ok(())
}

type VectorRows = Vec<(NodeId, Vec<f32>)>;

fn read_vectors(path: &Path) -> Result<(Manifest, VectorRows), StrataError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| corrupt(path, format!("cannot open: {e}")))?;

    let mut fields = serde_json::Map::new();
    {
        let mut stmt = conn
            .prepare("SELECT key, value FROM metadata")
            .map_err(|e| corrupt(path, format!("metadata table unreadable: {e}")))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| corrupt(path, format!("metadata table unreadable: {e}")))?;
        for row in rows {
            let (key, value) = row.map_err(|e| corrupt(path, format!("bad metadata row: {e}")))?;
            let value: Value = serde_json::from_str(&value)
                .map_err(|e| corrupt(path, format!("bad metadata value for '{key}': {e}")))?;
            fields.insert(key, value);
        }
    }
    let manifest: Manifest = serde_json::from_value(Value::Object(fields))
        .map_err(|e| corrupt(path, format!("bad manifest: {e}")))?;

    let mut stmt = conn
        .prepare("SELECT node_id, embedding FROM vectors ORDER BY position")
        .map_err(|e| corrupt(path, format!("vectors table unreadable: {e}")))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)))
        .map_err(|e| corrupt(path, format!("vectors table unreadable: {e}")))?;

    let mut out = Vec::new();
    for row in rows {
        let (id, bytes) = row.map_err(|e| corrupt(path, format!("bad vector row: {e}")))?;
        if bytes.len() % 4 != 0 {
            return Err(corrupt(
                path,
                format!("vector for {id} is {} bytes, not a multiple of 4", bytes.len()),
            ));
        }
        out.push((NodeId::new(id), bytes_to_floats(&bytes)));
    }

    Ok((manifest, out))
}

fn corrupt(path: &Path, reason: impl Into<String>) -> StrataError {
    StrataError::CorruptIndex {
        path: PathBuf::from(path),
        reason: reason.into(),
    }
}

fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    floats.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
