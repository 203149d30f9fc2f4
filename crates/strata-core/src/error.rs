use std::path::PathBuf;
use std::time::Duration;

use crate::types::NodeId;

/// Errors that can occur anywhere in the retrieval engine.
///
/// Each variant wraps a specific failure domain. Library crates use this type
/// directly; the binary crate renders it through `miette` at the boundary.
///
/// # Examples
///
/// ```
/// use strata_core::StrataError;
///
/// let err = StrataError::Chunking("document is empty".into());
/// assert!(err.to_string().contains("document is empty"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum StrataError {
    /// Malformed chunk-size configuration or empty input.
    #[error("chunking error: {0}")]
    #[diagnostic(
        code(strata::chunking),
        help("chunk sizes must be non-zero and strictly descending, e.g. [2048, 512, 128]")
    )]
    Chunking(String),

    /// A node id collided with a different node already in the store.
    #[error("duplicate node id {id} with different content")]
    #[diagnostic(code(strata::store::duplicate_id))]
    DuplicateId {
        /// The colliding id.
        id: NodeId,
    },

    /// A node id could not be resolved in the store.
    #[error("node not found: {id}")]
    #[diagnostic(code(strata::store::not_found))]
    NotFound {
        /// The missing id.
        id: NodeId,
    },

    /// The embedding collaborator failed.
    #[error("embedding error: {0}")]
    #[diagnostic(code(strata::embedding))]
    Embedding(String),

    /// The reranking collaborator failed.
    #[error("rerank error: {0}")]
    #[diagnostic(code(strata::rerank))]
    Rerank(String),

    /// The generation collaborator failed.
    #[error("generation error: {0}")]
    #[diagnostic(code(strata::generation))]
    Generation(String),

    /// The node store is internally inconsistent during merging. Always a bug.
    #[error("merge error at node {id}: {reason}")]
    #[diagnostic(
        code(strata::merge),
        help("the index links are inconsistent; rebuild the index with --rebuild")
    )]
    Merge {
        /// Node whose link could not be followed.
        id: NodeId,
        /// What went wrong.
        reason: String,
    },

    /// A persisted index could not be loaded.
    #[error("corrupt index at {}: {reason}", .path.display())]
    #[diagnostic(
        code(strata::corrupt_index),
        help("delete the storage directory or pass --rebuild to rebuild the index")
    )]
    CorruptIndex {
        /// Storage directory or file that failed.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// An external call exceeded the caller-supplied deadline.
    #[error("{operation} timed out after {after:?}")]
    #[diagnostic(code(strata::timeout))]
    Timeout {
        /// The collaborator call that was aborted.
        operation: String,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(code(strata::config))]
    Config(String),

    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    #[diagnostic(code(strata::io))]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    #[diagnostic(code(strata::serialization))]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    #[diagnostic(code(strata::toml))]
    Toml(#[from] toml::de::Error),

    /// SQLite failure in the vector store.
    #[error("database error: {0}")]
    #[diagnostic(code(strata::database))]
    Database(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: StrataError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn chunking_error_displays_message() {
        let err = StrataError::Chunking("bad sizes".into());
        assert_eq!(err.to_string(), "chunking error: bad sizes");
    }

    #[test]
    fn corrupt_index_shows_path() {
        let err = StrataError::CorruptIndex {
            path: PathBuf::from("/tmp/merge_index"),
            reason: "docstore.json missing".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/merge_index"));
        assert!(msg.contains("docstore.json missing"));
    }

    #[test]
    fn timeout_names_operation() {
        let err = StrataError::Timeout {
            operation: "rerank".into(),
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "rerank timed out after 250ms");
    }

    #[test]
    fn not_found_names_id() {
        let err = StrataError::NotFound {
            id: NodeId::new("abc123"),
        };
        assert_eq!(err.to_string(), "node not found: abc123");
    }
}
