use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StrataError;
use crate::types::RetrievalMode;

/// Top-level configuration loaded from `.strata.toml`.
///
/// Supports layered resolution: CLI flags > env vars > local config > defaults.
/// Every section and field is optional.
///
/// # Examples
///
/// ```
/// use strata_core::StrataConfig;
///
/// let config = StrataConfig::default();
/// assert_eq!(config.chunking.chunk_sizes, vec![2048, 512, 128]);
/// assert_eq!(config.retrieval.similarity_top_k, 12);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataConfig {
    /// How documents are cut into nodes.
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// How nodes are retrieved and merged.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Second-stage scoring.
    #[serde(default)]
    pub rerank: RerankConfig,
    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Generation provider settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Where the index is persisted.
    #[serde(default)]
    pub index: IndexConfig,
}

impl StrataConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Io`] if the file cannot be read, or
    /// [`StrataError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use strata_core::StrataConfig;
    /// use std::path::Path;
    ///
    /// let config = StrataConfig::from_file(Path::new(".strata.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, StrataError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_core::StrataConfig;
    ///
    /// let toml = r#"
    /// [retrieval]
    /// similarity_top_k = 6
    /// "#;
    /// let config = StrataConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.retrieval.similarity_top_k, 6);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, StrataError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), StrataError> {
        let sizes = &self.chunking.chunk_sizes;
        if sizes.is_empty() {
            return Err(StrataError::Config(
                "chunking.chunk_sizes must not be empty".into(),
            ));
        }
        if sizes.contains(&0) {
            return Err(StrataError::Config(
                "chunking.chunk_sizes must not contain 0".into(),
            ));
        }
        if sizes.windows(2).any(|w| w[0] <= w[1]) {
            return Err(StrataError::Config(format!(
                "chunking.chunk_sizes must be strictly descending, got {sizes:?}"
            )));
        }
        if self.chunking.chunk_size == 0 {
            return Err(StrataError::Config("chunking.chunk_size must be > 0".into()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(StrataError::Config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        let ratio = self.retrieval.merge_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(StrataError::Config(format!(
                "retrieval.merge_ratio must be in (0, 1], got {ratio}"
            )));
        }
        if self.retrieval.similarity_top_k == 0 {
            return Err(StrataError::Config(
                "retrieval.similarity_top_k must be > 0".into(),
            ));
        }
        if self.rerank.top_n == 0 {
            return Err(StrataError::Config("rerank.top_n must be > 0".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(StrataError::Config(
                "embedding.batch_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Unit in which chunk sizes are measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    /// Unicode scalar values.
    #[default]
    Chars,
    /// Approximate tokens (4 chars per token).
    Tokens,
}

/// Chunking configuration.
///
/// # Examples
///
/// ```
/// use strata_core::{ChunkingConfig, SizeUnit};
///
/// let config = ChunkingConfig::default();
/// assert_eq!(config.unit, SizeUnit::Chars);
/// assert_eq!(config.window_size, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Strictly descending tier sizes for hierarchical mode.
    #[serde(default = "default_chunk_sizes")]
    pub chunk_sizes: Vec<usize>,
    /// Unit the sizes are measured in.
    #[serde(default)]
    pub unit: SizeUnit,
    /// Chunk size for flat mode.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overlap between successive flat-mode chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Sentences on each side of a window-mode sentence.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

fn default_chunk_sizes() -> Vec<usize> {
    vec![2048, 512, 128]
}

fn default_chunk_size() -> usize {
    1024
}

fn default_chunk_overlap() -> usize {
    20
}

fn default_window_size() -> usize {
    3
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_sizes: default_chunk_sizes(),
            unit: SizeUnit::default(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            window_size: default_window_size(),
        }
    }
}

/// How the scores of merged children combine into the parent's score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreAggregate {
    /// Highest child score.
    #[default]
    Max,
    /// Arithmetic mean of child scores.
    Mean,
}

impl fmt::Display for ScoreAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreAggregate::Max => write!(f, "max"),
            ScoreAggregate::Mean => write!(f, "mean"),
        }
    }
}

impl FromStr for ScoreAggregate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "max" => Ok(ScoreAggregate::Max),
            "mean" | "avg" => Ok(ScoreAggregate::Mean),
            other => Err(format!("unknown score aggregate: {other}")),
        }
    }
}

/// Retrieval configuration.
///
/// # Examples
///
/// ```
/// use strata_core::{RetrievalConfig, RetrievalMode, ScoreAggregate};
///
/// let config = RetrievalConfig::default();
/// assert_eq!(config.mode, RetrievalMode::Hierarchical);
/// assert_eq!(config.merge_ratio, 0.5);
/// assert_eq!(config.merge_aggregate, ScoreAggregate::Max);
/// assert!(config.timeout_secs.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Index organisation and query strategy.
    #[serde(default)]
    pub mode: RetrievalMode,
    /// Leaves fetched from the vector index per query.
    #[serde(default = "default_similarity_top_k")]
    pub similarity_top_k: usize,
    /// Fraction of a parent's children that must be present to merge.
    #[serde(default = "default_merge_ratio")]
    pub merge_ratio: f64,
    /// How merged scores combine.
    #[serde(default)]
    pub merge_aggregate: ScoreAggregate,
    /// Deadline applied to each external call made while answering a query.
    pub timeout_secs: Option<u64>,
}

fn default_similarity_top_k() -> usize {
    12
}

fn default_merge_ratio() -> f64 {
    0.5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::default(),
            similarity_top_k: default_similarity_top_k(),
            merge_ratio: default_merge_ratio(),
            merge_aggregate: ScoreAggregate::default(),
            timeout_secs: None,
        }
    }
}

/// What the reranker does when scoring a passage fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RerankFailurePolicy {
    /// Abort the whole rerank with an error.
    #[default]
    Fail,
    /// Keep the passage with a score of 0.
    PassThrough,
}

/// Reranking configuration.
///
/// # Examples
///
/// ```
/// use strata_core::{RerankConfig, RerankFailurePolicy};
///
/// let config = RerankConfig::default();
/// assert_eq!(config.provider, "lexical");
/// assert_eq!(config.top_n, 2);
/// assert_eq!(config.on_error, RerankFailurePolicy::Fail);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    /// `"http"`, `"lexical"`, or `"none"`.
    #[serde(default = "default_rerank_provider")]
    pub provider: String,
    /// Cross-encoder model name sent to the HTTP provider.
    #[serde(default = "default_rerank_model")]
    pub model: String,
    /// API key for the HTTP provider.
    pub api_key: Option<String>,
    /// Base URL of the HTTP provider.
    pub base_url: Option<String>,
    /// Passages kept after reranking.
    #[serde(default = "default_rerank_top_n")]
    pub top_n: usize,
    /// Failure policy.
    #[serde(default)]
    pub on_error: RerankFailurePolicy,
}

fn default_rerank_provider() -> String {
    "lexical".into()
}

fn default_rerank_model() -> String {
    "bge-reranker-base".into()
}

fn default_rerank_top_n() -> usize {
    2
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: default_rerank_provider(),
            model: default_rerank_model(),
            api_key: None,
            base_url: None,
            top_n: default_rerank_top_n(),
            on_error: RerankFailurePolicy::default(),
        }
    }
}

/// Embedding provider configuration.
///
/// # Examples
///
/// ```
/// use strata_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.provider, "openai");
/// assert_eq!(config.model, "text-embedding-3-small");
/// assert_eq!(config.dimensions, 1536);
/// assert_eq!(config.batch_size, 64);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// `"openai"` (any OpenAI-compatible endpoint) or `"hashing"` (offline).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Base URL of the provider.
    pub base_url: Option<String>,
    /// Model name.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Vector dimensions (used by the hashing provider and for validation).
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    /// Texts per embedding request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_embedding_provider() -> String {
    "openai".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_embedding_dimensions() -> usize {
    1536
}

fn default_batch_size() -> usize {
    64
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            base_url: None,
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            batch_size: default_batch_size(),
        }
    }
}

/// Generation provider configuration.
///
/// # Examples
///
/// ```
/// use strata_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.model, "gpt-4o-mini");
/// assert_eq!(config.context_window, 8192);
/// assert_eq!(config.max_output_tokens, 256);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name (any OpenAI-compatible endpoint).
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    /// Model identifier.
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Custom base URL for API requests.
    pub base_url: Option<String>,
    /// Model context window in tokens.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Maximum tokens generated per answer.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: usize,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_llm_provider() -> String {
    "openai".into()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}

fn default_context_window() -> usize {
    8192
}

fn default_max_output_tokens() -> usize {
    256
}

fn default_temperature() -> f32 {
    0.1
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: None,
            base_url: None,
            context_window: default_context_window(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Index persistence configuration.
///
/// # Examples
///
/// ```
/// use strata_core::IndexConfig;
///
/// let config = IndexConfig::default();
/// assert_eq!(config.storage_dir.to_str(), Some("merge_index"));
/// assert!(!config.verify_fingerprint);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory the index is saved to and loaded from.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// Rebuild when the corpus fingerprint differs from the stored one.
    #[serde(default)]
    pub verify_fingerprint: bool,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("merge_index")
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            verify_fingerprint: false,
        }
    }
}
