//! Model collaborators for Strata: embedding, reranking and generation.
//!
//! HTTP clients speak the OpenAI-compatible (and Cohere-style `/rerank`)
//! wire formats. [`HashingEmbedder`] and [`LexicalScorer`] run offline.

pub mod embedding;
pub mod llm;
pub mod rerank;

use std::sync::Arc;

use strata_core::{
    Embedder, EmbeddingConfig, Generator, LlmConfig, RerankConfig, Scorer, StrataError,
};

pub use embedding::{EmbeddingClient, HashingEmbedder};
pub use llm::LlmClient;
pub use rerank::{LexicalScorer, RerankClient};

/// Build the embedder named by `embedding.provider`.
///
/// | provider   | implementation        |
/// |------------|-----------------------|
/// | `openai`   | [`EmbeddingClient`]   |
/// | `hashing`  | [`HashingEmbedder`]   |
///
/// # Errors
///
/// Returns [`StrataError::Config`] for an unknown provider or a missing key.
///
/// # Examples
///
/// ```
/// use strata_core::EmbeddingConfig;
/// use strata_models::embedder_from_config;
///
/// let config = EmbeddingConfig {
///     provider: "hashing".into(),
///     dimensions: 128,
///     ..EmbeddingConfig::default()
/// };
/// let embedder = embedder_from_config(&config).unwrap();
/// assert_eq!(embedder.model(), "hashing-128");
/// ```
pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, StrataError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(EmbeddingClient::with_config(config)?)),
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dimensions))),
        other => Err(StrataError::Config(format!(
            "unknown embedding provider '{other}' (expected openai or hashing)"
        ))),
    }
}

/// Build the reranker named by `rerank.provider`, or `None` for `none`.
///
/// | provider                    | implementation       |
/// |-----------------------------|----------------------|
/// | `lexical`                   | [`LexicalScorer`]    |
/// | `cohere`, `jina`, `http`    | [`RerankClient`]     |
/// | `none`                      | no reranking         |
///
/// # Errors
///
/// Returns [`StrataError::Config`] for an unknown provider or a missing key.
pub fn scorer_from_config(config: &RerankConfig) -> Result<Option<Arc<dyn Scorer>>, StrataError> {
    match config.provider.as_str() {
        "none" => Ok(None),
        "lexical" => Ok(Some(Arc::new(LexicalScorer::new()))),
        "cohere" | "jina" | "http" => Ok(Some(Arc::new(RerankClient::with_config(config)?))),
        other => Err(StrataError::Config(format!(
            "unknown rerank provider '{other}' (expected lexical, cohere, jina, http or none)"
        ))),
    }
}

/// Build the generator named by `llm.provider`.
///
/// `openai`, `ollama`, `vllm` and `compatible` all select [`LlmClient`];
/// they differ only in the `base_url` the user configures.
///
/// # Errors
///
/// Returns [`StrataError::Config`] for an unknown provider.
pub fn generator_from_config(config: &LlmConfig) -> Result<Arc<dyn Generator>, StrataError> {
    match config.provider.as_str() {
        "openai" | "ollama" | "vllm" | "compatible" => Ok(Arc::new(LlmClient::new(config)?)),
        other => Err(StrataError::Config(format!(
            "unknown LLM provider '{other}' (expected openai, ollama, vllm or compatible)"
        ))),
    }
}
