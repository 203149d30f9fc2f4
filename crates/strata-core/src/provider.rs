//! Traits for the external model collaborators.
//!
//! The engine never talks to a model directly: embedding, cross-encoder
//! scoring and generation are reached through [`Embedder`], [`Scorer`] and
//! [`Generator`]. Concrete HTTP and offline implementations live in
//! `strata-models`; tests supply their own.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::StrataError;

/// Text → vector model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in the index manifest.
    fn model(&self) -> &str;

    /// Embed a batch of documents. Returns one vector per text, in order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StrataError>;

    /// Embed a single query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, StrataError>;
}

/// (query, passage) → relevance model. Higher is more relevant.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Score one passage against the query.
    async fn score(&self, query: &str, passage: &str) -> Result<f32, StrataError>;

    /// Score several passages. One result per passage, in order.
    ///
    /// The default implementation calls [`Scorer::score`] sequentially.
    async fn score_batch(&self, query: &str, passages: &[String]) -> Vec<Result<f32, StrataError>> {
        let mut scores = Vec::with_capacity(passages.len());
        for passage in passages {
            scores.push(self.score(query, passage).await);
        }
        scores
    }
}

/// Incremental text fragments of a streamed completion. Dropping the stream
/// cancels the underlying request.
pub type TextStream = BoxStream<'static, Result<String, StrataError>>;

/// Static facts about a generative model, queryable without making a call.
///
/// # Examples
///
/// ```
/// use strata_core::ModelMetadata;
///
/// let meta = ModelMetadata {
///     model_name: "gpt-4o-mini".into(),
///     context_window: 8192,
///     num_output: 256,
/// };
/// assert_eq!(meta.prompt_budget(), 7936);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    /// Model identifier.
    pub model_name: String,
    /// Context window in tokens.
    pub context_window: usize,
    /// Maximum tokens produced per completion.
    pub num_output: usize,
}

impl ModelMetadata {
    /// Tokens left for the prompt once the output is reserved.
    pub fn prompt_budget(&self) -> usize {
        self.context_window.saturating_sub(self.num_output)
    }
}

/// Per-call generation options.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    /// Maximum tokens to generate.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Context window the prompt was budgeted against.
    pub context_window: usize,
}

impl CompletionOptions {
    /// Options that use the model's full output allowance.
    pub fn from_metadata(metadata: &ModelMetadata, temperature: f32) -> Self {
        Self {
            max_tokens: metadata.num_output,
            temperature,
            context_window: metadata.context_window,
        }
    }
}

/// Prompt → completion model.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model facts (name, context window, max output).
    fn metadata(&self) -> ModelMetadata;

    /// Generate a full completion.
    async fn complete(&self, prompt: &str, options: &CompletionOptions)
        -> Result<String, StrataError>;

    /// Generate a completion as a stream of fragments.
    ///
    /// The default implementation completes the prompt and yields the answer
    /// word by word (whitespace kept attached to the preceding word).
    async fn stream_complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<TextStream, StrataError> {
        let text = self.complete(prompt, options).await?;
        Ok(word_fragments(&text))
    }
}

/// Split text into word fragments whose concatenation is the original text.
///
/// # Examples
///
/// ```
/// use futures_util::StreamExt;
/// use strata_core::provider::word_fragments;
///
/// # tokio_test_block(async {
/// let parts: Vec<String> = word_fragments("Hello big world")
///     .map(|r| r.unwrap())
///     .collect()
///     .await;
/// assert_eq!(parts, vec!["Hello ", "big ", "world"]);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     futures_util::FutureExt::now_or_never(f).unwrap();
/// # }
/// ```
pub fn word_fragments(text: &str) -> TextStream {
    let fragments: Vec<Result<String, StrataError>> = text
        .split_inclusive(char::is_whitespace)
        .map(|s| Ok(s.to_string()))
        .collect();
    stream::iter(fragments).boxed()
}
