//! The query engine: retrieve, merge or expand, rerank, generate.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use strata_core::{
    CompletionOptions, Embedder, Generator, Passage, RetrievalMode, Scorer, StrataConfig,
    StrataError, TextStream,
};
use strata_index::{Index, LeafVectorIndex, NodeStore};
use tracing::debug;

use crate::automerge::{to_passages, AutoMerger};
use crate::deadline::with_deadline;
use crate::prompt::build_prompt;
use crate::rerank::Reranker;
use crate::window::WindowExpander;

/// A generated answer and the passages it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    /// Generated text.
    pub answer: String,
    /// Passages placed in the prompt, best first.
    pub passages: Vec<Passage>,
}

/// A streamed answer: passages are known up front, text arrives in fragments.
pub struct StreamingAnswer {
    /// Passages placed in the prompt, best first.
    pub passages: Vec<Passage>,
    /// Answer fragments. Dropping the stream cancels generation.
    pub stream: TextStream,
}

impl std::fmt::Debug for StreamingAnswer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingAnswer")
            .field("passages", &self.passages)
            .finish_non_exhaustive()
    }
}

/// Answers queries against a built [`Index`].
///
/// How the vector hits become passages depends on the index's mode:
/// hierarchical indexes auto-merge leaves into parents, window indexes expand
/// sentences into their windows, flat indexes use the chunks as they are.
pub struct QueryEngine {
    mode: RetrievalMode,
    store: Arc<NodeStore>,
    vectors: Arc<LeafVectorIndex>,
    embedder: Arc<dyn Embedder>,
    merger: AutoMerger,
    windows: Option<WindowExpander>,
    reranker: Option<Reranker>,
    generator: Option<Arc<dyn Generator>>,
    similarity_top_k: usize,
    temperature: f32,
    deadline: Option<Duration>,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("mode", &self.mode)
            .field("similarity_top_k", &self.similarity_top_k)
            .field("merger", &self.merger)
            .field("reranker", &self.reranker)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl QueryEngine {
    /// Create an engine with default retrieval settings, no reranker and no
    /// generator.
    pub fn new(index: &Index, embedder: Arc<dyn Embedder>) -> Self {
        let defaults = StrataConfig::default();
        let mode = index.mode();
        let windows = (mode == RetrievalMode::Window).then(|| WindowExpander::new(index.store()));
        Self {
            mode,
            store: index.shared_store(),
            vectors: index.shared_vectors(),
            embedder,
            merger: AutoMerger::default(),
            windows,
            reranker: None,
            generator: None,
            similarity_top_k: defaults.retrieval.similarity_top_k,
            temperature: defaults.llm.temperature,
            deadline: None,
        }
    }

    /// Create an engine from the `[retrieval]`, `[rerank]` and `[llm]`
    /// sections.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Config`] for an invalid merge ratio.
    pub fn from_config(
        index: &Index,
        config: &StrataConfig,
        embedder: Arc<dyn Embedder>,
        scorer: Option<Arc<dyn Scorer>>,
        generator: Option<Arc<dyn Generator>>,
    ) -> Result<Self, StrataError> {
        let retrieval = &config.retrieval;
        let mut engine = Self::new(index, embedder)
            .with_merger(AutoMerger::new(
                retrieval.merge_ratio,
                retrieval.merge_aggregate,
            )?)
            .with_similarity_top_k(retrieval.similarity_top_k)
            .with_temperature(config.llm.temperature)
            .with_deadline(retrieval.timeout_secs.map(Duration::from_secs));
        if let Some(scorer) = scorer {
            engine = engine.with_reranker(
                Reranker::new(scorer, config.rerank.top_n).with_policy(config.rerank.on_error),
            );
        }
        if let Some(generator) = generator {
            engine = engine.with_generator(generator);
        }
        Ok(engine)
    }

    /// Use a different merge threshold or aggregate.
    pub fn with_merger(mut self, merger: AutoMerger) -> Self {
        self.merger = merger;
        self
    }

    /// Rerank retrieved passages before generation.
    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Generate answers with `generator`.
    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Number of leaves fetched from the vector index.
    pub fn with_similarity_top_k(mut self, k: usize) -> Self {
        self.similarity_top_k = k;
        self
    }

    /// Sampling temperature for generation.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Bound every embedding, rerank and generation call by `deadline`.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Retrieval mode of the underlying index.
    pub fn mode(&self) -> RetrievalMode {
        self.mode
    }

    /// Retrieve passages for `query`, reranked if a reranker is set.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Embedding`], [`StrataError::Merge`],
    /// [`StrataError::Rerank`] or [`StrataError::Timeout`].
    pub async fn retrieve(&self, query: &str) -> Result<Vec<Passage>, StrataError> {
        let vector = with_deadline(
            "query embedding",
            self.deadline,
            self.embedder.embed_query(query),
        )
        .await?;
        let hits = self.vectors.query_vector(&vector, self.similarity_top_k)?;

        let passages = match &self.windows {
            Some(windows) => windows.expand(&hits, &self.store)?,
            None if self.mode == RetrievalMode::Hierarchical => {
                let merged = self.merger.merge(&hits, &self.store)?;
                to_passages(&merged, &self.store)?
            }
            None => hits
                .iter()
                .map(|hit| self.store.get(&hit.id).map(|node| Passage::from_node(node, hit.score)))
                .collect::<Result<Vec<_>, _>>()?,
        };
        debug!(
            mode = %self.mode,
            hits = hits.len(),
            passages = passages.len(),
            "retrieved passages"
        );

        match &self.reranker {
            Some(reranker) => {
                with_deadline("rerank", self.deadline, reranker.rerank(query, passages)).await
            }
            None => Ok(passages),
        }
    }

    /// Retrieve and generate a complete answer.
    ///
    /// # Errors
    ///
    /// Any [`QueryEngine::retrieve`] error, [`StrataError::Config`] if no
    /// generator is set, and [`StrataError::Generation`].
    pub async fn query(&self, query: &str) -> Result<Answer, StrataError> {
        let generator = self.generator()?;
        let passages = self.retrieve(query).await?;
        let metadata = generator.metadata();
        let prompt = build_prompt(query, &passages, &metadata);
        let options = CompletionOptions::from_metadata(&metadata, self.temperature);
        debug!(
            model = %metadata.model_name,
            included = prompt.included,
            "generating answer"
        );

        let answer = with_deadline(
            "generation",
            self.deadline,
            generator.complete(&prompt.text, &options),
        )
        .await?;
        Ok(Answer {
            answer,
            passages: passages.into_iter().take(prompt.included).collect(),
        })
    }

    /// Retrieve and start a streamed answer.
    ///
    /// The deadline bounds retrieval and opening the stream, not the time
    /// spent reading it.
    ///
    /// # Errors
    ///
    /// As [`QueryEngine::query`].
    pub async fn stream_query(&self, query: &str) -> Result<StreamingAnswer, StrataError> {
        let generator = self.generator()?;
        let passages = self.retrieve(query).await?;
        let metadata = generator.metadata();
        let prompt = build_prompt(query, &passages, &metadata);
        let options = CompletionOptions::from_metadata(&metadata, self.temperature);

        let stream = with_deadline(
            "generation",
            self.deadline,
            generator.stream_complete(&prompt.text, &options),
        )
        .await?;
        Ok(StreamingAnswer {
            passages: passages.into_iter().take(prompt.included).collect(),
            stream,
        })
    }

    fn generator(&self) -> Result<&Arc<dyn Generator>, StrataError> {
        self.generator
            .as_ref()
            .ok_or_else(|| StrataError::Config("no generator configured for this engine".into()))
    }
}
