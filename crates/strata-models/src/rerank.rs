//! Cross-encoder style relevance scorers.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strata_core::{RerankConfig, Scorer, StrataError};
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

const DEFAULT_BASE_URL: &str = "https://api.cohere.com/v1";
const API_KEY_ENV: &str = "STRATA_RERANK_API_KEY";

/// Client for a `/rerank` endpoint (Cohere, Jina, TEI and compatible).
///
/// Request `{model, query, documents}`, response
/// `{results: [{index, relevance_score}]}`.
pub struct RerankClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for RerankClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RerankClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

impl RerankClient {
    /// Create a client from the `[rerank]` config section.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Config`] if no API key is available for the
    /// default endpoint, or [`StrataError::Rerank`] if the HTTP client
    /// cannot be built.
    pub fn with_config(config: &RerankConfig) -> Result<Self, StrataError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok());
        if api_key.is_none() && config.base_url.is_none() {
            return Err(StrataError::Config(format!(
                "rerank API key not found: set rerank.api_key in .strata.toml or {API_KEY_ENV}, \
                 or use provider = \"lexical\""
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| StrataError::Rerank(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
        })
    }

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankResult>, StrataError> {
        let request = RerankRequest {
            model: &self.model,
            query,
            documents,
        };

        let mut builder = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| StrataError::Rerank(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StrataError::Rerank(format!(
                "rerank API returned {status}: {body}"
            )));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| StrataError::Rerank(format!("failed to parse response: {e}")))?;
        debug!(documents = documents.len(), model = %self.model, "reranked batch");
        Ok(parsed.results)
    }
}

/// Map `{index, score}` results back onto the input order.
fn scatter(results: Vec<RerankResult>, len: usize) -> Vec<Result<f32, StrataError>> {
    let mut scores: Vec<Option<f32>> = vec![None; len];
    for result in results {
        if let Some(slot) = scores.get_mut(result.index) {
            *slot = Some(result.relevance_score);
        }
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| StrataError::Rerank(format!("no score returned for passage {i}"))))
        .collect()
}

#[async_trait]
impl Scorer for RerankClient {
    async fn score(&self, query: &str, passage: &str) -> Result<f32, StrataError> {
        let documents = [passage.to_string()];
        let results = self.rerank(query, &documents).await?;
        scatter(results, 1)
            .into_iter()
            .next()
            .unwrap_or_else(|| Err(StrataError::Rerank("empty rerank response".into())))
    }

    async fn score_batch(&self, query: &str, passages: &[String]) -> Vec<Result<f32, StrataError>> {
        if passages.is_empty() {
            return Vec::new();
        }
        match self.rerank(query, passages).await {
            Ok(results) => scatter(results, passages.len()),
            Err(e) => {
                let reason = e.to_string();
                passages
                    .iter()
                    .map(|_| Err(StrataError::Rerank(reason.clone())))
                    .collect()
            }
        }
    }
}

/// Offline scorer based on query-term overlap.
///
/// The score is the fraction of distinct query terms found in the passage,
/// plus a small density bonus so shorter passages with the same coverage
/// rank higher.
///
/// # Examples
///
/// ```
/// use strata_models::LexicalScorer;
///
/// let scorer = LexicalScorer::new();
/// let high = scorer.score_text("when was xai founded", "xAI was founded in 2023.");
/// let low = scorer.score_text("when was xai founded", "Tesla builds cars.");
/// assert!(high > low);
/// ```
#[derive(Debug, Clone, Default)]
pub struct LexicalScorer;

impl LexicalScorer {
    /// Create a scorer.
    pub fn new() -> Self {
        Self
    }

    /// Score synchronously.
    pub fn score_text(&self, query: &str, passage: &str) -> f32 {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return 0.0;
        }
        let passage_words: Vec<String> = passage.unicode_words().map(str::to_lowercase).collect();
        if passage_words.is_empty() {
            return 0.0;
        }
        let passage_terms: HashSet<&str> = passage_words.iter().map(String::as_str).collect();

        let matched = query_terms
            .iter()
            .filter(|t| passage_terms.contains(t.as_str()))
            .count();
        let hits = passage_words
            .iter()
            .filter(|w| query_terms.contains(w.as_str()))
            .count();

        let coverage = matched as f32 / query_terms.len() as f32;
        let density = hits as f32 / (passage_words.len() as f32).sqrt();
        coverage + 0.1 * density
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

#[async_trait]
impl Scorer for LexicalScorer {
    async fn score(&self, query: &str, passage: &str) -> Result<f32, StrataError> {
        Ok(self.score_text(query, passage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_format_is_correct() {
        let docs = vec!["a".to_string(), "b".to_string()];
        let request = RerankRequest {
            model: "bge-reranker-base",
            query: "q",
            documents: &docs,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "bge-reranker-base");
        assert_eq!(json["query"], "q");
        assert_eq!(json["documents"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn scatter_restores_input_order() {
        let json = r#"{"results": [
            {"index": 1, "relevance_score": 0.9},
            {"index": 0, "relevance_score": 0.2}
        ]}"#;
        let response: RerankResponse = serde_json::from_str(json).unwrap();
        let scores = scatter(response.results, 3);
        assert_eq!(*scores[0].as_ref().unwrap(), 0.2);
        assert_eq!(*scores[1].as_ref().unwrap(), 0.9);
        assert!(scores[2].is_err());
    }

    #[test]
    fn lexical_prefers_covering_passage() {
        let scorer = LexicalScorer::new();
        let query = "Who founded the company xAI";
        let a = scorer.score_text(query, "Elon Musk founded xAI in 2023.");
        let b = scorer.score_text(query, "The weather was mild.");
        assert!(a > b);
        assert_eq!(scorer.score_text("", "anything"), 0.0);
        assert_eq!(scorer.score_text("query", ""), 0.0);
    }

    #[test]
    fn lexical_is_case_insensitive() {
        let scorer = LexicalScorer::new();
        assert_eq!(
            scorer.score_text("GROK model", "grok Model"),
            scorer.score_text("grok model", "GROK MODEL")
        );
    }

    #[tokio::test]
    async fn lexical_batch_scores_every_passage() {
        let scorer = LexicalScorer::new();
        let passages = vec!["alpha".to_string(), "beta".to_string()];
        let scores = scorer.score_batch("alpha", &passages).await;
        assert_eq!(scores.len(), 2);
        assert!(scores[0].as_ref().unwrap() > scores[1].as_ref().unwrap());
    }

    #[test]
    fn missing_key_without_base_url_is_config_error() {
        if std::env::var(API_KEY_ENV).is_ok() {
            return;
        }
        let config = RerankConfig {
            provider: "cohere".into(),
            ..RerankConfig::default()
        };
        assert!(matches!(
            RerankClient::with_config(&config),
            Err(StrataError::Config(_))
        ));
    }
}
