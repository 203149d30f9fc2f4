//! Embedding models.
//!
//! [`EmbeddingClient`] talks to any OpenAI-compatible `/embeddings` endpoint.
//! [`HashingEmbedder`] needs no network: it hashes word tokens into a fixed
//! number of buckets, which is enough for lexical-overlap retrieval in tests
//! and air-gapped runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strata_core::{Embedder, EmbeddingConfig, StrataError};
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Client for an OpenAI-compatible embeddings API.
///
/// # Examples
///
/// ```
/// use strata_models::EmbeddingClient;
///
/// let client = EmbeddingClient::new("sk-test");
/// assert_eq!(strata_core::Embedder::model(&client), "text-embedding-3-small");
/// ```
pub struct EmbeddingClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    dimensions: Option<usize>,
}

impl std::fmt::Debug for EmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDataItem>,
}

#[derive(Deserialize)]
struct EmbedDataItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    /// Create a client for the default endpoint and model.
    pub fn new(api_key: &str) -> Self {
        let defaults = EmbeddingConfig::default();
        Self {
            client: reqwest::Client::new(),
            api_key: Some(api_key.to_string()),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: defaults.model,
            dimensions: None,
        }
    }

    /// Create a client from the `[embedding]` config section.
    ///
    /// The API key comes from `embedding.api_key` or `OPENAI_API_KEY`. A key
    /// may be omitted only when a custom `base_url` is set (local servers).
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Config`] if no API key is available for the
    /// default endpoint.
    pub fn with_config(config: &EmbeddingConfig) -> Result<Self, StrataError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok());
        if api_key.is_none() && config.base_url.is_none() {
            return Err(StrataError::Config(format!(
                "embedding API key not found: set embedding.api_key in .strata.toml or {API_KEY_ENV}, \
                 or use provider = \"hashing\" for offline runs"
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            dimensions: Some(config.dimensions),
        })
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>, StrataError> {
        let request = EmbedRequest {
            model: &self.model,
            input,
            dimensions: self.dimensions,
        };

        let mut builder = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| StrataError::Embedding(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(StrataError::Embedding(format!(
                "embeddings API returned {status}: {body}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| StrataError::Embedding(format!("failed to parse response: {e}")))?;

        debug!(inputs = input.len(), model = %self.model, "embedded batch");
        Ok(order_by_index(parsed.data))
    }
}

/// Servers may return items out of order; sort by the reported index when
/// every item has one.
fn order_by_index(mut data: Vec<EmbedDataItem>) -> Vec<Vec<f32>> {
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }
    data.into_iter().map(|d| d.embedding).collect()
}

#[async_trait]
impl Embedder for EmbeddingClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StrataError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, StrataError> {
        self.request(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StrataError::Embedding("empty response from embeddings API".into()))
    }
}

/// Offline embedder using signed feature hashing of lowercase word tokens.
///
/// Vectors are L2-normalised, so cosine similarity reflects shared
/// vocabulary.
///
/// # Examples
///
/// ```
/// use strata_models::HashingEmbedder;
///
/// let embedder = HashingEmbedder::new(64);
/// let a = embedder.embed_text("Musk founded xAI");
/// let b = embedder.embed_text("musk FOUNDED xai");
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model: String,
}

impl HashingEmbedder {
    /// Create an embedder producing `dimensions`-long vectors (at least 1).
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model: format!("hashing-{dimensions}"),
        }
    }

    /// Embed one text synchronously.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text.unicode_words() {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StrataError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, StrataError> {
        Ok(self.embed_text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_format_is_correct() {
        let texts = vec!["first".to_string(), "second".to_string()];
        let request = EmbedRequest {
            model: "text-embedding-3-small",
            input: &texts,
            dimensions: Some(256),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "text-embedding-3-small");
        assert_eq!(json["input"].as_array().unwrap().len(), 2);
        assert_eq!(json["dimensions"], 256);

        let request = EmbedRequest {
            model: "m",
            input: &texts,
            dimensions: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("dimensions").is_none());
    }

    #[test]
    fn response_items_reordered_by_index() {
        let json = r#"{
            "object": "list",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.4, 0.5]},
                {"object": "embedding", "index": 0, "embedding": [0.1, 0.2]}
            ],
            "model": "text-embedding-3-small"
        }"#;
        let response: EmbedResponse = serde_json::from_str(json).unwrap();
        let vectors = order_by_index(response.data);
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.4, 0.5]]);
    }

    #[test]
    fn missing_key_without_base_url_is_config_error() {
        if std::env::var(API_KEY_ENV).is_ok() {
            return;
        }
        let config = EmbeddingConfig::default();
        assert!(matches!(
            EmbeddingClient::with_config(&config),
            Err(StrataError::Config(_))
        ));
    }

    #[test]
    fn custom_base_url_allows_missing_key() {
        let config = EmbeddingConfig {
            base_url: Some("http://localhost:11434/v1/".into()),
            ..EmbeddingConfig::default()
        };
        let client = EmbeddingClient::with_config(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn hashing_is_normalised_and_deterministic() {
        let embedder = HashingEmbedder::new(32);
        let v = embedder.embed_text("alpha beta gamma alpha");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(v, embedder.embed_text("alpha beta gamma alpha"));
    }

    #[test]
    fn hashing_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        assert!(embedder.embed_text("  ...  ").iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn hashing_embeds_every_document() {
        let embedder = HashingEmbedder::new(16);
        let texts = vec!["a b".to_string(), "c d".to_string(), String::new()];
        let vectors = embedder.embed_documents(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert!(vectors.iter().all(|v| v.len() == 16));
        assert_eq!(embedder.model(), "hashing-16");
    }
}
