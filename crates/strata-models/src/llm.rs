//! OpenAI-compatible chat completion client.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio and other servers exposing
//! `/v1/chat/completions`. Streaming uses server-sent events; each `data:`
//! line carries a JSON chunk whose `choices[0].delta.content` is appended to
//! the answer.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use strata_core::{CompletionOptions, Generator, LlmConfig, ModelMetadata, StrataError, TextStream};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// A message in a chat conversation.
///
/// # Examples
///
/// ```
/// use strata_models::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage {
///     role: Role::User,
///     content: "When did Musk establish xAI?".into(),
/// };
/// assert_eq!(msg.role, Role::User);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Message author.
    pub role: Role,
    /// Message text.
    pub content: String,
}

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Model output.
    Assistant,
}

/// Chat completion client.
///
/// # Examples
///
/// ```
/// use strata_core::{Generator, LlmConfig};
/// use strata_models::LlmClient;
///
/// let client = LlmClient::new(&LlmConfig::default()).unwrap();
/// assert_eq!(client.metadata().model_name, "gpt-4o-mini");
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: Option<String>,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("model", &self.config.model)
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Create a client from the `[llm]` config section.
    ///
    /// The API key falls back to `OPENAI_API_KEY`; it is optional so local
    /// servers work without one.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Generation`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, StrataError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| StrataError::Generation(format!("failed to create HTTP client: {e}")))?;
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok());
        Ok(Self {
            client,
            config: config.clone(),
            api_key,
        })
    }

    fn url(&self) -> String {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        format!("{base_url}/v1/chat/completions")
    }

    fn body(&self, prompt: &str, options: &CompletionOptions, stream: bool) -> serde_json::Value {
        let messages = vec![ChatMessage {
            role: Role::User,
            content: prompt.to_string(),
        }];
        serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "stream": stream,
        })
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response, StrataError> {
        let mut request = self.client.post(self.url());
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = request
            .json(body)
            .send()
            .await
            .map_err(|e| StrataError::Generation(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(StrataError::Generation(format!(
                "LLM API error {status}: {body_text}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl Generator for LlmClient {
    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            model_name: self.config.model.clone(),
            context_window: self.config.context_window,
            num_output: self.config.max_output_tokens,
        }
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String, StrataError> {
        let response = self.send(&self.body(prompt, options, false)).await?;

        let response_body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StrataError::Generation(format!("failed to parse response: {e}")))?;

        let content = response_body
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                StrataError::Generation(format!("unexpected response structure: {response_body}"))
            })?;

        debug!(model = %self.config.model, chars = content.len(), "completion received");
        Ok(content.to_string())
    }

    async fn stream_complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<TextStream, StrataError> {
        let response = self.send(&self.body(prompt, options, true)).await?;

        let mut decoder = SseDecoder::default();
        let fragments = response.bytes_stream().flat_map(move |chunk| {
            let items = match chunk {
                Ok(bytes) => decoder.push(&bytes),
                Err(e) => vec![Err(StrataError::Generation(format!(
                    "stream interrupted: {e}"
                )))],
            };
            stream::iter(items)
        });
        Ok(fragments.boxed())
    }
}

/// Incremental decoder for `text/event-stream` completion chunks.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// Feed raw bytes; returns the text deltas of every complete line.
    fn push(&mut self, chunk: &[u8]) -> Vec<Result<String, StrataError>> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if self.done {
                continue;
            }
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                self.done = true;
                continue;
            }
            match parse_delta(data) {
                Ok(Some(text)) if !text.is_empty() => out.push(Ok(text)),
                Ok(_) => {}
                Err(e) => out.push(Err(e)),
            }
        }

        out
    }
}

fn parse_delta(data: &str) -> Result<Option<String>, StrataError> {
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| StrataError::Generation(format!("malformed stream chunk: {e}")))?;
    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_construction_succeeds() {
        assert!(LlmClient::new(&LlmConfig::default()).is_ok());
    }

    #[test]
    fn metadata_follows_config() {
        let config = LlmConfig {
            model: "llama3".into(),
            context_window: 4096,
            max_output_tokens: 512,
            ..LlmConfig::default()
        };
        let meta = LlmClient::new(&config).unwrap().metadata();
        assert_eq!(meta.model_name, "llama3");
        assert_eq!(meta.context_window, 4096);
        assert_eq!(meta.num_output, 512);
    }

    #[test]
    fn url_uses_custom_base() {
        let config = LlmConfig {
            base_url: Some("http://localhost:11434/".into()),
            ..LlmConfig::default()
        };
        let client = LlmClient::new(&config).unwrap();
        assert_eq!(client.url(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn body_carries_options() {
        let client = LlmClient::new(&LlmConfig::default()).unwrap();
        let options = CompletionOptions {
            max_tokens: 64,
            temperature: 0.5,
            context_window: 1024,
        };
        let body = client.body("hi", &options, true);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi");
    }

    #[test]
    fn sse_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        let first = decoder.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].as_ref().unwrap(), "Hel");

        let second = decoder.push(b"ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].as_ref().unwrap(), "lo");

        let after = decoder.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n");
        assert!(after.is_empty());
    }

    #[test]
    fn sse_decoder_skips_role_only_and_comments() {
        let mut decoder = SseDecoder::default();
        let out = decoder.push(
            b": keep-alive\n\
              data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n",
        );
        assert!(out.is_empty());
    }

    #[test]
    fn sse_decoder_reports_malformed_chunk() {
        let mut decoder = SseDecoder::default();
        let out = decoder.push(b"data: {oops\n");
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(StrataError::Generation(_))));
    }

    #[test]
    fn chat_message_serializes() {
        let msg = ChatMessage {
            role: Role::System,
            content: "hello".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "hello");
    }
}
