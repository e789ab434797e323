//! Language model abstraction and the OpenAI-compatible chat adapter.
//!
//! The pipeline needs two operations from a model: a whole completion
//! (query rewriting, suggestions) and an incremental stream (answer
//! generation). Sampling settings travel with each call in
//! [`GenerationOptions`]; a provider instance is never mutated to change
//! them.
//!
//! # Providers
//!
//! | Config Value | Base URL | API key |
//! |--------------|----------|---------|
//! | `"openai"` | `https://api.openai.com/v1` | `OPENAI_API_KEY` (or `llm.api_key_env`) |
//! | `"ollama"` | `http://localhost:11434/v1` | none |
//! | `"openai-compatible"` | `llm.base_url` | optional, from `llm.api_key_env` |

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{PipelineError, Result};
use crate::prompt::PromptMessage;

/// Incremental model output.
pub type TextStream = BoxStream<'static, Result<String>>;

/// Per-call sampling options.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
}

impl GenerationOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
        }
    }
}

/// A chat-style language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider/model identifier for logs (e.g. `"openai:gpt-4o-mini"`).
    fn name(&self) -> &str;

    /// Produce the whole response for `messages`.
    async fn complete(
        &self,
        messages: &[PromptMessage],
        options: &GenerationOptions,
    ) -> Result<String>;

    /// Produce the response incrementally. Dropping the stream abandons
    /// the underlying request.
    async fn stream(
        &self,
        messages: &[PromptMessage],
        options: &GenerationOptions,
    ) -> Result<TextStream>;
}

// ============ OpenAI-compatible Provider ============

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
}

#[derive(Deserialize)]
struct ChatStreamChoice {
    #[serde(default)]
    delta: Option<ChatStreamDelta>,
}

#[derive(Deserialize)]
struct ChatStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Chat model speaking the OpenAI `/chat/completions` protocol.
///
/// Streaming uses server-sent events; each `delta.content` becomes one
/// stream item and `[DONE]` ends the stream.
pub struct OpenAICompatibleModel {
    name: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAICompatibleModel {
    /// Create a model client from explicit parts.
    pub fn new(
        model: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let model = model.into();
        // Streams can legitimately outlive `timeout`; only connecting is
        // bounded here. The pipeline bounds each wait on the stream.
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            name: model.clone(),
            model,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    /// Create a model client from the `[llm]` section.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unknown or `OPENAI_API_KEY`
    /// (or the configured `api_key_env`) is missing for the `openai`
    /// provider.
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let key_from_env = |var: &str| std::env::var(var).ok().filter(|k| !k.is_empty());

        let (base_url, api_key) = match config.provider.as_str() {
            "openai" => {
                let var = config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
                let key = key_from_env(var)
                    .ok_or_else(|| anyhow::anyhow!("{} environment variable not set", var))?;
                let base = config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
                (base, Some(key))
            }
            "ollama" => {
                let base = config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "http://localhost:11434/v1".to_string());
                (base, config.api_key_env.as_deref().and_then(key_from_env))
            }
            "openai-compatible" => {
                let base = config.base_url.clone().ok_or_else(|| {
                    anyhow::anyhow!("llm.base_url required for openai-compatible provider")
                })?;
                (base, config.api_key_env.as_deref().and_then(key_from_env))
            }
            other => anyhow::bail!("Unknown llm provider: {}", other),
        };

        let mut model = Self::new(config.model.clone(), base_url, api_key, config.timeout())?;
        model.name = format!("{}:{}", config.provider, config.model);
        Ok(model)
    }

    fn request(&self, body: &ChatRequest<'_>) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        builder
    }
}

#[async_trait]
impl LanguageModel for OpenAICompatibleModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        messages: &[PromptMessage],
        options: &GenerationOptions,
    ) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: options.temperature,
            stream: false,
        };

        debug!(model = %self.name, messages = messages.len(), "chat completion request");

        let response = self.request(&body).send().await.map_err(|e| {
            warn!("Network error calling {}: {}", self.name, e);
            PipelineError::ModelUnavailable(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::ModelUnavailable(format!(
                "API error {}: {}",
                status, body_text
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::ModelUnavailable(format!("invalid response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| PipelineError::ModelUnavailable("response has no choices".to_string()))
    }

    async fn stream(
        &self,
        messages: &[PromptMessage],
        options: &GenerationOptions,
    ) -> Result<TextStream> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: options.temperature,
            stream: true,
        };

        debug!(model = %self.name, messages = messages.len(), "chat stream request");

        let event_source = EventSource::new(self.request(&body)).map_err(|e| {
            warn!("Failed to create event source: {}", e);
            PipelineError::ModelUnavailable(format!("stream failed: {}", e))
        })?;

        let stream = stream::unfold(Some(event_source), |state| async move {
            let mut es = state?;
            loop {
                match es.next().await {
                    Some(Ok(Event::Open)) => continue,
                    Some(Ok(Event::Message(msg))) => {
                        if msg.data.trim() == "[DONE]" {
                            es.close();
                            return None;
                        }
                        match serde_json::from_str::<ChatStreamChunk>(&msg.data) {
                            Ok(chunk) => {
                                let text = chunk
                                    .choices
                                    .into_iter()
                                    .next()
                                    .and_then(|c| c.delta)
                                    .and_then(|d| d.content)
                                    .unwrap_or_default();
                                if text.is_empty() {
                                    continue;
                                }
                                return Some((Ok(text), Some(es)));
                            }
                            Err(e) => {
                                warn!("Failed to parse stream chunk: {} | data: {}", e, msg.data);
                                es.close();
                                let err =
                                    PipelineError::ModelUnavailable(format!("parse error: {}", e));
                                return Some((Err(err), None));
                            }
                        }
                    }
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                        es.close();
                        return None;
                    }
                    Some(Err(e)) => {
                        // EventSource reconnects on error unless closed.
                        es.close();
                        let err = PipelineError::ModelUnavailable(format!("stream error: {}", e));
                        return Some((Err(err), None));
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let messages = vec![PromptMessage::system("sys"), PromptMessage::user("hi")];
        let body = ChatRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            temperature: Some(0.0),
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["stream"], true);

        let no_temp = ChatRequest {
            temperature: None,
            ..body
        };
        assert!(serde_json::to_value(&no_temp).unwrap().get("temperature").is_none());
    }

    #[test]
    fn test_stream_chunk_parsing() {
        let chunk: ChatStreamChunk = serde_json::from_str(
            r#"{"id":"x","choices":[{"index":0,"delta":{"role":"assistant","content":"Par"}}]}"#,
        )
        .unwrap();
        let text = chunk.choices[0].delta.as_ref().unwrap().content.as_deref();
        assert_eq!(text, Some("Par"));

        let empty: ChatStreamChunk = serde_json::from_str(r#"{"choices":[{"delta":{}}]}"#).unwrap();
        assert!(empty.choices[0].delta.as_ref().unwrap().content.is_none());
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let cfg = LlmConfig {
            provider: "ollama".to_string(),
            model: "llama3.1".to_string(),
            ..Default::default()
        };
        let model = OpenAICompatibleModel::from_config(&cfg).unwrap();
        assert_eq!(model.name(), "ollama:llama3.1");
        assert_eq!(model.base_url, "http://localhost:11434/v1");
        assert!(model.api_key.is_none());
    }
}
