use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::models::ContentFallback;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Extra or replacement focus modes, keyed by mode name.
    #[serde(default)]
    pub focus_modes: BTreeMap<String, FocusModeConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3001".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Base URL of the chat completions API (without `/chat/completions`).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Default sampling temperature for answers and rewrites.
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            base_url: None,
            api_key_env: None,
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> Option<f32> {
    Some(0.7)
}
fn default_llm_timeout_secs() -> u64 {
    60
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama server, OpenAI-compatible proxy).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 2,
            timeout_secs: 30,
        }
    }
}

/// Same backend and key as the default `[llm]`, so every built-in mode
/// works without an `[embedding]` section.
fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    2
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_provider")]
    pub provider: String,
    /// Base URL of the SearXNG instance.
    #[serde(default = "default_search_url")]
    pub url: String,
    /// Language filter used when a focus mode does not set its own.
    #[serde(default = "default_language")]
    pub language: Option<String>,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            url: default_search_url(),
            language: default_language(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_search_provider() -> String {
    "searxng".to_string()
}
fn default_search_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_language() -> Option<String> {
    Some("en".to_string())
}
fn default_search_timeout_secs() -> u64 {
    15
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Capacity of the per-request event channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_channel_capacity() -> usize {
    64
}

/// A focus mode declared in `[focus_modes.<name>]`.
///
/// Omitted prompts fall back to the built-in templates; omitting the
/// `retrieval` table gives a generation-only mode.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FocusModeConfig {
    #[serde(default)]
    pub description: Option<String>,
    /// System prompt; `{context}` and `{date}` are substituted.
    #[serde(default)]
    pub answer_prompt: Option<String>,
    /// Where the context comes from, used by the default answer prompt
    /// (e.g. `"Hacker News"`).
    #[serde(default)]
    pub source_label: Option<String>,
    #[serde(default)]
    pub retrieval: Option<RetrievalConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RetrievalConfig {
    /// Rewrite prompt; `{chat_history}` and `{query}` are substituted.
    #[serde(default)]
    pub rewrite_prompt: Option<String>,
    #[serde(default)]
    pub sentinel: Option<String>,
    #[serde(default)]
    pub engines: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub content_fallback: ContentFallback,
    /// Omit to pass search results through without reranking.
    #[serde(default)]
    pub rerank: Option<RerankConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default = "default_rerank_limit")]
    pub limit: usize,
}

fn default_rerank_limit() -> usize {
    15
}

impl Config {
    /// Configuration with every default; used when no file is present.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.server.bind.trim().is_empty() {
        bail!("server.bind must not be empty");
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "openai" | "ollama" => {}
        "openai-compatible" => {
            if config.llm.base_url.is_none() {
                bail!("llm.base_url must be specified when provider is 'openai-compatible'");
            }
        }
        other => bail!(
            "Unknown llm provider: '{}'. Must be openai, ollama, or openai-compatible.",
            other
        ),
    }
    if config.llm.model.trim().is_empty() {
        bail!("llm.model must not be empty");
    }
    if let Some(t) = config.llm.temperature {
        if !(0.0..=2.0).contains(&t) {
            bail!("llm.temperature must be in [0.0, 2.0]");
        }
    }
    if config.llm.timeout_secs == 0 {
        bail!("llm.timeout_secs must be > 0");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "local" | "openai" => {}
        "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.is_enabled() {
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if config.embedding.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be > 0");
        }
    }

    // Validate search
    if config.search.provider != "searxng" {
        bail!(
            "Unknown search provider: '{}'. Must be searxng.",
            config.search.provider
        );
    }
    if config.search.url.trim().is_empty() {
        bail!("search.url must not be empty");
    }
    if config.search.timeout_secs == 0 {
        bail!("search.timeout_secs must be > 0");
    }

    if config.pipeline.channel_capacity == 0 {
        bail!("pipeline.channel_capacity must be >= 1");
    }

    // Validate focus modes
    for (name, mode) in &config.focus_modes {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            bail!(
                "focus mode name '{}' must be non-empty and contain only [A-Za-z0-9_-]",
                name
            );
        }
        if let Some(rerank) = mode.retrieval.as_ref().and_then(|r| r.rerank.as_ref()) {
            if rerank.limit == 0 {
                bail!("focus_modes.{}.retrieval.rerank.limit must be >= 1", name);
            }
            if let Some(threshold) = rerank.threshold {
                if !(-1.0..=1.0).contains(&threshold) {
                    bail!(
                        "focus_modes.{}.retrieval.rerank.threshold must be in [-1.0, 1.0]",
                        name
                    );
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:3001");
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.embedding.provider, "openai");
        assert!(cfg.embedding.is_enabled());
        assert_eq!(cfg.search.language.as_deref(), Some("en"));
        assert_eq!(cfg.pipeline.channel_capacity, 64);
        assert!(cfg.focus_modes.is_empty());
    }

    #[test]
    fn test_full_config() {
        let cfg = parse_config(
            r#"
[server]
bind = "0.0.0.0:8000"

[llm]
provider = "ollama"
model = "llama3.1"
temperature = 0.2

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 768

[search]
url = "http://searxng:8080"
language = "de"

[focus_modes.hn]
description = "Search Hacker News"
source_label = "Hacker News"

[focus_modes.hn.retrieval]
engines = ["hackernews"]
content_fallback = "title"

[focus_modes.hn.retrieval.rerank]
threshold = 0.4
limit = 8
"#,
        )
        .unwrap();

        assert_eq!(cfg.llm.provider, "ollama");
        assert_eq!(cfg.embedding.dims, Some(768));
        let hn = &cfg.focus_modes["hn"];
        let retrieval = hn.retrieval.as_ref().unwrap();
        assert_eq!(retrieval.engines, vec!["hackernews"]);
        assert_eq!(retrieval.content_fallback, ContentFallback::Title);
        let rerank = retrieval.rerank.as_ref().unwrap();
        assert_eq!(rerank.threshold, Some(0.4));
        assert_eq!(rerank.limit, 8);
    }

    #[test]
    fn test_unknown_llm_provider_rejected() {
        let err = parse_config("[llm]\nprovider = \"carrier-pigeon\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn test_openai_compatible_requires_base_url() {
        assert!(parse_config("[llm]\nprovider = \"openai-compatible\"\n").is_err());
        assert!(parse_config(
            "[llm]\nprovider = \"openai-compatible\"\nbase_url = \"http://localhost:1234/v1\"\n"
        )
        .is_ok());
    }

    #[test]
    fn test_embedding_model_required() {
        let err = parse_config("[embedding]\nprovider = \"ollama\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
        // OpenAI falls back to its default embedding model.
        assert!(parse_config("[embedding]\nprovider = \"openai\"\n").is_ok());
    }

    #[test]
    fn test_invalid_focus_mode_name() {
        assert!(parse_config("[focus_modes.\"bad name\"]\n").is_err());
    }

    #[test]
    fn test_zero_rerank_limit_rejected() {
        let err = parse_config(
            "[focus_modes.x.retrieval]\n[focus_modes.x.retrieval.rerank]\nlimit = 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("limit"));
    }
}
