//! Shared capability handles.
//!
//! [`Services`] bundles the three capabilities behind `Arc`s. It is built
//! once per process and cloned into every request; each adapter owns a
//! pooled HTTP client, so clones share connections.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::focus::FocusRegistry;
use crate::llm::{LanguageModel, OpenAICompatibleModel};
use crate::search::{SearchProvider, SearxngClient};

#[derive(Clone)]
pub struct Services {
    pub llm: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub search: Arc<dyn SearchProvider>,
}

impl Services {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn EmbeddingProvider>,
        search: Arc<dyn SearchProvider>,
    ) -> Self {
        Self {
            llm,
            embedder,
            search,
        }
    }

    /// Build the configured adapters.
    pub fn from_config(config: &Config) -> Result<Self> {
        let llm = OpenAICompatibleModel::from_config(&config.llm)
            .context("Failed to initialize language model")?;
        let embedder =
            create_provider(&config.embedding).context("Failed to initialize embeddings")?;
        let search =
            SearxngClient::from_config(&config.search).context("Failed to initialize search")?;

        if !config.embedding.is_enabled() {
            let reranking: Vec<String> = FocusRegistry::from_config(config)
                .modes()
                .iter()
                .filter(|m| m.reranks())
                .map(|m| m.name.clone())
                .collect();
            if !reranking.is_empty() {
                warn!(
                    "Embeddings are disabled; focus modes that rerank will fail: {}",
                    reranking.join(", ")
                );
            }
        }

        Ok(Self::new(Arc::new(llm), Arc::from(embedder), Arc::new(search)))
    }
}
