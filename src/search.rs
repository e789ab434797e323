//! Search gateway: the SearXNG metasearch client.
//!
//! The gateway turns one backend call into a uniform [`SearchResult`]
//! list. Engine and language filters are forwarded verbatim; results keep
//! the backend's order. Fields the backend omits become `None` and never
//! fail the call, but results without a URL are dropped here because they
//! cannot be cited.
//!
//! Every failure (transport, non-2xx status, undecodable body) is a single
//! [`PipelineError::SearchUnavailable`]. There is no retry.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::error::{PipelineError, Result};
use crate::models::{non_empty, SearchResult};

/// Filters forwarded to the search backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Language code such as `"en"`; `None` lets the backend decide.
    pub language: Option<String>,
    /// Engine names; empty means the backend's defaults.
    pub engines: Vec<String>,
}

impl SearchOptions {
    pub fn new(language: Option<String>, engines: Vec<String>) -> Self {
        Self { language, engines }
    }
}

/// A search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>>;
}

#[derive(Deserialize)]
struct SearxngResponse {
    #[serde(default)]
    results: Vec<SearxngResult>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SearxngResult {
    title: Option<String>,
    url: Option<String>,
    content: Option<String>,
    img_src: Option<String>,
    thumbnail_src: Option<String>,
    thumbnail: Option<String>,
    iframe_src: Option<String>,
}

impl SearxngResult {
    fn normalize(self) -> Option<SearchResult> {
        let url = self.url.and_then(non_empty)?;
        Some(SearchResult {
            title: self.title.unwrap_or_default(),
            url,
            content: self.content.and_then(non_empty),
            img_src: self.img_src.and_then(non_empty),
            // Image engines report `thumbnail_src`, video engines `thumbnail`.
            thumbnail: self
                .thumbnail
                .and_then(non_empty)
                .or_else(|| self.thumbnail_src.and_then(non_empty)),
            iframe_src: self.iframe_src.and_then(non_empty),
        })
    }
}

/// Decode a SearXNG JSON body into normalized results.
pub fn parse_searxng_response(body: &str) -> Result<Vec<SearchResult>> {
    let parsed: SearxngResponse = serde_json::from_str(body)
        .map_err(|e| PipelineError::SearchUnavailable(format!("invalid response: {}", e)))?;
    Ok(parsed
        .results
        .into_iter()
        .filter_map(SearxngResult::normalize)
        .collect())
}

/// Client for a SearXNG instance's JSON API.
pub struct SearxngClient {
    base_url: String,
    client: reqwest::Client,
}

impl SearxngClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &SearchConfig) -> anyhow::Result<Self> {
        Self::new(config.url.clone(), config.timeout())
    }

    fn query_params(query: &str, options: &SearchOptions) -> Vec<(&'static str, String)> {
        let mut params = vec![("q", query.to_string()), ("format", "json".to_string())];
        if let Some(language) = &options.language {
            params.push(("language", language.clone()));
        }
        if !options.engines.is_empty() {
            params.push(("engines", options.engines.join(",")));
        }
        params
    }
}

#[async_trait]
impl SearchProvider for SearxngClient {
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let url = format!("{}/search", self.base_url);
        debug!(query, engines = ?options.engines, "searxng request");

        let response = self
            .client
            .get(&url)
            .query(&Self::query_params(query, options))
            .send()
            .await
            .map_err(|e| {
                warn!("SearXNG request to {} failed: {}", url, e);
                PipelineError::SearchUnavailable(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::SearchUnavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(PipelineError::SearchUnavailable(format!(
                "SearXNG returned {}: {}",
                status, body
            )));
        }

        let results = parse_searxng_response(&body)?;
        debug!(count = results.len(), "searxng results");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_fields() {
        let body = r#"{
            "query": "capital of france",
            "results": [
                {"title": "Paris", "url": "https://en.wikipedia.org/wiki/Paris", "content": "Paris is the capital of France.", "engine": "wikipedia"},
                {"title": "No link", "content": "dropped"},
                {"title": "Empty", "url": "https://example.com", "content": ""},
                {"title": "Video", "url": "https://youtube.com/watch?v=1", "thumbnail": "https://i.ytimg.com/1.jpg", "iframe_src": "https://youtube.com/embed/1"}
            ]
        }"#;

        let results = parse_searxng_response(body).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].title, "Paris");
        assert_eq!(
            results[0].content.as_deref(),
            Some("Paris is the capital of France.")
        );
        assert!(results[1].content.is_none());
        assert_eq!(results[2].thumbnail.as_deref(), Some("https://i.ytimg.com/1.jpg"));
        assert!(results[2].as_video().is_some());
    }

    #[test]
    fn test_parse_thumbnail_src_fallback() {
        let body = r#"{"results": [{"title": "t", "url": "u", "thumbnail_src": "s"}]}"#;
        let results = parse_searxng_response(body).unwrap();
        assert_eq!(results[0].thumbnail.as_deref(), Some("s"));
    }

    #[test]
    fn test_parse_missing_results_is_empty() {
        assert!(parse_searxng_response("{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_garbage_is_unavailable() {
        let err = parse_searxng_response("<html>").unwrap_err();
        assert!(matches!(err, PipelineError::SearchUnavailable(_)));
    }

    #[test]
    fn test_query_params_forward_filters() {
        let opts = SearchOptions::new(Some("en".into()), vec!["arxiv".into(), "pubmed".into()]);
        let params = SearxngClient::query_params("rust", &opts);
        assert!(params.contains(&("language", "en".to_string())));
        assert!(params.contains(&("engines", "arxiv,pubmed".to_string())));

        let bare = SearxngClient::query_params("rust", &SearchOptions::default());
        assert_eq!(bare.len(), 2);
    }
}
