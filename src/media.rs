//! Image and video search.
//!
//! Both kinds rewrite the query (without a sentinel, so a search always
//! happens), query dedicated engines and keep only results that carry
//! every field the kind needs, capped at [`MEDIA_RESULT_LIMIT`].

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, Stage};
use crate::models::{ChatMessage, ImageResult, SearchResult, VideoResult};
use crate::pipeline::PipelineSettings;
use crate::prompt::{IMAGE_SEARCH_PROMPT, VIDEO_SEARCH_PROMPT};
use crate::rewrite::{QueryRewriter, RewriteResult};
use crate::search::SearchOptions;
use crate::services::Services;

pub const MEDIA_RESULT_LIMIT: usize = 10;

const IMAGE_ENGINES: &[&str] = &["bing images", "google images"];
const VIDEO_ENGINES: &[&str] = &["youtube"];

async fn bounded<T>(stage: Stage, limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    let res = match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(stage.timeout_error(limit)),
    };
    res.map_err(|e| e.at_stage(stage))
}

pub struct MediaSearch {
    services: Services,
    settings: PipelineSettings,
}

impl MediaSearch {
    pub fn new(services: Services, settings: PipelineSettings) -> Self {
        Self { services, settings }
    }

    pub async fn images(&self, query: &str, history: &[ChatMessage]) -> Result<Vec<ImageResult>> {
        let results = self
            .rewrite_and_search(IMAGE_SEARCH_PROMPT, IMAGE_ENGINES, query, history)
            .await?;
        let images: Vec<ImageResult> = results
            .iter()
            .filter_map(SearchResult::as_image)
            .take(MEDIA_RESULT_LIMIT)
            .collect();
        debug!(found = results.len(), kept = images.len(), "image search");
        Ok(images)
    }

    pub async fn videos(&self, query: &str, history: &[ChatMessage]) -> Result<Vec<VideoResult>> {
        let results = self
            .rewrite_and_search(VIDEO_SEARCH_PROMPT, VIDEO_ENGINES, query, history)
            .await?;
        let videos: Vec<VideoResult> = results
            .iter()
            .filter_map(SearchResult::as_video)
            .take(MEDIA_RESULT_LIMIT)
            .collect();
        debug!(found = results.len(), kept = videos.len(), "video search");
        Ok(videos)
    }

    async fn rewrite_and_search(
        &self,
        prompt: &str,
        engines: &[&str],
        query: &str,
        history: &[ChatMessage],
    ) -> Result<Vec<SearchResult>> {
        let rewriter = QueryRewriter::new(prompt, None, self.settings.generation_options());
        let rewritten = bounded(
            Stage::Rewriting,
            self.settings.model_timeout,
            rewriter.rewrite(self.services.llm.as_ref(), query, history),
        )
        .await?;
        let search_query = match rewritten {
            RewriteResult::Rewritten(q) => q,
            RewriteResult::NotNeeded => query.trim().to_string(),
        };

        let options = SearchOptions::new(None, engines.iter().map(|e| e.to_string()).collect());
        bounded(
            Stage::Searching,
            self.settings.search_timeout,
            self.services.search.search(&search_query, &options),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::mock::{MockEmbedder, MockLanguageModel, MockSearch};
    use std::sync::Arc;

    fn image(i: usize) -> SearchResult {
        let mut r = SearchResult::new(format!("Cat {}", i), format!("https://example.com/{}", i));
        r.img_src = Some(format!("https://example.com/{}.png", i));
        r
    }

    fn media(llm: Arc<MockLanguageModel>, search: Arc<MockSearch>) -> MediaSearch {
        let services = Services::new(llm, Arc::new(MockEmbedder::new(vec![1.0])), search);
        MediaSearch::new(services, PipelineSettings::default())
    }

    #[tokio::test]
    async fn test_images_filter_and_cap() {
        let mut results: Vec<SearchResult> = (0..12).map(image).collect();
        results.insert(3, SearchResult::new("No image", "https://example.com/none"));
        let llm = Arc::new(MockLanguageModel::new().with_completions(["A cat"]));
        let search = Arc::new(MockSearch::new(results));

        let images = media(llm, search.clone())
            .images("What is a cat?", &[])
            .await
            .unwrap();

        assert_eq!(images.len(), MEDIA_RESULT_LIMIT);
        assert_eq!(images[3].title, "Cat 3");
        let calls = search.calls();
        let (q, opts) = &calls[0];
        assert_eq!(q, "A cat");
        assert_eq!(opts.engines, vec!["bing images", "google images"]);
    }

    #[tokio::test]
    async fn test_videos_require_player() {
        let mut full = SearchResult::new("Relativity", "https://youtube.com/watch?v=1");
        full.thumbnail = Some("https://i.ytimg.com/1.jpg".into());
        full.iframe_src = Some("https://youtube.com/embed/1".into());
        let mut no_player = full.clone();
        no_player.iframe_src = None;

        let llm = Arc::new(MockLanguageModel::new().with_completions(["not_needed"]));
        let search = Arc::new(MockSearch::new(vec![no_player, full]));
        let videos = media(llm, search.clone()).videos("relativity", &[]).await.unwrap();

        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].iframe_src, "https://youtube.com/embed/1");
        // No sentinel: the model output is searched verbatim.
        assert_eq!(search.calls()[0].0, "not_needed");
    }

    #[tokio::test]
    async fn test_search_failure_propagates() {
        let llm = Arc::new(MockLanguageModel::new());
        let search = Arc::new(MockSearch::default());
        search.fail();
        let err = media(llm, search).images("cats", &[]).await.unwrap_err();
        assert_eq!(err.code(), "upstream_unavailable");
        assert!(matches!(
            err,
            PipelineError::PipelineFailure {
                stage: Stage::Searching,
                ..
            }
        ));
    }
}
