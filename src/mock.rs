//! Deterministic capability mocks.
//!
//! Used by the unit and integration tests, and handy for embedding the
//! pipeline in other test suites. Every mock counts its calls and records
//! its inputs; failure and hang switches simulate an unavailable or stuck
//! backend. A hung call that is dropped (cancellation, timeout) increments
//! the mock's `abandoned` counter.
//!
//! ```rust
//! use focus_harness::mock::{MockEmbedder, MockLanguageModel, MockSearch};
//! use focus_harness::models::SearchResult;
//!
//! let llm = MockLanguageModel::new()
//!     .with_completions(["Capital of France"])
//!     .with_stream_chunks(["Paris", " is the capital."]);
//! let search = MockSearch::new(vec![SearchResult::new("Paris", "https://example.com")]);
//! let embedder = MockEmbedder::new(vec![1.0, 0.0]);
//! # let _ = (llm, search, embedder);
//! ```

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::embedding::EmbeddingProvider;
use crate::error::{PipelineError, Result};
use crate::llm::{GenerationOptions, LanguageModel, TextStream};
use crate::models::SearchResult;
use crate::prompt::PromptMessage;
use crate::search::{SearchOptions, SearchProvider};

/// Increments its counter when dropped.
struct DropFlag(Arc<AtomicUsize>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Park forever; bumps `abandoned` once the future is dropped.
async fn hang<T>(abandoned: Arc<AtomicUsize>) -> T {
    let _flag = DropFlag(abandoned);
    futures::future::pending::<T>().await
}

// ============ Language model ============

/// A recorded language-model call.
#[derive(Debug, Clone)]
pub struct RecordedPrompt {
    pub messages: Vec<PromptMessage>,
    pub options: GenerationOptions,
}

/// Mock language model.
///
/// `complete` pops queued responses (then falls back to the default
/// response); `stream` yields the same chunks on every call.
#[derive(Default)]
pub struct MockLanguageModel {
    completions: Mutex<VecDeque<String>>,
    default_completion: Mutex<String>,
    chunks: Mutex<Vec<String>>,
    complete_prompts: Mutex<Vec<RecordedPrompt>>,
    stream_prompts: Mutex<Vec<RecordedPrompt>>,
    fail_complete: AtomicBool,
    fail_stream: AtomicBool,
    fail_stream_after: Mutex<Option<usize>>,
    hang_complete: AtomicBool,
    hang_stream: AtomicBool,
    stall_after: Mutex<Option<usize>>,
    abandoned: Arc<AtomicUsize>,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self {
            default_completion: Mutex::new("Mock response".to_string()),
            ..Default::default()
        }
    }

    /// Queue responses for successive `complete` calls.
    pub fn with_completions<I, S>(self, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.completions
            .lock()
            .unwrap()
            .extend(responses.into_iter().map(Into::into));
        self
    }

    /// Response used once the queue is empty.
    pub fn with_default_completion(self, response: impl Into<String>) -> Self {
        *self.default_completion.lock().unwrap() = response.into();
        self
    }

    pub fn with_stream_chunks<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.chunks.lock().unwrap() = chunks.into_iter().map(Into::into).collect();
        self
    }

    pub fn fail_complete(&self) {
        self.fail_complete.store(true, Ordering::SeqCst);
    }

    /// Fail when opening the stream.
    pub fn fail_stream(&self) {
        self.fail_stream.store(true, Ordering::SeqCst);
    }

    /// Yield `n` chunks, then a stream error.
    pub fn fail_stream_after(&self, n: usize) {
        *self.fail_stream_after.lock().unwrap() = Some(n);
    }

    pub fn hang_complete(&self) {
        self.hang_complete.store(true, Ordering::SeqCst);
    }

    /// Never open the stream.
    pub fn hang_stream(&self) {
        self.hang_stream.store(true, Ordering::SeqCst);
    }

    /// Yield `n` chunks, then wait forever for the next one.
    pub fn stall_stream_after(&self, n: usize) {
        *self.stall_after.lock().unwrap() = Some(n);
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_prompts.lock().unwrap().len()
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_prompts.lock().unwrap().len()
    }

    pub fn complete_prompts(&self) -> Vec<RecordedPrompt> {
        self.complete_prompts.lock().unwrap().clone()
    }

    pub fn stream_prompts(&self) -> Vec<RecordedPrompt> {
        self.stream_prompts.lock().unwrap().clone()
    }

    /// Hung calls (or streams) that were dropped before finishing.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        messages: &[PromptMessage],
        options: &GenerationOptions,
    ) -> Result<String> {
        self.complete_prompts.lock().unwrap().push(RecordedPrompt {
            messages: messages.to_vec(),
            options: *options,
        });

        if self.hang_complete.load(Ordering::SeqCst) {
            return hang(self.abandoned.clone()).await;
        }
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(PipelineError::ModelUnavailable(
                "mock completion failure".to_string(),
            ));
        }

        let next = self.completions.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.default_completion.lock().unwrap().clone()))
    }

    async fn stream(
        &self,
        messages: &[PromptMessage],
        options: &GenerationOptions,
    ) -> Result<TextStream> {
        self.stream_prompts.lock().unwrap().push(RecordedPrompt {
            messages: messages.to_vec(),
            options: *options,
        });

        if self.hang_stream.load(Ordering::SeqCst) {
            return hang(self.abandoned.clone()).await;
        }
        if self.fail_stream.load(Ordering::SeqCst) {
            return Err(PipelineError::ModelUnavailable(
                "mock stream failure".to_string(),
            ));
        }

        let chunks = self.chunks.lock().unwrap().clone();
        let fail_after = *self.fail_stream_after.lock().unwrap();
        let stall_after = *self.stall_after.lock().unwrap();

        let mut items: Vec<Result<String>> = chunks.into_iter().map(Ok).collect();
        if let Some(n) = fail_after {
            items.truncate(n);
            items.push(Err(PipelineError::ModelUnavailable(
                "mock stream broke".to_string(),
            )));
        }

        match stall_after {
            Some(n) => {
                items.truncate(n);
                let abandoned = self.abandoned.clone();
                let tail = stream::once(async move { hang::<Result<String>>(abandoned).await });
                Ok(stream::iter(items).chain(tail).boxed())
            }
            None => Ok(stream::iter(items).boxed()),
        }
    }
}

// ============ Embeddings ============

/// Mock embedding provider: fixed vectors per text, or a default vector.
#[derive(Default)]
pub struct MockEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    default_vector: Vec<f32>,
    text_batches: Mutex<Vec<Vec<String>>>,
    queries: Mutex<Vec<String>>,
    fail: AtomicBool,
    hang: AtomicBool,
    drop_last_vector: AtomicBool,
    abandoned: Arc<AtomicUsize>,
}

impl MockEmbedder {
    pub fn new(default_vector: Vec<f32>) -> Self {
        Self {
            default_vector,
            ..Default::default()
        }
    }

    /// Return `vector` whenever `text` is embedded.
    pub fn with_vector(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.lock().unwrap().insert(text.into(), vector);
        self
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    /// Return one vector fewer than requested from `embed_texts`.
    pub fn drop_last_vector(&self) {
        self.drop_last_vector.store(true, Ordering::SeqCst);
    }

    /// Number of `embed_texts` calls (excluding those made by `embed_query`).
    pub fn text_calls(&self) -> usize {
        self.text_batches.lock().unwrap().len()
    }

    pub fn query_calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn text_batches(&self) -> Vec<Vec<String>> {
        self.text_batches.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        self.vectors
            .lock()
            .unwrap()
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.default_vector.clone())
    }

    async fn check(&self) -> Result<()> {
        if self.hang.load(Ordering::SeqCst) {
            return hang(self.abandoned.clone()).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(PipelineError::EmbeddingUnavailable(
                "mock embedding failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn model_name(&self) -> &str {
        "mock-embedder"
    }

    fn dims(&self) -> usize {
        self.default_vector.len()
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.text_batches.lock().unwrap().push(texts.to_vec());
        self.check().await?;

        let mut vectors: Vec<Vec<f32>> = texts.iter().map(|t| self.vector_for(t)).collect();
        if self.drop_last_vector.load(Ordering::SeqCst) {
            vectors.pop();
        }
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.queries.lock().unwrap().push(text.to_string());
        self.check().await?;
        Ok(self.vector_for(text))
    }
}

// ============ Search ============

/// Mock search backend returning a fixed result list.
#[derive(Default)]
pub struct MockSearch {
    results: Vec<SearchResult>,
    calls: Mutex<Vec<(String, SearchOptions)>>,
    fail: AtomicBool,
    hang: AtomicBool,
    abandoned: Arc<AtomicUsize>,
}

impl MockSearch {
    pub fn new(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            ..Default::default()
        }
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Query and filters of every call, in order.
    pub fn calls(&self) -> Vec<(String, SearchOptions)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for MockSearch {
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        self.calls
            .lock()
            .unwrap()
            .push((query.to_string(), options.clone()));

        if self.hang.load(Ordering::SeqCst) {
            return hang(self.abandoned.clone()).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(PipelineError::SearchUnavailable(
                "mock search failure".to_string(),
            ));
        }
        Ok(self.results.clone())
    }
}
