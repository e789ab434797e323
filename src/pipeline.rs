//! The answer pipeline orchestrator.
//!
//! One [`Pipeline`] serves one request. It drives a small state machine
//!
//! ```text
//! Start ─► Rewriting ─┬─► Searching ─► Reranking ─┬─► Generating ─► Done
//!   │                 └── not needed ─────────────┤
//!   └── no retrieval (writing) ───────────────────┘
//! ```
//!
//! and publishes [`PipelineEvent`]s on a bounded channel: at most one
//! `Sources` before any `ResponseChunk`, then exactly one `End`, or a
//! single `Error` if any stage fails. The failure cause is logged with the
//! request id, focus mode and stage; the consumer only ever sees a generic
//! message.
//!
//! Every capability call is bounded by its configured timeout and raced
//! against the receiver closing, so dropping the receiver abandons
//! in-flight search, embedding and generation work promptly.

use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{PipelineError, Result, Stage};
use crate::focus::{FocusMode, Retrieval};
use crate::generate::{serialize_context, AnswerGenerator};
use crate::llm::GenerationOptions;
use crate::models::{Document, PipelineEvent, PipelineRequest};
use crate::rerank::rerank;
use crate::rewrite::{QueryRewriter, RewriteResult};
use crate::search::SearchOptions;
use crate::services::Services;

/// Message sent to the consumer when a request fails.
pub const GENERIC_ERROR_MESSAGE: &str =
    "An error occurred while processing your request. Please try again later.";

/// Timeouts and defaults shared by every request.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub search_timeout: Duration,
    pub embedding_timeout: Duration,
    /// Bounds a whole completion, opening a stream, and each wait for the
    /// next streamed chunk.
    pub model_timeout: Duration,
    /// Search language for modes that do not set one.
    pub language: Option<String>,
    pub temperature: Option<f32>,
    pub channel_capacity: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            search_timeout: config.search.timeout(),
            embedding_timeout: config.embedding.timeout(),
            model_timeout: config.llm.timeout(),
            language: config.search.language.clone(),
            temperature: config.llm.temperature,
            channel_capacity: config.pipeline.channel_capacity.max(1),
        }
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Await `fut` unless it times out or the consumer goes away.
///
/// Errors are tagged with `stage`. Losing the receiver wins over a
/// simultaneously ready result.
pub(crate) async fn guarded<T, F>(
    tx: &mpsc::Sender<PipelineEvent>,
    stage: Stage,
    limit: Duration,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let outcome = tokio::select! {
        biased;
        _ = tx.closed() => Err(PipelineError::Cancelled),
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(res) => res,
            Err(_) => Err(stage.timeout_error(limit)),
        },
    };
    outcome.map_err(|e| e.at_stage(stage))
}

async fn emit(tx: &mpsc::Sender<PipelineEvent>, event: PipelineEvent) -> Result<()> {
    tx.send(event).await.map_err(|_| PipelineError::Cancelled)
}

enum State {
    Start,
    Rewriting,
    Searching {
        query: String,
    },
    Reranking {
        query: String,
        docs: Vec<Document>,
    },
    Generating {
        sources: Option<Vec<Document>>,
    },
    Done,
}

/// A single-use pipeline run for one focus mode.
pub struct Pipeline {
    services: Services,
    mode: Arc<FocusMode>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(services: Services, mode: Arc<FocusMode>, settings: PipelineSettings) -> Self {
        Self {
            services,
            mode,
            settings,
        }
    }

    /// Run the request on a new task and return its event stream.
    pub fn spawn(self, request: PipelineRequest) -> mpsc::Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        tokio::spawn(self.run(request, tx));
        rx
    }

    /// Run the request to completion, publishing on `tx`.
    pub async fn run(self, request: PipelineRequest, tx: mpsc::Sender<PipelineEvent>) {
        let request_id = Uuid::new_v4();
        let span = info_span!("pipeline", %request_id, mode = %self.mode.name);

        async move {
            info!(history = request.history.len(), "request started");
            match self.drive(&request, &tx).await {
                Ok(()) => {
                    if emit(&tx, PipelineEvent::End).await.is_err() {
                        debug!("consumer went away before end");
                    } else {
                        info!("request finished");
                    }
                }
                Err(PipelineError::Cancelled) => {
                    debug!("consumer went away; request abandoned");
                }
                Err(err) => {
                    let stage = match &err {
                        PipelineError::PipelineFailure { stage, .. } => stage.as_str(),
                        _ => "unknown",
                    };
                    error!(stage, code = err.code(), "request failed: {}", err);
                    let _ = emit(&tx, PipelineEvent::Error(GENERIC_ERROR_MESSAGE.to_string())).await;
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, request: &PipelineRequest, tx: &mpsc::Sender<PipelineEvent>) -> Result<()> {
        let mode = &self.mode;
        let settings = &self.settings;
        let options = settings.generation_options();
        let mut state = State::Start;

        loop {
            state = match state {
                State::Start => match mode.retrieval {
                    Some(_) => State::Rewriting,
                    None => State::Generating { sources: None },
                },

                State::Rewriting => {
                    let retrieval = self.retrieval()?;
                    let rewriter = QueryRewriter::new(
                        retrieval.rewrite_prompt.clone(),
                        retrieval.sentinel.clone(),
                        options,
                    );
                    let rewritten = guarded(
                        tx,
                        Stage::Rewriting,
                        settings.model_timeout,
                        rewriter.rewrite(self.services.llm.as_ref(), &request.query, &request.history),
                    )
                    .await?;

                    match rewritten {
                        RewriteResult::NotNeeded => {
                            debug!("rewriter reported no retrieval needed");
                            State::Generating {
                                sources: Some(Vec::new()),
                            }
                        }
                        RewriteResult::Rewritten(query) => {
                            debug!(%query, "rewrote query");
                            State::Searching { query }
                        }
                    }
                }

                State::Searching { query } => {
                    let retrieval = self.retrieval()?;
                    let search_options = SearchOptions::new(
                        retrieval.language.clone().or_else(|| settings.language.clone()),
                        retrieval.engines.clone(),
                    );
                    let results = guarded(
                        tx,
                        Stage::Searching,
                        settings.search_timeout,
                        self.services.search.search(&query, &search_options),
                    )
                    .await?;

                    let docs: Vec<Document> = results
                        .iter()
                        .map(|r| Document::from_search_result(r, retrieval.content_fallback))
                        .collect();
                    debug!(results = docs.len(), "search finished");
                    State::Reranking { query, docs }
                }

                State::Reranking { query, docs } => {
                    let retrieval = self.retrieval()?;
                    let docs = match &retrieval.rerank {
                        Some(policy) => {
                            guarded(
                                tx,
                                Stage::Reranking,
                                settings.embedding_timeout,
                                rerank(self.services.embedder.as_ref(), &query, docs, policy),
                            )
                            .await?
                        }
                        None => docs,
                    };
                    State::Generating {
                        sources: Some(docs),
                    }
                }

                State::Generating { sources } => {
                    let context = sources
                        .as_deref()
                        .map(serialize_context)
                        .unwrap_or_default();
                    if let Some(docs) = sources {
                        emit(tx, PipelineEvent::Sources(docs)).await?;
                    }

                    let generator = AnswerGenerator::new(mode.answer_prompt.clone(), options);
                    let mut stream = guarded(
                        tx,
                        Stage::Generating,
                        settings.model_timeout,
                        generator.generate(
                            self.services.llm.as_ref(),
                            &request.query,
                            &request.history,
                            &context,
                        ),
                    )
                    .await?;

                    loop {
                        let next = guarded(tx, Stage::Generating, settings.model_timeout, async {
                            Ok(stream.next().await)
                        })
                        .await?;
                        match next {
                            Some(Ok(chunk)) => {
                                if !chunk.is_empty() {
                                    emit(tx, PipelineEvent::ResponseChunk(chunk)).await?;
                                }
                            }
                            Some(Err(e)) => return Err(e.at_stage(Stage::Generating)),
                            None => break,
                        }
                    }
                    State::Done
                }

                State::Done => return Ok(()),
            };
        }
    }

    fn retrieval(&self) -> Result<&Retrieval> {
        self.mode.retrieval.as_ref().ok_or_else(|| {
            PipelineError::InvalidInput(format!("focus mode '{}' has no retrieval", self.mode.name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockEmbedder, MockLanguageModel, MockSearch};

    #[tokio::test]
    async fn test_guarded_times_out_with_capability_error() {
        let (tx, _rx) = mpsc::channel(1);
        let err = guarded(&tx, Stage::Searching, Duration::from_millis(10), async {
            futures::future::pending::<Result<()>>().await
        })
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        match err {
            PipelineError::PipelineFailure { stage, source } => {
                assert_eq!(stage, Stage::Searching);
                assert!(matches!(*source, PipelineError::SearchUnavailable(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_guarded_cancels_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel::<PipelineEvent>(1);
        drop(rx);
        let err = guarded(&tx, Stage::Generating, Duration::from_secs(5), async {
            futures::future::pending::<Result<()>>().await
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_writing_mode_streams_without_sources() {
        let llm = Arc::new(MockLanguageModel::new().with_stream_chunks(["Hello", "", " there"]));
        let services = Services::new(
            llm.clone(),
            Arc::new(MockEmbedder::new(vec![1.0])),
            Arc::new(MockSearch::default()),
        );
        let mode = crate::focus::FocusRegistry::with_builtins()
            .find("writing")
            .unwrap();
        let mut rx = Pipeline::new(services, mode, PipelineSettings::default())
            .spawn(PipelineRequest::new("Write a haiku", Vec::new()));

        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert_eq!(
            events,
            vec![
                PipelineEvent::ResponseChunk("Hello".into()),
                PipelineEvent::ResponseChunk(" there".into()),
                PipelineEvent::End,
            ]
        );
        assert_eq!(llm.complete_calls(), 0);
    }
}
