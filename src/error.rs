//! Error taxonomy for the answer pipeline and its capabilities.
//!
//! Capability adapters (search, embedding, language model) and the pure
//! components built on them return [`PipelineError`]. Errors propagate
//! unmodified until they reach the orchestrator in [`crate::pipeline`],
//! which is the only place that catches them: the cause is wrapped in
//! [`PipelineError::PipelineFailure`] for operator logs and the event
//! stream receives a single generic `Error` event.
//!
//! | Variant | Raised by |
//! |---------|-----------|
//! | `SearchUnavailable` | search gateway (network, HTTP status, decode, timeout) |
//! | `EmbeddingUnavailable` | embedding providers, reranker vector-count checks |
//! | `ModelUnavailable` | language model (complete or stream) |
//! | `InvalidInput` | similarity scorer (malformed vectors) |
//! | `PipelineFailure` | orchestrator boundary, wrapping one of the above |
//! | `Cancelled` | the event consumer went away mid-request |

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result alias used by every capability and pipeline component.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised while answering a query.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The search backend could not be reached or returned garbage.
    #[error("search unavailable: {0}")]
    SearchUnavailable(String),

    /// The embedding provider failed or returned a malformed batch.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The language model failed to complete or stream.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Malformed input to a pure component (e.g. mismatched vector lengths).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A component failure caught at the orchestrator boundary.
    #[error("pipeline failed while {stage}: {source}")]
    PipelineFailure {
        stage: Stage,
        #[source]
        source: Box<PipelineError>,
    },

    /// The consumer stopped listening; in-flight work was abandoned.
    #[error("request cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Wrap a component error with the stage it occurred in.
    ///
    /// Already-wrapped errors and cancellations are returned unchanged.
    pub fn at_stage(self, stage: Stage) -> Self {
        match self {
            Self::PipelineFailure { .. } | Self::Cancelled => self,
            other => Self::PipelineFailure {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// True when the error is (or wraps) a capability timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::PipelineFailure { source, .. } => source.is_timeout(),
            Self::SearchUnavailable(msg)
            | Self::EmbeddingUnavailable(msg)
            | Self::ModelUnavailable(msg) => msg.starts_with("timed out"),
            _ => false,
        }
    }

    /// Short machine-readable code, used in HTTP error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PipelineFailure { source, .. } => source.code(),
            _ if self.is_timeout() => "timeout",
            Self::SearchUnavailable(_)
            | Self::EmbeddingUnavailable(_)
            | Self::ModelUnavailable(_) => "upstream_unavailable",
            Self::InvalidInput(_) => "invalid_input",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Pipeline stages, named for logs and [`PipelineError::PipelineFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Rewriting,
    Searching,
    Reranking,
    Generating,
}

impl Stage {
    /// The error a capability call in this stage produces when it times out.
    pub fn timeout_error(self, limit: Duration) -> PipelineError {
        let msg = format!("timed out after {:.1}s", limit.as_secs_f64());
        match self {
            Stage::Rewriting | Stage::Generating => PipelineError::ModelUnavailable(msg),
            Stage::Searching => PipelineError::SearchUnavailable(msg),
            Stage::Reranking => PipelineError::EmbeddingUnavailable(msg),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Rewriting => "rewriting",
            Stage::Searching => "searching",
            Stage::Reranking => "reranking",
            Stage::Generating => "generating",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_stage_wraps_once() {
        let err = PipelineError::SearchUnavailable("boom".into()).at_stage(Stage::Searching);
        let twice = err.at_stage(Stage::Generating);
        match twice {
            PipelineError::PipelineFailure { stage, source } => {
                assert_eq!(stage, Stage::Searching);
                assert!(matches!(*source, PipelineError::SearchUnavailable(_)));
            }
            other => panic!("expected PipelineFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_error_maps_to_capability() {
        let limit = Duration::from_secs(3);
        assert!(matches!(
            Stage::Searching.timeout_error(limit),
            PipelineError::SearchUnavailable(_)
        ));
        assert!(matches!(
            Stage::Reranking.timeout_error(limit),
            PipelineError::EmbeddingUnavailable(_)
        ));
        assert!(matches!(
            Stage::Generating.timeout_error(limit),
            PipelineError::ModelUnavailable(_)
        ));
        assert!(Stage::Rewriting.timeout_error(limit).is_timeout());
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            PipelineError::ModelUnavailable("401".into()).code(),
            "upstream_unavailable"
        );
        let wrapped = Stage::Searching
            .timeout_error(Duration::from_secs(1))
            .at_stage(Stage::Searching);
        assert_eq!(wrapped.code(), "timeout");
        assert_eq!(PipelineError::InvalidInput("x".into()).code(), "invalid_input");
    }
}
