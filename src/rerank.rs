//! Similarity reranking of retrieved documents.
//!
//! All document contents are embedded in one batched call while the query
//! is embedded concurrently; documents are then scored with
//! [`cosine_similarity`], stable-sorted best first, filtered by the
//! optional threshold and truncated to the limit.

use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::error::{PipelineError, Result};
use crate::models::Document;
use crate::similarity::cosine_similarity;

/// How a focus mode filters and truncates reranked documents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankPolicy {
    /// Documents scoring at or below this are dropped.
    pub threshold: Option<f32>,
    /// Maximum documents kept after filtering.
    pub limit: usize,
}

impl RerankPolicy {
    pub fn new(threshold: Option<f32>, limit: usize) -> Self {
        Self { threshold, limit }
    }
}

/// A document with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
    /// Position in the input list.
    pub rank: usize,
}

/// Score `docs` against `query`, best first, with the original position
/// breaking ties. Documents with blank content are dropped unscored.
pub async fn score_documents(
    embedder: &dyn EmbeddingProvider,
    query: &str,
    docs: Vec<Document>,
) -> Result<Vec<ScoredDocument>> {
    let docs: Vec<(usize, Document)> = docs
        .into_iter()
        .enumerate()
        .filter(|(_, d)| d.has_content())
        .collect();
    if docs.is_empty() {
        return Ok(Vec::new());
    }

    let texts: Vec<String> = docs.iter().map(|(_, d)| d.page_content.clone()).collect();
    let (doc_vectors, query_vector) =
        tokio::try_join!(embedder.embed_texts(&texts), embedder.embed_query(query))?;

    if doc_vectors.len() != texts.len() {
        return Err(PipelineError::EmbeddingUnavailable(format!(
            "expected {} vectors, got {}",
            texts.len(),
            doc_vectors.len()
        )));
    }

    let mut scored = Vec::with_capacity(docs.len());
    for ((rank, document), vector) in docs.into_iter().zip(doc_vectors) {
        let score = cosine_similarity(&vector, &query_vector)?;
        scored.push(ScoredDocument {
            document,
            score,
            rank,
        });
    }

    // `sort_by` is stable, so equal scores keep input order.
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(scored)
}

/// Rerank `docs` by similarity to `query` under `policy`.
pub async fn rerank(
    embedder: &dyn EmbeddingProvider,
    query: &str,
    docs: Vec<Document>,
    policy: &RerankPolicy,
) -> Result<Vec<Document>> {
    let candidates = docs.len();
    let scored = score_documents(embedder, query, docs).await?;

    let kept: Vec<Document> = scored
        .into_iter()
        .filter(|s| policy.threshold.map_or(true, |t| s.score > t))
        .take(policy.limit)
        .map(|s| s.document)
        .collect();

    debug!(candidates, kept = kept.len(), "reranked documents");
    Ok(kept)
}
