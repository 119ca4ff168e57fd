//! Ranked top-k retrieval over a knowledge base.
//!
//! The ranker operates entirely through the [`Store`] and [`Scorer`]
//! traits. The calling application decides which scorer is active and
//! supplies a cancellation check.
//!
//! # Ranking Algorithm
//!
//! 1. Load a [`KnowledgeBaseSnapshot`] (`NotFound` if absent).
//! 2. Drop chunks that fail the metadata filter.
//! 3. Score every remaining chunk; any scorer error aborts the query.
//! 4. Discard scores `<= 0`.
//! 5. Sort by score (desc), document `created_at` (asc), chunk position
//!    (asc), document id (asc).
//! 6. Truncate to `limit`.

use std::cmp::Ordering;

use crate::error::{EngineError, Result};
use crate::models::{Chunk, Document, KnowledgeBaseSnapshot, Metadata, Query, ScoredChunk};
use crate::scorer::Scorer;
use crate::store::Store;

/// Returns `true` once the caller has given up on the query.
pub type CancelCheck<'a> = &'a (dyn Fn() -> bool + Send + Sync);

/// A check that never cancels.
pub fn never_cancelled() -> bool {
    false
}

/// Retrieve the top `query.limit` chunks of a knowledge base.
///
/// Returns an empty vector (not an error) when the knowledge base has no
/// documents or nothing scores above zero.
pub async fn retrieve<S: Store + ?Sized>(
    store: &S,
    scorer: &dyn Scorer,
    query: &Query,
    cancelled: CancelCheck<'_>,
) -> Result<Vec<ScoredChunk>> {
    validate_query(query)?;

    let snapshot = store
        .snapshot(&query.knowledge_base_id)
        .await?
        .ok_or_else(|| EngineError::not_found("knowledge base", &query.knowledge_base_id))?;

    rank(scorer, &snapshot, query, cancelled).await
}

/// Reject queries that can never produce a meaningful ranking.
pub fn validate_query(query: &Query) -> Result<()> {
    if query.text.trim().is_empty() {
        return Err(EngineError::validation("query text must not be empty"));
    }
    if query.limit == 0 {
        return Err(EngineError::validation("limit must be at least 1"));
    }
    Ok(())
}

/// Score, filter, sort, and truncate the chunks of `snapshot`.
///
/// `cancelled` is consulted before every scorer call; once it returns
/// `true` the work done so far is discarded and `Cancelled` is returned.
pub async fn rank(
    scorer: &dyn Scorer,
    snapshot: &KnowledgeBaseSnapshot,
    query: &Query,
    cancelled: CancelCheck<'_>,
) -> Result<Vec<ScoredChunk>> {
    struct Hit<'s> {
        document: &'s Document,
        chunk: &'s Chunk,
        score: f64,
    }

    let mut hits: Vec<Hit<'_>> = Vec::new();

    for entry in &snapshot.documents {
        for chunk in &entry.chunks {
            if let Some(filter) = &query.filter {
                if !matches_filter(filter, &entry.document.metadata, &chunk.metadata) {
                    continue;
                }
            }

            if cancelled() {
                return Err(EngineError::Cancelled);
            }

            let score = scorer.score(&query.text, chunk).await?;
            if !(0.0..=1.0).contains(&score) {
                return Err(EngineError::scoring(format!(
                    "score {} for chunk {} is outside [0, 1]",
                    score, chunk.id
                )));
            }
            if score > 0.0 {
                hits.push(Hit {
                    document: &entry.document,
                    chunk,
                    score,
                });
            }
        }
    }

    if cancelled() {
        return Err(EngineError::Cancelled);
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.document.created_at.cmp(&b.document.created_at))
            .then(a.chunk.position.cmp(&b.chunk.position))
            .then(a.document.id.cmp(&b.document.id))
    });
    hits.truncate(query.limit);

    Ok(hits
        .into_iter()
        .map(|h| ScoredChunk {
            id: h.chunk.id.clone(),
            content: h.chunk.content.clone(),
            metadata: h.chunk.metadata.clone(),
            score: h.score,
            document_id: h.document.id.clone(),
            document_name: h.document.name.clone(),
            position: h.chunk.position,
        })
        .collect())
}

/// Every filter entry must equal the chunk's value for that key, or the
/// document's value when the chunk lacks the key.
pub fn matches_filter(filter: &Metadata, document: &Metadata, chunk: &Metadata) -> bool {
    filter.iter().all(|(key, expected)| {
        chunk
            .get(key)
            .or_else(|| document.get(key))
            .is_some_and(|actual| actual == expected)
    })
}
