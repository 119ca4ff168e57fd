//! Scorer selection and per-call time limits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use knowledge_engine_core::embedding::Embedder;
use knowledge_engine_core::models::Chunk;
use knowledge_engine_core::scorer::{EmbeddingScorer, Scorer, SubstringScorer};
use knowledge_engine_core::EngineError;

use crate::config::{Config, ScorerBackend};

/// Build the scorer named by `scoring.backend`.
pub fn create_scorer(config: &Config, embedder: Option<Arc<dyn Embedder>>) -> Result<Arc<dyn Scorer>> {
    match config.scoring.backend {
        ScorerBackend::Substring => Ok(Arc::new(SubstringScorer::new(config.scoring.match_score)?)),
        ScorerBackend::Embedding => match embedder {
            Some(embedder) => Ok(Arc::new(EmbeddingScorer::new(embedder))),
            None => bail!("scoring.backend = \"embedding\" requires an embedding provider"),
        },
    }
}

/// Bounds every call of the wrapped scorer by `timeout`.
///
/// An elapsed call fails with `ScoringBackend`.
pub struct TimeoutScorer<'a> {
    inner: &'a dyn Scorer,
    timeout: Duration,
}

impl<'a> TimeoutScorer<'a> {
    pub fn new(inner: &'a dyn Scorer, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<'a> Scorer for TimeoutScorer<'a> {
    async fn score(&self, query: &str, chunk: &Chunk) -> knowledge_engine_core::Result<f64> {
        match tokio::time::timeout(self.timeout, self.inner.score(query, chunk)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::scoring(format!(
                "scorer timed out after {:?} on chunk {}",
                self.timeout, chunk.id
            ))),
        }
    }
}
