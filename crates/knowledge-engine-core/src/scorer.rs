//! Relevance scoring capability.
//!
//! The ranker only ever talks to a [`Scorer`]. Which implementation is
//! active is decided once, when the engine is built from configuration:
//!
//! - [`SubstringScorer`]: case-insensitive containment, constant score.
//! - [`EmbeddingScorer`]: cosine similarity against an [`Embedder`].
//!
//! Every implementation must return a finite score in `[0.0, 1.0]`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{EngineError, Result};
use crate::models::Chunk;

/// Score returned by [`SubstringScorer`] for a match unless configured.
pub const DEFAULT_MATCH_SCORE: f64 = 0.8;

/// Computes how well a chunk answers a query.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Score `chunk` against `query` in `[0.0, 1.0]`; `0.0` means irrelevant.
    async fn score(&self, query: &str, chunk: &Chunk) -> Result<f64>;
}

/// Case-insensitive substring matcher.
///
/// Returns `match_score` when the chunk text contains the query text,
/// `0.0` otherwise. The constant is a placeholder relevance, not a graded
/// signal.
#[derive(Debug, Clone)]
pub struct SubstringScorer {
    match_score: f64,
}

impl SubstringScorer {
    pub fn new(match_score: f64) -> Result<Self> {
        if !(match_score > 0.0 && match_score <= 1.0) {
            return Err(EngineError::validation(format!(
                "match score must be in (0, 1], got {}",
                match_score
            )));
        }
        Ok(Self { match_score })
    }
}

impl Default for SubstringScorer {
    fn default() -> Self {
        Self {
            match_score: DEFAULT_MATCH_SCORE,
        }
    }
}

#[async_trait]
impl Scorer for SubstringScorer {
    async fn score(&self, query: &str, chunk: &Chunk) -> Result<f64> {
        let needle = query.to_lowercase();
        if chunk.content.to_lowercase().contains(&needle) {
            Ok(self.match_score)
        } else {
            Ok(0.0)
        }
    }
}

/// Query vectors kept by [`EmbeddingScorer`] before the cache is reset.
const QUERY_CACHE_CAPACITY: usize = 64;

/// Cosine-similarity scorer backed by an [`Embedder`].
///
/// Uses the chunk's stored embedding when present and embeds the chunk text
/// on the fly otherwise. Query embeddings are cached by query text, so
/// concurrent retrievals each embed their query once. Negative similarities
/// clamp to 0.
///
/// Every vector must have exactly `embedder.dims()` entries. A stored
/// embedding from another model or dimension setting fails the call with
/// `ScoringBackend` instead of scoring as irrelevant.
pub struct EmbeddingScorer {
    embedder: Arc<dyn Embedder>,
    query_cache: Mutex<HashMap<String, Arc<Vec<f32>>>>,
}

impl EmbeddingScorer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            query_cache: Mutex::new(HashMap::new()),
        }
    }

    async fn query_vector(&self, query: &str) -> Result<Arc<Vec<f32>>> {
        {
            let cache = self.query_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(vec) = cache.get(query) {
                return Ok(Arc::clone(vec));
            }
        }

        let vec = self.embed_one(query).await?;
        self.check_dims("query", &vec)?;
        let vec = Arc::new(vec);

        let mut cache = self.query_cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.len() >= QUERY_CACHE_CAPACITY {
            cache.clear();
        }
        cache.insert(query.to_string(), Arc::clone(&vec));
        Ok(vec)
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::scoring("embedder returned no vector"))
    }

    fn check_dims(&self, what: &str, vec: &[f32]) -> Result<()> {
        let expected = self.embedder.dims();
        if vec.len() != expected {
            return Err(EngineError::scoring(format!(
                "{} embedding has {} dimensions, {} expects {}",
                what,
                vec.len(),
                self.embedder.model_name(),
                expected
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Scorer for EmbeddingScorer {
    async fn score(&self, query: &str, chunk: &Chunk) -> Result<f64> {
        let query_vec = self.query_vector(query).await?;
        let sim = match &chunk.embedding {
            Some(v) => {
                self.check_dims(&format!("chunk {}", chunk.id), v)?;
                cosine_similarity(&query_vec, v)
            }
            None => {
                let v = self.embed_one(&chunk.content).await?;
                self.check_dims(&format!("chunk {}", chunk.id), &v)?;
                cosine_similarity(&query_vec, &v)
            }
        };
        Ok(f64::from(sim).clamp(0.0, 1.0))
    }
}
