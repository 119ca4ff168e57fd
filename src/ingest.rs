//! Ingestion support: input validation, chunk preparation, and per-document
//! serialization of re-ingestion.
//!
//! Preparation runs chunking and, when an embedder is configured, inline
//! embedding. Embedding failure is non-fatal: the chunks are stored without
//! vectors and the scorer embeds them on demand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use knowledge_engine_core::chunk::{build_chunks, chunk_text};
use knowledge_engine_core::embedding::Embedder;
use knowledge_engine_core::models::Chunk;
use knowledge_engine_core::{EngineError, Result};
use tokio::sync::OwnedMutexGuard;

use crate::config::{IngestionConfig, ReingestPolicy};

pub const MIN_KB_NAME_CHARS: usize = 2;
pub const MAX_KB_NAME_CHARS: usize = 50;
pub const MAX_KB_DESCRIPTION_CHARS: usize = 500;

/// Registry of per-document async locks.
///
/// Entries nobody holds or waits on are pruned whenever a lock is acquired,
/// so the map only grows with the number of documents being re-ingested at
/// the same time.
#[derive(Default)]
pub struct DocumentLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `document_id`.
    ///
    /// Under [`ReingestPolicy::Queue`] this waits for the current holder;
    /// under [`ReingestPolicy::Reject`] a held lock is a `Conflict`.
    pub async fn acquire(
        &self,
        document_id: &str,
        policy: ReingestPolicy,
    ) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(document_id.to_string()).or_default())
        };

        match policy {
            ReingestPolicy::Queue => {
                if let Ok(guard) = Arc::clone(&lock).try_lock_owned() {
                    return Ok(guard);
                }
                tracing::debug!(document_id, "waiting for in-flight re-ingestion");
                Ok(lock.lock_owned().await)
            }
            ReingestPolicy::Reject => lock.try_lock_owned().map_err(|_| {
                EngineError::Conflict(format!(
                    "document {} is already being re-ingested",
                    document_id
                ))
            }),
        }
    }

    /// Number of registry entries, held or not yet pruned.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trim and check a document name.
pub fn validate_name(name: &str, config: &IngestionConfig) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::validation("document name must not be empty"));
    }
    let chars = name.chars().count();
    if chars > config.max_name_chars {
        return Err(EngineError::validation(format!(
            "document name is {} characters, maximum is {}",
            chars, config.max_name_chars
        )));
    }
    Ok(name.to_string())
}

/// Reject blank or oversized document content.
pub fn validate_content(content: &str, config: &IngestionConfig) -> Result<()> {
    if content.trim().is_empty() {
        return Err(EngineError::validation("document content must not be empty"));
    }
    if content.len() > config.max_content_bytes {
        return Err(EngineError::validation(format!(
            "document content is {} bytes, maximum is {}",
            content.len(),
            config.max_content_bytes
        )));
    }
    Ok(())
}

/// Trim and check a knowledge base name and description.
pub fn validate_knowledge_base(
    name: &str,
    description: Option<&str>,
) -> Result<(String, Option<String>)> {
    let name = name.trim();
    let chars = name.chars().count();
    if !(MIN_KB_NAME_CHARS..=MAX_KB_NAME_CHARS).contains(&chars) {
        return Err(EngineError::validation(format!(
            "knowledge base name must be {}-{} characters",
            MIN_KB_NAME_CHARS, MAX_KB_NAME_CHARS
        )));
    }

    let description = description.map(str::trim).filter(|d| !d.is_empty());
    if let Some(d) = description {
        if d.chars().count() > MAX_KB_DESCRIPTION_CHARS {
            return Err(EngineError::validation(format!(
                "knowledge base description must be at most {} characters",
                MAX_KB_DESCRIPTION_CHARS
            )));
        }
    }

    Ok((name.to_string(), description.map(str::to_string)))
}

/// Chunk `content` for `document_id` and attach embeddings when possible.
pub async fn prepare_chunks(
    document_id: &str,
    content: &str,
    max_chunk_size: usize,
    embedder: Option<&dyn Embedder>,
) -> Vec<Chunk> {
    let mut chunks = build_chunks(document_id, chunk_text(content, max_chunk_size));

    if let Some(embedder) = embedder {
        embed_inline(embedder, &mut chunks).await;
    }

    chunks
}

async fn embed_inline(embedder: &dyn Embedder, chunks: &mut [Chunk]) {
    if chunks.is_empty() {
        return;
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    match embedder.embed(&texts).await {
        Ok(vectors) if vectors.len() == chunks.len() => {
            for (chunk, vector) in chunks.iter_mut().zip(vectors) {
                chunk.embedding = Some(vector);
            }
        }
        Ok(vectors) => {
            tracing::warn!(
                model = embedder.model_name(),
                expected = chunks.len(),
                got = vectors.len(),
                "embedder returned wrong vector count; storing chunks without embeddings"
            );
        }
        Err(e) => {
            tracing::warn!(
                model = embedder.model_name(),
                error = %e,
                "inline embedding failed; storing chunks without embeddings"
            );
        }
    }
}
