//! The [`KnowledgeEngine`] facade: every ingestion and retrieval operation
//! exposed to callers.
//!
//! The engine owns an explicitly passed store handle, the scorer chosen from
//! configuration, an optional embedder for inline embedding, and the
//! per-document lock registry. It is cheap to share behind an `Arc`.
//!
//! ```rust,no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use knowledge_engine::config::load_config;
//! use knowledge_engine::engine::KnowledgeEngine;
//!
//! let config = load_config("config/kbe.toml".as_ref())?;
//! let engine = KnowledgeEngine::open(config).await?;
//! let kb = engine.create_knowledge_base("ws-1", "Travel", None).await?;
//! engine.ingest(&kb.id, "france.md", "Paris is in France.", None).await?;
//! let result = engine.retrieve(&kb.id, "France", None, None).await?;
//! assert_eq!(result.chunks.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use knowledge_engine_core::embedding::Embedder;
use knowledge_engine_core::models::{
    Document, DocumentSummary, DocumentWithChunks, IngestedDocument, KnowledgeBase, Metadata,
    Query, RetrievalResult,
};
use knowledge_engine_core::scorer::Scorer;
use knowledge_engine_core::search;
use knowledge_engine_core::store::Store;
use knowledge_engine_core::{EngineError, Result};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::ingest::{self, DocumentLocks};
use crate::migrate;
use crate::scoring::{create_scorer, TimeoutScorer};
use crate::sqlite_store::SqliteStore;

/// Per-call overrides for [`KnowledgeEngine::retrieve_with`].
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// Bound on each scorer call; `scoring.timeout_ms` when unset.
    pub scorer_timeout: Option<Duration>,
    /// Cancelling the token aborts the retrieval with `Cancelled`.
    pub cancel: Option<CancellationToken>,
}

pub struct KnowledgeEngine<S: Store> {
    store: Arc<S>,
    scorer: Arc<dyn Scorer>,
    embedder: Option<Arc<dyn Embedder>>,
    config: Config,
    locks: DocumentLocks,
}

impl KnowledgeEngine<SqliteStore> {
    /// Open the configured SQLite database, apply migrations, and build the
    /// scorer and embedder from `config`.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;
        Self::from_config(Arc::new(SqliteStore::new(pool)), config)
    }
}

impl<S: Store> KnowledgeEngine<S> {
    pub fn new(
        store: Arc<S>,
        scorer: Arc<dyn Scorer>,
        embedder: Option<Arc<dyn Embedder>>,
        config: Config,
    ) -> Self {
        Self {
            store,
            scorer,
            embedder,
            config,
            locks: DocumentLocks::new(),
        }
    }

    /// Build the embedder and scorer named by `config` around `store`.
    pub fn from_config(store: Arc<S>, config: Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let scorer = create_scorer(&config, embedder.clone())?;
        Ok(Self::new(store, scorer, embedder, config))
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn create_knowledge_base(
        &self,
        workspace_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<KnowledgeBase> {
        if workspace_id.trim().is_empty() {
            return Err(EngineError::validation("workspace id must not be empty"));
        }
        let (name, description) = ingest::validate_knowledge_base(name, description)?;

        let kb = KnowledgeBase {
            id: Uuid::new_v4().to_string(),
            workspace_id: workspace_id.to_string(),
            name,
            description,
            created_at: Utc::now(),
        };
        self.store.create_knowledge_base(&kb).await?;

        tracing::info!(knowledge_base_id = %kb.id, workspace_id, "knowledge base created");
        Ok(kb)
    }

    pub async fn get_knowledge_base(&self, id: &str) -> Result<KnowledgeBase> {
        self.store
            .get_knowledge_base(id)
            .await?
            .ok_or_else(|| EngineError::not_found("knowledge base", id))
    }

    pub async fn list_knowledge_bases(&self, workspace_id: &str) -> Result<Vec<KnowledgeBase>> {
        self.store.list_knowledge_bases(workspace_id).await
    }

    pub async fn list_documents(&self, knowledge_base_id: &str) -> Result<Vec<DocumentSummary>> {
        self.get_knowledge_base(knowledge_base_id).await?;
        self.store.list_documents(knowledge_base_id).await
    }

    pub async fn get_document(&self, id: &str) -> Result<DocumentWithChunks> {
        self.store
            .get_document(id)
            .await?
            .ok_or_else(|| EngineError::not_found("document", id))
    }

    /// Create a document in a knowledge base and store its chunks.
    pub async fn ingest(
        &self,
        knowledge_base_id: &str,
        name: &str,
        content: &str,
        metadata: Option<Metadata>,
    ) -> Result<IngestedDocument> {
        let name = ingest::validate_name(name, &self.config.ingestion)?;
        ingest::validate_content(content, &self.config.ingestion)?;
        self.get_knowledge_base(knowledge_base_id).await?;

        let started = Instant::now();
        let max_chunk_size = self.config.chunking.max_chunk_size;
        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4().to_string(),
            knowledge_base_id: knowledge_base_id.to_string(),
            name,
            content: content.to_string(),
            metadata: metadata.unwrap_or_default(),
            dedup_hash: knowledge_engine_core::chunk::dedup_hash(max_chunk_size, content),
            created_at: now,
            updated_at: now,
        };

        let chunks = ingest::prepare_chunks(
            &document.id,
            content,
            max_chunk_size,
            self.embedder.as_deref(),
        )
        .await;
        self.store.write_document(&document, &chunks).await?;

        tracing::info!(
            document_id = %document.id,
            knowledge_base_id,
            chunks = chunks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "document ingested"
        );
        Ok(IngestedDocument::new(&document, chunks.len()))
    }

    /// Replace a document's content and its whole chunk set.
    ///
    /// Serialized per document according to `ingestion.reingest_policy`.
    /// `metadata = None` keeps the stored metadata. When neither the content
    /// hash nor the metadata would change, nothing is written.
    pub async fn reingest(
        &self,
        document_id: &str,
        content: &str,
        metadata: Option<Metadata>,
    ) -> Result<IngestedDocument> {
        ingest::validate_content(content, &self.config.ingestion)?;

        let _guard = self
            .locks
            .acquire(document_id, self.config.ingestion.reingest_policy)
            .await?;

        let existing = self.get_document(document_id).await?;
        let max_chunk_size = self.config.chunking.max_chunk_size;
        let dedup_hash = knowledge_engine_core::chunk::dedup_hash(max_chunk_size, content);
        let metadata = metadata.unwrap_or_else(|| existing.document.metadata.clone());

        if dedup_hash == existing.document.dedup_hash && metadata == existing.document.metadata {
            tracing::debug!(document_id, "content unchanged; skipping re-ingestion");
            return Ok(IngestedDocument::new(
                &existing.document,
                existing.chunks.len(),
            ));
        }

        let started = Instant::now();
        let document = Document {
            content: content.to_string(),
            metadata,
            dedup_hash,
            updated_at: Utc::now(),
            ..existing.document
        };

        let chunks = ingest::prepare_chunks(
            &document.id,
            content,
            max_chunk_size,
            self.embedder.as_deref(),
        )
        .await;
        self.store.write_document(&document, &chunks).await?;

        tracing::info!(
            document_id,
            previous_chunks = existing.chunks.len(),
            chunks = chunks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "document re-ingested"
        );
        Ok(IngestedDocument::new(&document, chunks.len()))
    }

    /// Top-ranked chunks of a knowledge base for `text`.
    ///
    /// `limit` defaults to `retrieval.default_limit` and is clamped to
    /// `retrieval.max_limit`.
    pub async fn retrieve(
        &self,
        knowledge_base_id: &str,
        text: &str,
        limit: Option<usize>,
        filter: Option<Metadata>,
    ) -> Result<RetrievalResult> {
        self.retrieve_with(knowledge_base_id, text, limit, filter, RetrieveOptions::default())
            .await
    }

    pub async fn retrieve_with(
        &self,
        knowledge_base_id: &str,
        text: &str,
        limit: Option<usize>,
        filter: Option<Metadata>,
        options: RetrieveOptions,
    ) -> Result<RetrievalResult> {
        let limit = limit
            .unwrap_or(self.config.retrieval.default_limit)
            .min(self.config.retrieval.max_limit);
        let mut query = Query::new(knowledge_base_id, text).with_limit(limit);
        if let Some(filter) = filter {
            query = query.with_filter(filter);
        }

        let timeout = options
            .scorer_timeout
            .unwrap_or_else(|| self.config.scoring.timeout());
        let scorer = TimeoutScorer::new(self.scorer.as_ref(), timeout);
        let cancel = options.cancel;
        let is_cancelled = || cancel.as_ref().is_some_and(|t| t.is_cancelled());

        let started = Instant::now();
        let ranked = search::retrieve(self.store.as_ref(), &scorer, &query, &is_cancelled);
        let chunks = match &cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(EngineError::Cancelled),
                result = ranked => result,
            },
            None => ranked.await,
        };

        let chunks = match chunks {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(knowledge_base_id, kind = %e.kind(), error = %e, "retrieval failed");
                return Err(e);
            }
        };

        tracing::info!(
            knowledge_base_id,
            limit,
            results = chunks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrieval complete"
        );
        Ok(RetrievalResult { chunks })
    }
}
