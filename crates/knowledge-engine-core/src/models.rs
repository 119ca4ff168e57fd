//! Core data models for the ingestion and retrieval pipeline.
//!
//! Persistent records ([`KnowledgeBase`], [`Document`], [`Chunk`]) are
//! written by ingestion; [`Query`] and [`ScoredChunk`] are transient values
//! that live for a single retrieval call.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Opaque string → JSON metadata attached to documents and chunks.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Number of results returned when a query does not specify a limit.
pub const DEFAULT_QUERY_LIMIT: usize = 5;

/// A named collection of documents scoped to a workspace.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBase {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A named unit of ingested text owned by a [`KnowledgeBase`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub knowledge_base_id: String,
    pub name: String,
    pub content: String,
    pub metadata: Metadata,
    /// SHA-256 over the chunk size and content; equal hashes mean an
    /// identical chunk set.
    #[serde(skip)]
    pub dedup_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A paragraph-aligned slice of a document's text, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// 0-based position within the document.
    pub position: i64,
    pub content: String,
    pub metadata: Metadata,
    /// SHA-256 of `content`.
    #[serde(skip)]
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Reference into an external vector index, if one is in use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
}

/// A document together with its chunks in position order.
#[derive(Debug, Clone)]
pub struct DocumentWithChunks {
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

/// Point-in-time view of a knowledge base used by the ranker.
///
/// Each document's chunk set comes from a single ingestion; a snapshot never
/// mixes chunks from two versions of one document.
#[derive(Debug, Clone)]
pub struct KnowledgeBaseSnapshot {
    pub knowledge_base: KnowledgeBase,
    pub documents: Vec<DocumentWithChunks>,
}

/// Listing row for a document, without its content.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    pub knowledge_base_id: String,
    pub name: String,
    pub metadata: Metadata,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of `ingest` / `reingest`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestedDocument {
    pub id: String,
    pub name: String,
    pub content: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub chunk_count: usize,
}

impl IngestedDocument {
    pub fn new(document: &Document, chunk_count: usize) -> Self {
        Self {
            id: document.id.clone(),
            name: document.name.clone(),
            content: document.content.clone(),
            metadata: document.metadata.clone(),
            created_at: document.created_at,
            chunk_count,
        }
    }
}

/// A retrieval request against one knowledge base.
#[derive(Debug, Clone)]
pub struct Query {
    pub knowledge_base_id: String,
    pub text: String,
    pub limit: usize,
    /// Every entry must equal the chunk's or its document's metadata value.
    pub filter: Option<Metadata>,
}

impl Query {
    pub fn new(knowledge_base_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            knowledge_base_id: knowledge_base_id.into(),
            text: text.into(),
            limit: DEFAULT_QUERY_LIMIT,
            filter: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_filter(mut self, filter: Metadata) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// A ranked chunk with document provenance for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    /// Relevance in `[0.0, 1.0]`.
    pub score: f64,
    pub document_id: String,
    pub document_name: String,
    pub position: i64,
}

/// Response shape of `retrieve`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunks: Vec<ScoredChunk>,
}
