//! Storage abstraction for the Knowledge Engine.
//!
//! The [`Store`] trait defines every persistence operation needed by the
//! ingestion and retrieval pipeline, enabling pluggable backends (SQLite in
//! the app crate, [`memory::InMemoryStore`] for tests).
//!
//! The store handle is passed explicitly to every operation; nothing in the
//! engine reaches for a global connection.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Chunk, Document, DocumentSummary, DocumentWithChunks, KnowledgeBase, KnowledgeBaseSnapshot,
};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_knowledge_base`](Store::create_knowledge_base) | Insert a knowledge base |
/// | [`get_knowledge_base`](Store::get_knowledge_base) | Fetch one knowledge base |
/// | [`list_knowledge_bases`](Store::list_knowledge_bases) | Knowledge bases of a workspace, newest first |
/// | [`write_document`](Store::write_document) | Atomically upsert a document and replace its chunks |
/// | [`get_document`](Store::get_document) | Document with chunks in position order |
/// | [`list_documents`](Store::list_documents) | Document summaries, newest first |
/// | [`snapshot`](Store::snapshot) | Consistent view of a knowledge base for ranking |
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()>;

    async fn get_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBase>>;

    async fn list_knowledge_bases(&self, workspace_id: &str) -> Result<Vec<KnowledgeBase>>;

    /// Insert or update `doc` and replace its entire chunk set with `chunks`.
    ///
    /// Both changes become visible together or not at all. Fails with
    /// `NotFound` if the document's knowledge base does not exist.
    async fn write_document(&self, doc: &Document, chunks: &[Chunk]) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<DocumentWithChunks>>;

    async fn list_documents(&self, knowledge_base_id: &str) -> Result<Vec<DocumentSummary>>;

    /// Load every document of a knowledge base with its chunks.
    ///
    /// Returns `None` if the knowledge base does not exist. Each document's
    /// chunks come from one ingestion and are in position order.
    async fn snapshot(&self, knowledge_base_id: &str) -> Result<Option<KnowledgeBaseSnapshot>>;
}
