//! In-memory [`Store`] implementation for tests and embedding in other hosts.
//!
//! All records sit behind one `std::sync::RwLock`, so a document write and
//! its chunk replacement happen inside a single critical section and every
//! reader sees either the previous or the next state.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{EngineError, Result};
use crate::models::{
    Chunk, Document, DocumentSummary, DocumentWithChunks, KnowledgeBase, KnowledgeBaseSnapshot,
};

use super::Store;

#[derive(Default)]
struct State {
    knowledge_bases: HashMap<String, KnowledgeBase>,
    documents: HashMap<String, Document>,
    /// Chunks keyed by document id, kept in position order.
    chunks: HashMap<String, Vec<Chunk>>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()> {
        let mut state = self.write();
        if state.knowledge_bases.contains_key(&kb.id) {
            return Err(EngineError::Conflict(format!(
                "knowledge base {} already exists",
                kb.id
            )));
        }
        state.knowledge_bases.insert(kb.id.clone(), kb.clone());
        Ok(())
    }

    async fn get_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBase>> {
        Ok(self.read().knowledge_bases.get(id).cloned())
    }

    async fn list_knowledge_bases(&self, workspace_id: &str) -> Result<Vec<KnowledgeBase>> {
        let state = self.read();
        let mut kbs: Vec<KnowledgeBase> = state
            .knowledge_bases
            .values()
            .filter(|kb| kb.workspace_id == workspace_id)
            .cloned()
            .collect();
        kbs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(kbs)
    }

    async fn write_document(&self, doc: &Document, chunks: &[Chunk]) -> Result<()> {
        let mut state = self.write();
        if !state.knowledge_bases.contains_key(&doc.knowledge_base_id) {
            return Err(EngineError::not_found(
                "knowledge base",
                &doc.knowledge_base_id,
            ));
        }
        if let Some(existing) = state.documents.get(&doc.id) {
            if existing.knowledge_base_id != doc.knowledge_base_id {
                return Err(EngineError::validation(format!(
                    "document {} belongs to another knowledge base",
                    doc.id
                )));
            }
        }

        let mut ordered = chunks.to_vec();
        ordered.sort_by_key(|c| c.position);
        if let Some(pair) = ordered.windows(2).find(|w| w[0].position == w[1].position) {
            return Err(EngineError::storage(format!(
                "duplicate chunk position {} for document {}",
                pair[0].position, doc.id
            )));
        }

        state.documents.insert(doc.id.clone(), doc.clone());
        state.chunks.insert(doc.id.clone(), ordered);
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentWithChunks>> {
        let state = self.read();
        Ok(state.documents.get(id).map(|doc| DocumentWithChunks {
            document: doc.clone(),
            chunks: state.chunks.get(id).cloned().unwrap_or_default(),
        }))
    }

    async fn list_documents(&self, knowledge_base_id: &str) -> Result<Vec<DocumentSummary>> {
        let state = self.read();
        let mut docs: Vec<DocumentSummary> = state
            .documents
            .values()
            .filter(|d| d.knowledge_base_id == knowledge_base_id)
            .map(|d| DocumentSummary {
                id: d.id.clone(),
                knowledge_base_id: d.knowledge_base_id.clone(),
                name: d.name.clone(),
                metadata: d.metadata.clone(),
                chunk_count: state.chunks.get(&d.id).map_or(0, Vec::len),
                created_at: d.created_at,
                updated_at: d.updated_at,
            })
            .collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn snapshot(&self, knowledge_base_id: &str) -> Result<Option<KnowledgeBaseSnapshot>> {
        let state = self.read();
        let knowledge_base = match state.knowledge_bases.get(knowledge_base_id) {
            Some(kb) => kb.clone(),
            None => return Ok(None),
        };
        let mut documents: Vec<DocumentWithChunks> = state
            .documents
            .values()
            .filter(|d| d.knowledge_base_id == knowledge_base_id)
            .map(|d| DocumentWithChunks {
                document: d.clone(),
                chunks: state.chunks.get(&d.id).cloned().unwrap_or_default(),
            })
            .collect();
        documents.sort_by(|a, b| {
            a.document
                .created_at
                .cmp(&b.document.created_at)
                .then(a.document.id.cmp(&b.document.id))
        });
        Ok(Some(KnowledgeBaseSnapshot {
            knowledge_base,
            documents,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{build_chunks, chunk_text, dedup_hash};
    use crate::error::ErrorKind;
    use crate::models::Metadata;
    use chrono::{Duration, Utc};

    fn kb(id: &str, workspace: &str) -> KnowledgeBase {
        KnowledgeBase {
            id: id.to_string(),
            workspace_id: workspace.to_string(),
            name: format!("kb {}", id),
            description: None,
            created_at: Utc::now(),
        }
    }

    fn doc(id: &str, kb_id: &str, content: &str) -> Document {
        let now = Utc::now();
        Document {
            id: id.to_string(),
            knowledge_base_id: kb_id.to_string(),
            name: format!("{}.txt", id),
            content: content.to_string(),
            metadata: Metadata::new(),
            dedup_hash: dedup_hash(100, content),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_write_requires_knowledge_base() {
        let store = InMemoryStore::new();
        let d = doc("d1", "missing", "text");
        let err = store.write_document(&d, &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(store.get_document("d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_replaces_whole_chunk_set() {
        let store = InMemoryStore::new();
        store.create_knowledge_base(&kb("kb1", "ws")).await.unwrap();

        let d = doc("d1", "kb1", "a\n\nb\n\nc");
        let first = build_chunks("d1", chunk_text(&d.content, 1));
        store.write_document(&d, &first).await.unwrap();
        assert_eq!(store.get_document("d1").await.unwrap().unwrap().chunks.len(), 3);

        let d2 = doc("d1", "kb1", "z");
        let second = build_chunks("d1", chunk_text(&d2.content, 1));
        store.write_document(&d2, &second).await.unwrap();

        let stored = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(stored.document.content, "z");
        assert_eq!(stored.chunks.len(), 1);
        assert_eq!(stored.chunks[0].content, "z");
    }

    #[tokio::test]
    async fn test_duplicate_knowledge_base_conflicts() {
        let store = InMemoryStore::new();
        store.create_knowledge_base(&kb("kb1", "ws")).await.unwrap();
        let err = store.create_knowledge_base(&kb("kb1", "ws")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_list_documents_newest_first_with_counts() {
        let store = InMemoryStore::new();
        store.create_knowledge_base(&kb("kb1", "ws")).await.unwrap();

        let mut older = doc("old", "kb1", "x\n\ny");
        older.created_at = Utc::now() - Duration::seconds(60);
        store
            .write_document(&older, &build_chunks("old", chunk_text(&older.content, 1)))
            .await
            .unwrap();
        let newer = doc("new", "kb1", "z");
        store
            .write_document(&newer, &build_chunks("new", chunk_text(&newer.content, 1)))
            .await
            .unwrap();

        let docs = store.list_documents("kb1").await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(docs[1].chunk_count, 2);
    }

    #[tokio::test]
    async fn test_list_knowledge_bases_by_workspace() {
        let store = InMemoryStore::new();
        store.create_knowledge_base(&kb("a", "ws1")).await.unwrap();
        store.create_knowledge_base(&kb("b", "ws2")).await.unwrap();
        let kbs = store.list_knowledge_bases("ws1").await.unwrap();
        assert_eq!(kbs.len(), 1);
        assert_eq!(kbs[0].id, "a");
    }

    #[tokio::test]
    async fn test_snapshot_missing_and_empty() {
        let store = InMemoryStore::new();
        assert!(store.snapshot("nope").await.unwrap().is_none());
        store.create_knowledge_base(&kb("kb1", "ws")).await.unwrap();
        let snap = store.snapshot("kb1").await.unwrap().unwrap();
        assert!(snap.documents.is_empty());
    }
}
