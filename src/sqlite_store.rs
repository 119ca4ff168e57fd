//! SQLite-backed [`Store`] implementation.
//!
//! Document upserts and chunk replacement share one transaction. Snapshots
//! are read with a single `documents LEFT JOIN chunks` statement, so a
//! concurrent re-ingestion is seen either entirely or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use knowledge_engine_core::embedding::{blob_to_vec, vec_to_blob};
use knowledge_engine_core::error::{EngineError, Result};
use knowledge_engine_core::models::{
    Chunk, Document, DocumentSummary, DocumentWithChunks, KnowledgeBase, KnowledgeBaseSnapshot,
    Metadata,
};
use knowledge_engine_core::store::Store;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| EngineError::storage(format!("invalid timestamp: {}", micros)))
}

fn parse_metadata(json: &str) -> Result<Metadata> {
    match serde_json::from_str::<serde_json::Value>(json)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Ok(Metadata::new()),
    }
}

fn metadata_json(metadata: &Metadata) -> Result<String> {
    Ok(serde_json::to_string(metadata)?)
}

fn kb_from_row(row: &SqliteRow) -> Result<KnowledgeBase> {
    Ok(KnowledgeBase {
        id: row.try_get("id").map_err(EngineError::storage)?,
        workspace_id: row.try_get("workspace_id").map_err(EngineError::storage)?,
        name: row.try_get("name").map_err(EngineError::storage)?,
        description: row.try_get("description").map_err(EngineError::storage)?,
        created_at: from_micros(row.try_get("created_at").map_err(EngineError::storage)?)?,
    })
}

/// Reads the `doc_`-prefixed columns of a documents row.
fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let metadata: String = row.try_get("doc_metadata").map_err(EngineError::storage)?;
    Ok(Document {
        id: row.try_get("doc_id").map_err(EngineError::storage)?,
        knowledge_base_id: row.try_get("doc_kb_id").map_err(EngineError::storage)?,
        name: row.try_get("doc_name").map_err(EngineError::storage)?,
        content: row.try_get("doc_content").map_err(EngineError::storage)?,
        metadata: parse_metadata(&metadata)?,
        dedup_hash: row.try_get("doc_dedup_hash").map_err(EngineError::storage)?,
        created_at: from_micros(row.try_get("doc_created_at").map_err(EngineError::storage)?)?,
        updated_at: from_micros(row.try_get("doc_updated_at").map_err(EngineError::storage)?)?,
    })
}

/// Reads the `chunk_`-prefixed columns; `None` for the NULL side of a LEFT JOIN.
fn chunk_from_row(row: &SqliteRow) -> Result<Option<Chunk>> {
    let id: Option<String> = row.try_get("chunk_id").map_err(EngineError::storage)?;
    let Some(id) = id else {
        return Ok(None);
    };
    let metadata: String = row.try_get("chunk_metadata").map_err(EngineError::storage)?;
    let embedding: Option<Vec<u8>> = row.try_get("chunk_embedding").map_err(EngineError::storage)?;
    Ok(Some(Chunk {
        id,
        document_id: row.try_get("chunk_document_id").map_err(EngineError::storage)?,
        position: row.try_get("chunk_index").map_err(EngineError::storage)?,
        content: row.try_get("chunk_content").map_err(EngineError::storage)?,
        metadata: parse_metadata(&metadata)?,
        hash: row.try_get("chunk_hash").map_err(EngineError::storage)?,
        embedding: embedding.map(|b| blob_to_vec(&b)),
        external_ref: row.try_get("chunk_external_ref").map_err(EngineError::storage)?,
    }))
}

const DOCUMENT_COLUMNS: &str = "d.id AS doc_id, d.knowledge_base_id AS doc_kb_id, d.name AS doc_name, \
     d.content AS doc_content, d.metadata_json AS doc_metadata, d.dedup_hash AS doc_dedup_hash, \
     d.created_at AS doc_created_at, d.updated_at AS doc_updated_at";

const CHUNK_COLUMNS: &str = "c.id AS chunk_id, c.document_id AS chunk_document_id, \
     c.chunk_index AS chunk_index, c.content AS chunk_content, c.metadata_json AS chunk_metadata, \
     c.hash AS chunk_hash, c.embedding AS chunk_embedding, c.external_ref AS chunk_external_ref";

/// Group joined rows (ordered by document) into documents with chunks.
fn group_rows(rows: &[SqliteRow]) -> Result<Vec<DocumentWithChunks>> {
    let mut out: Vec<DocumentWithChunks> = Vec::new();
    for row in rows {
        let doc_id: String = row.try_get("doc_id").map_err(EngineError::storage)?;
        let is_new = out.last().map_or(true, |last| last.document.id != doc_id);
        if is_new {
            out.push(DocumentWithChunks {
                document: document_from_row(row)?,
                chunks: Vec::new(),
            });
        }
        if let (Some(chunk), Some(entry)) = (chunk_from_row(row)?, out.last_mut()) {
            entry.chunks.push(chunk);
        }
    }
    Ok(out)
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO knowledge_bases (id, workspace_id, name, description, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&kb.id)
        .bind(&kb.workspace_id)
        .bind(&kb.name)
        .bind(&kb.description)
        .bind(to_micros(&kb.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(EngineError::Conflict(
                format!("knowledge base {} already exists", kb.id),
            )),
            Err(e) => Err(EngineError::storage(e)),
        }
    }

    async fn get_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBase>> {
        let row = sqlx::query(
            "SELECT id, workspace_id, name, description, created_at FROM knowledge_bases WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(EngineError::storage)?;

        row.as_ref().map(kb_from_row).transpose()
    }

    async fn list_knowledge_bases(&self, workspace_id: &str) -> Result<Vec<KnowledgeBase>> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, name, description, created_at FROM knowledge_bases \
             WHERE workspace_id = ? ORDER BY created_at DESC, id ASC",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::storage)?;

        rows.iter().map(kb_from_row).collect()
    }

    async fn write_document(&self, doc: &Document, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(EngineError::storage)?;

        // The upsert is the first statement so the transaction takes the
        // write lock up front instead of upgrading from a read snapshot.
        let upserted = sqlx::query(
            r#"
            INSERT INTO documents (id, knowledge_base_id, name, content, metadata_json,
                                   dedup_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                content = excluded.content,
                metadata_json = excluded.metadata_json,
                dedup_hash = excluded.dedup_hash,
                updated_at = excluded.updated_at
            WHERE documents.knowledge_base_id = excluded.knowledge_base_id
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.knowledge_base_id)
        .bind(&doc.name)
        .bind(&doc.content)
        .bind(metadata_json(&doc.metadata)?)
        .bind(&doc.dedup_hash)
        .bind(to_micros(&doc.created_at))
        .bind(to_micros(&doc.updated_at))
        .execute(&mut *tx)
        .await;

        match upserted {
            Ok(done) if done.rows_affected() == 0 => {
                return Err(EngineError::validation(format!(
                    "document {} belongs to another knowledge base",
                    doc.id
                )));
            }
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                return Err(EngineError::not_found(
                    "knowledge base",
                    &doc.knowledge_base_id,
                ));
            }
            Err(e) => return Err(EngineError::storage(e)),
        }

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await
            .map_err(EngineError::storage)?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, content, metadata_json,
                                    hash, embedding, external_ref)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&doc.id)
            .bind(chunk.position)
            .bind(&chunk.content)
            .bind(metadata_json(&chunk.metadata)?)
            .bind(&chunk.hash)
            .bind(chunk.embedding.as_deref().map(vec_to_blob))
            .bind(&chunk.external_ref)
            .execute(&mut *tx)
            .await
            .map_err(EngineError::storage)?;
        }

        tx.commit().await.map_err(EngineError::storage)?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentWithChunks>> {
        let sql = format!(
            "SELECT {}, {} FROM documents d LEFT JOIN chunks c ON c.document_id = d.id \
             WHERE d.id = ? ORDER BY c.chunk_index ASC",
            DOCUMENT_COLUMNS, CHUNK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(EngineError::storage)?;

        Ok(group_rows(&rows)?.into_iter().next())
    }

    async fn list_documents(&self, knowledge_base_id: &str) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.knowledge_base_id, d.name, d.metadata_json, d.created_at, d.updated_at,
                   (SELECT COUNT(*) FROM chunks c WHERE c.document_id = d.id) AS chunk_count
            FROM documents d
            WHERE d.knowledge_base_id = ?
            ORDER BY d.created_at DESC, d.id ASC
            "#,
        )
        .bind(knowledge_base_id)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::storage)?;

        rows.iter()
            .map(|row| {
                let metadata: String = row.try_get("metadata_json").map_err(EngineError::storage)?;
                let chunk_count: i64 = row.try_get("chunk_count").map_err(EngineError::storage)?;
                Ok(DocumentSummary {
                    id: row.try_get("id").map_err(EngineError::storage)?,
                    knowledge_base_id: row
                        .try_get("knowledge_base_id")
                        .map_err(EngineError::storage)?,
                    name: row.try_get("name").map_err(EngineError::storage)?,
                    metadata: parse_metadata(&metadata)?,
                    chunk_count: chunk_count as usize,
                    created_at: from_micros(row.try_get("created_at").map_err(EngineError::storage)?)?,
                    updated_at: from_micros(row.try_get("updated_at").map_err(EngineError::storage)?)?,
                })
            })
            .collect()
    }

    async fn snapshot(&self, knowledge_base_id: &str) -> Result<Option<KnowledgeBaseSnapshot>> {
        let Some(knowledge_base) = self.get_knowledge_base(knowledge_base_id).await? else {
            return Ok(None);
        };

        let sql = format!(
            "SELECT {}, {} FROM documents d LEFT JOIN chunks c ON c.document_id = d.id \
             WHERE d.knowledge_base_id = ? \
             ORDER BY d.created_at ASC, d.id ASC, c.chunk_index ASC",
            DOCUMENT_COLUMNS, CHUNK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(knowledge_base_id)
            .fetch_all(&self.pool)
            .await
            .map_err(EngineError::storage)?;

        Ok(Some(KnowledgeBaseSnapshot {
            knowledge_base,
            documents: group_rows(&rows)?,
        }))
    }
}
