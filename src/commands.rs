//! CLI command handlers.
//!
//! Each `run_*` function backs one `kbe` subcommand: it calls the engine and
//! prints the result to stdout. `search` prints JSON; the others print
//! aligned text lines.

use std::path::Path;

use anyhow::{Context, Result};
use knowledge_engine_core::models::Metadata;
use serde_json::Value;

use crate::engine::KnowledgeEngine;
use crate::sqlite_store::SqliteStore;

type Engine = KnowledgeEngine<SqliteStore>;

/// Parse `KEY=VALUE`. Values that parse as JSON (numbers, booleans,
/// quoted strings) keep their type; anything else is a string.
pub fn parse_key_val(s: &str) -> std::result::Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in '{}'", s));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn to_metadata(pairs: Vec<(String, Value)>) -> Metadata {
    pairs.into_iter().collect()
}

/// Read a text file and describe it the way the upload path does:
/// `fileType` (extension) and `fileSize` (bytes).
fn read_document(path: &Path) -> Result<(String, Metadata)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;

    let mut metadata = Metadata::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        metadata.insert("fileType".to_string(), Value::from(ext.to_lowercase()));
    }
    metadata.insert("fileSize".to_string(), Value::from(content.len() as u64));
    Ok((content, metadata))
}

pub async fn run_kb_create(
    engine: &Engine,
    workspace: &str,
    name: &str,
    description: Option<&str>,
) -> Result<()> {
    let kb = engine
        .create_knowledge_base(workspace, name, description)
        .await?;
    println!("created knowledge base");
    println!("  id:        {}", kb.id);
    println!("  name:      {}", kb.name);
    println!("  workspace: {}", kb.workspace_id);
    Ok(())
}

pub async fn run_kb_list(engine: &Engine, workspace: &str) -> Result<()> {
    let kbs = engine.list_knowledge_bases(workspace).await?;
    if kbs.is_empty() {
        println!("No knowledge bases in workspace {}.", workspace);
        return Ok(());
    }
    for kb in kbs {
        println!(
            "{}  {}  {}",
            kb.id,
            kb.created_at.format("%Y-%m-%d %H:%M:%S"),
            kb.name
        );
    }
    Ok(())
}

pub async fn run_kb_show(engine: &Engine, id: &str) -> Result<()> {
    let kb = engine.get_knowledge_base(id).await?;
    let docs = engine.list_documents(id).await?;
    println!("--- Knowledge Base ---");
    println!("id:           {}", kb.id);
    println!("name:         {}", kb.name);
    println!("workspace:    {}", kb.workspace_id);
    if let Some(ref description) = kb.description {
        println!("description:  {}", description);
    }
    println!("created_at:   {}", kb.created_at.to_rfc3339());
    println!("documents:    {}", docs.len());
    println!(
        "chunks:       {}",
        docs.iter().map(|d| d.chunk_count).sum::<usize>()
    );
    Ok(())
}

pub async fn run_ingest(
    engine: &Engine,
    kb_id: &str,
    file: &Path,
    name: Option<&str>,
    meta: Vec<(String, Value)>,
) -> Result<()> {
    let (content, mut metadata) = read_document(file)?;
    metadata.extend(to_metadata(meta));

    let name = match name {
        Some(n) => n.to_string(),
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Cannot derive a document name; pass --name")?,
    };

    let doc = engine.ingest(kb_id, &name, &content, Some(metadata)).await?;
    println!("ingest {}", doc.name);
    println!("  id:     {}", doc.id);
    println!("  chunks: {}", doc.chunk_count);
    println!("ok");
    Ok(())
}

pub async fn run_reingest(
    engine: &Engine,
    document_id: &str,
    file: &Path,
    meta: Vec<(String, Value)>,
) -> Result<()> {
    let existing = engine.get_document(document_id).await?;
    let (content, file_metadata) = read_document(file)?;

    let mut metadata = existing.document.metadata;
    metadata.extend(file_metadata);
    metadata.extend(to_metadata(meta));

    let doc = engine
        .reingest(document_id, &content, Some(metadata))
        .await?;
    println!("reingest {}", doc.name);
    println!("  id:     {}", doc.id);
    println!("  chunks: {}", doc.chunk_count);
    println!("ok");
    Ok(())
}

pub async fn run_docs(engine: &Engine, kb_id: &str) -> Result<()> {
    let docs = engine.list_documents(kb_id).await?;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    for doc in docs {
        println!(
            "{}  {}  {:>4} chunks  {}",
            doc.id,
            doc.updated_at.format("%Y-%m-%d %H:%M:%S"),
            doc.chunk_count,
            doc.name
        );
    }
    Ok(())
}

pub async fn run_get(engine: &Engine, id: &str) -> Result<()> {
    let entry = engine.get_document(id).await?;
    let doc = &entry.document;

    println!("--- Document ---");
    println!("id:             {}", doc.id);
    println!("name:           {}", doc.name);
    println!("knowledge_base: {}", doc.knowledge_base_id);
    println!("created_at:     {}", doc.created_at.to_rfc3339());
    println!("updated_at:     {}", doc.updated_at.to_rfc3339());
    if !doc.metadata.is_empty() {
        println!(
            "metadata:       {}",
            serde_json::to_string(&doc.metadata).context("Failed to encode metadata")?
        );
    }
    println!();
    println!("--- Chunks ({}) ---", entry.chunks.len());
    for chunk in &entry.chunks {
        let embedded = if chunk.embedding.is_some() { " [embedded]" } else { "" };
        println!("[{}]{}", chunk.position, embedded);
        println!("{}", chunk.content);
        println!();
    }
    Ok(())
}

pub async fn run_search(
    engine: &Engine,
    kb_id: &str,
    query: &str,
    limit: Option<usize>,
    filters: Vec<(String, Value)>,
) -> Result<()> {
    let filter = if filters.is_empty() {
        None
    } else {
        Some(to_metadata(filters))
    };

    let result = engine.retrieve(kb_id, query, limit, filter).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to encode results")?
    );
    Ok(())
}
