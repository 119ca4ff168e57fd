use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use knowledge_engine::config::{parse_config, Config, ReingestPolicy};
use knowledge_engine::engine::{KnowledgeEngine, RetrieveOptions};
use knowledge_engine::sqlite_store::SqliteStore;
use knowledge_engine::ErrorKind;
use knowledge_engine_core::chunk::{build_chunks, chunk_text};
use knowledge_engine_core::embedding::Embedder;
use knowledge_engine_core::models::{Chunk, Metadata};
use knowledge_engine_core::scorer::{EmbeddingScorer, Scorer, SubstringScorer};
use knowledge_engine_core::store::memory::InMemoryStore;
use knowledge_engine_core::store::Store;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn test_config(extra: &str) -> Config {
    parse_config(&format!("[db]\npath = \"unused.sqlite\"\n{}", extra)).unwrap()
}

fn memory_engine(extra: &str) -> KnowledgeEngine<InMemoryStore> {
    KnowledgeEngine::from_config(Arc::new(InMemoryStore::new()), test_config(extra)).unwrap()
}

async fn sqlite_engine(tmp: &TempDir, extra: &str) -> KnowledgeEngine<SqliteStore> {
    let config = parse_config(&format!(
        "[db]\npath = \"{}/kb.sqlite\"\n{}",
        tmp.path().display(),
        extra
    ))
    .unwrap();
    KnowledgeEngine::open(config).await.unwrap()
}

fn meta(value: serde_json::Value) -> Metadata {
    value.as_object().cloned().unwrap()
}

/// Counts occurrences of "cat" and "dog".
struct PetEmbedder;

#[async_trait]
impl Embedder for PetEmbedder {
    fn model_name(&self) -> &str {
        "pets"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, texts: &[String]) -> knowledge_engine_core::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                vec![t.matches("cat").count() as f32, t.matches("dog").count() as f32]
            })
            .collect())
    }
}

/// Sleeps before every embedding call.
struct SlowEmbedder(Duration);

#[async_trait]
impl Embedder for SlowEmbedder {
    fn model_name(&self) -> &str {
        "slow"
    }
    fn dims(&self) -> usize {
        1
    }
    async fn embed(&self, texts: &[String]) -> knowledge_engine_core::Result<Vec<Vec<f32>>> {
        tokio::time::sleep(self.0).await;
        Ok(texts.iter().map(|_| vec![1.0]).collect())
    }
}

/// Sleeps before every score.
struct SlowScorer(Duration);

#[async_trait]
impl Scorer for SlowScorer {
    async fn score(&self, _query: &str, _chunk: &Chunk) -> knowledge_engine_core::Result<f64> {
        tokio::time::sleep(self.0).await;
        Ok(0.5)
    }
}

// ============ Ingestion ============

#[tokio::test]
async fn test_chunk_counts_follow_max_chunk_size() {
    let text = "Alpha facts.\n\nBeta facts.\n\nGamma facts.";

    let engine = memory_engine("[chunking]\nmax_chunk_size = 100\n");
    let kb = engine.create_knowledge_base("ws", "Facts", None).await.unwrap();
    let doc = engine.ingest(&kb.id, "facts.txt", text, None).await.unwrap();
    assert_eq!(doc.chunk_count, 1);

    let engine = memory_engine("[chunking]\nmax_chunk_size = 15\n");
    let kb = engine.create_knowledge_base("ws", "Facts", None).await.unwrap();
    let doc = engine.ingest(&kb.id, "facts.txt", text, None).await.unwrap();
    assert_eq!(doc.chunk_count, 3);

    let stored = engine.get_document(&doc.id).await.unwrap();
    let positions: Vec<i64> = stored.chunks.iter().map(|c| c.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);
    assert_eq!(stored.chunks[1].content, "Beta facts.");
}

#[tokio::test]
async fn test_ingest_response_shape() {
    let engine = memory_engine("");
    let kb = engine.create_knowledge_base("ws", "Docs", None).await.unwrap();
    let doc = engine
        .ingest(
            &kb.id,
            "  report.pdf ",
            "Quarterly numbers.",
            Some(meta(json!({"fileType": "pdf", "fileSize": 1024}))),
        )
        .await
        .unwrap();

    assert_eq!(doc.name, "report.pdf");
    assert_eq!(doc.content, "Quarterly numbers.");
    assert_eq!(doc.metadata["fileType"], "pdf");

    let value = serde_json::to_value(&doc).unwrap();
    for key in ["id", "name", "content", "metadata", "createdAt", "chunkCount"] {
        assert!(value.get(key).is_some(), "missing {}", key);
    }
}

#[tokio::test]
async fn test_ingest_validation_errors() {
    let engine = memory_engine("[ingestion]\nmax_name_chars = 10\nmax_content_bytes = 32\n");
    let kb = engine.create_knowledge_base("ws", "Docs", None).await.unwrap();

    let oversized = "x".repeat(33);
    let cases = [
        ("", "content"),
        ("name-that-is-too-long", "content"),
        ("ok", ""),
        ("ok", "   \n\n  "),
        ("ok", oversized.as_str()),
    ];
    for (name, content) in cases {
        let err = engine.ingest(&kb.id, name, content, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{:?}/{:?}", name, content);
    }

    assert!(engine.list_documents(&kb.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ingest_into_missing_kb_is_not_found() {
    let engine = memory_engine("");
    let err = engine.ingest("missing", "a.txt", "text", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_reingest_missing_document_is_not_found() {
    let engine = memory_engine("");
    let err = engine.reingest("missing", "text", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_reingest_replaces_chunk_set() {
    let engine = memory_engine("[chunking]\nmax_chunk_size = 15\n");
    let kb = engine.create_knowledge_base("ws", "Docs", None).await.unwrap();
    let doc = engine
        .ingest(&kb.id, "a.txt", "One.\n\nTwo.\n\nThree three.", Some(meta(json!({"v": 1}))))
        .await
        .unwrap();

    let updated = engine
        .reingest(&doc.id, "Completely new text.", None)
        .await
        .unwrap();
    assert_eq!(updated.id, doc.id);
    assert_eq!(updated.created_at, doc.created_at);
    assert_eq!(updated.chunk_count, 1);
    assert_eq!(updated.metadata["v"], 1, "metadata kept when none supplied");

    let stored = engine.get_document(&doc.id).await.unwrap();
    assert_eq!(stored.chunks.len(), 1);
    assert_eq!(stored.chunks[0].content, "Completely new text.");
    assert_eq!(stored.chunks[0].position, 0);
}

#[tokio::test]
async fn test_reingest_identical_content_is_a_no_op() {
    let engine = memory_engine("");
    let kb = engine.create_knowledge_base("ws", "Docs", None).await.unwrap();
    let doc = engine.ingest(&kb.id, "a.txt", "Same.\n\nText.", None).await.unwrap();
    let before = engine.get_document(&doc.id).await.unwrap();

    let again = engine.reingest(&doc.id, "Same.\n\nText.", None).await.unwrap();
    assert_eq!(again.chunk_count, before.chunks.len());

    let after = engine.get_document(&doc.id).await.unwrap();
    assert_eq!(after.document.updated_at, before.document.updated_at);
    let ids = |d: &knowledge_engine_core::models::DocumentWithChunks| {
        d.chunks.iter().map(|c| c.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&after), ids(&before));

    engine
        .reingest(&doc.id, "Same.\n\nText.", Some(meta(json!({"tag": "new"}))))
        .await
        .unwrap();
    let retagged = engine.get_document(&doc.id).await.unwrap();
    assert_eq!(retagged.document.metadata["tag"], "new");
    assert_ne!(ids(&retagged), ids(&before));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reingest_leaves_exactly_one_version() {
    let engine = Arc::new(memory_engine("[chunking]\nmax_chunk_size = 12\n"));
    let kb = engine.create_knowledge_base("ws", "Docs", None).await.unwrap();

    let a = "Alpha one.\n\nAlpha two.";
    let b = "Beta one.\n\nBeta two.\n\nBeta three.";
    let a_chunks = chunk_text(a, 12);
    let b_chunks = chunk_text(b, 12);

    for round in 0..20 {
        let doc = engine
            .ingest(&kb.id, &format!("doc-{}", round), "Start.", None)
            .await
            .unwrap();

        let reader = {
            let engine = Arc::clone(&engine);
            let kb_id = kb.id.clone();
            let doc_id = doc.id.clone();
            tokio::spawn(async move {
                for _ in 0..10 {
                    let result = engine.retrieve(&kb_id, "a", Some(50), None).await.unwrap();
                    let mut versions: Vec<&str> = result
                        .chunks
                        .iter()
                        .filter(|c| c.document_id == doc_id)
                        .map(|c| c.content.split(' ').next().unwrap_or(""))
                        .collect();
                    versions.dedup();
                    assert!(versions.len() <= 1, "mixed chunk sets: {:?}", versions);
                    tokio::task::yield_now().await;
                }
            })
        };

        let (ra, rb) = {
            let ea = Arc::clone(&engine);
            let eb = Arc::clone(&engine);
            let (ida, idb) = (doc.id.clone(), doc.id.clone());
            tokio::join!(
                tokio::spawn(async move { ea.reingest(&ida, a, None).await }),
                tokio::spawn(async move { eb.reingest(&idb, b, None).await }),
            )
        };
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();
        reader.await.unwrap();

        let stored = engine.get_document(&doc.id).await.unwrap();
        let contents: Vec<String> = stored.chunks.iter().map(|c| c.content.clone()).collect();
        let expected = if stored.document.content == a { &a_chunks } else { &b_chunks };
        assert_eq!(&contents, expected);
        let positions: Vec<i64> = stored.chunks.iter().map(|c| c.position).collect();
        assert_eq!(positions, (0..expected.len() as i64).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_reject_policy_returns_conflict() {
    let config = test_config("[ingestion]\nreingest_policy = \"reject\"\n");
    assert_eq!(config.ingestion.reingest_policy, ReingestPolicy::Reject);

    let embedder: Arc<dyn Embedder> = Arc::new(SlowEmbedder(Duration::from_millis(300)));
    let engine = Arc::new(KnowledgeEngine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(SubstringScorer::default()),
        Some(embedder),
        config,
    ));
    let kb = engine.create_knowledge_base("ws", "Docs", None).await.unwrap();
    let doc = engine.ingest(&kb.id, "a.txt", "First.", None).await.unwrap();

    let first = {
        let engine = Arc::clone(&engine);
        let id = doc.id.clone();
        tokio::spawn(async move { engine.reingest(&id, "Second.", None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = engine.reingest(&doc.id, "Third.", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.is_retryable());

    first.await.unwrap().unwrap();
    let stored = engine.get_document(&doc.id).await.unwrap();
    assert_eq!(stored.document.content, "Second.");
}

// ============ Retrieval ============

#[tokio::test]
async fn test_retrieve_france_scenario() {
    let engine = memory_engine("");
    let kb = engine.create_knowledge_base("ws", "Travel", None).await.unwrap();
    let a = engine
        .ingest(&kb.id, "a.txt", "Paris is the capital of France.", None)
        .await
        .unwrap();
    engine
        .ingest(&kb.id, "b.txt", "Berlin is the capital of Germany.", None)
        .await
        .unwrap();

    let result = engine.retrieve(&kb.id, "France", Some(5), None).await.unwrap();
    assert_eq!(result.chunks.len(), 1);
    assert_eq!(result.chunks[0].document_id, a.id);
    assert!(result.chunks[0].score > 0.0);
}

#[tokio::test]
async fn test_retrieve_empty_kb_and_missing_kb() {
    let engine = memory_engine("");
    let kb = engine.create_knowledge_base("ws", "Empty", None).await.unwrap();
    let result = engine.retrieve(&kb.id, "anything", None, None).await.unwrap();
    assert!(result.chunks.is_empty());

    let err = engine.retrieve("missing", "anything", None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_retrieve_validation_and_limit_clamp() {
    let engine = memory_engine("[retrieval]\ndefault_limit = 2\nmax_limit = 3\n");
    let kb = engine.create_knowledge_base("ws", "Docs", None).await.unwrap();
    for i in 0..5 {
        engine
            .ingest(&kb.id, &format!("{}.txt", i), "shared words", None)
            .await
            .unwrap();
    }

    let err = engine.retrieve(&kb.id, "  ", None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = engine.retrieve(&kb.id, "shared", Some(0), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let result = engine.retrieve(&kb.id, "shared", None, None).await.unwrap();
    assert_eq!(result.chunks.len(), 2);
    let result = engine.retrieve(&kb.id, "shared", Some(100), None).await.unwrap();
    assert_eq!(result.chunks.len(), 3);
}

#[tokio::test]
async fn test_retrieve_ties_favor_earlier_document_then_position() {
    let engine = memory_engine("[chunking]\nmax_chunk_size = 10\n");
    let kb = engine.create_knowledge_base("ws", "Docs", None).await.unwrap();
    let first = engine
        .ingest(&kb.id, "first.txt", "rust one\n\nrust two", None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = engine
        .ingest(&kb.id, "second.txt", "rust three", None)
        .await
        .unwrap();

    for _ in 0..3 {
        let result = engine.retrieve(&kb.id, "rust", None, None).await.unwrap();
        let order: Vec<(String, i64)> = result
            .chunks
            .iter()
            .map(|c| (c.document_id.clone(), c.position))
            .collect();
        assert_eq!(
            order,
            vec![
                (first.id.clone(), 0),
                (first.id.clone(), 1),
                (second.id.clone(), 0)
            ]
        );
    }
}

#[tokio::test]
async fn test_retrieve_metadata_filter() {
    let engine = memory_engine("");
    let kb = engine.create_knowledge_base("ws", "Docs", None).await.unwrap();
    engine
        .ingest(&kb.id, "a.pdf", "budget report", Some(meta(json!({"fileType": "pdf"}))))
        .await
        .unwrap();
    let txt = engine
        .ingest(&kb.id, "b.txt", "budget notes", Some(meta(json!({"fileType": "txt"}))))
        .await
        .unwrap();

    let result = engine
        .retrieve(&kb.id, "budget", None, Some(meta(json!({"fileType": "txt"}))))
        .await
        .unwrap();
    assert_eq!(result.chunks.len(), 1);
    assert_eq!(result.chunks[0].document_id, txt.id);

    let result = engine
        .retrieve(&kb.id, "budget", None, Some(meta(json!({"index": 0, "fileType": "pdf"}))))
        .await
        .unwrap();
    assert_eq!(result.chunks.len(), 1);
    assert_eq!(result.chunks[0].document_name, "a.pdf");
}

#[tokio::test]
async fn test_retrieve_scorer_timeout_fails_query() {
    let engine = KnowledgeEngine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(SlowScorer(Duration::from_secs(5))),
        None,
        test_config(""),
    );
    let kb = engine.create_knowledge_base("ws", "Docs", None).await.unwrap();
    engine.ingest(&kb.id, "a.txt", "text", None).await.unwrap();

    let options = RetrieveOptions {
        scorer_timeout: Some(Duration::from_millis(20)),
        cancel: None,
    };
    let err = engine
        .retrieve_with(&kb.id, "text", None, None, options)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ScoringBackend);
}

#[tokio::test]
async fn test_retrieve_cancellation() {
    let engine = Arc::new(KnowledgeEngine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(SlowScorer(Duration::from_millis(200))),
        None,
        test_config(""),
    ));
    let kb = engine.create_knowledge_base("ws", "Docs", None).await.unwrap();
    for i in 0..3 {
        engine
            .ingest(&kb.id, &format!("{}.txt", i), "text", None)
            .await
            .unwrap();
    }

    let token = CancellationToken::new();
    token.cancel();
    let options = RetrieveOptions {
        scorer_timeout: None,
        cancel: Some(token),
    };
    let err = engine
        .retrieve_with(&kb.id, "text", None, None, options)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    let token = CancellationToken::new();
    let pending = {
        let engine = Arc::clone(&engine);
        let kb_id = kb.id.clone();
        let options = RetrieveOptions {
            scorer_timeout: None,
            cancel: Some(token.clone()),
        };
        tokio::spawn(async move {
            engine
                .retrieve_with(&kb_id, "text", None, None, options)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();
    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_embedding_scorer_ranks_by_similarity() {
    let embedder: Arc<dyn Embedder> = Arc::new(PetEmbedder);
    let engine = KnowledgeEngine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(EmbeddingScorer::new(Arc::clone(&embedder))),
        Some(embedder),
        test_config("[chunking]\nmax_chunk_size = 12\n"),
    );
    let kb = engine.create_knowledge_base("ws", "Pets", None).await.unwrap();
    let doc = engine
        .ingest(&kb.id, "pets.txt", "cat and dog\n\ncat cat\n\ndog only", None)
        .await
        .unwrap();

    let stored = engine.get_document(&doc.id).await.unwrap();
    assert!(stored.chunks.iter().all(|c| c.embedding.is_some()));

    let result = engine.retrieve(&kb.id, "cat", None, None).await.unwrap();
    let contents: Vec<&str> = result.chunks.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(contents, vec!["cat cat", "cat and dog"]);
    assert!((result.chunks[0].score - 1.0).abs() < 1e-6);
}

// ============ Knowledge bases ============

#[tokio::test]
async fn test_knowledge_base_operations() {
    let engine = memory_engine("");

    let err = engine.create_knowledge_base("ws", "x", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let older = engine
        .create_knowledge_base("ws", "Older", Some("first one"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let newer = engine.create_knowledge_base("ws", "Newer", None).await.unwrap();
    engine.create_knowledge_base("other", "Elsewhere", None).await.unwrap();

    let listed: Vec<String> = engine
        .list_knowledge_bases("ws")
        .await
        .unwrap()
        .into_iter()
        .map(|kb| kb.id)
        .collect();
    assert_eq!(listed, vec![newer.id.clone(), older.id.clone()]);

    let fetched = engine.get_knowledge_base(&older.id).await.unwrap();
    assert_eq!(fetched.description.as_deref(), Some("first one"));

    let err = engine.get_knowledge_base("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = engine.list_documents("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ============ SQLite ============

#[tokio::test]
async fn test_sqlite_ingest_retrieve_reingest() {
    let tmp = TempDir::new().unwrap();
    let engine = sqlite_engine(&tmp, "[chunking]\nmax_chunk_size = 15\n").await;

    let kb = engine.create_knowledge_base("ws", "Travel", None).await.unwrap();
    let a = engine
        .ingest(
            &kb.id,
            "a.txt",
            "About France.\n\nAbout wine.",
            Some(meta(json!({"fileType": "txt"}))),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let b = engine
        .ingest(&kb.id, "b.txt", "About Spain.", None)
        .await
        .unwrap();
    assert_eq!(a.chunk_count, 2);

    let result = engine.retrieve(&kb.id, "about", None, None).await.unwrap();
    let order: Vec<(String, i64)> = result
        .chunks
        .iter()
        .map(|c| (c.document_id.clone(), c.position))
        .collect();
    assert_eq!(
        order,
        vec![(a.id.clone(), 0), (a.id.clone(), 1), (b.id.clone(), 0)]
    );

    let summaries = engine.list_documents(&kb.id).await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].id, b.id, "newest first");
    assert_eq!(summaries[1].chunk_count, 2);

    engine.reingest(&a.id, "Only Portugal now.", None).await.unwrap();
    let stored = engine.get_document(&a.id).await.unwrap();
    assert_eq!(stored.chunks.len(), 1);
    assert_eq!(stored.document.metadata["fileType"], "txt");

    let result = engine.retrieve(&kb.id, "france", None, None).await.unwrap();
    assert!(result.chunks.is_empty());
}

#[tokio::test]
async fn test_sqlite_persists_across_reopen_with_embeddings() {
    let tmp = TempDir::new().unwrap();
    let doc_id = {
        let engine = sqlite_engine(&tmp, "").await;
        let embedder: Arc<dyn Embedder> = Arc::new(PetEmbedder);
        let engine = KnowledgeEngine::new(
            Arc::clone(engine.store()),
            Arc::new(SubstringScorer::default()),
            Some(embedder),
            engine.config().clone(),
        );
        let kb = engine.create_knowledge_base("ws", "Pets", None).await.unwrap();
        let doc = engine
            .ingest(&kb.id, "pets.txt", "cat dog dog", None)
            .await
            .unwrap();
        engine.store().pool().close().await;
        doc.id
    };

    let engine = sqlite_engine(&tmp, "").await;
    let stored = engine.get_document(&doc_id).await.unwrap();
    assert_eq!(stored.chunks.len(), 1);
    assert_eq!(stored.chunks[0].embedding, Some(vec![1.0, 2.0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_concurrent_reingest() {
    let tmp = TempDir::new().unwrap();
    let engine = Arc::new(sqlite_engine(&tmp, "[chunking]\nmax_chunk_size = 12\n").await);
    let kb = engine.create_knowledge_base("ws", "Docs", None).await.unwrap();
    let doc = engine.ingest(&kb.id, "doc", "Start.", None).await.unwrap();

    let a = "Alpha one.\n\nAlpha two.";
    let b = "Beta one.\n\nBeta two.\n\nBeta three.";

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let id = doc.id.clone();
            let content = if i % 2 == 0 { a } else { b };
            tokio::spawn(async move { engine.reingest(&id, content, None).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = engine.get_document(&doc.id).await.unwrap();
    let contents: Vec<String> = stored.chunks.iter().map(|c| c.content.clone()).collect();
    assert_eq!(contents, chunk_text(&stored.document.content, 12));
    assert!(stored.document.content == a || stored.document.content == b);
}

#[tokio::test]
async fn test_sqlite_store_rejects_cross_kb_document_move() {
    let tmp = TempDir::new().unwrap();
    let engine = sqlite_engine(&tmp, "").await;
    let kb1 = engine.create_knowledge_base("ws", "One", None).await.unwrap();
    let kb2 = engine.create_knowledge_base("ws", "Two", None).await.unwrap();
    let doc = engine.ingest(&kb1.id, "a.txt", "text", None).await.unwrap();

    let mut moved = engine.get_document(&doc.id).await.unwrap().document;
    moved.knowledge_base_id = kb2.id.clone();
    let err = engine.store().write_document(&moved, &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let mut orphan = moved.clone();
    orphan.id = "orphan".to_string();
    orphan.knowledge_base_id = "missing".to_string();
    let err = engine.store().write_document(&orphan, &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

async fn assert_failed_write_keeps_previous_version<S: Store>(engine: &KnowledgeEngine<S>) {
    let kb = engine.create_knowledge_base("ws", "Docs", None).await.unwrap();
    let doc = engine.ingest(&kb.id, "a.txt", "one\n\ntwo", None).await.unwrap();
    let before = engine.get_document(&doc.id).await.unwrap();
    assert_eq!(before.chunks.len(), 2);

    let mut next = before.document.clone();
    next.content = "three\n\nfour".to_string();
    let mut chunks = build_chunks(&next.id, chunk_text(&next.content, 3));
    chunks[1].position = 0;
    let err = engine.store().write_document(&next, &chunks).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    let after = engine.get_document(&doc.id).await.unwrap();
    assert_eq!(after.document.content, "one\n\ntwo");
    let contents: Vec<&str> = after.chunks.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "two"]);
    let ids = |d: &knowledge_engine_core::models::DocumentWithChunks| {
        d.chunks.iter().map(|c| c.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&after), ids(&before));

    let result = engine.retrieve(&kb.id, "three", None, None).await.unwrap();
    assert!(result.chunks.is_empty());
}

#[tokio::test]
async fn test_sqlite_failed_write_keeps_previous_version() {
    let tmp = TempDir::new().unwrap();
    let engine = sqlite_engine(&tmp, "[chunking]\nmax_chunk_size = 3\n").await;
    assert_failed_write_keeps_previous_version(&engine).await;
}

#[tokio::test]
async fn test_memory_failed_write_keeps_previous_version() {
    let engine = memory_engine("[chunking]\nmax_chunk_size = 3\n");
    assert_failed_write_keeps_previous_version(&engine).await;
}

#[tokio::test]
async fn test_stored_embedding_of_other_dimension_fails_retrieval() {
    let embedder: Arc<dyn Embedder> = Arc::new(PetEmbedder);
    let engine = KnowledgeEngine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(EmbeddingScorer::new(Arc::clone(&embedder))),
        None,
        test_config(""),
    );
    let kb = engine.create_knowledge_base("ws", "Pets", None).await.unwrap();
    let doc = engine.ingest(&kb.id, "pets.txt", "cat", None).await.unwrap();

    let mut stored = engine.get_document(&doc.id).await.unwrap();
    stored.chunks[0].embedding = Some(vec![1.0, 0.0, 0.0]);
    engine
        .store()
        .write_document(&stored.document, &stored.chunks)
        .await
        .unwrap();

    let err = engine.retrieve(&kb.id, "cat", None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ScoringBackend);
}
