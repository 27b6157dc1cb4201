//! End-to-end tests for session ingestion and retrieval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use docchat_rag::{
    ChunkerKind, ContextItem, Document, DocumentStore, EmbeddingProvider, HashEmbeddingProvider,
    InMemoryDocumentStore, RagConfig, RagError, Result, RetrievalPipeline, RetryPolicy,
    SessionIndexRegistry, WebSearchProvider, WebSnippet,
};

/// Hash embedder that can be switched into a failing state, and fails on any
/// text containing "poison".
struct SwitchableEmbedder {
    inner: HashEmbeddingProvider,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl SwitchableEmbedder {
    fn new() -> Self {
        Self { inner: HashEmbeddingProvider::new(64), failing: AtomicBool::new(false), calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl EmbeddingProvider for SwitchableEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) || text.contains("poison") {
            return Err(RagError::EmbeddingUnavailable { provider: "mock".into(), message: "503".into() });
        }
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Embeds questions (texts ending in `?`) at cosine 0.9 from every passage.
struct AngleEmbedder;

#[async_trait]
impl EmbeddingProvider for AngleEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.ends_with('?') {
            Ok(vec![0.9, (1.0f32 - 0.81).sqrt()])
        } else {
            Ok(vec![1.0, 0.0])
        }
    }

    fn dimensions(&self) -> usize {
        2
    }
}

struct StaticSearch {
    fail: bool,
}

#[async_trait]
impl WebSearchProvider for StaticSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSnippet>> {
        if self.fail {
            return Err(RagError::WebSearch { provider: "static".into(), message: "quota exceeded".into() });
        }
        Ok((0..max_results.min(1))
            .map(|_| WebSnippet {
                title: format!("About {query}"),
                url: "https://example.com/news".into(),
                snippet: "Latest coverage".into(),
                source: "static".into(),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "static"
    }
}

fn config() -> RagConfig {
    RagConfig::builder()
        .chunk_size(100)
        .chunk_overlap(20)
        .chunker(ChunkerKind::Fixed)
        .embedding_retry(
            RetryPolicy::new(3)
                .with_initial_backoff(Duration::from_millis(1))
                .with_attempt_timeout(Duration::from_secs(1)),
        )
        .web_retry(RetryPolicy::new(1))
        .build()
        .unwrap()
}

fn registry_with(embedder: Arc<dyn EmbeddingProvider>) -> SessionIndexRegistry {
    SessionIndexRegistry::builder().config(config()).embedding_provider(embedder).build().unwrap()
}

fn letters(n: usize) -> String {
    ('a'..='z').cycle().take(n).collect()
}

#[tokio::test]
async fn ingest_then_remove_single_document() {
    let registry = registry_with(Arc::new(HashEmbeddingProvider::new(64)));
    let doc = Document::with_id("doc1", "letters.txt", letters(250));

    let summary = registry.add_document("s1", &doc).await.unwrap();
    assert_eq!(summary.chunk_count, 3);
    let session = registry.get("s1").await.unwrap();
    assert_eq!(session.len().await, 3);

    assert_eq!(registry.remove_document("s1", "doc1").await.unwrap(), 3);
    assert_eq!(session.len().await, 0);
    assert!(session.documents().await.is_empty());
}

#[tokio::test]
async fn empty_session_without_web_returns_empty_result() {
    let registry = registry_with(Arc::new(SwitchableEmbedder::new()));
    let pipeline = RetrievalPipeline::builder().registry(registry.clone()).build().unwrap();

    let result = pipeline.retrieve("never-seen", "anything?", 5, false).await.unwrap();
    assert!(result.is_empty());
    assert!(!result.web_degraded);

    registry.get_or_create("created").await;
    let result = pipeline.retrieve("created", "anything?", 5, false).await.unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn query_embedding_failure_surfaces_after_retries() {
    let embedder = Arc::new(SwitchableEmbedder::new());
    let registry = registry_with(embedder.clone());
    let search = Arc::new(StaticSearch { fail: false });
    let pipeline =
        RetrievalPipeline::builder().registry(registry.clone()).web_search_provider(search).build().unwrap();

    registry.add_document("s", &Document::with_id("d", "a.txt", "rust ownership rules")).await.unwrap();
    embedder.failing.store(true, Ordering::SeqCst);
    let before = embedder.calls.load(Ordering::SeqCst);

    let err = pipeline.retrieve("s", "ownership?", 5, true).await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingUnavailable { .. }));
    assert_eq!(embedder.calls.load(Ordering::SeqCst) - before, 3);
}

#[tokio::test]
async fn web_snippet_is_fused_below_strong_passage() {
    let registry = registry_with(Arc::new(AngleEmbedder));
    let pipeline = RetrievalPipeline::builder()
        .registry(registry.clone())
        .web_search_provider(Arc::new(StaticSearch { fail: false }))
        .build()
        .unwrap();
    registry.add_document("s", &Document::with_id("d", "notes.txt", "quarterly revenue grew")).await.unwrap();

    let result = pipeline.retrieve("s", "how did revenue change?", 5, true).await.unwrap();
    assert_eq!(result.len(), 2);
    match &result.items[0] {
        ContextItem::Chunk(c) => assert!((c.score - 0.9).abs() < 1e-5),
        other => panic!("expected passage first, got {other:?}"),
    }
    assert!(matches!(result.items[1], ContextItem::Web(_)));
    assert!((result.items[1].score() - 0.45).abs() < 1e-5);
    assert!(result.format_context().contains("Web search results:"));
}

#[tokio::test]
async fn web_failure_degrades_to_document_context() {
    let registry = registry_with(Arc::new(HashEmbeddingProvider::new(64)));
    let pipeline = RetrievalPipeline::builder()
        .registry(registry.clone())
        .web_search_provider(Arc::new(StaticSearch { fail: true }))
        .build()
        .unwrap();
    registry.add_document("s", &Document::with_id("d", "a.txt", "borrow checker")).await.unwrap();

    let result = pipeline.retrieve("s", "borrow checker", 5, true).await.unwrap();
    assert!(result.web_degraded);
    assert_eq!(result.chunks().count(), 1);
    assert_eq!(result.web_snippets().count(), 0);
}

#[tokio::test]
async fn failed_ingestion_leaves_session_unchanged() {
    let registry = registry_with(Arc::new(SwitchableEmbedder::new()));
    let original = Document::with_id("d1", "a.txt", letters(250));
    registry.add_document("s", &original).await.unwrap();

    // The third chunk fails to embed after the first two succeed.
    let poisoned = format!("{}poison", letters(200));
    let err = registry.add_document("s", &Document::with_id("d2", "b.txt", poisoned.clone())).await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingUnavailable { .. }));

    // Re-ingesting an existing id with bad content keeps the old chunks.
    registry.add_document("s", &Document::with_id("d1", "a.txt", poisoned)).await.unwrap_err();

    let session = registry.get("s").await.unwrap();
    let info = session.info().await;
    assert_eq!(info.indexed_chunks, 3);
    assert_eq!(info.filenames(), vec!["a.txt"]);
    assert_eq!(session.chunks_for_document("d1").await[0].text, letters(100));
}

#[tokio::test]
async fn sessions_are_isolated() {
    let registry = registry_with(Arc::new(HashEmbeddingProvider::new(64)));
    let pipeline = RetrievalPipeline::builder().registry(registry.clone()).build().unwrap();
    registry.add_document("alice", &Document::with_id("d", "a.txt", "alice secret plan")).await.unwrap();
    registry.add_document("bob", &Document::with_id("d", "b.txt", "bob grocery list")).await.unwrap();

    let result = pipeline.retrieve("bob", "secret plan", 5, false).await.unwrap();
    assert!(result.chunks().all(|c| c.filename == "b.txt"));

    assert!(registry.delete("alice").await);
    let result = pipeline.retrieve("alice", "secret plan", 5, false).await.unwrap();
    assert!(result.is_empty());
    assert_eq!(registry.session_ids().await, vec!["bob".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingestion_and_queries() {
    let registry = registry_with(Arc::new(HashEmbeddingProvider::new(64)));
    let pipeline = RetrievalPipeline::builder().registry(registry.clone()).build().unwrap();

    let mut handles = Vec::new();
    for s in 0..4 {
        for d in 0..5 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let doc = Document::with_id(format!("d{d}"), format!("f{d}.txt"), letters(250));
                registry.add_document(&format!("s{s}"), &doc).await.map(|_| ())
            }));
        }
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            pipeline.retrieve(&format!("s{s}"), "abc", 5, false).await.map(|_| ())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for s in 0..4 {
        let info = registry.get(&format!("s{s}")).await.unwrap().info().await;
        assert_eq!(info.document_count(), 5);
        assert_eq!(info.indexed_chunks, 15);
    }
}

#[tokio::test]
async fn export_and_import_preserve_results() {
    let registry = registry_with(Arc::new(HashEmbeddingProvider::new(64)));
    let pipeline = RetrievalPipeline::builder().registry(registry.clone()).build().unwrap();
    registry.add_document("s", &Document::with_id("d1", "a.txt", "tokio runtime tasks")).await.unwrap();
    registry.add_document("s", &Document::with_id("d2", "b.txt", "serde derive macros")).await.unwrap();

    let bytes = registry.export_session("s").await.unwrap();
    let restored = registry.import_session("copy", &bytes).await.unwrap();
    assert_eq!(restored.documents().await, registry.get("s").await.unwrap().documents().await);

    let a = pipeline.retrieve("s", "runtime", 5, false).await.unwrap();
    let b = pipeline.retrieve("copy", "runtime", 5, false).await.unwrap();
    assert_eq!(a.items, b.items);

    assert!(matches!(registry.export_session("missing").await, Err(RagError::SessionNotFound(_))));
    assert!(registry.import_session("bad", b"not a snapshot").await.is_err());
}

#[tokio::test]
async fn import_rejects_other_dimension() {
    let small = registry_with(Arc::new(HashEmbeddingProvider::new(8)));
    small.add_document("s", &Document::with_id("d", "a.txt", "text")).await.unwrap();
    let bytes = small.export_session("s").await.unwrap();

    let large = registry_with(Arc::new(HashEmbeddingProvider::new(64)));
    let err = large.import_session("s", &bytes).await.unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { expected: 64, actual: 8 }));
}

#[tokio::test]
async fn ingest_from_store_reads_document_text() {
    let store = InMemoryDocumentStore::new();
    store.put_document("s", Document::with_id("d", "a.txt", letters(150))).await;
    let registry = registry_with(Arc::new(HashEmbeddingProvider::new(64)));

    let summary = registry.ingest_from_store(&store, "s", "d").await.unwrap();
    assert_eq!(summary.chunk_count, 2);
    assert_eq!(store.list_documents("s").await.unwrap().len(), 1);

    let err = registry.ingest_from_store(&store, "s", "missing").await.unwrap_err();
    assert!(matches!(err, RagError::DocumentNotFound(_)));
}

/// Embedder that takes longer than the caller is willing to wait.
struct SlowEmbedder;

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(vec![1.0, 0.0])
    }

    fn dimensions(&self) -> usize {
        2
    }
}

#[tokio::test(start_paused = true)]
async fn caller_deadline_abandons_wait_but_not_work() {
    let registry = registry_with(Arc::new(SlowEmbedder));
    let doc = Document::with_id("d", "a.txt", "short text");

    let err = registry.add_document_within("s", doc, Duration::from_millis(50)).await.unwrap_err();
    assert!(matches!(err, RagError::Timeout { .. }));

    tokio::time::sleep(Duration::from_millis(500)).await;
    let session = registry.get("s").await.unwrap();
    assert_eq!(session.len().await, 1);
}

/// Hash embedder that counts which path each text came through.
struct CountingEmbedder {
    inner: HashEmbeddingProvider,
    passages: AtomicUsize,
    queries: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.passages.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

#[tokio::test]
async fn questions_are_embedded_as_queries() {
    let embedder = Arc::new(CountingEmbedder {
        inner: HashEmbeddingProvider::new(64),
        passages: AtomicUsize::new(0),
        queries: AtomicUsize::new(0),
    });
    let registry = registry_with(embedder.clone());
    let pipeline = RetrievalPipeline::builder().registry(registry.clone()).build().unwrap();

    registry.add_document("s", &Document::with_id("d", "a.txt", letters(250))).await.unwrap();
    assert_eq!(embedder.passages.load(Ordering::SeqCst), 3);
    assert_eq!(embedder.queries.load(Ordering::SeqCst), 0);

    pipeline.retrieve("s", &letters(100), 5, false).await.unwrap();
    assert_eq!(embedder.passages.load(Ordering::SeqCst), 3);
    assert_eq!(embedder.queries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn context_budget_below_chunk_size_keeps_top_passage() {
    let config = RagConfig::builder()
        .chunk_size(100)
        .chunk_overlap(20)
        .chunker(ChunkerKind::Fixed)
        .max_context_chars(50)
        .build()
        .unwrap();
    let registry = SessionIndexRegistry::builder()
        .config(config)
        .embedding_provider(Arc::new(HashEmbeddingProvider::new(64)))
        .build()
        .unwrap();
    let pipeline = RetrievalPipeline::builder().registry(registry.clone()).build().unwrap();
    registry.add_document("s", &Document::with_id("d", "a.txt", letters(100))).await.unwrap();

    let result = pipeline.retrieve("s", &letters(100), 5, false).await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].text(), letters(50));
}
