//! Session-scoped index ownership.
//!
//! The [`SessionIndexRegistry`] owns one [`SessionIndex`] per chat session.
//! Each session carries its own `RwLock`, so ingestion in one session never
//! blocks queries in another, and within a session a query sees the index
//! either entirely before or entirely after a document swap.
//!
//! # Example
//!
//! ```rust,ignore
//! use docchat_rag::{Document, RagConfig, SessionIndexRegistry};
//!
//! let registry = SessionIndexRegistry::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(my_embedder))
//!     .build()?;
//!
//! registry.add_document("session-1", &Document::new("report.pdf", text)).await?;
//! registry.remove_document("session-1", &document_id).await?;
//! registry.delete("session-1").await;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::chunking::Chunker;
use crate::config::RagConfig;
use crate::document::{Chunk, Document, DocumentSummary, ScoredChunk, SessionInfo};
use crate::embedding::{EmbeddingProvider, embed_with_retry};
use crate::error::{RagError, Result};
use crate::index::{FlatIndex, IndexSnapshot, VectorIndex};
use crate::retry::run_with_deadline;
use crate::store::DocumentStore;

/// Creates an empty index of the given dimension for a new session.
pub type IndexFactory = Arc<dyn Fn(usize) -> Box<dyn VectorIndex> + Send + Sync>;

#[derive(Debug)]
struct SessionState {
    index: Box<dyn VectorIndex>,
    /// Chunk records keyed by id; vectors live only in `index`.
    chunks: HashMap<String, Chunk>,
    documents: Vec<DocumentSummary>,
}

impl SessionState {
    fn new(index: Box<dyn VectorIndex>) -> Self {
        Self { index, chunks: HashMap::new(), documents: Vec::new() }
    }
}

/// The index and document catalogue of one chat session.
#[derive(Debug)]
pub struct SessionIndex {
    session_id: String,
    dimensions: usize,
    state: RwLock<SessionState>,
}

impl SessionIndex {
    fn new(session_id: String, index: Box<dyn VectorIndex>) -> Self {
        Self { session_id, dimensions: index.dimensions(), state: RwLock::new(SessionState::new(index)) }
    }

    /// The owning session's identifier.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The vector dimension of this session's index.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of indexed chunk vectors.
    pub async fn len(&self) -> usize {
        self.state.read().await.index.len()
    }

    /// Whether the index holds no vectors.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.index.is_empty()
    }

    /// Documents in upload order.
    pub async fn documents(&self) -> Vec<DocumentSummary> {
        self.state.read().await.documents.clone()
    }

    /// Whether `document_id` belongs to this session.
    pub async fn contains_document(&self, document_id: &str) -> bool {
        self.state.read().await.documents.iter().any(|d| d.id == document_id)
    }

    /// Chunks of one document in sequence order.
    pub async fn chunks_for_document(&self, document_id: &str) -> Vec<Chunk> {
        let state = self.state.read().await;
        let mut chunks: Vec<Chunk> = state
            .index
            .chunk_ids_for_document(document_id)
            .iter()
            .filter_map(|id| state.chunks.get(id).cloned())
            .collect();
        chunks.sort_by_key(|c| c.index);
        chunks
    }

    /// Summary of the session's documents and index size.
    pub async fn info(&self) -> SessionInfo {
        let state = self.state.read().await;
        SessionInfo {
            session_id: self.session_id.clone(),
            documents: state.documents.clone(),
            indexed_chunks: state.index.len(),
        }
    }

    /// The `k` chunks most similar to `vector`.
    ///
    /// # Errors
    ///
    /// Propagates [`VectorIndex::query`] errors, including
    /// [`RagError::EmptyIndex`].
    pub async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let state = self.state.read().await;
        let hits = state.index.query(vector, k)?;
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let chunk = state.chunks.get(&hit.chunk_id)?;
                Some(ScoredChunk {
                    chunk_id: hit.chunk_id,
                    document_id: chunk.document_id.clone(),
                    index: chunk.index,
                    filename: chunk.filename().unwrap_or_default().to_string(),
                    text: chunk.text.clone(),
                    score: hit.score,
                })
            })
            .collect())
    }

    /// Swap in a document's chunks and vectors under one write lock.
    async fn commit_document(
        &self,
        document: &Document,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<DocumentSummary> {
        let entries: Vec<(String, Vec<f32>)> =
            chunks.iter().map(|c| c.id.clone()).zip(vectors).collect();
        let summary = DocumentSummary {
            id: document.id.clone(),
            filename: document.filename.clone(),
            size_bytes: document.size_bytes(),
            chunk_count: chunks.len(),
            created_at: document.created_at,
        };

        let mut state = self.state.write().await;
        let removed = state.index.replace_document(&document.id, entries)?;
        for id in removed {
            state.chunks.remove(&id);
        }
        for chunk in chunks {
            state.chunks.insert(chunk.id.clone(), chunk);
        }
        match state.documents.iter_mut().find(|d| d.id == document.id) {
            Some(existing) => *existing = summary.clone(),
            None => state.documents.push(summary.clone()),
        }
        Ok(summary)
    }

    async fn drop_document(&self, document_id: &str) -> usize {
        let mut state = self.state.write().await;
        let removed = state.index.remove_by_document(document_id);
        for id in &removed {
            state.chunks.remove(id);
        }
        state.documents.retain(|d| d.id != document_id);
        removed.len()
    }

    async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read().await;
        let index = IndexSnapshot::capture(state.index.as_ref());
        let chunks = index
            .entries
            .iter()
            .filter_map(|entry| state.chunks.get(&entry.chunk_id).cloned())
            .collect();
        SessionSnapshot {
            session_id: self.session_id.clone(),
            documents: state.documents.clone(),
            chunks,
            index,
        }
    }
}

/// Serializable form of a whole session.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionSnapshot {
    session_id: String,
    documents: Vec<DocumentSummary>,
    chunks: Vec<Chunk>,
    index: IndexSnapshot,
}

struct RegistryInner {
    config: RagConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    chunker: Arc<dyn Chunker>,
    index_factory: IndexFactory,
    sessions: RwLock<HashMap<String, Arc<SessionIndex>>>,
}

/// Owns one [`SessionIndex`] per chat session.
///
/// Cloning is cheap and every clone shares the same sessions. Construct one
/// via [`SessionIndexRegistry::builder()`].
#[derive(Clone)]
pub struct SessionIndexRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionIndexRegistry {
    /// Create a new [`SessionIndexRegistryBuilder`].
    pub fn builder() -> SessionIndexRegistryBuilder {
        SessionIndexRegistryBuilder::default()
    }

    /// Return a reference to the configuration.
    pub fn config(&self) -> &RagConfig {
        &self.inner.config
    }

    /// Return a reference to the embedding provider.
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.inner.embedding_provider
    }

    /// The session's index, created empty if it does not exist yet.
    pub async fn get_or_create(&self, session_id: &str) -> Arc<SessionIndex> {
        if let Some(existing) = self.get(session_id).await {
            return existing;
        }
        let mut sessions = self.inner.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session.id = session_id, "creating session index");
                let index = (self.inner.index_factory)(self.inner.embedding_provider.dimensions());
                Arc::new(SessionIndex::new(session_id.to_string(), index))
            })
            .clone()
    }

    /// The session's index, if it exists.
    pub async fn get(&self, session_id: &str) -> Option<Arc<SessionIndex>> {
        self.inner.sessions.read().await.get(session_id).cloned()
    }

    /// Discard a session's index and every chunk in it. Idempotent.
    ///
    /// Returns whether the session existed.
    pub async fn delete(&self, session_id: &str) -> bool {
        let removed = self.inner.sessions.write().await.remove(session_id).is_some();
        if removed {
            info!(session.id = session_id, "deleted session index");
        }
        removed
    }

    /// Identifiers of all live sessions, sorted.
    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Chunk, embed, and index a document into a session.
    ///
    /// Re-ingesting a document id replaces its previous chunks. The swap
    /// happens under the session's write lock only after every chunk has been
    /// embedded, so a failure at any point leaves the session unchanged.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidConfiguration`] if the document exceeds `max_document_bytes`
    /// - [`RagError::EmbeddingUnavailable`] once embedding retries are exhausted
    /// - [`RagError::DimensionMismatch`] if the embedder returns vectors of the wrong size
    pub async fn add_document(&self, session_id: &str, document: &Document) -> Result<DocumentSummary> {
        let config = &self.inner.config;
        if document.size_bytes() > config.max_document_bytes {
            return Err(RagError::InvalidConfiguration(format!(
                "document '{}' is {} bytes, limit is {}",
                document.id,
                document.size_bytes(),
                config.max_document_bytes
            )));
        }

        let session = self.get_or_create(session_id).await;

        // 1. Chunk the document
        let chunks = self.inner.chunker.chunk(document);

        // 2. Embed every chunk before touching the index
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(config.embed_batch_size) {
            let embedded = embed_with_retry(
                self.inner.embedding_provider.as_ref(),
                batch,
                session.dimensions(),
                &config.embedding_retry,
            )
            .await
            .map_err(|e| {
                error!(session.id = session_id, document.id = %document.id, error = %e, "embedding failed during ingestion");
                e
            })?;
            vectors.extend(embedded);
        }

        // 3. Swap into the index atomically
        let summary = session.commit_document(document, chunks, vectors).await?;

        info!(
            session.id = session_id,
            document.id = %document.id,
            chunk_count = summary.chunk_count,
            "ingested document"
        );
        Ok(summary)
    }

    /// [`add_document`](Self::add_document), waiting at most `deadline`.
    ///
    /// If the deadline passes the ingestion keeps running in the background
    /// and may still complete; the caller gets [`RagError::Timeout`].
    pub async fn add_document_within(
        &self,
        session_id: &str,
        document: Document,
        deadline: Duration,
    ) -> Result<DocumentSummary> {
        let registry = self.clone();
        let session_id = session_id.to_string();
        run_with_deadline("add_document", deadline, async move {
            registry.add_document(&session_id, &document).await
        })
        .await
    }

    /// Read a document's text from `store` and index it.
    ///
    /// # Errors
    ///
    /// [`RagError::DocumentNotFound`] if the store has no such document, plus
    /// every error of [`add_document`](Self::add_document).
    pub async fn ingest_from_store(
        &self,
        store: &dyn DocumentStore,
        session_id: &str,
        document_id: &str,
    ) -> Result<DocumentSummary> {
        let document = store
            .get_document(session_id, document_id)
            .await?
            .ok_or_else(|| RagError::DocumentNotFound(document_id.to_string()))?;
        self.add_document(session_id, &document).await
    }

    /// Remove every chunk of a document from a session.
    ///
    /// Returns how many chunks were removed; `0` if the session or document
    /// is unknown.
    pub async fn remove_document(&self, session_id: &str, document_id: &str) -> Result<usize> {
        let Some(session) = self.get(session_id).await else {
            return Ok(0);
        };
        let removed = session.drop_document(document_id).await;
        info!(session.id = session_id, document.id = document_id, removed, "removed document");
        Ok(removed)
    }

    /// Serialize a session's documents, chunks, and index with `bincode`.
    ///
    /// # Errors
    ///
    /// [`RagError::SessionNotFound`] if the session does not exist.
    pub async fn export_session(&self, session_id: &str) -> Result<Vec<u8>> {
        let session = self
            .get(session_id)
            .await
            .ok_or_else(|| RagError::SessionNotFound(session_id.to_string()))?;
        let snapshot = session.snapshot().await;
        Ok(bincode::serialize(&snapshot)?)
    }

    /// Restore a session exported by [`export_session`](Self::export_session)
    /// under `session_id`, replacing any existing session with that id.
    ///
    /// # Errors
    ///
    /// - [`RagError::Serialization`] if the bytes are not a valid snapshot or
    ///   chunks and vectors are not in 1:1 correspondence
    /// - [`RagError::DimensionMismatch`] if the snapshot was built with a
    ///   different embedding dimension
    pub async fn import_session(&self, session_id: &str, bytes: &[u8]) -> Result<Arc<SessionIndex>> {
        let snapshot: SessionSnapshot = bincode::deserialize(bytes)?;
        if snapshot.chunks.len() != snapshot.index.entries.len()
            || snapshot
                .chunks
                .iter()
                .zip(&snapshot.index.entries)
                .any(|(chunk, entry)| chunk.id != entry.chunk_id || chunk.document_id != entry.document_id)
        {
            return Err(RagError::Serialization(
                "snapshot chunks do not match index entries".to_string(),
            ));
        }

        let mut index = (self.inner.index_factory)(self.inner.embedding_provider.dimensions());
        snapshot.index.restore_into(index.as_mut())?;

        let session = Arc::new(SessionIndex {
            session_id: session_id.to_string(),
            dimensions: index.dimensions(),
            state: RwLock::new(SessionState {
                index,
                chunks: snapshot.chunks.into_iter().map(|c| (c.id.clone(), c)).collect(),
                documents: snapshot.documents,
            }),
        });
        self.inner.sessions.write().await.insert(session_id.to_string(), session.clone());
        info!(
            session.id = session_id,
            source.session = %snapshot.session_id,
            "imported session snapshot"
        );
        Ok(session)
    }
}

/// Builder for constructing a [`SessionIndexRegistry`].
///
/// `config` and `embedding_provider` are required. The chunker defaults to the
/// one described by the config and the index to [`FlatIndex`].
#[derive(Default)]
pub struct SessionIndexRegistryBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    chunker: Option<Arc<dyn Chunker>>,
    index_factory: Option<IndexFactory>,
}

impl SessionIndexRegistryBuilder {
    /// Set the configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Override the chunker built from the config.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Use a different [`VectorIndex`] implementation for new sessions.
    pub fn index_factory(mut self, factory: IndexFactory) -> Self {
        self.index_factory = Some(factory);
        self
    }

    /// Build the registry.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if a required field is
    /// missing or the config is invalid.
    pub fn build(self) -> Result<SessionIndexRegistry> {
        let config = self
            .config
            .ok_or_else(|| RagError::InvalidConfiguration("config is required".to_string()))?;
        config.validate()?;
        let embedding_provider = self.embedding_provider.ok_or_else(|| {
            RagError::InvalidConfiguration("embedding_provider is required".to_string())
        })?;
        if embedding_provider.dimensions() == 0 {
            return Err(RagError::InvalidConfiguration(
                "embedding provider reports zero dimensions".to_string(),
            ));
        }
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => config.build_chunker()?,
        };
        let index_factory = self.index_factory.unwrap_or_else(|| {
            Arc::new(|dimensions| Box::new(FlatIndex::new(dimensions)) as Box<dyn VectorIndex>)
        });

        Ok(SessionIndexRegistry {
            inner: Arc::new(RegistryInner {
                config,
                embedding_provider,
                chunker,
                index_factory,
                sessions: RwLock::new(HashMap::new()),
            }),
        })
    }
}
