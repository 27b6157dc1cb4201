//! Per-session retrieval engine for document chat.
//!
//! This crate provides:
//! - Character-based chunking with exact overlap ([`FixedSizeChunker`], [`RecursiveChunker`])
//! - Pluggable embedding providers with retry and timeout discipline
//! - An exact cosine-similarity [`VectorIndex`] per chat session
//! - A [`SessionIndexRegistry`] with atomic document ingestion and removal
//! - A [`RetrievalPipeline`] that fuses document passages with live web snippets
//!
//! Network providers are behind features: `gemini`, `openai`, `serper`
//! (`full` enables all).

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod registry;
pub mod retry;
pub mod store;
pub mod websearch;

#[cfg(feature = "gemini")]
pub mod gemini;
#[cfg(feature = "openai")]
pub mod openai;
#[cfg(feature = "serper")]
pub mod serper;

pub use chunking::{Chunker, FixedSizeChunker, RecursiveChunker, chunk_text};
pub use config::{ChunkerKind, RagConfig, RagConfigBuilder};
pub use document::{
    Chunk, ContextItem, Document, DocumentSummary, RetrievalResult, ScoredChunk, ScoredSnippet,
    SessionInfo, WebSnippet,
};
pub use embedding::{EmbeddingProvider, HashEmbeddingProvider, embed_query_with_retry, embed_with_retry};
pub use error::{RagError, Result};
pub use index::{FlatIndex, IndexEntry, IndexHit, IndexSnapshot, VectorIndex};
pub use pipeline::{RetrievalPipeline, RetrievalPipelineBuilder};
pub use registry::{IndexFactory, SessionIndex, SessionIndexRegistry, SessionIndexRegistryBuilder};
pub use retry::{RetryPolicy, run_with_deadline, with_retry};
pub use store::{DocumentStore, InMemoryDocumentStore};
pub use websearch::{WebSearchProvider, search_with_retry};

#[cfg(feature = "gemini")]
pub use gemini::GeminiEmbeddingProvider;
#[cfg(feature = "openai")]
pub use openai::OpenAIEmbeddingProvider;
#[cfg(feature = "serper")]
pub use serper::SerperSearchProvider;
