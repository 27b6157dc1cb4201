//! Configuration for ingestion and retrieval.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunking::{Chunker, FixedSizeChunker, RecursiveChunker, validate_chunking};
use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

/// Which [`Chunker`] the registry builds from a [`RagConfig`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkerKind {
    /// [`FixedSizeChunker`].
    Fixed,
    /// [`RecursiveChunker`].
    #[default]
    Recursive,
}

/// Configuration parameters for the retrieval engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Chunking strategy.
    pub chunker: ChunkerKind,
    /// Number of top results to return.
    pub top_k: usize,
    /// Minimum cosine similarity for vector hits (results below this are filtered out).
    pub similarity_threshold: f32,
    /// Multiplier applied to web snippet scores before fusion.
    ///
    /// Below `1.0` it penalizes web results relative to document passages;
    /// above `1.0` it boosts them.
    pub web_score_weight: f32,
    /// Number of results requested from the web search provider.
    pub web_max_results: usize,
    /// Optional cap on total characters of context handed to answer synthesis.
    pub max_context_chars: Option<usize>,
    /// Maximum number of texts sent to the embedder in one call.
    pub embed_batch_size: usize,
    /// Largest accepted document, in bytes of extracted text.
    pub max_document_bytes: usize,
    /// Retry policy for embedding calls.
    pub embedding_retry: RetryPolicy,
    /// Retry policy for web search calls.
    pub web_retry: RetryPolicy,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            chunker: ChunkerKind::default(),
            top_k: 5,
            similarity_threshold: 0.0,
            web_score_weight: 0.5,
            web_max_results: 3,
            max_context_chars: None,
            embed_batch_size: 64,
            max_document_bytes: 10 * 1024 * 1024,
            embedding_retry: RetryPolicy::default(),
            web_retry: RetryPolicy::new(2).with_attempt_timeout(Duration::from_secs(10)),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if:
    /// - `chunk_overlap >= chunk_size`
    /// - `top_k == 0` or `embed_batch_size == 0` or `max_document_bytes == 0`
    /// - `similarity_threshold` is outside `[-1, 1]`
    /// - `web_score_weight` is negative or not finite
    /// - `max_context_chars == Some(0)`
    /// - either retry policy fails [`RetryPolicy::validate`]
    pub fn validate(&self) -> Result<()> {
        validate_chunking(self.chunk_size, self.chunk_overlap)?;
        if self.top_k == 0 {
            return Err(RagError::InvalidConfiguration(
                "top_k must be greater than zero".to_string(),
            ));
        }
        if self.embed_batch_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "embed_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.max_document_bytes == 0 {
            return Err(RagError::InvalidConfiguration(
                "max_document_bytes must be greater than zero".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(RagError::InvalidConfiguration(format!(
                "similarity_threshold ({}) must be within [-1, 1]",
                self.similarity_threshold
            )));
        }
        if !self.web_score_weight.is_finite() || self.web_score_weight < 0.0 {
            return Err(RagError::InvalidConfiguration(format!(
                "web_score_weight ({}) must be a non-negative number",
                self.web_score_weight
            )));
        }
        if self.max_context_chars == Some(0) {
            return Err(RagError::InvalidConfiguration(
                "max_context_chars must be greater than zero when set".to_string(),
            ));
        }
        self.embedding_retry.validate()?;
        self.web_retry.validate()?;
        Ok(())
    }

    /// Build the configured chunker.
    pub fn build_chunker(&self) -> Result<Arc<dyn Chunker>> {
        Ok(match self.chunker {
            ChunkerKind::Fixed => Arc::new(FixedSizeChunker::new(self.chunk_size, self.chunk_overlap)?),
            ChunkerKind::Recursive => {
                Arc::new(RecursiveChunker::new(self.chunk_size, self.chunk_overlap)?)
            }
        })
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the chunking strategy.
    pub fn chunker(mut self, kind: ChunkerKind) -> Self {
        self.config.chunker = kind;
        self
    }

    /// Set the number of top results to return.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for vector hits.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the web snippet score multiplier.
    pub fn web_score_weight(mut self, weight: f32) -> Self {
        self.config.web_score_weight = weight;
        self
    }

    /// Set how many web results to request.
    pub fn web_max_results(mut self, n: usize) -> Self {
        self.config.web_max_results = n;
        self
    }

    /// Cap the total characters of returned context.
    pub fn max_context_chars(mut self, chars: usize) -> Self {
        self.config.max_context_chars = Some(chars);
        self
    }

    /// Set the embedding batch size.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Set the largest accepted document size in bytes.
    pub fn max_document_bytes(mut self, bytes: usize) -> Self {
        self.config.max_document_bytes = bytes;
        self
    }

    /// Set the retry policy for embedding calls.
    pub fn embedding_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.embedding_retry = policy;
        self
    }

    /// Set the retry policy for web search calls.
    pub fn web_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.web_retry = policy;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
