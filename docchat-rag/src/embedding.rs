//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;
use tracing::{debug, error};

use crate::error::{RagError, Result};
use crate::retry::{RetryPolicy, with_retry};

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends (Gemini, OpenAI, etc.)
/// behind a unified async interface. Every vector returned by one instance has
/// [`dimensions`](EmbeddingProvider::dimensions) components, and
/// [`embed_batch`](EmbeddingProvider::embed_batch) returns one vector per
/// input in input order.
///
/// Transient backend failures must be reported as
/// [`RagError::EmbeddingUnavailable`](crate::RagError::EmbeddingUnavailable);
/// callers retry those.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    ///
    /// The default implementation calls [`embed`](EmbeddingProvider::embed)
    /// sequentially for each input. Override this method if the backend
    /// supports native batch embedding for better throughput.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Generate an embedding for a search query.
    ///
    /// Backends that embed queries and passages asymmetrically override this;
    /// the default is [`embed`](EmbeddingProvider::embed).
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Short provider name used in logs and errors.
    fn name(&self) -> &str {
        "embedder"
    }
}

/// Embed `texts` under `policy` and check the result against the contract.
///
/// A final timeout is reported as [`RagError::EmbeddingUnavailable`]. A
/// wrong vector count is also reported as unavailable; a wrong vector length
/// is a [`RagError::DimensionMismatch`] against `expected_dimensions`.
pub async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    texts: &[&str],
    expected_dimensions: usize,
    policy: &RetryPolicy,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    debug!(provider = provider.name(), batch_size = texts.len(), "embedding batch");

    let vectors = with_retry(policy, "embedding", || provider.embed_batch(texts))
        .await
        .map_err(|e| retry_failure(provider, policy, e))?;

    if vectors.len() != texts.len() {
        return Err(RagError::EmbeddingUnavailable {
            provider: provider.name().to_string(),
            message: format!("returned {} vectors for {} inputs", vectors.len(), texts.len()),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected_dimensions) {
        return Err(RagError::DimensionMismatch {
            expected: expected_dimensions,
            actual: bad.len(),
        });
    }
    Ok(vectors)
}

/// Embed a search query under `policy` through
/// [`embed_query`](EmbeddingProvider::embed_query).
///
/// Failures map the same way as in [`embed_with_retry`].
pub async fn embed_query_with_retry(
    provider: &dyn EmbeddingProvider,
    query: &str,
    expected_dimensions: usize,
    policy: &RetryPolicy,
) -> Result<Vec<f32>> {
    debug!(provider = provider.name(), "embedding query");

    let vector = with_retry(policy, "query embedding", || provider.embed_query(query))
        .await
        .map_err(|e| retry_failure(provider, policy, e))?;

    if vector.len() != expected_dimensions {
        return Err(RagError::DimensionMismatch {
            expected: expected_dimensions,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

fn retry_failure(provider: &dyn EmbeddingProvider, policy: &RetryPolicy, e: RagError) -> RagError {
    error!(provider = provider.name(), error = %e, "embedding failed");
    match e {
        RagError::Timeout { timeout_ms, .. } => RagError::EmbeddingUnavailable {
            provider: provider.name().to_string(),
            message: format!(
                "no response within {timeout_ms}ms after {} attempts",
                policy.max_attempts.max(1)
            ),
        },
        other => other,
    }
}

/// A deterministic offline embedder based on feature hashing.
///
/// Each lowercase alphanumeric token is hashed (FNV-1a) into one of
/// `dimensions` buckets and the bucket counts are L2-normalized. Texts that
/// share vocabulary get high cosine similarity, which is enough for local
/// development and tests without an API key.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl HashEmbeddingProvider {
    /// Create a hashing embedder producing `dimensions`-long vectors.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }

    fn fnv1a(token: &str) -> u64 {
        token.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
            (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
        {
            let bucket = (Self::fnv1a(&token) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "hash"
    }
}
