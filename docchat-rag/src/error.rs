//! Error types for the `docchat-rag` crate.

use thiserror::Error;

/// Errors that can occur in retrieval operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// Chunking or pipeline parameters are inconsistent. Caller error, never retried.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A vector does not have the dimension the index was created with.
    ///
    /// This indicates an embedder/index mismatch and is surfaced immediately.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The index dimension.
        expected: usize,
        /// The dimension of the offending vector.
        actual: usize,
    },

    /// A vector contains NaN or infinite components.
    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    /// The embedding provider failed transiently.
    #[error("Embedding unavailable ({provider}): {message}")]
    EmbeddingUnavailable {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A query with `k > 0` was issued against an index with no entries.
    #[error("Index is empty")]
    EmptyIndex,

    /// An operation did not complete within its deadline.
    #[error("Timed out after {timeout_ms}ms waiting for {operation}")]
    Timeout {
        /// The operation that was being waited on.
        operation: String,
        /// The deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The web search provider failed. Recoverable on the query path.
    #[error("Web search error ({provider}): {message}")]
    WebSearch {
        /// The search provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The session does not exist in the registry.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The document does not exist in the session or the document store.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// An index snapshot could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An error in pipeline orchestration.
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl RagError {
    /// Whether a retry of the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingUnavailable { .. }
                | RagError::Timeout { .. }
                | RagError::WebSearch { .. }
        )
    }
}

impl From<bincode::Error> for RagError {
    fn from(err: bincode::Error) -> Self {
        RagError::Serialization(err.to_string())
    }
}

/// A convenience result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        let err = RagError::EmbeddingUnavailable {
            provider: "mock".into(),
            message: "503".into(),
        };
        assert!(err.is_retryable());
        assert!(RagError::Timeout { operation: "embed".into(), timeout_ms: 10 }.is_retryable());
    }

    #[test]
    fn contract_errors_are_not_retryable() {
        assert!(!RagError::DimensionMismatch { expected: 4, actual: 3 }.is_retryable());
        assert!(!RagError::InvalidConfiguration("overlap".into()).is_retryable());
        assert!(!RagError::EmptyIndex.is_retryable());
    }

    #[test]
    fn dimension_mismatch_message_names_both_sides() {
        let msg = RagError::DimensionMismatch { expected: 768, actual: 384 }.to_string();
        assert!(msg.contains("768"));
        assert!(msg.contains("384"));
    }
}
