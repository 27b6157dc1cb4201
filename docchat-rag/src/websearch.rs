//! Web search provider trait.

use async_trait::async_trait;
use tracing::debug;

use crate::document::WebSnippet;
use crate::error::{RagError, Result};
use crate::retry::{RetryPolicy, with_retry};

/// A live web search backend.
///
/// Results come back in the provider's own ranking, best first. Failures
/// should be reported as [`RagError::WebSearch`]; the retrieval pipeline
/// treats them as recoverable and falls back to document passages only.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    /// Search the web for `query`, returning at most `max_results` snippets.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSnippet>>;

    /// Provider name for logs and the [`WebSnippet::source`] field.
    fn name(&self) -> &str;
}

/// Run `provider.search` under `policy`, truncating to `max_results`.
///
/// Any failure, including a final timeout, comes back as
/// [`RagError::WebSearch`].
pub async fn search_with_retry(
    provider: &dyn WebSearchProvider,
    query: &str,
    max_results: usize,
    policy: &RetryPolicy,
) -> Result<Vec<WebSnippet>> {
    if max_results == 0 {
        return Ok(Vec::new());
    }
    debug!(provider = provider.name(), max_results, "web search");

    let mut snippets = with_retry(policy, "web_search", || provider.search(query, max_results))
        .await
        .map_err(|e| match e {
            RagError::WebSearch { .. } => e,
            other => RagError::WebSearch {
                provider: provider.name().to_string(),
                message: other.to_string(),
            },
        })?;
    snippets.truncate(max_results);
    Ok(snippets)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    struct FlakySearch {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl WebSearchProvider for FlakySearch {
        async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSnippet>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(RagError::WebSearch { provider: "flaky".into(), message: "503".into() });
            }
            Ok((0..max_results + 2)
                .map(|i| WebSnippet {
                    title: format!("{query} {i}"),
                    url: format!("https://example.com/{i}"),
                    snippet: "text".into(),
                    source: "flaky".into(),
                })
                .collect())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(2).with_initial_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn retries_then_truncates() {
        let provider = FlakySearch { calls: AtomicUsize::new(0), fail_first: 1 };
        let snippets = search_with_retry(&provider, "rust", 3, &policy()).await.unwrap();
        assert_eq!(snippets.len(), 3);
        assert_eq!(snippets[0].title, "rust 0");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_web_search_error() {
        let provider = FlakySearch { calls: AtomicUsize::new(0), fail_first: 10 };
        let err = search_with_retry(&provider, "rust", 3, &policy()).await.unwrap_err();
        assert!(matches!(err, RagError::WebSearch { .. }));
    }

    #[tokio::test]
    async fn zero_results_skips_the_call() {
        let provider = FlakySearch { calls: AtomicUsize::new(0), fail_first: 0 };
        assert!(search_with_retry(&provider, "rust", 0, &policy()).await.unwrap().is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
