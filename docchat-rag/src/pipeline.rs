//! Query-time retrieval orchestrator.
//!
//! The [`RetrievalPipeline`] embeds a question, queries the session's index,
//! optionally fetches live web snippets, and fuses both into one ranked
//! [`RetrievalResult`].
//!
//! # Example
//!
//! ```rust,ignore
//! use docchat_rag::{RetrievalPipeline, SessionIndexRegistry};
//!
//! let pipeline = RetrievalPipeline::builder()
//!     .registry(registry.clone())
//!     .web_search_provider(Arc::new(SerperSearchProvider::from_env()?))
//!     .build()?;
//!
//! let result = pipeline.retrieve("session-1", "what changed in Q3?", 5, true).await?;
//! println!("{}", result.format_context());
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::RagConfig;
use crate::document::{ContextItem, RetrievalResult, ScoredChunk, ScoredSnippet, WebSnippet};
use crate::embedding::embed_query_with_retry;
use crate::error::{RagError, Result};
use crate::registry::SessionIndexRegistry;
use crate::retry::run_with_deadline;
use crate::websearch::{WebSearchProvider, search_with_retry};

/// The retrieval orchestrator.
///
/// Cloning is cheap; clones share the registry and providers. Construct one
/// via [`RetrievalPipeline::builder()`].
#[derive(Clone)]
pub struct RetrievalPipeline {
    registry: SessionIndexRegistry,
    web_search: Option<Arc<dyn WebSearchProvider>>,
}

impl RetrievalPipeline {
    /// Create a new [`RetrievalPipelineBuilder`].
    pub fn builder() -> RetrievalPipelineBuilder {
        RetrievalPipelineBuilder::default()
    }

    /// The registry this pipeline reads from.
    pub fn registry(&self) -> &SessionIndexRegistry {
        &self.registry
    }

    /// Return a reference to the configuration.
    pub fn config(&self) -> &RagConfig {
        self.registry.config()
    }

    /// Whether a web search provider is configured.
    pub fn has_web_search(&self) -> bool {
        self.web_search.is_some()
    }

    /// Retrieve the `top_k` most relevant context items for `query`.
    ///
    /// An unknown or empty session yields no document passages. With web
    /// search disabled that is an empty result, not an error. A failed web
    /// search is logged and the result is marked
    /// [`web_degraded`](RetrievalResult::web_degraded).
    ///
    /// # Errors
    ///
    /// - [`RagError::EmbeddingUnavailable`] if the question cannot be embedded;
    ///   this is never degraded to web-only results
    /// - [`RagError::DimensionMismatch`] if the embedder and index disagree
    pub async fn retrieve(
        &self,
        session_id: &str,
        query: &str,
        top_k: usize,
        web_search_enabled: bool,
    ) -> Result<RetrievalResult> {
        let mut result = RetrievalResult::empty(query);
        if top_k == 0 {
            return Ok(result);
        }

        let (chunks, web) = tokio::join!(
            self.search_session(session_id, query, top_k),
            self.search_web(query, web_search_enabled),
        );
        let chunks = chunks?;
        let snippets = match web {
            Ok(snippets) => snippets,
            Err(e) => {
                warn!(session.id = session_id, error = %e, "web search failed, using document context only");
                result.web_degraded = true;
                Vec::new()
            }
        };

        let config = self.config();
        result.items = fuse(chunks, snippets, config.web_score_weight, top_k);
        if let Some(limit) = config.max_context_chars {
            apply_char_budget(&mut result.items, limit);
        }

        info!(
            session.id = session_id,
            result_count = result.items.len(),
            web_degraded = result.web_degraded,
            "query completed"
        );
        Ok(result)
    }

    /// [`retrieve`](Self::retrieve), waiting at most `deadline`.
    ///
    /// On expiry the retrieval keeps running in the background and
    /// [`RagError::Timeout`] is returned.
    pub async fn retrieve_within(
        &self,
        session_id: &str,
        query: &str,
        top_k: usize,
        web_search_enabled: bool,
        deadline: Duration,
    ) -> Result<RetrievalResult> {
        let pipeline = self.clone();
        let session_id = session_id.to_string();
        let query = query.to_string();
        run_with_deadline("retrieve", deadline, async move {
            pipeline.retrieve(&session_id, &query, top_k, web_search_enabled).await
        })
        .await
    }

    async fn search_session(&self, session_id: &str, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        let Some(session) = self.registry.get(session_id).await else {
            debug!(session.id = session_id, "no index for session");
            return Ok(Vec::new());
        };
        if session.is_empty().await {
            return Ok(Vec::new());
        }

        let config = self.config();
        let embedder = self.registry.embedding_provider();
        let vector =
            embed_query_with_retry(embedder.as_ref(), query, session.dimensions(), &config.embedding_retry)
                .await
                .map_err(|e| {
                    error!(session.id = session_id, error = %e, "query embedding failed");
                    e
                })?;

        // The index may have been emptied since the check above.
        let hits = match session.query(&vector, top_k).await {
            Ok(hits) => hits,
            Err(RagError::EmptyIndex) => Vec::new(),
            Err(e) => return Err(e),
        };
        let threshold = config.similarity_threshold;
        Ok(hits.into_iter().filter(|c| c.score >= threshold).collect())
    }

    async fn search_web(&self, query: &str, enabled: bool) -> Result<Vec<WebSnippet>> {
        if !enabled {
            return Ok(Vec::new());
        }
        let Some(provider) = &self.web_search else {
            return Err(RagError::WebSearch {
                provider: "none".to_string(),
                message: "web search requested but no provider is configured".to_string(),
            });
        };
        let config = self.config();
        search_with_retry(provider.as_ref(), query, config.web_max_results, &config.web_retry).await
    }
}

/// Merge vector hits and web snippets into one list ranked by fused score.
///
/// The web result at rank `i` of `n` scores `anchor * (n - i) / n * weight`,
/// where `anchor` is the best vector score clamped to `[0, 1]`, or `1.0`
/// when there are no vector hits. The result is capped at `1.0` so boosted
/// snippets stay on the similarity scale. Ties keep passages ahead of
/// snippets.
pub fn fuse(
    chunks: Vec<ScoredChunk>,
    snippets: Vec<WebSnippet>,
    web_score_weight: f32,
    top_k: usize,
) -> Vec<ContextItem> {
    let anchor = chunks.first().map_or(1.0, |c| c.score.clamp(0.0, 1.0));
    let n = snippets.len();

    let mut items: Vec<ContextItem> = chunks.into_iter().map(ContextItem::Chunk).collect();
    items.extend(snippets.into_iter().enumerate().map(|(rank, snippet)| {
        let rank_weight = (n - rank) as f32 / n as f32;
        let score = (anchor * rank_weight * web_score_weight).min(1.0);
        ContextItem::Web(ScoredSnippet { snippet, rank, score })
    }));

    items.sort_by(|a, b| b.score().total_cmp(&a.score()));
    items.truncate(top_k);
    items
}

/// Keep items in rank order until the next one would push the total text
/// length past `max_chars` characters.
///
/// The top item is always kept, cut to `max_chars` if it is longer on its own.
fn apply_char_budget(items: &mut Vec<ContextItem>, max_chars: usize) {
    let Some(first) = items.first_mut() else {
        return;
    };
    first.truncate_text(max_chars);

    let mut used = 0;
    let keep = items
        .iter()
        .take_while(|item| {
            used += item.text().chars().count();
            used <= max_chars
        })
        .count();
    items.truncate(keep);
}

/// Builder for constructing a [`RetrievalPipeline`].
#[derive(Default)]
pub struct RetrievalPipelineBuilder {
    registry: Option<SessionIndexRegistry>,
    web_search: Option<Arc<dyn WebSearchProvider>>,
}

impl RetrievalPipelineBuilder {
    /// Set the session registry (required).
    pub fn registry(mut self, registry: SessionIndexRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the web search provider.
    pub fn web_search_provider(mut self, provider: Arc<dyn WebSearchProvider>) -> Self {
        self.web_search = Some(provider);
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if no registry was set.
    pub fn build(self) -> Result<RetrievalPipeline> {
        let registry = self
            .registry
            .ok_or_else(|| RagError::InvalidConfiguration("registry is required".to_string()))?;
        Ok(RetrievalPipeline { registry, web_search: self.web_search })
    }
}
