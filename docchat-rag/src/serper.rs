//! Serper (Google results) web search provider.
//!
//! This module is only available when the `serper` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::document::WebSnippet;
use crate::error::{RagError, Result};
use crate::websearch::WebSearchProvider;

const PROVIDER: &str = "serper";

const SERPER_API_URL: &str = "https://google.serper.dev/search";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A [`WebSearchProvider`] backed by the Serper search API.
pub struct SerperSearchProvider {
    api_key: String,
    client: reqwest::Client,
    endpoint: String,
}

impl SerperSearchProvider {
    /// Create a provider with the given API key and a 10 second request timeout.
    ///
    /// # Errors
    ///
    /// [`RagError::InvalidConfiguration`] if the key is empty or the HTTP
    /// client cannot be built.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::InvalidConfiguration("Serper API key must not be empty".into()));
        }
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build().map_err(|e| {
            RagError::InvalidConfiguration(format!("failed to create HTTP client: {e}"))
        })?;
        Ok(Self { api_key, client, endpoint: SERPER_API_URL.into() })
    }

    /// Create a provider from the `SERPER_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("SERPER_API_KEY").map_err(|_| {
            RagError::InvalidConfiguration("SERPER_API_KEY environment variable not set".into())
        })?;
        Self::new(api_key)
    }

    /// Send requests to a different endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn failure(message: String) -> RagError {
        RagError::WebSearch { provider: PROVIDER.into(), message }
    }
}

#[derive(Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    snippet: Option<String>,
    description: Option<String>,
}

impl From<OrganicResult> for WebSnippet {
    fn from(r: OrganicResult) -> Self {
        WebSnippet {
            title: r.title,
            url: r.link,
            snippet: r.snippet.or(r.description).unwrap_or_default(),
            source: PROVIDER.to_string(),
        }
    }
}

#[async_trait]
impl WebSearchProvider for SerperSearchProvider {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSnippet>> {
        debug!(provider = PROVIDER, max_results, "sending search request");

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&SerperRequest { q: query, num: max_results })
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "request failed");
                if e.is_timeout() {
                    Self::failure(format!("no response within {}s", REQUEST_TIMEOUT.as_secs()))
                } else {
                    Self::failure(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(provider = PROVIDER, %status, "API error");
            return Err(Self::failure(format!("API returned {status}: {body}")));
        }

        let data: SerperResponse = response
            .json()
            .await
            .map_err(|e| Self::failure(format!("failed to parse response: {e}")))?;

        Ok(data.organic.into_iter().take(max_results).map(WebSnippet::from).collect())
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn organic_results_map_to_snippets() {
        let data: SerperResponse = serde_json::from_str(
            r#"{
                "searchParameters": {"q": "rust"},
                "organic": [
                    {"title": "Rust", "link": "https://www.rust-lang.org", "snippet": "A language", "position": 1},
                    {"title": "Docs", "link": "https://doc.rust-lang.org", "description": "Reference"}
                ]
            }"#,
        )
        .unwrap();
        let snippets: Vec<WebSnippet> = data.organic.into_iter().map(WebSnippet::from).collect();
        assert_eq!(snippets[0].url, "https://www.rust-lang.org");
        assert_eq!(snippets[0].snippet, "A language");
        assert_eq!(snippets[1].snippet, "Reference");
        assert_eq!(snippets[1].source, "serper");
    }

    #[test]
    fn missing_organic_is_empty() {
        let data: SerperResponse = serde_json::from_str(r#"{"knowledgeGraph": {}}"#).unwrap();
        assert!(data.organic.is_empty());
    }

    #[test]
    fn rejects_empty_key() {
        assert!(SerperSearchProvider::new("").is_err());
    }
}
