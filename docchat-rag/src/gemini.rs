//! Gemini embedding provider using the Generative Language REST API.
//!
//! This module is only available when the `gemini` feature is enabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const PROVIDER: &str = "gemini";

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const DEFAULT_MODEL: &str = "embedding-001";

/// Output size of `embedding-001`.
const DEFAULT_DIMENSIONS: usize = 768;

/// How the embedded text will be used, forwarded to the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    /// Let the model decide.
    TaskTypeUnspecified,
    /// Text will be searched for.
    #[default]
    RetrievalDocument,
    /// Text is a search query.
    RetrievalQuery,
    /// Text is compared for similarity.
    SemanticSimilarity,
}

/// An [`EmbeddingProvider`] backed by the Gemini `batchEmbedContents` endpoint.
///
/// # Configuration
///
/// - `model` defaults to `embedding-001` (768 dimensions).
/// - `task_type` defaults to [`TaskType::RetrievalDocument`]. Queries sent
///   through [`embed_query`](EmbeddingProvider::embed_query) use
///   [`TaskType::RetrievalQuery`] instead while the retrieval pair is in use.
/// - `output_dimensionality` truncates the vector on models that support it.
/// - `api_key` comes from the constructor or `GOOGLE_API_KEY`.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::gemini::GeminiEmbeddingProvider;
///
/// let provider = GeminiEmbeddingProvider::from_env()?;
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct GeminiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    task_type: TaskType,
    output_dimensionality: Option<usize>,
    dimensions: usize,
}

impl GeminiEmbeddingProvider {
    /// Create a provider for `embedding-001` with the given API key.
    ///
    /// # Errors
    ///
    /// [`RagError::InvalidConfiguration`] if `api_key` is empty.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::InvalidConfiguration("Gemini API key must not be empty".into()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            task_type: TaskType::default(),
            output_dimensionality: None,
            dimensions: DEFAULT_DIMENSIONS,
        })
    }

    /// Create a provider from the `GOOGLE_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY").map_err(|_| {
            RagError::InvalidConfiguration("GOOGLE_API_KEY environment variable not set".into())
        })?;
        Self::new(api_key)
    }

    /// Use a different embedding model, e.g. `text-embedding-004`.
    ///
    /// `dimensions` must match what the model returns.
    pub fn with_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.model = model.into();
        self.dimensions = dimensions;
        self
    }

    /// Set the task type used for embedding requests.
    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    /// Ask the API to truncate vectors to `dims` components.
    pub fn with_output_dimensionality(mut self, dims: usize) -> Self {
        self.output_dimensionality = Some(dims);
        self.dimensions = dims;
        self
    }

    /// Point at a different API root (for proxies or tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn model_path(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }

    fn query_task_type(&self) -> TaskType {
        match self.task_type {
            TaskType::RetrievalDocument => TaskType::RetrievalQuery,
            other => other,
        }
    }

    fn unavailable(message: String) -> RagError {
        RagError::EmbeddingUnavailable { provider: PROVIDER.into(), message }
    }

    /// Client errors other than 429 will not succeed on retry.
    fn status_error(status: reqwest::StatusCode, detail: &str) -> RagError {
        let message = format!("API returned {status}: {detail}");
        if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
            RagError::InvalidConfiguration(format!("{PROVIDER}: {message}"))
        } else {
            Self::unavailable(message)
        }
    }

    async fn request(&self, texts: &[&str], task_type: TaskType) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = PROVIDER, batch_size = texts.len(), model = %self.model, ?task_type, "embedding batch");

        let model = self.model_path();
        let body = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedContentRequest {
                    model: &model,
                    content: Content { parts: [Part { text }] },
                    task_type,
                    output_dimensionality: self.output_dimensionality,
                })
                .collect(),
        };
        let url = format!("{}/{}:batchEmbedContents", self.base_url, model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "request failed");
                Self::unavailable(format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            error!(provider = PROVIDER, %status, "API error");
            return Err(Self::status_error(status, &detail));
        }

        let parsed: BatchEmbedResponse = response.json().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "failed to parse response");
            Self::unavailable(format!("failed to parse response: {e}"))
        })?;
        Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: TaskType,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Self::unavailable("API returned empty response".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.request(texts, self.task_type).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.request(&[text], self.query_task_type())
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Self::unavailable("API returned empty response".into()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
