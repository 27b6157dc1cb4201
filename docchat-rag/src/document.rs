//! Data types for documents, chunks, and retrieval results.

use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata key under which chunks record the source filename.
pub const FILENAME_KEY: &str = "filename";

/// A source document uploaded into a chat session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Identifier, unique within the owning session.
    pub id: String,
    /// The original filename of the upload.
    pub filename: String,
    /// The raw extracted text.
    pub text: String,
    /// When the document was created.
    pub created_at: DateTime<Utc>,
    /// Key-value metadata copied onto every chunk.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Document {
    /// Create a document with a fresh random identifier.
    pub fn new(filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), filename, text)
    }

    /// Create a document with a caller-chosen identifier.
    pub fn with_id(
        id: impl Into<String>,
        filename: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            text: text.into(),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Size of the extracted text in bytes.
    pub fn size_bytes(&self) -> usize {
        self.text.len()
    }
}

/// A passage of a [`Document`].
///
/// Its vector lives only in the owning session's index, keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Identifier, `{document_id}_{index}`.
    pub id: String,
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// Position of this chunk within its document.
    pub index: usize,
    /// The passage text.
    pub text: String,
    /// Metadata inherited from the parent document plus the source filename.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    /// The filename of the document this chunk came from, if recorded.
    pub fn filename(&self) -> Option<&str> {
        self.metadata.get(FILENAME_KEY).map(String::as_str)
    }
}

/// A retrieved chunk paired with its cosine similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    /// Chunk identifier.
    pub chunk_id: String,
    /// Owning document identifier.
    pub document_id: String,
    /// Position of the chunk within its document.
    pub index: usize,
    /// Source filename.
    pub filename: String,
    /// The passage text.
    pub text: String,
    /// Cosine similarity (higher is more relevant).
    pub score: f32,
}

/// A single web result returned by a search provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebSnippet {
    /// Title of the page.
    pub title: String,
    /// URL of the page.
    pub url: String,
    /// Snippet or description text.
    pub snippet: String,
    /// Provider that produced the result (e.g. "serper").
    pub source: String,
}

/// A web snippet with its fused relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredSnippet {
    /// The web result.
    pub snippet: WebSnippet,
    /// Position in the provider's ranking, 0-based.
    pub rank: usize,
    /// Fused score on the same scale as vector similarity.
    pub score: f32,
}

/// One entry of the context bundle handed to answer synthesis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextItem {
    /// A passage from one of the session's documents.
    Chunk(ScoredChunk),
    /// A snippet from live web search.
    Web(ScoredSnippet),
}

impl ContextItem {
    /// The fused score used for ranking.
    pub fn score(&self) -> f32 {
        match self {
            ContextItem::Chunk(c) => c.score,
            ContextItem::Web(w) => w.score,
        }
    }

    /// The text this item contributes to the context budget.
    pub fn text(&self) -> &str {
        match self {
            ContextItem::Chunk(c) => &c.text,
            ContextItem::Web(w) => &w.snippet.snippet,
        }
    }

    /// Cut the item's text to at most `max_chars` characters.
    pub(crate) fn truncate_text(&mut self, max_chars: usize) {
        let text = match self {
            ContextItem::Chunk(c) => &mut c.text,
            ContextItem::Web(w) => &mut w.snippet.snippet,
        };
        let cut = text.char_indices().nth(max_chars).map(|(byte, _)| byte);
        if let Some(byte) = cut {
            text.truncate(byte);
        }
    }
}

/// The ranked context produced for a single query. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    /// The query text.
    pub query: String,
    /// Items ordered by descending fused score.
    pub items: Vec<ContextItem>,
    /// Set when web search was requested but failed and results are vector-only.
    #[serde(default)]
    pub web_degraded: bool,
}

impl RetrievalResult {
    /// An empty result for `query`.
    pub fn empty(query: impl Into<String>) -> Self {
        Self { query: query.into(), items: Vec::new(), web_degraded: false }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether there is no context at all.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Document passages, in rank order.
    pub fn chunks(&self) -> impl Iterator<Item = &ScoredChunk> {
        self.items.iter().filter_map(|item| match item {
            ContextItem::Chunk(c) => Some(c),
            ContextItem::Web(_) => None,
        })
    }

    /// Web snippets, in rank order.
    pub fn web_snippets(&self) -> impl Iterator<Item = &ScoredSnippet> {
        self.items.iter().filter_map(|item| match item {
            ContextItem::Web(w) => Some(w),
            ContextItem::Chunk(_) => None,
        })
    }

    /// Render the bundle as prompt context.
    ///
    /// Document passages come first, separated by blank lines; web results
    /// follow under a `Web search results:` heading as `title: url` then the
    /// snippet.
    pub fn format_context(&self) -> String {
        let mut out = String::new();
        for chunk in self.chunks() {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&chunk.text);
        }

        let mut web = self.web_snippets().peekable();
        if web.peek().is_some() {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str("Web search results:");
            for item in web {
                let _ = write!(
                    out,
                    "\n{}: {}\n{}",
                    item.snippet.title, item.snippet.url, item.snippet.snippet
                );
            }
        }
        out
    }
}

/// Catalogue entry for a document indexed in a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSummary {
    /// Document identifier.
    pub id: String,
    /// Source filename.
    pub filename: String,
    /// Size of the extracted text in bytes.
    pub size_bytes: usize,
    /// Number of chunks the document was split into.
    pub chunk_count: usize,
    /// When the document was created.
    pub created_at: DateTime<Utc>,
}

/// Aggregate view of a session's documents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    /// Session identifier.
    pub session_id: String,
    /// Documents in upload order.
    pub documents: Vec<DocumentSummary>,
    /// Number of vectors in the session index.
    pub indexed_chunks: usize,
}

impl SessionInfo {
    /// Number of documents in the session.
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Sum of document sizes in bytes.
    pub fn total_bytes(&self) -> usize {
        self.documents.iter().map(|d| d.size_bytes).sum()
    }

    /// Filenames in upload order.
    pub fn filenames(&self) -> Vec<&str> {
        self.documents.iter().map(|d| d.filename.as_str()).collect()
    }
}
