//! Session/document metadata store seam.
//!
//! The relational store behind the chat application lives outside this
//! crate. The registry only reads a document's raw text from it at
//! ingestion time, through [`DocumentStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::Document;
use crate::error::Result;

/// Read access to persisted session documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one document of a session.
    async fn get_document(&self, session_id: &str, document_id: &str) -> Result<Option<Document>>;

    /// All documents of a session, in upload order.
    async fn list_documents(&self, session_id: &str) -> Result<Vec<Document>>;
}

/// A [`DocumentStore`] kept in process memory.
///
/// Suitable for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    sessions: RwLock<HashMap<String, Vec<Document>>>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document to a session, replacing one with the same id.
    pub async fn put_document(&self, session_id: &str, document: Document) {
        let mut sessions = self.sessions.write().await;
        let docs = sessions.entry(session_id.to_string()).or_default();
        match docs.iter_mut().find(|d| d.id == document.id) {
            Some(existing) => *existing = document,
            None => docs.push(document),
        }
    }

    /// Remove a document from a session. Returns whether it existed.
    pub async fn remove_document(&self, session_id: &str, document_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(docs) = sessions.get_mut(session_id) else {
            return false;
        };
        let before = docs.len();
        docs.retain(|d| d.id != document_id);
        docs.len() != before
    }

    /// Drop every document of a session.
    pub async fn delete_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document(&self, session_id: &str, document_id: &str) -> Result<Option<Document>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .and_then(|docs| docs.iter().find(|d| d.id == document_id))
            .cloned())
    }

    async fn list_documents(&self, session_id: &str) -> Result<Vec<Document>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_replaces_by_id_and_keeps_order() {
        let store = InMemoryDocumentStore::new();
        store.put_document("s", Document::with_id("a", "a.pdf", "one")).await;
        store.put_document("s", Document::with_id("b", "b.pdf", "two")).await;
        store.put_document("s", Document::with_id("a", "a.pdf", "uno")).await;

        let docs = store.list_documents("s").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "uno");
        assert_eq!(docs[1].id, "b");
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = InMemoryDocumentStore::new();
        store.put_document("s1", Document::with_id("a", "a.pdf", "one")).await;
        assert!(store.get_document("s2", "a").await.unwrap().is_none());
        assert!(store.get_document("s1", "a").await.unwrap().is_some());

        assert!(store.remove_document("s1", "a").await);
        assert!(!store.remove_document("s1", "a").await);
        store.delete_session("s1").await;
        assert!(store.list_documents("s1").await.unwrap().is_empty());
    }
}
