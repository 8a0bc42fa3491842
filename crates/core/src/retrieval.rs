//! KnowledgeSource trait — the abstraction over retrieval backends.
//!
//! A knowledge source answers a text query with zero or more scored content
//! items. The fusion pipeline queries sources in configured priority order;
//! the first source that returns a non-empty result wins.
//!
//! Implementations: in-memory vector store, web search. The unavailability
//! contract matters: `Err(SourceError)` means the source could not be
//! queried (skip it and try the next), while `Ok` with no items means it was
//! queried successfully and found nothing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// One retrieved content item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedItem {
    /// The reference content
    pub content: String,

    /// Relevance score, when the source produces one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,

    /// Source-specific metadata (document id, URL, title, ...)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RetrievedItem {
    /// Create an item with content only.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            score: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Set the relevance score.
    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    /// Add a metadata field.
    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// An ordered set of retrieved items from one source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub items: Vec<RetrievedItem>,
}

impl RetrievalResult {
    /// A successful query that found nothing.
    pub fn empty() -> Self {
        Self { items: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl From<Vec<RetrievedItem>> for RetrievalResult {
    fn from(items: Vec<RetrievedItem>) -> Self {
        Self { items }
    }
}

/// The core KnowledgeSource trait.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// The source name (e.g., "vector_store", "web_search").
    fn name(&self) -> &str;

    /// Query the source.
    async fn query(&self, text: &str) -> std::result::Result<RetrievalResult, SourceError>;
}
