//! In-process vector store and the vector similarity knowledge source.
//!
//! Documents are seeded at startup (one document per file in a configured
//! directory) and embedded once. A query embeds the user's text and ranks
//! documents by cosine similarity.
//!
//! An embedding failure at query time makes the whole source unavailable —
//! the fusion pipeline skips it and tries the next source.

use async_trait::async_trait;
use relaybot_core::error::{ProviderError, SourceError};
use relaybot_core::provider::Embedder;
use relaybot_core::retrieval::{KnowledgeSource, RetrievalResult, RetrievedItem};
use relaybot_core::vector::cosine_similarity;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A seeded reference document with its embedding.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Holds embedded reference documents for the process lifetime.
pub struct DocumentStore {
    documents: RwLock<Vec<Document>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
        }
    }

    /// Add one document, embedding it now.
    pub async fn add(
        &self,
        content: impl Into<String>,
        embedder: &dyn Embedder,
    ) -> Result<String, ProviderError> {
        let content = content.into();
        let embedding = embedder.embed(&content).await?;
        let id = Uuid::new_v4().to_string();
        self.documents.write().await.push(Document {
            id: id.clone(),
            content,
            embedding,
        });
        Ok(id)
    }

    /// Seed documents from a directory, one document per readable file.
    ///
    /// Unreadable or unembeddable files are logged and skipped so one bad
    /// file cannot block startup.
    pub async fn seed_from_dir(
        &self,
        dir: &Path,
        embedder: &dyn Embedder,
    ) -> std::io::Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let content = match std::fs::read_to_string(&path) {
                Ok(c) if !c.trim().is_empty() => c,
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable document");
                    continue;
                }
            };
            match self.add(content, embedder).await {
                Ok(_) => loaded += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unembeddable document")
                }
            }
        }
        info!(loaded, dir = %dir.display(), "Seeded document store");
        Ok(loaded)
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Rank documents by cosine similarity to a query embedding.
    async fn search(&self, query_embedding: &[f32], top_k: usize, min_score: f32) -> Vec<(f32, Document)> {
        let documents = self.documents.read().await;

        let mut scored: Vec<(f32, Document)> = documents
            .iter()
            .filter_map(|doc| {
                let sim = cosine_similarity(&doc.embedding, query_embedding);
                (sim >= min_score).then(|| (sim, doc.clone()))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Vector similarity knowledge source.
pub struct VectorSource {
    store: Arc<DocumentStore>,
    embedder: Arc<dyn Embedder>,
    min_score: f32,
    top_k: usize,
}

impl VectorSource {
    pub fn new(
        store: Arc<DocumentStore>,
        embedder: Arc<dyn Embedder>,
        min_score: f32,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            min_score,
            top_k,
        }
    }
}

#[async_trait]
impl KnowledgeSource for VectorSource {
    fn name(&self) -> &str {
        "vector_store"
    }

    async fn query(&self, text: &str) -> Result<RetrievalResult, SourceError> {
        let query_embedding = self
            .embedder
            .embed(text)
            .await
            .map_err(|e| SourceError::Unavailable(format!("embedding failed: {e}")))?;

        let matches = self
            .store
            .search(&query_embedding, self.top_k, self.min_score)
            .await;

        debug!(matches = matches.len(), min_score = self.min_score, "Vector query");

        let items = matches
            .into_iter()
            .map(|(score, doc)| {
                RetrievedItem::new(doc.content)
                    .with_score(score)
                    .with_meta("document_id", serde_json::json!(doc.id))
            })
            .collect::<Vec<_>>();

        Ok(items.into())
    }
}
