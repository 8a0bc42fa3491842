//! Embedding client — the [`Embedder`] implementation over an
//! OpenAI-compatible endpoint.
//!
//! Callers that can tolerate embedding outages (the drift detector, the
//! vector source) are responsible for recovering from `Err`; this client
//! only normalizes transport details, it does not hide failures.

use async_trait::async_trait;
use relaybot_core::error::ProviderError;
use relaybot_core::provider::Embedder;
use std::sync::Arc;

use crate::openai_compat::OpenAiCompatProvider;

/// Wraps a provider endpoint with a fixed embedding model.
pub struct EmbeddingClient {
    inner: Arc<OpenAiCompatProvider>,
    model: String,
}

impl EmbeddingClient {
    pub fn new(inner: Arc<OpenAiCompatProvider>, model: impl Into<String>) -> Self {
        Self {
            inner,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    fn name(&self) -> &str {
        "openai_compat"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.inner.embed(&self.model, text).await
    }
}
