//! LLM provider implementations for Relaybot.
//!
//! - [`OpenAiCompatProvider`] — chat completions and embeddings against any
//!   OpenAI-compatible endpoint.
//! - [`EmbeddingClient`] — the [`relaybot_core::Embedder`] implementation the
//!   drift detector and vector source consume.

pub mod embedding;
pub mod openai_compat;

pub use embedding::EmbeddingClient;
pub use openai_compat::OpenAiCompatProvider;

use std::sync::Arc;

use relaybot_config::AppConfig;
use relaybot_core::Provider;
use relaybot_core::error::ProviderError;

/// Build the configured chat provider.
///
/// The `default_provider` name selects an entry from `[providers]`; the
/// top-level `api_key` is the fallback credential.
pub fn build_provider(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let name = config.default_provider.as_str();
    let provider_cfg = config.providers.get(name);

    let api_key = provider_cfg
        .and_then(|p| p.api_key.clone())
        .or_else(|| config.api_key.clone())
        .ok_or_else(|| {
            ProviderError::NotConfigured(format!("No API key configured for provider '{name}'"))
        })?;

    let base_url = provider_cfg
        .and_then(|p| p.api_url.clone())
        .unwrap_or_else(|| default_base_url(name));

    Ok(Arc::new(OpenAiCompatProvider::new(
        name,
        base_url,
        api_key,
        std::time::Duration::from_secs(config.request_timeout_secs),
    )))
}

/// Build the configured embedding client, if an embedding model is set.
///
/// `None` means drift detection and the vector source are disabled.
pub fn build_embedder(
    config: &AppConfig,
) -> Result<Option<Arc<dyn relaybot_core::Embedder>>, ProviderError> {
    let Some(model) = config.embedding_model.clone() else {
        return Ok(None);
    };

    let name = config.default_provider.as_str();
    let provider_cfg = config.providers.get(name);

    let api_key = provider_cfg
        .and_then(|p| p.api_key.clone())
        .or_else(|| config.api_key.clone())
        .ok_or_else(|| {
            ProviderError::NotConfigured(format!("No API key configured for provider '{name}'"))
        })?;

    let base_url = provider_cfg
        .and_then(|p| p.api_url.clone())
        .unwrap_or_else(|| default_base_url(name));

    let inner = Arc::new(OpenAiCompatProvider::new(
        name,
        base_url,
        api_key,
        std::time::Duration::from_secs(config.request_timeout_secs),
    ));

    Ok(Some(Arc::new(EmbeddingClient::new(inner, model))))
}

fn default_base_url(name: &str) -> String {
    match name {
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        other => format!("http://localhost:8000/{other}/v1"),
    }
}
