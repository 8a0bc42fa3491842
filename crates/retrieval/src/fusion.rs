//! Knowledge fusion pipeline.
//!
//! Queries knowledge sources in configured priority order and merges the
//! first non-empty result into the prompt as a delimited "related knowledge"
//! block. Later sources are never queried once an earlier one succeeds.
//! Unavailable sources are skipped silently; if every source misses, the
//! original message is forwarded unmodified and the reply is a raw model
//! completion.

use relaybot_core::error::ProviderError;
use relaybot_core::message::Turn;
use relaybot_core::provider::{ChatRequest, Provider};
use relaybot_core::retrieval::{KnowledgeSource, RetrievedItem};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prioritized retrieval plus the upstream model call.
pub struct FusionPipeline {
    sources: Vec<Arc<dyn KnowledgeSource>>,
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl FusionPipeline {
    pub fn new(
        sources: Vec<Arc<dyn KnowledgeSource>>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            sources,
            provider,
            model: model.into(),
            temperature,
            max_tokens,
        }
    }

    /// Build the augmented prompt for one user message.
    ///
    /// Returns the prompt and whether any knowledge was fused into it.
    pub async fn augment(&self, user_message: &str) -> (String, bool) {
        for source in &self.sources {
            match source.query(user_message).await {
                Ok(result) if !result.is_empty() => {
                    info!(
                        source = source.name(),
                        items = result.items.len(),
                        "Knowledge found"
                    );
                    return (
                        Self::format_prompt(user_message, &result.items),
                        true,
                    );
                }
                Ok(_) => {
                    debug!(source = source.name(), "No match, trying next source");
                }
                Err(e) => {
                    warn!(source = source.name(), error = %e, "Source unavailable, skipping");
                }
            }
        }

        (user_message.to_string(), false)
    }

    /// Append retrieved items after the original message, never replacing it.
    fn format_prompt(user_message: &str, items: &[RetrievedItem]) -> String {
        let mut prompt = String::from(user_message);
        prompt.push_str("\n\n### Related knowledge\n");
        for (i, item) in items.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, item.content.trim()));
        }
        prompt
    }

    /// Submit a single prompt to the model.
    pub async fn answer(&self, prompt: &str) -> Result<String, ProviderError> {
        self.answer_with_history(vec![Turn::user(prompt)]).await
    }

    /// Submit a full role-tagged history to the model.
    pub async fn answer_with_history(
        &self,
        messages: Vec<Turn>,
    ) -> Result<String, ProviderError> {
        let request = ChatRequest::from_history(self.model.clone(), messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        let response = self.provider.complete(request).await?;
        Ok(response.message.content)
    }
}
