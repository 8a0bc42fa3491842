//! Relevance-classification gate.
//!
//! A dedicated one-shot model call decides whether an inbound message is
//! relevant to the bot's declared domain. A non-relevant verdict lets the
//! dispatcher short-circuit with the fixed refusal before any knowledge
//! query or history mutation happens.

use relaybot_core::error::ProviderError;
use relaybot_core::message::Turn;
use relaybot_core::provider::{ChatRequest, Provider};
use std::sync::Arc;
use tracing::debug;

/// Classification verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relevance {
    Relevant,
    NonRelevant,
}

/// Classifies messages against a fixed domain instruction.
pub struct RelevanceGate {
    provider: Arc<dyn Provider>,
    model: String,
    instruction: String,
}

impl RelevanceGate {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            instruction: instruction.into(),
        }
    }

    /// Classify one message.
    ///
    /// The verdict is parsed from the completion text: any mention of
    /// "non-relevant" means NonRelevant, everything else means Relevant.
    pub async fn classify(&self, message: &str) -> Result<Relevance, ProviderError> {
        let prompt = format!("{}\n\n{}", self.instruction, message);

        let request = ChatRequest::from_history(
            self.model.clone(),
            vec![
                Turn::system("You are a helpful assistant."),
                Turn::user(prompt),
            ],
        )
        .with_temperature(0.0)
        .with_max_tokens(16);

        let response = self.provider.complete(request).await?;
        let verdict = Self::parse_verdict(&response.message.content);

        debug!(completion = %response.message.content, ?verdict, "Classification");
        Ok(verdict)
    }

    fn parse_verdict(completion: &str) -> Relevance {
        if completion.to_lowercase().contains("non-relevant") {
            Relevance::NonRelevant
        } else {
            Relevance::Relevant
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relaybot_core::provider::ChatResponse;

    struct MockProvider {
        completion: String,
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                message: Turn::assistant(&self.completion),
                usage: None,
                model: "mock-model".into(),
            })
        }
    }

    #[test]
    fn verdict_parsing() {
        assert_eq!(
            RelevanceGate::parse_verdict("This is non-relevant."),
            Relevance::NonRelevant
        );
        assert_eq!(
            RelevanceGate::parse_verdict("Non-Relevant"),
            Relevance::NonRelevant
        );
        assert_eq!(
            RelevanceGate::parse_verdict("relevant"),
            Relevance::Relevant
        );
        assert_eq!(RelevanceGate::parse_verdict(""), Relevance::Relevant);
    }

    #[tokio::test]
    async fn classify_non_relevant() {
        let gate = RelevanceGate::new(
            Arc::new(MockProvider {
                completion: "non-relevant".into(),
            }),
            "mock-model",
            "Classify the following message:",
        );

        let verdict = gate.classify("how do I fix my car?").await.unwrap();
        assert_eq!(verdict, Relevance::NonRelevant);
    }

    #[tokio::test]
    async fn classify_relevant() {
        let gate = RelevanceGate::new(
            Arc::new(MockProvider {
                completion: "relevant".into(),
            }),
            "mock-model",
            "Classify the following message:",
        );

        let verdict = gate.classify("insulin dosage question").await.unwrap();
        assert_eq!(verdict, Relevance::Relevant);
    }
}
