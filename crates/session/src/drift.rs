//! Topic-drift detection.
//!
//! Compares the embedding of an inbound message against the most recent user
//! turn. A cosine similarity below the configured threshold means the user
//! has changed topic and the conversation context should be reset.
//!
//! Fail-safe: if either embedding cannot be obtained, the verdict is "not
//! drifted" — an embedding outage degrades to conversational continuity,
//! never to an errored exchange. The detector never mutates the session.

use relaybot_core::message::Session;
use relaybot_core::provider::Embedder;
use relaybot_core::vector::cosine_similarity;
use std::sync::Arc;
use tracing::{debug, warn};

/// Detects semantic discontinuity between successive user messages.
pub struct DriftDetector {
    embedder: Arc<dyn Embedder>,
    threshold: f32,
}

impl DriftDetector {
    pub fn new(embedder: Arc<dyn Embedder>, threshold: f32) -> Self {
        Self { embedder, threshold }
    }

    /// Whether `new_message` drifts away from the session's last user turn.
    pub async fn is_drifted(&self, session: &Session, new_message: &str) -> bool {
        if session.len() < 2 {
            return false;
        }

        let Some(previous) = session.last_user_turn() else {
            return false;
        };

        let Some(prev_embedding) = self.try_embed(&session.user_id, &previous.content).await
        else {
            return false;
        };
        let Some(new_embedding) = self.try_embed(&session.user_id, new_message).await else {
            return false;
        };

        let similarity = cosine_similarity(&prev_embedding, &new_embedding);
        let drifted = similarity < self.threshold;

        debug!(
            user_id = %session.user_id,
            similarity,
            threshold = self.threshold,
            drifted,
            "Drift check"
        );

        drifted
    }

    /// Embed one text, normalizing failure to `None`.
    async fn try_embed(&self, user_id: &str, text: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(text).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(user_id, source = self.embedder.name(), error = %e, "Embedding failed, treating as not drifted");
                None
            }
        }
    }
}
