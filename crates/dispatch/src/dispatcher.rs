//! The dispatcher state machine.
//!
//! Per inbound message:
//! 1. quota admission (deny → fixed limit reply, no side effects)
//! 2. intent routes (match → fixed reply, no quota, no history)
//! 3. optional relevance gate (non-relevant → fixed refusal, no quota)
//! 4. drift check (drifted → session reset keeping the system turn)
//! 5. append user turn, fuse knowledge, call the model
//! 6. append assistant turn, increment quota, return the reply
//!
//! An upstream model failure resolves to the fixed apology: no assistant
//! turn is stored and no quota is consumed for the failed exchange.
//!
//! The whole exchange runs under a per-user async mutex so concurrent
//! messages from the same user (retries, rapid double-send) cannot race on
//! the quota counter or the history, while unrelated users proceed in
//! parallel.

use chrono::{DateTime, Utc};
use relaybot_config::ReplyConfig;
use relaybot_core::message::{Role, Turn};
use relaybot_retrieval::classifier::{Relevance, RelevanceGate};
use relaybot_retrieval::fusion::FusionPipeline;
use relaybot_session::drift::DriftDetector;
use relaybot_session::quota::{Decision, QuotaTracker};
use relaybot_session::store::SessionStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::intent::IntentRouter;

/// Orchestrates one reply per inbound message.
pub struct Dispatcher {
    quota: Arc<QuotaTracker>,
    store: Arc<SessionStore>,
    pipeline: FusionPipeline,
    intents: IntentRouter,
    replies: ReplyConfig,
    drift: Option<Arc<DriftDetector>>,
    gate: Option<RelevanceGate>,
    session_history: bool,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new(
        quota: Arc<QuotaTracker>,
        store: Arc<SessionStore>,
        pipeline: FusionPipeline,
        intents: IntentRouter,
        replies: ReplyConfig,
    ) -> Self {
        Self {
            quota,
            store,
            pipeline,
            intents,
            replies,
            drift: None,
            gate: None,
            session_history: true,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Enable topic-drift detection.
    pub fn with_drift(mut self, drift: Arc<DriftDetector>) -> Self {
        self.drift = Some(drift);
        self
    }

    /// Enable the relevance-classification gate.
    pub fn with_gate(mut self, gate: RelevanceGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Choose between full-history replies and single-prompt replies.
    pub fn with_session_history(mut self, enabled: bool) -> Self {
        self.session_history = enabled;
        self
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Handle one inbound message and produce exactly one reply text.
    pub async fn handle(&self, user_id: &str, text: &str, now: DateTime<Utc>) -> String {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        // 1. Admission
        if self.quota.admit(user_id, now).await == Decision::Deny {
            info!(user_id, "Daily limit reached");
            return self.replies.limit_exceeded.clone();
        }

        // 2. Fixed intents
        if let Some(route) = self.intents.first_match(text) {
            info!(user_id, intent = %route.name, "Intent route matched");
            return route.reply.clone();
        }

        // 3. Optional relevance gate
        if let Some(gate) = &self.gate {
            match gate.classify(text).await {
                Ok(Relevance::NonRelevant) => {
                    info!(user_id, "Message classified as non-relevant");
                    return self.replies.refusal.clone();
                }
                Ok(Relevance::Relevant) => {}
                Err(e) => {
                    warn!(user_id, error = %e, "Classification failed, treating as relevant");
                }
            }
        }

        // 4. Drift handling
        let session = self.store.get_or_create(user_id).await;
        if let Some(drift) = &self.drift {
            if drift.is_drifted(&session, text).await {
                info!(user_id, "Topic drift detected, resetting session");
                self.store.reset(user_id, true).await;
            }
        }
        self.store.append(user_id, Turn::user(text)).await;

        // 5. Fusion + model call
        let (prompt, used_knowledge) = self.pipeline.augment(text).await;
        debug!(user_id, used_knowledge, "Prompt prepared");

        let answer = if self.session_history {
            // The knowledge block rides along in the outbound request only;
            // stored history keeps the user's original words.
            // A tight length bound can have evicted the turn we just
            // appended, leaving only the pinned system turn.
            let mut turns = self.store.get_or_create(user_id).await.turns;
            match turns.last_mut() {
                Some(last) if last.role == Role::User => last.content = prompt,
                _ => turns.push(Turn::user(prompt)),
            }
            self.pipeline.answer_with_history(turns).await
        } else {
            self.pipeline.answer(&prompt).await
        };

        // 6. Terminal bookkeeping
        match answer {
            Ok(reply) => {
                self.store.append(user_id, Turn::assistant(&reply)).await;
                self.quota.increment(user_id).await;
                reply
            }
            Err(e) => {
                warn!(user_id, error = %e, "Upstream model call failed");
                self.replies.error.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relaybot_core::error::{ProviderError, SourceError};
    use relaybot_core::provider::{ChatRequest, ChatResponse, Embedder, Provider};
    use relaybot_core::retrieval::{KnowledgeSource, RetrievalResult, RetrievedItem};
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes the last submitted message, or fails when `broken`.
    struct MockProvider {
        broken: bool,
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            if self.broken {
                return Err(ProviderError::RateLimited { retry_after_secs: 5 });
            }
            let last = request
                .messages
                .last()
                .map(|t| t.content.clone())
                .unwrap_or_default();
            Ok(ChatResponse {
                message: Turn::assistant(format!("echo: {last}")),
                usage: None,
                model: "mock-model".into(),
            })
        }
    }

    struct FixedEmbedder {
        vectors: StdHashMap<String, Vec<f32>>,
    }

    impl FixedEmbedder {
        fn new(pairs: &[(&str, Vec<f32>)]) -> Self {
            Self {
                vectors: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            self.vectors
                .get(text)
                .cloned()
                .ok_or_else(|| ProviderError::Network("simulated outage".into()))
        }
    }

    struct CountingSource {
        name: String,
        outcome: Result<Vec<String>, SourceError>,
        calls: AtomicUsize,
    }

    impl CountingSource {
        fn returning(name: &str, contents: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                outcome: Ok(contents.iter().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn unavailable(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                outcome: Err(SourceError::Unavailable("simulated outage".into())),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl KnowledgeSource for CountingSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn query(&self, _text: &str) -> Result<RetrievalResult, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Ok(contents) => Ok(contents
                    .iter()
                    .map(|c| RetrievedItem::new(c.clone()))
                    .collect::<Vec<_>>()
                    .into()),
                Err(e) => Err(e.clone()),
            }
        }
    }

    struct Fixture {
        quota: Arc<QuotaTracker>,
        store: Arc<SessionStore>,
    }

    fn dispatcher_with(
        daily_limit: u32,
        sources: Vec<Arc<dyn KnowledgeSource>>,
        broken_provider: bool,
    ) -> (Dispatcher, Fixture) {
        let quota = Arc::new(QuotaTracker::new(daily_limit));
        let store = Arc::new(SessionStore::new(10, Some("persona".into())));
        let provider: Arc<dyn Provider> = Arc::new(MockProvider {
            broken: broken_provider,
        });
        let pipeline = FusionPipeline::new(sources, provider, "mock-model", 0.7, 256);
        let intents = IntentRouter::from_config(&relaybot_config::AppConfig::default().intents);
        let replies = ReplyConfig::default();

        let dispatcher = Dispatcher::new(quota.clone(), store.clone(), pipeline, intents, replies);
        (dispatcher, Fixture { quota, store })
    }

    // Five billable messages answered, the sixth denied without billing.
    #[tokio::test]
    async fn daily_limit_enforced() {
        let (dispatcher, fx) = dispatcher_with(5, vec![], false);
        let now = Utc::now();

        for i in 0..5 {
            let reply = dispatcher.handle("user_1", &format!("血糖問題 {i}"), now).await;
            assert!(reply.starts_with("echo:"), "message {i} should be answered");
        }

        let denied = dispatcher.handle("user_1", "第六個問題", now).await;
        assert_eq!(denied, ReplyConfig::default().limit_exceeded);
        assert_eq!(fx.quota.count("user_1").await, 5);
    }

    // An intent route answers without consuming quota or touching history.
    #[tokio::test]
    async fn introduction_intent_is_free() {
        let (dispatcher, fx) = dispatcher_with(5, vec![], false);

        let reply = dispatcher.handle("user_1", "你是誰", Utc::now()).await;
        assert!(reply.contains("醫療小助理"));
        assert_eq!(fx.quota.count("user_1").await, 0);
        // History untouched: session only materializes on a billable exchange
        assert_eq!(fx.store.session_count().await, 0);
    }

    // Low similarity resets the session before the new message is processed.
    #[tokio::test]
    async fn drift_resets_session() {
        let (dispatcher, fx) = dispatcher_with(5, vec![], false);
        let embedder = FixedEmbedder::new(&[
            ("message A", vec![1.0, 0.0]),
            // cosine([1,0],[0.2,0.98]) ≈ 0.2
            ("message B", vec![0.2, 0.98]),
        ]);
        let dispatcher = dispatcher.with_drift(Arc::new(DriftDetector::new(
            Arc::new(embedder),
            0.5,
        )));

        let now = Utc::now();
        dispatcher.handle("user_1", "message A", now).await;
        dispatcher.handle("user_1", "message B", now).await;

        let session = fx.store.get_or_create("user_1").await;
        // [system, user(B), assistant(echo)] — nothing from the A exchange
        assert_eq!(session.len(), 3);
        assert_eq!(session.turns[0].role, Role::System);
        assert_eq!(session.turns[1].content, "message B");
        assert!(session.turns.iter().all(|t| t.content != "message A"));
    }

    #[tokio::test]
    async fn no_drift_keeps_history() {
        let (dispatcher, fx) = dispatcher_with(5, vec![], false);
        let embedder = FixedEmbedder::new(&[
            ("message A", vec![1.0, 0.0]),
            ("message B", vec![0.9, 0.1]),
        ]);
        let dispatcher = dispatcher.with_drift(Arc::new(DriftDetector::new(
            Arc::new(embedder),
            0.5,
        )));

        let now = Utc::now();
        dispatcher.handle("user_1", "message A", now).await;
        dispatcher.handle("user_1", "message B", now).await;

        let session = fx.store.get_or_create("user_1").await;
        // [system, user(A), assistant, user(B), assistant]
        assert_eq!(session.len(), 5);
        assert_eq!(session.turns[1].content, "message A");
        assert_eq!(session.turns[3].content, "message B");
    }

    // A vector outage falls through to the web source.
    #[tokio::test]
    async fn vector_outage_falls_through_to_web() {
        let vector = CountingSource::unavailable("vector_store");
        let web = CountingSource::returning("web_search", &["web item"]);
        let (dispatcher, _fx) =
            dispatcher_with(5, vec![vector.clone(), web.clone()], false);

        let reply = dispatcher.handle("user_1", "some question", Utc::now()).await;

        // The model still phrases the reply; the knowledge block holds the web item
        assert!(reply.contains("Related knowledge"));
        assert!(reply.contains("web item"));
        assert_eq!(vector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(web.calls.load(Ordering::SeqCst), 1);
    }

    // Fusion priority: web search never queried when the vector source hits.
    #[tokio::test]
    async fn fusion_priority_skips_later_sources() {
        let vector = CountingSource::returning("vector_store", &["vector item"]);
        let web = CountingSource::returning("web_search", &["web item"]);
        let (dispatcher, _fx) =
            dispatcher_with(5, vec![vector.clone(), web.clone()], false);

        dispatcher.handle("user_1", "some question", Utc::now()).await;

        assert_eq!(vector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(web.calls.load(Ordering::SeqCst), 0);
    }

    // When every source misses, the reply is a raw completion.
    #[tokio::test]
    async fn all_sources_miss_gives_raw_completion() {
        let vector = CountingSource::unavailable("vector_store");
        let web = CountingSource::returning("web_search", &[]);
        let (dispatcher, _fx) = dispatcher_with(5, vec![vector, web], false);

        let reply = dispatcher.handle("user_1", "some question", Utc::now()).await;
        assert_eq!(reply, "echo: some question");
        assert!(!reply.contains("Related knowledge"));
    }

    #[tokio::test]
    async fn non_relevant_message_refused_without_side_effects() {
        struct NonRelevantProvider;

        #[async_trait]
        impl Provider for NonRelevantProvider {
            fn name(&self) -> &str {
                "mock"
            }
            async fn complete(
                &self,
                _request: ChatRequest,
            ) -> Result<ChatResponse, ProviderError> {
                Ok(ChatResponse {
                    message: Turn::assistant("non-relevant"),
                    usage: None,
                    model: "mock-model".into(),
                })
            }
        }

        let (dispatcher, fx) = dispatcher_with(5, vec![], false);
        let gate = RelevanceGate::new(
            Arc::new(NonRelevantProvider),
            "mock-model",
            "Classify the following message:",
        );
        let dispatcher = dispatcher.with_gate(gate);

        let reply = dispatcher.handle("user_1", "無關的問題", Utc::now()).await;
        assert_eq!(reply, ReplyConfig::default().refusal);
        assert_eq!(fx.quota.count("user_1").await, 0);
        assert_eq!(fx.store.session_count().await, 0);
    }

    #[tokio::test]
    async fn classifier_failure_fails_open() {
        let (dispatcher, _fx) = dispatcher_with(5, vec![], false);
        let gate = RelevanceGate::new(
            Arc::new(MockProvider { broken: true }),
            "mock-model",
            "Classify the following message:",
        );
        let dispatcher = dispatcher.with_gate(gate);

        // Gate provider is broken, but the answering provider is fine
        let reply = dispatcher.handle("user_1", "血糖問題", Utc::now()).await;
        assert!(reply.starts_with("echo:"));
    }

    #[tokio::test]
    async fn upstream_failure_returns_apology_without_billing() {
        let (dispatcher, fx) = dispatcher_with(5, vec![], true);

        let reply = dispatcher.handle("user_1", "血糖問題", Utc::now()).await;
        assert_eq!(reply, ReplyConfig::default().error);
        assert_eq!(fx.quota.count("user_1").await, 0);

        // The user turn is stored but no assistant turn was appended
        let session = fx.store.get_or_create("user_1").await;
        assert!(session.turns.iter().all(|t| t.role != Role::Assistant));
    }

    #[tokio::test]
    async fn stored_history_keeps_original_words() {
        let vector = CountingSource::returning("vector_store", &["a fact"]);
        let (dispatcher, fx) = dispatcher_with(5, vec![vector], false);

        let reply = dispatcher.handle("user_1", "original words", Utc::now()).await;
        // The outbound request carried the knowledge block...
        assert!(reply.contains("a fact"));

        // ...but the stored user turn is untouched
        let session = fx.store.get_or_create("user_1").await;
        assert_eq!(session.turns[1].content, "original words");
    }

    // With a length bound of one the just-appended user turn is evicted in
    // favor of the pinned persona, so the snapshot ends on a system turn.
    // The outbound request must still carry the question as a user turn
    // instead of overwriting the persona.
    #[tokio::test]
    async fn minimal_length_bound_still_sends_user_turn() {
        struct CapturingProvider {
            seen: std::sync::Mutex<Vec<(Role, String)>>,
        }

        #[async_trait]
        impl Provider for CapturingProvider {
            fn name(&self) -> &str {
                "mock"
            }
            async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
                *self.seen.lock().unwrap() = request
                    .messages
                    .iter()
                    .map(|t| (t.role, t.content.clone()))
                    .collect();
                Ok(ChatResponse {
                    message: Turn::assistant("ok"),
                    usage: None,
                    model: "mock-model".into(),
                })
            }
        }

        let provider = Arc::new(CapturingProvider {
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let quota = Arc::new(QuotaTracker::new(5));
        let store = Arc::new(SessionStore::new(1, Some("persona".into())));
        let pipeline = FusionPipeline::new(vec![], provider.clone(), "mock-model", 0.7, 256);
        let intents = IntentRouter::from_config(&relaybot_config::AppConfig::default().intents);
        let dispatcher = Dispatcher::new(
            quota,
            store.clone(),
            pipeline,
            intents,
            ReplyConfig::default(),
        );

        dispatcher.handle("user_1", "血壓問題", Utc::now()).await;

        let seen = provider.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (Role::System, "persona".to_string()),
                (Role::User, "血壓問題".to_string()),
            ]
        );
        // The stored session still honors the bound
        let session = store.get_or_create("user_1").await;
        assert_eq!(session.len(), 1);
        assert_eq!(session.turns[0].content, "persona");
    }

    #[tokio::test]
    async fn single_prompt_mode_ignores_history() {
        let (dispatcher, _fx) = dispatcher_with(5, vec![], false);
        let dispatcher = dispatcher.with_session_history(false);

        let now = Utc::now();
        dispatcher.handle("user_1", "first", now).await;
        let reply = dispatcher.handle("user_1", "second", now).await;

        // MockProvider echoes the last submitted message; in single-prompt
        // mode that is exactly the new message, never a history turn.
        assert_eq!(reply, "echo: second");
    }

    #[tokio::test]
    async fn concurrent_same_user_messages_serialize() {
        let (dispatcher, fx) = dispatcher_with(10, vec![], false);
        let dispatcher = Arc::new(dispatcher);

        let now = Utc::now();
        let mut handles = Vec::new();
        for i in 0..8 {
            let d = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                d.handle("user_1", &format!("msg {i}"), now).await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Every exchange billed exactly once, history grew exactly two
        // turns per exchange plus the pinned system turn, capped at max_len
        assert_eq!(fx.quota.count("user_1").await, 8);
        let session = fx.store.get_or_create("user_1").await;
        assert!(session.len() <= 10);
        assert_eq!(session.turns[0].role, Role::System);
    }

    #[tokio::test]
    async fn different_users_do_not_share_state() {
        let (dispatcher, fx) = dispatcher_with(1, vec![], false);
        let now = Utc::now();

        dispatcher.handle("a", "question", now).await;
        let denied = dispatcher.handle("a", "question again", now).await;
        let allowed = dispatcher.handle("b", "question", now).await;

        assert_eq!(denied, ReplyConfig::default().limit_exceeded);
        assert!(allowed.starts_with("echo:"));
        assert_eq!(fx.quota.count("a").await, 1);
        assert_eq!(fx.quota.count("b").await, 1);
    }
}
