//! Intent routing.
//!
//! An ordered list of `(predicate, reply)` pairs evaluated before any model
//! call. A matched route answers with its fixed reply and consumes no quota.
//! Replaces ad hoc substring branching with a table the dispatcher state
//! machine can be tested against in isolation.

use relaybot_config::IntentConfig;

/// One intent route: keyword predicate → fixed reply.
#[derive(Debug, Clone)]
pub struct IntentRoute {
    pub name: String,
    keywords: Vec<String>,
    pub reply: String,
}

impl IntentRoute {
    pub fn new(
        name: impl Into<String>,
        keywords: Vec<String>,
        reply: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            keywords,
            reply: reply.into(),
        }
    }

    /// Whether any keyword appears in the message.
    pub fn matches(&self, text: &str) -> bool {
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }
}

/// Ordered intent routes, evaluated in priority order.
#[derive(Debug, Clone, Default)]
pub struct IntentRouter {
    routes: Vec<IntentRoute>,
}

impl IntentRouter {
    pub fn new(routes: Vec<IntentRoute>) -> Self {
        Self { routes }
    }

    pub fn from_config(configs: &[IntentConfig]) -> Self {
        Self::new(
            configs
                .iter()
                .map(|c| IntentRoute::new(&c.name, c.keywords.clone(), &c.reply))
                .collect(),
        )
    }

    /// The first route whose predicate matches, if any.
    pub fn first_match(&self, text: &str) -> Option<&IntentRoute> {
        self.routes.iter().find(|r| r.matches(text))
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
