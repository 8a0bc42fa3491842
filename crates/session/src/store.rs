//! Bounded per-user conversation store.
//!
//! Sessions are keyed by user ID and created on first message. When a
//! persona is configured, every new (or reset) session starts with the
//! pinned system turn at index 0; truncation keeps that turn plus the most
//! recent `max_len - 1` turns in conversation order.

use relaybot_core::message::{Session, Turn};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Process-lifetime store of conversation sessions.
pub struct SessionStore {
    max_len: usize,
    persona: Option<String>,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    /// Create a store. `max_len` must be >= 1 (validated at config load).
    pub fn new(max_len: usize, persona: Option<String>) -> Self {
        Self {
            max_len,
            persona,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn fresh_session(&self, user_id: &str) -> Session {
        let mut session = Session::new(user_id);
        if let Some(persona) = &self.persona {
            session.push(Turn::system(persona));
        }
        session
    }

    /// Snapshot of a user's session, creating it if absent.
    pub async fn get_or_create(&self, user_id: &str) -> Session {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(user_id.to_string())
            .or_insert_with(|| self.fresh_session(user_id))
            .clone()
    }

    /// Append a turn and enforce the length bound.
    pub async fn append(&self, user_id: &str, turn: Turn) {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(user_id.to_string())
            .or_insert_with(|| self.fresh_session(user_id));

        session.push(turn);
        Self::truncate(session, self.max_len);
    }

    /// Replace a user's session with a fresh one.
    ///
    /// With `keep_system` the persona turn is re-pinned; without it the
    /// session restarts empty.
    pub async fn reset(&self, user_id: &str, keep_system: bool) {
        debug!(user_id, keep_system, "Resetting session");
        let mut sessions = self.sessions.write().await;
        let session = if keep_system {
            self.fresh_session(user_id)
        } else {
            Session::new(user_id)
        };
        sessions.insert(user_id.to_string(), session);
    }

    /// Enforce the invariant: length <= max_len, system turn never evicted.
    fn truncate(session: &mut Session, max_len: usize) {
        if session.turns.len() <= max_len {
            return;
        }

        if session.has_system_turn() {
            let keep_tail = max_len.saturating_sub(1);
            let tail_start = session.turns.len() - keep_tail;
            let mut turns = Vec::with_capacity(max_len);
            turns.push(session.turns[0].clone());
            turns.extend_from_slice(&session.turns[tail_start..]);
            session.turns = turns;
        } else {
            let tail_start = session.turns.len() - max_len;
            session.turns.drain(..tail_start);
        }
    }

    /// Number of live sessions, for diagnostics.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
