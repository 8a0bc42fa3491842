//! Turn and Session domain types.
//!
//! These are the core value objects that flow through the system:
//! a user sends a message → the gateway decodes it → the dispatcher appends
//! it to the user's session → the provider generates a reply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a turn in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (persona, behavior rules)
    System,
    /// The end user
    User,
    /// The model's reply
    Assistant,
}

/// A single turn in a conversation.
///
/// Turns are immutable once appended; insertion order is conversation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID
    pub id: String,

    /// Who produced this turn
    pub role: Role,

    /// The text content
    pub content: String,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a new user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a new system turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A per-user conversation session: an ordered sequence of turns.
///
/// Invariant maintained by the session store: turn 0, when present, is the
/// pinned system turn and is never evicted by truncation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque platform user ID this session belongs to
    pub user_id: String,

    /// Ordered turns
    pub turns: Vec<Turn>,

    /// When this session was created
    pub created_at: DateTime<Utc>,

    /// When the last turn was appended
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new empty session for a user.
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a turn to the session.
    pub fn push(&mut self, turn: Turn) {
        self.updated_at = Utc::now();
        self.turns.push(turn);
    }

    /// The most recent user turn, if any.
    pub fn last_user_turn(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.role == Role::User)
    }

    /// Whether turn 0 is a pinned system turn.
    pub fn has_system_turn(&self) -> bool {
        self.turns.first().is_some_and(|t| t.role == Role::System)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_turn() {
        let turn = Turn::user("有糖尿病的話要注意什麼?");
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.content, "有糖尿病的話要注意什麼?");
        assert!(!turn.id.is_empty());
    }

    #[test]
    fn session_tracks_updates() {
        let mut session = Session::new("user_1");
        let created = session.created_at;

        session.push(Turn::user("First message"));
        assert_eq!(session.len(), 1);
        assert!(session.updated_at >= created);
    }

    #[test]
    fn last_user_turn_skips_assistant() {
        let mut session = Session::new("user_1");
        session.push(Turn::system("persona"));
        session.push(Turn::user("question"));
        session.push(Turn::assistant("answer"));

        let last = session.last_user_turn().unwrap();
        assert_eq!(last.content, "question");
    }

    #[test]
    fn last_user_turn_none_without_user() {
        let mut session = Session::new("user_1");
        session.push(Turn::system("persona"));
        assert!(session.last_user_turn().is_none());
    }

    #[test]
    fn system_turn_detection() {
        let mut session = Session::new("user_1");
        assert!(!session.has_system_turn());

        session.push(Turn::system("persona"));
        assert!(session.has_system_turn());
    }

    #[test]
    fn turn_serialization_roundtrip() {
        let turn = Turn::assistant("A reply");
        let json = serde_json::to_string(&turn).unwrap();
        let deserialized: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.content, "A reply");
        assert_eq!(deserialized.role, Role::Assistant);
    }
}
