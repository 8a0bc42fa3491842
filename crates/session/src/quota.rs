//! Per-user message quota with a rolling 24-hour window.
//!
//! The window resets lazily: a record is only (re)initialized when the user
//! is next observed at or past `reset_at`. Idle users are never touched.
//!
//! Denial is a policy decision, not an error; the tracker never produces the
//! user-facing deny message itself.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Admission verdict for one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// One user's consumption in the current window.
#[derive(Debug, Clone)]
struct UserQuota {
    count: u32,
    reset_at: DateTime<Utc>,
}

impl UserQuota {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            reset_at: now + Duration::days(1),
        }
    }
}

/// Tracks per-user message counts against a single configured daily limit.
pub struct QuotaTracker {
    limit: u32,
    records: RwLock<HashMap<String, UserQuota>>,
}

impl QuotaTracker {
    /// Create a tracker. `limit` must be positive (validated at config load).
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Admission check for one message.
    ///
    /// Creates the record on first sight and applies the lazy window reset
    /// before evaluating the limit. Does not consume quota; call
    /// [`increment`](Self::increment) once a billable reply was produced.
    pub async fn admit(&self, user_id: &str, now: DateTime<Utc>) -> Decision {
        let mut records = self.records.write().await;

        let record = records
            .entry(user_id.to_string())
            .or_insert_with(|| UserQuota::fresh(now));

        if now >= record.reset_at {
            debug!(user_id, "Quota window expired, starting fresh window");
            *record = UserQuota::fresh(now);
        }

        if record.count >= self.limit {
            debug!(user_id, count = record.count, limit = self.limit, "Quota denied");
            Decision::Deny
        } else {
            Decision::Allow
        }
    }

    /// Consume one unit of quota after a successful billable reply.
    ///
    /// Callers must have admitted the user first; incrementing a user with
    /// no record is a no-op rather than creating a half-initialized window.
    pub async fn increment(&self, user_id: &str) {
        let mut records = self.records.write().await;
        match records.get_mut(user_id) {
            Some(record) => record.count += 1,
            None => debug!(user_id, "Increment without admission, ignoring"),
        }
    }

    /// Current count for a user, for diagnostics.
    pub async fn count(&self, user_id: &str) -> u32 {
        self.records
            .read()
            .await
            .get(user_id)
            .map(|r| r.count)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_message_is_admitted() {
        let tracker = QuotaTracker::new(5);
        let now = Utc::now();
        assert_eq!(tracker.admit("user_1", now).await, Decision::Allow);
        assert_eq!(tracker.count("user_1").await, 0);
    }

    #[tokio::test]
    async fn quota_monotonicity() {
        let tracker = QuotaTracker::new(5);
        let now = Utc::now();

        for i in 0..5 {
            assert_eq!(tracker.admit("user_1", now).await, Decision::Allow, "message {i}");
            tracker.increment("user_1").await;
        }

        assert_eq!(tracker.count("user_1").await, 5);
        assert_eq!(tracker.admit("user_1", now).await, Decision::Deny);
        // A denied message never bumps the count
        assert_eq!(tracker.count("user_1").await, 5);
    }

    #[tokio::test]
    async fn window_reset_clears_count() {
        let tracker = QuotaTracker::new(2);
        let now = Utc::now();

        tracker.admit("user_1", now).await;
        tracker.increment("user_1").await;
        tracker.increment("user_1").await;
        assert_eq!(tracker.admit("user_1", now).await, Decision::Deny);

        // One full day later the window rolls over regardless of prior count
        let tomorrow = now + Duration::days(1);
        assert_eq!(tracker.admit("user_1", tomorrow).await, Decision::Allow);
        assert_eq!(tracker.count("user_1").await, 0);
    }

    #[tokio::test]
    async fn reset_is_lazy_per_user() {
        let tracker = QuotaTracker::new(5);
        let now = Utc::now();

        tracker.admit("active", now).await;
        tracker.increment("active").await;

        // "idle" has never been seen; it must not exist until first access
        assert_eq!(tracker.count("idle").await, 0);
        assert_eq!(tracker.count("active").await, 1);
    }

    #[tokio::test]
    async fn users_are_independent() {
        let tracker = QuotaTracker::new(1);
        let now = Utc::now();

        tracker.admit("a", now).await;
        tracker.increment("a").await;
        assert_eq!(tracker.admit("a", now).await, Decision::Deny);
        assert_eq!(tracker.admit("b", now).await, Decision::Allow);
    }

    #[tokio::test]
    async fn increment_without_record_is_noop() {
        let tracker = QuotaTracker::new(5);
        tracker.increment("ghost").await;
        assert_eq!(tracker.count("ghost").await, 0);
    }
}
