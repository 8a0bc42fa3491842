//! Per-user state for Relaybot: quota tracking, bounded conversation
//! sessions, and topic-drift detection.
//!
//! All state here is process-local and lives for the process lifetime; a
//! restart resets quotas and history. The stores are safe to share across
//! tasks but do not serialize a single user's exchanges — that discipline
//! belongs to the dispatcher.

pub mod drift;
pub mod quota;
pub mod store;

pub use drift::DriftDetector;
pub use quota::{Decision, QuotaTracker};
pub use store::SessionStore;
