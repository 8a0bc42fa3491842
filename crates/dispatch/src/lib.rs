//! The response dispatcher: the single externally visible operation of the
//! orchestration core.
//!
//! Given `(user_id, text, now)` it runs admission, intent routing, the
//! optional relevance gate, drift handling, knowledge fusion, and the model
//! call, and returns exactly one reply text. It is the only component that
//! performs side effects (quota increments, history mutation).

pub mod dispatcher;
pub mod intent;

pub use dispatcher::Dispatcher;
pub use intent::{IntentRoute, IntentRouter};
