//! # Relaybot Core
//!
//! Domain types, traits, and error definitions for the Relaybot chat relay
//! service. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (language model, embedding service, knowledge
//! source) is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod retrieval;
pub mod vector;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{Role, Session, Turn};
pub use provider::{ChatRequest, ChatResponse, Embedder, Provider, Usage};
pub use retrieval::{KnowledgeSource, RetrievalResult, RetrievedItem};
pub use vector::cosine_similarity;
