//! Knowledge retrieval for Relaybot.
//!
//! - [`VectorSource`] — in-process vector similarity over seeded documents
//! - [`WebSearchSource`] — external JSON search endpoint adapter
//! - [`RelevanceGate`] — optional LLM pre-classification of inbound messages
//! - [`FusionPipeline`] — prioritized source querying plus the model call

pub mod classifier;
pub mod fusion;
pub mod vector_store;
pub mod web_search;

pub use classifier::{Relevance, RelevanceGate};
pub use fusion::FusionPipeline;
pub use vector_store::{Document, DocumentStore, VectorSource};
pub use web_search::WebSearchSource;
