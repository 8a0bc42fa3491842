//! Error types for the Relaybot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! Note that two spec-level conditions are deliberately *not* errors:
//! a denied quota is a policy decision resolved into a fixed reply, and a
//! malformed inbound event is silently skipped at the gateway.

use thiserror::Error;

/// The top-level error type for all Relaybot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Upstream model / embedding errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Knowledge source errors ---
    #[error("Knowledge source error: {0}")]
    Source(#[from] SourceError),

    // --- Gateway errors ---
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures from the upstream language-model or embedding service.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures from a knowledge source.
///
/// An `Err(SourceError)` means the source was *unavailable* (network, auth,
/// timeout). That is distinct from `Ok` with an empty result set, which means
/// the source was queried successfully and simply found nothing.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Source timed out: {source_name} after {timeout_secs}s")]
    Timeout {
        source_name: String,
        timeout_secs: u64,
    },

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

/// Failures at the inbound webhook boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Reply delivery failed for {reply_token}: {reason}")]
    ReplyFailed { reply_token: String, reason: String },

    #[error("Bind failed on {addr}: {reason}")]
    BindFailed { addr: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn source_error_displays_correctly() {
        let err = Error::Source(SourceError::Timeout {
            source_name: "web_search".into(),
            timeout_secs: 30,
        });
        assert!(err.to_string().contains("web_search"));
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn gateway_error_displays_correctly() {
        let err = Error::Gateway(GatewayError::ReplyFailed {
            reply_token: "tok_1".into(),
            reason: "connection reset".into(),
        });
        assert!(err.to_string().contains("tok_1"));
        assert!(err.to_string().contains("connection reset"));
    }
}
