//! HTTP webhook gateway for Relaybot.
//!
//! Exposes the inbound chat-platform webhook and a health check:
//!
//! - `POST /callback` — signed webhook carrying an events array
//! - `GET  /health`   — liveness probe
//!
//! Built on Axum. Signature verification covers the raw request body with
//! HMAC-SHA256, base64-encoded in the `X-Signature` header. Events that are
//! not text messages are skipped without error; each text event is handed to
//! the dispatcher and produces exactly one reply, delivered to the configured
//! reply endpoint and echoed in the HTTP response.

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
};
use base64::Engine;
use relaybot_core::error::GatewayError;
use relaybot_dispatch::Dispatcher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub dispatcher: Arc<Dispatcher>,
    /// HMAC shared secret. None disables verification (local development).
    pub channel_secret: Option<String>,
    /// Outbound reply delivery. None echoes replies in the response only.
    pub reply: Option<ReplySender>,
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/callback", post(callback_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Verify a base64-encoded HMAC-SHA256 signature over the raw body.
///
/// Uses constant-time comparison to prevent timing attacks.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let provided = match base64::engine::general_purpose::STANDARD.decode(signature) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    mac.verify_slice(&provided).is_ok()
}

// --- Wire types ---

#[derive(Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    events: Vec<WebhookEvent>,
}

#[derive(Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    kind: String,
    source: Option<EventSource>,
    message: Option<EventMessage>,
    #[serde(default)]
    reply_token: Option<String>,
}

#[derive(Deserialize)]
struct EventSource {
    user_id: String,
}

#[derive(Deserialize)]
struct EventMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize)]
struct CallbackResponse {
    replies: Vec<ReplyItem>,
}

#[derive(Serialize)]
struct ReplyItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_token: Option<String>,
    text: String,
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn callback_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackResponse>, StatusCode> {
    if let Some(secret) = &state.channel_secret {
        let signature = headers
            .get("X-Signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !verify_signature(secret, &body, signature) {
            warn!("Webhook signature verification failed");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Invalid webhook payload");
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    let mut replies = Vec::new();
    for event in payload.events {
        // Non-message and non-text events are dropped without error
        let text = match (&event.kind, &event.message) {
            (kind, Some(msg)) if kind == "message" && msg.kind == "text" => {
                match &msg.text {
                    Some(text) if !text.is_empty() => text.clone(),
                    _ => {
                        debug!("Skipping text event with empty body");
                        continue;
                    }
                }
            }
            _ => {
                debug!(kind = %event.kind, "Skipping non-text event");
                continue;
            }
        };

        let Some(source) = &event.source else {
            debug!("Skipping event without a source user");
            continue;
        };

        let reply = state
            .dispatcher
            .handle(&source.user_id, &text, chrono::Utc::now())
            .await;

        if let (Some(sender), Some(token)) = (&state.reply, &event.reply_token) {
            if let Err(e) = sender.send(token, &reply).await {
                warn!(error = %e, "Reply delivery failed");
            }
        }

        replies.push(ReplyItem {
            reply_token: event.reply_token,
            text: reply,
        });
    }

    info!(replies = replies.len(), "Webhook processed");
    Ok(Json(CallbackResponse { replies }))
}

// --- Reply delivery ---

/// Delivers replies to the platform's reply endpoint.
pub struct ReplySender {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OutboundReply<'a> {
    reply_token: &'a str,
    text: &'a str,
}

impl ReplySender {
    pub fn new(endpoint: impl Into<String>, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }

    /// POST one reply to the configured endpoint.
    pub async fn send(&self, reply_token: &str, text: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&OutboundReply { reply_token, text })
            .send()
            .await
            .map_err(|e| GatewayError::ReplyFailed {
                reply_token: reply_token.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(GatewayError::ReplyFailed {
                reply_token: reply_token.to_string(),
                reason: format!("endpoint returned {}", response.status()),
            });
        }

        Ok(())
    }
}
