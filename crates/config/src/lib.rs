//! Configuration loading, validation, and management for Relaybot.
//!
//! Loads configuration from a TOML file with environment variable overrides.
//! Validates all settings at startup.
//!
//! Every tunable the orchestration core needs is a single configured value
//! here: the daily quota, the conversation length bound, the drift
//! similarity threshold, the persona text, and all fixed reply strings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `relaybot.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the chat/embedding provider (env override wins)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Chat model
    #[serde(default = "default_model")]
    pub model: String,

    /// Embedding model. None disables drift detection and the vector source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,

    /// Sampling temperature for replies
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Bounded timeout applied to every outbound HTTP call, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Messages a user may send per rolling 24-hour window
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,

    /// Maximum turns kept per session (system turn included)
    #[serde(default = "default_max_conversation_length")]
    pub max_conversation_length: usize,

    /// Cosine similarity below which successive user messages count as drift
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Whether replies are generated from the full bounded history
    /// (true) or from the single augmented prompt (false)
    #[serde(default = "default_true")]
    pub session_history: bool,

    /// Pinned system persona. None means sessions have no system turn.
    #[serde(default = "default_persona", skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,

    /// Fixed user-facing reply strings
    #[serde(default)]
    pub replies: ReplyConfig,

    /// Ordered intent routes evaluated before any model call
    #[serde(default = "default_intents")]
    pub intents: Vec<IntentConfig>,

    /// Optional relevance-classification gate
    #[serde(default)]
    pub classification: ClassificationConfig,

    /// Knowledge sources in priority order
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Gateway (inbound webhook) configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_daily_limit() -> u32 {
    5
}
fn default_max_conversation_length() -> usize {
    10
}
fn default_similarity_threshold() -> f32 {
    0.5
}
fn default_true() -> bool {
    true
}
fn default_persona() -> Option<String> {
    Some("你是一位親切的醫療小助理，請用繁體中文回答使用者的問題。".into())
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("daily_limit", &self.daily_limit)
            .field("max_conversation_length", &self.max_conversation_length)
            .field("similarity_threshold", &self.similarity_threshold)
            .field("session_history", &self.session_history)
            .field("persona", &self.persona)
            .field("replies", &self.replies)
            .field("intents", &self.intents)
            .field("classification", &self.classification)
            .field("sources", &self.sources)
            .field("providers", &self.providers)
            .field("gateway", &self.gateway)
            .finish()
    }
}

/// Fixed user-facing reply strings.
///
/// Defaults carry the strings the original deployment shipped with; every
/// one of them is overridable per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyConfig {
    /// Returned when the daily quota is exhausted
    #[serde(default = "default_limit_exceeded")]
    pub limit_exceeded: String,

    /// Returned when the classification gate rejects a message
    #[serde(default = "default_refusal")]
    pub refusal: String,

    /// Returned when the upstream model call fails
    #[serde(default = "default_error")]
    pub error: String,
}

fn default_limit_exceeded() -> String {
    "您今天的用量已經超過，請明天再詢問。".into()
}
fn default_refusal() -> String {
    "您的問題已經超出我的功能，我無法進行回覆，請重新提出您的問題。".into()
}
fn default_error() -> String {
    "不好意思，系統暫時無法回覆，請稍後再試。".into()
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            limit_exceeded: default_limit_exceeded(),
            refusal: default_refusal(),
            error: default_error(),
        }
    }
}

/// One intent route: if any keyword appears in the message, answer with the
/// fixed reply and consume no quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentConfig {
    /// Route name, used in logs
    pub name: String,

    /// Substring keywords that trigger this route
    pub keywords: Vec<String>,

    /// The fixed reply text
    pub reply: String,
}

fn default_intents() -> Vec<IntentConfig> {
    vec![IntentConfig {
        name: "introduction".into(),
        keywords: vec!["介紹".into(), "你是誰".into()],
        reply: "我是醫療小助理，您有任何關於糖尿病、高血壓及內分泌的相關問題都可以問我。".into(),
    }]
}

/// Relevance-classification gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Whether the gate runs at all
    #[serde(default)]
    pub enabled: bool,

    /// The fixed classification instruction sent as the user prompt prefix
    #[serde(default = "default_classification_instruction")]
    pub instruction: String,
}

fn default_classification_instruction() -> String {
    "Classify the following message as relevant or non-relevant \
     to medical, endocrinology, medications, medical quality, or patient safety:"
        .into()
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            instruction: default_classification_instruction(),
        }
    }
}

/// A knowledge source, in query priority order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// In-process vector store over seeded reference documents
    Vector {
        /// Directory of reference documents, one document per file
        #[serde(default, skip_serializing_if = "Option::is_none")]
        documents_dir: Option<PathBuf>,

        /// Minimum cosine similarity for a match
        #[serde(default = "default_min_score")]
        min_score: f32,

        /// Maximum items returned
        #[serde(default = "default_top_k")]
        top_k: usize,
    },
    /// External search endpoint returning JSON results
    WebSearch {
        /// Search endpoint URL
        endpoint: String,

        /// Optional API key sent as a bearer token
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,

        /// Maximum items returned
        #[serde(default = "default_top_k")]
        top_k: usize,
    },
}

fn default_min_score() -> f32 {
    0.75
}
fn default_top_k() -> usize {
    3
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared secret for webhook signature verification.
    /// None disables verification (local development only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_secret: Option<String>,

    /// Platform reply endpoint. None echoes replies in the HTTP response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_url: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8787
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("channel_secret", &redact(&self.channel_secret))
            .field("reply_url", &self.reply_url)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            channel_secret: None,
            reply_url: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a file path, applying env overrides.
    ///
    /// Environment variables checked:
    /// - `RELAYBOT_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `RELAYBOT_MODEL`
    /// - `RELAYBOT_CHANNEL_SECRET`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("RELAYBOT_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("RELAYBOT_MODEL") {
            config.model = model;
        }

        if config.gateway.channel_secret.is_none() {
            config.gateway.channel_secret = std::env::var("RELAYBOT_CHANNEL_SECRET").ok();
        }

        Ok(config)
    }

    /// Load configuration from a specific file path without env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daily_limit == 0 {
            return Err(ConfigError::ValidationError(
                "daily_limit must be a positive integer".into(),
            ));
        }

        if self.max_conversation_length < 1 {
            return Err(ConfigError::ValidationError(
                "max_conversation_length must be >= 1".into(),
            ));
        }

        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::ValidationError(
                "similarity_threshold must be within [-1, 1]".into(),
            ));
        }

        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for first-run setup).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            model: default_model(),
            embedding_model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            daily_limit: default_daily_limit(),
            max_conversation_length: default_max_conversation_length(),
            similarity_threshold: default_similarity_threshold(),
            session_history: true,
            persona: default_persona(),
            replies: ReplyConfig::default(),
            intents: default_intents(),
            classification: ClassificationConfig::default(),
            sources: vec![],
            providers: HashMap::new(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
