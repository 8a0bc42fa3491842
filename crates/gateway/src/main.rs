//! Relaybot — the main entry point.
//!
//! Loads configuration, wires the provider, knowledge sources, and the
//! dispatcher, then serves the webhook gateway.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use relaybot_config::{AppConfig, SourceConfig};
use relaybot_core::retrieval::KnowledgeSource;
use relaybot_dispatch::{Dispatcher, IntentRouter};
use relaybot_gateway::{GatewayState, ReplySender, build_router};
use relaybot_retrieval::classifier::RelevanceGate;
use relaybot_retrieval::fusion::FusionPipeline;
use relaybot_retrieval::vector_store::{DocumentStore, VectorSource};
use relaybot_retrieval::web_search::WebSearchSource;
use relaybot_session::drift::DriftDetector;
use relaybot_session::quota::QuotaTracker;
use relaybot_session::store::SessionStore;

#[derive(Parser)]
#[command(
    name = "relaybot",
    about = "Relaybot — webhook chat relay with quota, drift, and knowledge fusion",
    version
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "relaybot.toml")]
    config: PathBuf,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = AppConfig::load(&cli.config)?;
    let port = cli.port.unwrap_or(config.gateway.port);

    let provider = relaybot_providers::build_provider(&config)?;
    let embedder = relaybot_providers::build_embedder(&config)?;
    if embedder.is_none() {
        info!("No embedding model configured; drift detection and vector retrieval disabled");
    }

    // Knowledge sources, in configured priority order
    let mut sources: Vec<Arc<dyn KnowledgeSource>> = Vec::new();
    for source_cfg in &config.sources {
        match source_cfg {
            SourceConfig::Vector {
                documents_dir,
                min_score,
                top_k,
            } => {
                let Some(embedder) = embedder.clone() else {
                    warn!("Vector source configured without an embedding model, skipping");
                    continue;
                };
                let store = Arc::new(DocumentStore::new());
                if let Some(dir) = documents_dir {
                    if let Err(e) = store.seed_from_dir(dir, embedder.as_ref()).await {
                        warn!(error = %e, dir = %dir.display(), "Failed to seed document store");
                    }
                }
                sources.push(Arc::new(VectorSource::new(
                    store, embedder, *min_score, *top_k,
                )));
            }
            SourceConfig::WebSearch {
                endpoint,
                api_key,
                top_k,
            } => {
                sources.push(Arc::new(WebSearchSource::new(
                    endpoint.clone(),
                    api_key.clone(),
                    *top_k,
                    Duration::from_secs(config.request_timeout_secs),
                )));
            }
        }
    }
    info!(sources = sources.len(), "Knowledge sources configured");

    let pipeline = FusionPipeline::new(
        sources,
        provider.clone(),
        config.model.clone(),
        config.temperature,
        config.max_tokens,
    );
    let quota = Arc::new(QuotaTracker::new(config.daily_limit));
    let store = Arc::new(SessionStore::new(
        config.max_conversation_length,
        config.persona.clone(),
    ));
    let intents = IntentRouter::from_config(&config.intents);

    let mut dispatcher = Dispatcher::new(quota, store, pipeline, intents, config.replies.clone())
        .with_session_history(config.session_history);

    if let Some(embedder) = embedder {
        dispatcher = dispatcher.with_drift(Arc::new(DriftDetector::new(
            embedder,
            config.similarity_threshold,
        )));
    }

    if config.classification.enabled {
        dispatcher = dispatcher.with_gate(RelevanceGate::new(
            provider,
            config.model.clone(),
            config.classification.instruction.clone(),
        ));
    }

    let reply = config
        .gateway
        .reply_url
        .clone()
        .map(|url| ReplySender::new(url, Duration::from_secs(config.request_timeout_secs)));
    if config.gateway.channel_secret.is_none() {
        warn!("No channel secret configured; webhook signature verification disabled");
    }

    let state = Arc::new(GatewayState {
        dispatcher: Arc::new(dispatcher),
        channel_secret: config.gateway.channel_secret.clone(),
        reply,
    });

    let addr = format!("{}:{}", config.gateway.host, port);
    let app = build_router(state);

    info!(addr = %addr, model = %config.model, "Relaybot gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
