//! Turn broker - single-call chat-completion service
//!
//! Serves one endpoint that merges cached conversation history with a new
//! user message, calls the completion API once, and shapes the reply.

mod api;
mod cache;
mod config;
mod llm;
mod secrets;
mod turn;

use api::{create_router, AppState};
use cache::{ListCache, SqliteListCache};
use config::Config;
use llm::{LlmService, LoggingService, OpenAIService};
use secrets::{EnvSecretProvider, SecretProvider};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turn::{TurnProcessor, TurnSettings, DEFAULT_TEMPERATURE};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turn_broker=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env();

    // Clients are built once here and shared by every turn
    let secrets = EnvSecretProvider::new();
    let api_key = secrets.get_secret("openai").await?;
    let openai = OpenAIService::new(api_key, &config.model, &config.openai_base_url)?;
    let llm: Arc<dyn LlmService> = Arc::new(LoggingService::new(Arc::new(openai)));

    let cache = open_cache(&config)?;

    tracing::info!(
        model = %config.model,
        base_url = %config.openai_base_url,
        cache = %config.cache_db_path,
        cache_ttl_secs = config.cache_ttl.as_secs(),
        namespace = %config.cache_namespace,
        "Turn processor initialized"
    );

    let turns = TurnProcessor::new(
        llm,
        cache,
        TurnSettings {
            model: config.model.clone(),
            temperature: DEFAULT_TEMPERATURE,
            namespace: config.cache_namespace.clone(),
        },
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(turns)).layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Turn broker listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn open_cache(config: &Config) -> Result<Arc<dyn ListCache>, Box<dyn std::error::Error>> {
    if config.uses_in_memory_cache() {
        tracing::warn!("Using in-memory history cache; history is lost on restart");
        return Ok(Arc::new(SqliteListCache::open_in_memory(config.cache_ttl)?));
    }

    // Ensure cache directory exists
    if let Some(parent) = PathBuf::from(&config.cache_db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.cache_db_path, "Opening history cache");
    Ok(Arc::new(SqliteListCache::open(&config.cache_db_path, config.cache_ttl)?))
}
