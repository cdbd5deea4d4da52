mod config;
mod db;
mod errors;
mod inference;
mod llm_client;
mod models;
mod photos;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::inference::LlmInferenceService;
use crate::llm_client::LlmClient;
use crate::photos::display::DisplayRegistry;
use crate::photos::enrichment::EnrichmentPipeline;
use crate::photos::persistence::SqlitePhotoRepository;
use crate::photos::store::PhotoStore;
use crate::routes::build_router;
use crate::state::AppState;

/// How long shutdown waits for in-flight analyses to land before exiting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Photo Atlas v{}", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite
    let db = create_pool(&config.database_url).await?;

    // Initialize LLM client
    let llm = LlmClient::new(
        config.anthropic_api_key.clone(),
        config.inference_base_url.clone(),
    )?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    // Wire the library: display registry, durable store, in-memory store, pipeline
    let displays = Arc::new(DisplayRegistry::new());
    let repo = Arc::new(SqlitePhotoRepository::new(db, Arc::clone(&displays)));
    let store = Arc::new(PhotoStore::new());
    let pipeline = EnrichmentPipeline::start(
        Arc::clone(&store),
        repo,
        Arc::clone(&displays),
        Arc::new(LlmInferenceService::new(llm)),
    );

    let restored = pipeline.restore().await?;
    info!(
        "Library restored: {} photos, {} notes, {} resumed",
        restored.photos, restored.notes, restored.resumed
    );

    // Build app state
    let state = AppState {
        store,
        pipeline: pipeline.clone(),
        displays,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if tokio::time::timeout(SHUTDOWN_GRACE, pipeline.settled())
        .await
        .is_err()
    {
        warn!(
            "{} analyses still pending at shutdown; they resume on next start",
            pipeline.in_flight()
        );
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
