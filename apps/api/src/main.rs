mod assessment;
mod config;
mod errors;
mod llm_client;
mod models;
mod routes;
mod state;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::assessment::seed::seed_initial_prompts;
use crate::config::Config;
use crate::llm_client::{LlmClient, ModelGateway};
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::postgres::{create_pool, PgStore};
use crate::store::AssessmentStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting assessor v{}", env!("CARGO_PKG_VERSION"));

    // PostgreSQL (migrations run inside create_pool)
    let db = create_pool(&config.database_url).await?;
    let store: Arc<dyn AssessmentStore> = Arc::new(PgStore::new(db));

    if config.seed_prompts {
        let seeded = seed_initial_prompts(store.as_ref()).await?;
        info!(
            "Prompt seeding: {} inserted, {} existing, {} required",
            seeded.inserted, seeded.existing, seeded.total_required
        );
    }

    // Model gateway
    let llm = LlmClient::new(&config.llm)?;
    info!("LLM client initialized (endpoint base: {})", config.llm.base_url);
    let gateway = ModelGateway::new(Arc::new(llm));

    let state = AppState::new(store, gateway, config.batch);

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
