//! Lectern Server Library
//!
//! Token-gated markdown document hosting plus a single live chat session
//! relayed to an external reasoning agent over WebSocket.

pub mod access;
pub mod agent;
pub mod chat;
pub mod config;
pub mod docs;
pub mod protocol;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agent::CliAgent;
use chat::gate::ConnectionGate;
use config::{AppState, ServerConfig};

pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    info!("=== Lectern Server ===");
    info!("Features: Gated Docs | Live Agent Chat");

    let config = ServerConfig::from_env();

    if !config.docs_dir.is_dir() {
        warn!(
            "[Config] Docs directory {:?} does not exist; listings will be empty",
            config.docs_dir
        );
    }
    if config.chat_secret.is_none() {
        warn!("[Config] LECTERN_CHAT_SECRET is not set; chat upgrades will be refused");
    }
    info!("Docs directory: {:?}", config.docs_dir);
    info!("Access rules: {:?}", config.access_file);
    info!("Connection cap: {}", config.max_connections);

    let agent = Arc::new(CliAgent::new(config.agent.clone()));
    let bind = config.bind;
    let state = AppState {
        gate: Arc::new(ConnectionGate::new(config.max_connections)),
        config: Arc::new(config),
        agent,
    };

    let app = router(state);

    info!("Listening on http://{}", bind);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router. Separated from [`run`] so tests can drive
/// it directly.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(chat::ws_handler))
        .route("/", get(docs::list_documents))
        .route("/{name}", get(docs::serve_entry))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> &'static str {
    "OK - Lectern Server"
}
