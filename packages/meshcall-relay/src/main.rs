//! meshcall relay server
//!
//! A lightweight WebSocket coordination service for small mesh video calls:
//!
//! 1. **Room registry**: admits up to a fixed number of participants into one
//!    shared room, flags the first one as host and fans out join/leave events.
//!
//! 2. **Negotiation relay**: forwards offers, answers and network candidates
//!    between participants, stamping each with the true sender.
//!
//! Media never passes through the server; peers connect to each other
//! directly once negotiation completes.

mod handler;
mod protocol;
mod registry;
mod relay;
mod state;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::Method,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use clap::Parser;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use registry::DEFAULT_ROOM_CAPACITY;
use state::{RelayConfig, RelayState};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "meshcall-relay", version, about = "meshcall signaling server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 3000, env = "MESHCALL_PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "MESHCALL_BIND")]
    bind: String,

    /// Maximum participants admitted to the room at once
    #[arg(
        long,
        default_value_t = DEFAULT_ROOM_CAPACITY,
        env = "MESHCALL_ROOM_CAPACITY",
        value_parser = parse_capacity
    )]
    room_capacity: usize,

    /// Emit logs as JSON lines
    #[arg(long, env = "MESHCALL_LOG_JSON")]
    log_json: bool,
}

fn parse_capacity(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("room capacity must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

impl From<Args> for RelayConfig {
    fn from(args: Args) -> Self {
        RelayConfig {
            bind: args.bind,
            port: args.port,
            room_capacity: args.room_capacity,
        }
    }
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "meshcall_relay=info,tower_http=info".into());
    if args.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = RelayConfig::from(args);
    let addr = format!("{}:{}", config.bind, config.port);
    let state = RelayState::new(config);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        capacity = state.registry.capacity(),
        "meshcall relay listening on {}",
        addr
    );

    axum::serve(listener, app(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown();
    Ok(())
}

/// Build the router.
fn app(state: RelayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade handler for client connections.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_websocket(socket, state))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "meshcall-relay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Room occupancy.
async fn stats_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(json!({
        "participants": state.registry.len(),
        "capacity": state.registry.capacity(),
        "connections": state.connection_count(),
        "host": state.registry.host(),
        "started_at": state.started_at.timestamp_millis(),
        "timestamp": chrono::Utc::now().timestamp_millis(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
