//! CodeWire Server - Collaborative Coding Room Engine
//!
//! A real-time collaboration server using:
//! - An in-memory file tree kept convergent with a per-room working
//!   directory and per-user PTY shells, via a token-based sync arbiter
//! - Sled embedded database for room-registry persistence (password hash,
//!   creation time; no file content)
//! - Axum with WebSocket for the named-JSON-event protocol

use axum::{
    http::Method,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

mod arbiter;
mod config;
mod gateway;
mod hub;
mod pty;
mod room;
mod rundispatch;
mod store;
mod watcher;
mod workdir;

use config::Config;
use gateway::{ws_handler, GatewayState};
use room::RoomManager;
use store::RoomStore;

#[derive(Clone)]
struct AppState {
    gateway: GatewayState,
    started_at: std::time::Instant,
}

impl axum::extract::FromRef<AppState> for GatewayState {
    fn from_ref(state: &AppState) -> Self {
        state.gateway.clone()
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    active_rooms: usize,
    active_peers: usize,
}

async fn health_check(axum::extract::State(state): axum::extract::State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        active_rooms: state.gateway.rooms.active_room_count(),
        active_peers: state.gateway.rooms.active_peer_count(),
    })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codewire_server=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env();

    info!(path = %config.room_store_path, "opening room store");
    let store = Arc::new(RoomStore::open(&config.room_store_path).expect("failed to open room store"));
    let _sweeper = store.clone().spawn_sweeper(std::time::Duration::from_secs(3600));

    let rooms = RoomManager::new();

    let state = AppState {
        gateway: GatewayState { rooms, store },
        started_at: std::time::Instant::now(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(cors);

    info!("🚀 codewire server v{} starting", env!("CARGO_PKG_VERSION"));
    info!("   Listening on: http://{}", config.bind_addr);
    info!("   WebSocket: ws://{}/ws", config.bind_addr);
    info!("   Health check: http://{}/health", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("failed to bind to address");

    axum::serve(listener, app).await.expect("server error");
}
