//! REST API for hub diagnostics
//!
//! Provides HTTP endpoints for health checks and session inspection.
//! Everything here reads the registry through its ordinary operations.

use axum::{extract::State, routing::get, Json, Router};

use crate::registry::{SessionInfo, SharedRegistry};

// Shared state
#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
}

// Routes
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/sessions", get(list_sessions))
        .route("/sessions/count", get(session_count))
}

// Handlers

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions: Vec<SessionInfo> = state
        .registry
        .read()
        .await
        .all()
        .iter()
        .map(crate::registry::Session::to_session_info)
        .collect();
    Json(serde_json::json!({ "sessions": sessions }))
}

async fn session_count(State(state): State<AppState>) -> Json<serde_json::Value> {
    let count = state.registry.read().await.count_active();
    Json(serde_json::json!({ "count": count }))
}
