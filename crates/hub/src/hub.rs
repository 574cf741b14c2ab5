//! Hub composition root
//!
//! Owns the connection registry and the idle reaper for one deployment.
//! Construction starts the reaper; [`Hub::shutdown`] cancels it and closes
//! every remaining connection.

use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use pactline_protocol::{CLOSE_NORMAL, REASON_SERVER_SHUTDOWN};

use crate::api::{self, AppState};
use crate::config::Config;
use crate::reaper::IdleReaper;
use crate::registry::{self, SharedRegistry};
use crate::ws;

/// One hub instance: the single authoritative actor for its room.
pub struct Hub {
    registry: SharedRegistry,
    reaper: IdleReaper,
}

impl Hub {
    pub fn new(config: &Config) -> Self {
        let registry = registry::shared();
        let reaper = IdleReaper::spawn(
            registry.clone(),
            Duration::from_secs(config.reaper.interval_secs),
            Duration::from_secs(config.reaper.timeout_secs),
        );
        Self { registry, reaper }
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Full router: the connection endpoint plus the diagnostics API.
    pub fn router(&self) -> Router {
        router(self.registry.clone())
    }

    /// Stop the reaper and close every remaining connection.
    pub async fn shutdown(self) {
        self.reaper.shutdown();
        let closed = self
            .registry
            .write()
            .await
            .close_all(CLOSE_NORMAL, REASON_SERVER_SHUTDOWN);
        tracing::info!(count = closed, "Closed remaining connections");
    }
}

/// Build the hub router around an existing registry.
pub fn router(registry: SharedRegistry) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest(
            "/api",
            api::api_router().route("/websocket", get(ws::ws_handler)),
        )
        .with_state(AppState { registry })
        .layer(cors)
}
