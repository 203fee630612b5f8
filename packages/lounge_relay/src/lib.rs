//! Relay server for repository lounges.
//!
//! Brokers room membership keyed by repository full name (`owner/repo`) and
//! fans events out to every connection in a room. Holds no knowledge of
//! message content beyond the routing fields it stamps, persists nothing,
//! and loses all membership on restart — clients rejoin on reconnect.

pub mod config;
pub mod dispatch;
pub mod handler;
pub mod metrics;
pub mod rooms;

use std::sync::Arc;

use anyhow::Context;
use axum::{Json, Router, http::HeaderValue, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::RelayConfig;
use crate::metrics::{MetricsSnapshot, RelayMetrics};
use crate::rooms::RoomRegistry;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub metrics: Arc<RelayMetrics>,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        let metrics = Arc::new(RelayMetrics::new());
        let registry = Arc::new(RoomRegistry::new(
            config.room_channel_capacity,
            metrics.clone(),
        ));
        Self {
            registry,
            metrics,
            config: Arc::new(config),
        }
    }
}

/// Assemble the relay router: the `/ws` channel endpoint plus liveness and
/// metrics routes, with tracing and the designated-origin CORS policy.
pub fn router(state: AppState) -> anyhow::Result<Router> {
    let mut cors = CorsLayer::new();
    if let Some(origin) = state.config.allowed_origin.as_deref() {
        let value: HeaderValue = origin
            .parse()
            .with_context(|| format!("invalid allowed_origin {origin:?}"))?;
        cors = cors.allow_origin(value);
    }

    Ok(Router::new()
        .route("/ws", get(handler::websocket_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors))
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
