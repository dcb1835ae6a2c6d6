//! HTTP endpoints for maty-relay.
//!
//! Serves the client WebSocket at `/` plus health and metrics endpoints.

pub mod health;
mod metrics;
mod ws;

use crate::server::Relay;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<Relay>) -> Router {
    let mut router = Router::new()
        .route("/", get(ws::ws_handler))
        .route("/health", get(health::health_handler));

    if relay.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router.layer(Extension(relay))
}
