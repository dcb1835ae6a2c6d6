//! Health check endpoint.
//!
//! Reports `degraded` while the delta poller is disabled: connections are
//! served but no pending history reaches live sessions.

use crate::config::PollerConfig;
use crate::server::Relay;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Global start time for uptime calculation.
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// `ok`, or `degraded` when pushes are off.
    pub status: &'static str,
    /// Server version.
    pub version: String,
    /// Number of open transport connections.
    pub connections: usize,
    /// Number of authenticated sessions.
    pub sessions: usize,
    /// Delivery state.
    pub poller: PollerHealth,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Delta poller section of the health report.
#[derive(Debug, Clone, Serialize)]
pub struct PollerHealth {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Frames pushed since startup.
    pub pushes: u64,
    /// Pushes that found a full or closed queue.
    pub deferred: u64,
}

impl PollerHealth {
    fn new(config: &PollerConfig, relay: &Relay) -> Self {
        let metrics = relay.metrics();
        Self {
            enabled: config.enabled,
            interval_ms: config.interval().as_millis() as u64,
            pushes: metrics.pushes_total.load(Ordering::Relaxed),
            deferred: metrics.push_failures.load(Ordering::Relaxed),
        }
    }

    fn status(&self) -> &'static str {
        if self.enabled {
            "ok"
        } else {
            "degraded"
        }
    }
}

/// Health check handler.
pub async fn health_handler(Extension(relay): Extension<Arc<Relay>>) -> Json<HealthStatus> {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);
    let poller = PollerHealth::new(&relay.config().poller, &relay);

    Json(HealthStatus {
        status: poller.status(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections: relay.open_connections(),
        sessions: relay.total_sessions(),
        poller,
        uptime_seconds: uptime,
    })
}
