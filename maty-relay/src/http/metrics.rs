//! Prometheus metrics endpoint.

use crate::server::{Relay, RelayMetrics};
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
pub async fn metrics_handler(Extension(relay): Extension<Arc<Relay>>) -> impl IntoResponse {
    let body = render(
        relay.metrics(),
        relay.open_connections(),
        relay.total_sessions(),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

fn render(m: &RelayMetrics, connections: usize, sessions: usize) -> String {
    let requests = m.requests_total.load(Ordering::Relaxed);
    let protocol_errors = m.protocol_errors.load(Ordering::Relaxed);
    let storage_errors = m.storage_errors.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let sessions_total = m.sessions_registered.load(Ordering::Relaxed);
    let pushes = m.pushes_total.load(Ordering::Relaxed);
    let records = m.records_delivered.load(Ordering::Relaxed);
    let push_failures = m.push_failures.load(Ordering::Relaxed);

    format!(
        r#"# HELP maty_relay_connections_active Number of open connections
# TYPE maty_relay_connections_active gauge
maty_relay_connections_active {connections}

# HELP maty_relay_sessions_active Number of authenticated sessions
# TYPE maty_relay_sessions_active gauge
maty_relay_sessions_active {sessions}

# HELP maty_relay_info Server information
# TYPE maty_relay_info gauge
maty_relay_info{{version="{version}"}} 1

# HELP maty_relay_requests_total Total requests decoded
# TYPE maty_relay_requests_total counter
maty_relay_requests_total {requests}

# HELP maty_relay_protocol_errors_total Total frames dropped as malformed or oversized
# TYPE maty_relay_protocol_errors_total counter
maty_relay_protocol_errors_total {protocol_errors}

# HELP maty_relay_storage_errors_total Total store failures
# TYPE maty_relay_storage_errors_total counter
maty_relay_storage_errors_total {storage_errors}

# HELP maty_relay_rate_limit_hits_total Total rate limit rejections
# TYPE maty_relay_rate_limit_hits_total counter
maty_relay_rate_limit_hits_total {rate_limits}

# HELP maty_relay_connections_total Total connections accepted
# TYPE maty_relay_connections_total counter
maty_relay_connections_total {conns_total}

# HELP maty_relay_sessions_registered_total Total successful authentications
# TYPE maty_relay_sessions_registered_total counter
maty_relay_sessions_registered_total {sessions_total}

# HELP maty_relay_pushes_total Total history pushes queued
# TYPE maty_relay_pushes_total counter
maty_relay_pushes_total {pushes}

# HELP maty_relay_records_delivered_total Total history records pushed
# TYPE maty_relay_records_delivered_total counter
maty_relay_records_delivered_total {records}

# HELP maty_relay_push_failures_total Total pushes deferred to a later tick
# TYPE maty_relay_push_failures_total counter
maty_relay_push_failures_total {push_failures}
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_counters_and_gauges() {
        let m = RelayMetrics::default();
        m.pushes_total.fetch_add(3, Ordering::Relaxed);
        m.records_delivered.fetch_add(7, Ordering::Relaxed);

        let text = render(&m, 2, 1);

        assert!(text.contains("# TYPE maty_relay_sessions_active gauge"));
        assert!(text.contains("maty_relay_connections_active 2"));
        assert!(text.contains("maty_relay_pushes_total 3"));
        assert!(text.contains("maty_relay_records_delivered_total 7"));
        assert!(text.contains("maty_relay_push_failures_total 0"));
    }
}
