//! Main Relay coordination.
//!
//! Relay owns the store, the session registry and the router, and is the
//! surface the transport talks to: `open_connection`, `on_message`,
//! `on_disconnect`. Everything is constructed once at startup and passed
//! by reference; there are no process-wide singletons.

use crate::config::Config;
use crate::error::ProtocolError;
use crate::limits::RateLimits;
use crate::poller::DeltaPoller;
use crate::registry::{ConnectionHandle, SessionRegistry};
use crate::router::ActionRouter;
use crate::storage::Store;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64`; incrementing takes no lock.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total frames decoded into requests.
    pub requests_total: AtomicU64,
    /// Total frames dropped as malformed, oversized or unknown.
    pub protocol_errors: AtomicU64,
    /// Total store failures (router and poller).
    pub storage_errors: AtomicU64,
    /// Total frames rejected by rate limiting.
    pub rate_limit_hits: AtomicU64,
    /// Total connections accepted.
    pub connections_total: AtomicU64,
    /// Total successful Auth session registrations.
    pub sessions_registered: AtomicU64,
    /// Total history push frames queued by the poller.
    pub pushes_total: AtomicU64,
    /// Total history records delivered by the poller.
    pub records_delivered: AtomicU64,
    /// Total pushes that could not be queued.
    pub push_failures: AtomicU64,
}

/// Main relay server.
pub struct Relay {
    config: Config,
    store: Arc<dyn Store>,
    registry: Arc<SessionRegistry>,
    router: ActionRouter,
    /// Rate limiters for inbound frames.
    rate_limits: RateLimits,
    /// Operational metrics (counters, gauges).
    metrics: Arc<RelayMetrics>,
    next_connection: AtomicU64,
    open_connections: AtomicUsize,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("sessions_count", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Create a new Relay with the given config and store.
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let metrics = Arc::new(RelayMetrics::default());
        let router = ActionRouter::new(
            store.clone(),
            registry.clone(),
            config.auth.digest.build(),
            metrics.clone(),
        );
        let rate_limits = RateLimits::new(&config.limits);

        Self {
            config,
            store,
            registry,
            router,
            rate_limits,
            metrics,
            next_connection: AtomicU64::new(1),
            open_connections: AtomicUsize::new(0),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Get access to the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Build a delta poller sharing this relay's store and registry.
    pub fn poller(&self) -> DeltaPoller {
        DeltaPoller::new(
            self.store.clone(),
            self.registry.clone(),
            self.metrics.clone(),
        )
    }

    /// Accept a new transport connection.
    ///
    /// Returns the handle the core sends through and the receiving end the
    /// transport drains, or `None` when the connection limit is reached.
    pub fn open_connection(&self) -> Option<(ConnectionHandle, mpsc::Receiver<String>)> {
        let limit = self.config.limits.max_connections;
        let admitted = self
            .open_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < limit).then_some(open + 1)
            })
            .is_ok();
        if !admitted {
            tracing::warn!("Connection limit reached ({}), rejecting", limit);
            return None;
        }

        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.config.server.outbound_queue.max(1));
        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Opened connection {}", id);

        Some((ConnectionHandle::new(id, sender), receiver))
    }

    /// Handle one inbound text frame.
    ///
    /// Oversized and rate-limited frames are dropped without a reply.
    pub async fn on_message(&self, text: &str, handle: &ConnectionHandle) {
        let limit = self.config.limits.max_message_size;
        if text.len() > limit {
            let err = ProtocolError::FrameTooLarge {
                size: text.len(),
                limit,
            };
            tracing::warn!("Dropping frame from connection {}: {}", handle.id(), err);
            self.metrics.protocol_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if let Err(e) = self.rate_limits.check_frame(handle.id()) {
            let err = ProtocolError::RateLimited {
                reason: e.to_string(),
            };
            tracing::warn!("Dropping frame from connection {}: {}", handle.id(), err);
            self.metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.router.on_message(text, handle).await;
    }

    /// Handle a transport disconnect.
    pub fn on_disconnect(&self, handle: &ConnectionHandle) {
        let removed = self.registry.remove_connection(handle);
        self.open_connections.fetch_sub(1, Ordering::AcqRel);
        self.rate_limits.shrink();
        tracing::debug!(
            "Closed connection {} ({} session(s) removed)",
            handle.id(),
            removed
        );
    }

    /// Number of live principal sessions.
    pub fn total_sessions(&self) -> usize {
        self.registry.len()
    }

    /// Number of open transport connections.
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::Acquire)
    }

    /// Release the store. Call after the poller has stopped.
    pub async fn shutdown(&self) {
        self.store.close().await;
        tracing::info!("Store closed");
    }
}
