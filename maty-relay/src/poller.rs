//! Delta poller.
//!
//! Periodically turns undelivered history into pushes. Each tick walks a
//! snapshot of the session registry and, per principal and per state,
//! pushes the pending rows as one frame and then marks exactly the record
//! versions that were sent. A row whose push failed, or that changed state
//! in the meantime, stays unread and is pushed on a later tick.

use crate::config::PollerConfig;
use crate::registry::{Session, SessionRegistry};
use crate::server::RelayMetrics;
use crate::storage::{HistoryFilter, RecordVersion, Store};
use maty_types::{HistoryState, Reply};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Summary of one poller tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Sessions visited.
    pub sessions: usize,
    /// Frames queued.
    pub pushes: usize,
    /// Records carried by those frames.
    pub records: usize,
    /// Pushes that could not be queued or encoded.
    pub failures: usize,
}

/// Drains pending history into live sessions.
pub struct DeltaPoller {
    store: Arc<dyn Store>,
    registry: Arc<SessionRegistry>,
    metrics: Arc<RelayMetrics>,
}

impl std::fmt::Debug for DeltaPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaPoller")
            .field("sessions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl DeltaPoller {
    /// Create a poller over shared state.
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<SessionRegistry>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
        }
    }

    /// Run one pass over every live session.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        for session in self.registry.snapshot() {
            if session.handle.is_closed() {
                self.registry.remove_connection(&session.handle);
                continue;
            }
            report.sessions += 1;

            for state in HistoryState::ALL {
                self.push_state(&session, state, &mut report).await;
            }
        }

        if report.pushes > 0 || report.failures > 0 {
            tracing::debug!(
                "Poller tick: {} session(s), {} push(es), {} record(s), {} failure(s)",
                report.sessions,
                report.pushes,
                report.records,
                report.failures
            );
        }
        report
    }

    async fn push_state(&self, session: &Session, state: HistoryState, report: &mut TickReport) {
        let principal = session.principal;
        let history = match self
            .store
            .query_history(HistoryFilter::pending(principal, state))
            .await
        {
            Ok(history) => history,
            Err(e) => {
                self.metrics.storage_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Pending {:?} query for {} failed: {}", state, principal, e);
                return;
            }
        };
        if history.is_empty() {
            return;
        }
        let delivered: Vec<RecordVersion> = history.iter().map(RecordVersion::from).collect();
        let count = history.len();

        let frame = match (Reply::History { state, history }).encode() {
            Ok(frame) => frame,
            Err(e) => {
                report.failures += 1;
                tracing::error!("Failed to encode {:?} push for {}: {}", state, principal, e);
                return;
            }
        };

        // The session may have been replaced or dropped since the snapshot.
        match self.registry.find(principal) {
            Some(current) if current.handle.id() == session.handle.id() => {}
            _ => {
                tracing::debug!(
                    "Session of {} changed mid-tick, deferring {:?} push",
                    principal,
                    state
                );
                return;
            }
        }

        if let Err(e) = session.handle.send(frame) {
            report.failures += 1;
            self.metrics.push_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Push to {} deferred: {}", principal, e);
            return;
        }
        report.pushes += 1;
        report.records += count;
        self.metrics.pushes_total.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .records_delivered
            .fetch_add(count as u64, Ordering::Relaxed);
        tracing::debug!("Update history, contact: {} ({:?} x{})", session.login, state, count);

        if let Err(e) = self.store.mark_delivered(principal, &delivered).await {
            // The rows stay unread and are pushed again next tick.
            self.metrics.storage_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Mark delivered for {} failed: {}", principal, e);
        }
    }
}

/// Spawn the background task that ticks the poller on an interval.
///
/// The task exits when `shutdown` flips to `true` or its sender is dropped,
/// after finishing any tick already in progress. A disabled poller returns a
/// task that completes immediately.
pub fn spawn_poller_task(
    poller: DeltaPoller,
    config: &PollerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let enabled = config.enabled;
    let period = config.interval();

    tokio::spawn(async move {
        if !enabled {
            tracing::info!("Delta poller disabled");
            return;
        }
        tracing::info!("Delta poller started (interval: {:?})", period);

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    poller.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Delta poller stopped");
    })
}
