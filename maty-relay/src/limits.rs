//! Rate limiting for maty-relay.
//!
//! Protects the router against frame floods. Two layers:
//! - **Per connection**: each transport connection gets its own quota,
//!   keyed by the relay-assigned connection id
//! - **Global**: caps aggregate throughput across all connections
//!
//! Both use the governor crate; the keyed limiter is backed by DashMap.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits inbound frames per connection.
    ///
    /// Configured via `limits.messages_per_minute`.
    message_limiter: Arc<KeyedLimiter<u64>>,

    /// Global rate limiter across all connections.
    ///
    /// Configured via `limits.global_requests_per_second`.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("message_limiter", &"KeyedLimiter<u64>")
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// Zero quotas are raised to one.
    pub fn new(config: &LimitsConfig) -> Self {
        let messages_per_minute =
            NonZeroU32::new(config.messages_per_minute).unwrap_or(NonZeroU32::MIN);
        let global_rps =
            NonZeroU32::new(config.global_requests_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            message_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(messages_per_minute))),
            global_limiter: Arc::new(RateLimiter::direct(Quota::per_second(global_rps))),
        }
    }

    /// Check whether a connection may submit another frame.
    ///
    /// The global limit is checked first.
    pub fn check_frame(&self, connection: u64) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)?;
        self.message_limiter
            .check_key(&connection)
            .map_err(|_| RateLimitError::MessageLimitExceeded)
    }

    /// Get the number of tracked connection keys (for metrics).
    pub fn tracked_connections(&self) -> usize {
        self.message_limiter.len()
    }

    /// Evict entries whose cells have fully recharged (idle or closed
    /// connections).
    pub fn shrink(&self) {
        self.message_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// Too many frames from this connection.
    MessageLimitExceeded,
    /// Global request rate exceeded across all connections.
    GlobalLimitExceeded,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MessageLimitExceeded => {
                write!(f, "message rate limit exceeded")
            }
            Self::GlobalLimitExceeded => {
                write!(f, "global rate limit exceeded")
            }
        }
    }
}

impl std::error::Error for RateLimitError {}
