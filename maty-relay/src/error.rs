//! Error types for maty-relay.

use std::path::PathBuf;

/// Main error type for maty-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Credential digest error.
    #[error("digest error: {0}")]
    Digest(#[from] crate::digest::DigestError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {what} already exists")]
    Conflict {
        /// What collided.
        what: String,
    },

    /// A stored row could not be mapped back into a record.
    #[error("corrupt {table} row {id}: {reason}")]
    Corrupt {
        /// Table holding the row.
        table: &'static str,
        /// Primary key of the row.
        id: i64,
        /// What was wrong with it.
        reason: String,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Protocol layer errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame could not be decoded into a request.
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] maty_types::WireError),

    /// Frame exceeds the configured size limit.
    #[error("frame too large: {size} bytes (limit: {limit} bytes)")]
    FrameTooLarge {
        /// Size of the frame.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },

    /// Rate limit exceeded.
    #[error("rate limited: {reason}")]
    RateLimited {
        /// Reason for rate limiting.
        reason: String,
    },

    /// The connection's outbound queue is full or closed.
    #[error("connection {connection} unavailable: {reason}")]
    SendFailed {
        /// Connection id.
        connection: u64,
        /// Why the frame was not queued.
        reason: &'static str,
    },
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
