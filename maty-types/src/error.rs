//! Error types for the Maty wire format.

use thiserror::Error;

use crate::Action;

/// Errors that can occur while decoding or encoding frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// The frame is not valid JSON, or a field has the wrong shape
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is not an object with an integer `action` field
    #[error("frame has no integer action field")]
    MissingAction,

    /// The action code is outside the known ordinal range
    #[error("unknown action code: {0}")]
    UnknownAction(u64),

    /// The action exists but is never sent by clients
    #[error("action {0:?} is not a client request")]
    NotARequest(Action),

    /// Invalid ordinal for a code enum
    #[error("invalid {kind} code: {value}")]
    InvalidCode {
        /// Which enum was being decoded
        kind: &'static str,
        /// The rejected value
        value: u8,
    },
}
