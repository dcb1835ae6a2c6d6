//! Identity types for Maty.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned identifier of a contact (a principal once authenticated).
///
/// Zero means "not yet known" on the wire: first-time clients send `0`
/// until the server tells them their id.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(i64);

impl ContactId {
    /// Create a ContactId from a raw value.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// Whether this id was left unset (zero) by the client.
    pub const fn is_unset(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContactId({})", self.0)
    }
}

/// Store-assigned primary key of a history record.
///
/// Monotonically increasing. Paired with a revision it names one delivered version.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryId(i64);

impl HistoryId {
    /// Create a HistoryId from a raw value.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HistoryId({})", self.0)
    }
}

/// Client-local correlation id of a history record (`hid` on the wire).
///
/// Opaque to the relay: whatever JSON value the client sent is stored and
/// echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRef(serde_json::Value);

impl SourceRef {
    /// Wrap a raw JSON value.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Canonical text form, used as the storage key.
    pub fn to_storage(&self) -> String {
        self.0.to_string()
    }

    /// Parse the canonical text form back.
    pub fn from_storage(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text).map(Self)
    }
}

impl Default for SourceRef {
    fn default() -> Self {
        Self(serde_json::Value::Null)
    }
}

impl From<i64> for SourceRef {
    fn from(value: i64) -> Self {
        Self(value.into())
    }
}

impl From<&str> for SourceRef {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}
