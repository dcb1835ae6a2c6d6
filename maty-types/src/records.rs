//! Contact and history records as they appear on the wire.

use serde::{Deserialize, Serialize};

use crate::{Action, ContactId, HistoryId, SourceRef, WireError};

/// Public profile of a contact.
///
/// The password digest never leaves the store, so it has no field here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Store-assigned id
    pub id: ContactId,
    /// Display name
    pub name: String,
    /// Unique login
    pub login: String,
    /// Avatar (opaque to the relay)
    #[serde(default)]
    pub image: String,
    /// Phone number
    #[serde(default)]
    pub phone: String,
    /// Free-form status line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
}

/// Delivery state of a history record.
///
/// Legal transitions: Regular -> Modified, Regular -> Removed,
/// Modified -> Removed. Removed is terminal. Re-editing a Modified record
/// keeps it Modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum HistoryState {
    /// As originally sent
    Regular = 0,
    /// Text was edited after sending
    Modified = 1,
    /// Retracted; terminal
    Removed = 2,
}

impl HistoryState {
    /// All states, in the order the poller scans them.
    pub const ALL: [HistoryState; 3] = [
        HistoryState::Regular,
        HistoryState::Modified,
        HistoryState::Removed,
    ];

    /// Whether a record in `self` may move to `next`.
    pub fn can_transition_to(self, next: HistoryState) -> bool {
        Self::sources_of(next).contains(&self)
    }

    /// States from which `target` can be entered.
    pub fn sources_of(target: HistoryState) -> &'static [HistoryState] {
        match target {
            HistoryState::Regular => &[],
            HistoryState::Modified => &[HistoryState::Regular, HistoryState::Modified],
            HistoryState::Removed => &[HistoryState::Regular, HistoryState::Modified],
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, HistoryState::Removed)
    }

    /// The push action used to deliver records in this state.
    pub fn push_action(self) -> Action {
        match self {
            HistoryState::Regular => Action::NewHistory,
            HistoryState::Modified => Action::ModifyHistory,
            HistoryState::Removed => Action::RemoveHistory,
        }
    }
}

impl TryFrom<u8> for HistoryState {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(HistoryState::Regular),
            1 => Ok(HistoryState::Modified),
            2 => Ok(HistoryState::Removed),
            _ => Err(WireError::InvalidCode {
                kind: "history state",
                value,
            }),
        }
    }
}

impl From<HistoryState> for u8 {
    fn from(state: HistoryState) -> Self {
        state as u8
    }
}

/// One message between two contacts, with its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Store-assigned primary key
    pub id: HistoryId,
    /// Client-local correlation id
    pub hid: SourceRef,
    /// Sender
    pub cid: ContactId,
    /// Recipient
    pub rid: ContactId,
    /// Message text
    pub text: String,
    /// Delivered to the recipient under the current state
    pub read: bool,
    /// Current state
    pub state: HistoryState,
    /// Revision, bumped by every state transition
    #[serde(default)]
    pub rev: i64,
    /// Creation time, milliseconds since the Unix epoch
    pub ts: i64,
}
