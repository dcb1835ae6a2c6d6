//! Stable ordinal codes carried in every frame.

use serde::{Deserialize, Serialize};

use crate::WireError;

/// Action discriminator for every frame.
///
/// The ordinals are part of the wire contract and must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Action {
    /// No action (never valid on the wire)
    None = 0,
    /// Create a new contact
    Registration = 1,
    /// Authenticate and establish a session
    Auth = 2,
    /// Reserved
    Message = 3,
    /// Find contacts by login substring
    Search = 4,
    /// Fetch one contact by id
    QueryContact = 5,
    /// Link two contacts
    LinkContact = 6,
    /// Unlink two contacts
    UnlinkContact = 7,
    /// Append a history record (also the "new record" push is NewHistory)
    AddHistory = 8,
    /// Edit a history record; also the push for edited records
    ModifyHistory = 9,
    /// Remove a history record; also the push for removed records
    RemoveHistory = 10,
    /// Delete all history of a principal
    ClearHistory = 11,
    /// Server push of new records
    NewHistory = 12,
}

impl TryFrom<u8> for Action {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Action::None),
            1 => Ok(Action::Registration),
            2 => Ok(Action::Auth),
            3 => Ok(Action::Message),
            4 => Ok(Action::Search),
            5 => Ok(Action::QueryContact),
            6 => Ok(Action::LinkContact),
            7 => Ok(Action::UnlinkContact),
            8 => Ok(Action::AddHistory),
            9 => Ok(Action::ModifyHistory),
            10 => Ok(Action::RemoveHistory),
            11 => Ok(Action::ClearHistory),
            12 => Ok(Action::NewHistory),
            _ => Err(WireError::InvalidCode {
                kind: "action",
                value,
            }),
        }
    }
}

impl From<Action> for u8 {
    fn from(action: Action) -> Self {
        action as u8
    }
}

/// Outcome code of Registration and Auth replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum ErrorCode {
    /// Success
    Ok = 0,
    /// Unspecified failure
    Failure = 1,
    /// Registration: login already taken
    LoginExists = 2,
    /// Auth: no such login
    NoLogin = 3,
    /// Auth: wrong password
    Password = 4,
}

impl TryFrom<u8> for ErrorCode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(ErrorCode::Ok),
            1 => Ok(ErrorCode::Failure),
            2 => Ok(ErrorCode::LoginExists),
            3 => Ok(ErrorCode::NoLogin),
            4 => Ok(ErrorCode::Password),
            _ => Err(WireError::InvalidCode {
                kind: "error",
                value,
            }),
        }
    }
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> Self {
        code as u8
    }
}

/// Outcome of a Search request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum SearchResult {
    /// At least one contact matched
    Found = 0,
    /// Nothing matched
    NotFound = 1,
}

impl TryFrom<u8> for SearchResult {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SearchResult::Found),
            1 => Ok(SearchResult::NotFound),
            _ => Err(WireError::InvalidCode {
                kind: "search result",
                value,
            }),
        }
    }
}

impl From<SearchResult> for u8 {
    fn from(result: SearchResult) -> Self {
        result as u8
    }
}
