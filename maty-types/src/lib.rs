//! # maty-types
//!
//! Wire format types for the Maty relay protocol.
//!
//! Every frame is a UTF-8 JSON object carrying an integer `action` code:
//! - [`ContactId`], [`HistoryId`], [`SourceRef`] - Identity types
//! - [`Action`], [`ErrorCode`], [`SearchResult`] - Stable ordinal codes
//! - [`HistoryState`] - Per-record delivery state machine
//! - [`Request`] - Decoded client requests (closed set, matched exhaustively)
//! - [`Reply`] - Server replies and history pushes
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod codes;
mod error;
mod ids;
mod messages;
mod records;

pub use codes::{Action, ErrorCode, SearchResult};
pub use error::WireError;
pub use ids::{ContactId, HistoryId, SourceRef};
pub use messages::{
    AddHistory, AuthReply, AuthRequest, ClearHistory, ContactReply, LinkRequest,
    ModifyHistory, QueryContact, Registration, RegistrationReply, RemoveHistory, Reply,
    Request, Search, SearchReply,
};
pub use records::{Contact, HistoryRecord, HistoryState};
