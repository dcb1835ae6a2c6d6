//! Client requests and server replies.
//!
//! Requests are decoded once into the closed [`Request`] enum and matched
//! exhaustively by the router. Replies are framed with the `action` they
//! answer; history pushes use NewHistory/ModifyHistory/RemoveHistory.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Action, Contact, ContactId, ErrorCode, HistoryId, HistoryRecord, HistoryState,
    SearchResult, SourceRef, WireError,
};

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Create a contact
    Registration(Registration),
    /// Authenticate and register a session
    Auth(AuthRequest),
    /// Reserved; carries no behavior
    Message,
    /// Find contacts by login substring
    Search(Search),
    /// Fetch one contact
    QueryContact(QueryContact),
    /// Insert a link row
    LinkContact(LinkRequest),
    /// Delete a link row
    UnlinkContact(LinkRequest),
    /// Append a Regular record
    AddHistory(AddHistory),
    /// Edit a record
    ModifyHistory(ModifyHistory),
    /// Retract a record
    RemoveHistory(RemoveHistory),
    /// Hard-delete a principal's history
    ClearHistory(ClearHistory),
}

impl Request {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, WireError> {
        let value: Value = serde_json::from_str(text)?;
        let code = value
            .get("action")
            .and_then(Value::as_u64)
            .ok_or(WireError::MissingAction)?;
        let action = u8::try_from(code)
            .ok()
            .and_then(|c| Action::try_from(c).ok())
            .ok_or(WireError::UnknownAction(code))?;

        let request = match action {
            Action::Registration => Request::Registration(body(value)?),
            Action::Auth => Request::Auth(body(value)?),
            Action::Message => Request::Message,
            Action::Search => Request::Search(body(value)?),
            Action::QueryContact => Request::QueryContact(body(value)?),
            Action::LinkContact => Request::LinkContact(body(value)?),
            Action::UnlinkContact => Request::UnlinkContact(body(value)?),
            Action::AddHistory => Request::AddHistory(body(value)?),
            Action::ModifyHistory => Request::ModifyHistory(body(value)?),
            Action::RemoveHistory => Request::RemoveHistory(body(value)?),
            Action::ClearHistory => Request::ClearHistory(body(value)?),
            Action::None | Action::NewHistory => return Err(WireError::NotARequest(action)),
        };
        Ok(request)
    }

    /// The action code this request arrived with.
    pub fn action(&self) -> Action {
        match self {
            Request::Registration(_) => Action::Registration,
            Request::Auth(_) => Action::Auth,
            Request::Message => Action::Message,
            Request::Search(_) => Action::Search,
            Request::QueryContact(_) => Action::QueryContact,
            Request::LinkContact(_) => Action::LinkContact,
            Request::UnlinkContact(_) => Action::UnlinkContact,
            Request::AddHistory(_) => Action::AddHistory,
            Request::ModifyHistory(_) => Action::ModifyHistory,
            Request::RemoveHistory(_) => Action::RemoveHistory,
            Request::ClearHistory(_) => Action::ClearHistory,
        }
    }
}

fn body<T: DeserializeOwned>(value: Value) -> Result<T, WireError> {
    Ok(serde_json::from_value(value)?)
}

/// Registration request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Display name
    pub name: String,
    /// Requested login
    pub login: String,
    /// Plaintext password (digested before storage)
    pub password: String,
    /// Avatar
    #[serde(default)]
    pub image: String,
    /// Phone number
    #[serde(default)]
    pub phone: String,
    /// Status line
    #[serde(default)]
    pub about: Option<String>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Auth request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Login
    pub login: String,
    /// Plaintext password
    pub password: String,
    /// Attach profile, links and full history to the reply
    #[serde(default)]
    pub querydata: bool,
    /// Caller's principal id if already known, zero otherwise
    #[serde(default)]
    pub id: ContactId,
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .field("querydata", &self.querydata)
            .field("id", &self.id)
            .finish()
    }
}

/// Search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Search {
    /// Login substring
    pub text: String,
    /// Caller, excluded from results
    #[serde(default)]
    pub cid: ContactId,
}

/// QueryContact request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryContact {
    /// Contact to fetch
    pub id: ContactId,
}

/// LinkContact / UnlinkContact request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRequest {
    /// Owner of the link row
    pub cid: ContactId,
    /// Peer of the link row
    pub rid: ContactId,
    /// Approval flag (LinkContact only)
    #[serde(default)]
    pub approved: bool,
}

/// AddHistory request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddHistory {
    /// Client-local correlation id
    pub hid: SourceRef,
    /// Sender
    pub cid: ContactId,
    /// Recipient
    pub rid: ContactId,
    /// Message text
    pub text: String,
}

/// ModifyHistory request. Matches the record by (hid, cid, rid).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyHistory {
    /// Client-local correlation id of the record to edit
    pub hid: SourceRef,
    /// Sender
    pub cid: ContactId,
    /// Recipient
    pub rid: ContactId,
    /// Replacement text
    pub text: String,
}

/// RemoveHistory request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveHistory {
    /// Store id of the record to retract
    pub id: HistoryId,
}

/// ClearHistory request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearHistory {
    /// Principal whose history is deleted
    pub cid: ContactId,
}

/// Registration reply body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationReply {
    /// Outcome
    pub code: ErrorCode,
    /// New contact id on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ContactId>,
}

/// Auth reply body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthReply {
    /// Outcome
    pub code: ErrorCode,
    /// Principal id on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ContactId>,
    /// Own profile (querydata only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<Contact>,
    /// Linked contacts (querydata only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contacts: Option<Vec<Contact>>,
    /// Complete non-removed history (querydata only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<HistoryRecord>>,
}

impl AuthReply {
    /// A reply carrying only an outcome code.
    pub fn with_code(code: ErrorCode) -> Self {
        Self {
            code,
            id: None,
            contact: None,
            contacts: None,
            history: None,
        }
    }
}

/// Search reply body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchReply {
    /// Outcome
    #[serde(rename = "searchResult")]
    pub search_result: SearchResult,
    /// Matches, when found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contacts: Option<Vec<Contact>>,
}

/// QueryContact reply body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactReply {
    /// The requested contact
    pub contact: Contact,
}

/// A server-to-client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Answer to Registration
    Registration(RegistrationReply),
    /// Answer to Auth
    Auth(AuthReply),
    /// Answer to Search
    Search(SearchReply),
    /// Answer to QueryContact
    Contact(ContactReply),
    /// Poller push of pending records sharing one state
    History {
        /// State of every record in the batch
        state: HistoryState,
        /// The delta
        history: Vec<HistoryRecord>,
    },
}

#[derive(Serialize)]
struct Framed<'a, T: Serialize> {
    action: Action,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Serialize)]
struct HistoryBody<'a> {
    history: &'a [HistoryRecord],
}

impl Reply {
    /// The action code this frame carries.
    pub fn action(&self) -> Action {
        match self {
            Reply::Registration(_) => Action::Registration,
            Reply::Auth(_) => Action::Auth,
            Reply::Search(_) => Action::Search,
            Reply::Contact(_) => Action::QueryContact,
            Reply::History { state, .. } => state.push_action(),
        }
    }

    /// Encode as a compact JSON text frame.
    pub fn encode(&self) -> Result<String, WireError> {
        let action = self.action();
        let text = match self {
            Reply::Registration(body) => serde_json::to_string(&Framed { action, body })?,
            Reply::Auth(body) => serde_json::to_string(&Framed { action, body })?,
            Reply::Search(body) => serde_json::to_string(&Framed { action, body })?,
            Reply::Contact(body) => serde_json::to_string(&Framed { action, body })?,
            Reply::History { history, .. } => serde_json::to_string(&Framed {
                action,
                body: &HistoryBody { history },
            })?,
        };
        Ok(text)
    }
}
