//! Storage layer for maty-relay.
//!
//! Durable contacts, links and history behind the [`Store`] trait. The
//! history table carries the per-record state machine: transitions are
//! enforced by the store so that the router and the poller can mutate rows
//! concurrently without coordinating.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::StorageError;
use async_trait::async_trait;
use maty_types::{Contact, ContactId, HistoryId, HistoryRecord, HistoryState, SourceRef};

/// A contact to be created.
#[derive(Clone)]
pub struct NewContact {
    /// Display name.
    pub name: String,
    /// Unique login.
    pub login: String,
    /// One-way digest of the password.
    pub password_digest: String,
    /// Avatar.
    pub image: String,
    /// Phone number.
    pub phone: String,
    /// Status line.
    pub about: Option<String>,
}

impl std::fmt::Debug for NewContact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewContact")
            .field("name", &self.name)
            .field("login", &self.login)
            .field("password_digest", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// A history record to be appended (always Regular and unread).
#[derive(Debug, Clone)]
pub struct NewHistory {
    /// Client-local correlation id.
    pub source_ref: SourceRef,
    /// Sender.
    pub sender_id: ContactId,
    /// Recipient.
    pub recipient_id: ContactId,
    /// Message text.
    pub text: String,
}

/// Which history row a state change applies to.
#[derive(Debug, Clone)]
pub enum HistoryMatch {
    /// By store primary key.
    Id(HistoryId),
    /// By the client's correlation id within one conversation direction.
    Source {
        /// Client-local correlation id.
        source_ref: SourceRef,
        /// Sender.
        sender_id: ContactId,
        /// Recipient.
        recipient_id: ContactId,
    },
}

/// A requested state change.
#[derive(Debug, Clone)]
pub enum HistoryTransition {
    /// Move to Modified and overwrite the text.
    Modify {
        /// Replacement text.
        text: String,
    },
    /// Move to Removed.
    Remove,
}

impl HistoryTransition {
    /// State the record ends up in.
    pub fn target(&self) -> HistoryState {
        match self {
            HistoryTransition::Modify { .. } => HistoryState::Modified,
            HistoryTransition::Remove => HistoryState::Removed,
        }
    }
}

/// One version of a history record, as it was handed to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordVersion {
    /// Store primary key.
    pub id: HistoryId,
    /// Revision at the time it was read.
    pub rev: i64,
}

impl From<&HistoryRecord> for RecordVersion {
    fn from(record: &HistoryRecord) -> Self {
        Self {
            id: record.id,
            rev: record.rev,
        }
    }
}

/// History query filter.
#[derive(Debug, Clone, Copy)]
pub struct HistoryFilter {
    /// Principal the query is about.
    pub principal: ContactId,
    /// Restrict to one state.
    pub state: Option<HistoryState>,
    /// `true`: every non-removed row the principal sent or received.
    /// `false`: only unread rows addressed to the principal.
    pub all: bool,
}

impl HistoryFilter {
    /// Unread rows addressed to `principal` in `state`.
    pub fn pending(principal: ContactId, state: HistoryState) -> Self {
        Self {
            principal,
            state: Some(state),
            all: false,
        }
    }

    /// The complete, non-removed conversation history of `principal`.
    pub fn complete(principal: ContactId) -> Self {
        Self {
            principal,
            state: None,
            all: true,
        }
    }
}

/// Trait for relay storage backends.
///
/// Each call is its own short unit of work; nothing spans calls.
#[async_trait]
pub trait Store: Send + Sync {
    /// Whether a contact with this login exists.
    async fn contact_exists(&self, login: &str) -> Result<bool, StorageError>;

    /// Create a contact and return its assigned id.
    ///
    /// Fails with [`StorageError::Conflict`] if the login is taken.
    async fn create_contact(&self, contact: NewContact) -> Result<ContactId, StorageError>;

    /// Look up a contact by login.
    async fn contact_by_login(&self, login: &str) -> Result<Option<Contact>, StorageError>;

    /// Look up a contact by id.
    async fn contact_by_id(&self, id: ContactId) -> Result<Option<Contact>, StorageError>;

    /// Stored password digest for a login.
    async fn password_digest(&self, login: &str) -> Result<Option<String>, StorageError>;

    /// Contacts whose login contains `substring`, excluding `exclude`.
    async fn search_contacts(
        &self,
        substring: &str,
        exclude: ContactId,
    ) -> Result<Vec<Contact>, StorageError>;

    /// Insert the ordered link `(owner, peer)`, or update its approval flag.
    async fn create_link(
        &self,
        owner: ContactId,
        peer: ContactId,
        approved: bool,
    ) -> Result<(), StorageError>;

    /// Delete the ordered link `(owner, peer)`. Returns whether a row existed.
    async fn delete_link(&self, owner: ContactId, peer: ContactId) -> Result<bool, StorageError>;

    /// Peers linked from `owner`, in link creation order.
    async fn linked_ids(&self, owner: ContactId) -> Result<Vec<ContactId>, StorageError>;

    /// Append a Regular, unread record and return its id.
    async fn append_history(&self, record: NewHistory) -> Result<HistoryId, StorageError>;

    /// Apply a state transition to the matching record.
    ///
    /// Only rows whose current state may legally move to the target are
    /// touched; every touched row gets `read = false` and a new revision.
    /// Returns rows affected.
    async fn set_history_state(
        &self,
        target: HistoryMatch,
        transition: HistoryTransition,
    ) -> Result<u64, StorageError>;

    /// Hard-delete every row the principal sent or received.
    async fn delete_history_for(&self, principal: ContactId) -> Result<u64, StorageError>;

    /// Query history, ordered by id.
    async fn query_history(&self, filter: HistoryFilter)
        -> Result<Vec<HistoryRecord>, StorageError>;

    /// Mark the given record versions addressed to `recipient` as read.
    ///
    /// A row whose revision moved on since it was read is left unread, so a
    /// transition racing the delivery is pushed on a later tick.
    async fn mark_delivered(
        &self,
        recipient: ContactId,
        delivered: &[RecordVersion],
    ) -> Result<u64, StorageError>;

    /// Release the underlying connections.
    async fn close(&self);
}
