//! Live session registry.
//!
//! Maps each authenticated principal to the connection its pushes and
//! replies go to. At most one session per principal: registering again
//! replaces the previous entry.

use crate::error::{ProtocolError, ProtocolResult};
use dashmap::DashMap;
use maty_types::ContactId;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Outbound side of one transport connection.
///
/// Cheap to clone. Sending never waits: frames go into a bounded queue that
/// the transport's writer task drains.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: u64,
    sender: mpsc::Sender<String>,
}

impl ConnectionHandle {
    /// Wrap the sending half of a connection's outbound queue.
    pub fn new(id: u64, sender: mpsc::Sender<String>) -> Self {
        Self { id, sender }
    }

    /// Relay-assigned connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a text frame for delivery.
    ///
    /// Fails if the queue is full or the transport has gone away.
    pub fn send(&self, frame: String) -> ProtocolResult<()> {
        self.sender.try_send(frame).map_err(|e| ProtocolError::SendFailed {
            connection: self.id,
            reason: match e {
                TrySendError::Full(_) => "outbound queue full",
                TrySendError::Closed(_) => "connection closed",
            },
        })
    }

    /// Whether the transport side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// A principal's live mapping to its connection.
#[derive(Clone, Debug)]
pub struct Session {
    /// Authenticated principal.
    pub principal: ContactId,
    /// Login the principal authenticated with.
    pub login: String,
    /// Where to send frames.
    pub handle: ConnectionHandle,
    /// When the session was registered.
    pub since: Instant,
}

/// Concurrent principal -> session map.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<ContactId, Session>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, replacing any existing one for the principal.
    ///
    /// Returns the replaced session, if any.
    pub fn add(&self, principal: ContactId, login: &str, handle: ConnectionHandle) -> Option<Session> {
        let connection = handle.id();
        let replaced = self.sessions.insert(
            principal,
            Session {
                principal,
                login: login.to_string(),
                handle,
                since: Instant::now(),
            },
        );

        match &replaced {
            Some(old) if old.handle.id() != connection => tracing::info!(
                "Replaced session: principal={} login={} connection {} -> {}",
                principal,
                login,
                old.handle.id(),
                connection
            ),
            Some(_) => tracing::debug!("Refreshed session: principal={}", principal),
            None => tracing::info!(
                "Registered session: principal={} login={} connection={} (total: {})",
                principal,
                login,
                connection,
                self.sessions.len()
            ),
        }

        replaced
    }

    /// Look up the session of a principal.
    pub fn find(&self, principal: ContactId) -> Option<Session> {
        self.sessions.get(&principal).map(|entry| entry.value().clone())
    }

    /// Remove the session of a principal.
    pub fn remove(&self, principal: ContactId) -> Option<Session> {
        self.sessions.remove(&principal).map(|(_, session)| session)
    }

    /// Remove every session routed to this connection.
    ///
    /// A session that was re-registered on another connection is left alone.
    /// Returns the number of sessions removed.
    pub fn remove_connection(&self, handle: &ConnectionHandle) -> usize {
        let connection = handle.id();
        let principals: Vec<ContactId> = self
            .sessions
            .iter()
            .filter(|entry| entry.handle.id() == connection)
            .map(|entry| *entry.key())
            .collect();

        let mut removed = 0;
        for principal in principals {
            if self
                .sessions
                .remove_if(&principal, |_, session| session.handle.id() == connection)
                .is_some()
            {
                tracing::debug!(
                    "Unregistered session: principal={} connection={}",
                    principal,
                    connection
                );
                removed += 1;
            }
        }
        removed
    }

    /// Copy of the current sessions.
    ///
    /// Shard locks are released before this returns, so callers may await
    /// while walking the snapshot.
    pub fn snapshot(&self) -> Vec<Session> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Visit a snapshot of the current sessions.
    pub fn for_each<F: FnMut(&Session)>(&self, mut f: F) {
        for session in self.snapshot() {
            f(&session);
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
