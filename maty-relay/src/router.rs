//! Request dispatch.
//!
//! Every inbound frame is decoded once into a [`Request`] and matched
//! exhaustively. Handlers return an [`Outcome`]; only Registration, Auth,
//! Search and a hit on QueryContact produce a reply. The remaining actions
//! are accepted without acknowledgement.

use crate::digest::{CredentialDigest, DigestError};
use crate::error::{RelayError, StorageError};
use crate::registry::{ConnectionHandle, SessionRegistry};
use crate::server::RelayMetrics;
use crate::storage::{
    HistoryFilter, HistoryMatch, HistoryTransition, NewContact, NewHistory, RecordVersion, Store,
};
use maty_types::{
    AddHistory, AuthReply, AuthRequest, ClearHistory, Contact, ContactId, ContactReply,
    ErrorCode, LinkRequest, ModifyHistory, QueryContact, Registration, RegistrationReply,
    RemoveHistory, Reply, Request, Search, SearchReply, SearchResult,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// What a handled request asks the transport to do.
#[derive(Debug)]
pub enum Outcome {
    /// Send this reply to the caller.
    Reply(Reply),
    /// Send the Auth reply, then register the caller's session.
    Authenticated {
        /// Successful Auth reply.
        reply: Reply,
        /// Principal the session is registered under.
        principal: ContactId,
        /// Login the caller authenticated with.
        login: String,
    },
    /// Executed; the protocol does not report the result.
    Accepted,
    /// Nothing to send (lookup miss or reserved action).
    NoReply,
}

/// Executes client requests against the store and the session registry.
pub struct ActionRouter {
    store: Arc<dyn Store>,
    registry: Arc<SessionRegistry>,
    digest: Arc<dyn CredentialDigest>,
    metrics: Arc<RelayMetrics>,
}

impl std::fmt::Debug for ActionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRouter")
            .field("sessions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl ActionRouter {
    /// Create a router over shared state.
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<SessionRegistry>,
        digest: Arc<dyn CredentialDigest>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            digest,
            metrics,
        }
    }

    /// Decode, execute and answer one text frame.
    ///
    /// Malformed frames are logged and dropped. Handler failures are logged
    /// and produce no reply.
    pub async fn on_message(&self, text: &str, handle: &ConnectionHandle) {
        let request = match Request::decode(text) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Dropping frame from connection {}: {}", handle.id(), e);
                self.metrics.protocol_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        self.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

        let action = request.action();
        match self.dispatch(request).await {
            Ok(outcome) => self.deliver(outcome, handle),
            Err(e) => {
                if matches!(e, RelayError::Storage(_)) {
                    self.metrics.storage_errors.fetch_add(1, Ordering::Relaxed);
                }
                tracing::error!(
                    "Action {:?} from connection {} failed: {}",
                    action,
                    handle.id(),
                    e
                );
            }
        }
    }

    /// Execute a decoded request.
    pub async fn dispatch(&self, request: Request) -> Result<Outcome, RelayError> {
        match request {
            Request::Registration(req) => self.registration(req).await,
            Request::Auth(req) => self.auth(req).await,
            Request::Message => {
                tracing::debug!("Message action carries no behavior");
                Ok(Outcome::NoReply)
            }
            Request::Search(req) => self.search(req).await,
            Request::QueryContact(req) => self.query_contact(req).await,
            Request::LinkContact(req) => self.link(req).await,
            Request::UnlinkContact(req) => self.unlink(req).await,
            Request::AddHistory(req) => self.add_history(req).await,
            Request::ModifyHistory(req) => self.modify_history(req).await,
            Request::RemoveHistory(req) => self.remove_history(req).await,
            Request::ClearHistory(req) => self.clear_history(req).await,
        }
    }

    fn deliver(&self, outcome: Outcome, handle: &ConnectionHandle) {
        match outcome {
            Outcome::Reply(reply) => {
                let _ = self.send(&reply, handle);
            }
            Outcome::Authenticated {
                reply,
                principal,
                login,
            } => {
                // The reply must be queued before the poller can see the session.
                if self.send(&reply, handle) {
                    self.registry.add(principal, &login, handle.clone());
                    self.metrics
                        .sessions_registered
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
            Outcome::Accepted | Outcome::NoReply => {}
        }
    }

    fn send(&self, reply: &Reply, handle: &ConnectionHandle) -> bool {
        let frame = match reply.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to encode {:?} reply: {}", reply.action(), e);
                return false;
            }
        };
        match handle.send(frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dropping {:?} reply: {}", reply.action(), e);
                false
            }
        }
    }

    async fn registration(&self, req: Registration) -> Result<Outcome, RelayError> {
        let conflict = || {
            tracing::info!("Registration rejected, login exists: {}", req.login);
            Outcome::Reply(Reply::Registration(RegistrationReply {
                code: ErrorCode::LoginExists,
                id: None,
            }))
        };

        if self.store.contact_exists(&req.login).await? {
            return Ok(conflict());
        }

        let password_digest = self.hash(req.password.clone()).await?;
        let contact = NewContact {
            name: req.name.clone(),
            login: req.login.clone(),
            password_digest,
            image: req.image.clone(),
            phone: req.phone.clone(),
            about: req.about.clone(),
        };

        match self.store.create_contact(contact).await {
            Ok(id) => {
                tracing::info!("Registered contact: login={} id={}", req.login, id);
                Ok(Outcome::Reply(Reply::Registration(RegistrationReply {
                    code: ErrorCode::Ok,
                    id: Some(id),
                })))
            }
            Err(StorageError::Conflict { .. }) => Ok(conflict()),
            Err(e) => Err(e.into()),
        }
    }

    async fn auth(&self, req: AuthRequest) -> Result<Outcome, RelayError> {
        let Some(stored) = self.store.password_digest(&req.login).await? else {
            tracing::info!("Auth failed, no such login: {}", req.login);
            return Ok(Outcome::Reply(Reply::Auth(AuthReply::with_code(
                ErrorCode::NoLogin,
            ))));
        };

        if !self.verify(req.password.clone(), stored).await? {
            tracing::info!("Auth failed, wrong password: {}", req.login);
            return Ok(Outcome::Reply(Reply::Auth(AuthReply::with_code(
                ErrorCode::Password,
            ))));
        }

        let need_profile = req.querydata || req.id.is_unset();
        let profile = if need_profile {
            match self.store.contact_by_login(&req.login).await? {
                Some(contact) => Some(contact),
                None => {
                    // Deleted between the digest lookup and now
                    return Ok(Outcome::Reply(Reply::Auth(AuthReply::with_code(
                        ErrorCode::NoLogin,
                    ))));
                }
            }
        } else {
            None
        };

        let principal = match (&profile, req.id.is_unset()) {
            (Some(contact), true) => contact.id,
            _ => req.id,
        };

        let mut reply = AuthReply::with_code(ErrorCode::Ok);
        reply.id = Some(principal);

        if req.querydata {
            let contacts = self.linked_contacts(principal).await?;
            let history = self
                .store
                .query_history(HistoryFilter::complete(principal))
                .await?;

            // Exactly the versions in the reply count as delivered.
            let delivered: Vec<RecordVersion> = history.iter().map(RecordVersion::from).collect();
            let marked = self.store.mark_delivered(principal, &delivered).await?;
            tracing::debug!("Marked {} record(s) read for {}", marked, principal);

            reply.contact = profile;
            reply.contacts = Some(contacts);
            reply.history = Some(history);
        }

        tracing::info!("Auth ok: login={} principal={}", req.login, principal);
        Ok(Outcome::Authenticated {
            reply: Reply::Auth(reply),
            principal,
            login: req.login,
        })
    }

    async fn linked_contacts(&self, owner: ContactId) -> Result<Vec<Contact>, RelayError> {
        let mut contacts = Vec::new();
        for peer in self.store.linked_ids(owner).await? {
            match self.store.contact_by_id(peer).await? {
                Some(contact) => contacts.push(contact),
                None => tracing::warn!("Link {} -> {} points at a missing contact", owner, peer),
            }
        }
        Ok(contacts)
    }

    async fn search(&self, req: Search) -> Result<Outcome, RelayError> {
        let text = req.text.trim();
        let contacts = if text.is_empty() {
            Vec::new()
        } else {
            self.store.search_contacts(text, req.cid).await?
        };

        let reply = if contacts.is_empty() {
            SearchReply {
                search_result: SearchResult::NotFound,
                contacts: None,
            }
        } else {
            SearchReply {
                search_result: SearchResult::Found,
                contacts: Some(contacts),
            }
        };
        Ok(Outcome::Reply(Reply::Search(reply)))
    }

    async fn query_contact(&self, req: QueryContact) -> Result<Outcome, RelayError> {
        match self.store.contact_by_id(req.id).await? {
            Some(contact) => Ok(Outcome::Reply(Reply::Contact(ContactReply { contact }))),
            None => {
                tracing::debug!("QueryContact miss: {}", req.id);
                Ok(Outcome::NoReply)
            }
        }
    }

    async fn link(&self, req: LinkRequest) -> Result<Outcome, RelayError> {
        self.store.create_link(req.cid, req.rid, req.approved).await?;
        tracing::debug!("Linked {} -> {} (approved: {})", req.cid, req.rid, req.approved);
        Ok(Outcome::Accepted)
    }

    async fn unlink(&self, req: LinkRequest) -> Result<Outcome, RelayError> {
        let existed = self.store.delete_link(req.cid, req.rid).await?;
        tracing::debug!("Unlinked {} -> {} (existed: {})", req.cid, req.rid, existed);
        Ok(Outcome::Accepted)
    }

    async fn add_history(&self, req: AddHistory) -> Result<Outcome, RelayError> {
        let id = self
            .store
            .append_history(NewHistory {
                source_ref: req.hid,
                sender_id: req.cid,
                recipient_id: req.rid,
                text: req.text,
            })
            .await?;
        tracing::debug!("Add history {}: {} -> {}", id, req.cid, req.rid);
        Ok(Outcome::Accepted)
    }

    async fn modify_history(&self, req: ModifyHistory) -> Result<Outcome, RelayError> {
        let target = HistoryMatch::Source {
            source_ref: req.hid,
            sender_id: req.cid,
            recipient_id: req.rid,
        };
        let touched = self
            .store
            .set_history_state(target, HistoryTransition::Modify { text: req.text })
            .await?;
        if touched == 0 {
            tracing::debug!("Modify history {} -> {}: no editable record", req.cid, req.rid);
        }
        Ok(Outcome::Accepted)
    }

    async fn remove_history(&self, req: RemoveHistory) -> Result<Outcome, RelayError> {
        let touched = self
            .store
            .set_history_state(HistoryMatch::Id(req.id), HistoryTransition::Remove)
            .await?;
        if touched == 0 {
            tracing::debug!("Remove history {}: no removable record", req.id);
        }
        Ok(Outcome::Accepted)
    }

    async fn clear_history(&self, req: ClearHistory) -> Result<Outcome, RelayError> {
        let deleted = self.store.delete_history_for(req.cid).await?;
        tracing::info!("Cleared {} history record(s) of {}", deleted, req.cid);
        Ok(Outcome::Accepted)
    }

    async fn hash(&self, password: String) -> Result<String, RelayError> {
        let digest = self.digest.clone();
        let hashed = tokio::task::spawn_blocking(move || digest.digest(&password))
            .await
            .map_err(|e| DigestError::Hash(e.to_string()))??;
        Ok(hashed)
    }

    async fn verify(&self, password: String, stored: String) -> Result<bool, RelayError> {
        let digest = self.digest.clone();
        let ok = tokio::task::spawn_blocking(move || digest.verify(&password, &stored))
            .await
            .map_err(|e| DigestError::Hash(e.to_string()))?;
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestAlgorithm;
    use crate::storage::SqliteStore;
    use maty_types::{HistoryId, HistoryState};
    use serde_json::Value;
    use tokio::sync::mpsc;

    struct Harness {
        router: ActionRouter,
        store: Arc<dyn Store>,
        registry: Arc<SessionRegistry>,
        metrics: Arc<RelayMetrics>,
    }

    async fn harness() -> Harness {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let registry = Arc::new(SessionRegistry::new());
        let metrics = Arc::new(RelayMetrics::default());
        let router = ActionRouter::new(
            store.clone(),
            registry.clone(),
            DigestAlgorithm::Sha256.build(),
            metrics.clone(),
        );
        Harness {
            router,
            store,
            registry,
            metrics,
        }
    }

    fn connection(id: u64) -> (ConnectionHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        (ConnectionHandle::new(id, tx), rx)
    }

    fn next_frame(rx: &mut mpsc::Receiver<String>) -> Value {
        let frame = rx.try_recv().expect("expected a reply");
        serde_json::from_str(&frame).unwrap()
    }

    async fn register(h: &Harness, login: &str, password: &str) -> ContactId {
        let (conn, mut rx) = connection(999);
        let frame = format!(
            r#"{{"action":1,"name":"{login}","login":"{login}","password":"{password}"}}"#
        );
        h.router.on_message(&frame, &conn).await;
        let reply = next_frame(&mut rx);
        ContactId::new(reply["id"].as_i64().unwrap())
    }

    async fn add_history(h: &Harness, hid: i64, from: ContactId, to: ContactId, text: &str) {
        let (conn, _rx) = connection(998);
        let frame = format!(
            r#"{{"action":8,"hid":{hid},"cid":{from},"rid":{to},"text":"{text}"}}"#
        );
        h.router.on_message(&frame, &conn).await;
    }

    #[tokio::test]
    async fn registration_then_conflict() {
        let h = harness().await;
        let (conn, mut rx) = connection(1);
        let frame = r#"{"action":1,"name":"Ann","login":"ann","password":"pw"}"#;

        h.router.on_message(frame, &conn).await;
        let first = next_frame(&mut rx);
        assert_eq!(first["action"], 1);
        assert_eq!(first["code"], 0);
        assert!(first["id"].as_i64().unwrap() > 0);

        h.router.on_message(frame, &conn).await;
        let second = next_frame(&mut rx);
        assert_eq!(second["code"], 2);
        assert!(second.get("id").is_none());

        assert!(h.store.contact_exists("ann").await.unwrap());
        assert_eq!(h.store.search_contacts("ann", ContactId::new(0)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn registration_stores_digest_not_password() {
        let h = harness().await;
        register(&h, "ann", "secret").await;

        let stored = h.store.password_digest("ann").await.unwrap().unwrap();
        assert_ne!(stored, "secret");
    }

    #[tokio::test]
    async fn auth_unknown_login() {
        let h = harness().await;
        let (conn, mut rx) = connection(1);

        h.router
            .on_message(r#"{"action":2,"login":"ghost","password":"pw"}"#, &conn)
            .await;

        let reply = next_frame(&mut rx);
        assert_eq!(reply["action"], 2);
        assert_eq!(reply["code"], 3);
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn auth_wrong_password_keeps_existing_session() {
        let h = harness().await;
        let ann = register(&h, "ann", "pw").await;
        let (a, mut rx_a) = connection(1);
        let (b, mut rx_b) = connection(2);

        h.router
            .on_message(r#"{"action":2,"login":"ann","password":"pw"}"#, &a)
            .await;
        assert_eq!(next_frame(&mut rx_a)["code"], 0);

        h.router
            .on_message(r#"{"action":2,"login":"ann","password":"nope"}"#, &b)
            .await;
        assert_eq!(next_frame(&mut rx_b)["code"], 4);

        assert_eq!(h.registry.len(), 1);
        assert_eq!(h.registry.find(ann).unwrap().handle.id(), 1);
    }

    #[tokio::test]
    async fn auth_registers_session_after_reply() {
        let h = harness().await;
        let ann = register(&h, "ann", "pw").await;
        let (conn, mut rx) = connection(5);

        h.router
            .on_message(r#"{"action":2,"login":"ann","password":"pw"}"#, &conn)
            .await;

        let reply = next_frame(&mut rx);
        assert_eq!(reply["code"], 0);
        assert_eq!(reply["id"], ann.value());
        assert!(reply.get("contact").is_none());
        assert!(reply.get("history").is_none());

        let session = h.registry.find(ann).unwrap();
        assert_eq!(session.login, "ann");
        assert_eq!(session.handle.id(), 5);
        assert_eq!(h.metrics.sessions_registered.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn auth_trusts_supplied_id() {
        let h = harness().await;
        register(&h, "ann", "pw").await;
        let (conn, mut rx) = connection(1);

        h.router
            .on_message(r#"{"action":2,"login":"ann","password":"pw","id":42}"#, &conn)
            .await;

        assert_eq!(next_frame(&mut rx)["id"], 42);
        assert!(h.registry.find(ContactId::new(42)).is_some());
    }

    #[tokio::test]
    async fn auth_with_querydata_returns_profile_and_marks_read() {
        let h = harness().await;
        let ann = register(&h, "ann", "pw").await;
        let bob = register(&h, "bob", "pw").await;
        let cat = register(&h, "cat", "pw").await;

        let (conn, _rx) = connection(7);
        h.router
            .on_message(&format!(r#"{{"action":6,"cid":{ann},"rid":{bob}}}"#), &conn)
            .await;
        h.router
            .on_message(&format!(r#"{{"action":6,"cid":{ann},"rid":{cat}}}"#), &conn)
            .await;

        add_history(&h, 1, bob, ann, "hi ann").await;
        add_history(&h, 2, ann, bob, "hi bob").await;
        add_history(&h, 3, bob, ann, "gone").await;
        h.store
            .set_history_state(HistoryMatch::Id(HistoryId::new(3)), HistoryTransition::Remove)
            .await
            .unwrap();

        let (conn, mut rx) = connection(8);
        h.router
            .on_message(
                r#"{"action":2,"login":"ann","password":"pw","querydata":true}"#,
                &conn,
            )
            .await;
        let reply = next_frame(&mut rx);

        assert_eq!(reply["code"], 0);
        assert_eq!(reply["contact"]["login"], "ann");
        let logins: Vec<&str> = reply["contacts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["login"].as_str().unwrap())
            .collect();
        assert_eq!(logins, vec!["bob", "cat"]);

        let texts: Vec<&str> = reply["history"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["hi ann", "hi bob"]);

        // Rows in the reply are delivered; the removed row was not in it and
        // stays pending for the poller.
        let pending = h
            .store
            .query_history(HistoryFilter::pending(ann, HistoryState::Regular))
            .await
            .unwrap();
        assert!(pending.is_empty());
        let removed = h
            .store
            .query_history(HistoryFilter::pending(ann, HistoryState::Removed))
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);

        // Rows ann sent stay pending for bob
        let bob_pending = h
            .store
            .query_history(HistoryFilter::pending(bob, HistoryState::Regular))
            .await
            .unwrap();
        assert_eq!(bob_pending.len(), 1);
    }

    #[tokio::test]
    async fn auth_with_querydata_keeps_older_removal_pending() {
        let h = harness().await;
        let ann = register(&h, "ann", "pw").await;
        let bob = register(&h, "bob", "pw").await;

        add_history(&h, 1, bob, ann, "retracted").await;
        add_history(&h, 2, bob, ann, "kept").await;
        let retracted = h
            .store
            .query_history(HistoryFilter::pending(ann, HistoryState::Regular))
            .await
            .unwrap()[0]
            .id;
        h.store
            .set_history_state(HistoryMatch::Id(retracted), HistoryTransition::Remove)
            .await
            .unwrap();

        let (conn, mut rx) = connection(3);
        h.router
            .on_message(
                r#"{"action":2,"login":"ann","password":"pw","querydata":true}"#,
                &conn,
            )
            .await;
        let reply = next_frame(&mut rx);
        assert_eq!(reply["history"].as_array().unwrap().len(), 1);

        let removed = h
            .store
            .query_history(HistoryFilter::pending(ann, HistoryState::Removed))
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, retracted);
    }

    #[tokio::test]
    async fn search_excludes_caller() {
        let h = harness().await;
        let ann = register(&h, "ann", "pw").await;
        register(&h, "annie", "pw").await;
        let (conn, mut rx) = connection(1);

        h.router
            .on_message(&format!(r#"{{"action":4,"text":"ann","cid":{ann}}}"#), &conn)
            .await;

        let reply = next_frame(&mut rx);
        assert_eq!(reply["action"], 4);
        assert_eq!(reply["searchResult"], 0);
        let contacts = reply["contacts"].as_array().unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0]["login"], "annie");
        assert!(contacts[0].get("password").is_none());
    }

    #[tokio::test]
    async fn search_not_found() {
        let h = harness().await;
        register(&h, "ann", "pw").await;
        let (conn, mut rx) = connection(1);

        h.router
            .on_message(r#"{"action":4,"text":"zed","cid":0}"#, &conn)
            .await;
        let reply = next_frame(&mut rx);
        assert_eq!(reply["searchResult"], 1);
        assert!(reply.get("contacts").is_none());

        h.router
            .on_message(r#"{"action":4,"text":"   ","cid":0}"#, &conn)
            .await;
        assert_eq!(next_frame(&mut rx)["searchResult"], 1);

        h.router
            .on_message(r#"{"action":4,"text":"%","cid":0}"#, &conn)
            .await;
        assert_eq!(next_frame(&mut rx)["searchResult"], 1);
    }

    #[tokio::test]
    async fn query_contact_hit_and_miss() {
        let h = harness().await;
        let ann = register(&h, "ann", "pw").await;
        let (conn, mut rx) = connection(1);

        h.router
            .on_message(&format!(r#"{{"action":5,"id":{ann}}}"#), &conn)
            .await;
        let reply = next_frame(&mut rx);
        assert_eq!(reply["action"], 5);
        assert_eq!(reply["contact"]["name"], "ann");

        h.router
            .on_message(r#"{"action":5,"id":4040}"#, &conn)
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn link_and_unlink_are_silent() {
        let h = harness().await;
        let ann = register(&h, "ann", "pw").await;
        let bob = register(&h, "bob", "pw").await;
        let (conn, mut rx) = connection(1);

        h.router
            .on_message(
                &format!(r#"{{"action":6,"cid":{ann},"rid":{bob},"approved":true}}"#),
                &conn,
            )
            .await;
        assert!(rx.try_recv().is_err());
        assert_eq!(h.store.linked_ids(ann).await.unwrap(), vec![bob]);
        assert!(h.store.linked_ids(bob).await.unwrap().is_empty());

        h.router
            .on_message(&format!(r#"{{"action":7,"cid":{ann},"rid":{bob}}}"#), &conn)
            .await;
        assert!(rx.try_recv().is_err());
        assert!(h.store.linked_ids(ann).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_actions_drive_state_machine() {
        let h = harness().await;
        let (a, b) = (ContactId::new(1), ContactId::new(2));
        let (conn, mut rx) = connection(1);

        add_history(&h, 10, a, b, "first").await;
        h.router
            .on_message(r#"{"action":9,"hid":10,"cid":1,"rid":2,"text":"edited"}"#, &conn)
            .await;

        let modified = h
            .store
            .query_history(HistoryFilter::pending(b, HistoryState::Modified))
            .await
            .unwrap();
        assert_eq!(modified.len(), 1);
        assert_eq!(modified[0].text, "edited");
        let id = modified[0].id;

        h.router
            .on_message(&format!(r#"{{"action":10,"id":{id}}}"#), &conn)
            .await;
        h.router
            .on_message(r#"{"action":9,"hid":10,"cid":1,"rid":2,"text":"again"}"#, &conn)
            .await;

        let removed = h
            .store
            .query_history(HistoryFilter::pending(b, HistoryState::Removed))
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].text, "edited");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn clear_history_deletes_both_directions() {
        let h = harness().await;
        let (a, b, c) = (ContactId::new(1), ContactId::new(2), ContactId::new(3));
        add_history(&h, 1, a, b, "to b").await;
        add_history(&h, 2, b, a, "to a").await;
        add_history(&h, 3, b, c, "to c").await;

        let (conn, _rx) = connection(1);
        h.router.on_message(r#"{"action":11,"cid":1}"#, &conn).await;

        assert!(h.store.query_history(HistoryFilter::complete(a)).await.unwrap().is_empty());
        assert_eq!(h.store.query_history(HistoryFilter::complete(c)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_and_reserved_frames_get_no_reply() {
        let h = harness().await;
        let (conn, mut rx) = connection(1);

        h.router.on_message("{not json", &conn).await;
        h.router.on_message(r#"{"action":12,"history":[]}"#, &conn).await;
        h.router.on_message(r#"{"action":2,"login":"ann"}"#, &conn).await;
        h.router.on_message(r#"{"action":3}"#, &conn).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(h.metrics.protocol_errors.load(Ordering::Relaxed), 3);
        assert_eq!(h.metrics.requests_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn storage_failure_produces_no_reply() {
        let h = harness().await;
        let (conn, mut rx) = connection(1);
        h.store.close().await;

        h.router
            .on_message(r#"{"action":4,"text":"ann","cid":0}"#, &conn)
            .await;

        assert!(rx.try_recv().is_err());
        assert_eq!(h.metrics.storage_errors.load(Ordering::Relaxed), 1);
    }
}
