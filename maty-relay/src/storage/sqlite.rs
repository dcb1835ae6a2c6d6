//! SQLite storage backend for maty-relay.

use super::{
    HistoryFilter, HistoryMatch, HistoryTransition, NewContact, NewHistory, RecordVersion, Store,
};
use crate::error::StorageError;
use async_trait::async_trait;
use maty_types::{Contact, ContactId, HistoryId, HistoryRecord, HistoryState, SourceRef};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// SQLite-based relay storage.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite store at a database path.
    ///
    /// Creates the parent directory and the database file if missing.
    pub async fn new(path: &Path, max_connections: u32) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|_| StorageError::InvalidPath {
                    path: path.to_path_buf(),
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        tracing::info!("Opened store at {}", path.display());
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // A single connection that never recycles: each new connection to
        // ":memory:" would be a fresh, empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                login TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,
                image TEXT NOT NULL DEFAULT '',
                phone TEXT NOT NULL DEFAULT '',
                about TEXT,
                ts INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                owner_id INTEGER NOT NULL,
                peer_id INTEGER NOT NULL,
                approved INTEGER NOT NULL DEFAULT 0,
                ts INTEGER NOT NULL,
                PRIMARY KEY (owner_id, peer_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_ref TEXT NOT NULL,
                sender_id INTEGER NOT NULL,
                recipient_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                state INTEGER NOT NULL DEFAULT 0,
                rev INTEGER NOT NULL DEFAULT 0,
                ts INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        // Databases created before record revisions existed
        let has_rev: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('history') WHERE name = 'rev'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::Database)?;
        if has_rev == 0 {
            sqlx::query("ALTER TABLE history ADD COLUMN rev INTEGER NOT NULL DEFAULT 0")
                .execute(&self.pool)
                .await
                .map_err(StorageError::Database)?;
            tracing::info!("Added rev column to history table");
        }

        // Poller scans by (recipient, read, state) every tick
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_history_pending ON history(recipient_id, is_read, state)",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_sender ON history(sender_id)")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_history_source ON history(source_ref, sender_id, recipient_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    fn current_timestamp_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Record versions per mark statement, keeping bind counts well under
/// SQLite's variable limit.
const MARK_CHUNK: usize = 500;

/// Escape LIKE wildcards so a search substring matches literally.
fn like_pattern(substring: &str) -> String {
    let mut pattern = String::with_capacity(substring.len() + 2);
    pattern.push('%');
    for c in substring.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl Store for SqliteStore {
    async fn contact_exists(&self, login: &str) -> Result<bool, StorageError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM contacts WHERE login = ?1)")
                .bind(login)
                .fetch_one(&self.pool)
                .await
                .map_err(StorageError::Database)?;

        Ok(exists)
    }

    async fn create_contact(&self, contact: NewContact) -> Result<ContactId, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO contacts (name, login, password, image, phone, about, ts)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&contact.name)
        .bind(&contact.login)
        .bind(&contact.password_digest)
        .bind(&contact.image)
        .bind(&contact.phone)
        .bind(&contact.about)
        .bind(Self::current_timestamp_ms())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(ContactId::new(done.last_insert_rowid())),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::Conflict {
                    what: format!("login {}", contact.login),
                })
            }
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    async fn contact_by_login(&self, login: &str) -> Result<Option<Contact>, StorageError> {
        let row = sqlx::query_as::<_, ContactRow>(
            "SELECT id, name, login, image, phone, about FROM contacts WHERE login = ?1",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(row.map(Contact::from))
    }

    async fn contact_by_id(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        let row = sqlx::query_as::<_, ContactRow>(
            "SELECT id, name, login, image, phone, about FROM contacts WHERE id = ?1",
        )
        .bind(id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(row.map(Contact::from))
    }

    async fn password_digest(&self, login: &str) -> Result<Option<String>, StorageError> {
        let digest: Option<String> =
            sqlx::query_scalar("SELECT password FROM contacts WHERE login = ?1")
                .bind(login)
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::Database)?;

        Ok(digest)
    }

    async fn search_contacts(
        &self,
        substring: &str,
        exclude: ContactId,
    ) -> Result<Vec<Contact>, StorageError> {
        let rows = sqlx::query_as::<_, ContactRow>(
            r#"
            SELECT id, name, login, image, phone, about
            FROM contacts
            WHERE login LIKE ?1 ESCAPE '\' AND id != ?2
            ORDER BY id ASC
            "#,
        )
        .bind(like_pattern(substring))
        .bind(exclude.value())
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(rows.into_iter().map(Contact::from).collect())
    }

    async fn create_link(
        &self,
        owner: ContactId,
        peer: ContactId,
        approved: bool,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO links (owner_id, peer_id, approved, ts)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(owner_id, peer_id) DO UPDATE SET approved = ?3
            "#,
        )
        .bind(owner.value())
        .bind(peer.value())
        .bind(approved)
        .bind(Self::current_timestamp_ms())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    async fn delete_link(&self, owner: ContactId, peer: ContactId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM links WHERE owner_id = ?1 AND peer_id = ?2")
            .bind(owner.value())
            .bind(peer.value())
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn linked_ids(&self, owner: ContactId) -> Result<Vec<ContactId>, StorageError> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT peer_id FROM links WHERE owner_id = ?1 ORDER BY rowid ASC")
                .bind(owner.value())
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::Database)?;

        Ok(ids.into_iter().map(ContactId::new).collect())
    }

    async fn append_history(&self, record: NewHistory) -> Result<HistoryId, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO history (source_ref, sender_id, recipient_id, text, is_read, state, ts)
            VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)
            "#,
        )
        .bind(record.source_ref.to_storage())
        .bind(record.sender_id.value())
        .bind(record.recipient_id.value())
        .bind(&record.text)
        .bind(u8::from(HistoryState::Regular) as i64)
        .bind(Self::current_timestamp_ms())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(HistoryId::new(result.last_insert_rowid()))
    }

    async fn set_history_state(
        &self,
        target: HistoryMatch,
        transition: HistoryTransition,
    ) -> Result<u64, StorageError> {
        let next = transition.target();
        let sources = HistoryState::sources_of(next);
        if sources.is_empty() {
            return Ok(0);
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE history SET state = ");
        query.push_bind(u8::from(next) as i64);
        if let HistoryTransition::Modify { text } = transition {
            query.push(", text = ").push_bind(text);
        }
        query.push(", rev = rev + 1, is_read = 0 WHERE ");

        match target {
            HistoryMatch::Id(id) => {
                query.push("id = ").push_bind(id.value());
            }
            HistoryMatch::Source {
                source_ref,
                sender_id,
                recipient_id,
            } => {
                query
                    .push("source_ref = ")
                    .push_bind(source_ref.to_storage())
                    .push(" AND sender_id = ")
                    .push_bind(sender_id.value())
                    .push(" AND recipient_id = ")
                    .push_bind(recipient_id.value());
            }
        }

        query.push(" AND state IN (");
        let mut allowed = query.separated(", ");
        for state in sources {
            allowed.push_bind(u8::from(*state) as i64);
        }
        allowed.push_unseparated(")");

        let result = query
            .build()
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(result.rows_affected())
    }

    async fn delete_history_for(&self, principal: ContactId) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM history WHERE sender_id = ?1 OR recipient_id = ?1")
            .bind(principal.value())
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(result.rows_affected())
    }

    async fn query_history(
        &self,
        filter: HistoryFilter,
    ) -> Result<Vec<HistoryRecord>, StorageError> {
        let principal = filter.principal.value();
        let state = filter.state.map(|s| u8::from(s) as i64);

        let query = if filter.all {
            sqlx::query_as::<_, HistoryRow>(
                r#"
                SELECT id, source_ref, sender_id, recipient_id, text, is_read, state, rev, ts
                FROM history
                WHERE (sender_id = ?1 OR recipient_id = ?1)
                  AND state != ?2
                  AND (?3 IS NULL OR state = ?3)
                ORDER BY id ASC
                "#,
            )
            .bind(principal)
            .bind(u8::from(HistoryState::Removed) as i64)
            .bind(state)
        } else {
            sqlx::query_as::<_, HistoryRow>(
                r#"
                SELECT id, source_ref, sender_id, recipient_id, text, is_read, state, rev, ts
                FROM history
                WHERE recipient_id = ?1
                  AND is_read = 0
                  AND (?2 IS NULL OR state = ?2)
                ORDER BY id ASC
                "#,
            )
            .bind(principal)
            .bind(state)
        };

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        rows.into_iter().map(HistoryRecord::try_from).collect()
    }

    async fn mark_delivered(
        &self,
        recipient: ContactId,
        delivered: &[RecordVersion],
    ) -> Result<u64, StorageError> {
        let mut marked = 0;
        for chunk in delivered.chunks(MARK_CHUNK) {
            let mut query = QueryBuilder::<Sqlite>::new(
                "UPDATE history SET is_read = 1 WHERE is_read = 0 AND recipient_id = ",
            );
            query.push_bind(recipient.value()).push(" AND (");
            let mut versions = query.separated(" OR ");
            for version in chunk {
                versions
                    .push("(id = ")
                    .push_bind_unseparated(version.id.value())
                    .push_unseparated(" AND rev = ")
                    .push_bind_unseparated(version.rev)
                    .push_unseparated(")");
            }
            query.push(")");

            let result = query
                .build()
                .execute(&self.pool)
                .await
                .map_err(StorageError::Database)?;
            marked += result.rows_affected();
        }

        Ok(marked)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Internal contact row type.
#[derive(sqlx::FromRow)]
struct ContactRow {
    id: i64,
    name: String,
    login: String,
    image: String,
    phone: String,
    about: Option<String>,
}

impl From<ContactRow> for Contact {
    fn from(row: ContactRow) -> Self {
        Contact {
            id: ContactId::new(row.id),
            name: row.name,
            login: row.login,
            image: row.image,
            phone: row.phone,
            about: row.about,
        }
    }
}

/// Internal history row type.
#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    source_ref: String,
    sender_id: i64,
    recipient_id: i64,
    text: String,
    is_read: bool,
    state: i64,
    rev: i64,
    ts: i64,
}

impl TryFrom<HistoryRow> for HistoryRecord {
    type Error = StorageError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StorageError::Corrupt {
            table: "history",
            id: row.id,
            reason,
        };

        let state = u8::try_from(row.state)
            .map_err(|e| corrupt(e.to_string()))
            .and_then(|s| HistoryState::try_from(s).map_err(|e| corrupt(e.to_string())))?;
        let hid = SourceRef::from_storage(&row.source_ref).map_err(|e| corrupt(e.to_string()))?;

        Ok(HistoryRecord {
            id: HistoryId::new(row.id),
            hid,
            cid: ContactId::new(row.sender_id),
            rid: ContactId::new(row.recipient_id),
            text: row.text,
            read: row.is_read,
            state,
            rev: row.rev,
            ts: row.ts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_contact(login: &str) -> NewContact {
        NewContact {
            name: format!("{login} name"),
            login: login.to_string(),
            password_digest: "digest".to_string(),
            image: String::new(),
            phone: String::new(),
            about: None,
        }
    }

    fn message(hid: i64, from: i64, to: i64, text: &str) -> NewHistory {
        NewHistory {
            source_ref: SourceRef::from(hid),
            sender_id: ContactId::new(from),
            recipient_id: ContactId::new(to),
            text: text.to_string(),
        }
    }

    async fn pending(store: &SqliteStore, to: i64, state: HistoryState) -> Vec<HistoryRecord> {
        store
            .query_history(HistoryFilter::pending(ContactId::new(to), state))
            .await
            .unwrap()
    }

    async fn deliver_all(store: &SqliteStore, to: i64) -> u64 {
        let mut versions = Vec::new();
        for state in HistoryState::ALL {
            let rows = pending(store, to, state).await;
            versions.extend(rows.iter().map(RecordVersion::from));
        }
        store
            .mark_delivered(ContactId::new(to), &versions)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_contact_assigns_ids() {
        let store = SqliteStore::in_memory().await.unwrap();

        let a = store.create_contact(new_contact("ann")).await.unwrap();
        let b = store.create_contact(new_contact("bob")).await.unwrap();

        assert_eq!(a.value(), 1);
        assert_eq!(b.value(), 2);
        assert!(store.contact_exists("ann").await.unwrap());
        assert!(!store.contact_exists("carl").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_login_is_conflict() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create_contact(new_contact("ann")).await.unwrap();

        let err = store.create_contact(new_contact("ann")).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contacts")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn contact_lookups() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut contact = new_contact("ann");
        contact.about = Some("hello".into());
        let id = store.create_contact(contact).await.unwrap();

        let by_login = store.contact_by_login("ann").await.unwrap().unwrap();
        let by_id = store.contact_by_id(id).await.unwrap().unwrap();
        assert_eq!(by_login, by_id);
        assert_eq!(by_id.about.as_deref(), Some("hello"));

        assert_eq!(
            store.password_digest("ann").await.unwrap().as_deref(),
            Some("digest")
        );
        assert!(store.password_digest("nobody").await.unwrap().is_none());
        assert!(store.contact_by_id(ContactId::new(99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_matches_substring_and_excludes_caller() {
        let store = SqliteStore::in_memory().await.unwrap();
        let ann = store.create_contact(new_contact("ann")).await.unwrap();
        store.create_contact(new_contact("joanna")).await.unwrap();
        store.create_contact(new_contact("bob")).await.unwrap();

        let found = store.search_contacts("ann", ann).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].login, "joanna");

        let found = store.search_contacts("ann", ContactId::default()).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn search_treats_wildcards_literally() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create_contact(new_contact("a_b")).await.unwrap();
        store.create_contact(new_contact("axb")).await.unwrap();

        let found = store.search_contacts("_", ContactId::default()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].login, "a_b");

        assert!(store
            .search_contacts("%", ContactId::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn links_are_ordered_pairs() {
        let store = SqliteStore::in_memory().await.unwrap();
        let (a, b, c) = (ContactId::new(1), ContactId::new(2), ContactId::new(3));

        store.create_link(a, b, false).await.unwrap();
        store.create_link(a, c, true).await.unwrap();
        store.create_link(a, b, true).await.unwrap();

        assert_eq!(store.linked_ids(a).await.unwrap(), vec![b, c]);
        // Visibility is one-directional
        assert!(store.linked_ids(b).await.unwrap().is_empty());

        assert!(store.delete_link(a, b).await.unwrap());
        assert!(!store.delete_link(a, b).await.unwrap());
        assert_eq!(store.linked_ids(a).await.unwrap(), vec![c]);
    }

    #[tokio::test]
    async fn appended_history_is_pending_for_recipient() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store.append_history(message(7, 1, 2, "hi")).await.unwrap();

        let records = pending(&store, 2, HistoryState::Regular).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].hid, SourceRef::from(7));
        assert_eq!(records[0].text, "hi");
        assert!(!records[0].read);

        // Not pending for the sender, nor under other states
        assert!(pending(&store, 1, HistoryState::Regular).await.is_empty());
        assert!(pending(&store, 2, HistoryState::Modified).await.is_empty());
    }

    #[tokio::test]
    async fn mark_delivered_covers_exact_versions() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.append_history(message(1, 1, 2, "one")).await.unwrap();
        store.append_history(message(2, 1, 2, "two")).await.unwrap();
        let first = pending(&store, 2, HistoryState::Regular).await[0].clone();

        let marked = store
            .mark_delivered(ContactId::new(2), &[RecordVersion::from(&first)])
            .await
            .unwrap();
        assert_eq!(marked, 1);

        let left = pending(&store, 2, HistoryState::Regular).await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].text, "two");

        assert_eq!(store.mark_delivered(ContactId::new(2), &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_version_is_not_marked() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.append_history(message(1, 1, 2, "draft")).await.unwrap();
        let seen = RecordVersion::from(&pending(&store, 2, HistoryState::Regular).await[0]);

        // Edited after it was read but before the mark
        store
            .set_history_state(
                HistoryMatch::Id(seen.id),
                HistoryTransition::Modify {
                    text: "final".into(),
                },
            )
            .await
            .unwrap();

        let marked = store.mark_delivered(ContactId::new(2), &[seen]).await.unwrap();
        assert_eq!(marked, 0);

        let modified = pending(&store, 2, HistoryState::Modified).await;
        assert_eq!(modified.len(), 1);
        assert_eq!(modified[0].rev, seen.rev + 1);
        assert_eq!(modified[0].text, "final");
    }

    #[tokio::test]
    async fn every_transition_bumps_revision() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store.append_history(message(1, 1, 2, "a")).await.unwrap();
        let edit = || HistoryTransition::Modify { text: "b".into() };

        store.set_history_state(HistoryMatch::Id(id), edit()).await.unwrap();
        store.set_history_state(HistoryMatch::Id(id), edit()).await.unwrap();
        store
            .set_history_state(HistoryMatch::Id(id), HistoryTransition::Remove)
            .await
            .unwrap();

        let removed = pending(&store, 2, HistoryState::Removed).await;
        assert_eq!(removed[0].rev, 3);
    }

    #[tokio::test]
    async fn large_batches_are_marked_in_chunks() {
        let store = SqliteStore::in_memory().await.unwrap();
        let total = MARK_CHUNK * 2 + 7;
        for hid in 0..total {
            store
                .append_history(message(hid as i64, 1, 2, "bulk"))
                .await
                .unwrap();
        }

        assert_eq!(deliver_all(&store, 2).await, total as u64);
        assert!(pending(&store, 2, HistoryState::Regular).await.is_empty());
    }

    #[tokio::test]
    async fn mark_delivered_never_touches_sender_rows() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.append_history(message(1, 2, 1, "from two")).await.unwrap();
        let row = RecordVersion::from(&pending(&store, 1, HistoryState::Regular).await[0]);

        let marked = store.mark_delivered(ContactId::new(2), &[row]).await.unwrap();

        assert_eq!(marked, 0);
        assert_eq!(pending(&store, 1, HistoryState::Regular).await.len(), 1);
    }

    #[tokio::test]
    async fn modify_resets_read_and_replaces_text() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.append_history(message(5, 1, 2, "helo")).await.unwrap();
        deliver_all(&store, 2).await;

        let changed = store
            .set_history_state(
                HistoryMatch::Source {
                    source_ref: SourceRef::from(5),
                    sender_id: ContactId::new(1),
                    recipient_id: ContactId::new(2),
                },
                HistoryTransition::Modify {
                    text: "hello".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let modified = pending(&store, 2, HistoryState::Modified).await;
        assert_eq!(modified.len(), 1);
        assert_eq!(modified[0].text, "hello");
        assert!(pending(&store, 2, HistoryState::Regular).await.is_empty());
    }

    #[tokio::test]
    async fn modify_requires_matching_direction() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.append_history(message(5, 1, 2, "hi")).await.unwrap();

        let changed = store
            .set_history_state(
                HistoryMatch::Source {
                    source_ref: SourceRef::from(5),
                    sender_id: ContactId::new(2),
                    recipient_id: ContactId::new(1),
                },
                HistoryTransition::Modify { text: "x".into() },
            )
            .await
            .unwrap();
        assert_eq!(changed, 0);
    }

    #[tokio::test]
    async fn removed_is_terminal() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store.append_history(message(5, 1, 2, "hi")).await.unwrap();

        let removed = store
            .set_history_state(HistoryMatch::Id(id), HistoryTransition::Remove)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        deliver_all(&store, 2).await;

        let again = store
            .set_history_state(HistoryMatch::Id(id), HistoryTransition::Remove)
            .await
            .unwrap();
        let edit = store
            .set_history_state(
                HistoryMatch::Id(id),
                HistoryTransition::Modify { text: "late".into() },
            )
            .await
            .unwrap();
        assert_eq!(again, 0);
        assert_eq!(edit, 0);

        for state in HistoryState::ALL {
            assert!(pending(&store, 2, state).await.is_empty());
        }
    }

    #[tokio::test]
    async fn complete_history_covers_both_directions_without_removed() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.append_history(message(1, 1, 2, "to two")).await.unwrap();
        store.append_history(message(2, 2, 1, "to one")).await.unwrap();
        let gone = store.append_history(message(3, 1, 2, "oops")).await.unwrap();
        store.append_history(message(4, 3, 4, "elsewhere")).await.unwrap();
        store
            .set_history_state(HistoryMatch::Id(gone), HistoryTransition::Remove)
            .await
            .unwrap();

        let history = store
            .query_history(HistoryFilter::complete(ContactId::new(1)))
            .await
            .unwrap();
        let texts: Vec<_> = history.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["to two", "to one"]);
    }

    #[tokio::test]
    async fn delete_history_for_both_directions() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.append_history(message(1, 1, 2, "a")).await.unwrap();
        store.append_history(message(2, 2, 1, "b")).await.unwrap();
        store.append_history(message(3, 2, 3, "c")).await.unwrap();

        let deleted = store.delete_history_for(ContactId::new(1)).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(pending(&store, 3, HistoryState::Regular).await.len(), 1);
    }

    #[tokio::test]
    async fn textual_source_refs_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .append_history(NewHistory {
                source_ref: SourceRef::from("local-1"),
                sender_id: ContactId::new(1),
                recipient_id: ContactId::new(2),
                text: "hi".into(),
            })
            .await
            .unwrap();

        let records = pending(&store, 2, HistoryState::Regular).await;
        assert_eq!(records[0].hid, SourceRef::from("local-1"));
    }

    #[tokio::test]
    async fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("maty.db");

        let store = SqliteStore::new(&path, 2).await.unwrap();
        store.create_contact(new_contact("ann")).await.unwrap();
        store.close().await;

        let reopened = SqliteStore::new(&path, 2).await.unwrap();
        assert!(reopened.contact_exists("ann").await.unwrap());
    }

    #[tokio::test]
    async fn opening_old_schema_adds_revision_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.db");
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.unwrap();
        sqlx::query(
            r#"
            CREATE TABLE history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_ref TEXT NOT NULL,
                sender_id INTEGER NOT NULL,
                recipient_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                state INTEGER NOT NULL DEFAULT 0,
                ts INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO history (source_ref, sender_id, recipient_id, text, ts) VALUES ('1', 1, 2, 'old', 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;

        let store = SqliteStore::new(&path, 1).await.unwrap();
        let rows = pending(&store, 2, HistoryState::Regular).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rev, 0);
        assert_eq!(deliver_all(&store, 2).await, 1);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("ann"), "%ann%");
        assert_eq!(like_pattern("a_%\\"), "%a\\_\\%\\\\%");
    }
}
