//! Entity store: the local mail database of one user.
//!
//! Folders, threads, messages, attachments, contacts, address books and
//! drafts live in one `SQLite` file per user. Every batch write runs in a
//! single transaction and is announced on a broadcast channel once
//! committed, so observers never see half of a batch.

mod contacts;
mod drafts;
mod mail;
pub mod model;

use std::path::{Path, PathBuf};

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::sync::broadcast;
use tracing::{debug, info};

pub use mail::PagePrune;
pub use model::{
    Attachment, AttachmentDisposition, Body, Folder, FolderRole, Message, Recipient, Thread,
    sort_folders, visible_messages,
};

use crate::Result;
use crate::mailbox::UserId;

/// Capacity of the change notification channel.
const EVENT_CAPACITY: usize = 256;

/// Additive schema steps. A step is never edited once released; new
/// columns and tables go into a new step.
const MIGRATIONS: &[(i64, &[&str])] = &[
    (
        1,
        &[
            r"
            CREATE TABLE IF NOT EXISTS folders (
                id TEXT PRIMARY KEY NOT NULL,
                path TEXT NOT NULL,
                name TEXT NOT NULL,
                role TEXT,
                unread_count INTEGER,
                total_count INTEGER,
                is_favorite INTEGER NOT NULL DEFAULT 0,
                is_collapsed INTEGER NOT NULL DEFAULT 0,
                separator TEXT NOT NULL DEFAULT '/'
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS threads (
                folder_id TEXT NOT NULL,
                uid TEXT NOT NULL,
                subject TEXT,
                date TEXT NOT NULL,
                PRIMARY KEY (folder_id, uid)
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS thread_messages (
                folder_id TEXT NOT NULL,
                thread_uid TEXT NOT NULL,
                message_uid TEXT NOT NULL,
                PRIMARY KEY (folder_id, thread_uid, message_uid)
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS messages (
                uid TEXT PRIMARY KEY NOT NULL,
                message_id TEXT,
                subject TEXT,
                date TEXT NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                from_json TEXT NOT NULL DEFAULT '[]',
                to_json TEXT NOT NULL DEFAULT '[]',
                cc_json TEXT NOT NULL DEFAULT '[]',
                bcc_json TEXT NOT NULL DEFAULT '[]',
                reply_to_json TEXT NOT NULL DEFAULT '[]',
                body_value TEXT,
                body_type TEXT,
                folder_id TEXT NOT NULL,
                preview TEXT NOT NULL DEFAULT '',
                seen INTEGER NOT NULL DEFAULT 0,
                flagged INTEGER NOT NULL DEFAULT 0,
                answered INTEGER NOT NULL DEFAULT 0,
                is_draft INTEGER NOT NULL DEFAULT 0,
                is_duplicate INTEGER NOT NULL DEFAULT 0,
                has_attachments INTEGER NOT NULL DEFAULT 0,
                resource TEXT NOT NULL DEFAULT '',
                draft_resource TEXT
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS attachments (
                message_uid TEXT NOT NULL,
                part_id TEXT NOT NULL,
                uuid TEXT,
                mime_type TEXT NOT NULL,
                encoding TEXT,
                size INTEGER NOT NULL DEFAULT 0,
                name TEXT NOT NULL,
                disposition TEXT NOT NULL,
                content_id TEXT,
                resource TEXT,
                drive_url TEXT,
                PRIMARY KEY (message_uid, part_id)
            )
            ",
            r"
            CREATE INDEX IF NOT EXISTS idx_threads_folder_date
            ON threads(folder_id, date DESC)
            ",
            r"
            CREATE INDEX IF NOT EXISTS idx_thread_messages_message
            ON thread_messages(message_uid)
            ",
        ],
    ),
    (
        2,
        &[
            r"
            CREATE TABLE IF NOT EXISTS address_books (
                id INTEGER PRIMARY KEY NOT NULL,
                uuid TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL DEFAULT '',
                is_principal INTEGER NOT NULL DEFAULT 0
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                firstname TEXT NOT NULL DEFAULT '',
                lastname TEXT NOT NULL DEFAULT '',
                emails_json TEXT NOT NULL DEFAULT '[]',
                address_book_id INTEGER
            )
            ",
        ],
    ),
    (
        3,
        &[
            r"
            CREATE TABLE IF NOT EXISTS drafts (
                local_uuid TEXT PRIMARY KEY NOT NULL,
                uuid TEXT,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
            "ALTER TABLE messages ADD COLUMN local_changed_at INTEGER",
        ],
    ),
];

/// Change notifications, sent after the corresponding write commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The folder list or folder counters changed.
    FoldersChanged,
    /// The thread list of a folder changed.
    ThreadsChanged {
        /// Folder id.
        folder_id: String,
    },
    /// Messages were updated, moved or deleted.
    MessagesChanged {
        /// Affected message uids.
        uids: Vec<String>,
    },
    /// Contacts or address books changed.
    ContactsChanged,
    /// Locally stored drafts changed.
    DraftsChanged,
}

/// Local database of one user.
#[derive(Debug, Clone)]
pub struct EntityStore {
    pool: SqlitePool,
    events: broadcast::Sender<StoreEvent>,
}

impl EntityStore {
    /// Location of the store of `user` under `data_dir`.
    #[must_use]
    pub fn path_for(data_dir: &Path, user: UserId) -> PathBuf {
        data_dir.join("contacts").join(format!("{}.db", user.0))
    }

    /// Opens (creating if needed) the store at `path` and brings its schema
    /// up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the database
    /// cannot be opened, or a migration fails.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        info!("Opened entity store at {:?}", path);
        Self::from_pool(pool).await
    }

    /// Creates an in-memory store for testing.
    ///
    /// The single connection is never reaped, since closing it would drop
    /// the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .test_before_acquire(false)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let store = Self { pool, events };
        store.migrate().await?;
        Ok(store)
    }

    /// Applies the schema steps not yet recorded.
    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY NOT NULL,
                applied_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        let current = self.schema_version().await?;
        for (version, statements) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
            let mut tx = self.pool.begin().await?;
            for statement in *statements {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
                .bind(*version)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            debug!("Applied schema version {}", version);
        }
        Ok(())
    }

    /// Highest applied schema version, 0 for a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn schema_version(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(MAX(version), 0) AS version FROM schema_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("version"))
    }

    /// Registers an observer. Dropping the receiver unsubscribes it.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: StoreEvent) {
        // No receivers is not an error.
        let _ = self.events.send(event);
    }

    /// Closes the underlying connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
