//! Folder, thread and message storage.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::debug;

use super::model::{
    Attachment, AttachmentDisposition, Body, Folder, FolderRole, Message, Thread, sort_folders,
};
use super::{EntityStore, StoreEvent};
use crate::Result;

/// Which stored threads of a folder a fetched page supersedes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePrune {
    /// Upsert only. Used for every page after the first.
    None,
    /// First page of a longer listing: stored threads strictly more recent
    /// than the oldest thread of the page, but absent from it, are removed.
    /// Threads dated the same as that oldest one may sit on the next page.
    Window,
    /// Complete listing: every stored thread absent from the page is removed.
    All,
}

const MESSAGE_COLUMNS: &str = "m.uid, m.message_id, m.subject, m.date, m.size, m.from_json, \
     m.to_json, m.cc_json, m.bcc_json, m.reply_to_json, m.body_value, m.body_type, m.folder_id, \
     m.preview, m.seen, m.flagged, m.answered, m.is_draft, m.is_duplicate, m.has_attachments, \
     m.resource, m.draft_resource";

/// Sortable text form used for every stored date.
fn timestamp(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|date| date.with_timezone(&Utc))
        .unwrap_or_default()
}

fn size_to_db(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

fn size_from_db(size: i64) -> u64 {
    u64::try_from(size).unwrap_or_default()
}

fn count_from_db(count: Option<i64>) -> Option<u32> {
    count.and_then(|c| u32::try_from(c).ok())
}

fn row_to_folder(row: &SqliteRow) -> Folder {
    Folder {
        id: row.get("id"),
        path: row.get("path"),
        name: row.get("name"),
        role: row
            .get::<Option<String>, _>("role")
            .as_deref()
            .and_then(FolderRole::parse),
        unread_count: count_from_db(row.get("unread_count")),
        total_count: count_from_db(row.get("total_count")),
        is_favorite: row.get("is_favorite"),
        is_collapsed: row.get("is_collapsed"),
        separator: row.get("separator"),
    }
}

fn row_to_message(row: &SqliteRow) -> Result<Message> {
    let body_value: Option<String> = row.get("body_value");
    let body_type: Option<String> = row.get("body_type");
    Ok(Message {
        uid: row.get("uid"),
        message_id: row.get("message_id"),
        subject: row.get("subject"),
        date: parse_timestamp(row.get("date")),
        size: size_from_db(row.get("size")),
        from: serde_json::from_str(row.get("from_json"))?,
        to: serde_json::from_str(row.get("to_json"))?,
        cc: serde_json::from_str(row.get("cc_json"))?,
        bcc: serde_json::from_str(row.get("bcc_json"))?,
        reply_to: serde_json::from_str(row.get("reply_to_json"))?,
        body: body_value.map(|value| Body {
            value,
            body_type: body_type.unwrap_or_else(|| "text/html".to_string()),
        }),
        attachments: Vec::new(),
        folder_id: row.get("folder_id"),
        preview: row.get("preview"),
        seen: row.get("seen"),
        flagged: row.get("flagged"),
        answered: row.get("answered"),
        is_draft: row.get("is_draft"),
        is_duplicate: row.get("is_duplicate"),
        has_attachments: row.get("has_attachments"),
        resource: row.get("resource"),
        draft_resource: row.get("draft_resource"),
    })
}

fn row_to_attachment(row: &SqliteRow) -> Attachment {
    Attachment {
        uuid: row.get("uuid"),
        part_id: row.get("part_id"),
        mime_type: row.get("mime_type"),
        encoding: row.get("encoding"),
        size: size_from_db(row.get("size")),
        name: row.get("name"),
        disposition: AttachmentDisposition::parse(row.get("disposition")),
        content_id: row.get("content_id"),
        resource: row.get("resource"),
        drive_url: row.get("drive_url"),
    }
}

/// Upserts a message, keeping local flags stamped after `response_at`.
///
/// `fallback_folder` is used when the payload carries no folder id.
async fn upsert_message(
    tx: &mut Transaction<'_, Sqlite>,
    message: &Message,
    fallback_folder: &str,
    response_at: Option<i64>,
) -> Result<()> {
    let folder_id = if message.folder_id.is_empty() {
        fallback_folder
    } else {
        &message.folder_id
    };

    sqlx::query(
        r"
        INSERT INTO messages
            (uid, message_id, subject, date, size, from_json, to_json, cc_json, bcc_json,
             reply_to_json, body_value, body_type, folder_id, preview, seen, flagged, answered,
             is_draft, is_duplicate, has_attachments, resource, draft_resource)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21, ?22)
        ON CONFLICT(uid) DO UPDATE SET
            message_id = excluded.message_id,
            subject = excluded.subject,
            date = excluded.date,
            size = excluded.size,
            from_json = excluded.from_json,
            to_json = excluded.to_json,
            cc_json = excluded.cc_json,
            bcc_json = excluded.bcc_json,
            reply_to_json = excluded.reply_to_json,
            body_value = COALESCE(excluded.body_value, messages.body_value),
            body_type = COALESCE(excluded.body_type, messages.body_type),
            folder_id = CASE WHEN excluded.folder_id = '' THEN messages.folder_id
                             ELSE excluded.folder_id END,
            preview = excluded.preview,
            answered = excluded.answered,
            is_draft = excluded.is_draft,
            is_duplicate = excluded.is_duplicate,
            has_attachments = excluded.has_attachments,
            resource = excluded.resource,
            draft_resource = excluded.draft_resource,
            seen = CASE WHEN messages.local_changed_at IS NULL
                             OR ?23 > messages.local_changed_at
                        THEN excluded.seen ELSE messages.seen END,
            flagged = CASE WHEN messages.local_changed_at IS NULL
                                OR ?23 > messages.local_changed_at
                           THEN excluded.flagged ELSE messages.flagged END,
            local_changed_at = CASE WHEN messages.local_changed_at IS NULL
                                         OR ?23 > messages.local_changed_at
                                    THEN NULL ELSE messages.local_changed_at END
        ",
    )
    .bind(&message.uid)
    .bind(&message.message_id)
    .bind(&message.subject)
    .bind(timestamp(&message.date))
    .bind(size_to_db(message.size))
    .bind(serde_json::to_string(&message.from)?)
    .bind(serde_json::to_string(&message.to)?)
    .bind(serde_json::to_string(&message.cc)?)
    .bind(serde_json::to_string(&message.bcc)?)
    .bind(serde_json::to_string(&message.reply_to)?)
    .bind(message.body.as_ref().map(|b| b.value.as_str()))
    .bind(message.body.as_ref().map(|b| b.body_type.as_str()))
    .bind(folder_id)
    .bind(&message.preview)
    .bind(message.seen)
    .bind(message.flagged)
    .bind(message.answered)
    .bind(message.is_draft)
    .bind(message.is_duplicate)
    .bind(message.has_attachments || !message.attachments.is_empty())
    .bind(&message.resource)
    .bind(&message.draft_resource)
    .bind(response_at)
    .execute(&mut **tx)
    .await?;

    if !message.attachments.is_empty() {
        sqlx::query("DELETE FROM attachments WHERE message_uid = ?")
            .bind(&message.uid)
            .execute(&mut **tx)
            .await?;
        for attachment in &message.attachments {
            sqlx::query(
                r"
                INSERT OR REPLACE INTO attachments
                    (message_uid, part_id, uuid, mime_type, encoding, size, name, disposition,
                     content_id, resource, drive_url)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(&message.uid)
            .bind(&attachment.part_id)
            .bind(&attachment.uuid)
            .bind(&attachment.mime_type)
            .bind(&attachment.encoding)
            .bind(size_to_db(attachment.size))
            .bind(&attachment.name)
            .bind(attachment.disposition.as_str())
            .bind(&attachment.content_id)
            .bind(&attachment.resource)
            .bind(&attachment.drive_url)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

async fn adjust_unread(
    tx: &mut Transaction<'_, Sqlite>,
    folder_id: &str,
    delta: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE folders SET unread_count = MAX(0, COALESCE(unread_count, 0) + ?) WHERE id = ?",
    )
    .bind(delta)
    .bind(folder_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Threads linking any of the messages in `ids` (a JSON array of uids).
async fn threads_containing(
    tx: &mut Transaction<'_, Sqlite>,
    ids: &str,
) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query(
        r"
        SELECT DISTINCT folder_id, thread_uid FROM thread_messages
        WHERE message_uid IN (SELECT value FROM json_each(?))
        ",
    )
    .bind(ids)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows
        .iter()
        .map(|row| (row.get("folder_id"), row.get("thread_uid")))
        .collect())
}

/// Removes the `candidates` threads that no longer hold a message of their
/// own folder. Returns the folders whose thread list changed.
async fn prune_non_resident(
    tx: &mut Transaction<'_, Sqlite>,
    candidates: &[(String, String)],
) -> Result<HashSet<String>> {
    let mut touched = HashSet::new();
    for (folder_id, thread_uid) in candidates {
        let resident: i64 = sqlx::query(
            r"
            SELECT COUNT(*) AS resident FROM thread_messages tm
            JOIN messages m ON m.uid = tm.message_uid
            WHERE tm.folder_id = ?1 AND tm.thread_uid = ?2 AND m.folder_id = ?1
            ",
        )
        .bind(folder_id)
        .bind(thread_uid)
        .fetch_one(&mut **tx)
        .await?
        .get("resident");

        if resident == 0 {
            sqlx::query("DELETE FROM thread_messages WHERE folder_id = ? AND thread_uid = ?")
                .bind(folder_id)
                .bind(thread_uid)
                .execute(&mut **tx)
                .await?;
            sqlx::query("DELETE FROM threads WHERE folder_id = ? AND uid = ?")
                .bind(folder_id)
                .bind(thread_uid)
                .execute(&mut **tx)
                .await?;
            debug!("Thread {} is no longer resident in {}", thread_uid, folder_id);
        }
        touched.insert(folder_id.clone());
    }
    Ok(touched)
}

impl EntityStore {
    /// Replaces the folder list with `folders` in one transaction.
    ///
    /// Folders are upserted by id; the local collapsed state is kept.
    /// Folders absent from `folders` are removed with their threads and
    /// messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn replace_folders(&self, folders: &[Folder]) -> Result<()> {
        let ids = serde_json::to_string(&folders.iter().map(|f| &f.id).collect::<Vec<_>>())?;
        let mut tx = self.pool.begin().await?;

        for folder in folders {
            sqlx::query(
                r"
                INSERT INTO folders
                    (id, path, name, role, unread_count, total_count, is_favorite, separator)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    path = excluded.path,
                    name = excluded.name,
                    role = excluded.role,
                    unread_count = excluded.unread_count,
                    total_count = excluded.total_count,
                    is_favorite = excluded.is_favorite,
                    separator = excluded.separator
                ",
            )
            .bind(&folder.id)
            .bind(&folder.path)
            .bind(&folder.name)
            .bind(folder.role.map(FolderRole::as_str))
            .bind(folder.unread_count)
            .bind(folder.total_count)
            .bind(folder.is_favorite)
            .bind(&folder.separator)
            .execute(&mut *tx)
            .await?;
        }

        for statement in [
            r"DELETE FROM attachments WHERE message_uid IN (
                SELECT uid FROM messages WHERE folder_id NOT IN (SELECT value FROM json_each(?)))",
            "DELETE FROM messages WHERE folder_id NOT IN (SELECT value FROM json_each(?))",
            "DELETE FROM thread_messages WHERE folder_id NOT IN (SELECT value FROM json_each(?))",
            "DELETE FROM threads WHERE folder_id NOT IN (SELECT value FROM json_each(?))",
            "DELETE FROM folders WHERE id NOT IN (SELECT value FROM json_each(?))",
        ] {
            sqlx::query(statement).bind(&ids).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        self.notify(StoreEvent::FoldersChanged);
        Ok(())
    }

    /// All folders, in display order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn folders(&self) -> Result<Vec<Folder>> {
        let rows = sqlx::query("SELECT * FROM folders")
            .fetch_all(&self.pool)
            .await?;
        let mut folders: Vec<Folder> = rows.iter().map(row_to_folder).collect();
        sort_folders(&mut folders);
        Ok(folders)
    }

    /// Folder by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn folder(&self, id: &str) -> Result<Option<Folder>> {
        let row = sqlx::query("SELECT * FROM folders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_folder))
    }

    /// The folder holding `role`, if synced.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn folder_by_role(&self, role: FolderRole) -> Result<Option<Folder>> {
        let row = sqlx::query("SELECT * FROM folders WHERE role = ? LIMIT 1")
            .bind(role.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_folder))
    }

    /// Sets the local collapsed state of a folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn set_folder_collapsed(&self, id: &str, collapsed: bool) -> Result<()> {
        sqlx::query("UPDATE folders SET is_collapsed = ? WHERE id = ?")
            .bind(collapsed)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.notify(StoreEvent::FoldersChanged);
        Ok(())
    }

    /// Applies one fetched page of threads to `folder_id` in one transaction.
    ///
    /// Messages are upserted by uid. A message whose seen or flagged state
    /// was changed locally keeps it unless `response_at` is strictly newer
    /// than the local change. Bodies already fetched are kept when the page
    /// carries none. Messages no longer linked to any thread are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn apply_thread_page(
        &self,
        folder_id: &str,
        threads: &[Thread],
        prune: PagePrune,
        response_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let response_at = response_at.map(|at| at.timestamp_millis());
        let page_uids =
            serde_json::to_string(&threads.iter().map(|t| &t.uid).collect::<Vec<_>>())?;
        let mut tx = self.pool.begin().await?;

        for thread in threads {
            sqlx::query(
                r"
                INSERT INTO threads (folder_id, uid, subject, date) VALUES (?, ?, ?, ?)
                ON CONFLICT(folder_id, uid) DO UPDATE SET
                    subject = excluded.subject,
                    date = excluded.date
                ",
            )
            .bind(folder_id)
            .bind(&thread.uid)
            .bind(&thread.subject)
            .bind(timestamp(&thread.date))
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM thread_messages WHERE folder_id = ? AND thread_uid = ?")
                .bind(folder_id)
                .bind(&thread.uid)
                .execute(&mut *tx)
                .await?;

            for message in &thread.messages {
                upsert_message(&mut tx, message, folder_id, response_at).await?;
                sqlx::query(
                    "INSERT OR IGNORE INTO thread_messages (folder_id, thread_uid, message_uid) VALUES (?, ?, ?)",
                )
                .bind(folder_id)
                .bind(&thread.uid)
                .bind(&message.uid)
                .execute(&mut *tx)
                .await?;
            }
        }

        let oldest = threads.iter().map(|t| t.date).min();
        let pruned = match (prune, oldest) {
            (PagePrune::None, _) | (PagePrune::Window, None) => 0,
            (PagePrune::Window, Some(oldest)) => sqlx::query(
                r"
                DELETE FROM threads WHERE folder_id = ? AND date > ?
                AND uid NOT IN (SELECT value FROM json_each(?))
                ",
            )
            .bind(folder_id)
            .bind(timestamp(&oldest))
            .bind(&page_uids)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            (PagePrune::All, _) => sqlx::query(
                "DELETE FROM threads WHERE folder_id = ? AND uid NOT IN (SELECT value FROM json_each(?))",
            )
            .bind(folder_id)
            .bind(&page_uids)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
        };

        if pruned > 0 {
            sqlx::query(
                r"
                DELETE FROM thread_messages WHERE folder_id = ?1
                AND thread_uid NOT IN (SELECT uid FROM threads WHERE folder_id = ?1)
                ",
            )
            .bind(folder_id)
            .execute(&mut *tx)
            .await?;
            debug!("Pruned {} threads from {}", pruned, folder_id);
        }

        sqlx::query(
            "DELETE FROM attachments WHERE message_uid NOT IN (SELECT message_uid FROM thread_messages)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM messages WHERE uid NOT IN (SELECT message_uid FROM thread_messages)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.notify(StoreEvent::ThreadsChanged {
            folder_id: folder_id.to_string(),
        });
        Ok(())
    }

    /// Threads of a folder, most recent first, with their messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn threads(&self, folder_id: &str) -> Result<Vec<Thread>> {
        self.load_threads(folder_id, None).await
    }

    /// One thread of a folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn thread(&self, folder_id: &str, uid: &str) -> Result<Option<Thread>> {
        Ok(self
            .load_threads(folder_id, Some(uid))
            .await?
            .into_iter()
            .next())
    }

    /// Number of threads stored for a folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn thread_count(&self, folder_id: &str) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM threads WHERE folder_id = ?")
            .bind(folder_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(row.get::<i64, _>("count")).unwrap_or_default())
    }

    async fn load_threads(&self, folder_id: &str, uid: Option<&str>) -> Result<Vec<Thread>> {
        let rows = sqlx::query(
            r"
            SELECT t.uid, t.subject, t.date,
                   COALESCE(SUM(CASE WHEN m.seen = 0 THEN 1 ELSE 0 END), 0) AS unseen,
                   COALESCE(MAX(m.flagged), 0) AS flagged,
                   COALESCE(MAX(m.has_attachments), 0) AS has_attachments
            FROM threads t
            LEFT JOIN thread_messages tm ON tm.folder_id = t.folder_id AND tm.thread_uid = t.uid
            LEFT JOIN messages m ON m.uid = tm.message_uid
            WHERE t.folder_id = ?1 AND (?2 IS NULL OR t.uid = ?2)
            GROUP BY t.uid
            ORDER BY t.date DESC, t.uid
            ",
        )
        .bind(folder_id)
        .bind(uid)
        .fetch_all(&self.pool)
        .await?;

        let message_rows = sqlx::query(&format!(
            r"
            SELECT tm.thread_uid, {MESSAGE_COLUMNS}
            FROM thread_messages tm JOIN messages m ON m.uid = tm.message_uid
            WHERE tm.folder_id = ?1 AND (?2 IS NULL OR tm.thread_uid = ?2)
            ORDER BY m.date, m.uid
            "
        ))
        .bind(folder_id)
        .bind(uid)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(message_rows.len());
        for row in &message_rows {
            messages.push((row.get::<String, _>("thread_uid"), row_to_message(row)?));
        }
        self.attach(messages.iter_mut().map(|(_, m)| m)).await?;

        let mut by_thread: HashMap<String, Vec<Message>> = HashMap::new();
        for (thread_uid, message) in messages {
            by_thread.entry(thread_uid).or_default().push(message);
        }

        Ok(rows
            .iter()
            .map(|row| {
                let uid: String = row.get("uid");
                Thread {
                    messages: by_thread.remove(&uid).unwrap_or_default(),
                    folder_id: folder_id.to_string(),
                    subject: row.get("subject"),
                    date: parse_timestamp(row.get("date")),
                    unseen_messages: u32::try_from(row.get::<i64, _>("unseen"))
                        .unwrap_or_default(),
                    flagged: row.get::<i64, _>("flagged") != 0,
                    has_attachments: row.get::<i64, _>("has_attachments") != 0,
                    uid,
                }
            })
            .collect())
    }

    /// Fills in the attachments of `messages`.
    async fn attach<'a>(&self, messages: impl Iterator<Item = &'a mut Message>) -> Result<()> {
        let mut messages: Vec<&mut Message> = messages.collect();
        if messages.is_empty() {
            return Ok(());
        }
        let uids = serde_json::to_string(&messages.iter().map(|m| &m.uid).collect::<Vec<_>>())?;
        let rows = sqlx::query(
            r"
            SELECT * FROM attachments
            WHERE message_uid IN (SELECT value FROM json_each(?))
            ORDER BY message_uid, part_id
            ",
        )
        .bind(&uids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_message: HashMap<String, Vec<Attachment>> = HashMap::new();
        for row in &rows {
            by_message
                .entry(row.get("message_uid"))
                .or_default()
                .push(row_to_attachment(row));
        }
        for message in &mut messages {
            if let Some(attachments) = by_message.get(&message.uid) {
                message.attachments.clone_from(attachments);
            }
        }
        Ok(())
    }

    /// Message by uid, with attachments.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn message(&self, uid: &str) -> Result<Option<Message>> {
        Ok(self.messages(&[uid.to_string()]).await?.into_iter().next())
    }

    /// Messages by uid, in date order. Unknown uids are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn messages(&self, uids: &[String]) -> Result<Vec<Message>> {
        let ids = serde_json::to_string(uids)?;
        let rows = sqlx::query(&format!(
            r"
            SELECT {MESSAGE_COLUMNS} FROM messages m
            WHERE m.uid IN (SELECT value FROM json_each(?))
            ORDER BY m.date, m.uid
            "
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .iter()
            .map(row_to_message)
            .collect::<Result<Vec<_>>>()?;
        self.attach(messages.iter_mut()).await?;
        Ok(messages)
    }

    /// Stores a fully fetched message, keeping local flag changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update_message(&self, message: &Message) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_message(&mut tx, message, "", None).await?;
        tx.commit().await?;
        self.notify(StoreEvent::MessagesChanged {
            uids: vec![message.uid.clone()],
        });
        Ok(())
    }

    /// Sets the seen flag, stamping the local change and keeping folder
    /// unread counters in step. Returns the uids whose state changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn set_seen(&self, uids: &[String], seen: bool) -> Result<Vec<String>> {
        let ids = serde_json::to_string(uids)?;
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r"
            SELECT uid, folder_id FROM messages
            WHERE uid IN (SELECT value FROM json_each(?)) AND seen != ?
            ",
        )
        .bind(&ids)
        .bind(seen)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            r"
            UPDATE messages SET seen = ?, local_changed_at = ?
            WHERE uid IN (SELECT value FROM json_each(?))
            ",
        )
        .bind(seen)
        .bind(Utc::now().timestamp_millis())
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

        let delta = if seen { -1 } else { 1 };
        let mut per_folder: HashMap<String, i64> = HashMap::new();
        let mut changed = Vec::with_capacity(rows.len());
        for row in &rows {
            *per_folder.entry(row.get("folder_id")).or_default() += delta;
            changed.push(row.get::<String, _>("uid"));
        }
        for (folder_id, delta) in &per_folder {
            adjust_unread(&mut tx, folder_id, *delta).await?;
        }

        tx.commit().await?;
        if !per_folder.is_empty() {
            self.notify(StoreEvent::FoldersChanged);
        }
        self.notify(StoreEvent::MessagesChanged {
            uids: uids.to_vec(),
        });
        Ok(changed)
    }

    /// Sets the flagged (starred) state, stamping the local change.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn set_flagged(&self, uids: &[String], flagged: bool) -> Result<()> {
        let ids = serde_json::to_string(uids)?;
        sqlx::query(
            r"
            UPDATE messages SET flagged = ?, local_changed_at = ?
            WHERE uid IN (SELECT value FROM json_each(?))
            ",
        )
        .bind(flagged)
        .bind(Utc::now().timestamp_millis())
        .bind(&ids)
        .execute(&self.pool)
        .await?;
        self.notify(StoreEvent::MessagesChanged {
            uids: uids.to_vec(),
        });
        Ok(())
    }

    /// Moves messages to `destination_id`, adjusting unread counters and
    /// removing threads left without a message in their own folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn move_messages(&self, uids: &[String], destination_id: &str) -> Result<()> {
        let ids = serde_json::to_string(uids)?;
        let mut tx = self.pool.begin().await?;

        let unseen = sqlx::query(
            r"
            SELECT folder_id FROM messages
            WHERE uid IN (SELECT value FROM json_each(?)) AND folder_id != ? AND seen = 0
            ",
        )
        .bind(&ids)
        .bind(destination_id)
        .fetch_all(&mut *tx)
        .await?;
        for row in &unseen {
            adjust_unread(&mut tx, row.get("folder_id"), -1).await?;
            adjust_unread(&mut tx, destination_id, 1).await?;
        }

        let candidates = threads_containing(&mut tx, &ids).await?;
        sqlx::query(
            "UPDATE messages SET folder_id = ? WHERE uid IN (SELECT value FROM json_each(?))",
        )
        .bind(destination_id)
        .bind(&ids)
        .execute(&mut *tx)
        .await?;
        let touched = prune_non_resident(&mut tx, &candidates).await?;

        tx.commit().await?;
        self.notify_mutation(uids, touched);
        Ok(())
    }

    /// Deletes messages locally, adjusting unread counters and removing
    /// threads left without a message in their own folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_messages(&self, uids: &[String]) -> Result<()> {
        let ids = serde_json::to_string(uids)?;
        let mut tx = self.pool.begin().await?;

        let unseen = sqlx::query(
            "SELECT folder_id FROM messages WHERE uid IN (SELECT value FROM json_each(?)) AND seen = 0",
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;
        for row in &unseen {
            adjust_unread(&mut tx, row.get("folder_id"), -1).await?;
        }

        let candidates = threads_containing(&mut tx, &ids).await?;
        for statement in [
            "DELETE FROM attachments WHERE message_uid IN (SELECT value FROM json_each(?))",
            "DELETE FROM thread_messages WHERE message_uid IN (SELECT value FROM json_each(?))",
            "DELETE FROM messages WHERE uid IN (SELECT value FROM json_each(?))",
        ] {
            sqlx::query(statement).bind(&ids).execute(&mut *tx).await?;
        }
        let touched = prune_non_resident(&mut tx, &candidates).await?;

        tx.commit().await?;
        self.notify_mutation(uids, touched);
        Ok(())
    }

    fn notify_mutation(&self, uids: &[String], folders: HashSet<String>) {
        self.notify(StoreEvent::FoldersChanged);
        for folder_id in folders {
            self.notify(StoreEvent::ThreadsChanged { folder_id });
        }
        self.notify(StoreEvent::MessagesChanged {
            uids: uids.to_vec(),
        });
    }
}
