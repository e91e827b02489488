//! Local draft storage.

use chrono::Utc;
use sqlx::Row;

use super::{EntityStore, StoreEvent};
use crate::Result;
use crate::draft::Draft;

impl EntityStore {
    /// Stores the current state of a draft.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn save_draft(&self, draft: &Draft) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO drafts (local_uuid, uuid, data, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(local_uuid) DO UPDATE SET
                uuid = excluded.uuid,
                data = excluded.data,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&draft.local_uuid)
        .bind(&draft.uuid)
        .bind(serde_json::to_string(draft)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        self.notify(StoreEvent::DraftsChanged);
        Ok(())
    }

    /// Draft by local uuid.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or the stored draft is corrupt.
    pub async fn draft(&self, local_uuid: &str) -> Result<Option<Draft>> {
        let row = sqlx::query("SELECT data FROM drafts WHERE local_uuid = ?")
            .bind(local_uuid)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(serde_json::from_str(row.get("data"))?)),
            None => Ok(None),
        }
    }

    /// All stored drafts, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or a stored draft is corrupt.
    pub async fn drafts(&self) -> Result<Vec<Draft>> {
        let rows = sqlx::query("SELECT data FROM drafts ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;
        let mut drafts = Vec::with_capacity(rows.len());
        for row in &rows {
            drafts.push(serde_json::from_str(row.get("data"))?);
        }
        Ok(drafts)
    }

    /// Removes a stored draft.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_draft(&self, local_uuid: &str) -> Result<()> {
        sqlx::query("DELETE FROM drafts WHERE local_uuid = ?")
            .bind(local_uuid)
            .execute(&self.pool)
            .await?;
        self.notify(StoreEvent::DraftsChanged);
        Ok(())
    }
}
