//! Persisted conflict set

use crate::error::{Error, Result};
use crate::models::{Collection, SyncConflict};
use libsql::Connection;

/// Trait for conflict storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ConflictRepository {
    /// Insert or replace the conflict for a record
    async fn save(&self, conflict: &SyncConflict) -> Result<()>;

    /// Every unresolved conflict, oldest first
    async fn list(&self) -> Result<Vec<SyncConflict>>;

    /// Remove a resolved conflict
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Remove the conflict on one record, if any
    async fn delete_for_record(&self, collection: Collection, record_id: &str) -> Result<bool>;
}

/// libSQL implementation of `ConflictRepository`
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &libsql::Row) -> Result<SyncConflict> {
        let entity_type: String = row.get(2)?;
        let local_data: String = row.get(3)?;
        let remote_data: String = row.get(4)?;
        let reason: String = row.get(7)?;
        Ok(SyncConflict {
            id: row.get(0)?,
            record_id: row.get(1)?,
            entity_type: entity_type.parse().map_err(Error::Database)?,
            local_data: serde_json::from_str(&local_data)?,
            remote_data: serde_json::from_str(&remote_data)?,
            remote_id: row.get(5)?,
            remote_updated_at: row.get(6)?,
            reason: reason.parse().map_err(Error::Database)?,
            detected_at: row.get(8)?,
        })
    }
}

impl ConflictRepository for LibSqlConflictRepository<'_> {
    async fn save(&self, conflict: &SyncConflict) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_conflicts
                    (id, record_id, entity_type, local_data, remote_data, remote_id, remote_updated_at, reason, detected_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    conflict.id.clone(),
                    conflict.record_id.clone(),
                    conflict.entity_type.as_str(),
                    serde_json::to_string(&conflict.local_data)?,
                    serde_json::to_string(&conflict.remote_data)?,
                    conflict.remote_id.clone(),
                    conflict.remote_updated_at,
                    conflict.reason.as_str(),
                    conflict.detected_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SyncConflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, record_id, entity_type, local_data, remote_data, remote_id, remote_updated_at, reason, detected_at
                 FROM sync_conflicts ORDER BY detected_at ASC, id ASC",
                (),
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM sync_conflicts WHERE id = ?", [id])
            .await?;
        Ok(removed > 0)
    }

    async fn delete_for_record(&self, collection: Collection, record_id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM sync_conflicts WHERE entity_type = ? AND record_id = ?",
                [collection.as_str(), record_id],
            )
            .await?;
        Ok(removed > 0)
    }
}
