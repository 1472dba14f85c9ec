//! Cached record repository implementation

use crate::error::{Error, Result};
use crate::models::{Collection, SyncRecord, SyncStatus};
use libsql::Connection;
use serde_json::Value;

const RECORD_COLUMNS: &str =
    "local_id, remote_id, sync_status, last_modified_locally, remote_updated_at, payload";

/// Trait for cached record storage operations (async)
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    /// Get a record by local id
    async fn get(&self, collection: Collection, local_id: &str) -> Result<Option<SyncRecord>>;

    /// Get a record by its server-assigned id
    async fn get_by_remote_id(
        &self,
        collection: Collection,
        remote_id: &str,
    ) -> Result<Option<SyncRecord>>;

    /// List every cached record, most recently modified first
    async fn list(&self, collection: Collection) -> Result<Vec<SyncRecord>>;

    /// List records in the given state, oldest edit first
    async fn list_by_status(
        &self,
        collection: Collection,
        status: SyncStatus,
    ) -> Result<Vec<SyncRecord>>;

    /// Insert a new record
    async fn insert(&self, collection: Collection, record: &SyncRecord) -> Result<()>;

    /// Replace a record's payload with a local edit.
    ///
    /// Compare-and-set on `last_modified_locally`: fails with
    /// [`Error::StaleWrite`] if the row changed since `expected_modified` was
    /// read. Bumps the modification time and marks the record pending unless
    /// it is in conflict.
    async fn update_local(
        &self,
        collection: Collection,
        local_id: &str,
        payload: &Value,
        expected_modified: i64,
    ) -> Result<SyncRecord>;

    /// Overwrite a record with a server-authoritative version (compare-and-set).
    async fn apply_remote(
        &self,
        collection: Collection,
        local_id: &str,
        remote_id: &str,
        remote_updated_at: i64,
        payload: &Value,
        expected_modified: i64,
    ) -> Result<SyncRecord>;

    /// Record a successful push.
    ///
    /// Always adopts the remote id. The record only becomes `synced` if it
    /// is still pending at the version that was pushed; a newer local edit
    /// keeps it pending.
    async fn mark_pushed(
        &self,
        collection: Collection,
        local_id: &str,
        remote_id: &str,
        remote_updated_at: Option<i64>,
        pushed_modified: i64,
    ) -> Result<bool>;

    /// Set a record's sync state without touching its payload
    async fn set_status(
        &self,
        collection: Collection,
        local_id: &str,
        status: SyncStatus,
    ) -> Result<()>;

    /// Delete a record. Returns whether a row was removed.
    async fn delete(&self, collection: Collection, local_id: &str) -> Result<bool>;
}

/// libSQL implementation of `RecordRepository`
pub struct LibSqlRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(row: &libsql::Row) -> Result<SyncRecord> {
        let status: String = row.get(2)?;
        let payload: String = row.get(5)?;
        Ok(SyncRecord {
            local_id: row.get(0)?,
            remote_id: row.get(1)?,
            sync_status: status.parse().map_err(Error::Database)?,
            last_modified_locally: row.get(3)?,
            remote_updated_at: row.get(4)?,
            payload: serde_json::from_str(&payload)?,
        })
    }

    async fn query_records(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<SyncRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }

    /// Turn a zero-row compare-and-set into the right error
    async fn cas_miss(&self, collection: Collection, local_id: &str) -> Error {
        match self.get(collection, local_id).await {
            Ok(Some(_)) => Error::StaleWrite(local_id.to_string()),
            Ok(None) => Error::NotFound(format!("{} {local_id}", collection.entity_type())),
            Err(error) => error,
        }
    }

    async fn reload(&self, collection: Collection, local_id: &str) -> Result<SyncRecord> {
        self.get(collection, local_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} {local_id}", collection.entity_type())))
    }
}

impl RecordRepository for LibSqlRecordRepository<'_> {
    async fn get(&self, collection: Collection, local_id: &str) -> Result<Option<SyncRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE local_id = ?",
            collection.table()
        );
        Ok(self.query_records(&sql, [local_id]).await?.into_iter().next())
    }

    async fn get_by_remote_id(
        &self,
        collection: Collection,
        remote_id: &str,
    ) -> Result<Option<SyncRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE remote_id = ?",
            collection.table()
        );
        Ok(self.query_records(&sql, [remote_id]).await?.into_iter().next())
    }

    async fn list(&self, collection: Collection) -> Result<Vec<SyncRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} ORDER BY last_modified_locally DESC, local_id DESC",
            collection.table()
        );
        self.query_records(&sql, ()).await
    }

    async fn list_by_status(
        &self,
        collection: Collection,
        status: SyncStatus,
    ) -> Result<Vec<SyncRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE sync_status = ?
             ORDER BY last_modified_locally ASC, local_id ASC",
            collection.table()
        );
        self.query_records(&sql, [status.as_str()]).await
    }

    async fn insert(&self, collection: Collection, record: &SyncRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)",
            collection.table()
        );
        self.conn
            .execute(
                &sql,
                libsql::params![
                    record.local_id.clone(),
                    record.remote_id.clone(),
                    record.sync_status.as_str(),
                    record.last_modified_locally,
                    record.remote_updated_at,
                    serde_json::to_string(&record.payload)?,
                ],
            )
            .await?;
        Ok(())
    }

    async fn update_local(
        &self,
        collection: Collection,
        local_id: &str,
        payload: &Value,
        expected_modified: i64,
    ) -> Result<SyncRecord> {
        // Strictly increase so a concurrent reader's CAS always observes the edit
        let modified = crate::util::now_millis().max(expected_modified + 1);
        let sql = format!(
            "UPDATE {} SET payload = ?, last_modified_locally = ?,
                 sync_status = CASE WHEN sync_status = 'conflict' THEN 'conflict' ELSE 'pending' END
             WHERE local_id = ? AND last_modified_locally = ?",
            collection.table()
        );
        let changed = self
            .conn
            .execute(
                &sql,
                libsql::params![
                    serde_json::to_string(payload)?,
                    modified,
                    local_id,
                    expected_modified,
                ],
            )
            .await?;
        if changed == 0 {
            return Err(self.cas_miss(collection, local_id).await);
        }
        self.reload(collection, local_id).await
    }

    async fn apply_remote(
        &self,
        collection: Collection,
        local_id: &str,
        remote_id: &str,
        remote_updated_at: i64,
        payload: &Value,
        expected_modified: i64,
    ) -> Result<SyncRecord> {
        let sql = format!(
            "UPDATE {} SET payload = ?, remote_id = ?, remote_updated_at = ?,
                 last_modified_locally = ?, sync_status = 'synced'
             WHERE local_id = ? AND last_modified_locally = ?",
            collection.table()
        );
        let changed = self
            .conn
            .execute(
                &sql,
                libsql::params![
                    serde_json::to_string(payload)?,
                    remote_id,
                    remote_updated_at,
                    remote_updated_at,
                    local_id,
                    expected_modified,
                ],
            )
            .await?;
        if changed == 0 {
            return Err(self.cas_miss(collection, local_id).await);
        }
        self.reload(collection, local_id).await
    }

    async fn mark_pushed(
        &self,
        collection: Collection,
        local_id: &str,
        remote_id: &str,
        remote_updated_at: Option<i64>,
        pushed_modified: i64,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET remote_id = ?,
                 remote_updated_at = COALESCE(?, remote_updated_at),
                 sync_status = CASE
                     WHEN sync_status = 'pending' AND last_modified_locally = ? THEN 'synced'
                     ELSE sync_status
                 END
             WHERE local_id = ?",
            collection.table()
        );
        let changed = self
            .conn
            .execute(
                &sql,
                libsql::params![remote_id, remote_updated_at, pushed_modified, local_id],
            )
            .await?;
        if changed == 0 {
            return Err(Error::NotFound(format!(
                "{} {local_id}",
                collection.entity_type()
            )));
        }
        let record = self.reload(collection, local_id).await?;
        Ok(record.sync_status == SyncStatus::Synced)
    }

    async fn set_status(
        &self,
        collection: Collection,
        local_id: &str,
        status: SyncStatus,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET sync_status = ? WHERE local_id = ?",
            collection.table()
        );
        let changed = self
            .conn
            .execute(&sql, [status.as_str(), local_id])
            .await?;
        if changed == 0 {
            return Err(Error::NotFound(format!(
                "{} {local_id}",
                collection.entity_type()
            )));
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, local_id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE local_id = ?", collection.table());
        let changed = self.conn.execute(&sql, [local_id]).await?;
        Ok(changed > 0)
    }
}
