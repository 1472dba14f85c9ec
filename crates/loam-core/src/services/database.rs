//! Shared database service: the local cache accessor and mutation queue.
//!
//! Every operation takes the single connection lock, so user edits and sync
//! merges on the same record are serialized. Composite writes (a cache edit
//! plus its queued mutation, a conflict flag plus its stored snapshot) run in
//! one transaction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use libsql::Connection;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::db::{
    CheckpointRepository, ConflictRepository, Database, LibSqlCheckpointRepository,
    LibSqlConflictRepository, LibSqlMutationQueue, LibSqlProfileRepository,
    LibSqlRecordRepository, MutationQueue, ProfileRepository, RecordRepository,
};
use crate::models::{
    Collection, ConnectionProfile, MutationOperation, QueuedMutation, SyncCheckpoint,
    SyncConflict, SyncRecord, SyncStatus,
};
use crate::Result;

/// Thread-safe service for DB and repository operations.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    ///
    /// A file that is not a database is moved aside and a fresh store is
    /// created in its place.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local store at {} is unreadable: {}. Moving it aside and starting fresh.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_file(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Filesystem location of the store, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn is_corrupted_db_error(error: &crate::Error) -> bool {
        error
            .to_string()
            .to_ascii_lowercase()
            .contains("file is not a database")
    }

    fn quarantine_corrupted_db_file(db_path: &Path) -> Result<()> {
        if !db_path.exists() {
            return Ok(());
        }
        let timestamp = crate::util::now_millis();
        let base_name = db_path
            .file_name()
            .map_or_else(|| "loam.db".into(), |name| name.to_string_lossy());
        let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

        std::fs::rename(db_path, &backup_path)?;
        tracing::warn!(
            "Moved corrupted local DB file from {} to {}",
            db_path.display(),
            backup_path.display()
        );
        Ok(())
    }

    /// Every cached record in a collection, most recently modified first.
    pub async fn list_cached(&self, collection: Collection) -> Result<Vec<SyncRecord>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .list(collection)
            .await
    }

    /// Fetch a cached record by local id.
    pub async fn get_cached(
        &self,
        collection: Collection,
        local_id: &str,
    ) -> Result<Option<SyncRecord>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .get(collection, local_id)
            .await
    }

    /// Write a local edit and queue it for push.
    ///
    /// Creates the record when `local_id` is absent or unknown; otherwise
    /// replaces its payload and marks it pending. A record in conflict keeps
    /// its conflict status and is not queued until the conflict is resolved.
    pub async fn cache_record(
        &self,
        collection: Collection,
        local_id: Option<&str>,
        payload: Value,
    ) -> Result<SyncRecord> {
        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = Self::write_cached(conn, collection, local_id, payload).await;
        commit_or_rollback(conn, result).await
    }

    async fn write_cached(
        conn: &Connection,
        collection: Collection,
        local_id: Option<&str>,
        payload: Value,
    ) -> Result<SyncRecord> {
        let records = LibSqlRecordRepository::new(conn);
        let queue = LibSqlMutationQueue::new(conn);

        let existing = match local_id {
            Some(id) => records.get(collection, id).await?,
            None => None,
        };

        let Some(existing) = existing else {
            let record = match local_id {
                Some(id) => SyncRecord::new_local_with_id(id, payload),
                None => SyncRecord::new_local(payload),
            };
            records.insert(collection, &record).await?;
            queue
                .enqueue(
                    MutationOperation::Create,
                    collection,
                    &record.local_id,
                    Some(&record.payload),
                )
                .await?;
            return Ok(record);
        };

        let record = records
            .update_local(
                collection,
                &existing.local_id,
                &payload,
                existing.last_modified_locally,
            )
            .await?;
        if record.sync_status == SyncStatus::Conflict {
            tracing::debug!(
                "{} {} is in conflict; edit kept locally without queueing",
                collection.entity_type(),
                record.local_id
            );
        } else {
            queue
                .enqueue(
                    MutationOperation::Update,
                    collection,
                    &record.local_id,
                    Some(&record.payload),
                )
                .await?;
        }
        Ok(record)
    }

    /// Delete a cached record and queue the remote delete.
    ///
    /// A record that was never pushed only drops its queued mutations.
    /// Returns whether a record was deleted.
    pub async fn delete_cached(&self, collection: Collection, local_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = Self::remove_cached(conn, collection, local_id).await;
        commit_or_rollback(conn, result).await
    }

    async fn remove_cached(conn: &Connection, collection: Collection, local_id: &str) -> Result<bool> {
        let records = LibSqlRecordRepository::new(conn);
        let queue = LibSqlMutationQueue::new(conn);

        let Some(record) = records.get(collection, local_id).await? else {
            return Ok(false);
        };

        records.delete(collection, local_id).await?;
        LibSqlConflictRepository::new(conn)
            .delete_for_record(collection, local_id)
            .await?;
        let dropped = queue.remove_for_record(collection, local_id).await?;

        match record.remote_id {
            Some(remote_id) => {
                queue
                    .enqueue(
                        MutationOperation::Delete,
                        collection,
                        local_id,
                        Some(&json!({ "remoteId": remote_id })),
                    )
                    .await?;
            }
            None => {
                tracing::debug!(
                    "{} {local_id} was never pushed; dropped {dropped} queued mutation(s)",
                    collection.entity_type()
                );
            }
        }
        Ok(true)
    }

    /// Look up a cached record by server id.
    pub async fn get_by_remote_id(
        &self,
        collection: Collection,
        remote_id: &str,
    ) -> Result<Option<SyncRecord>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .get_by_remote_id(collection, remote_id)
            .await
    }

    /// Records with unpushed local edits, oldest edit first.
    pub async fn list_pending(&self, collection: Collection) -> Result<Vec<SyncRecord>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .list_by_status(collection, SyncStatus::Pending)
            .await
    }

    /// Insert a record received from the server.
    pub async fn insert_record(&self, collection: Collection, record: &SyncRecord) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .insert(collection, record)
            .await
    }

    /// Overwrite a record with a server version (compare-and-set).
    pub async fn apply_remote(
        &self,
        collection: Collection,
        local_id: &str,
        remote_id: &str,
        remote_updated_at: i64,
        payload: &Value,
        expected_modified: i64,
    ) -> Result<SyncRecord> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .apply_remote(
                collection,
                local_id,
                remote_id,
                remote_updated_at,
                payload,
                expected_modified,
            )
            .await
    }

    /// Adopt a pushed record's server id; returns whether it is now synced.
    pub async fn mark_pushed(
        &self,
        collection: Collection,
        local_id: &str,
        remote_id: &str,
        remote_updated_at: Option<i64>,
        pushed_modified: i64,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .mark_pushed(
                collection,
                local_id,
                remote_id,
                remote_updated_at,
                pushed_modified,
            )
            .await
    }

    /// Remove a record without queueing anything (server-side deletion).
    pub async fn remove_record(&self, collection: Collection, local_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .delete(collection, local_id)
            .await
    }

    /// Append a mutation to the queue.
    pub async fn enqueue(
        &self,
        operation: MutationOperation,
        collection: Collection,
        record_id: &str,
        payload: Option<&Value>,
    ) -> Result<QueuedMutation> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection())
            .enqueue(operation, collection, record_id, payload)
            .await
    }

    /// Every queued mutation in enqueue order.
    pub async fn dequeue_all(&self) -> Result<Vec<QueuedMutation>> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection()).dequeue_all().await
    }

    /// Remove a consumed or dropped mutation.
    pub async fn remove_mutation(&self, id: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection()).remove(id).await
    }

    /// Record a failed attempt for a queued mutation.
    pub async fn record_mutation_failure(&self, id: i64, error: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection())
            .record_failure(id, error)
            .await
    }

    /// Local ids that still have queued mutations.
    pub async fn queued_record_ids(&self, collection: Collection) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection())
            .queued_record_ids(collection)
            .await
    }

    /// Number of queued mutations.
    pub async fn queue_len(&self) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection()).count().await
    }

    /// Load a collection's sync watermark.
    pub async fn get_checkpoint(&self, collection: Collection) -> Result<Option<SyncCheckpoint>> {
        let db = self.db.lock().await;
        LibSqlCheckpointRepository::new(db.connection())
            .get(collection)
            .await
    }

    /// Overwrite a collection's sync watermark.
    pub async fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlCheckpointRepository::new(db.connection())
            .save(checkpoint)
            .await
    }

    /// Every stored watermark.
    pub async fn list_checkpoints(&self) -> Result<Vec<SyncCheckpoint>> {
        let db = self.db.lock().await;
        LibSqlCheckpointRepository::new(db.connection())
            .list()
            .await
    }

    /// Flag a record as conflicting and store the conflict snapshot.
    pub async fn register_conflict(&self, conflict: &SyncConflict) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            let records = LibSqlRecordRepository::new(conn);
            if records
                .get(conflict.entity_type, &conflict.record_id)
                .await?
                .is_some()
            {
                records
                    .set_status(conflict.entity_type, &conflict.record_id, SyncStatus::Conflict)
                    .await?;
            }
            LibSqlConflictRepository::new(conn).save(conflict).await
        }
        .await;
        commit_or_rollback(conn, result).await
    }

    /// Every unresolved conflict, oldest first.
    pub async fn list_conflicts(&self) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection()).list().await
    }

    /// Drop a conflict along with the record's queued mutations.
    ///
    /// With a settlement the record is written back as synced (re-created if
    /// it was deleted locally); without one the local record is removed.
    pub async fn settle_conflict(
        &self,
        conflict: &SyncConflict,
        settled: Option<SettledRecord<'_>>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = Self::write_settlement(conn, conflict, settled).await;
        commit_or_rollback(conn, result).await
    }

    async fn write_settlement(
        conn: &Connection,
        conflict: &SyncConflict,
        settled: Option<SettledRecord<'_>>,
    ) -> Result<()> {
        let records = LibSqlRecordRepository::new(conn);
        let collection = conflict.entity_type;

        match settled {
            Some(settled) => match records.get(collection, &conflict.record_id).await? {
                Some(current) => {
                    records
                        .apply_remote(
                            collection,
                            &conflict.record_id,
                            settled.remote_id,
                            settled.remote_updated_at,
                            settled.payload,
                            current.last_modified_locally,
                        )
                        .await?;
                }
                None => {
                    let record = SyncRecord {
                        local_id: conflict.record_id.clone(),
                        remote_id: Some(settled.remote_id.to_string()),
                        sync_status: SyncStatus::Synced,
                        last_modified_locally: settled.remote_updated_at,
                        remote_updated_at: Some(settled.remote_updated_at),
                        payload: settled.payload.clone(),
                    };
                    records.insert(collection, &record).await?;
                }
            },
            None => {
                records.delete(collection, &conflict.record_id).await?;
            }
        }

        LibSqlMutationQueue::new(conn)
            .remove_for_record(collection, &conflict.record_id)
            .await?;
        LibSqlConflictRepository::new(conn).delete(&conflict.id).await?;
        Ok(())
    }

    /// Every saved profile in save order.
    pub async fn list_profiles(&self) -> Result<Vec<ConnectionProfile>> {
        let db = self.db.lock().await;
        LibSqlProfileRepository::new(db.connection()).list().await
    }

    /// Fetch a profile by id.
    pub async fn get_profile(&self, id: &str) -> Result<Option<ConnectionProfile>> {
        let db = self.db.lock().await;
        LibSqlProfileRepository::new(db.connection()).get(id).await
    }

    /// Insert or update a profile, keeping a single default.
    pub async fn save_profile(&self, profile: &ConnectionProfile) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlProfileRepository::new(db.connection())
            .save(profile)
            .await
    }

    /// Delete a profile and its credential.
    pub async fn delete_profile(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlProfileRepository::new(db.connection())
            .delete(id)
            .await
    }

    /// The default profile, if one is flagged.
    pub async fn default_profile(&self) -> Result<Option<ConnectionProfile>> {
        let db = self.db.lock().await;
        LibSqlProfileRepository::new(db.connection())
            .get_default()
            .await
    }

    /// Store a profile's encrypted credential blob.
    pub async fn save_credential(&self, profile_id: &str, blob: &[u8]) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlProfileRepository::new(db.connection())
            .save_credential(profile_id, blob)
            .await
    }

    /// Load a profile's encrypted credential blob.
    pub async fn load_credential(&self, profile_id: &str) -> Result<Option<Vec<u8>>> {
        let db = self.db.lock().await;
        LibSqlProfileRepository::new(db.connection())
            .load_credential(profile_id)
            .await
    }

    /// Remove a profile's credential blob.
    pub async fn delete_credential(&self, profile_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlProfileRepository::new(db.connection())
            .delete_credential(profile_id)
            .await
    }
}

/// Server-confirmed state written when a conflict is settled.
#[derive(Debug, Clone, Copy)]
pub struct SettledRecord<'a> {
    pub remote_id: &'a str,
    pub remote_updated_at: i64,
    pub payload: &'a Value,
}

async fn commit_or_rollback<T>(conn: &Connection, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            if let Err(e) = conn.execute("COMMIT", ()).await {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
            Ok(value)
        }
        Err(e) => {
            conn.execute("ROLLBACK", ()).await.ok();
            Err(e)
        }
    }
}
