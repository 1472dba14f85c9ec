//! Durable mutation queue
//!
//! A dumb, ordered log: it never decides retry policy, it only records
//! what happened.

use crate::error::{Error, Result};
use crate::models::{Collection, MutationOperation, QueuedMutation};
use libsql::Connection;
use serde_json::Value;

/// Trait for mutation queue operations (async)
#[allow(async_fn_in_trait)]
pub trait MutationQueue {
    /// Append a mutation to the end of the queue
    async fn enqueue(
        &self,
        operation: MutationOperation,
        collection: Collection,
        record_id: &str,
        payload: Option<&Value>,
    ) -> Result<QueuedMutation>;

    /// Every queued mutation in enqueue order
    async fn dequeue_all(&self) -> Result<Vec<QueuedMutation>>;

    /// Remove a mutation (consumed or dropped)
    async fn remove(&self, id: i64) -> Result<()>;

    /// Increment a mutation's retry count and remember the failure
    async fn record_failure(&self, id: i64, error: &str) -> Result<()>;

    /// Remove every queued mutation for one record
    async fn remove_for_record(&self, collection: Collection, record_id: &str) -> Result<u64>;

    /// Local ids with at least one queued mutation in the collection
    async fn queued_record_ids(&self, collection: Collection) -> Result<Vec<String>>;

    /// Number of queued mutations
    async fn count(&self) -> Result<usize>;
}

/// libSQL implementation of `MutationQueue`
pub struct LibSqlMutationQueue<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMutationQueue<'a> {
    /// Create a new queue over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_mutation(row: &libsql::Row) -> Result<QueuedMutation> {
        let operation: String = row.get(1)?;
        let collection: String = row.get(2)?;
        let payload: Option<String> = row.get(4)?;
        let retry_count: i64 = row.get(5)?;
        Ok(QueuedMutation {
            id: row.get(0)?,
            operation: operation.parse().map_err(Error::Database)?,
            collection: collection.parse().map_err(Error::Database)?,
            record_id: row.get(3)?,
            payload: payload
                .map(|raw| serde_json::from_str(&raw))
                .transpose()?,
            retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
            last_error: row.get(6)?,
            enqueued_at: row.get(7)?,
        })
    }
}

impl MutationQueue for LibSqlMutationQueue<'_> {
    async fn enqueue(
        &self,
        operation: MutationOperation,
        collection: Collection,
        record_id: &str,
        payload: Option<&Value>,
    ) -> Result<QueuedMutation> {
        let enqueued_at = crate::util::now_millis();
        let payload_json = payload.map(serde_json::to_string).transpose()?;

        self.conn
            .execute(
                "INSERT INTO mutation_queue (operation, collection, record_id, payload, retry_count, enqueued_at)
                 VALUES (?, ?, ?, ?, 0, ?)",
                libsql::params![
                    operation.as_str(),
                    collection.as_str(),
                    record_id,
                    payload_json,
                    enqueued_at,
                ],
            )
            .await?;
        let id = self.conn.last_insert_rowid();

        tracing::debug!(
            "Queued {operation} for {} {record_id} (#{id})",
            collection.entity_type()
        );

        Ok(QueuedMutation {
            id,
            operation,
            collection,
            record_id: record_id.to_string(),
            payload: payload.cloned(),
            retry_count: 0,
            last_error: None,
            enqueued_at,
        })
    }

    async fn dequeue_all(&self) -> Result<Vec<QueuedMutation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, operation, collection, record_id, payload, retry_count, last_error, enqueued_at
                 FROM mutation_queue ORDER BY id ASC",
                (),
            )
            .await?;

        let mut mutations = Vec::new();
        while let Some(row) = rows.next().await? {
            mutations.push(Self::parse_mutation(&row)?);
        }
        Ok(mutations)
    }

    async fn remove(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM mutation_queue WHERE id = ?", [id])
            .await?;
        Ok(())
    }

    async fn record_failure(&self, id: i64, error: &str) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE mutation_queue SET retry_count = retry_count + 1, last_error = ? WHERE id = ?",
                libsql::params![crate::util::compact_text(error), id],
            )
            .await?;
        if changed == 0 {
            return Err(Error::NotFound(format!("queued mutation #{id}")));
        }
        Ok(())
    }

    async fn remove_for_record(&self, collection: Collection, record_id: &str) -> Result<u64> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM mutation_queue WHERE collection = ? AND record_id = ?",
                [collection.as_str(), record_id],
            )
            .await?;
        Ok(removed)
    }

    async fn queued_record_ids(&self, collection: Collection) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT record_id FROM mutation_queue WHERE collection = ?",
                [collection.as_str()],
            )
            .await?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get::<String>(0)?);
        }
        Ok(ids)
    }

    async fn count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM mutation_queue", ())
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
