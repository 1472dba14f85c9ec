//! Sync checkpoint repository implementation

use crate::error::{Error, Result};
use crate::models::{Collection, SyncCheckpoint};
use libsql::Connection;

/// Trait for per-collection watermark storage (async)
#[allow(async_fn_in_trait)]
pub trait CheckpointRepository {
    /// Load a collection's checkpoint, if a pass has ever completed for it
    async fn get(&self, collection: Collection) -> Result<Option<SyncCheckpoint>>;

    /// Overwrite a collection's checkpoint
    async fn save(&self, checkpoint: &SyncCheckpoint) -> Result<()>;

    /// Every stored checkpoint
    async fn list(&self) -> Result<Vec<SyncCheckpoint>>;
}

/// libSQL implementation of `CheckpointRepository`
pub struct LibSqlCheckpointRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCheckpointRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_checkpoint(row: &libsql::Row) -> Result<SyncCheckpoint> {
        let collection: String = row.get(0)?;
        Ok(SyncCheckpoint {
            collection: collection.parse().map_err(Error::Database)?,
            last_synced_at: row.get(1)?,
            sync_token: row.get(2)?,
        })
    }
}

impl CheckpointRepository for LibSqlCheckpointRepository<'_> {
    async fn get(&self, collection: Collection) -> Result<Option<SyncCheckpoint>> {
        let mut rows = self
            .conn
            .query(
                "SELECT collection, last_synced_at, sync_token FROM sync_checkpoints WHERE collection = ?",
                [collection.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_checkpoint(&row)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_checkpoints (collection, last_synced_at, sync_token)
                 VALUES (?, ?, ?)",
                libsql::params![
                    checkpoint.collection.as_str(),
                    checkpoint.last_synced_at,
                    checkpoint.sync_token.clone(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SyncCheckpoint>> {
        let mut rows = self
            .conn
            .query(
                "SELECT collection, last_synced_at, sync_token FROM sync_checkpoints ORDER BY collection",
                (),
            )
            .await?;

        let mut checkpoints = Vec::new();
        while let Some(row) = rows.next().await? {
            checkpoints.push(Self::parse_checkpoint(&row)?);
        }
        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_checkpoint_is_none() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlCheckpointRepository::new(db.connection());
        assert!(repo.get(Collection::Notes).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_overwrites_single_row() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlCheckpointRepository::new(db.connection());

        for at in [10, 20] {
            repo.save(&SyncCheckpoint {
                collection: Collection::People,
                last_synced_at: at,
                sync_token: None,
            })
            .await
            .unwrap();
        }

        assert_eq!(
            repo.list().await.unwrap(),
            vec![SyncCheckpoint {
                collection: Collection::People,
                last_synced_at: 20,
                sync_token: None,
            }]
        );
    }
}
