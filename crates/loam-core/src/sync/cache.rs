//! Cache accessors exposed to front-ends.
//!
//! Writes go through the same store primitives the sync pass uses, so a
//! user edit and a merge on the same record never overwrite each other.

use serde_json::Value;

use super::{SyncCoordinator, SyncError};
use crate::models::{Collection, SyncRecord};
use crate::transport::RemoteTransport;

impl<T: RemoteTransport> SyncCoordinator<T> {
    pub async fn get_cached_notes(&self) -> Result<Vec<SyncRecord>, SyncError> {
        self.list_cached(Collection::Notes).await
    }

    pub async fn get_cached_people(&self) -> Result<Vec<SyncRecord>, SyncError> {
        self.list_cached(Collection::People).await
    }

    pub async fn get_cached_tasks(&self) -> Result<Vec<SyncRecord>, SyncError> {
        self.list_cached(Collection::Tasks).await
    }

    /// Every cached record of a collection, most recently edited first.
    pub async fn list_cached(&self, collection: Collection) -> Result<Vec<SyncRecord>, SyncError> {
        Ok(self.inner.db.list_cached(collection).await?)
    }

    pub async fn get_cached(
        &self,
        collection: Collection,
        local_id: &str,
    ) -> Result<Option<SyncRecord>, SyncError> {
        Ok(self.inner.db.get_cached(collection, local_id).await?)
    }

    pub async fn cache_note(
        &self,
        local_id: Option<&str>,
        payload: Value,
    ) -> Result<SyncRecord, SyncError> {
        self.cache_record(Collection::Notes, local_id, payload).await
    }

    pub async fn cache_person(
        &self,
        local_id: Option<&str>,
        payload: Value,
    ) -> Result<SyncRecord, SyncError> {
        self.cache_record(Collection::People, local_id, payload).await
    }

    pub async fn cache_task(
        &self,
        local_id: Option<&str>,
        payload: Value,
    ) -> Result<SyncRecord, SyncError> {
        self.cache_record(Collection::Tasks, local_id, payload).await
    }

    /// Create or update a cached record and queue the change for push.
    pub async fn cache_record(
        &self,
        collection: Collection,
        local_id: Option<&str>,
        payload: Value,
    ) -> Result<SyncRecord, SyncError> {
        if !payload.is_object() {
            return Err(SyncError::InvalidInput(format!(
                "{} payload must be a JSON object",
                collection.entity_type()
            )));
        }
        Ok(self
            .inner
            .db
            .cache_record(collection, local_id, payload)
            .await?)
    }

    /// Delete a cached record, queueing the remote delete when it was pushed.
    pub async fn delete_cached(
        &self,
        collection: Collection,
        local_id: &str,
    ) -> Result<bool, SyncError> {
        Ok(self.inner.db.delete_cached(collection, local_id).await?)
    }
}
