//! Synchronization coordinator.
//!
//! A pass drains the mutation queue in order, then for each collection pulls
//! server changes since the collection's checkpoint, merges them into the
//! cache and pushes any pending records the queue does not already own.
//! Divergent records are flagged as conflicts and wait for an explicit
//! [`SyncCoordinator::resolve_conflict`].

mod cache;
mod error;
mod merge;

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{
    Collection, ConflictReason, MutationOperation, QueuedMutation, SyncCheckpoint, SyncConflict,
    SyncRecord, SyncStatus,
};
use crate::scheduler::{ScheduleHandle, Scheduler};
use crate::services::{DatabaseService, SettledRecord};
use crate::session::{AuthedClient, SessionManager};
use crate::transport::{outbound_body, RemoteRecord, RemoteTransport, TransportError, TransportResult};
use crate::util::{lock, now_millis};

pub use error::SyncError;
pub use merge::{classify, MergeAction};

/// How to settle a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Push the local version over the server's
    KeepLocal,
    /// Take the server version locally
    KeepRemote,
    /// Write caller-supplied merged data on both sides
    Merge,
}

impl ResolutionStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "keep_local" | "local" => Ok(Self::KeepLocal),
            "keep_remote" | "remote" => Ok(Self::KeepRemote),
            "merge" => Ok(Self::Merge),
            other => Err(format!("unknown resolution strategy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    pub strategy: ResolutionStrategy,
    /// Required for [`ResolutionStrategy::Merge`]
    #[serde(default)]
    pub merged_data: Option<Value>,
}

impl ConflictResolution {
    pub const fn keep_local() -> Self {
        Self {
            strategy: ResolutionStrategy::KeepLocal,
            merged_data: None,
        }
    }

    pub const fn keep_remote() -> Self {
        Self {
            strategy: ResolutionStrategy::KeepRemote,
            merged_data: None,
        }
    }

    pub const fn merge(merged_data: Value) -> Self {
        Self {
            strategy: ResolutionStrategy::Merge,
            merged_data: Some(merged_data),
        }
    }
}

/// Position within a running pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub current: usize,
    pub total: usize,
    pub operation: String,
}

/// Summary of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// `true` when no record failed
    pub success: bool,
    pub synced: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub errors: Vec<String>,
}

/// Pollable coordinator status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOverview {
    pub is_syncing: bool,
    pub progress: Option<SyncProgress>,
    pub last_sync_at: Option<i64>,
    pub next_sync_at: Option<i64>,
    pub last_result: Option<SyncResult>,
    pub pending_mutations: usize,
    pub conflicts: Vec<SyncConflict>,
    pub auto_sync_enabled: bool,
    pub auto_sync_interval_secs: u64,
}

struct CoordinatorStatus {
    progress: Option<SyncProgress>,
    last_sync_at: Option<i64>,
    next_sync_at: Option<i64>,
    last_result: Option<SyncResult>,
    auto_sync_enabled: bool,
    auto_sync_interval: Duration,
}

struct CoordinatorInner<T: RemoteTransport> {
    session: SessionManager<T>,
    db: DatabaseService,
    scheduler: Arc<dyn Scheduler>,
    max_retries: u32,
    running: AtomicBool,
    status: Mutex<CoordinatorStatus>,
    auto_sync: Mutex<Option<ScheduleHandle>>,
}

/// Drives sync passes, conflict resolution and auto-sync.
pub struct SyncCoordinator<T: RemoteTransport> {
    inner: Arc<CoordinatorInner<T>>,
}

impl<T: RemoteTransport> Clone for SyncCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Running tally of a pass.
#[derive(Default)]
struct PassTally {
    synced: usize,
    failed: usize,
    conflicts: usize,
    errors: Vec<String>,
    /// Records whose mutation failed this pass; later work on them waits
    blocked: HashSet<(Collection, String)>,
    step: usize,
    total: usize,
}

impl PassTally {
    fn fail(&mut self, message: String) {
        tracing::warn!("{message}");
        self.failed += 1;
        self.errors.push(message);
    }

    fn is_blocked(&self, collection: Collection, local_id: &str) -> bool {
        self.blocked.contains(&(collection, local_id.to_string()))
    }

    fn into_result(self) -> SyncResult {
        SyncResult {
            success: self.failed == 0,
            synced: self.synced,
            failed: self.failed,
            conflicts: self.conflicts,
            errors: self.errors,
        }
    }
}

/// Outcome of draining one queued mutation.
enum Drained {
    Pushed,
    /// Nothing left to send (record gone, in conflict, or already synced)
    Superseded,
    Conflicted(SyncConflict),
}

enum PushFailure {
    Conflict(Option<RemoteRecord>),
    Failed(String),
}

impl From<TransportError> for PushFailure {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Conflict { remote } => {
                Self::Conflict(remote.and_then(|body| RemoteRecord::from_json(body).ok()))
            }
            other => Self::Failed(other.to_string()),
        }
    }
}

/// Clears the running flag and re-arms auto-sync however the pass exits.
struct PassGuard<'a, T: RemoteTransport> {
    coordinator: &'a SyncCoordinator<T>,
}

impl<T: RemoteTransport> Drop for PassGuard<'_, T> {
    fn drop(&mut self) {
        lock(&self.coordinator.inner.status).progress = None;
        self.coordinator.inner.running.store(false, Ordering::SeqCst);
        self.coordinator.schedule_auto_sync();
    }
}

impl<T: RemoteTransport> SyncCoordinator<T> {
    /// Build a coordinator over the session and store.
    ///
    /// Auto-sync stays idle until [`Self::start_auto_sync`].
    pub async fn new(
        session: SessionManager<T>,
        db: DatabaseService,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, SyncError> {
        let settings = session.settings().clone();
        let unresolved = db.list_conflicts().await?.len();
        if unresolved > 0 {
            tracing::info!("Loaded {unresolved} unresolved sync conflict(s)");
        }

        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                session,
                db,
                scheduler,
                max_retries: settings.max_retries,
                running: AtomicBool::new(false),
                status: Mutex::new(CoordinatorStatus {
                    progress: None,
                    last_sync_at: None,
                    next_sync_at: None,
                    last_result: None,
                    auto_sync_enabled: settings.auto_sync_enabled,
                    auto_sync_interval: settings.auto_sync_interval(),
                }),
                auto_sync: Mutex::new(None),
            }),
        })
    }

    fn from_weak(weak: &Weak<CoordinatorInner<T>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn session(&self) -> &SessionManager<T> {
        &self.inner.session
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Run one full sync pass.
    ///
    /// Per-record failures are collected into the result rather than
    /// aborting the pass; only storage failures abort it.
    pub async fn sync_all(&self) -> Result<SyncResult, SyncError> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::SyncAlreadyInProgress);
        }
        let _guard = PassGuard { coordinator: self };

        let client = self.inner.session.client()?;
        tracing::info!("Starting sync pass");

        let mut tally = PassTally::default();
        self.drain_queue(&client, &mut tally).await?;
        for collection in Collection::ALL {
            self.sync_collection(&client, collection, &mut tally).await?;
        }

        let result = tally.into_result();
        {
            let mut status = lock(&self.inner.status);
            status.last_sync_at = Some(now_millis());
            status.last_result = Some(result.clone());
        }
        tracing::info!(
            "Sync pass finished: {} synced, {} failed, {} conflict(s)",
            result.synced,
            result.failed,
            result.conflicts
        );
        Ok(result)
    }

    fn advance_progress(&self, tally: &mut PassTally, operation: String) {
        tally.step += 1;
        lock(&self.inner.status).progress = Some(SyncProgress {
            current: tally.step,
            total: tally.total,
            operation,
        });
    }

    async fn drain_queue(
        &self,
        client: &AuthedClient<T>,
        tally: &mut PassTally,
    ) -> Result<(), SyncError> {
        let queue = self.inner.db.dequeue_all().await?;
        tally.total = queue.len() + Collection::ALL.len();
        if !queue.is_empty() {
            tracing::debug!("Draining {} queued mutation(s)", queue.len());
        }

        for mutation in queue {
            let label = format!(
                "{} {} {}",
                mutation.operation,
                mutation.collection.entity_type(),
                mutation.record_id
            );
            self.advance_progress(tally, label.clone());

            if tally.is_blocked(mutation.collection, &mutation.record_id) {
                tracing::debug!("Holding {label} behind an earlier failure");
                continue;
            }

            match self.drain_one(client, &mutation).await {
                Ok(Drained::Pushed) => {
                    self.inner.db.remove_mutation(mutation.id).await?;
                    tally.synced += 1;
                }
                Ok(Drained::Superseded) => {
                    tracing::debug!("Dropping superseded mutation: {label}");
                    self.inner.db.remove_mutation(mutation.id).await?;
                }
                Ok(Drained::Conflicted(conflict)) => {
                    tracing::info!("Server rejected {label} with a conflict");
                    self.inner.db.register_conflict(&conflict).await?;
                    self.inner.db.remove_mutation(mutation.id).await?;
                    tally.conflicts += 1;
                }
                Err(message) => {
                    tally
                        .blocked
                        .insert((mutation.collection, mutation.record_id.clone()));
                    self.record_failure(&mutation, format!("{label}: {message}"), tally)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn drain_one(
        &self,
        client: &AuthedClient<T>,
        mutation: &QueuedMutation,
    ) -> Result<Drained, String> {
        let collection = mutation.collection;

        if mutation.operation == MutationOperation::Delete {
            let Some(remote_id) = mutation.remote_id() else {
                return Ok(Drained::Superseded);
            };
            return match client.delete(collection, remote_id).await {
                Ok(()) => Ok(Drained::Pushed),
                Err(TransportError::Conflict { remote }) => Ok(Drained::Conflicted(
                    rejected_conflict(
                        collection,
                        &mutation.record_id,
                        Value::Null,
                        Some(remote_id.to_string()),
                        remote.and_then(|body| RemoteRecord::from_json(body).ok()),
                    ),
                )),
                Err(error) => Err(error.to_string()),
            };
        }

        let record = self
            .inner
            .db
            .get_cached(collection, &mutation.record_id)
            .await
            .map_err(|error| error.to_string())?;
        // A synced record was already pushed with this edit folded in.
        let Some(record) = record.filter(|record| record.sync_status == SyncStatus::Pending)
        else {
            return Ok(Drained::Superseded);
        };

        match self.push_record(client, collection, &record).await {
            Ok(_) => Ok(Drained::Pushed),
            Err(PushFailure::Conflict(remote)) => Ok(Drained::Conflicted(rejected_conflict(
                collection,
                &record.local_id,
                record.payload.clone(),
                record.remote_id.clone(),
                remote,
            ))),
            Err(PushFailure::Failed(message)) => Err(message),
        }
    }

    async fn record_failure(
        &self,
        mutation: &QueuedMutation,
        message: String,
        tally: &mut PassTally,
    ) -> Result<(), SyncError> {
        let attempts = mutation.retry_count + 1;
        if attempts < self.inner.max_retries {
            // The record may have been deleted, dropping its queue entries.
            match self
                .inner
                .db
                .record_mutation_failure(mutation.id, &message)
                .await
            {
                Ok(()) | Err(crate::Error::NotFound(_)) => {}
                Err(error) => return Err(error.into()),
            }
            tally.fail(message);
        } else {
            self.inner.db.remove_mutation(mutation.id).await?;
            tally.fail(SyncError::MaxRetriesExceeded { attempts, message }.to_string());
        }
        Ok(())
    }

    /// Send a record's current payload and adopt the server id.
    async fn push_record(
        &self,
        client: &AuthedClient<T>,
        collection: Collection,
        record: &SyncRecord,
    ) -> Result<RemoteRecord, PushFailure> {
        let remote = upload(client, collection, record.remote_id.as_deref(), &record.payload).await?;
        let marked = self
            .inner
            .db
            .mark_pushed(
                collection,
                &record.local_id,
                &remote.id,
                remote.updated_at,
                record.last_modified_locally,
            )
            .await;
        match marked {
            Ok(true) => {}
            Ok(false) => tracing::debug!(
                "{} {} changed during push; left pending",
                collection.entity_type(),
                record.local_id
            ),
            Err(crate::Error::NotFound(_)) => {
                self.forget_pushed(collection, record, &remote).await?;
            }
            Err(error) => return Err(PushFailure::Failed(error.to_string())),
        }
        Ok(remote)
    }

    /// The record was deleted locally while its push was in flight. A delete
    /// queued at that point only knew the old server id, so a freshly
    /// created server copy needs its own.
    async fn forget_pushed(
        &self,
        collection: Collection,
        record: &SyncRecord,
        remote: &RemoteRecord,
    ) -> Result<(), PushFailure> {
        tracing::debug!(
            "{} {} was deleted during push",
            collection.entity_type(),
            record.local_id
        );
        if record.remote_id.as_deref() == Some(remote.id.as_str()) {
            return Ok(());
        }
        self.inner
            .db
            .enqueue(
                MutationOperation::Delete,
                collection,
                &record.local_id,
                Some(&serde_json::json!({ "remoteId": remote.id })),
            )
            .await
            .map_err(|error| PushFailure::Failed(error.to_string()))?;
        Ok(())
    }

    async fn sync_collection(
        &self,
        client: &AuthedClient<T>,
        collection: Collection,
        tally: &mut PassTally,
    ) -> Result<(), SyncError> {
        self.advance_progress(tally, format!("Syncing {collection}"));

        let checkpoint = self.inner.db.get_checkpoint(collection).await?;
        let since = checkpoint.as_ref().map(|checkpoint| checkpoint.last_synced_at);

        let pulled = match client.fetch_changes(collection, since).await {
            Ok(records) => {
                tracing::debug!("Fetched {} changed {collection}", records.len());
                let deleting = self.queued_deletes(collection).await?;
                for remote in records {
                    if deleting.contains(&remote.id) {
                        tracing::debug!(
                            "Skipping {} {}; delete still queued",
                            collection.entity_type(),
                            remote.id
                        );
                        continue;
                    }
                    self.merge_remote(collection, remote, tally).await?;
                }
                true
            }
            Err(error) => {
                tally.fail(format!("Failed to fetch {collection}: {error}"));
                false
            }
        };

        self.push_pending(client, collection, tally).await?;

        // A failed fetch keeps the old watermark so the changes are pulled again.
        if pulled {
            self.inner
                .db
                .save_checkpoint(&SyncCheckpoint {
                    collection,
                    last_synced_at: now_millis(),
                    sync_token: checkpoint.and_then(|checkpoint| checkpoint.sync_token),
                })
                .await?;
        }
        Ok(())
    }

    /// Server ids with a delete still waiting in the queue.
    async fn queued_deletes(&self, collection: Collection) -> Result<HashSet<String>, SyncError> {
        Ok(self
            .inner
            .db
            .dequeue_all()
            .await?
            .iter()
            .filter(|mutation| {
                mutation.collection == collection
                    && mutation.operation == MutationOperation::Delete
            })
            .filter_map(|mutation| mutation.remote_id().map(str::to_string))
            .collect())
    }

    async fn merge_remote(
        &self,
        collection: Collection,
        remote: RemoteRecord,
        tally: &mut PassTally,
    ) -> Result<(), SyncError> {
        let db = &self.inner.db;
        let entity = collection.entity_type();
        let Some(remote_updated_at) = remote.updated_at else {
            tally.fail(format!("Server {entity} {} has no updatedAt; skipped", remote.id));
            return Ok(());
        };

        let local = db.get_by_remote_id(collection, &remote.id).await?;
        match (classify(local.as_ref(), remote_updated_at, remote.deleted), local) {
            (MergeAction::Insert, _) => {
                let record = SyncRecord::from_remote(remote.id, remote_updated_at, remote.fields);
                db.insert_record(collection, &record).await?;
                tracing::debug!("Cached new {entity} {}", record.local_id);
                tally.synced += 1;
            }
            (MergeAction::Overwrite, Some(local)) => {
                match db
                    .apply_remote(
                        collection,
                        &local.local_id,
                        &remote.id,
                        remote_updated_at,
                        &remote.fields,
                        local.last_modified_locally,
                    )
                    .await
                {
                    Ok(_) => tally.synced += 1,
                    Err(crate::Error::StaleWrite(_)) => {
                        tracing::debug!(
                            "{entity} {} was edited during merge; keeping the local edit",
                            local.local_id
                        );
                    }
                    Err(error) => return Err(error.into()),
                }
            }
            (MergeAction::Remove, Some(local)) => {
                db.remove_record(collection, &local.local_id).await?;
                tracing::debug!("Removed {entity} {} deleted on the server", local.local_id);
                tally.synced += 1;
            }
            (MergeAction::Conflict(reason), Some(local)) => {
                let conflict = SyncConflict {
                    id: SyncConflict::key(collection, &local.local_id),
                    record_id: local.local_id,
                    entity_type: collection,
                    local_data: local.payload,
                    remote_data: if remote.deleted {
                        Value::Null
                    } else {
                        remote.fields
                    },
                    remote_id: Some(remote.id),
                    remote_updated_at: Some(remote_updated_at),
                    reason,
                    detected_at: now_millis(),
                };
                tracing::info!("Conflict on {entity} {} ({reason})", conflict.record_id);
                db.register_conflict(&conflict).await?;
                tally.conflicts += 1;
            }
            _ => {}
        }
        Ok(())
    }

    async fn push_pending(
        &self,
        client: &AuthedClient<T>,
        collection: Collection,
        tally: &mut PassTally,
    ) -> Result<(), SyncError> {
        let queued: HashSet<String> = self
            .inner
            .db
            .queued_record_ids(collection)
            .await?
            .into_iter()
            .collect();

        for record in self.inner.db.list_pending(collection).await? {
            if queued.contains(&record.local_id) || tally.is_blocked(collection, &record.local_id)
            {
                continue;
            }
            match self.push_record(client, collection, &record).await {
                Ok(_) => tally.synced += 1,
                Err(PushFailure::Conflict(remote)) => {
                    let conflict = rejected_conflict(
                        collection,
                        &record.local_id,
                        record.payload.clone(),
                        record.remote_id.clone(),
                        remote,
                    );
                    self.inner.db.register_conflict(&conflict).await?;
                    tally.conflicts += 1;
                }
                Err(PushFailure::Failed(message)) => tally.fail(format!(
                    "push {} {}: {message}",
                    collection.entity_type(),
                    record.local_id
                )),
            }
        }
        Ok(())
    }

    pub async fn get_sync_status(&self) -> Result<SyncOverview, SyncError> {
        let conflicts = self.inner.db.list_conflicts().await?;
        let pending_mutations = self.inner.db.queue_len().await?;
        let status = lock(&self.inner.status);
        Ok(SyncOverview {
            is_syncing: self.is_syncing(),
            progress: status.progress.clone(),
            last_sync_at: status.last_sync_at,
            next_sync_at: status.next_sync_at,
            last_result: status.last_result.clone(),
            pending_mutations,
            conflicts,
            auto_sync_enabled: status.auto_sync_enabled,
            auto_sync_interval_secs: status.auto_sync_interval.as_secs(),
        })
    }

    /// Unresolved conflicts, oldest first.
    pub async fn get_conflicts(&self) -> Result<Vec<SyncConflict>, SyncError> {
        Ok(self.inner.db.list_conflicts().await?)
    }

    /// Settle a conflict.
    ///
    /// The conflict is only removed once the chosen version has been written
    /// (and pushed, for `keep_local` and `merge`); any failure leaves it in
    /// place.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: ConflictResolution,
    ) -> Result<(), SyncError> {
        let db = &self.inner.db;
        let conflict = db
            .list_conflicts()
            .await?
            .into_iter()
            .find(|conflict| conflict.id == conflict_id)
            .ok_or_else(|| SyncError::ConflictNotFound(conflict_id.to_string()))?;
        let collection = conflict.entity_type;
        let local = db.get_cached(collection, &conflict.record_id).await?;

        // The server no longer has the record, so a push has to re-create it.
        let push_target = if conflict.reason == ConflictReason::RemoteDeleted {
            None
        } else {
            local
                .as_ref()
                .and_then(|record| record.remote_id.clone())
                .or_else(|| conflict.remote_id.clone())
        };

        match resolution.strategy {
            ResolutionStrategy::KeepLocal => {
                let client = self.inner.session.client()?;
                match local {
                    Some(local) => {
                        let pushed =
                            upload(&client, collection, push_target.as_deref(), &local.payload)
                                .await
                                .map_err(|error| resolution_error(&conflict, error))?;
                        db.settle_conflict(
                            &conflict,
                            Some(settled(&pushed, &local.payload)),
                        )
                        .await?;
                    }
                    None => {
                        if let Some(remote_id) = push_target.as_deref() {
                            client
                                .delete(collection, remote_id)
                                .await
                                .map_err(|error| resolution_error(&conflict, error))?;
                        }
                        db.settle_conflict(&conflict, None).await?;
                    }
                }
            }
            ResolutionStrategy::KeepRemote => {
                if conflict.reason == ConflictReason::RemoteDeleted {
                    db.settle_conflict(&conflict, None).await?;
                } else {
                    let remote_id = conflict
                        .remote_id
                        .as_deref()
                        .ok_or_else(|| SyncError::MissingRemoteId(conflict.id.clone()))?;
                    if conflict.remote_data.is_null() {
                        // The 409 carried no body; take whatever the server holds now.
                        let client = self.inner.session.client()?;
                        let current = client
                            .fetch_changes(collection, None)
                            .await
                            .map_err(|error| resolution_error(&conflict, error))?
                            .into_iter()
                            .find(|remote| remote.id == remote_id);
                        match current {
                            Some(remote) if !remote.deleted => {
                                db.settle_conflict(
                                    &conflict,
                                    Some(settled(&remote, &remote.fields)),
                                )
                                .await?;
                            }
                            _ => db.settle_conflict(&conflict, None).await?,
                        }
                    } else {
                        let settlement = SettledRecord {
                            remote_id,
                            remote_updated_at: conflict
                                .remote_updated_at
                                .unwrap_or_else(now_millis),
                            payload: &conflict.remote_data,
                        };
                        db.settle_conflict(&conflict, Some(settlement)).await?;
                    }
                }
            }
            ResolutionStrategy::Merge => {
                let merged = resolution
                    .merged_data
                    .ok_or(SyncError::MergeDataRequired)?;
                let client = self.inner.session.client()?;
                let pushed = upload(&client, collection, push_target.as_deref(), &merged)
                    .await
                    .map_err(|error| resolution_error(&conflict, error))?;
                db.settle_conflict(&conflict, Some(settled(&pushed, &merged)))
                    .await?;
            }
        }

        tracing::info!(
            "Resolved conflict on {} {} with {}",
            collection.entity_type(),
            conflict.record_id,
            resolution.strategy
        );
        Ok(())
    }

    /// Arm the recurring auto-sync timer (no-op while disabled).
    pub fn start_auto_sync(&self) {
        self.schedule_auto_sync();
    }

    pub fn set_auto_sync_enabled(&self, enabled: bool) {
        lock(&self.inner.status).auto_sync_enabled = enabled;
        self.schedule_auto_sync();
    }

    pub fn set_auto_sync_interval(&self, interval: Duration) -> Result<(), SyncError> {
        if interval.is_zero() {
            return Err(SyncError::InvalidInput(
                "auto-sync interval must be greater than zero".to_string(),
            ));
        }
        lock(&self.inner.status).auto_sync_interval = interval;
        self.schedule_auto_sync();
        Ok(())
    }

    /// Replace the pending auto-sync timer with one a full interval out.
    fn schedule_auto_sync(&self) {
        let (enabled, interval) = {
            let status = lock(&self.inner.status);
            (status.auto_sync_enabled, status.auto_sync_interval)
        };

        let mut timer = lock(&self.inner.auto_sync);
        if let Some(handle) = timer.take() {
            handle.cancel();
        }
        if !enabled {
            lock(&self.inner.status).next_sync_at = None;
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        *timer = Some(self.inner.scheduler.schedule(
            interval,
            Box::pin(async move {
                if let Some(coordinator) = Self::from_weak(&weak) {
                    coordinator.auto_sync_tick().await;
                }
            }),
        ));
        let interval_ms = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
        lock(&self.inner.status).next_sync_at = Some(now_millis().saturating_add(interval_ms));
    }

    async fn auto_sync_tick(&self) {
        if self.is_syncing() || !self.inner.session.is_connected() {
            tracing::debug!("Skipping auto-sync tick");
            self.schedule_auto_sync();
            return;
        }
        match self.sync_all().await {
            Ok(result) if result.success => tracing::debug!("Auto-sync pass completed"),
            Ok(result) => tracing::warn!(
                "Auto-sync pass finished with {} failure(s)",
                result.failed
            ),
            // The running pass re-arms the timer when it ends.
            Err(SyncError::SyncAlreadyInProgress) => {}
            Err(error) => tracing::warn!("Auto-sync failed: {error}"),
        }
    }
}

/// Create or update a record on the server.
async fn upload<T: RemoteTransport>(
    client: &AuthedClient<T>,
    collection: Collection,
    remote_id: Option<&str>,
    payload: &Value,
) -> TransportResult<RemoteRecord> {
    let body = outbound_body(payload);
    match remote_id {
        Some(remote_id) => client.update(collection, remote_id, &body).await,
        None => client.create(collection, &body).await,
    }
}

fn settled<'a>(pushed: &'a RemoteRecord, payload: &'a Value) -> SettledRecord<'a> {
    SettledRecord {
        remote_id: &pushed.id,
        remote_updated_at: pushed.updated_at.unwrap_or_else(now_millis),
        payload,
    }
}

fn resolution_error(conflict: &SyncConflict, error: TransportError) -> SyncError {
    match error {
        TransportError::Conflict { .. } => SyncError::SyncConflict(conflict.id.clone()),
        TransportError::NotConnected => SyncError::NotConnected,
        other => SyncError::Transport(other),
    }
}

/// Conflict for a write the server answered with 409.
fn rejected_conflict(
    collection: Collection,
    local_id: &str,
    local_data: Value,
    known_remote_id: Option<String>,
    remote: Option<RemoteRecord>,
) -> SyncConflict {
    let (remote_id, remote_updated_at, remote_data) = match remote {
        Some(remote) if !remote.deleted => (Some(remote.id), remote.updated_at, remote.fields),
        Some(remote) => (Some(remote.id), remote.updated_at, Value::Null),
        None => (known_remote_id, None, Value::Null),
    };
    SyncConflict {
        id: SyncConflict::key(collection, local_id),
        record_id: local_id.to_string(),
        entity_type: collection,
        local_data,
        remote_data,
        remote_id,
        remote_updated_at,
        reason: ConflictReason::RemoteRejected,
        detected_at: now_millis(),
    }
}
