use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::models::{ConflictReason, SyncStatus};
use crate::session::ConnectionStatus;
use crate::testing::{FakeOp, FakeRemote, Harness};
use crate::transport::TransportError;

async fn coordinator(h: &Harness) -> SyncCoordinator<FakeRemote> {
    SyncCoordinator::new(
        h.session.clone(),
        h.db.clone(),
        Arc::new(h.scheduler.clone()),
    )
    .await
    .unwrap()
}

async fn connected() -> (Harness, SyncCoordinator<FakeRemote>) {
    let h = Harness::new().await;
    h.connect().await;
    let sync = coordinator(&h).await;
    (h, sync)
}

/// A pushed note with local edits older than `modified`, and no queue entry.
async fn seed_pending(h: &Harness, local_id: &str, remote_id: &str, modified: i64) {
    seed_pending_in(h, Collection::Notes, local_id, remote_id, modified).await;
}

async fn seed_pending_in(
    h: &Harness,
    collection: Collection,
    local_id: &str,
    remote_id: &str,
    modified: i64,
) {
    h.db.insert_record(
        collection,
        &SyncRecord {
            local_id: local_id.to_string(),
            remote_id: Some(remote_id.to_string()),
            sync_status: SyncStatus::Pending,
            last_modified_locally: modified,
            remote_updated_at: Some(modified - 500_000),
            payload: json!({"title": "local edit"}),
        },
    )
    .await
    .unwrap();
}

async fn note(sync: &SyncCoordinator<FakeRemote>, local_id: &str) -> SyncRecord {
    sync.get_cached(Collection::Notes, local_id)
        .await
        .unwrap()
        .unwrap()
}

fn unreachable() -> TransportError {
    TransportError::Unreachable("connection reset".to_string())
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_requires_connection() {
    let h = Harness::new().await;
    let sync = coordinator(&h).await;

    assert!(matches!(sync.sync_all().await, Err(SyncError::NotConnected)));
    assert!(!sync.is_syncing());
    assert!(h.remote.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn second_pass_is_rejected_while_one_runs() {
    let (h, sync) = connected().await;
    let hold = h.remote.hold_fetches().await;

    let running = tokio::spawn({
        let sync = sync.clone();
        async move { sync.sync_all().await }
    });
    while h.remote.count_calls("GET /notes") == 0 {
        tokio::task::yield_now().await;
    }

    assert!(matches!(
        sync.sync_all().await,
        Err(SyncError::SyncAlreadyInProgress)
    ));
    let status = sync.get_sync_status().await.unwrap();
    assert!(status.is_syncing);
    assert_eq!(
        status.progress,
        Some(SyncProgress {
            current: 1,
            total: 3,
            operation: "Syncing notes".to_string(),
        })
    );

    drop(hold);
    let result = running.await.unwrap().unwrap();
    assert!(result.success);
    assert_eq!(h.remote.count_calls("GET /notes"), 1);

    let status = sync.get_sync_status().await.unwrap();
    assert!(!status.is_syncing);
    assert_eq!(status.progress, None);
    assert_eq!(status.last_result, Some(result));
    assert!(status.last_sync_at.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn queued_create_is_pushed_and_adopts_remote_id() {
    let (h, sync) = connected().await;
    let draft = sync
        .cache_note(None, json!({"title": "Draft"}))
        .await
        .unwrap();

    let result = sync.sync_all().await.unwrap();
    assert_eq!(
        result,
        SyncResult {
            success: true,
            synced: 1,
            failed: 0,
            conflicts: 0,
            errors: Vec::new(),
        }
    );

    let record = note(&sync, &draft.local_id).await;
    assert_eq!(record.remote_id.as_deref(), Some("srv-1"));
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert_eq!(
        h.remote.live_records(Collection::Notes),
        vec![("srv-1".to_string(), json!({"title": "Draft"}))]
    );
    assert_eq!(h.db.queue_len().await.unwrap(), 0);
    assert!(h.db.get_checkpoint(Collection::Tasks).await.unwrap().is_some());

    // Nothing left to send on the next pass.
    h.remote.clear_calls();
    sync.sync_all().await.unwrap();
    assert_eq!(h.remote.count_calls("POST"), 0);
    assert_eq!(h.remote.count_calls("PUT"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn create_for_already_pushed_record_is_sent_as_update() {
    let (h, sync) = connected().await;
    let record = sync
        .cache_note(Some("N1"), json!({"title": "v1"}))
        .await
        .unwrap();
    // The first push landed but the pass died before dequeuing.
    h.db.mark_pushed(
        Collection::Notes,
        "N1",
        "srv-7",
        Some(5),
        record.last_modified_locally,
    )
    .await
    .unwrap();
    sync.cache_note(Some("N1"), json!({"title": "v2"}))
        .await
        .unwrap();

    let result = sync.sync_all().await.unwrap();

    assert!(result.success);
    assert_eq!(h.remote.count_calls("POST /notes"), 0);
    assert_eq!(h.remote.count_calls("PUT /notes/srv-7"), 1);
    assert_eq!(
        h.remote.live_records(Collection::Notes),
        vec![("srv-7".to_string(), json!({"title": "v2"}))]
    );
    assert_eq!(note(&sync, "N1").await.sync_status, SyncStatus::Synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_mutation_holds_later_mutations_for_the_same_record() {
    let (h, sync) = connected().await;
    sync.cache_note(Some("N1"), json!({"title": "v1"}))
        .await
        .unwrap();
    sync.cache_note(Some("N1"), json!({"title": "v2"}))
        .await
        .unwrap();
    h.remote.fail_next(FakeOp::Create, &TransportError::Timeout, 1);

    let first = sync.sync_all().await.unwrap();
    assert!(!first.success);
    assert_eq!(first.failed, 1);
    assert_eq!(h.remote.count_calls("POST /notes"), 1);
    assert_eq!(h.remote.count_calls("PUT"), 0);
    let queue = h.db.dequeue_all().await.unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[0].retry_count, 1);
    assert_eq!(queue[1].retry_count, 0);

    let second = sync.sync_all().await.unwrap();
    assert!(second.success);
    assert_eq!(h.db.queue_len().await.unwrap(), 0);
    assert_eq!(
        h.remote.live_records(Collection::Notes),
        vec![("srv-1".to_string(), json!({"title": "v2"}))]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn create_is_dropped_after_three_failures() {
    let (h, sync) = connected().await;
    sync.cache_task(Some("T9"), json!({"title": "File taxes"}))
        .await
        .unwrap();
    h.remote.fail_next(FakeOp::Create, &unreachable(), 3);

    for attempt in 1..=2 {
        let result = sync.sync_all().await.unwrap();
        assert_eq!(result.failed, 1);
        let queue = h.db.dequeue_all().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].retry_count, attempt);
        assert!(queue[0].last_error.is_some());
    }

    let result = sync.sync_all().await.unwrap();
    assert!(!result.success);
    assert_eq!(result.failed, 1);
    assert!(result.errors[0].contains("Gave up after 3 attempts"));
    assert_eq!(h.db.queue_len().await.unwrap(), 0);
    assert_eq!(h.remote.count_calls("POST /tasks"), 3);
    assert!(h.remote.live_records(Collection::Tasks).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_changes_are_merged_into_cache() {
    let (h, sync) = connected().await;
    h.remote
        .put_remote(Collection::People, "p1", 1_000, json!({"name": "Grace"}));

    let result = sync.sync_all().await.unwrap();
    assert_eq!(result.synced, 1);
    let people = sync.get_cached_people().await.unwrap();
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].remote_id.as_deref(), Some("p1"));
    assert_eq!(people[0].sync_status, SyncStatus::Synced);
    assert_eq!(people[0].remote_updated_at, Some(1_000));
    assert_eq!(people[0].payload, json!({"name": "Grace"}));

    let later = now_millis() + 60_000;
    h.remote
        .put_remote(Collection::People, "p1", later, json!({"name": "Grace Hopper"}));
    sync.sync_all().await.unwrap();

    let people = sync.get_cached_people().await.unwrap();
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].payload, json!({"name": "Grace Hopper"}));
    assert_eq!(people[0].remote_updated_at, Some(later));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_fetch_keeps_the_checkpoint() {
    let (h, sync) = connected().await;
    h.remote.fail_next(FakeOp::Fetch, &TransportError::Timeout, 1);

    let result = sync.sync_all().await.unwrap();

    assert_eq!(result.failed, 1);
    assert!(result.errors[0].contains("notes"));
    assert!(h.db.get_checkpoint(Collection::Notes).await.unwrap().is_none());
    assert!(h.db.get_checkpoint(Collection::People).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_edit_older_than_remote_becomes_conflict() {
    let (h, sync) = connected().await;
    seed_pending(&h, "N2", "srv-9", 1_000_000).await;
    h.remote
        .put_remote(Collection::Notes, "srv-9", 1_300_000, json!({"title": "server"}));

    let result = sync.sync_all().await.unwrap();

    assert_eq!(result.conflicts, 1);
    let record = note(&sync, "N2").await;
    assert_eq!(record.sync_status, SyncStatus::Conflict);
    assert_eq!(record.payload, json!({"title": "local edit"}));

    let conflicts = sync.get_conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].record_id, "N2");
    assert_eq!(conflicts[0].reason, ConflictReason::RemoteNewer);
    assert_eq!(conflicts[0].remote_data, json!({"title": "server"}));
    assert_eq!(conflicts[0].remote_updated_at, Some(1_300_000));
    // Conflicted records are never pushed.
    assert_eq!(h.remote.count_calls("PUT"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_edit_newer_than_remote_is_pushed() {
    let (h, sync) = connected().await;
    seed_pending(&h, "N2", "srv-9", 1_000_000).await;
    h.remote
        .put_remote(Collection::Notes, "srv-9", 900_000, json!({"title": "server"}));

    let result = sync.sync_all().await.unwrap();

    assert_eq!(result.conflicts, 0);
    assert_eq!(h.remote.count_calls("PUT /notes/srv-9"), 1);
    assert_eq!(
        h.remote.remote(Collection::Notes, "srv-9").unwrap().fields,
        json!({"title": "local edit"})
    );
    assert_eq!(note(&sync, "N2").await.sync_status, SyncStatus::Synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn keep_remote_clears_conflict() {
    let (h, sync) = connected().await;
    seed_pending(&h, "N2", "srv-9", 1_000_000).await;
    h.remote
        .put_remote(Collection::Notes, "srv-9", 1_300_000, json!({"title": "server"}));
    sync.sync_all().await.unwrap();

    sync.resolve_conflict("notes:N2", ConflictResolution::keep_remote())
        .await
        .unwrap();

    let record = note(&sync, "N2").await;
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert_eq!(record.payload, json!({"title": "server"}));
    assert_eq!(record.remote_updated_at, Some(1_300_000));
    assert!(sync.get_conflicts().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn keep_local_pushes_local_version() {
    let (h, sync) = connected().await;
    seed_pending(&h, "N2", "srv-9", 1_000_000).await;
    h.remote
        .put_remote(Collection::Notes, "srv-9", 1_300_000, json!({"title": "server"}));
    sync.sync_all().await.unwrap();

    sync.resolve_conflict("notes:N2", ConflictResolution::keep_local())
        .await
        .unwrap();

    assert_eq!(
        h.remote.remote(Collection::Notes, "srv-9").unwrap().fields,
        json!({"title": "local edit"})
    );
    let record = note(&sync, "N2").await;
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert_eq!(record.payload, json!({"title": "local edit"}));
    assert!(sync.get_conflicts().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_resolution_keeps_conflict() {
    let (h, sync) = connected().await;
    seed_pending(&h, "N2", "srv-9", 1_000_000).await;
    h.remote
        .put_remote(Collection::Notes, "srv-9", 1_300_000, json!({"title": "server"}));
    sync.sync_all().await.unwrap();
    h.remote.fail_next(FakeOp::Update, &TransportError::Timeout, 1);

    let error = sync
        .resolve_conflict("notes:N2", ConflictResolution::keep_local())
        .await
        .unwrap_err();

    assert!(matches!(error, SyncError::Transport(TransportError::Timeout)));
    assert_eq!(sync.get_conflicts().await.unwrap().len(), 1);
    assert_eq!(note(&sync, "N2").await.sync_status, SyncStatus::Conflict);
}

#[tokio::test(flavor = "multi_thread")]
async fn resolution_rejects_bad_requests() {
    let (h, sync) = connected().await;
    seed_pending(&h, "N2", "srv-9", 1_000_000).await;
    h.remote
        .put_remote(Collection::Notes, "srv-9", 1_300_000, json!({"title": "server"}));
    sync.sync_all().await.unwrap();

    let missing = sync
        .resolve_conflict("nope", ConflictResolution::keep_remote())
        .await;
    assert!(matches!(missing, Err(SyncError::ConflictNotFound(id)) if id == "nope"));

    let no_data = sync
        .resolve_conflict(
            "notes:N2",
            ConflictResolution {
                strategy: ResolutionStrategy::Merge,
                merged_data: None,
            },
        )
        .await;
    assert!(matches!(no_data, Err(SyncError::MergeDataRequired)));
    assert_eq!(sync.get_conflicts().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn server_rejected_edit_is_resolved_by_merge() {
    let (h, sync) = connected().await;
    sync.cache_note(Some("N1"), json!({"title": "first"}))
        .await
        .unwrap();
    sync.sync_all().await.unwrap();

    // Edited offline at "10:00"; another device saved at "10:05".
    sync.cache_note(Some("N1"), json!({"title": "mine"}))
        .await
        .unwrap();
    h.remote.put_remote(
        Collection::Notes,
        "srv-1",
        now_millis() + 5 * 60_000,
        json!({"title": "theirs"}),
    );
    h.remote.conflict_on("srv-1");

    let result = sync.sync_all().await.unwrap();
    assert!(result.success);
    assert_eq!(result.conflicts, 1);
    let conflicts = sync.get_conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].record_id, "N1");
    assert_eq!(conflicts[0].reason, ConflictReason::RemoteRejected);
    assert_eq!(conflicts[0].local_data, json!({"title": "mine"}));
    assert_eq!(conflicts[0].remote_data, json!({"title": "theirs"}));
    assert_eq!(h.db.queue_len().await.unwrap(), 0);

    h.remote.clear_conflict("srv-1");
    let merged = json!({"title": "mine + theirs"});
    sync.resolve_conflict("notes:N1", ConflictResolution::merge(merged.clone()))
        .await
        .unwrap();

    let record = note(&sync, "N1").await;
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert_eq!(record.payload, merged);
    assert_eq!(
        h.remote.remote(Collection::Notes, "srv-1").unwrap().fields,
        merged
    );
    assert!(sync.get_conflicts().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn same_local_id_conflicts_in_two_collections() {
    let (h, sync) = connected().await;
    seed_pending_in(&h, Collection::Notes, "X", "srv-n", 1_000_000).await;
    seed_pending_in(&h, Collection::Tasks, "X", "srv-t", 1_000_000).await;
    h.remote
        .put_remote(Collection::Notes, "srv-n", 1_300_000, json!({"title": "server note"}));
    h.remote
        .put_remote(Collection::Tasks, "srv-t", 1_300_000, json!({"title": "server task"}));

    let result = sync.sync_all().await.unwrap();
    assert_eq!(result.conflicts, 2);
    let mut ids: Vec<String> = sync
        .get_conflicts()
        .await
        .unwrap()
        .into_iter()
        .map(|conflict| conflict.id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["notes:X".to_string(), "tasks:X".to_string()]);

    sync.resolve_conflict("tasks:X", ConflictResolution::keep_remote())
        .await
        .unwrap();

    let task = sync
        .get_cached(Collection::Tasks, "X")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.sync_status, SyncStatus::Synced);
    assert_eq!(task.payload, json!({"title": "server task"}));
    assert_eq!(note(&sync, "X").await.sync_status, SyncStatus::Conflict);
    let remaining = sync.get_conflicts().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "notes:X");
}

#[tokio::test(flavor = "multi_thread")]
async fn keep_remote_without_server_snapshot_restores_server_copy() {
    let (h, sync) = connected().await;
    sync.cache_note(Some("N1"), json!({"title": "first"}))
        .await
        .unwrap();
    sync.sync_all().await.unwrap();

    sync.cache_note(Some("N1"), json!({"title": "mine"}))
        .await
        .unwrap();
    h.remote
        .fail_next(FakeOp::Update, &TransportError::Conflict { remote: None }, 1);
    let result = sync.sync_all().await.unwrap();
    assert_eq!(result.conflicts, 1);
    let conflicts = sync.get_conflicts().await.unwrap();
    assert_eq!(conflicts[0].reason, ConflictReason::RemoteRejected);
    assert_eq!(conflicts[0].remote_data, Value::Null);

    sync.resolve_conflict("notes:N1", ConflictResolution::keep_remote())
        .await
        .unwrap();

    let record = note(&sync, "N1").await;
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert_eq!(record.remote_id.as_deref(), Some("srv-1"));
    assert_eq!(record.payload, json!({"title": "first"}));
    assert!(sync.get_conflicts().await.unwrap().is_empty());
    assert_eq!(
        h.remote.live_records(Collection::Notes),
        vec![("srv-1".to_string(), json!({"title": "first"}))]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn local_delete_is_pushed() {
    let (h, sync) = connected().await;
    let record = sync
        .cache_note(None, json!({"title": "temp"}))
        .await
        .unwrap();
    sync.sync_all().await.unwrap();

    assert!(sync
        .delete_cached(Collection::Notes, &record.local_id)
        .await
        .unwrap());
    let result = sync.sync_all().await.unwrap();

    assert!(result.success);
    assert_eq!(h.remote.count_calls("DELETE /notes/srv-1"), 1);
    assert!(h.remote.live_records(Collection::Notes).is_empty());
    assert!(sync.get_cached_notes().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn deleting_unpushed_record_sends_nothing() {
    let (h, sync) = connected().await;
    let record = sync
        .cache_note(None, json!({"title": "scratch"}))
        .await
        .unwrap();
    sync.delete_cached(Collection::Notes, &record.local_id)
        .await
        .unwrap();

    sync.sync_all().await.unwrap();

    assert_eq!(h.remote.count_calls("POST /notes"), 0);
    assert_eq!(h.remote.count_calls("DELETE"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_during_create_removes_server_copy() {
    let (h, sync) = connected().await;
    let record = sync
        .cache_note(None, json!({"title": "short-lived"}))
        .await
        .unwrap();
    let hold = h.remote.hold_writes().await;

    let running = tokio::spawn({
        let sync = sync.clone();
        async move { sync.sync_all().await }
    });
    while h.remote.count_calls("POST /notes") == 0 {
        tokio::task::yield_now().await;
    }
    assert!(sync
        .delete_cached(Collection::Notes, &record.local_id)
        .await
        .unwrap());
    drop(hold);

    let result = running.await.unwrap().unwrap();
    assert!(result.success);
    let queue = h.db.dequeue_all().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].operation, MutationOperation::Delete);
    assert_eq!(queue[0].remote_id(), Some("srv-1"));

    sync.sync_all().await.unwrap();
    assert_eq!(h.remote.count_calls("DELETE /notes/srv-1"), 1);
    assert!(h.remote.live_records(Collection::Notes).is_empty());
    assert!(sync.get_cached_notes().await.unwrap().is_empty());
    assert_eq!(h.db.queue_len().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_during_failed_push_keeps_pass_running() {
    let (h, sync) = connected().await;
    let record = sync
        .cache_note(None, json!({"title": "short-lived"}))
        .await
        .unwrap();
    h.remote.fail_next(FakeOp::Create, &TransportError::Timeout, 1);
    let hold = h.remote.hold_writes().await;

    let running = tokio::spawn({
        let sync = sync.clone();
        async move { sync.sync_all().await }
    });
    while h.remote.count_calls("POST /notes") == 0 {
        tokio::task::yield_now().await;
    }
    sync.delete_cached(Collection::Notes, &record.local_id)
        .await
        .unwrap();
    drop(hold);

    let result = running.await.unwrap().unwrap();
    assert_eq!(result.failed, 1);
    assert_eq!(h.db.queue_len().await.unwrap(), 0);
    assert!(h.remote.live_records(Collection::Notes).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_deletion_removes_synced_copy() {
    let (h, sync) = connected().await;
    h.remote
        .put_remote(Collection::Tasks, "t1", 1_000, json!({"title": "Call Ada"}));
    sync.sync_all().await.unwrap();
    assert_eq!(sync.get_cached_tasks().await.unwrap().len(), 1);

    h.remote
        .delete_remote(Collection::Tasks, "t1", now_millis() + 60_000);
    sync.sync_all().await.unwrap();

    assert!(sync.get_cached_tasks().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_deletion_of_pending_record_conflicts() {
    let (h, sync) = connected().await;
    seed_pending(&h, "N2", "srv-9", 1_000_000).await;
    h.remote
        .put_remote(Collection::Notes, "srv-9", 1_100_000, json!({"title": "server"}));
    h.remote.delete_remote(Collection::Notes, "srv-9", 1_200_000);

    let result = sync.sync_all().await.unwrap();
    assert_eq!(result.conflicts, 1);
    let conflicts = sync.get_conflicts().await.unwrap();
    assert_eq!(conflicts[0].reason, ConflictReason::RemoteDeleted);
    assert_eq!(conflicts[0].remote_data, Value::Null);

    sync.resolve_conflict("notes:N2", ConflictResolution::keep_remote())
        .await
        .unwrap();
    assert!(sync.get_cached_notes().await.unwrap().is_empty());
    assert!(sync.get_conflicts().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_token_mid_pass_is_refreshed() {
    let (h, sync) = connected().await;
    sync.cache_note(None, json!({"title": "hello"}))
        .await
        .unwrap();
    h.remote.expire_access_tokens();

    let result = sync.sync_all().await.unwrap();

    assert!(result.success);
    assert_eq!(h.remote.count_calls("POST /auth/refresh"), 1);
    assert_eq!(h.remote.count_calls("POST /notes"), 2);
    assert_eq!(h.remote.live_records(Collection::Notes).len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_session_mid_pass_fails_per_record() {
    let (h, sync) = connected().await;
    sync.cache_note(None, json!({"title": "hello"}))
        .await
        .unwrap();
    h.remote.expire_access_tokens();
    h.remote.revoke_refresh_tokens();

    let result = sync.sync_all().await.unwrap();

    // The queued create plus one fetch per collection.
    assert_eq!(result.failed, 4);
    assert!(!result.success);
    assert_eq!(h.session.status().state, ConnectionStatus::Reconnecting);
    assert_eq!(h.db.queue_len().await.unwrap(), 1);
    assert!(h.db.list_checkpoints().await.unwrap().is_empty());
    assert!(!sync.is_syncing());
}

#[tokio::test(flavor = "multi_thread")]
async fn conflicts_survive_coordinator_restart() {
    let (h, sync) = connected().await;
    seed_pending(&h, "N2", "srv-9", 1_000_000).await;
    h.remote
        .put_remote(Collection::Notes, "srv-9", 1_300_000, json!({"title": "server"}));
    sync.sync_all().await.unwrap();
    drop(sync);

    let restarted = coordinator(&h).await;

    let conflicts = restarted.get_conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].record_id, "N2");
    let status = restarted.get_sync_status().await.unwrap();
    assert_eq!(status.conflicts, conflicts);
}

#[tokio::test(flavor = "multi_thread")]
async fn cache_writes_reject_non_object_payloads() {
    let (_h, sync) = connected().await;
    let result = sync.cache_person(None, json!("Grace")).await;
    assert!(matches!(result, Err(SyncError::InvalidInput(_))));
    assert!(sync.get_cached_people().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn auto_sync_runs_on_interval() {
    let (h, sync) = connected().await;
    sync.start_auto_sync();
    sync.cache_note(None, json!({"title": "later"}))
        .await
        .unwrap();

    h.advance(Duration::from_secs(299)).await;
    assert_eq!(h.remote.count_calls("POST /notes"), 0);

    h.advance(Duration::from_secs(1)).await;
    assert_eq!(h.remote.count_calls("POST /notes"), 1);
    let status = sync.get_sync_status().await.unwrap();
    assert!(status.last_result.is_some());
    assert!(status.next_sync_at.is_some());

    h.advance(Duration::from_secs(300)).await;
    assert_eq!(h.remote.count_calls("GET /notes"), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn auto_sync_skips_while_disconnected_and_keeps_ticking() {
    let (h, sync) = connected().await;
    sync.start_auto_sync();
    h.session.disconnect().await;

    h.advance(Duration::from_secs(300)).await;
    assert_eq!(h.remote.count_calls("GET /notes"), 0);
    assert!(sync.get_sync_status().await.unwrap().next_sync_at.is_some());

    h.connect().await;
    h.advance(Duration::from_secs(300)).await;
    assert_eq!(h.remote.count_calls("GET /notes"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn auto_sync_survives_failed_passes() {
    let (h, sync) = connected().await;
    sync.start_auto_sync();
    h.remote.fail_next(FakeOp::Fetch, &unreachable(), 3);

    h.advance(Duration::from_secs(300)).await;
    let status = sync.get_sync_status().await.unwrap();
    assert_eq!(status.last_result.map(|result| result.failed), Some(3));

    h.advance(Duration::from_secs(300)).await;
    assert_eq!(h.remote.count_calls("GET /notes"), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn auto_sync_can_be_disabled_and_retimed() {
    let (h, sync) = connected().await;
    sync.start_auto_sync();

    sync.set_auto_sync_enabled(false);
    let status = sync.get_sync_status().await.unwrap();
    assert!(!status.auto_sync_enabled);
    assert_eq!(status.next_sync_at, None);
    h.advance(Duration::from_secs(600)).await;
    assert_eq!(h.remote.count_calls("GET /notes"), 0);

    sync.set_auto_sync_enabled(true);
    sync.set_auto_sync_interval(Duration::from_secs(60)).unwrap();
    assert_eq!(
        sync.get_sync_status().await.unwrap().auto_sync_interval_secs,
        60
    );
    h.advance(Duration::from_secs(60)).await;
    assert_eq!(h.remote.count_calls("GET /notes"), 1);

    assert!(matches!(
        sync.set_auto_sync_interval(Duration::ZERO),
        Err(SyncError::InvalidInput(_))
    ));
}

#[test]
fn strategy_parses_cli_spellings() {
    assert_eq!(
        "keep-local".parse::<ResolutionStrategy>(),
        Ok(ResolutionStrategy::KeepLocal)
    );
    assert_eq!(
        "keep_remote".parse::<ResolutionStrategy>(),
        Ok(ResolutionStrategy::KeepRemote)
    );
    assert_eq!("MERGE".parse::<ResolutionStrategy>(), Ok(ResolutionStrategy::Merge));
    assert!("both".parse::<ResolutionStrategy>().is_err());
}

#[test]
fn resolution_deserializes_from_camel_case() {
    let resolution: ConflictResolution =
        serde_json::from_str(r#"{"strategy":"merge","mergedData":{"title":"x"}}"#).unwrap();
    assert_eq!(resolution, ConflictResolution::merge(json!({"title": "x"})));
}
