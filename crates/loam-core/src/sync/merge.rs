//! Classification of incoming server records against the local cache.

use crate::models::{ConflictReason, SyncRecord, SyncStatus};

/// What to do with one incoming server record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    /// Not cached locally: insert as synced
    Insert,
    /// Cached and unmodified, server is newer: take the server version
    Overwrite,
    /// Cached and unmodified, server deleted it: drop the local copy
    Remove,
    /// Pending local edits older than the server change
    Conflict(ConflictReason),
    /// Nothing to do (stale update, newer local edit, or already in conflict)
    Skip,
}

/// Decide how an incoming server record merges into the cache.
pub fn classify(
    local: Option<&SyncRecord>,
    remote_updated_at: i64,
    remote_deleted: bool,
) -> MergeAction {
    let Some(local) = local else {
        return if remote_deleted {
            MergeAction::Skip
        } else {
            MergeAction::Insert
        };
    };

    match local.sync_status {
        SyncStatus::Synced => {
            let newer = !matches!(local.remote_updated_at, Some(seen) if seen >= remote_updated_at);
            match (newer, remote_deleted) {
                (false, _) => MergeAction::Skip,
                (true, false) => MergeAction::Overwrite,
                (true, true) => MergeAction::Remove,
            }
        }
        SyncStatus::Pending if local.last_modified_locally < remote_updated_at => {
            MergeAction::Conflict(if remote_deleted {
                ConflictReason::RemoteDeleted
            } else {
                ConflictReason::RemoteNewer
            })
        }
        SyncStatus::Pending | SyncStatus::Conflict => MergeAction::Skip,
    }
}
