//! Sync conflict model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::Collection;

/// Why a record was flagged as conflicting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// Server version is newer than pending local edits
    RemoteNewer,
    /// Server answered a push with 409
    RemoteRejected,
    /// Server deleted a record that has pending local edits
    RemoteDeleted,
}

impl ConflictReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RemoteNewer => "remote_newer",
            Self::RemoteRejected => "remote_rejected",
            Self::RemoteDeleted => "remote_deleted",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remote_newer" => Ok(Self::RemoteNewer),
            "remote_rejected" => Ok(Self::RemoteRejected),
            "remote_deleted" => Ok(Self::RemoteDeleted),
            other => Err(format!("unknown conflict reason '{other}'")),
        }
    }
}

/// Unresolved divergence between a local record and its server version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict identifier, `<collection>:<local id>` (see [`SyncConflict::key`])
    pub id: String,
    /// Local id of the conflicting record
    pub record_id: String,
    pub entity_type: Collection,
    pub local_data: Value,
    /// Server snapshot; `Null` when the server supplied none
    pub remote_data: Value,
    pub remote_id: Option<String>,
    pub remote_updated_at: Option<i64>,
    pub reason: ConflictReason,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
}

impl SyncConflict {
    /// Identifier of the conflict on one record. Local ids are only unique
    /// within a collection, so the key carries both.
    pub fn key(collection: Collection, record_id: &str) -> String {
        format!("{}:{record_id}", collection.as_str())
    }
}
