//! Cached entity model shared by every synced collection

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The synced entity collections.
///
/// Each variant is bound to its remote endpoint and local cache table, so an
/// unknown collection cannot reach the store or the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Notes,
    People,
    Tasks,
}

impl Collection {
    /// Every collection, in the order a pass visits them.
    pub const ALL: [Self; 3] = [Self::Notes, Self::People, Self::Tasks];

    /// Remote endpoint path segment (`/{endpoint}`).
    pub const fn endpoint(self) -> &'static str {
        match self {
            Self::Notes => "notes",
            Self::People => "people",
            Self::Tasks => "tasks",
        }
    }

    /// Local cache table name.
    pub const fn table(self) -> &'static str {
        match self {
            Self::Notes => "notes",
            Self::People => "people",
            Self::Tasks => "tasks",
        }
    }

    /// Singular entity name used in conflicts and logs.
    pub const fn entity_type(self) -> &'static str {
        match self {
            Self::Notes => "note",
            Self::People => "person",
            Self::Tasks => "task",
        }
    }

    pub const fn as_str(self) -> &'static str {
        self.endpoint()
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "notes" | "note" => Ok(Self::Notes),
            "people" | "person" => Ok(Self::People),
            "tasks" | "task" => Ok(Self::Tasks),
            other => Err(format!("unknown collection '{other}'")),
        }
    }
}

/// Synchronization state of a cached record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local edits not yet acknowledged by the server
    Pending,
    /// Matches the last known server state
    Synced,
    /// Diverged from the server; excluded from push until resolved
    Conflict,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "conflict" => Ok(Self::Conflict),
            other => Err(format!("unknown sync status '{other}'")),
        }
    }
}

/// A locally cached entity tagged with its synchronization state.
///
/// A record with `remote_id == None` has never been pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Local identifier (UUID v7)
    pub local_id: String,
    /// Server-assigned identifier, once pushed
    pub remote_id: Option<String>,
    pub sync_status: SyncStatus,
    /// Last local edit (Unix ms)
    pub last_modified_locally: i64,
    /// Server `updatedAt` of the last version seen (Unix ms)
    pub remote_updated_at: Option<i64>,
    /// Entity fields
    pub payload: Value,
}

impl SyncRecord {
    /// Create a never-pushed record with pending local edits.
    #[must_use]
    pub fn new_local(payload: Value) -> Self {
        Self::new_local_with_id(Uuid::now_v7().to_string(), payload)
    }

    #[must_use]
    pub fn new_local_with_id(local_id: impl Into<String>, payload: Value) -> Self {
        Self {
            local_id: local_id.into(),
            remote_id: None,
            sync_status: SyncStatus::Pending,
            last_modified_locally: crate::util::now_millis(),
            remote_updated_at: None,
            payload,
        }
    }

    /// Create a record that mirrors a remote version exactly.
    #[must_use]
    pub fn from_remote(remote_id: impl Into<String>, remote_updated_at: i64, payload: Value) -> Self {
        Self {
            local_id: Uuid::now_v7().to_string(),
            remote_id: Some(remote_id.into()),
            sync_status: SyncStatus::Synced,
            last_modified_locally: remote_updated_at,
            remote_updated_at: Some(remote_updated_at),
            payload,
        }
    }

    pub const fn is_pushed(&self) -> bool {
        self.remote_id.is_some()
    }
}
