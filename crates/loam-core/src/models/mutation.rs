//! Queued local mutation model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::Collection;

/// Kind of local change awaiting push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOperation {
    Create,
    Update,
    Delete,
}

impl MutationOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown mutation operation '{other}'")),
        }
    }
}

/// One entry of the durable mutation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    /// Queue position (monotonic)
    pub id: i64,
    pub operation: MutationOperation,
    pub collection: Collection,
    /// Local id of the affected record
    pub record_id: String,
    pub payload: Option<Value>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
}

impl QueuedMutation {
    /// Remote id carried by a delete mutation.
    ///
    /// The local row is gone by the time a delete drains, so the remote id
    /// travels in the payload.
    pub fn remote_id(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|payload| payload.get("remoteId"))
            .and_then(Value::as_str)
    }
}
