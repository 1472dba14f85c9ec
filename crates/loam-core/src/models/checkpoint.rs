//! Per-collection sync watermark

use serde::{Deserialize, Serialize};

use super::Collection;

/// How far a collection's remote pull has progressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub collection: Collection,
    /// Watermark sent as `since` on the next pull (Unix ms)
    pub last_synced_at: i64,
    /// Opaque server cursor, when the server issues one
    pub sync_token: Option<String>,
}
