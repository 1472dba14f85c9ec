//! Data models for Loam

mod checkpoint;
mod mutation;
mod profile;
mod record;
mod sync_conflict;

pub use checkpoint::SyncCheckpoint;
pub use mutation::{MutationOperation, QueuedMutation};
pub use profile::{ConnectionProfile, ProfileConfig};
pub use record::{Collection, SyncRecord, SyncStatus};
pub use sync_conflict::{ConflictReason, SyncConflict};
