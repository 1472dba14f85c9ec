//! Database layer for Loam

mod checkpoint_repository;
mod connection;
mod conflict_repository;
mod migrations;
mod profile_repository;
mod queue_repository;
mod record_repository;

pub use checkpoint_repository::{CheckpointRepository, LibSqlCheckpointRepository};
pub use conflict_repository::{ConflictRepository, LibSqlConflictRepository};
pub use connection::Database;
pub use profile_repository::{LibSqlProfileRepository, ProfileRepository};
pub use queue_repository::{LibSqlMutationQueue, MutationQueue};
pub use record_repository::{LibSqlRecordRepository, RecordRepository};
