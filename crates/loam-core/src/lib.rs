//! loam-core - Core library for Loam
//!
//! This crate contains the offline-first synchronization engine shared by all
//! Loam front-ends: the libSQL-backed local cache and mutation queue, the
//! session manager that owns the authenticated server connection, and the
//! coordinator that drives sync passes and conflict resolution.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod services;
pub mod session;
pub mod sync;
pub mod transport;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use models::{Collection, ConnectionProfile, SyncConflict, SyncRecord, SyncStatus};
pub use session::{SessionError, SessionManager};
pub use sync::{SyncCoordinator, SyncError, SyncResult};
