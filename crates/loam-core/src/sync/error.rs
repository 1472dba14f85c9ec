//! Sync error types

use thiserror::Error;

use crate::session::SessionError;
use crate::transport::TransportError;

/// Errors surfaced by the sync coordinator
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("A sync pass is already in progress")]
    SyncAlreadyInProgress,

    #[error("Not connected")]
    NotConnected,

    #[error("Conflict not found: {0}")]
    ConflictNotFound(String),

    /// `merge` resolution was requested without merged data
    #[error("Merge resolution requires merged data")]
    MergeDataRequired,

    /// `keep_remote` on a conflict whose server snapshot has no id
    #[error("Conflict {0} has no server id")]
    MissingRemoteId(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The server rejected a write with 409
    #[error("Server reported a conflict for {0}")]
    SyncConflict(String),

    #[error("Gave up after {attempts} attempts: {message}")]
    MaxRetriesExceeded { attempts: u32, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Session(SessionError),

    #[error(transparent)]
    Storage(#[from] crate::Error),
}

impl From<SessionError> for SyncError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::NotConnected => Self::NotConnected,
            SessionError::Storage(error) => Self::Storage(error),
            error => Self::Session(error),
        }
    }
}
