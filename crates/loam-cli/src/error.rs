use std::io;

use loam_core::session::SessionError;
use loam_core::sync::SyncError;
use loam_core::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] loam_core::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "No connection profile selected. Run `loam connect --host <URL> --username <NAME>` or pass --profile."
    )]
    NoProfile,
    #[error("Record not found for id/prefix: {0}")]
    RecordNotFound(String),
    #[error("{0}")]
    AmbiguousRecordId(String),
    #[error("Invalid record fields: {0}")]
    InvalidFields(String),
    #[error("Sync finished with {0} failure(s)")]
    SyncFailed(usize),
}
