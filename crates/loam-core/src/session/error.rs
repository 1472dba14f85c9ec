//! Session error types

use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the session manager
#[derive(Debug, Error)]
pub enum SessionError {
    /// Server rejected the username/password (HTTP 401)
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Login failed for a reason other than bad credentials
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Server refused the account (HTTP 403)
    #[error("Account is disabled: {0}")]
    AccountDisabled(String),

    /// DNS failure, refused connection, or timeout
    #[error("Server unreachable: {0}")]
    ServerUnreachable(String),

    #[error("Secure credential storage is not available on this system")]
    SecureStorageUnavailable,

    #[error("Secure storage error: {0}")]
    SecureStorage(String),

    /// No password was supplied and none is stored for the profile
    #[error("A password is required for profile {0}")]
    PasswordRequired(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Not connected")]
    NotConnected,

    /// Automatic reconnection gave up
    #[error("Reconnection failed after {0} attempts")]
    MaxRetriesExceeded(u32),

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error(transparent)]
    Storage(#[from] crate::Error),
}

impl SessionError {
    /// Map a health-probe failure.
    pub(crate) fn from_probe(error: TransportError) -> Self {
        Self::ServerUnreachable(error.to_string())
    }

    /// Map a login or refresh failure.
    pub(crate) fn from_auth(error: TransportError) -> Self {
        match error {
            TransportError::Unauthorized(_) => Self::InvalidCredentials,
            TransportError::Forbidden(message) => Self::AccountDisabled(message),
            error if error.is_network() => Self::ServerUnreachable(error.to_string()),
            error => Self::AuthenticationFailed(error.to_string()),
        }
    }
}
