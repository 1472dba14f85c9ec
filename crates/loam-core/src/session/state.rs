//! Connection state owned by the session manager

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Lifecycle of the authenticated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connection lost; backoff attempts in progress
    Reconnecting,
    /// Reconnection gave up; needs a manual connect
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Default)]
pub(crate) struct ConnectionState {
    pub status: ConnectionStatus,
    pub profile_id: Option<String>,
    pub base_url: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Unix ms
    pub token_expires_at: Option<i64>,
    pub api_version: Option<String>,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl ConnectionState {
    /// Base URL and bearer token, when the connection is live.
    pub fn credentials(&self) -> Option<(String, String)> {
        if self.status != ConnectionStatus::Connected {
            return None;
        }
        Some((self.base_url.clone()?, self.access_token.clone()?))
    }

    pub fn clear_tokens(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
        self.token_expires_at = None;
    }

    pub fn snapshot(&self) -> SessionStatus {
        SessionStatus {
            state: self.status,
            connected: self.status == ConnectionStatus::Connected,
            is_reconnecting: self.status == ConnectionStatus::Reconnecting,
            profile_id: self.profile_id.clone(),
            error: self.last_error.clone(),
            reconnect_attempts: self.reconnect_attempts,
            api_version: self.api_version.clone(),
            token_expires_at: self.token_expires_at,
        }
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConnectionState")
            .field("status", &self.status)
            .field("profile_id", &self.profile_id)
            .field("base_url", &self.base_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_expires_at", &self.token_expires_at)
            .field("last_error", &self.last_error)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of the session for callers to poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: ConnectionStatus,
    pub connected: bool,
    pub is_reconnecting: bool,
    pub profile_id: Option<String>,
    pub error: Option<String>,
    pub reconnect_attempts: u32,
    pub api_version: Option<String>,
    /// Unix ms
    pub token_expires_at: Option<i64>,
}
