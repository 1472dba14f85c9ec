//! Remote server transport.
//!
//! [`RemoteTransport`] is the seam between the engine and the network: the
//! session manager and coordinator only ever talk to the server through it,
//! so tests substitute an in-memory server.

mod http;

use std::fmt;
use std::future::Future;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::Collection;

pub use http::HttpTransport;

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// DNS failure, refused connection, or other network-level failure
    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("Request timed out")]
    Timeout,

    /// HTTP 401
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP 403
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// HTTP 409; carries the server's version of the record when it sent one
    #[error("Remote conflict")]
    Conflict { remote: Option<Value> },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The server answered with a body the engine cannot interpret
    #[error("Invalid response payload: {0}")]
    InvalidPayload(String),

    /// No live session to authenticate the call
    #[error("Not connected")]
    NotConnected,
}

impl TransportError {
    /// Whether the failure means the server could not be reached at all.
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout)
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A record as the server reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub id: String,
    /// Server `updatedAt` (Unix ms), when present
    pub updated_at: Option<i64>,
    /// Tombstone flag
    pub deleted: bool,
    /// Entity fields, without the envelope keys
    pub fields: Value,
}

const ENVELOPE_KEYS: [&str; 5] = ["id", "updatedAt", "updated_at", "deleted", "deletedAt"];

impl RemoteRecord {
    /// Parse one record from its JSON wire form.
    pub fn from_json(value: Value) -> TransportResult<Self> {
        let Value::Object(mut object) = value else {
            return Err(TransportError::InvalidPayload(
                "expected a JSON object".to_string(),
            ));
        };

        let id = match object.get("id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(TransportError::InvalidPayload(
                    "record has no id".to_string(),
                ))
            }
        };
        let updated_at = object
            .get("updatedAt")
            .or_else(|| object.get("updated_at"))
            .and_then(crate::util::parse_timestamp_millis);
        let deleted = object.get("deleted").and_then(Value::as_bool).unwrap_or(false)
            || object.get("deletedAt").is_some_and(|value| !value.is_null());

        for key in ENVELOPE_KEYS {
            object.remove(key);
        }

        Ok(Self {
            id,
            updated_at,
            deleted,
            fields: Value::Object(object),
        })
    }

    /// Parse a list response: a bare array or an object wrapping one in
    /// `data` or `records`.
    pub fn list_from_json(value: Value) -> TransportResult<Vec<Self>> {
        let items = match value {
            Value::Array(items) => items,
            Value::Object(mut object) => match object
                .remove("data")
                .or_else(|| object.remove("records"))
            {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(TransportError::InvalidPayload(
                        "expected a list of records".to_string(),
                    ))
                }
            },
            _ => {
                return Err(TransportError::InvalidPayload(
                    "expected a list of records".to_string(),
                ))
            }
        };
        items.into_iter().map(Self::from_json).collect()
    }

    /// Parse a single-record response, unwrapping a `data` envelope.
    pub fn single_from_json(value: Value) -> TransportResult<Self> {
        match value {
            Value::Object(mut object) if matches!(object.get("data"), Some(Value::Object(_))) => {
                Self::from_json(object.remove("data").unwrap_or(Value::Null))
            }
            other => Self::from_json(other),
        }
    }
}

/// Body sent for a create or update: entity fields without sync metadata.
pub fn outbound_body(payload: &Value) -> Value {
    match payload {
        Value::Object(object) => {
            let fields: Map<String, Value> = object
                .iter()
                .filter(|(key, _)| !ENVELOPE_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            Value::Object(fields)
        }
        other => other.clone(),
    }
}

/// Liveness probe answer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct HealthInfo {
    #[serde(default)]
    pub version: Option<String>,
}

/// Tokens issued by login or refresh.
#[derive(Clone, PartialEq, Deserialize)]
pub struct AuthGrant {
    #[serde(alias = "accessToken", alias = "access_token")]
    pub token: String,
    #[serde(default, rename = "refreshToken", alias = "refresh_token")]
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds
    #[serde(default, rename = "expiresIn", alias = "expires_in")]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub user: Option<Value>,
}

impl fmt::Debug for AuthGrant {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthGrant")
            .field("token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_in", &self.expires_in)
            .field("user", &self.user)
            .finish()
    }
}

/// Remote API used by the session manager and coordinator.
///
/// Every method takes the server base URL; authenticated methods also take
/// the bearer token. Implementations bound each call with a timeout.
pub trait RemoteTransport: Clone + Send + Sync + 'static {
    /// `GET /health`
    fn health(&self, base_url: &str) -> impl Future<Output = TransportResult<HealthInfo>> + Send;

    /// `POST /auth/login`
    fn login(
        &self,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> impl Future<Output = TransportResult<AuthGrant>> + Send;

    /// `POST /auth/refresh`
    fn refresh(
        &self,
        base_url: &str,
        refresh_token: &str,
    ) -> impl Future<Output = TransportResult<AuthGrant>> + Send;

    /// `POST /auth/logout`
    fn logout(&self, base_url: &str, token: &str)
        -> impl Future<Output = TransportResult<()>> + Send;

    /// `GET /{collection}?since=...`
    fn fetch_changes(
        &self,
        base_url: &str,
        token: &str,
        collection: Collection,
        since: Option<i64>,
    ) -> impl Future<Output = TransportResult<Vec<RemoteRecord>>> + Send;

    /// `POST /{collection}`
    fn create(
        &self,
        base_url: &str,
        token: &str,
        collection: Collection,
        body: &Value,
    ) -> impl Future<Output = TransportResult<RemoteRecord>> + Send;

    /// `PUT /{collection}/{id}`
    fn update(
        &self,
        base_url: &str,
        token: &str,
        collection: Collection,
        remote_id: &str,
        body: &Value,
    ) -> impl Future<Output = TransportResult<RemoteRecord>> + Send;

    /// `DELETE /{collection}/{id}`
    fn delete(
        &self,
        base_url: &str,
        token: &str,
        collection: Collection,
        remote_id: &str,
    ) -> impl Future<Output = TransportResult<()>> + Send;
}
