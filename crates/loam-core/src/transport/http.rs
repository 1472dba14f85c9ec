//! reqwest-backed transport for the sync REST API.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    AuthGrant, HealthInfo, RemoteRecord, RemoteTransport, TransportError, TransportResult,
};
use crate::models::Collection;

/// HTTP implementation of [`RemoteTransport`].
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> TransportResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("loam/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| TransportError::Unreachable(error.to_string()))?;
        Ok(Self { client })
    }

    async fn send(&self, request: RequestBuilder) -> TransportResult<Response> {
        let response = request
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(map_request_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_status_error(status, &body))
    }

    async fn send_json(&self, request: RequestBuilder) -> TransportResult<Value> {
        let response = self.send(request).await?;
        let body = response.text().await.map_err(map_request_error)?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|error| TransportError::InvalidPayload(error.to_string()))
    }

    async fn send_auth(&self, request: RequestBuilder) -> TransportResult<AuthGrant> {
        let body = self.send_json(request).await?;
        serde_json::from_value(body)
            .map_err(|error| TransportError::InvalidPayload(format!("auth response: {error}")))
    }
}

impl RemoteTransport for HttpTransport {
    async fn health(&self, base_url: &str) -> TransportResult<HealthInfo> {
        let body = self
            .send_json(self.client.get(format!("{base_url}/health")))
            .await?;
        Ok(serde_json::from_value(body).unwrap_or_default())
    }

    async fn login(
        &self,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> TransportResult<AuthGrant> {
        let payload = json!({
            "username": username,
            "password": password,
        });
        self.send_auth(
            self.client
                .post(format!("{base_url}/auth/login"))
                .json(&payload),
        )
        .await
    }

    async fn refresh(&self, base_url: &str, refresh_token: &str) -> TransportResult<AuthGrant> {
        let payload = json!({ "refreshToken": refresh_token });
        self.send_auth(
            self.client
                .post(format!("{base_url}/auth/refresh"))
                .json(&payload),
        )
        .await
    }

    async fn logout(&self, base_url: &str, token: &str) -> TransportResult<()> {
        self.send(
            self.client
                .post(format!("{base_url}/auth/logout"))
                .bearer_auth(token),
        )
        .await?;
        Ok(())
    }

    async fn fetch_changes(
        &self,
        base_url: &str,
        token: &str,
        collection: Collection,
        since: Option<i64>,
    ) -> TransportResult<Vec<RemoteRecord>> {
        let mut request = self
            .client
            .get(format!("{base_url}/{}", collection.endpoint()))
            .bearer_auth(token);
        if let Some(since) = since {
            request = request.query(&[("since", crate::util::format_millis(since))]);
        }
        RemoteRecord::list_from_json(self.send_json(request).await?)
    }

    async fn create(
        &self,
        base_url: &str,
        token: &str,
        collection: Collection,
        body: &Value,
    ) -> TransportResult<RemoteRecord> {
        let request = self
            .client
            .post(format!("{base_url}/{}", collection.endpoint()))
            .bearer_auth(token)
            .json(body);
        RemoteRecord::single_from_json(self.send_json(request).await?)
    }

    async fn update(
        &self,
        base_url: &str,
        token: &str,
        collection: Collection,
        remote_id: &str,
        body: &Value,
    ) -> TransportResult<RemoteRecord> {
        let request = self
            .client
            .put(format!("{base_url}/{}/{remote_id}", collection.endpoint()))
            .bearer_auth(token)
            .json(body);
        let response = self.send_json(request).await?;
        if response.is_null() {
            // Some servers answer 204; the record keeps its id
            return Ok(RemoteRecord {
                id: remote_id.to_string(),
                updated_at: None,
                deleted: false,
                fields: body.clone(),
            });
        }
        RemoteRecord::single_from_json(response)
    }

    async fn delete(
        &self,
        base_url: &str,
        token: &str,
        collection: Collection,
        remote_id: &str,
    ) -> TransportResult<()> {
        let request = self
            .client
            .delete(format!("{base_url}/{}/{remote_id}", collection.endpoint()))
            .bearer_auth(token);
        match self.send(request).await {
            // Already gone on the server
            Err(TransportError::Http { status: 404, .. }) | Ok(_) => Ok(()),
            Err(error) => Err(error),
        }
    }
}

fn map_request_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_decode() || error.is_body() {
        TransportError::InvalidPayload(error.to_string())
    } else {
        TransportError::Unreachable(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &str) -> TransportError {
    match status {
        StatusCode::UNAUTHORIZED => TransportError::Unauthorized(parse_api_error(status, body)),
        StatusCode::FORBIDDEN => TransportError::Forbidden(parse_api_error(status, body)),
        StatusCode::CONFLICT => TransportError::Conflict {
            remote: parse_conflict_body(body),
        },
        _ => TransportError::Http {
            status: status.as_u16(),
            message: parse_api_error(status, body),
        },
    }
}

/// Server copy of the record from a 409 body, when it sent one.
fn parse_conflict_body(body: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(body).ok()?;
    let Value::Object(mut object) = value else {
        return None;
    };
    for key in ["remote", "current", "data"] {
        if let Some(found @ Value::Object(_)) = object.remove(key) {
            return Some(found);
        }
    }
    object.contains_key("id").then_some(Value::Object(object))
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<String>,
    message: Option<String>,
    detail: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorResponse>(body) {
        if let Some(message) = payload.message.or(payload.detail).or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = crate::util::compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
