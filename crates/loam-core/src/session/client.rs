//! Authenticated client handle handed to the coordinator.

use std::future::Future;

use serde_json::Value;

use super::SessionManager;
use crate::models::Collection;
use crate::transport::{RemoteRecord, RemoteTransport, TransportError, TransportResult};

/// Issues authenticated calls on behalf of the current session.
///
/// The bearer token is read from the session on every call, so a refresh
/// is picked up immediately. A call answered with 401 triggers one refresh
/// and one retry; once the session is gone calls fail with
/// [`TransportError::NotConnected`].
pub struct AuthedClient<T: RemoteTransport> {
    session: SessionManager<T>,
}

impl<T: RemoteTransport> Clone for AuthedClient<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
        }
    }
}

impl<T: RemoteTransport> AuthedClient<T> {
    pub(crate) const fn new(session: SessionManager<T>) -> Self {
        Self { session }
    }

    async fn call<R, F, Fut>(&self, call: F) -> TransportResult<R>
    where
        F: Fn(T, String, String) -> Fut,
        Fut: Future<Output = TransportResult<R>>,
    {
        let (base_url, token) = self
            .session
            .credentials()
            .ok_or(TransportError::NotConnected)?;

        match call(self.session.transport().clone(), base_url, token).await {
            Err(TransportError::Unauthorized(message)) => {
                tracing::debug!("Request rejected ({message}); refreshing token and retrying");
                if !self.session.refresh_token().await {
                    return Err(TransportError::NotConnected);
                }
                let (base_url, token) = self
                    .session
                    .credentials()
                    .ok_or(TransportError::NotConnected)?;
                call(self.session.transport().clone(), base_url, token).await
            }
            other => other,
        }
    }

    pub async fn fetch_changes(
        &self,
        collection: Collection,
        since: Option<i64>,
    ) -> TransportResult<Vec<RemoteRecord>> {
        self.call(|transport, base_url, token| async move {
            transport
                .fetch_changes(&base_url, &token, collection, since)
                .await
        })
        .await
    }

    pub async fn create(&self, collection: Collection, body: &Value) -> TransportResult<RemoteRecord> {
        self.call(|transport, base_url, token| async move {
            transport.create(&base_url, &token, collection, body).await
        })
        .await
    }

    pub async fn update(
        &self,
        collection: Collection,
        remote_id: &str,
        body: &Value,
    ) -> TransportResult<RemoteRecord> {
        self.call(|transport, base_url, token| async move {
            transport
                .update(&base_url, &token, collection, remote_id, body)
                .await
        })
        .await
    }

    pub async fn delete(&self, collection: Collection, remote_id: &str) -> TransportResult<()> {
        self.call(|transport, base_url, token| async move {
            transport
                .delete(&base_url, &token, collection, remote_id)
                .await
        })
        .await
    }
}
