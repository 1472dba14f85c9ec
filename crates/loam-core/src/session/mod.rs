//! Session manager: owns the one authenticated connection to the server.
//!
//! Handles profile persistence, sealed credential storage, login, scheduled
//! token refresh, and reconnection with exponential backoff. The manager is
//! an explicit, cloneable handle; there is no process-global session.

mod client;
mod error;
mod secret;
mod state;


use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::config::SyncSettings;
use crate::models::{ConnectionProfile, ProfileConfig};
use crate::scheduler::{ScheduleHandle, Scheduler};
use crate::services::DatabaseService;
use crate::transport::RemoteTransport;
use crate::util::lock;

pub use client::AuthedClient;
pub use error::{SessionError, SessionResult};
pub use secret::{SecretCipher, UnavailableCipher};
pub use state::{ConnectionStatus, SessionStatus};

use state::ConnectionState;

#[derive(Default)]
struct Timers {
    refresh: Option<ScheduleHandle>,
    reconnect: Option<ScheduleHandle>,
}

struct SessionInner<T> {
    transport: T,
    db: DatabaseService,
    cipher: Arc<dyn SecretCipher>,
    scheduler: Arc<dyn Scheduler>,
    settings: SyncSettings,
    state: Mutex<ConnectionState>,
    timers: Mutex<Timers>,
    /// Bumped whenever the connection is replaced or torn down; async work
    /// started under an older epoch discards its result.
    epoch: AtomicU64,
}

/// Handle to the session. Clones share the same connection.
pub struct SessionManager<T: RemoteTransport> {
    inner: Arc<SessionInner<T>>,
}

impl<T: RemoteTransport> Clone for SessionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: RemoteTransport> SessionManager<T> {
    pub fn new(
        transport: T,
        db: DatabaseService,
        cipher: Arc<dyn SecretCipher>,
        scheduler: Arc<dyn Scheduler>,
        settings: SyncSettings,
    ) -> Self {
        let state = ConnectionState {
            reconnect_delay: settings.reconnect_initial_delay(),
            ..ConnectionState::default()
        };
        Self {
            inner: Arc::new(SessionInner {
                transport,
                db,
                cipher,
                scheduler,
                settings,
                state: Mutex::new(state),
                timers: Mutex::new(Timers::default()),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    fn from_weak(weak: &Weak<SessionInner<T>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    pub(crate) fn transport(&self) -> &T {
        &self.inner.transport
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    fn next_epoch(&self) -> u64 {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    // Profiles

    /// Validate and persist a profile.
    pub async fn save_profile(&self, profile: &ConnectionProfile) -> SessionResult<()> {
        validate_profile(profile)?;
        self.inner.db.save_profile(profile).await?;
        Ok(())
    }

    /// Every saved profile in save order.
    pub async fn load_profiles(&self) -> SessionResult<Vec<ConnectionProfile>> {
        Ok(self.inner.db.list_profiles().await?)
    }

    pub async fn get_default_profile(&self) -> SessionResult<Option<ConnectionProfile>> {
        Ok(self.inner.db.default_profile().await?)
    }

    /// Delete a profile and its stored credential, disconnecting first if it
    /// is the active one.
    pub async fn delete_profile(&self, profile_id: &str) -> SessionResult<()> {
        if self.active_profile_id().as_deref() == Some(profile_id) {
            self.disconnect().await;
        }

        if let Some(blob) = self.inner.db.load_credential(profile_id).await? {
            if let Err(error) = self.inner.cipher.discard(&blob) {
                tracing::warn!("Failed to discard stored credential for {profile_id}: {error}");
            }
        }

        if !self.inner.db.delete_profile(profile_id).await? {
            return Err(SessionError::ProfileNotFound(profile_id.to_string()));
        }
        tracing::info!("Deleted profile {profile_id}");
        Ok(())
    }

    // Connection lifecycle

    /// Save the profile and credential, then probe and log in.
    ///
    /// Fails with [`SessionError::SecureStorageUnavailable`] when the
    /// credential cannot be sealed. Any failure leaves the session
    /// disconnected with the error recorded.
    pub async fn connect(&self, config: ProfileConfig) -> SessionResult<ConnectionProfile> {
        let profile = config.to_profile();
        let epoch = self.begin_connect(&profile.id).await;

        let result: SessionResult<ConnectionProfile> = async {
            if config.password.is_empty() {
                return Err(SessionError::PasswordRequired(profile.id.clone()));
            }
            self.save_profile(&profile).await?;
            self.store_credential(&profile.id, &config.password).await?;
            self.establish(profile, &config.password, epoch).await
        }
        .await;

        self.finish_connect(result, epoch)
    }

    /// Connect with a saved profile.
    ///
    /// Uses `password` when given (and re-seals it when storage is
    /// available), otherwise the stored credential.
    pub async fn connect_with_profile(
        &self,
        profile_id: &str,
        password: Option<String>,
    ) -> SessionResult<ConnectionProfile> {
        let profile = self
            .inner
            .db
            .get_profile(profile_id)
            .await?
            .ok_or_else(|| SessionError::ProfileNotFound(profile_id.to_string()))?;
        let epoch = self.begin_connect(&profile.id).await;

        let result: SessionResult<ConnectionProfile> = async {
            let password = match password.filter(|password| !password.is_empty()) {
                Some(password) => {
                    if self.inner.cipher.is_available() {
                        self.store_credential(&profile.id, &password).await?;
                    }
                    password
                }
                None => self
                    .stored_password(&profile.id)
                    .await?
                    .ok_or_else(|| SessionError::PasswordRequired(profile.id.clone()))?,
            };
            self.establish(profile, &password, epoch).await
        }
        .await;

        self.finish_connect(result, epoch)
    }

    /// Disconnect and connect with another saved profile.
    pub async fn switch_profile(
        &self,
        profile_id: &str,
        password: Option<String>,
    ) -> SessionResult<ConnectionProfile> {
        self.disconnect().await;
        self.connect_with_profile(profile_id, password).await
    }

    /// Best-effort logout, then drop all in-memory session state.
    pub async fn disconnect(&self) {
        self.next_epoch();
        self.cancel_timers();

        let previous = {
            let mut state = lock(&self.inner.state);
            let reconnect_delay = self.inner.settings.reconnect_initial_delay();
            std::mem::replace(
                &mut *state,
                ConnectionState {
                    reconnect_delay,
                    ..ConnectionState::default()
                },
            )
        };

        if let (Some(base_url), Some(token)) = (previous.base_url, previous.access_token) {
            if let Err(error) = self.inner.transport.logout(&base_url, &token).await {
                tracing::warn!("Logout failed: {error}");
            }
        }

        if previous.status != ConnectionStatus::Disconnected {
            tracing::info!("Disconnected");
        }
    }

    /// Probe the active server.
    ///
    /// Only changes state when a live connection turns out to be dead, in
    /// which case reconnection starts.
    pub async fn test_connection(&self) -> bool {
        let (base_url, was_connected) = {
            let state = lock(&self.inner.state);
            (
                state.base_url.clone(),
                state.status == ConnectionStatus::Connected,
            )
        };
        let Some(base_url) = base_url else {
            return false;
        };

        match self.inner.transport.health(&base_url).await {
            Ok(health) => {
                if let Some(version) = health.version {
                    lock(&self.inner.state).api_version = Some(version);
                }
                true
            }
            Err(error) => {
                tracing::debug!("Health check against {base_url} failed: {error}");
                if was_connected {
                    self.connection_lost(&format!("Health check failed: {error}"));
                }
                false
            }
        }
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.inner.state).snapshot()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.state).status == ConnectionStatus::Connected
    }

    pub fn active_profile_id(&self) -> Option<String> {
        lock(&self.inner.state).profile_id.clone()
    }

    /// Authenticated client handle, failing fast when disconnected.
    pub fn client(&self) -> SessionResult<AuthedClient<T>> {
        if self.is_connected() {
            Ok(AuthedClient::new(self.clone()))
        } else {
            Err(SessionError::NotConnected)
        }
    }

    pub(crate) fn credentials(&self) -> Option<(String, String)> {
        lock(&self.inner.state).credentials()
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Never fails: a refresh that cannot complete starts reconnection and
    /// returns `false`.
    pub async fn refresh_token(&self) -> bool {
        let epoch = self.epoch();
        let (status, base_url, refresh_token) = {
            let state = lock(&self.inner.state);
            (
                state.status,
                state.base_url.clone(),
                state.refresh_token.clone(),
            )
        };
        if status != ConnectionStatus::Connected {
            return false;
        }
        let (Some(base_url), Some(refresh_token)) = (base_url, refresh_token) else {
            self.connection_lost("Session expired and no refresh token was issued");
            return false;
        };

        match self.inner.transport.refresh(&base_url, &refresh_token).await {
            Ok(grant) => {
                if self.epoch() != epoch {
                    return false;
                }
                {
                    let mut state = lock(&self.inner.state);
                    state.access_token = Some(grant.token);
                    if let Some(refresh_token) = grant.refresh_token {
                        state.refresh_token = Some(refresh_token);
                    }
                    state.token_expires_at = expiry_millis(grant.expires_in);
                }
                self.arm_refresh(grant.expires_in, epoch);
                tracing::debug!("Refreshed access token");
                true
            }
            Err(error) => {
                tracing::warn!("Token refresh failed: {error}");
                if self.epoch() == epoch {
                    self.connection_lost(&format!("Token refresh failed: {error}"));
                }
                false
            }
        }
    }

    // Internals

    async fn begin_connect(&self, profile_id: &str) -> u64 {
        let active = lock(&self.inner.state).status != ConnectionStatus::Disconnected;
        if active {
            self.disconnect().await;
        }
        let epoch = self.next_epoch();
        self.cancel_timers();
        let mut state = lock(&self.inner.state);
        state.status = ConnectionStatus::Connecting;
        state.profile_id = Some(profile_id.to_string());
        state.last_error = None;
        epoch
    }

    fn finish_connect(
        &self,
        result: SessionResult<ConnectionProfile>,
        epoch: u64,
    ) -> SessionResult<ConnectionProfile> {
        if let Err(error) = &result {
            tracing::warn!("Connect failed: {error}");
            if self.epoch() == epoch {
                let mut state = lock(&self.inner.state);
                state.status = ConnectionStatus::Disconnected;
                state.base_url = None;
                state.clear_tokens();
                state.last_error = Some(error.to_string());
            }
        }
        result
    }

    async fn store_credential(&self, profile_id: &str, password: &str) -> SessionResult<()> {
        if !self.inner.cipher.is_available() {
            return Err(SessionError::SecureStorageUnavailable);
        }
        let blob = self.inner.cipher.encrypt(password.as_bytes())?;
        if let Some(previous) = self.inner.db.load_credential(profile_id).await? {
            if let Err(error) = self.inner.cipher.discard(&previous) {
                tracing::warn!("Failed to discard previous credential for {profile_id}: {error}");
            }
        }
        self.inner.db.save_credential(profile_id, &blob).await?;
        Ok(())
    }

    async fn stored_password(&self, profile_id: &str) -> SessionResult<Option<String>> {
        let Some(blob) = self.inner.db.load_credential(profile_id).await? else {
            return Ok(None);
        };
        if !self.inner.cipher.is_available() {
            tracing::warn!("Stored credential for {profile_id} cannot be read: secure storage unavailable");
            return Ok(None);
        }
        let plaintext = self.inner.cipher.decrypt(&blob)?;
        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|_| SessionError::SecureStorage("stored credential is not valid UTF-8".into()))
    }

    /// Probe, log in, and install the new session.
    async fn establish(
        &self,
        mut profile: ConnectionProfile,
        password: &str,
        epoch: u64,
    ) -> SessionResult<ConnectionProfile> {
        let base_url = profile.base_url().map_err(SessionError::InvalidProfile)?;

        let health = self
            .inner
            .transport
            .health(&base_url)
            .await
            .map_err(SessionError::from_probe)?;
        let grant = self
            .inner
            .transport
            .login(&base_url, &profile.username, password)
            .await
            .map_err(SessionError::from_auth)?;

        if self.epoch() != epoch {
            return Err(SessionError::NotConnected);
        }

        profile.last_used_at = Some(crate::util::now_millis());
        profile.negotiated_api_version.clone_from(&health.version);
        self.inner.db.save_profile(&profile).await?;

        {
            let mut state = lock(&self.inner.state);
            state.status = ConnectionStatus::Connected;
            state.profile_id = Some(profile.id.clone());
            state.base_url = Some(base_url.clone());
            state.access_token = Some(grant.token);
            state.refresh_token = grant.refresh_token;
            state.token_expires_at = expiry_millis(grant.expires_in);
            state.api_version = health.version;
            state.last_error = None;
            state.reconnect_attempts = 0;
            state.reconnect_delay = self.inner.settings.reconnect_initial_delay();
        }
        self.arm_refresh(grant.expires_in, epoch);

        tracing::info!(
            "Connected to {base_url} as {} (profile {})",
            profile.username,
            profile.id
        );
        Ok(profile)
    }

    /// Schedule a refresh ahead of token expiry.
    fn arm_refresh(&self, expires_in: Option<i64>, epoch: u64) {
        let Some(lifetime) = expires_in
            .and_then(|secs| u64::try_from(secs).ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
        else {
            return;
        };
        let lead = self.inner.settings.token_refresh_lead();
        // Short-lived tokens refresh at half-life instead of immediately
        let delay = if lifetime > lead {
            lifetime - lead
        } else {
            lifetime / 2
        };

        let weak = Arc::downgrade(&self.inner);
        let handle = self.inner.scheduler.schedule(
            delay,
            Box::pin(async move {
                let Some(manager) = Self::from_weak(&weak) else {
                    return;
                };
                if manager.epoch() == epoch {
                    manager.refresh_token().await;
                }
            }),
        );

        if let Some(previous) = lock(&self.inner.timers).refresh.replace(handle) {
            previous.cancel();
        }
        tracing::debug!("Token refresh scheduled in {}s", delay.as_secs());
    }

    /// Enter reconnection after a live connection failed.
    fn connection_lost(&self, reason: &str) {
        let delay = {
            let mut state = lock(&self.inner.state);
            if state.status != ConnectionStatus::Connected {
                return;
            }
            state.status = ConnectionStatus::Reconnecting;
            state.clear_tokens();
            state.last_error = Some(reason.to_string());
            state.reconnect_attempts = 0;
            state.reconnect_delay = self.inner.settings.reconnect_initial_delay();
            state.reconnect_delay
        };
        let epoch = self.next_epoch();
        if let Some(refresh) = lock(&self.inner.timers).refresh.take() {
            refresh.cancel();
        }

        tracing::warn!("Connection lost ({reason}); reconnecting");
        self.schedule_reconnect(delay, epoch);
    }

    fn schedule_reconnect(&self, delay: Duration, epoch: u64) {
        let weak = Arc::downgrade(&self.inner);
        let handle = self.inner.scheduler.schedule(
            delay,
            Box::pin(async move {
                if let Some(manager) = Self::from_weak(&weak) {
                    manager.attempt_reconnect(epoch).await;
                }
            }),
        );
        if let Some(previous) = lock(&self.inner.timers).reconnect.replace(handle) {
            previous.cancel();
        }
    }

    async fn attempt_reconnect(&self, epoch: u64) {
        if self.epoch() != epoch {
            return;
        }
        let (profile_id, attempt) = {
            let mut state = lock(&self.inner.state);
            if state.status != ConnectionStatus::Reconnecting {
                return;
            }
            state.reconnect_attempts += 1;
            (state.profile_id.clone(), state.reconnect_attempts)
        };
        let max_attempts = self.inner.settings.reconnect_max_attempts;
        tracing::info!("Reconnect attempt {attempt}/{max_attempts}");

        let result = match profile_id {
            Some(profile_id) => self.reconnect_once(&profile_id, epoch).await,
            None => Err(SessionError::ProfileNotFound("no active profile".into())),
        };

        let error = match result {
            Ok(_) => {
                tracing::info!("Reconnected after {attempt} attempt(s)");
                return;
            }
            Err(error) => error,
        };
        if self.epoch() != epoch {
            return;
        }

        let terminal = matches!(
            error,
            SessionError::PasswordRequired(_) | SessionError::ProfileNotFound(_)
        );
        let next_delay = {
            let mut state = lock(&self.inner.state);
            if state.status != ConnectionStatus::Reconnecting {
                return;
            }
            if terminal || attempt >= max_attempts {
                state.status = ConnectionStatus::Failed;
                state.last_error = Some(if terminal {
                    error.to_string()
                } else {
                    SessionError::MaxRetriesExceeded(attempt).to_string()
                });
                None
            } else {
                state.last_error = Some(error.to_string());
                state.reconnect_delay =
                    (state.reconnect_delay * 2).min(self.inner.settings.reconnect_max_delay());
                Some(state.reconnect_delay)
            }
        };

        match next_delay {
            Some(delay) => {
                tracing::warn!(
                    "Reconnect attempt {attempt} failed: {error}; retrying in {}ms",
                    delay.as_millis()
                );
                self.schedule_reconnect(delay, epoch);
            }
            None => {
                tracing::warn!("Giving up reconnecting after {attempt} attempt(s): {error}");
            }
        }
    }

    async fn reconnect_once(
        &self,
        profile_id: &str,
        epoch: u64,
    ) -> SessionResult<ConnectionProfile> {
        let profile = self
            .inner
            .db
            .get_profile(profile_id)
            .await?
            .ok_or_else(|| SessionError::ProfileNotFound(profile_id.to_string()))?;
        let password = self
            .stored_password(profile_id)
            .await?
            .ok_or_else(|| SessionError::PasswordRequired(profile_id.to_string()))?;
        self.establish(profile, &password, epoch).await
    }

    fn cancel_timers(&self) {
        let mut timers = lock(&self.inner.timers);
        if let Some(refresh) = timers.refresh.take() {
            refresh.cancel();
        }
        if let Some(reconnect) = timers.reconnect.take() {
            reconnect.cancel();
        }
    }
}

fn validate_profile(profile: &ConnectionProfile) -> SessionResult<()> {
    profile.base_url().map_err(SessionError::InvalidProfile)?;
    if profile.username.trim().is_empty() {
        return Err(SessionError::InvalidProfile(
            "username must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn expiry_millis(expires_in: Option<i64>) -> Option<i64> {
    expires_in.map(|secs| crate::util::now_millis().saturating_add(secs.saturating_mul(1_000)))
}
