//! In-memory fakes shared by the engine's tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::SyncSettings;
use crate::models::{Collection, ProfileConfig};
use crate::scheduler::ManualScheduler;
use crate::services::DatabaseService;
use crate::session::{SecretCipher, SessionError, SessionManager, SessionResult};
use crate::transport::{
    AuthGrant, HealthInfo, RemoteRecord, RemoteTransport, TransportError, TransportResult,
};

pub const HOST: &str = "https://sync.test";
pub const USERNAME: &str = "ada";
pub const PASSWORD: &str = "correct horse";

/// Remote operations a test can script failures for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Health,
    Login,
    Refresh,
    Logout,
    Fetch,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub struct FakeRecord {
    pub updated_at: i64,
    pub deleted: bool,
    pub fields: Value,
}

#[derive(Default)]
struct FakeState {
    reachable: bool,
    version: Option<String>,
    users: HashMap<String, String>,
    disabled: HashSet<String>,
    expires_in: Option<i64>,
    issued: u64,
    access_tokens: HashSet<String>,
    refresh_tokens: HashSet<String>,
    next_id: u64,
    records: BTreeMap<(Collection, String), FakeRecord>,
    failures: HashMap<FakeOp, VecDeque<TransportError>>,
    conflicts: HashSet<String>,
    calls: Vec<String>,
}

/// In-memory stand-in for the sync server.
#[derive(Clone)]
pub struct FakeRemote {
    state: Arc<Mutex<FakeState>>,
    fetch_gate: Arc<tokio::sync::Mutex<()>>,
    write_gate: Arc<tokio::sync::Mutex<()>>,
}

impl Default for FakeRemote {
    fn default() -> Self {
        let mut state = FakeState {
            reachable: true,
            version: Some("1.4.0".to_string()),
            expires_in: Some(3_600),
            ..FakeState::default()
        };
        state
            .users
            .insert(USERNAME.to_string(), PASSWORD.to_string());
        Self {
            state: Arc::new(Mutex::new(state)),
            fetch_gate: Arc::new(tokio::sync::Mutex::new(())),
            write_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

impl FakeRemote {
    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.with(|state| state.reachable = reachable);
    }

    pub fn set_expires_in(&self, expires_in: Option<i64>) {
        self.with(|state| state.expires_in = expires_in);
    }

    pub fn set_password(&self, username: &str, password: &str) {
        self.with(|state| {
            state
                .users
                .insert(username.to_string(), password.to_string())
        });
    }

    pub fn disable_user(&self, username: &str) {
        self.with(|state| state.disabled.insert(username.to_string()));
    }

    /// Invalidate every issued access token (refresh tokens stay valid).
    pub fn expire_access_tokens(&self) {
        self.with(|state| state.access_tokens.clear());
    }

    pub fn revoke_refresh_tokens(&self) {
        self.with(|state| state.refresh_tokens.clear());
    }

    /// Fail the next `times` calls of `op` with `error`.
    pub fn fail_next(&self, op: FakeOp, error: &TransportError, times: usize) {
        self.with(|state| {
            let queue = state.failures.entry(op).or_default();
            for _ in 0..times {
                queue.push_back(error.clone());
            }
        });
    }

    /// Answer writes to this remote id with 409.
    pub fn conflict_on(&self, remote_id: &str) {
        self.with(|state| state.conflicts.insert(remote_id.to_string()));
    }

    /// Accept writes to this remote id again.
    pub fn clear_conflict(&self, remote_id: &str) {
        self.with(|state| state.conflicts.remove(remote_id));
    }

    /// Park every fetch until the returned guard is dropped.
    pub async fn hold_fetches(&self) -> tokio::sync::OwnedMutexGuard<()> {
        Arc::clone(&self.fetch_gate).lock_owned().await
    }

    /// Hold create and update responses until the returned guard is dropped.
    pub async fn hold_writes(&self) -> tokio::sync::OwnedMutexGuard<()> {
        Arc::clone(&self.write_gate).lock_owned().await
    }

    /// Server-side edit, as if made by another device.
    pub fn put_remote(&self, collection: Collection, id: &str, updated_at: i64, fields: Value) {
        self.with(|state| {
            state.records.insert(
                (collection, id.to_string()),
                FakeRecord {
                    updated_at,
                    deleted: false,
                    fields,
                },
            )
        });
    }

    /// Server-side deletion (tombstone).
    pub fn delete_remote(&self, collection: Collection, id: &str, updated_at: i64) {
        self.with(|state| {
            if let Some(record) = state.records.get_mut(&(collection, id.to_string())) {
                record.deleted = true;
                record.updated_at = updated_at;
            }
        });
    }

    pub fn remote(&self, collection: Collection, id: &str) -> Option<FakeRecord> {
        self.with(|state| state.records.get(&(collection, id.to_string())).cloned())
    }

    /// Live (non-deleted) records in a collection.
    pub fn live_records(&self, collection: Collection) -> Vec<(String, Value)> {
        self.with(|state| {
            state
                .records
                .iter()
                .filter(|((c, _), record)| *c == collection && !record.deleted)
                .map(|((_, id), record)| (id.clone(), record.fields.clone()))
                .collect()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|state| state.calls.clone())
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.with(|state| {
            state
                .calls
                .iter()
                .filter(|call| call.starts_with(prefix))
                .count()
        })
    }

    pub fn clear_calls(&self) {
        self.with(|state| state.calls.clear());
    }

    fn begin(&self, op: FakeOp, call: String) -> TransportResult<()> {
        self.with(|state| {
            state.calls.push(call);
            if !state.reachable {
                return Err(TransportError::Unreachable("connection refused".into()));
            }
            match state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
                Some(error) => Err(error),
                None => Ok(()),
            }
        })
    }

    fn authorize(&self, token: &str) -> TransportResult<()> {
        self.with(|state| {
            if state.access_tokens.contains(token) {
                Ok(())
            } else {
                Err(TransportError::Unauthorized("token expired".into()))
            }
        })
    }

    fn grant(state: &mut FakeState) -> AuthGrant {
        state.issued += 1;
        let token = format!("access-{}", state.issued);
        let refresh_token = format!("refresh-{}", state.issued);
        state.access_tokens.insert(token.clone());
        state.refresh_tokens.insert(refresh_token.clone());
        AuthGrant {
            token,
            refresh_token: Some(refresh_token),
            expires_in: state.expires_in,
            user: Some(json!({"username": USERNAME})),
        }
    }

    fn to_remote(id: &str, record: &FakeRecord) -> RemoteRecord {
        RemoteRecord {
            id: id.to_string(),
            updated_at: Some(record.updated_at),
            deleted: record.deleted,
            fields: record.fields.clone(),
        }
    }

    fn write(
        &self,
        collection: Collection,
        remote_id: Option<&str>,
        body: &Value,
    ) -> TransportResult<RemoteRecord> {
        self.with(|state| {
            let id = match remote_id {
                Some(id) => {
                    if state.conflicts.contains(id) {
                        let remote = state
                            .records
                            .get(&(collection, id.to_string()))
                            .map(|record| {
                                let mut fields = record.fields.clone();
                                fields["id"] = json!(id);
                                fields["updatedAt"] = json!(record.updated_at);
                                fields
                            });
                        return Err(TransportError::Conflict { remote });
                    }
                    id.to_string()
                }
                None => {
                    state.next_id += 1;
                    format!("srv-{}", state.next_id)
                }
            };
            let record = FakeRecord {
                updated_at: crate::util::now_millis(),
                deleted: false,
                fields: body.clone(),
            };
            let remote = Self::to_remote(&id, &record);
            state.records.insert((collection, id), record);
            Ok(remote)
        })
    }
}

impl RemoteTransport for FakeRemote {
    async fn health(&self, base_url: &str) -> TransportResult<HealthInfo> {
        self.begin(FakeOp::Health, format!("GET {base_url}/health"))?;
        Ok(HealthInfo {
            version: self.with(|state| state.version.clone()),
        })
    }

    async fn login(
        &self,
        _base_url: &str,
        username: &str,
        password: &str,
    ) -> TransportResult<AuthGrant> {
        self.begin(FakeOp::Login, "POST /auth/login".into())?;
        self.with(|state| {
            if state.users.get(username).map(String::as_str) != Some(password) {
                return Err(TransportError::Unauthorized("bad credentials".into()));
            }
            if state.disabled.contains(username) {
                return Err(TransportError::Forbidden("account disabled".into()));
            }
            Ok(Self::grant(state))
        })
    }

    async fn refresh(&self, _base_url: &str, refresh_token: &str) -> TransportResult<AuthGrant> {
        self.begin(FakeOp::Refresh, "POST /auth/refresh".into())?;
        self.with(|state| {
            if !state.refresh_tokens.remove(refresh_token) {
                return Err(TransportError::Unauthorized("refresh token revoked".into()));
            }
            Ok(Self::grant(state))
        })
    }

    async fn logout(&self, _base_url: &str, token: &str) -> TransportResult<()> {
        self.begin(FakeOp::Logout, "POST /auth/logout".into())?;
        self.with(|state| state.access_tokens.remove(token));
        Ok(())
    }

    async fn fetch_changes(
        &self,
        _base_url: &str,
        token: &str,
        collection: Collection,
        since: Option<i64>,
    ) -> TransportResult<Vec<RemoteRecord>> {
        self.begin(FakeOp::Fetch, format!("GET /{}", collection.endpoint()))?;
        drop(self.fetch_gate.lock().await);
        self.authorize(token)?;
        Ok(self.with(|state| {
            state
                .records
                .iter()
                .filter(|((c, _), record)| {
                    *c == collection && !matches!(since, Some(since) if record.updated_at <= since)
                })
                .map(|((_, id), record)| Self::to_remote(id, record))
                .collect()
        }))
    }

    async fn create(
        &self,
        _base_url: &str,
        token: &str,
        collection: Collection,
        body: &Value,
    ) -> TransportResult<RemoteRecord> {
        let written = self
            .begin(FakeOp::Create, format!("POST /{}", collection.endpoint()))
            .and_then(|()| self.authorize(token))
            .and_then(|()| self.write(collection, None, body));
        drop(self.write_gate.lock().await);
        written
    }

    async fn update(
        &self,
        _base_url: &str,
        token: &str,
        collection: Collection,
        remote_id: &str,
        body: &Value,
    ) -> TransportResult<RemoteRecord> {
        let written = self
            .begin(
                FakeOp::Update,
                format!("PUT /{}/{remote_id}", collection.endpoint()),
            )
            .and_then(|()| self.authorize(token))
            .and_then(|()| self.write(collection, Some(remote_id), body));
        drop(self.write_gate.lock().await);
        written
    }

    async fn delete(
        &self,
        _base_url: &str,
        token: &str,
        collection: Collection,
        remote_id: &str,
    ) -> TransportResult<()> {
        self.begin(
            FakeOp::Delete,
            format!("DELETE /{}/{remote_id}", collection.endpoint()),
        )?;
        self.authorize(token)?;
        self.with(|state| {
            if state.conflicts.contains(remote_id) {
                return Err(TransportError::Conflict { remote: None });
            }
            state.records.remove(&(collection, remote_id.to_string()));
            Ok(())
        })
    }
}

/// Reversible stand-in for the platform cipher.
#[derive(Default)]
pub struct TestCipher {
    unavailable: AtomicBool,
    discarded: AtomicUsize,
}

impl TestCipher {
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }
}

impl SecretCipher for TestCipher {
    fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    fn encrypt(&self, plaintext: &[u8]) -> SessionResult<Vec<u8>> {
        if !self.is_available() {
            return Err(SessionError::SecureStorageUnavailable);
        }
        let mut blob = b"sealed:".to_vec();
        blob.extend(plaintext.iter().rev());
        Ok(blob)
    }

    fn decrypt(&self, blob: &[u8]) -> SessionResult<Vec<u8>> {
        let sealed = blob
            .strip_prefix(b"sealed:")
            .ok_or_else(|| SessionError::SecureStorage("not a sealed blob".into()))?;
        Ok(sealed.iter().rev().copied().collect())
    }

    fn discard(&self, _blob: &[u8]) -> SessionResult<()> {
        self.discarded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Wired-up engine over fakes.
pub struct Harness {
    pub db: DatabaseService,
    pub remote: FakeRemote,
    pub scheduler: ManualScheduler,
    pub cipher: Arc<TestCipher>,
    pub session: SessionManager<FakeRemote>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(SyncSettings::default()).await
    }

    pub async fn with_settings(settings: SyncSettings) -> Self {
        let db = DatabaseService::open_in_memory().await.unwrap();
        let remote = FakeRemote::default();
        let scheduler = ManualScheduler::new();
        let cipher = Arc::new(TestCipher::default());
        let session = SessionManager::new(
            remote.clone(),
            db.clone(),
            cipher.clone(),
            Arc::new(scheduler.clone()),
            settings,
        );
        Self {
            db,
            remote,
            scheduler,
            cipher,
            session,
        }
    }

    pub async fn connect(&self) -> crate::models::ConnectionProfile {
        self.session.connect(profile_config()).await.unwrap()
    }

    pub async fn advance(&self, by: Duration) {
        self.scheduler.advance(by).await;
    }
}

pub fn profile_config() -> ProfileConfig {
    ProfileConfig {
        id: Some("home".to_string()),
        display_name: Some("Home server".to_string()),
        host_url: HOST.to_string(),
        port: None,
        username: USERNAME.to_string(),
        password: PASSWORD.to_string(),
        is_default: true,
    }
}
