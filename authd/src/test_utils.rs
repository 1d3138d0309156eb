//! Test doubles and fixtures shared across modules.

use crate::{
    AppState,
    access::{AccessSource, EndpointAccessMap},
    build_router,
    cache::{Cache, CacheError, Result as CacheResult, memory::MemoryCache},
    config::{Config, PasswordScheme},
    db::{
        errors::{DbError, Result as DbResult},
        memory::MemoryStore,
        models::{
            access::EndpointAccessDBResponse,
            audit::AuditLogCreateDBRequest,
            users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
        },
        transaction::{PrimaryStore, StoreTx},
    },
    errors::{Error, Result},
    types::{RoleLabel, UserId},
    users::NewUser,
};
use async_trait::async_trait;
use axum_test::TestServer;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.access_token_secret = Some("test-access-secret".to_string());
    config.auth.refresh_token_secret = Some("test-refresh-secret".to_string());
    config.auth.password.scheme = PasswordScheme::Bcrypt;
    config.auth.password.bcrypt_cost = 4;
    config
}

#[derive(Default)]
struct Counters {
    begins: AtomicUsize,
    user_reads: AtomicUsize,
    name_reads: AtomicUsize,
    access_reads: AtomicUsize,
    fail_audit: AtomicBool,
}

/// A [`MemoryStore`] that counts what reaches it and can be told to fail audit writes.
pub struct RecordingStore {
    inner: MemoryStore,
    counters: Arc<Counters>,
}

impl RecordingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_audit_writes(&self, fail: bool) {
        self.counters.fail_audit.store(fail, Ordering::SeqCst);
    }

    pub fn begins(&self) -> usize {
        self.counters.begins.load(Ordering::SeqCst)
    }

    /// Reads of a user by id
    pub fn user_reads(&self) -> usize {
        self.counters.user_reads.load(Ordering::SeqCst)
    }

    /// Reads of a user by name
    pub fn name_reads(&self) -> usize {
        self.counters.name_reads.load(Ordering::SeqCst)
    }

    pub fn access_reads(&self) -> usize {
        self.counters.access_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrimaryStore for RecordingStore {
    async fn begin(&self) -> DbResult<Box<dyn StoreTx>> {
        self.counters.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingTx {
            inner: self.inner.begin().await?,
            counters: self.counters.clone(),
        }))
    }
}

struct RecordingTx {
    inner: Box<dyn StoreTx>,
    counters: Arc<Counters>,
}

#[async_trait]
impl StoreTx for RecordingTx {
    async fn create_user(&mut self, request: &UserCreateDBRequest) -> DbResult<UserDBResponse> {
        self.inner.create_user(request).await
    }

    async fn get_user(&mut self, id: UserId) -> DbResult<Option<UserDBResponse>> {
        self.counters.user_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_user(id).await
    }

    async fn get_user_by_name(&mut self, name: &str) -> DbResult<Option<UserDBResponse>> {
        self.counters.name_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_user_by_name(name).await
    }

    async fn update_user(&mut self, id: UserId, request: &UserUpdateDBRequest) -> DbResult<UserDBResponse> {
        self.inner.update_user(id, request).await
    }

    async fn delete_user(&mut self, id: UserId) -> DbResult<bool> {
        self.inner.delete_user(id).await
    }

    async fn list_endpoint_access(&mut self) -> DbResult<Vec<EndpointAccessDBResponse>> {
        self.counters.access_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.list_endpoint_access().await
    }

    async fn upsert_endpoint_access(&mut self, endpoint: &str, is_admin: bool) -> DbResult<()> {
        self.inner.upsert_endpoint_access(endpoint, is_admin).await
    }

    async fn append_audit(&mut self, entry: &AuditLogCreateDBRequest) -> DbResult<()> {
        if self.counters.fail_audit.load(Ordering::SeqCst) {
            return Err(DbError::Other(anyhow::anyhow!("audit log unavailable")));
        }
        self.inner.append_audit(entry).await
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.inner.rollback().await
    }
}

/// A [`MemoryCache`] whose reads or writes can be switched to fail like a lost Redis connection.
#[derive(Default)]
pub struct FlakyCache {
    inner: MemoryCache,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_expire: AtomicBool,
    failing_keys: Mutex<HashSet<String>>,
}

impl FlakyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryCache {
        &self.inner
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail only `EXPIRE`, leaving every other write working.
    pub fn fail_expire(&self, fail: bool) {
        self.fail_expire.store(fail, Ordering::SeqCst);
    }

    /// Fail every write to `key`.
    pub fn fail_writes_to(&self, key: &str) {
        if let Ok(mut keys) = self.failing_keys.lock() {
            keys.insert(key.to_string());
        }
    }

    fn check_read(&self) -> CacheResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("connection refused".to_string()));
        }
        Ok(())
    }

    fn check_write(&self, key: &str) -> CacheResult<()> {
        let failing_key = self.failing_keys.lock().map(|keys| keys.contains(key)).unwrap_or(false);
        if failing_key || self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Cache for FlakyCache {
    async fn hash_set_ex(&self, key: &str, fields: &[(String, String)], ttl: Duration) -> CacheResult<()> {
        self.check_write(key)?;
        self.inner.hash_set_ex(key, fields, ttl).await
    }

    async fn hash_get_all(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        self.check_read()?;
        self.inner.hash_get_all(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.check_write(key)?;
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> CacheResult<String> {
        self.check_read()?;
        self.inner.get(key).await
    }

    async fn set_add(&self, key: &str, members: &[String]) -> CacheResult<()> {
        self.check_write(key)?;
        self.inner.set_add(key, members).await
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        self.check_read()?;
        self.inner.set_members(key).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.check_write(key)?;
        self.inner.delete(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()> {
        self.check_write(key)?;
        if self.fail_expire.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("connection reset".to_string()));
        }
        self.inner.expire(key, ttl).await
    }

    async fn ping(&self) -> CacheResult<()> {
        self.check_read()?;
        self.inner.ping().await
    }
}

/// An access source that counts loads, waits before answering and can fail once.
pub struct CountingAccessSource {
    map: EndpointAccessMap,
    delay: Duration,
    pub loads: AtomicUsize,
    pub fail_next: AtomicBool,
}

impl CountingAccessSource {
    pub fn new(map: EndpointAccessMap, delay: Duration) -> Self {
        Self {
            map,
            delay,
            loads: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl AccessSource for CountingAccessSource {
    async fn load(&self) -> Result<EndpointAccessMap> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Internal {
                operation: "load endpoint access".to_string(),
            });
        }
        Ok(self.map.clone())
    }
}

/// The full router over in-memory backends.
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub cache: Arc<FlakyCache>,
}

impl TestApp {
    pub async fn new(config: Config) -> Self {
        let cache = Arc::new(FlakyCache::new());
        let state = AppState::assemble(config, Arc::new(MemoryStore::new()), cache.clone())
            .await
            .expect("Failed to assemble test state");
        let server = TestServer::new(build_router(state.clone())).expect("Failed to create test server");
        Self { server, state, cache }
    }

    pub async fn add_user(&self, name: &str, password: &str, role: RoleLabel) -> UserId {
        self.state
            .users
            .create(NewUser {
                name: name.to_string(),
                email: format!("{name}@example.com"),
                password: password.to_string(),
                role,
            })
            .await
            .expect("Failed to create test user")
    }

    pub async fn access_token(&self, name: &str, password: &str) -> String {
        let refresh = self.state.auth.login(name, password).await.expect("Failed to log in");
        self.state.auth.get_access_token(&refresh).await.expect("Failed to get access token")
    }
}
