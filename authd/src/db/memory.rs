//! In-process primary store for development and tests.
//!
//! Each transaction works on a private copy of the committed tables and keeps a journal of its
//! writes. Commit replays the journal onto the shared state under a lock, so other transactions
//! only ever observe committed data. Concurrent writers to the same row are last-writer-wins, but
//! unique names and emails are checked again at commit, so the later of two conflicting commits
//! fails.
//! User IDs come from a shared counter and are not reused when a transaction rolls back, like a
//! postgres sequence.

use crate::{
    db::{
        errors::{ConstraintViolation, DbError, Result},
        models::{
            access::EndpointAccessDBResponse,
            audit::{AuditLogCreateDBRequest, AuditLogDBResponse},
            users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
        },
        transaction::{PrimaryStore, StoreTx},
    },
    types::UserId,
};
use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicI64, Ordering},
    },
};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<UserId, UserDBResponse>,
    endpoint_access: BTreeMap<String, bool>,
}

#[derive(Debug, Default)]
struct Committed {
    tables: Tables,
    audit_log: Vec<AuditLogDBResponse>,
}

#[derive(Debug)]
enum Change {
    PutUser(UserDBResponse),
    DeleteUser(UserId),
    PutEndpoint(String, bool),
    Audit(AuditLogCreateDBRequest),
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    committed: Arc<Mutex<Committed>>,
    next_user_id: Arc<AtomicI64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed endpoint access rules outside of any transaction.
    pub fn with_endpoint_access<I, S>(self, rules: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        if let Ok(mut committed) = self.committed.lock() {
            for (endpoint, is_admin) in rules {
                committed.tables.endpoint_access.insert(endpoint.into(), is_admin);
            }
        }
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Committed>> {
        lock(&self.committed)
    }

    /// Committed view of a single user.
    pub fn snapshot_user(&self, id: UserId) -> Option<UserDBResponse> {
        self.lock().ok().and_then(|c| c.tables.users.get(&id).cloned())
    }

    pub fn user_count(&self) -> usize {
        self.lock().map(|c| c.tables.users.len()).unwrap_or_default()
    }

    pub fn audit_entries(&self) -> Vec<AuditLogDBResponse> {
        self.lock().map(|c| c.audit_log.clone()).unwrap_or_default()
    }
}

fn lock(committed: &Mutex<Committed>) -> Result<MutexGuard<'_, Committed>> {
    committed
        .lock()
        .map_err(|_| DbError::Other(anyhow::anyhow!("memory store lock poisoned")))
}

#[async_trait]
impl PrimaryStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let working = self.lock()?.tables.clone();
        Ok(Box::new(MemoryTx {
            committed: self.committed.clone(),
            next_user_id: self.next_user_id.clone(),
            working,
            journal: Vec::new(),
        }))
    }
}

struct MemoryTx {
    committed: Arc<Mutex<Committed>>,
    next_user_id: Arc<AtomicI64>,
    working: Tables,
    journal: Vec<Change>,
}

/// Name and email are unique across users other than `id`.
fn check_unique(users: &BTreeMap<UserId, UserDBResponse>, id: Option<UserId>, name: &str, email: &str) -> Result<()> {
    for user in users.values().filter(|u| Some(u.id) != id) {
        let constraint = if user.name == name {
            "users_name_key"
        } else if user.email == email {
            "users_email_key"
        } else {
            continue;
        };
        return Err(DbError::UniqueViolation(ConstraintViolation::new(
            "users",
            constraint,
            format!("duplicate key value violates unique constraint \"{constraint}\""),
        )));
    }
    Ok(())
}

impl MemoryTx {
    fn check_unique(&self, id: Option<UserId>, name: &str, email: &str) -> Result<()> {
        check_unique(&self.working.users, id, name, email)
    }

    fn put_user(&mut self, user: UserDBResponse) {
        self.working.users.insert(user.id, user.clone());
        self.journal.push(Change::PutUser(user));
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn create_user(&mut self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        if request.name.trim().is_empty() {
            return Err(DbError::CheckViolation(ConstraintViolation::new(
                "users",
                "users_name_not_blank",
                "name must not be blank",
            )));
        }
        self.check_unique(None, &request.name, &request.email)?;

        let now = Utc::now();
        let user = UserDBResponse {
            id: self.next_user_id.fetch_add(1, Ordering::SeqCst) + 1,
            name: request.name.clone(),
            email: request.email.clone(),
            password_hash: request.password_hash.clone(),
            is_admin: request.is_admin,
            created_at: now,
            updated_at: now,
        };
        self.put_user(user.clone());
        Ok(user)
    }

    async fn get_user(&mut self, id: UserId) -> Result<Option<UserDBResponse>> {
        Ok(self.working.users.get(&id).cloned())
    }

    async fn get_user_by_name(&mut self, name: &str) -> Result<Option<UserDBResponse>> {
        Ok(self.working.users.values().find(|u| u.name == name).cloned())
    }

    async fn update_user(&mut self, id: UserId, request: &UserUpdateDBRequest) -> Result<UserDBResponse> {
        let mut user = self.working.users.get(&id).cloned().ok_or(DbError::NotFound)?;
        if let Some(name) = &request.name {
            user.name = name.clone();
        }
        if let Some(email) = &request.email {
            user.email = email.clone();
        }
        self.check_unique(Some(id), &user.name, &user.email)?;
        user.updated_at = Utc::now();

        self.put_user(user.clone());
        Ok(user)
    }

    async fn delete_user(&mut self, id: UserId) -> Result<bool> {
        if self.working.users.remove(&id).is_none() {
            return Ok(false);
        }
        self.journal.push(Change::DeleteUser(id));
        Ok(true)
    }

    async fn list_endpoint_access(&mut self) -> Result<Vec<EndpointAccessDBResponse>> {
        Ok(self
            .working
            .endpoint_access
            .iter()
            .map(|(endpoint, is_admin)| EndpointAccessDBResponse {
                endpoint: endpoint.clone(),
                is_admin: *is_admin,
            })
            .collect())
    }

    async fn upsert_endpoint_access(&mut self, endpoint: &str, is_admin: bool) -> Result<()> {
        self.working.endpoint_access.insert(endpoint.to_string(), is_admin);
        self.journal.push(Change::PutEndpoint(endpoint.to_string(), is_admin));
        Ok(())
    }

    async fn append_audit(&mut self, entry: &AuditLogCreateDBRequest) -> Result<()> {
        self.journal.push(Change::Audit(entry.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { committed, journal, .. } = *self;
        let mut committed = lock(&committed)?;
        let now = Utc::now();

        // Replay onto a copy so a conflict with a concurrent commit leaves nothing applied
        let mut tables = committed.tables.clone();
        let mut audit = Vec::new();
        for change in journal {
            match change {
                Change::PutUser(user) => {
                    check_unique(&tables.users, Some(user.id), &user.name, &user.email)?;
                    tables.users.insert(user.id, user);
                }
                Change::DeleteUser(id) => {
                    tables.users.remove(&id);
                }
                Change::PutEndpoint(endpoint, is_admin) => {
                    tables.endpoint_access.insert(endpoint, is_admin);
                }
                Change::Audit(entry) => audit.push(entry),
            }
        }

        committed.tables = tables;
        for entry in audit {
            let id = committed.audit_log.len() as i64 + 1;
            committed.audit_log.push(AuditLogDBResponse {
                id,
                method_name: entry.method_name,
                ctx: entry.ctx,
                created_at: now,
            });
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
