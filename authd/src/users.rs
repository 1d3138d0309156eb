//! User records, read through the cache and written through the primary store.

use crate::{
    auth::password::hash_password_blocking,
    cache::{
        Cache, CacheError,
        aside::{CacheCodec, fetch_or_hydrate, populate},
    },
    config::PasswordConfig,
    db::{
        models::{
            audit::AuditLogCreateDBRequest,
            users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
        },
        transaction::{TransactionManager, not_found_or},
    },
    errors::{Error, Result},
    types::{AuditMethod, RoleLabel, UserId},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::instrument;

/// A user as seen outside the store. Never carries the password hash.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: RoleLabel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserDBResponse> for User {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            name: db.name,
            email: db.email,
            role: RoleLabel::from(db.is_admin),
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: RoleLabel,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Fields to change. `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

pub fn user_key(id: UserId) -> String {
    format!("user:{id}")
}

/// Stores a [`User`] as a hash with one field per attribute, timestamps in RFC 3339.
pub struct UserHashCodec;

fn field<'a>(hash: &'a HashMap<String, String>, key: &str, name: &str) -> std::result::Result<&'a str, CacheError> {
    hash.get(name).map(String::as_str).ok_or_else(|| CacheError::Decode {
        key: key.to_string(),
        message: format!("missing field {name}"),
    })
}

fn decode_error(key: &str, name: &str, e: impl std::fmt::Display) -> CacheError {
    CacheError::Decode {
        key: key.to_string(),
        message: format!("bad {name}: {e}"),
    }
}

fn timestamp(hash: &HashMap<String, String>, key: &str, name: &str) -> std::result::Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(field(hash, key, name)?)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| decode_error(key, name, e))
}

#[async_trait]
impl CacheCodec for UserHashCodec {
    type Value = User;

    async fn read(&self, cache: &dyn Cache, key: &str) -> std::result::Result<User, CacheError> {
        let hash = cache.hash_get_all(key).await?;
        let role = match field(&hash, key, "role")? {
            "admin" => RoleLabel::Admin,
            "user" => RoleLabel::User,
            other => return Err(decode_error(key, "role", other)),
        };
        Ok(User {
            id: field(&hash, key, "id")?.parse().map_err(|e| decode_error(key, "id", e))?,
            name: field(&hash, key, "name")?.to_string(),
            email: field(&hash, key, "email")?.to_string(),
            role,
            created_at: timestamp(&hash, key, "created_at")?,
            updated_at: timestamp(&hash, key, "updated_at")?,
        })
    }

    async fn write(&self, cache: &dyn Cache, key: &str, value: &User, ttl: Duration) -> std::result::Result<(), CacheError> {
        let fields = [
            ("id", value.id.to_string()),
            ("name", value.name.clone()),
            ("email", value.email.clone()),
            ("role", value.role.to_string()),
            ("created_at", value.created_at.to_rfc3339()),
            ("updated_at", value.updated_at.to_rfc3339()),
        ]
        .map(|(name, v)| (name.to_string(), v));
        cache.hash_set_ex(key, &fields, ttl).await
    }
}

/// Cache-aside access to users.
///
/// Reads try the cache first and only open a transaction on a miss. Writes commit to the store
/// with their audit entry, then refresh the cache. Deleted users stay cached until their entry
/// expires.
pub struct CacheAsideUserStore {
    cache: Arc<dyn Cache>,
    transactions: TransactionManager,
    ttl: Duration,
    password: PasswordConfig,
}

impl CacheAsideUserStore {
    pub fn new(cache: Arc<dyn Cache>, transactions: TransactionManager, ttl: Duration, password: PasswordConfig) -> Self {
        Self {
            cache,
            transactions,
            ttl,
            password,
        }
    }

    #[instrument(skip(self), err)]
    pub async fn get(&self, id: UserId) -> Result<User> {
        fetch_or_hydrate(self.cache.as_ref(), &UserHashCodec, &user_key(id), self.ttl, || {
            self.transactions
                .read_committed(AuditLogCreateDBRequest::new(AuditMethod::GetUser, format!("user_id={id}")), move |tx| {
                    Box::pin(async move {
                        let user = tx.get_user(id).await.map_err(Error::persistence("get user"))?;
                        user.map(User::from).ok_or(Error::NotFound {
                            resource: "User".to_string(),
                            id: id.to_string(),
                        })
                    })
                })
        })
        .await
    }

    /// Hash the password, insert the user and return its id.
    #[instrument(skip(self, request), fields(name = %request.name), err)]
    pub async fn create(&self, request: NewUser) -> Result<UserId> {
        let password_hash = hash_password_blocking(request.password, self.password.clone()).await?;
        let db_request = UserCreateDBRequest {
            name: request.name,
            email: request.email,
            password_hash,
            is_admin: request.role.is_admin(),
        };

        let audit = AuditLogCreateDBRequest::new(AuditMethod::CreateUser, format!("name={}", db_request.name));
        let created = self
            .transactions
            .read_committed(audit, move |tx| {
                Box::pin(async move { tx.create_user(&db_request).await.map_err(Error::persistence("create user")) })
            })
            .await?;

        let user = User::from(created);
        populate(self.cache.as_ref(), &UserHashCodec, &user_key(user.id), &user, self.ttl).await;
        Ok(user.id)
    }

    #[instrument(skip(self, update), err)]
    pub async fn update(&self, id: UserId, update: UserUpdate) -> Result<User> {
        let db_request = UserUpdateDBRequest {
            name: update.name,
            email: update.email,
        };

        let updated = self
            .transactions
            .read_committed(AuditLogCreateDBRequest::new(AuditMethod::UpdateUser, format!("user_id={id}")), move |tx| {
                Box::pin(async move { tx.update_user(id, &db_request).await.map_err(not_found_or("User", id, "update user")) })
            })
            .await?;

        let user = User::from(updated);
        populate(self.cache.as_ref(), &UserHashCodec, &user_key(id), &user, self.ttl).await;
        Ok(user)
    }

    #[instrument(skip(self), err)]
    pub async fn delete(&self, id: UserId) -> Result<()> {
        self.transactions
            .read_committed(AuditLogCreateDBRequest::new(AuditMethod::DeleteUser, format!("user_id={id}")), move |tx| {
                Box::pin(async move {
                    if tx.delete_user(id).await.map_err(Error::persistence("delete user"))? {
                        Ok(())
                    } else {
                        Err(Error::NotFound {
                            resource: "User".to_string(),
                            id: id.to_string(),
                        })
                    }
                })
            })
            .await
    }
}
