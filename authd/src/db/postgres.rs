//! PostgreSQL implementation of the primary store.

use crate::{
    config::PoolSettings,
    db::{
        errors::Result,
        handlers::{AuditLog, EndpointAccess, Repository, Users},
        models::{
            access::EndpointAccessDBResponse,
            audit::AuditLogCreateDBRequest,
            users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
        },
        transaction::{PrimaryStore, StoreTx},
    },
    types::UserId,
};
use async_trait::async_trait;
use sqlx::{
    PgPool, Postgres, Transaction,
    postgres::PgPoolOptions,
};
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, run migrations and return the store.
    pub async fn connect(url: &str, settings: &PoolSettings) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
            .idle_timeout((settings.idle_timeout_secs > 0).then(|| Duration::from_secs(settings.idle_timeout_secs)))
            .max_lifetime((settings.max_lifetime_secs > 0).then(|| Duration::from_secs(settings.max_lifetime_secs)))
            .connect(url)
            .await?;

        info!("Running database migrations...");
        crate::migrator().run(&pool).await?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PrimaryStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgStoreTx { tx }))
    }
}

struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn create_user(&mut self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        Users::new(&mut self.tx).create(request).await
    }

    async fn get_user(&mut self, id: UserId) -> Result<Option<UserDBResponse>> {
        Users::new(&mut self.tx).get_by_id(id).await
    }

    async fn get_user_by_name(&mut self, name: &str) -> Result<Option<UserDBResponse>> {
        Users::new(&mut self.tx).get_user_by_name(name).await
    }

    async fn update_user(&mut self, id: UserId, request: &UserUpdateDBRequest) -> Result<UserDBResponse> {
        Users::new(&mut self.tx).update(id, request).await
    }

    async fn delete_user(&mut self, id: UserId) -> Result<bool> {
        Users::new(&mut self.tx).delete(id).await
    }

    async fn list_endpoint_access(&mut self) -> Result<Vec<EndpointAccessDBResponse>> {
        EndpointAccess::new(&mut self.tx).list().await
    }

    async fn upsert_endpoint_access(&mut self, endpoint: &str, is_admin: bool) -> Result<()> {
        EndpointAccess::new(&mut self.tx).upsert(endpoint, is_admin).await
    }

    async fn append_audit(&mut self, entry: &AuditLogCreateDBRequest) -> Result<()> {
        AuditLog::new(&mut self.tx).append(entry).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
