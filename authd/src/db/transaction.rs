//! Read-committed transactions over the primary store.
//!
//! Every write and every store read on a cache miss runs through
//! [`TransactionManager::read_committed`], which appends the caller's audit entry inside the same
//! transaction. Either both the operation and its audit row commit, or neither does.

use crate::{
    db::{
        errors::{DbError, Result as DbResult},
        models::{
            access::EndpointAccessDBResponse,
            audit::AuditLogCreateDBRequest,
            users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
        },
    },
    errors::{Error, Result},
    types::UserId,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{instrument, warn};

/// The authoritative relational store.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Open a transaction at read-committed isolation.
    async fn begin(&self) -> DbResult<Box<dyn StoreTx>>;
}

/// An open transaction. Dropping it without calling [`StoreTx::commit`] discards its writes.
#[async_trait]
pub trait StoreTx: Send {
    async fn create_user(&mut self, request: &UserCreateDBRequest) -> DbResult<UserDBResponse>;

    async fn get_user(&mut self, id: UserId) -> DbResult<Option<UserDBResponse>>;

    async fn get_user_by_name(&mut self, name: &str) -> DbResult<Option<UserDBResponse>>;

    /// Fails with [`DbError::NotFound`] if the user does not exist.
    async fn update_user(&mut self, id: UserId, request: &UserUpdateDBRequest) -> DbResult<UserDBResponse>;

    /// Returns whether a row was removed.
    async fn delete_user(&mut self, id: UserId) -> DbResult<bool>;

    async fn list_endpoint_access(&mut self) -> DbResult<Vec<EndpointAccessDBResponse>>;

    async fn upsert_endpoint_access(&mut self, endpoint: &str, is_admin: bool) -> DbResult<()>;

    async fn append_audit(&mut self, entry: &AuditLogCreateDBRequest) -> DbResult<()>;

    async fn commit(self: Box<Self>) -> DbResult<()>;

    async fn rollback(self: Box<Self>) -> DbResult<()>;
}

/// Future returned by a transactional operation, borrowing the open transaction.
pub type TxFuture<'t, T> = BoxFuture<'t, Result<T>>;

#[derive(Clone)]
pub struct TransactionManager {
    store: Arc<dyn PrimaryStore>,
}

impl TransactionManager {
    pub fn new(store: Arc<dyn PrimaryStore>) -> Self {
        Self { store }
    }

    /// Run `op` inside a read-committed transaction, then append `audit` and commit.
    ///
    /// If `op` or the audit write fails the transaction is rolled back and the error is returned
    /// unchanged. A failed rollback is logged and does not mask the original error. Nothing is
    /// retried.
    #[instrument(skip(self, op), fields(method = %audit.method_name), err)]
    pub async fn read_committed<T, F>(&self, audit: AuditLogCreateDBRequest, op: F) -> Result<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut (dyn StoreTx + 'static)) -> TxFuture<'t, T> + Send,
    {
        let operation = audit.method_name.clone();
        let mut tx = self.store.begin().await.map_err(Error::persistence(format!("begin transaction for {operation}")))?;

        let result = op(tx.as_mut()).await;
        let outcome = match result {
            Ok(value) => tx
                .append_audit(&audit)
                .await
                .map(|()| value)
                .map_err(Error::persistence(format!("append audit entry for {operation}"))),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(value) => {
                tx.commit().await.map_err(Error::persistence(format!("commit {operation}")))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Failed to roll back {operation}");
                }
                Err(e)
            }
        }
    }
}

/// Map a store-level "row missing" into the service-level not-found error.
pub fn not_found_or(resource: &str, id: impl ToString, operation: &str) -> impl FnOnce(DbError) -> Error {
    let resource = resource.to_string();
    let id = id.to_string();
    let operation = operation.to_string();
    move |err| match err {
        DbError::NotFound => Error::NotFound { resource, id },
        source => Error::Persistence { operation, source },
    }
}
