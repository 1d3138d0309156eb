//! Database repository for the append-only audit log.

use crate::db::{
    errors::Result,
    models::audit::{AuditLogCreateDBRequest, AuditLogDBResponse},
};
use sqlx::PgConnection;
use tracing::instrument;

pub struct AuditLog<'c> {
    db: &'c mut PgConnection,
}

impl<'c> AuditLog<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, entry), fields(method = %entry.method_name), err)]
    pub async fn append(&mut self, entry: &AuditLogCreateDBRequest) -> Result<()> {
        sqlx::query("INSERT INTO audit_log (method_name, ctx) VALUES ($1, $2)")
            .bind(&entry.method_name)
            .bind(&entry.ctx)
            .execute(&mut *self.db)
            .await?;

        Ok(())
    }

    /// Most recent entries first
    #[instrument(skip(self), err)]
    pub async fn list_recent(&mut self, limit: i64) -> Result<Vec<AuditLogDBResponse>> {
        let entries = sqlx::query_as::<_, AuditLogDBResponse>(
            "SELECT id, method_name, ctx, created_at FROM audit_log ORDER BY id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(entries)
    }
}
