//! Database models for the audit log.

use crate::types::AuditMethod;
use chrono::{DateTime, Utc};

/// Database request for appending an audit entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLogCreateDBRequest {
    pub method_name: String,
    /// Free-form marker identifying the call, e.g. `user_id=42`
    pub ctx: String,
}

impl AuditLogCreateDBRequest {
    pub fn new(method: AuditMethod, ctx: impl Into<String>) -> Self {
        Self {
            method_name: method.as_str().to_string(),
            ctx: ctx.into(),
        }
    }
}

/// Database response for an audit entry
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AuditLogDBResponse {
    pub id: i64,
    pub method_name: String,
    pub ctx: String,
    pub created_at: DateTime<Utc>,
}
