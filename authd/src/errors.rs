use crate::cache::CacheError;
use crate::db::errors::DbError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Bad credentials. Never says whether the user exists.
    #[error("Invalid username or password")]
    Authentication,

    /// Malformed, wrongly signed, wrongly typed or expired token
    #[error("Invalid token: {reason}")]
    InvalidToken { reason: String },

    /// Entity absent from both the cache and the primary store
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Cache unreachable, timed out, or returned data of an unexpected shape
    #[error("Cache unavailable")]
    CacheUnavailable {
        #[source]
        source: CacheError,
    },

    /// Primary store failure, annotated with the audited operation
    #[error("Failed to {operation}")]
    Persistence {
        operation: String,
        #[source]
        source: DbError,
    },

    /// Token issuance failed
    #[error("Failed to sign token: {message}")]
    Signing { message: String },

    /// Caller may not call the endpoint
    #[error("Access to {endpoint} denied")]
    AccessDenied { endpoint: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Builds a `map_err` adapter that tags a store error with the operation that was running.
    pub fn persistence(operation: impl Into<String>) -> impl FnOnce(DbError) -> Error {
        let operation = operation.into();
        move |source| Error::Persistence { operation, source }
    }

    pub fn cache_unavailable(source: CacheError) -> Self {
        Error::CacheUnavailable { source }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Authentication | Error::InvalidToken { .. } => StatusCode::UNAUTHORIZED,
            Error::AccessDenied { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::CacheUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Persistence { source, .. } => match source {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation(_) => StatusCode::CONFLICT,
                DbError::CheckViolation(_) => StatusCode::BAD_REQUEST,
                DbError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Signing { .. } | Error::Internal { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Authentication => "Invalid username or password".to_string(),
            Error::InvalidToken { .. } => "Invalid or expired token".to_string(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::CacheUnavailable { .. } => "Service temporarily unavailable".to_string(),
            Error::Persistence { source, .. } => match source {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation(v) => match (v.table.as_deref(), v.constraint.as_deref()) {
                    (Some("users"), Some(c)) if c.contains("name") => "This username is already taken".to_string(),
                    (Some("users"), Some(c)) if c.contains("email") => "An account with this email address already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::CheckViolation(_) => "Invalid data provided".to_string(),
                DbError::Unavailable(_) => "Service temporarily unavailable".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::AccessDenied { endpoint } => format!("Access to {endpoint} denied"),
            Error::BadRequest { message } => message.clone(),
            Error::Signing { .. } | Error::Internal { .. } | Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Persistence {
                source: DbError::Other(_), ..
            }
            | Error::Signing { .. }
            | Error::Internal { .. }
            | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Persistence {
                source: DbError::Unavailable(_),
                ..
            } => {
                tracing::warn!("Primary store unavailable: {:#}", self);
            }
            Error::Persistence { .. } => {
                tracing::warn!("Database constraint error: {:#}", self);
            }
            Error::CacheUnavailable { source } => {
                tracing::warn!(error = %source, "Cache unavailable");
            }
            Error::Authentication | Error::InvalidToken { .. } | Error::AccessDenied { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        (status, self.user_message()).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
