use thiserror::Error;

/// Which constraint a write tripped over, as reported by the store.
#[derive(Debug, Clone)]
pub struct ConstraintViolation {
    pub constraint: Option<String>,
    pub table: Option<String>,
    pub message: String,
}

impl ConstraintViolation {
    pub fn new(table: &str, constraint: &str, message: impl Into<String>) -> Self {
        Self {
            constraint: Some(constraint.to_string()),
            table: Some(table.to_string()),
            message: message.into(),
        }
    }

    fn from_database(err: &dyn sqlx::error::DatabaseError) -> Self {
        Self {
            constraint: err.constraint().map(str::to_string),
            table: err.table().map(str::to_string),
            message: err.message().to_string(),
        }
    }
}

/// Errors raised by the primary store.
#[derive(Error, Debug)]
pub enum DbError {
    /// No row matched the given identifier
    #[error("Entity not found")]
    NotFound,

    #[error("Unique constraint violation: {}", .0.message)]
    UniqueViolation(ConstraintViolation),

    #[error("Check constraint violation: {}", .0.message)]
    CheckViolation(ConstraintViolation),

    /// The store could not be reached, e.g. the pool timed out or the connection dropped
    #[error("Primary store unavailable: {0}")]
    Unavailable(String),

    /// Catch-all for non-recoverable errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DbError {
    /// Name of the violated constraint, if this is a constraint error.
    pub fn constraint(&self) -> Option<&str> {
        match self {
            DbError::UniqueViolation(v) | DbError::CheckViolation(v) => v.constraint.as_deref(),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::UniqueViolation(ConstraintViolation::from_database(&**db_err))
            }
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                DbError::CheckViolation(ConstraintViolation::from_database(&**db_err))
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                DbError::Unavailable(err.to_string())
            }
            _ => DbError::Other(anyhow::Error::from(err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
