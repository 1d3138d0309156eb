//! Postgres repositories, one per table.

pub mod access;
pub mod audit_log;
pub mod repository;
pub mod users;

pub use access::EndpointAccess;
pub use audit_log::AuditLog;
pub use repository::Repository;
pub use users::Users;
