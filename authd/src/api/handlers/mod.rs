//! Axum route handlers.
//!
//! - [`auth`]: login, token exchange and endpoint checks
//! - [`users`]: user create, read, update and delete
//! - [`health`]: liveness
//!
//! Handlers return [`crate::errors::Error`], which picks the status code and a client-safe body.

pub mod auth;
pub mod health;
pub mod users;
