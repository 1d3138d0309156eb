//! HTTP surface: JSON request and response models plus the axum handlers that serve them.
//!
//! - `/auth/v1/*`: login, token exchange and endpoint checks
//! - `/users/v1/users*`: user records
//! - `/healthz`, `/openapi.json`
//!
//! Handlers are thin. They parse the request, call [`crate::auth::AuthFacade`] or
//! [`crate::users::CacheAsideUserStore`] and let [`crate::errors::Error`] pick the status code.

pub mod handlers;
pub mod models;
