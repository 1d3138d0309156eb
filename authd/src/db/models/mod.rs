//! Database record types, separate from the API models in [`crate::api::models`].

pub mod access;
pub mod audit;
pub mod users;
