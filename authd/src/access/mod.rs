//! Role lookup and endpoint authorization.
//!
//! [`RoleResolver`] answers two questions: what role a user holds right now, and whether a caller
//! with a given role may call an endpoint. The endpoint rules come from an [`AccessSource`], either
//! fixed in configuration or read from the `endpoint_access` table.

pub mod map;
pub mod resolver;

pub use map::{AccessSource, EndpointAccessMap, StaticAccessSource, StoreAccessSource};
pub use resolver::RoleResolver;
