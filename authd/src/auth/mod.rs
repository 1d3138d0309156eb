//! Credentials, tokens and the login flow built on them.

pub mod facade;
pub mod middleware;
pub mod password;
pub mod token;

pub use facade::AuthFacade;
pub use token::{TokenClass, TokenService, UserClaims};
