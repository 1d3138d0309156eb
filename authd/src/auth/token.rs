//! JWT issuance and verification.
//!
//! Access and refresh tokens carry the same claims and differ only in the secret that signs them
//! and their lifetime. A refresh token therefore never verifies as an access token or the other
//! way round, as long as the two secrets differ (enforced by [`crate::config::Config::validate`]).
//! Only HS256 is accepted; the algorithm named in a token header is checked against that.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{config::AuthConfig, errors::Error, types::RoleLabel};

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Who the token was issued to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserClaims {
    pub username: String,
    pub role: RoleLabel,
}

/// JWT claims as signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub username: String,
    pub role: RoleLabel,
    pub exp: i64, // Expiration time
    pub iat: i64, // Issued at
}

impl From<TokenClaims> for UserClaims {
    fn from(claims: TokenClaims) -> Self {
        Self {
            username: claims.username,
            role: claims.role,
        }
    }
}

/// Sign `claims` with `secret`, expiring `ttl` from now.
pub fn issue_token(claims: &UserClaims, secret: &[u8], ttl: Duration) -> Result<String, Error> {
    if secret.is_empty() {
        return Err(Error::Signing {
            message: "signing secret is empty".to_string(),
        });
    }
    let ttl = chrono::Duration::from_std(ttl).map_err(|e| Error::Signing {
        message: format!("token lifetime out of range: {e}"),
    })?;

    let now = Utc::now();
    let expires_at = now.checked_add_signed(ttl).ok_or_else(|| Error::Signing {
        message: "token lifetime out of range".to_string(),
    })?;
    let signed = TokenClaims {
        username: claims.username.clone(),
        role: claims.role,
        exp: expires_at.timestamp(),
        iat: now.timestamp(),
    };

    encode(&Header::new(ALGORITHM), &signed, &EncodingKey::from_secret(secret)).map_err(|e| Error::Signing { message: e.to_string() })
}

/// Check the signature, algorithm and expiry of `token` and return its claims.
pub fn verify_token(token: &str, secret: &[u8]) -> Result<TokenClaims, Error> {
    // Anyone can sign with an empty key
    if secret.is_empty() {
        return Err(Error::InvalidToken {
            reason: "verification secret is empty".to_string(),
        });
    }
    let mut validation = Validation::new(ALGORITHM);
    validation.leeway = 0;

    let token_data = decode::<TokenClaims>(token, &DecodingKey::from_secret(secret), &validation).map_err(|e| match e.kind() {
        // Client errors (401) - malformed tokens, invalid claims, expired tokens
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::ExpiredSignature
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::ImmatureSignature
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName => Error::InvalidToken { reason: e.to_string() },

        // Server errors (500) - key issues, internal failures
        _ => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },
    })?;

    Ok(token_data.claims)
}

/// Which of the two token classes a call is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    Access,
    Refresh,
}

#[derive(Clone)]
struct TokenKey {
    secret: Vec<u8>,
    ttl: Duration,
}

/// Issues and verifies both token classes with their own secrets and lifetimes.
#[derive(Clone)]
pub struct TokenService {
    access: TokenKey,
    refresh: TokenKey,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("access_ttl", &self.access.ttl)
            .field("refresh_ttl", &self.refresh.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(access_secret: impl Into<Vec<u8>>, access_ttl: Duration, refresh_secret: impl Into<Vec<u8>>, refresh_ttl: Duration) -> Self {
        Self {
            access: TokenKey {
                secret: access_secret.into(),
                ttl: access_ttl,
            },
            refresh: TokenKey {
                secret: refresh_secret.into(),
                ttl: refresh_ttl,
            },
        }
    }

    /// Fails if either secret is missing or empty.
    pub fn from_config(config: &AuthConfig) -> Result<Self, Error> {
        let secret = |value: &Option<String>, name: &str| match value.as_deref() {
            Some(secret) if !secret.is_empty() => Ok(secret.as_bytes().to_vec()),
            _ => Err(Error::Signing {
                message: format!("auth.{name} is not configured"),
            }),
        };
        Ok(Self::new(
            secret(&config.access_token_secret, "access_token_secret")?,
            config.access_token_expiry,
            secret(&config.refresh_token_secret, "refresh_token_secret")?,
            config.refresh_token_expiry,
        ))
    }

    fn key(&self, class: TokenClass) -> &TokenKey {
        match class {
            TokenClass::Access => &self.access,
            TokenClass::Refresh => &self.refresh,
        }
    }

    pub fn ttl(&self, class: TokenClass) -> Duration {
        self.key(class).ttl
    }

    pub fn issue(&self, class: TokenClass, claims: &UserClaims) -> Result<String, Error> {
        let key = self.key(class);
        issue_token(claims, &key.secret, key.ttl)
    }

    pub fn verify(&self, class: TokenClass, token: &str) -> Result<TokenClaims, Error> {
        verify_token(token, &self.key(class).secret)
    }
}
