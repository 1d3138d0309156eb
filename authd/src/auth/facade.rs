//! Login and token exchange.
//!
//! A client moves from anonymous to authenticated by trading credentials for a refresh token, and
//! from authenticated to authorized by trading the refresh token for a short-lived access token.
//! Endpoint checks accept an optional access token.

use super::{
    password::{hash_password, verify_password_blocking},
    token::{TokenClass, TokenService, UserClaims},
};
use crate::{
    access::RoleResolver,
    config::PasswordConfig,
    db::{models::audit::AuditLogCreateDBRequest, transaction::TransactionManager},
    errors::{Error, Result},
    types::{AuditMethod, RoleLabel},
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Compared against when the username is unknown, so both failure paths cost one hash check.
const DUMMY_PASSWORD: &str = "authd-dummy-password";

pub struct AuthFacade {
    tokens: TokenService,
    roles: Arc<RoleResolver>,
    transactions: TransactionManager,
    dummy_hash: String,
}

impl AuthFacade {
    pub fn new(tokens: TokenService, roles: Arc<RoleResolver>, transactions: TransactionManager, password: &PasswordConfig) -> Result<Self> {
        Ok(Self {
            tokens,
            roles,
            transactions,
            dummy_hash: hash_password(DUMMY_PASSWORD, password)?,
        })
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Exchange credentials for a refresh token.
    ///
    /// Unknown users and wrong passwords fail identically with [`Error::Authentication`].
    #[instrument(skip(self, password), err)]
    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let name = username.to_string();
        let stored = self
            .transactions
            .read_committed(AuditLogCreateDBRequest::new(AuditMethod::Login, format!("username={username}")), move |tx| {
                Box::pin(async move {
                    let user = tx.get_user_by_name(&name).await.map_err(Error::persistence("look up credentials"))?;
                    Ok(user.map(|u| (u.password_hash, RoleLabel::from(u.is_admin))))
                })
            })
            .await?;

        let (hash, role) = match stored {
            Some((hash, role)) => (hash, Some(role)),
            None => (self.dummy_hash.clone(), None),
        };

        let matches = match verify_password_blocking(password.to_string(), hash).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!(error = %e, "Stored password hash could not be checked");
                false
            }
        };

        match role {
            Some(role) if matches => self.tokens.issue(
                TokenClass::Refresh,
                &UserClaims {
                    username: username.to_string(),
                    role,
                },
            ),
            _ => {
                debug!("Login rejected");
                Err(Error::Authentication)
            }
        }
    }

    /// Exchange a refresh token for an access token carrying the user's current role.
    #[instrument(skip_all, err)]
    pub async fn get_access_token(&self, refresh_token: &str) -> Result<String> {
        let claims = self.tokens.verify(TokenClass::Refresh, refresh_token)?;
        let role = self.roles.get_role(&claims.username).await?;
        self.tokens.issue(
            TokenClass::Access,
            &UserClaims {
                username: claims.username,
                role,
            },
        )
    }

    /// Exchange a refresh token for a fresh one with the same claims.
    #[instrument(skip_all, err)]
    pub async fn get_refresh_token(&self, refresh_token: &str) -> Result<String> {
        let claims = self.tokens.verify(TokenClass::Refresh, refresh_token)?;
        self.tokens.issue(TokenClass::Refresh, &UserClaims::from(claims))
    }

    /// Decide whether the holder of `access_token` (or an anonymous caller) may call `endpoint`.
    #[instrument(skip(self, access_token), fields(authenticated = access_token.is_some()), err)]
    pub async fn check(&self, endpoint: &str, access_token: Option<&str>) -> Result<()> {
        let caller = access_token
            .map(|token| self.tokens.verify(TokenClass::Access, token))
            .transpose()?
            .map(|claims| claims.role);
        self.roles.check(endpoint, caller).await
    }
}
