//! Request-side helpers: reading the caller's access token and gating routes on the access map.

use crate::{AppState, errors::Error};
use axum::{
    extract::{FromRequestParts, MatchedPath, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::{instrument, trace};

/// The bearer token from the `Authorization` header, if one was sent.
///
/// An `Authorization` header that is not valid `Bearer <token>` is rejected rather than treated
/// as anonymous.
#[derive(Debug, Clone, Default)]
pub struct BearerToken(pub Option<String>);

impl BearerToken {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

fn parse_bearer(parts: &Parts) -> Result<Option<String>, Error> {
    let Some(header) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = header.to_str().map_err(|e| Error::InvalidToken {
        reason: format!("Authorization header is not valid ASCII: {e}"),
    })?;
    match value.strip_prefix("Bearer ").map(str::trim) {
        Some(token) if !token.is_empty() => Ok(Some(token.to_string())),
        _ => Err(Error::InvalidToken {
            reason: "Authorization header must be 'Bearer <token>'".to_string(),
        }),
    }
}

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parse_bearer(parts).map(BearerToken)
    }
}

/// Run the endpoint check for the matched route template before calling the handler.
///
/// Rules are keyed by route template, e.g. `/users/v1/users/{id}`.
#[instrument(skip_all)]
pub async fn require_access(
    State(state): State<AppState>,
    token: BearerToken,
    request: Request,
    next: Next,
) -> Result<Response, Error> {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(MatchedPath::as_str)
        .unwrap_or_else(|| request.uri().path())
        .to_string();
    trace!(endpoint, "Checking route access");
    state.auth.check(&endpoint, token.as_deref()).await?;
    Ok(next.run(request).await)
}
