use axum::{extract::State, http::StatusCode};

use crate::{AppState, errors::Error};

/// Liveness of the service and its cache
#[utoipa::path(
    get,
    path = "/healthz",
    tag = "health",
    responses(
        (status = 200, description = "Healthy", body = String),
        (status = 503, description = "Cache unreachable"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn healthz(State(state): State<AppState>) -> Result<(StatusCode, &'static str), Error> {
    state.cache.ping().await.map_err(Error::cache_unavailable)?;
    Ok((StatusCode::OK, "OK"))
}
