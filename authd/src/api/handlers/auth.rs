use axum::{Json, extract::State, http::StatusCode};

use crate::{
    AppState,
    api::models::auth::{AccessTokenResponse, CheckRequest, LoginRequest, RefreshTokenRequest, RefreshTokenResponse},
    auth::middleware::BearerToken,
    errors::Error,
};

/// Exchange credentials for a refresh token
#[utoipa::path(
    post,
    path = "/auth/v1/login",
    request_body = LoginRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Logged in", body = RefreshTokenResponse),
        (status = 401, description = "Invalid username or password"),
    )
)]
#[tracing::instrument(skip_all, fields(username = %request.username))]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<Json<RefreshTokenResponse>, Error> {
    let refresh_token = state.auth.login(&request.username, &request.password).await?;
    Ok(Json(RefreshTokenResponse { refresh_token }))
}

/// Exchange a refresh token for an access token
#[utoipa::path(
    post,
    path = "/auth/v1/access-token",
    request_body = RefreshTokenRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Access token issued", body = AccessTokenResponse),
        (status = 401, description = "Refresh token invalid or expired"),
        (status = 404, description = "User no longer exists"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_access_token(
    State(state): State<AppState>,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<Json<AccessTokenResponse>, Error> {
    let access_token = state.auth.get_access_token(&request.refresh_token).await?;
    Ok(Json(AccessTokenResponse { access_token }))
}

/// Exchange a refresh token for a new one with a later expiry
#[utoipa::path(
    post,
    path = "/auth/v1/refresh-token",
    request_body = RefreshTokenRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Refresh token renewed", body = RefreshTokenResponse),
        (status = 401, description = "Refresh token invalid or expired"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_refresh_token(
    State(state): State<AppState>,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<Json<RefreshTokenResponse>, Error> {
    let refresh_token = state.auth.get_refresh_token(&request.refresh_token).await?;
    Ok(Json(RefreshTokenResponse { refresh_token }))
}

/// Check whether the caller may call an endpoint
#[utoipa::path(
    post,
    path = "/auth/v1/check",
    request_body = CheckRequest,
    tag = "auth",
    responses(
        (status = 204, description = "Allowed"),
        (status = 401, description = "Access token invalid or expired"),
        (status = 403, description = "Denied"),
    ),
    security((), ("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(endpoint = %request.endpoint_address))]
pub async fn check(State(state): State<AppState>, token: BearerToken, Json(request): Json<CheckRequest>) -> Result<StatusCode, Error> {
    state.auth.check(&request.endpoint_address, token.as_deref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::{
        api::models::auth::{AccessTokenResponse, RefreshTokenResponse},
        auth::TokenClass,
        test_utils::{TestApp, test_config},
        types::RoleLabel,
    };
    use serde_json::json;

    #[tokio::test]
    async fn test_login_and_token_exchange() {
        let app = TestApp::new(test_config()).await;
        app.add_user("alice", "s3cret", RoleLabel::User).await;

        let login = app.server.post("/auth/v1/login").json(&json!({"username": "alice", "password": "s3cret"})).await;
        login.assert_status_ok();
        let refresh = login.json::<RefreshTokenResponse>().refresh_token;

        let access = app
            .server
            .post("/auth/v1/access-token")
            .json(&json!({ "refresh_token": refresh }))
            .await;
        access.assert_status_ok();
        let access = access.json::<AccessTokenResponse>().access_token;
        let claims = app.state.auth.tokens().verify(TokenClass::Access, &access).unwrap();
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.role, RoleLabel::User);

        let renewed = app
            .server
            .post("/auth/v1/refresh-token")
            .json(&json!({ "refresh_token": refresh }))
            .await;
        renewed.assert_status_ok();
        let renewed = renewed.json::<RefreshTokenResponse>().refresh_token;
        assert!(app.state.auth.tokens().verify(TokenClass::Refresh, &renewed).is_ok());
    }

    #[tokio::test]
    async fn test_bad_login_is_unauthorized() {
        let app = TestApp::new(test_config()).await;
        app.add_user("alice", "s3cret", RoleLabel::User).await;

        for body in [
            json!({"username": "alice", "password": "wrong"}),
            json!({"username": "nobody", "password": "s3cret"}),
        ] {
            let response = app.server.post("/auth/v1/login").json(&body).await;
            response.assert_status_unauthorized();
            response.assert_text("Invalid username or password");
        }
    }

    #[tokio::test]
    async fn test_access_token_endpoint_rejects_access_token() {
        let app = TestApp::new(test_config()).await;
        app.add_user("alice", "s3cret", RoleLabel::User).await;
        let access = app.access_token("alice", "s3cret").await;

        let response = app
            .server
            .post("/auth/v1/access-token")
            .json(&json!({ "refresh_token": access }))
            .await;
        response.assert_status_unauthorized();
    }

    #[tokio::test]
    async fn test_check() {
        let mut config = test_config();
        config.access.endpoints.insert("/admin/purge".to_string(), RoleLabel::Admin);
        let app = TestApp::new(config).await;
        app.add_user("alice", "s3cret", RoleLabel::User).await;
        app.add_user("root", "s3cret", RoleLabel::Admin).await;
        let alice = app.access_token("alice", "s3cret").await;
        let root = app.access_token("root", "s3cret").await;

        // No rule: allowed for anyone
        app.server
            .post("/auth/v1/check")
            .json(&json!({"endpoint_address": "/admin/delete"}))
            .await
            .assert_status(axum::http::StatusCode::NO_CONTENT);

        app.server
            .post("/auth/v1/check")
            .authorization_bearer(&alice)
            .json(&json!({"endpoint_address": "/admin/purge"}))
            .await
            .assert_status_forbidden();

        app.server
            .post("/auth/v1/check")
            .json(&json!({"endpoint_address": "/admin/purge"}))
            .await
            .assert_status_forbidden();

        app.server
            .post("/auth/v1/check")
            .authorization_bearer(&root)
            .json(&json!({"endpoint_address": "/admin/purge"}))
            .await
            .assert_status(axum::http::StatusCode::NO_CONTENT);

        app.server
            .post("/auth/v1/check")
            .add_header("authorization", "Basic dXNlcjpwYXNz")
            .json(&json!({"endpoint_address": "/admin/delete"}))
            .await
            .assert_status_unauthorized();
    }
}
