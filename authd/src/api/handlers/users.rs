use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    AppState,
    api::models::users::{UserCreate, UserCreateResponse, UserResponse, UserUpdate},
    errors::Error,
    types::{RoleLabel, UserId},
    users::{NewUser, UserUpdate as StoreUserUpdate},
};

/// Create a user
#[utoipa::path(
    post,
    path = "/users/v1/users",
    request_body = UserCreate,
    tag = "users",
    responses(
        (status = 201, description = "User created", body = UserCreateResponse),
        (status = 400, description = "Passwords do not match or invalid data"),
        (status = 409, description = "Username or email already taken"),
    )
)]
#[tracing::instrument(skip_all, fields(name = %request.name))]
pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<UserCreate>,
) -> Result<(StatusCode, Json<UserCreateResponse>), Error> {
    if request.name.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "Username must not be empty".to_string(),
        });
    }
    if request.password.is_empty() {
        return Err(Error::BadRequest {
            message: "Password must not be empty".to_string(),
        });
    }
    if request.password != request.password_confirm {
        return Err(Error::BadRequest {
            message: "Passwords do not match".to_string(),
        });
    }

    let id = state
        .users
        .create(NewUser {
            name: request.name,
            email: request.email,
            password: request.password,
            role: request.role.unwrap_or(RoleLabel::User),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(UserCreateResponse { id })))
}

/// Get a user by ID
#[utoipa::path(
    get,
    path = "/users/v1/users/{id}",
    tag = "users",
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User found", body = UserResponse),
        (status = 404, description = "User not found"),
        (status = 503, description = "Cache unavailable"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = id))]
pub async fn get_user(State(state): State<AppState>, Path(id): Path<UserId>) -> Result<Json<UserResponse>, Error> {
    Ok(Json(state.users.get(id).await?.into()))
}

/// Change a user's name or email
#[utoipa::path(
    patch,
    path = "/users/v1/users/{id}",
    request_body = UserUpdate,
    tag = "users",
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 204, description = "User updated"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Username or email already taken"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = id))]
pub async fn update_user(State(state): State<AppState>, Path(id): Path<UserId>, Json(request): Json<UserUpdate>) -> Result<StatusCode, Error> {
    state
        .users
        .update(
            id,
            StoreUserUpdate {
                name: request.name,
                email: request.email,
            },
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Delete a user
#[utoipa::path(
    delete,
    path = "/users/v1/users/{id}",
    tag = "users",
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 404, description = "User not found"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = id))]
pub async fn delete_user(State(state): State<AppState>, Path(id): Path<UserId>) -> Result<StatusCode, Error> {
    state.users.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
