//! OpenAPI document served at `/openapi.json`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{api, types::RoleLabel};

struct BearerAddon;

impl Modify for BearerAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("Access token from `POST /auth/v1/access-token`"))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "authd", description = "Token issuance, user records and endpoint access checks"),
    modifiers(&BearerAddon),
    paths(
        api::handlers::auth::login,
        api::handlers::auth::get_access_token,
        api::handlers::auth::get_refresh_token,
        api::handlers::auth::check,
        api::handlers::users::create_user,
        api::handlers::users::get_user,
        api::handlers::users::update_user,
        api::handlers::users::delete_user,
        api::handlers::health::healthz,
    ),
    components(schemas(
        RoleLabel,
        api::models::auth::LoginRequest,
        api::models::auth::RefreshTokenRequest,
        api::models::auth::RefreshTokenResponse,
        api::models::auth::AccessTokenResponse,
        api::models::auth::CheckRequest,
        api::models::users::UserCreate,
        api::models::users::UserCreateResponse,
        api::models::users::UserUpdate,
        api::models::users::UserResponse,
    )),
    tags(
        (name = "auth", description = "Login, token exchange and endpoint checks"),
        (name = "users", description = "User records"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;
