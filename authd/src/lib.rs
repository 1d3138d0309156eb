//! # authd: tokens, users and endpoint access
//!
//! `authd` issues JWTs for users stored in PostgreSQL, serves user records through a Redis
//! cache, and answers "may this caller call that endpoint" for other services.
//!
//! ## Flow
//!
//! A client logs in with a username and password and receives a long-lived **refresh token**. It
//! trades the refresh token for a short-lived **access token** carrying its current role, and
//! presents the access token when a gateway asks `authd` to check an endpoint. Refresh and access
//! tokens are signed with different secrets, so neither can stand in for the other.
//!
//! ## Architecture
//!
//! - [`auth::AuthFacade`]: login, token exchange and checks, built on [`auth::TokenService`] and
//!   [`access::RoleResolver`].
//! - [`users::CacheAsideUserStore`]: user records, read through the cache and written through the
//!   store.
//! - [`access::RoleResolver`]: current role of a user (cached) and the endpoint access map (loaded
//!   once per process).
//! - [`db::TransactionManager`]: every store read and write runs in a read-committed transaction
//!   that also appends an audit log row, so the two commit together.
//! - [`cache`]: the Redis-shaped cache seam, with Redis and in-memory backends.
//!
//! The HTTP surface in [`api`] is a thin axum layer over these services.
//!
//! ## Configuration
//!
//! See [`config`]. The two token secrets are required; everything else has a default that runs
//! with in-memory backends.

pub mod access;
pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
mod openapi;
pub mod telemetry;
pub mod types;
pub mod users;

#[cfg(test)]
mod test_utils;

use crate::{
    access::{AccessSource, RoleResolver, StaticAccessSource, StoreAccessSource},
    auth::{AuthFacade, TokenService, middleware::require_access, password::hash_password_blocking},
    cache::{Cache, memory::MemoryCache, redis::RedisCache},
    config::{AccessSourceKind, AdminConfig, CacheKind, DatabaseConfig},
    db::{
        PrimaryStore, TransactionManager,
        memory::MemoryStore,
        models::{audit::AuditLogCreateDBRequest, users::UserCreateDBRequest},
        postgres::PgStore,
    },
    errors::Error,
    openapi::ApiDoc,
    types::{AuditMethod, RoleLabel},
    users::CacheAsideUserStore,
};
use axum::{
    Json, Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::{collections::BTreeMap, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info, instrument, warn};
use utoipa::OpenApi;

pub use config::Config;

/// Services shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub auth: Arc<AuthFacade>,
    pub users: Arc<CacheAsideUserStore>,
    pub cache: Arc<dyn Cache>,
}

impl AppState {
    /// Wire the services over an opened store and cache, then apply the startup writes:
    /// endpoint rules (when they live in the store) and the bootstrap admin.
    pub async fn assemble(config: Config, store: Arc<dyn PrimaryStore>, cache: Arc<dyn Cache>) -> anyhow::Result<Self> {
        let transactions = TransactionManager::new(store);

        let source: Arc<dyn AccessSource> = match config.access.source {
            AccessSourceKind::Static => Arc::new(StaticAccessSource::new(config.access.endpoints.clone().into_iter().collect())),
            AccessSourceKind::Store => {
                seed_endpoint_access(&transactions, cache.as_ref(), &config.access.endpoints).await?;
                Arc::new(StoreAccessSource::new(cache.clone(), transactions.clone(), config.cache.access_ttl))
            }
        };

        let roles = Arc::new(RoleResolver::new(
            cache.clone(),
            transactions.clone(),
            config.cache.role_ttl,
            source,
            config.access.default_policy,
        ));
        let auth = AuthFacade::new(TokenService::from_config(&config.auth)?, roles, transactions.clone(), &config.auth.password)?;
        let users = CacheAsideUserStore::new(cache.clone(), transactions.clone(), config.cache.user_ttl, config.auth.password.clone());

        if let Some(admin) = &config.admin {
            create_initial_admin_user(&transactions, admin, &config).await?;
        }

        Ok(Self {
            config,
            auth: Arc::new(auth),
            users: Arc::new(users),
            cache,
        })
    }
}

/// Get the authd database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Write the configured endpoint rules to the store and drop any cached copy.
#[instrument(skip_all, fields(count = endpoints.len()), err)]
async fn seed_endpoint_access(transactions: &TransactionManager, cache: &dyn Cache, endpoints: &BTreeMap<String, RoleLabel>) -> anyhow::Result<()> {
    if endpoints.is_empty() {
        return Ok(());
    }

    let rules: Vec<(String, bool)> = endpoints.iter().map(|(e, role)| (e.clone(), role.is_admin())).collect();
    transactions
        .read_committed(
            AuditLogCreateDBRequest::new(AuditMethod::SeedAccess, format!("endpoints={}", rules.len())),
            move |tx| {
                Box::pin(async move {
                    for (endpoint, is_admin) in &rules {
                        tx.upsert_endpoint_access(endpoint, *is_admin)
                            .await
                            .map_err(Error::persistence("seed endpoint access"))?;
                    }
                    Ok(())
                })
            },
        )
        .await?;

    if let Err(e) = StoreAccessSource::evict(cache).await {
        warn!(error = %e, "Failed to drop cached endpoint access after seeding");
    }
    info!("Seeded endpoint access rules");
    Ok(())
}

/// Create the configured admin user unless a user with that name exists. Returns whether one was
/// created.
#[instrument(skip_all, fields(username = %admin.username), err)]
pub async fn create_initial_admin_user(transactions: &TransactionManager, admin: &AdminConfig, config: &Config) -> anyhow::Result<bool> {
    let password_hash = hash_password_blocking(admin.password.clone(), config.auth.password.clone()).await?;
    let request = UserCreateDBRequest {
        name: admin.username.clone(),
        email: admin.email.clone(),
        password_hash,
        is_admin: true,
    };

    let created = transactions
        .read_committed(
            AuditLogCreateDBRequest::new(AuditMethod::BootstrapAdmin, format!("username={}", admin.username)),
            move |tx| {
                Box::pin(async move {
                    if tx.get_user_by_name(&request.name).await.map_err(Error::persistence("look up admin user"))?.is_some() {
                        return Ok(false);
                    }
                    tx.create_user(&request).await.map_err(Error::persistence("create admin user"))?;
                    Ok(true)
                })
            },
        )
        .await?;

    if created {
        info!("Created initial admin user");
    } else {
        debug!("Admin user already exists");
    }
    Ok(created)
}

/// Build the HTTP router over `state`.
pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/auth/v1/login", post(api::handlers::auth::login))
        .route("/auth/v1/access-token", post(api::handlers::auth::get_access_token))
        .route("/auth/v1/refresh-token", post(api::handlers::auth::get_refresh_token))
        .route("/auth/v1/check", post(api::handlers::auth::check));

    // Gated by the endpoint access map, keyed by route template
    let user_routes = Router::new()
        .route("/users/v1/users", post(api::handlers::users::create_user))
        .route(
            "/users/v1/users/{id}",
            get(api::handlers::users::get_user)
                .patch(api::handlers::users::update_user)
                .delete(api::handlers::users::delete_user),
        )
        .route_layer(from_fn_with_state(state.clone(), require_access));

    Router::new()
        .route("/healthz", get(api::handlers::health::healthz))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(auth_routes)
        .merge(user_routes)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// Open the configured primary store. Postgres stores are migrated on connect.
async fn setup_store(config: &Config) -> anyhow::Result<(Arc<dyn PrimaryStore>, Option<PgStore>)> {
    match &config.database {
        DatabaseConfig::Memory => {
            warn!("Using the in-memory store; data is lost on restart");
            Ok((Arc::new(MemoryStore::new()), None))
        }
        DatabaseConfig::External { url, pool } => {
            info!("Connecting to external database");
            let store = PgStore::connect(url, pool).await?;
            Ok((Arc::new(store.clone()), Some(store)))
        }
    }
}

/// Open the configured cache. A Redis cache that does not answer PING is logged, not fatal:
/// reads fail with 503 until it comes back.
async fn setup_cache(config: &Config) -> anyhow::Result<Arc<dyn Cache>> {
    match config.cache.kind {
        CacheKind::Memory => Ok(Arc::new(MemoryCache::new())),
        CacheKind::Redis => {
            let cache = RedisCache::from_config(&config.cache)?;
            if let Err(e) = cache.ping().await {
                warn!(error = %e, "Redis did not answer PING at startup");
            }
            Ok(Arc::new(cache))
        }
    }
}

pub struct Application {
    router: Router,
    config: Config,
    pg: Option<PgStore>,
}

impl Application {
    /// Open the store and cache, wire the services and build the router.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting authd with configuration: {:#?}", config);

        let (store, pg) = setup_store(&config).await?;
        let cache = setup_cache(&config).await?;
        let state = AppState::assemble(config.clone(), store, cache).await?;

        Ok(Self {
            router: build_router(state),
            config,
            pg,
        })
    }

    /// Start serving until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("authd listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        if let Some(pg) = self.pg {
            info!("Closing database connections...");
            pg.pool().close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();
        Ok(())
    }

    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AccessDefault,
        test_utils::{FlakyCache, test_config},
    };
    use std::time::Duration;

    #[test_log::test(tokio::test)]
    async fn test_application_starts_with_memory_backends() {
        let server = Application::new(test_config()).await.unwrap().into_test_server();

        server.get("/healthz").await.assert_status_ok();
        let doc = server.get("/openapi.json").await;
        doc.assert_status_ok();
        assert!(doc.text().contains("/auth/v1/login"));
    }

    #[tokio::test]
    async fn test_bootstrap_admin_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let transactions = TransactionManager::new(store.clone());
        let config = test_config();
        let admin = AdminConfig {
            username: "root".to_string(),
            email: "root@example.com".to_string(),
            password: "changeme".to_string(),
        };

        assert!(create_initial_admin_user(&transactions, &admin, &config).await.unwrap());
        assert!(!create_initial_admin_user(&transactions, &admin, &config).await.unwrap());

        assert_eq!(store.user_count(), 1);
        let audit = store.audit_entries();
        assert_eq!(audit.len(), 2);
        assert!(audit.iter().all(|entry| entry.method_name == "Bootstrap admin"));
    }

    #[tokio::test]
    async fn test_bootstrap_admin_can_log_in_as_admin() {
        let mut config = test_config();
        config.admin = Some(AdminConfig {
            username: "root".to_string(),
            email: "root@example.com".to_string(),
            password: "changeme".to_string(),
        });
        let state = AppState::assemble(config, Arc::new(MemoryStore::new()), Arc::new(MemoryCache::new()))
            .await
            .unwrap();

        let refresh = state.auth.login("root", "changeme").await.unwrap();
        let claims = state.auth.tokens().verify(auth::TokenClass::Refresh, &refresh).unwrap();
        assert_eq!(claims.role, RoleLabel::Admin);
    }

    #[tokio::test]
    async fn test_store_source_is_seeded_from_config() {
        let mut config = test_config();
        config.access.source = AccessSourceKind::Store;
        config.access.default_policy = AccessDefault::Deny;
        config.access.endpoints.insert("/reports".to_string(), RoleLabel::User);
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(FlakyCache::new());
        cache.inner().set_add("access:admin", &["/stale".to_string()]).await.unwrap();
        cache.inner().set("access:loaded", "1", Duration::from_secs(60)).await.unwrap();

        let state = AppState::assemble(config, store.clone(), cache.clone()).await.unwrap();

        assert!(!cache.inner().contains_key("access:admin"));
        assert!(state.auth.check("/reports", None).await.is_err());
        assert!(matches!(state.auth.check("/stale", None).await, Err(Error::AccessDenied { .. })));
        assert!(store.audit_entries().iter().any(|entry| entry.method_name == "Seed endpoint access"));
        // The map was loaded through the cache
        assert!(cache.inner().contains_key("access:user"));
    }
}
