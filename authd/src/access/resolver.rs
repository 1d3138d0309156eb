use super::map::{AccessSource, EndpointAccessMap};
use crate::{
    cache::{
        Cache, CacheError,
        aside::{CacheCodec, fetch_or_hydrate},
    },
    config::AccessDefault,
    db::{models::audit::AuditLogCreateDBRequest, transaction::TransactionManager},
    errors::{Error, Result},
    types::{AuditMethod, RoleLabel},
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

/// Role flag stored as the scalar `"true"` (admin) or `"false"`.
pub struct RoleFlagCodec;

#[async_trait]
impl CacheCodec for RoleFlagCodec {
    type Value = RoleLabel;

    async fn read(&self, cache: &dyn Cache, key: &str) -> std::result::Result<RoleLabel, CacheError> {
        match cache.get(key).await?.as_str() {
            "true" => Ok(RoleLabel::Admin),
            "false" => Ok(RoleLabel::User),
            other => Err(CacheError::Decode {
                key: key.to_string(),
                message: format!("expected a role flag, found {other:?}"),
            }),
        }
    }

    async fn write(&self, cache: &dyn Cache, key: &str, value: &RoleLabel, ttl: Duration) -> std::result::Result<(), CacheError> {
        let flag = if value.is_admin() { "true" } else { "false" };
        cache.set(key, flag, ttl).await
    }
}

pub fn role_key(username: &str) -> String {
    format!("role:{username}")
}

/// Resolves user roles and decides whether an endpoint may be called.
///
/// The endpoint access map is loaded from its [`AccessSource`] the first time it is needed and
/// then kept for the life of the resolver. Concurrent first callers share a single load and all
/// observe the same map. A failed load is not stored, so the next caller tries again. There is no
/// invalidation: rule changes take effect when the process restarts.
pub struct RoleResolver {
    cache: Arc<dyn Cache>,
    transactions: TransactionManager,
    role_ttl: Duration,
    source: Arc<dyn AccessSource>,
    default_policy: AccessDefault,
    access_map: OnceCell<Arc<EndpointAccessMap>>,
}

impl RoleResolver {
    pub fn new(
        cache: Arc<dyn Cache>,
        transactions: TransactionManager,
        role_ttl: Duration,
        source: Arc<dyn AccessSource>,
        default_policy: AccessDefault,
    ) -> Self {
        Self {
            cache,
            transactions,
            role_ttl,
            source,
            default_policy,
            access_map: OnceCell::new(),
        }
    }

    /// Current role of `username`, read through the cache.
    #[instrument(skip(self), err)]
    pub async fn get_role(&self, username: &str) -> Result<RoleLabel> {
        let name = username.to_string();
        fetch_or_hydrate(self.cache.as_ref(), &RoleFlagCodec, &role_key(username), self.role_ttl, || {
            self.transactions
                .read_committed(AuditLogCreateDBRequest::new(AuditMethod::GetRole, format!("username={name}")), |tx| {
                    Box::pin(async move {
                        let user = tx.get_user_by_name(&name).await.map_err(Error::persistence("read user role"))?;
                        user.map(|u| RoleLabel::from(u.is_admin)).ok_or(Error::NotFound {
                            resource: "User".to_string(),
                            id: name,
                        })
                    })
                })
        })
        .await
    }

    /// The endpoint access map, loaded on first use.
    pub async fn resolve_access_map(&self) -> Result<Arc<EndpointAccessMap>> {
        self.access_map
            .get_or_try_init(|| async {
                let map = self.source.load().await?;
                info!(endpoints = map.len(), "Loaded endpoint access map");
                Ok::<_, Error>(Arc::new(map))
            })
            .await
            .cloned()
    }

    /// Allow or deny a call to `endpoint` by a caller holding `caller` (if known).
    ///
    /// An endpoint without a rule follows the default policy. An endpoint with a rule needs a
    /// caller whose role satisfies it.
    #[instrument(skip(self), err)]
    pub async fn check(&self, endpoint: &str, caller: Option<RoleLabel>) -> Result<()> {
        let map = self.resolve_access_map().await?;

        let allowed = match map.required_role(endpoint) {
            None => self.default_policy == AccessDefault::Allow,
            Some(required) => caller.is_some_and(|role| role.satisfies(required)),
        };
        debug!(allowed, "Checked endpoint access");

        if allowed {
            Ok(())
        } else {
            Err(Error::AccessDenied {
                endpoint: endpoint.to_string(),
            })
        }
    }
}
