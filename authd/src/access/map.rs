//! Endpoint access rules and where they come from.

use crate::{
    cache::{
        Cache, CacheError,
        aside::{CacheCodec, fetch_or_hydrate},
    },
    db::{models::audit::AuditLogCreateDBRequest, transaction::TransactionManager},
    errors::{Error, Result},
    types::{AuditMethod, RoleLabel},
};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::instrument;

/// Endpoint → least privileged role allowed to call it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointAccessMap {
    rules: HashMap<String, RoleLabel>,
}

impl EndpointAccessMap {
    pub fn required_role(&self, endpoint: &str) -> Option<RoleLabel> {
        self.rules.get(endpoint).copied()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Endpoints requiring exactly `role`, sorted.
    pub fn endpoints_for(&self, role: RoleLabel) -> Vec<String> {
        let mut endpoints: Vec<String> = self
            .rules
            .iter()
            .filter(|(_, required)| **required == role)
            .map(|(endpoint, _)| endpoint.clone())
            .collect();
        endpoints.sort();
        endpoints
    }
}

impl<S: Into<String>> FromIterator<(S, RoleLabel)> for EndpointAccessMap {
    fn from_iter<I: IntoIterator<Item = (S, RoleLabel)>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().map(|(endpoint, role)| (endpoint.into(), role)).collect(),
        }
    }
}

/// Where the endpoint access rules are loaded from.
#[async_trait]
pub trait AccessSource: Send + Sync {
    async fn load(&self) -> Result<EndpointAccessMap>;
}

/// Rules fixed in configuration.
pub struct StaticAccessSource {
    map: EndpointAccessMap,
}

impl StaticAccessSource {
    pub fn new(map: EndpointAccessMap) -> Self {
        Self { map }
    }
}

#[async_trait]
impl AccessSource for StaticAccessSource {
    async fn load(&self) -> Result<EndpointAccessMap> {
        Ok(self.map.clone())
    }
}

const ACCESS_KEY_PREFIX: &str = "access";

/// Role sets outlive the marker by this much, so a present marker always has its sets behind it.
const SET_EXPIRY_GRACE: Duration = Duration::from_secs(30);

fn role_set_key(prefix: &str, role: RoleLabel) -> String {
    format!("{prefix}:{role}")
}

fn marker_key(prefix: &str) -> String {
    format!("{prefix}:loaded")
}

/// Stores the map as one set of endpoints per role, `access:admin` and `access:user`.
///
/// The sets are only read while `access:loaded` exists. It is removed before the sets are
/// rewritten and set again once both are complete, so a write that fails halfway reads as a miss.
pub struct EndpointSetCodec;

#[async_trait]
impl CacheCodec for EndpointSetCodec {
    type Value = EndpointAccessMap;

    async fn read(&self, cache: &dyn Cache, key: &str) -> std::result::Result<EndpointAccessMap, CacheError> {
        cache.get(&marker_key(key)).await?;

        let mut rules = HashMap::new();
        // Admin last so that an endpoint present in both sets gets the stricter rule
        for role in [RoleLabel::User, RoleLabel::Admin] {
            match cache.set_members(&role_set_key(key, role)).await {
                Ok(endpoints) => rules.extend(endpoints.into_iter().map(|e| (e, role))),
                // A role with no endpoints has no set
                Err(CacheError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(EndpointAccessMap { rules })
    }

    async fn write(&self, cache: &dyn Cache, key: &str, value: &EndpointAccessMap, ttl: Duration) -> std::result::Result<(), CacheError> {
        let marker = marker_key(key);
        cache.delete(&marker).await?;
        for role in [RoleLabel::User, RoleLabel::Admin] {
            let set_key = role_set_key(key, role);
            cache.delete(&set_key).await?;
            cache.set_add(&set_key, &value.endpoints_for(role)).await?;
            cache.expire(&set_key, ttl.saturating_add(SET_EXPIRY_GRACE)).await?;
        }
        cache.set(&marker, "1", ttl).await
    }
}

/// Rules from the `endpoint_access` table, read through the cache.
pub struct StoreAccessSource {
    cache: Arc<dyn Cache>,
    transactions: TransactionManager,
    ttl: Duration,
}

impl StoreAccessSource {
    pub fn new(cache: Arc<dyn Cache>, transactions: TransactionManager, ttl: Duration) -> Self {
        Self { cache, transactions, ttl }
    }

    /// Drop the cached rules so the next load reads the table.
    pub async fn evict(cache: &dyn Cache) -> std::result::Result<(), CacheError> {
        cache.delete(&marker_key(ACCESS_KEY_PREFIX)).await?;
        for role in [RoleLabel::User, RoleLabel::Admin] {
            cache.delete(&role_set_key(ACCESS_KEY_PREFIX, role)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AccessSource for StoreAccessSource {
    #[instrument(skip(self), err)]
    async fn load(&self) -> Result<EndpointAccessMap> {
        fetch_or_hydrate(self.cache.as_ref(), &EndpointSetCodec, ACCESS_KEY_PREFIX, self.ttl, || {
            self.transactions
                .read_committed(AuditLogCreateDBRequest::new(AuditMethod::LoadAccess, "endpoint_access"), |tx| {
                    Box::pin(async move {
                        let rows = tx.list_endpoint_access().await.map_err(Error::persistence("list endpoint access"))?;
                        Ok(rows
                            .into_iter()
                            .map(|row| (row.endpoint, RoleLabel::from(row.is_admin)))
                            .collect::<EndpointAccessMap>())
                    })
                })
        })
        .await
    }
}
