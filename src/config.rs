//! Config Cache — an in-memory, copy-on-write view of tenants, API keys,
//! routes and cache policies, refreshed from a pluggable [`ConfigSource`]
//! on a periodic tick and invalidated early by `config:changed` pub/sub
//! events.
//!
//! The admin surface that actually mutates tenants/keys/routes is an
//! external collaborator out of scope for this crate; [`ConfigSource`] is
//! the narrow read interface this crate needs from whatever persistence
//! layer a deployment wires in, with [`StaticConfigSource`] as an in-memory
//! implementation for tests and small deployments. The copy-on-write swap
//! favors the same lock-free-reads preference as `DashMap` elsewhere in
//! this crate, generalized to whole-table swaps via `arc-swap`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ApiKeyStatus {
    Active,
    Disabled,
    Revoked,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub tenant_id: String,
    pub hashed_secret: String,
    pub prefix: String,
    pub status: ApiKeyStatus,
    pub rate_limit_rps: f64,
    pub rate_limit_burst: f64,
    #[serde(default)]
    pub rate_limit_algorithm: crate::ratelimit::Algorithm,
    pub quota_daily: Option<u64>,
    pub quota_monthly: Option<u64>,
    #[serde(default)]
    pub last_used_at: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub is_active: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachePolicy {
    pub id: String,
    pub ttl_seconds: u64,
    pub stale_seconds: u64,
    pub vary_headers: Vec<String>,
    pub cacheable_statuses: Vec<u16>,
    pub cacheable_methods: Vec<String>,
    pub max_body_bytes: usize,
    pub cache_no_store: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub name: String,
    pub path_pattern: String,
    pub methods: Vec<String>,
    pub upstream_base_url: String,
    pub timeout_ms: u64,
    pub policy_id: Option<String>,
    pub priority: i32,
    pub is_active: bool,
}

/// A point-in-time snapshot handed out by [`ConfigCache::snapshot`]. Cheap
/// to clone (an `Arc` bump); readers never see a partially-updated table.
#[derive(Clone, Default)]
pub struct ConfigSnapshot {
    pub tenants: Arc<HashMap<String, Tenant>>,
    pub api_keys_by_hash: Arc<HashMap<String, ApiKey>>,
    pub routes: Arc<Vec<Route>>,
    pub policies: Arc<HashMap<String, CachePolicy>>,
}

impl ConfigSnapshot {
    pub fn authenticate(&self, hashed_secret: &str) -> Option<(&ApiKey, &Tenant)> {
        let key = self.api_keys_by_hash.get(hashed_secret)?;
        if key.status != ApiKeyStatus::Active {
            return None;
        }
        let tenant = self.tenants.get(&key.tenant_id)?;
        if !tenant.is_active {
            return None;
        }
        Some((key, tenant))
    }

    pub fn policy_for(&self, route: &Route) -> Option<&CachePolicy> {
        route.policy_id.as_ref().and_then(|id| self.policies.get(id))
    }
}

/// The read interface this crate needs from whatever persistence store an
/// operator's admin surface actually writes to.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> Result<ConfigSnapshot>;
}

/// In-memory [`ConfigSource`] — a fixed table handed in at construction,
/// useful for demos and tests where there is no real persistence layer.
pub struct StaticConfigSource(ConfigSnapshot);

impl StaticConfigSource {
    pub fn new(tenants: Vec<Tenant>, api_keys: Vec<ApiKey>, routes: Vec<Route>, policies: Vec<CachePolicy>) -> Self {
        Self(ConfigSnapshot {
            tenants: Arc::new(tenants.into_iter().map(|t| (t.id.clone(), t)).collect()),
            api_keys_by_hash: Arc::new(
                api_keys
                    .into_iter()
                    .map(|k| (k.hashed_secret.clone(), k))
                    .collect(),
            ),
            routes: Arc::new(routes),
            policies: Arc::new(policies.into_iter().map(|p| (p.id.clone(), p)).collect()),
        })
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn load(&self) -> Result<ConfigSnapshot> {
        Ok(self.0.clone())
    }
}

/// Copy-on-write cache in front of a [`ConfigSource`], refreshed on a timer
/// and by explicit [`ConfigCache::invalidate`] calls driven by `config:changed`
/// events (see [`crate::admin`]).
pub struct ConfigCache {
    source: Arc<dyn ConfigSource>,
    current: ArcSwap<ConfigSnapshot>,
    last_refresh_ok: std::sync::atomic::AtomicBool,
}

impl ConfigCache {
    pub async fn new(source: Arc<dyn ConfigSource>) -> Result<Arc<Self>> {
        let snapshot = source.load().await?;
        Ok(Arc::new(Self {
            source,
            current: ArcSwap::from_pointee(snapshot),
            last_refresh_ok: std::sync::atomic::AtomicBool::new(true),
        }))
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        (**self.current.load()).clone()
    }

    /// Whether the most recent load from the backing [`ConfigSource`]
    /// (initial load, periodic refresh, or `config:changed` invalidation)
    /// succeeded. Surfaced on `/health` as the `db` component.
    pub fn is_healthy(&self) -> bool {
        self.last_refresh_ok.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub async fn invalidate(&self) -> Result<()> {
        let result = self.source.load().await;
        self.last_refresh_ok
            .store(result.is_ok(), std::sync::atomic::Ordering::Relaxed);
        let fresh = result?;
        self.current.store(Arc::new(fresh));
        Ok(())
    }

    /// Spawns the periodic full refresh. The returned handle can be aborted
    /// at shutdown.
    pub fn spawn_refresh_loop(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.invalidate().await {
                    tracing::warn!(error = %e, "config cache periodic refresh failed");
                }
            }
        })
    }
}

/// Environment-driven startup configuration, parsed with `envy`. Field names
/// are lower-cased, underscore-separated forms of the corresponding
/// environment variables (e.g. `DEFAULT_RATE_LIMIT_RPS` -> `default_rate_limit_rps`).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_rate_limit_rps")]
    pub default_rate_limit_rps: f64,
    #[serde(default = "default_rate_limit_burst")]
    pub default_rate_limit_burst: f64,

    #[serde(default = "default_abuse_ewma_alpha")]
    pub abuse_ewma_alpha: f64,
    #[serde(default = "default_abuse_zscore_threshold")]
    pub abuse_zscore_threshold: f64,
    #[serde(default = "default_abuse_block_duration_seconds")]
    pub abuse_block_duration_seconds: u64,

    #[serde(default = "default_bloom_expected_items")]
    pub bloom_expected_items: u64,
    #[serde(default = "default_bloom_false_positive_rate")]
    pub bloom_false_positive_rate: f64,

    #[serde(default)]
    pub deployment_mode: DeploymentMode,

    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_default_timeout_ms: u64,

    pub persistence_url: String,
    pub shared_kv_url: String,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    #[default]
    Normal,
    Demo,
}

impl Settings {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }
}

fn default_rate_limit_rps() -> f64 {
    100.0
}
fn default_rate_limit_burst() -> f64 {
    200.0
}
fn default_abuse_ewma_alpha() -> f64 {
    0.3
}
fn default_abuse_zscore_threshold() -> f64 {
    3.0
}
fn default_abuse_block_duration_seconds() -> u64 {
    300
}
fn default_bloom_expected_items() -> u64 {
    10_000
}
fn default_bloom_false_positive_rate() -> f64 {
    0.01
}
fn default_upstream_timeout_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sample_snapshot() -> ConfigSnapshot {
        let source = StaticConfigSource::new(
            vec![Tenant {
                id: "t1".into(),
                name: "Acme".into(),
                is_active: true,
            }],
            vec![ApiKey {
                id: "k1".into(),
                tenant_id: "t1".into(),
                hashed_secret: "abc123".into(),
                prefix: "sk_abc1".into(),
                status: ApiKeyStatus::Active,
                rate_limit_rps: 10.0,
                rate_limit_burst: 20.0,
                rate_limit_algorithm: crate::ratelimit::Algorithm::TokenBucket,
                quota_daily: None,
                quota_monthly: None,
                last_used_at: None,
            }],
            vec![],
            vec![],
        );
        source.load().await.unwrap()
    }

    #[tokio::test]
    async fn authenticate_rejects_inactive_tenant() {
        let mut snapshot = sample_snapshot().await;
        let mut tenants = (*snapshot.tenants).clone();
        tenants.get_mut("t1").unwrap().is_active = false;
        snapshot.tenants = Arc::new(tenants);
        assert!(snapshot.authenticate("abc123").is_none());
    }

    #[tokio::test]
    async fn authenticate_accepts_active_key_and_tenant() {
        let snapshot = sample_snapshot().await;
        assert!(snapshot.authenticate("abc123").is_some());
        assert!(snapshot.authenticate("nope").is_none());
    }
}
