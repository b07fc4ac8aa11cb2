//! Admin invalidation surface — the narrow interface the core consumes from
//! the (out-of-scope) admin HTTP surface: a `config:changed` pub/sub topic
//! carrying `{entity, id}`, plus a `purge(glob)` KV translation for cache
//! invalidation. Both are unit-testable without any HTTP transport, per the
//! admin surface being an external collaborator rather than a core feature.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::ConfigCache;
use crate::kv::KvStore;

pub const CONFIG_CHANGED_TOPIC: &str = "config:changed";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Tenant,
    ApiKey,
    Route,
    CachePolicy,
    CachePurge,
    Unblock,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigEvent {
    pub entity: Entity,
    pub id: String,
}

/// Consumes `config:changed` events and reacts: tenant/key/route/policy
/// mutations invalidate the whole Config Cache snapshot (the snapshot is
/// already cheap to reload and doesn't support partial patching); cache
/// purges and unblocks translate directly into KV deletes.
pub struct AdminConsumer {
    config_cache: Arc<ConfigCache>,
    kv: Arc<dyn KvStore>,
}

impl AdminConsumer {
    pub fn new(config_cache: Arc<ConfigCache>, kv: Arc<dyn KvStore>) -> Self {
        Self { config_cache, kv }
    }

    pub async fn handle(&self, event: &ConfigEvent) -> Result<()> {
        match event.entity {
            Entity::Tenant | Entity::ApiKey | Entity::Route | Entity::CachePolicy => {
                self.config_cache.invalidate().await?;
            }
            Entity::CachePurge => {
                self.purge(&event.id).await?;
            }
            Entity::Unblock => {
                self.kv.del(&format!("abuse:block:{}", event.id)).await?;
            }
        }
        Ok(())
    }

    /// Deletes every KV cache entry matching `glob` (`*` is the only
    /// wildcard) via [`KvStore::del_matching`] — a `DashMap` scan against
    /// the fallback store, a server-side `SCAN ... MATCH` against Redis.
    pub async fn purge(&self, glob: &str) -> Result<()> {
        self.kv.del_matching(glob).await?;
        Ok(())
    }

    /// Subscribes to [`CONFIG_CHANGED_TOPIC`] and drives [`Self::handle`]
    /// for every message until the subscription closes.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut sub = self.kv.subscribe(CONFIG_CHANGED_TOPIC).await?;
        while let Some(msg) = sub.recv().await {
            match serde_json::from_slice::<ConfigEvent>(&msg.payload) {
                Ok(event) => {
                    if let Err(e) = self.handle(&event).await {
                        tracing::warn!(error = %e, entity = ?event.entity, "failed to apply config event");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "malformed config:changed payload"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfigSource;
    use crate::kv::fallback::FallbackKvStore;
    use bytes::Bytes;

    #[tokio::test]
    async fn unblock_event_deletes_the_block_key() {
        let kv = FallbackKvStore::new();
        kv.set(
            "abuse:block:key-1",
            Bytes::from_static(b"{}"),
            Some(std::time::Duration::from_secs(60)),
        )
        .await
        .unwrap();

        let config_cache = ConfigCache::new(Arc::new(StaticConfigSource::new(vec![], vec![], vec![], vec![])))
            .await
            .unwrap();
        let consumer = AdminConsumer::new(config_cache, kv.clone());

        consumer
            .handle(&ConfigEvent {
                entity: Entity::Unblock,
                id: "key-1".into(),
            })
            .await
            .unwrap();

        assert!(kv.get("abuse:block:key-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cache_purge_event_deletes_the_named_key() {
        let kv = FallbackKvStore::new();
        kv.set("cache:abc", Bytes::from_static(b"x"), None).await.unwrap();

        let config_cache = ConfigCache::new(Arc::new(StaticConfigSource::new(vec![], vec![], vec![], vec![])))
            .await
            .unwrap();
        let consumer = AdminConsumer::new(config_cache, kv.clone());

        consumer
            .handle(&ConfigEvent {
                entity: Entity::CachePurge,
                id: "cache:abc".into(),
            })
            .await
            .unwrap();

        assert!(kv.get("cache:abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cache_purge_event_deletes_every_matching_key() {
        let kv = FallbackKvStore::new();
        kv.set("cache:abc", Bytes::from_static(b"x"), None).await.unwrap();
        kv.set("cache:def", Bytes::from_static(b"y"), None).await.unwrap();
        kv.set("neg:abc", Bytes::from_static(b"z"), None).await.unwrap();

        let config_cache = ConfigCache::new(Arc::new(StaticConfigSource::new(vec![], vec![], vec![], vec![])))
            .await
            .unwrap();
        let consumer = AdminConsumer::new(config_cache, kv.clone());

        consumer
            .handle(&ConfigEvent {
                entity: Entity::CachePurge,
                id: "cache:*".into(),
            })
            .await
            .unwrap();

        assert!(kv.get("cache:abc").await.unwrap().is_none());
        assert!(kv.get("cache:def").await.unwrap().is_none());
        assert!(kv.get("neg:abc").await.unwrap().is_some());
    }
}
