//! Response Cache — TTL + stale-while-revalidate storage in front of the
//! upstream, with KV-backed single-flight so concurrent MISSes for the same
//! key only fetch the origin once.
//!
//! This solves the same "first caller does the work, everyone else waits
//! and replays the result" problem that an in-process idempotency-key cache
//! solves with a `DashMap<String, Entry>` and `tokio::sync::Notify`, except
//! the lease lives in the KV store (so it holds across gateway instances,
//! not just one process) and the wakeup is a KV pub/sub message instead of
//! a `Notify`.

pub mod entry;
pub mod key;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;

use crate::kv::KvStore;
use entry::{CacheEntry, Freshness};

pub enum Lookup {
    Hit(CacheEntry),
    Stale(CacheEntry),
    Miss,
}

pub struct ResponseCache {
    kv: Arc<dyn KvStore>,
}

impl ResponseCache {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn lookup(&self, cache_key: &str) -> Result<Lookup> {
        let Some(raw) = self.kv.get(cache_key).await? else {
            return Ok(Lookup::Miss);
        };
        let entry = CacheEntry::decode(&raw)?;
        let now = entry::now_epoch_secs();
        match entry.freshness(now) {
            Freshness::Fresh => Ok(Lookup::Hit(entry)),
            Freshness::Stale => Ok(Lookup::Stale(entry)),
            Freshness::Expired => Ok(Lookup::Miss),
        }
    }

    /// Negative entries use the same wire format as positive ones so a
    /// later successful fetch can overwrite a `neg:<hex>` record with a
    /// real `cache:<hex>` one without a schema change.
    pub async fn lookup_negative(&self, negative_key: &str) -> Result<Option<CacheEntry>> {
        match self.kv.get(negative_key).await? {
            Some(raw) => Ok(Some(CacheEntry::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn store_negative(&self, negative_key: &str, entry: &CacheEntry) -> Result<()> {
        let ttl = Duration::from_secs(entry.ttl_seconds.max(1));
        self.kv.set(negative_key, Bytes::from(entry.encode()?), Some(ttl)).await
    }

    pub async fn store(&self, cache_key: &str, entry: &CacheEntry) -> Result<()> {
        let ttl = Duration::from_secs(entry.kv_ttl_seconds());
        self.kv.set(cache_key, Bytes::from(entry.encode()?), Some(ttl)).await
    }

    pub async fn purge(&self, cache_key: &str) -> Result<()> {
        self.kv.del(cache_key).await
    }

    /// Tries to become the single fetcher for `cache_key`. Returns `true`
    /// if the caller now owns the lease and must fetch upstream and call
    /// [`Self::release_fetch_lease`] when done (success or failure).
    pub async fn acquire_fetch_lease(
        &self,
        cache_key: &str,
        lease_id: &str,
        ttl: Duration,
    ) -> Result<bool> {
        self.kv
            .set_if_absent(&lock_key(cache_key), Bytes::from(lease_id.to_string()), ttl)
            .await
    }

    pub async fn release_fetch_lease(&self, cache_key: &str, lease_id: &str) -> Result<()> {
        let _ = self.kv.del_if_equal(&lock_key(cache_key), lease_id.as_bytes()).await;
        self.kv
            .publish(&done_channel(cache_key), Bytes::from_static(b"done"))
            .await
    }

    /// Waits (best-effort) for the current fetcher to finish, up to
    /// `wait_timeout`. Callers must re-run [`Self::lookup`] afterward —
    /// this only signals "something happened", not success.
    pub async fn wait_for_fetch(&self, cache_key: &str, wait_timeout: Duration) -> Result<()> {
        let mut sub = self.kv.subscribe(&done_channel(cache_key)).await?;
        let _ = tokio::time::timeout(wait_timeout, sub.recv()).await;
        Ok(())
    }

    /// Revalidation lease: separate from the fetch lock so a STALE entry
    /// keeps serving to everyone else while exactly one instance
    /// refreshes it in the background.
    pub async fn acquire_revalidate_lease(
        &self,
        cache_key: &str,
        lease_id: &str,
        ttl: Duration,
    ) -> Result<bool> {
        self.kv
            .set_if_absent(&revalidate_key(cache_key), Bytes::from(lease_id.to_string()), ttl)
            .await
    }

    pub async fn release_revalidate_lease(&self, cache_key: &str, lease_id: &str) -> Result<()> {
        self.kv
            .del_if_equal(&revalidate_key(cache_key), lease_id.as_bytes())
            .await
            .map(|_| ())
    }
}

fn lock_key(cache_key: &str) -> String {
    format!("lock:{cache_key}")
}

fn revalidate_key(cache_key: &str) -> String {
    format!("revalidate:{cache_key}")
}

fn done_channel(cache_key: &str) -> String {
    format!("cache:done:{cache_key}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::fallback::FallbackKvStore;

    #[tokio::test]
    async fn store_then_lookup_is_a_hit() {
        let cache = ResponseCache::new(FallbackKvStore::new());
        let entry = CacheEntry::new(200, vec![], b"hello".to_vec(), 60, 30);
        cache.store("cache:abc", &entry).await.unwrap();
        match cache.lookup("cache:abc").await.unwrap() {
            Lookup::Hit(e) => assert_eq!(e.body, b"hello"),
            _ => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn only_one_caller_acquires_the_fetch_lease() {
        let cache = ResponseCache::new(FallbackKvStore::new());
        let first = cache
            .acquire_fetch_lease("cache:abc", "lease-1", Duration::from_secs(5))
            .await
            .unwrap();
        let second = cache
            .acquire_fetch_lease("cache:abc", "lease-2", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn negative_entry_round_trips() {
        let cache = ResponseCache::new(FallbackKvStore::new());
        let entry = CacheEntry::new(404, vec![], vec![], 60, 0);
        cache.store_negative("neg:abc", &entry).await.unwrap();
        let found = cache.lookup_negative("neg:abc").await.unwrap();
        assert_eq!(found.unwrap().status, 404);
        assert!(cache.lookup_negative("neg:missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_entry_is_a_miss() {
        let cache = ResponseCache::new(FallbackKvStore::new());
        assert!(matches!(cache.lookup("cache:nope").await.unwrap(), Lookup::Miss));
    }
}
