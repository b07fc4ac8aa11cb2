//! Bloom Filter — a cheap "have we ever seen this key respond with a
//! not-found/gone status" hint, consulted before a full negative-cache
//! lookup so a cold miss doesn't need a KV round trip for a key nobody has
//! ever requested.
//!
//! Only meaningful when the KV store is shared across instances
//! ([`crate::kv::KvBackendKind::Redis`]); against the in-process fallback
//! every instance would need its own filter warmed independently, which
//! defeats the point, so [`BloomFilter::probe`] always reports "maybe" and
//! [`BloomFilter::add`] is a no-op in that mode.

use std::sync::Arc;

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::kv::{KvBackendKind, KvStore};

pub struct BloomFilter {
    kv: Arc<dyn KvStore>,
    bitfield_key: String,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Sizes the filter for `expected_items` entries at `false_positive_rate`
    /// using the standard optimal-bloom formulas:
    /// `m = -(n * ln(p)) / (ln 2)^2`, `k = (m / n) * ln 2`.
    pub fn new(
        kv: Arc<dyn KvStore>,
        bitfield_key: impl Into<String>,
        expected_items: u64,
        false_positive_rate: f64,
    ) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(1e-6, 0.5);
        let ln2 = std::f64::consts::LN_2;

        let m = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(8.0) as u64;
        let k = ((m as f64 / n) * ln2).round().clamp(1.0, 16.0) as u32;

        Self {
            kv,
            bitfield_key: bitfield_key.into(),
            num_bits: m,
            num_hashes: k,
        }
    }

    fn enabled(&self) -> bool {
        self.kv.kind() == KvBackendKind::Redis
    }

    /// Whether this filter is backed by the shared KV store and therefore
    /// actually filtering, rather than reporting "maybe" for everything.
    /// Surfaced on `/health` as the `bloom` component.
    pub fn is_enabled(&self) -> bool {
        self.enabled()
    }

    pub async fn add(&self, item: &str) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        for offset in self.offsets(item) {
            self.kv.bit_set(&self.bitfield_key, offset).await?;
        }
        Ok(())
    }

    /// Returns `false` only when `item` is provably absent. `true` means
    /// "maybe present" (or the filter is disabled, in which case every item
    /// is treated as maybe-present so callers fall through to the real
    /// lookup instead of trusting a filter that was never populated).
    pub async fn probe(&self, item: &str) -> Result<bool> {
        if !self.enabled() {
            return Ok(true);
        }
        for offset in self.offsets(item) {
            if !self.kv.bit_get(&self.bitfield_key, offset).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Kirsch-Mitzenmacher double hashing: derive `k` bit offsets from two
    /// independent 64-bit halves of a single SHA-256 digest instead of
    /// running `k` separate hash functions.
    fn offsets(&self, item: &str) -> Vec<u64> {
        let digest = Sha256::digest(item.as_bytes());
        let h1 = u64::from_le_bytes(digest[0..8].try_into().unwrap());
        let h2 = u64::from_le_bytes(digest[8..16].try_into().unwrap());

        (0..self.num_hashes)
            .map(|i| h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::fallback::FallbackKvStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;

    /// Wraps the fallback store but reports itself as the shared backend,
    /// so bloom-filter behavior can be exercised without a real Redis.
    struct RedisShapedStore(Arc<FallbackKvStore>);

    #[async_trait]
    impl KvStore for RedisShapedStore {
        fn kind(&self) -> KvBackendKind {
            KvBackendKind::Redis
        }
        async fn get(&self, key: &str) -> Result<Option<Bytes>> {
            self.0.get(key).await
        }
        async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
            self.0.set(key, value, ttl).await
        }
        async fn del(&self, key: &str) -> Result<()> {
            self.0.del(key).await
        }
        async fn del_matching(&self, pattern: &str) -> Result<u64> {
            self.0.del_matching(pattern).await
        }
        async fn incr(&self, key: &str, by: i64, ttl_on_create: Option<Duration>) -> Result<i64> {
            self.0.incr(key, by, ttl_on_create).await
        }
        async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
            self.0.expire(key, ttl).await
        }
        async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool> {
            self.0.set_if_absent(key, value, ttl).await
        }
        async fn del_if_equal(&self, key: &str, value: &[u8]) -> Result<bool> {
            self.0.del_if_equal(key, value).await
        }
        async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
            self.0.publish(channel, payload).await
        }
        async fn subscribe(&self, channel: &str) -> Result<Box<dyn crate::kv::KvSubscription>> {
            self.0.subscribe(channel).await
        }
        async fn bit_set(&self, key: &str, offset: u64) -> Result<()> {
            self.0.bit_set(key, offset).await
        }
        async fn bit_get(&self, key: &str, offset: u64) -> Result<bool> {
            self.0.bit_get(key, offset).await
        }
    }

    fn redis_shaped_store() -> Arc<dyn KvStore> {
        Arc::new(RedisShapedStore(FallbackKvStore::new()))
    }

    #[tokio::test]
    async fn disabled_against_fallback_always_reports_maybe() {
        let kv = FallbackKvStore::new();
        let filter = BloomFilter::new(kv, "bloom:routeA", 1000, 0.01);
        assert!(filter.probe("never-added").await.unwrap());
    }

    #[tokio::test]
    async fn added_item_probes_present_when_enabled() {
        let kv = redis_shaped_store();
        let filter = BloomFilter::new(kv, "bloom:routeB", 1000, 0.01);
        filter.add("/v1/widgets/42").await.unwrap();
        assert!(filter.probe("/v1/widgets/42").await.unwrap());
    }

    #[tokio::test]
    async fn unadded_item_usually_probes_absent_when_enabled() {
        let kv = redis_shaped_store();
        let filter = BloomFilter::new(kv, "bloom:routeC", 1000, 0.01);
        filter.add("/v1/widgets/42").await.unwrap();
        assert!(!filter.probe("/v1/widgets/999").await.unwrap());
    }

    proptest::proptest! {
        /// No false negatives: whatever was added always probes present,
        /// for any set of arbitrary items.
        #[test]
        fn every_added_item_always_probes_present(
            items in proptest::collection::vec(proptest::string::string_regex("[a-zA-Z0-9/_-]{1,40}").unwrap(), 1..30),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let kv = redis_shaped_store();
                let filter = BloomFilter::new(kv, "bloom:proptest", 1000, 0.01);
                for item in &items {
                    filter.add(item).await.unwrap();
                }
                for item in &items {
                    assert!(filter.probe(item).await.unwrap(), "false negative for {item:?}");
                }
            });
        }
    }
}
