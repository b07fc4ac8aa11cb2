//! KV Store Adapter — the single abstraction every other component (cache,
//! rate limiter, quota counter, bloom filter, abuse detector) talks to
//! instead of touching a concrete backend directly.
//!
//! Two implementations ship: [`fallback::FallbackKvStore`], an in-process
//! `DashMap` used when no shared store is reachable (single-instance /
//! degraded mode), and [`redis_store::RedisKvStore`], a networked backend
//! so rate limits, quotas and cache entries are shared across gateway
//! instances. Both follow the same in-memory concurrency patterns as a
//! `DashMap<IpAddr, Bucket>` rate limiter, `Notify`-based request coalescing,
//! and a pub/sub arbiter, generalized into a networked-or-local trait.

pub mod fallback;
pub mod redis_store;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Which concrete backend is behind a [`KvStore`]; used by components
/// (the bloom filter in particular) that must change behavior when running
/// against the non-shared fallback.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KvBackendKind {
    Redis,
    Fallback,
}

/// A message delivered to a subscriber of a KV pub/sub channel.
#[derive(Clone, Debug)]
pub struct KvMessage {
    pub channel: String,
    pub payload: Bytes,
}

/// An open subscription to one or more channels.
#[async_trait]
pub trait KvSubscription: Send {
    async fn recv(&mut self) -> Option<KvMessage>;
}

/// The narrow KV interface every gateway component is built against.
///
/// Implementations are responsible for their own connection management;
/// callers never see a connection handle, only operations.
#[async_trait]
pub trait KvStore: Send + Sync {
    fn kind(&self) -> KvBackendKind;

    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Sets `key` to `value`, optionally with a TTL. Overwrites any
    /// existing value and its TTL.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Deletes every key matching `pattern` (`*` as the only wildcard,
    /// matched against the whole key). Returns the number of keys deleted.
    async fn del_matching(&self, pattern: &str) -> Result<u64>;

    /// Atomically increments `key` by `by`, creating it at `by` if absent.
    /// If the key did not previously exist and `ttl_on_create` is set, the
    /// TTL is applied in the same round trip (used by the quota counter to
    /// set the calendar-boundary expiry only on the first increment of a
    /// period).
    async fn incr(&self, key: &str, by: i64, ttl_on_create: Option<Duration>) -> Result<i64>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Sets `key` to `value` with `ttl` only if it does not already exist.
    /// Returns `true` if the set happened (lock acquired).
    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool>;

    /// Deletes `key` only if its current value equals `value`. Returns
    /// `true` if the delete happened (lock released by its owner).
    async fn del_if_equal(&self, key: &str, value: &[u8]) -> Result<bool>;

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()>;

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn KvSubscription>>;

    /// Sets a single bit at `offset` within the bitfield stored at `key`.
    async fn bit_set(&self, key: &str, offset: u64) -> Result<()>;

    async fn bit_get(&self, key: &str, offset: u64) -> Result<bool>;
}

/// Matches `text` against `pattern`, where `*` matches any run of
/// characters (including none) and every other character must match
/// literally. Used by [`fallback::FallbackKvStore::del_matching`] to
/// emulate server-side `SCAN ... MATCH` locally.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = text;

    if let Some(first) = parts.first() {
        if !rest.starts_with(*first) {
            return false;
        }
        rest = &rest[first.len()..];
    }
    if let Some(last) = parts.last() {
        if !rest.ends_with(*last) {
            return false;
        }
        rest = &rest[..rest.len() - last.len()];
    }
    for middle in &parts[1..parts.len().saturating_sub(1)] {
        if middle.is_empty() {
            continue;
        }
        match rest.find(middle) {
            Some(idx) => rest = &rest[idx + middle.len()..],
            None => return false,
        }
    }
    true
}

/// Startup probe: tries the shared backend once, falling back (and logging
/// a warning) if it is unreachable, per the deployment modes in the
/// configuration ambient stack.
pub async fn probe(shared: &dyn KvStore) -> bool {
    shared
        .set(
            "__apexgate_probe__",
            Bytes::from_static(b"1"),
            Some(Duration::from_secs(5)),
        )
        .await
        .is_ok()
}
