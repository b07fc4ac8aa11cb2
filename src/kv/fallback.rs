//! In-process KV backend used when no shared store is configured or
//! reachable. Rate limits, quotas and cache coalescing still work, but only
//! within a single gateway instance — this is `DEPLOYMENT_MODE=standalone`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{KvBackendKind, KvMessage, KvStore, KvSubscription, glob_match};

struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|t| t > now).unwrap_or(true)
    }
}

/// `DashMap`-backed store, following the same `DashMap<IpAddr, Bucket>`
/// pattern as the rate limiter plus a periodic janitor task for expiry.
pub struct FallbackKvStore {
    entries: DashMap<String, Entry>,
    bitfields: DashMap<String, Vec<u8>>,
    channels: DashMap<String, broadcast::Sender<KvMessage>>,
}

impl FallbackKvStore {
    pub fn new() -> Arc<Self> {
        let store = Arc::new(Self {
            entries: DashMap::new(),
            bitfields: DashMap::new(),
            channels: DashMap::new(),
        });
        store.clone().spawn_janitor();
        store
    }

    fn spawn_janitor(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(30));
            loop {
                tick.tick().await;
                let now = Instant::now();
                self.entries.retain(|_, e| e.is_live(now));
            }
        });
    }

    fn channel(&self, name: &str) -> broadcast::Sender<KvMessage> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

impl Default for FallbackKvStore {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            bitfields: DashMap::new(),
            channels: DashMap::new(),
        }
    }
}

struct FallbackSubscription(broadcast::Receiver<KvMessage>);

#[async_trait]
impl KvSubscription for FallbackSubscription {
    async fn recv(&mut self) -> Option<KvMessage> {
        loop {
            match self.0.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[async_trait]
impl KvStore for FallbackKvStore {
    fn kind(&self) -> KvBackendKind {
        KvBackendKind::Fallback
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let now = Instant::now();
        Ok(self.entries.get(key).and_then(|e| {
            if e.is_live(now) {
                Some(e.value.clone())
            } else {
                None
            }
        }))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn del_matching(&self, pattern: &str) -> Result<u64> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        for key in &keys {
            self.entries.remove(key);
        }
        Ok(keys.len() as u64)
    }

    async fn incr(&self, key: &str, by: i64, ttl_on_create: Option<Duration>) -> Result<i64> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Bytes::from_static(b"0"),
            expires_at: ttl_on_create.map(|d| now + d),
        });

        let current: i64 = if entry.is_live(now) {
            std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0)
        } else {
            entry.expires_at = ttl_on_create.map(|d| now + d);
            0
        };

        let next = current + by;
        entry.value = Bytes::from(next.to_string());
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        if let Some(mut e) = self.entries.get_mut(key) {
            e.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut o) if !o.get().is_live(now) => {
                o.insert(Entry {
                    value,
                    expires_at: Some(now + ttl),
                });
                Ok(true)
            }
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(Entry {
                    value,
                    expires_at: Some(now + ttl),
                });
                Ok(true)
            }
        }
    }

    async fn del_if_equal(&self, key: &str, value: &[u8]) -> Result<bool> {
        let removed = match self.entries.get(key) {
            Some(e) if e.value.as_ref() == value => true,
            _ => false,
        };
        if removed {
            self.entries.remove(key);
        }
        Ok(removed)
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        let _ = self.channel(channel).send(KvMessage {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn KvSubscription>> {
        Ok(Box::new(FallbackSubscription(
            self.channel(channel).subscribe(),
        )))
    }

    async fn bit_set(&self, key: &str, offset: u64) -> Result<()> {
        let mut field = self.bitfields.entry(key.to_string()).or_default();
        let byte_idx = (offset / 8) as usize;
        if field.len() <= byte_idx {
            field.resize(byte_idx + 1, 0);
        }
        field[byte_idx] |= 1 << (offset % 8);
        Ok(())
    }

    async fn bit_get(&self, key: &str, offset: u64) -> Result<bool> {
        let byte_idx = (offset / 8) as usize;
        Ok(self
            .bitfields
            .get(key)
            .and_then(|f| f.get(byte_idx).copied())
            .map(|byte| byte & (1 << (offset % 8)) != 0)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_then_del_if_equal_round_trip() {
        let kv = FallbackKvStore::new();
        assert!(
            kv.set_if_absent("lock:a", Bytes::from_static(b"1"), Duration::from_secs(5))
                .await
                .unwrap()
        );
        assert!(
            !kv.set_if_absent("lock:a", Bytes::from_static(b"2"), Duration::from_secs(5))
                .await
                .unwrap()
        );
        assert!(kv.del_if_equal("lock:a", b"1").await.unwrap());
        assert!(kv.get("lock:a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn incr_applies_ttl_only_on_create() {
        let kv = FallbackKvStore::new();
        let v1 = kv
            .incr("quota:day:k", 1, Some(Duration::from_secs(60)))
            .await
            .unwrap();
        let v2 = kv.incr("quota:day:k", 1, Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);
    }

    #[tokio::test]
    async fn bloom_bits_roundtrip() {
        let kv = FallbackKvStore::new();
        kv.bit_set("bloom:r", 42).await.unwrap();
        assert!(kv.bit_get("bloom:r", 42).await.unwrap());
        assert!(!kv.bit_get("bloom:r", 43).await.unwrap());
    }

    #[tokio::test]
    async fn pubsub_delivers_published_message() {
        let kv = FallbackKvStore::new();
        let mut sub = kv.subscribe("config:changed").await.unwrap();
        kv.publish("config:changed", Bytes::from_static(b"reload"))
            .await
            .unwrap();
        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.payload, Bytes::from_static(b"reload"));
    }
}
