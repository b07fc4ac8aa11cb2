//! Wire format for cached upstream responses.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A safety margin added on top of `stale_seconds` when computing how long
/// a revalidation lease is held, so a slow origin fetch can't outlive the
/// window a stale entry is still allowed to be served from.
pub const REVALIDATION_SAFETY_MARGIN_SECONDS: u64 = 5;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub stored_at_epoch_secs: u64,
    pub ttl_seconds: u64,
    pub stale_seconds: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

impl CacheEntry {
    pub fn new(
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        ttl_seconds: u64,
        stale_seconds: u64,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            stored_at_epoch_secs: now_epoch_secs(),
            ttl_seconds,
            stale_seconds,
        }
    }

    pub fn age_seconds(&self, now_epoch_secs: u64) -> u64 {
        now_epoch_secs.saturating_sub(self.stored_at_epoch_secs)
    }

    pub fn freshness(&self, now_epoch_secs: u64) -> Freshness {
        let age = self.age_seconds(now_epoch_secs);
        if age <= self.ttl_seconds {
            Freshness::Fresh
        } else if age <= self.ttl_seconds + self.stale_seconds {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    /// Total lifetime after which the KV record itself should expire:
    /// TTL, plus the stale window it can still be served from, plus the
    /// margin a revalidation is allowed to run over.
    pub fn kv_ttl_seconds(&self) -> u64 {
        self.ttl_seconds + self.stale_seconds + REVALIDATION_SAFETY_MARGIN_SECONDS
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
