//! Abuse Detector — EWMA of per-key request rate (and a second EWMA over
//! the error rate) with Z-score anomaly scoring, installing a soft-block
//! when either series spikes.
//!
//! Anomaly scoring has no direct precedent elsewhere in this crate; the
//! KV-backed state read/update/write shape follows the same pattern as
//! [`crate::ratelimit`], generalized from a token count to a pair of EWMA
//! statistics.

use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::cache::entry::now_epoch_secs;
use crate::kv::KvStore;

const EPSILON: f64 = 1e-6;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub enum BlockReason {
    RateSpike,
    ErrorRateSpike,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockedKeyRecord {
    pub reason: BlockReason,
    pub anomaly_score: f64,
    pub blocked_until_epoch_secs: u64,
}

#[derive(Serialize, Deserialize)]
struct Ewma {
    mean: f64,
    variance: f64,
    last_tick_epoch_millis: i64,
}

impl Ewma {
    fn fresh(now_millis: i64) -> Self {
        Self {
            mean: 0.0,
            variance: 0.0,
            last_tick_epoch_millis: now_millis,
        }
    }

    /// Updates the series with one new observation `r` and returns its
    /// Z-score against the *updated* mean/variance, per the standard EWMA
    /// anomaly formula: `mean' = a*r + (1-a)*mean`, `var' = a*(r-mean)^2 +
    /// (1-a)*var`, `z = (r - mean') / max(sqrt(var'), eps)`.
    fn tick(&mut self, alpha: f64, r: f64) -> f64 {
        let prior_mean = self.mean;
        self.mean = alpha * r + (1.0 - alpha) * self.mean;
        self.variance = alpha * (r - prior_mean).powi(2) + (1.0 - alpha) * self.variance;
        (r - self.mean) / self.variance.sqrt().max(EPSILON)
    }
}

pub struct AbuseDetector<'a> {
    kv: &'a dyn KvStore,
    alpha: f64,
    z_threshold: f64,
    block_duration: Duration,
}

impl<'a> AbuseDetector<'a> {
    pub fn new(kv: &'a dyn KvStore, alpha: f64, z_threshold: f64, block_duration: Duration) -> Self {
        Self {
            kv,
            alpha,
            z_threshold,
            block_duration,
        }
    }

    pub async fn is_blocked(&self, key: &str) -> Result<Option<BlockedKeyRecord>> {
        match self.kv.get(&block_key(key)).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Call once per admitted request. Updates the request-rate EWMA from
    /// the elapsed time since the previous tick and installs a soft-block
    /// if the resulting Z-score exceeds the configured threshold.
    pub async fn record_request(&self, key: &str) -> Result<Option<BlockedKeyRecord>> {
        let now_millis = chrono::Utc::now().timestamp_millis();
        let mut ewma = self.load_rate_ewma(key, now_millis).await?;

        let elapsed_secs = ((now_millis - ewma.last_tick_epoch_millis).max(1) as f64) / 1000.0;
        let instantaneous_rate = 1.0 / elapsed_secs;
        ewma.last_tick_epoch_millis = now_millis;
        let z = ewma.tick(self.alpha, instantaneous_rate);

        self.kv
            .set(
                &rate_state_key(key),
                Bytes::from(serde_json::to_vec(&ewma)?),
                Some(Duration::from_secs(3600)),
            )
            .await?;

        if z.abs() > self.z_threshold {
            Ok(Some(self.install_block(key, BlockReason::RateSpike, z).await?))
        } else {
            Ok(None)
        }
    }

    /// Call once per completed upstream response. Tracks a separate EWMA
    /// over the error indicator (1.0 for an error response, 0.0 otherwise)
    /// so a spike of errors trips independently of raw traffic volume.
    pub async fn record_outcome(&self, key: &str, is_error: bool) -> Result<Option<BlockedKeyRecord>> {
        let now_millis = chrono::Utc::now().timestamp_millis();
        let mut ewma = self.load_error_ewma(key, now_millis).await?;

        let z = ewma.tick(self.alpha, if is_error { 1.0 } else { 0.0 });
        ewma.last_tick_epoch_millis = now_millis;

        self.kv
            .set(
                &error_state_key(key),
                Bytes::from(serde_json::to_vec(&ewma)?),
                Some(Duration::from_secs(3600)),
            )
            .await?;

        if z.abs() > self.z_threshold {
            Ok(Some(
                self.install_block(key, BlockReason::ErrorRateSpike, z).await?,
            ))
        } else {
            Ok(None)
        }
    }

    async fn install_block(&self, key: &str, reason: BlockReason, z: f64) -> Result<BlockedKeyRecord> {
        let record = BlockedKeyRecord {
            reason,
            anomaly_score: z,
            blocked_until_epoch_secs: now_epoch_secs() + self.block_duration.as_secs(),
        };
        self.kv
            .set(
                &block_key(key),
                Bytes::from(serde_json::to_vec(&record)?),
                Some(self.block_duration),
            )
            .await?;
        Ok(record)
    }

    async fn load_rate_ewma(&self, key: &str, now_millis: i64) -> Result<Ewma> {
        match self.kv.get(&rate_state_key(key)).await? {
            Some(raw) => Ok(serde_json::from_slice(&raw).unwrap_or_else(|_| Ewma::fresh(now_millis))),
            None => Ok(Ewma::fresh(now_millis)),
        }
    }

    async fn load_error_ewma(&self, key: &str, now_millis: i64) -> Result<Ewma> {
        match self.kv.get(&error_state_key(key)).await? {
            Some(raw) => Ok(serde_json::from_slice(&raw).unwrap_or_else(|_| Ewma::fresh(now_millis))),
            None => Ok(Ewma::fresh(now_millis)),
        }
    }
}

fn rate_state_key(key: &str) -> String {
    format!("abuse:rate:{key}")
}

fn error_state_key(key: &str) -> String {
    format!("abuse:error:{key}")
}

fn block_key(key: &str) -> String {
    format!("abuse:block:{key}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::fallback::FallbackKvStore;

    #[tokio::test]
    async fn steady_low_rate_never_blocks() {
        let kv = FallbackKvStore::new();
        let detector = AbuseDetector::new(kv.as_ref(), 0.3, 3.0, Duration::from_secs(60));
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let blocked = detector.record_request("key-a").await.unwrap();
            assert!(blocked.is_none());
        }
    }

    #[tokio::test]
    async fn burst_after_quiet_baseline_trips_block() {
        let kv = FallbackKvStore::new();
        let detector = AbuseDetector::new(kv.as_ref(), 0.3, 3.0, Duration::from_secs(60));

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            detector.record_request("key-b").await.unwrap();
        }

        let mut tripped = false;
        for _ in 0..10 {
            if detector.record_request("key-b").await.unwrap().is_some() {
                tripped = true;
                break;
            }
        }
        assert!(tripped);
        assert!(detector.is_blocked("key-b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn error_spike_installs_error_rate_block() {
        let kv = FallbackKvStore::new();
        let detector = AbuseDetector::new(kv.as_ref(), 0.5, 0.5, Duration::from_secs(60));
        detector.record_outcome("key-c", false).await.unwrap();
        detector.record_outcome("key-c", false).await.unwrap();
        let blocked = detector.record_outcome("key-c", true).await.unwrap();
        assert!(blocked.is_some());
        assert_eq!(blocked.unwrap().reason, BlockReason::ErrorRateSpike);
    }
}
