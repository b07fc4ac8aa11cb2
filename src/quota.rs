//! Quota Counter — day/month request counters with UTC calendar boundaries.
//!
//! Checks are post-increment: the counter is always incremented first, and
//! a request is denied once that increment pushes the counter over its
//! limit. The counter therefore keeps counting past the limit rather than
//! stalling at it, which keeps the "requests used this period" figure
//! reported to tenants accurate even while they're being throttled.

use std::time::Duration;

use anyhow::Result;
use chrono::{Datelike, TimeZone, Utc};

use crate::kv::KvStore;

#[derive(Clone, Copy, Debug)]
pub struct Decision {
    pub allowed: bool,
    pub retry_after_secs: u64,
}

pub struct QuotaCounter<'a> {
    kv: &'a dyn KvStore,
}

impl<'a> QuotaCounter<'a> {
    pub fn new(kv: &'a dyn KvStore) -> Self {
        Self { kv }
    }

    /// Increments both the daily and monthly counters for `key` and
    /// returns whether the request should be admitted. `None` limits are
    /// treated as unlimited for that period.
    pub async fn check_and_increment(
        &self,
        key: &str,
        daily_limit: Option<u64>,
        monthly_limit: Option<u64>,
    ) -> Result<Decision> {
        let now = Utc::now();

        let day_ttl = seconds_until_next_utc_midnight(now);
        let day_key = format!("quota:day:{key}:{}", now.format("%Y%m%d"));
        let day_count = self.kv.incr(&day_key, 1, Some(Duration::from_secs(day_ttl))).await?;

        let month_ttl = seconds_until_next_utc_month(now);
        let month_key = format!("quota:mon:{key}:{}", now.format("%Y%m"));
        let month_count = self
            .kv
            .incr(&month_key, 1, Some(Duration::from_secs(month_ttl)))
            .await?;

        let day_over = daily_limit.is_some_and(|limit| day_count as u64 > limit);
        let month_over = monthly_limit.is_some_and(|limit| month_count as u64 > limit);

        if day_over {
            Ok(Decision {
                allowed: false,
                retry_after_secs: day_ttl,
            })
        } else if month_over {
            Ok(Decision {
                allowed: false,
                retry_after_secs: month_ttl,
            })
        } else {
            Ok(Decision {
                allowed: true,
                retry_after_secs: 0,
            })
        }
    }
}

fn seconds_until_next_utc_midnight(now: chrono::DateTime<Utc>) -> u64 {
    let tomorrow = now.date_naive().succ_opt().unwrap_or(now.date_naive());
    let next_midnight = Utc.from_utc_datetime(&tomorrow.and_hms_opt(0, 0, 0).unwrap());
    (next_midnight - now).num_seconds().max(1) as u64
}

fn seconds_until_next_utc_month(now: chrono::DateTime<Utc>) -> u64 {
    let (next_year, next_month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let next_start = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    (next_start - now).num_seconds().max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::fallback::FallbackKvStore;

    #[tokio::test]
    async fn allows_until_daily_limit_then_denies() {
        let kv = FallbackKvStore::new();
        let quota = QuotaCounter::new(kv.as_ref());
        let mut allowed = 0;
        for _ in 0..5 {
            let d = quota.check_and_increment("tenant-1", Some(3), None).await.unwrap();
            if d.allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3);
    }

    #[tokio::test]
    async fn unlimited_when_no_limit_configured() {
        let kv = FallbackKvStore::new();
        let quota = QuotaCounter::new(kv.as_ref());
        for _ in 0..20 {
            assert!(
                quota
                    .check_and_increment("tenant-2", None, None)
                    .await
                    .unwrap()
                    .allowed
            );
        }
    }
}
