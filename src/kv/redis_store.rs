//! Redis-backed KV store used for shared state across gateway instances.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::{KvBackendKind, KvMessage, KvStore, KvSubscription};

/// Atomically releases a lock only if the caller still owns it — the
/// standard compare-and-delete pattern for single-flight leases.
const DEL_IF_EQUAL: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Increments a counter, applying a TTL only the instant the key is
/// created — used by the quota counter so a day/month bucket expires at
/// the calendar boundary regardless of how many increments land in it.
const INCR_WITH_TTL_ON_CREATE: &str = r#"
local existed = redis.call("exists", KEYS[1])
local v = redis.call("incrby", KEYS[1], ARGV[1])
if existed == 0 and ARGV[2] ~= "" then
    redis.call("expire", KEYS[1], ARGV[2])
end
return v
"#;

pub struct RedisKvStore {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .context("failed to connect to shared redis")?;
        Ok(Self { client, conn })
    }
}

struct RedisSubscription {
    pubsub: redis::aio::PubSub,
}

#[async_trait]
impl KvSubscription for RedisSubscription {
    async fn recv(&mut self) -> Option<KvMessage> {
        use futures_util::StreamExt;
        let msg = self.pubsub.on_message().next().await?;
        let channel: String = msg.get_channel_name().to_string();
        let payload: Vec<u8> = msg.get_payload().ok()?;
        Some(KvMessage {
            channel,
            payload: Bytes::from(payload),
        })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    fn kind(&self) -> KvBackendKind {
        KvBackendKind::Redis
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn.clone();
        let v: Option<Vec<u8>> = conn.get(key).await?;
        Ok(v.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(d) => {
                let _: () = conn.set_ex(key, value.to_vec(), d.as_secs().max(1)).await?;
            }
            None => {
                let _: () = conn.set(key, value.to_vec()).await?;
            }
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn del_matching(&self, pattern: &str) -> Result<u64> {
        use futures_util::StreamExt;

        let mut conn = self.conn.clone();
        let keys: Vec<String> = {
            let iter: redis::AsyncIter<String> = conn.scan_match(pattern).await?;
            iter.collect().await
        };
        if keys.is_empty() {
            return Ok(0);
        }
        for chunk in keys.chunks(500) {
            let _: () = conn.del(chunk).await?;
        }
        Ok(keys.len() as u64)
    }

    async fn incr(&self, key: &str, by: i64, ttl_on_create: Option<Duration>) -> Result<i64> {
        let mut conn = self.conn.clone();
        let ttl_arg = ttl_on_create
            .map(|d| d.as_secs().max(1).to_string())
            .unwrap_or_default();
        let v: i64 = redis::Script::new(INCR_WITH_TTL_ON_CREATE)
            .key(key)
            .arg(by)
            .arg(ttl_arg)
            .invoke_async(&mut conn)
            .await?;
        Ok(v)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire(key, ttl.as_secs().max(1) as i64).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value.to_vec())
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn del_if_equal(&self, key: &str, value: &[u8]) -> Result<bool> {
        let mut conn = self.conn.clone();
        let result: i64 = redis::Script::new(DEL_IF_EQUAL)
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, payload.to_vec()).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn KvSubscription>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(Box::new(RedisSubscription { pubsub }))
    }

    async fn bit_set(&self, key: &str, offset: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.setbit(key, offset as usize, true).await?;
        Ok(())
    }

    async fn bit_get(&self, key: &str, offset: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let v: bool = conn.getbit(key, offset as usize).await?;
        Ok(v)
    }
}
