//! Redis-backed counter store.
//!
//! Each counter is a hash `{count, expires_at}` (epoch milliseconds). Increment and
//! decrement run as server-side Lua scripts so the check-then-write happens atomically
//! on the Redis server. Every record also carries a native key expiry at
//! `expires_at + grace`, so Redis itself reclaims stale counters.

use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{Client, Script};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use super::{from_millis, CounterState, CounterStore, StoreError};

const INCREMENT_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local ttl_ms = tonumber(ARGV[2])
local grace_ms = tonumber(ARGV[3])

local expires_at = tonumber(redis.call("HGET", KEYS[1], "expires_at"))

if (not expires_at) or expires_at <= now then
    expires_at = now + ttl_ms
    redis.call("HSET", KEYS[1], "count", 1, "expires_at", expires_at)
    redis.call("PEXPIREAT", KEYS[1], expires_at + grace_ms)
    return {1, expires_at}
end

local count = redis.call("HINCRBY", KEYS[1], "count", 1)
return {count, expires_at}
"#;

const DECREMENT_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])

local expires_at = tonumber(redis.call("HGET", KEYS[1], "expires_at"))
if (not expires_at) or expires_at <= now then
    return 0
end

local count = tonumber(redis.call("HGET", KEYS[1], "count")) or 0
if count <= 0 then
    return 0
end

return redis.call("HINCRBY", KEYS[1], "count", -1)
"#;

/// Counter store backed by a Redis (or protocol-compatible) server.
pub struct RedisCounterStore {
    connection_manager: ConnectionManager,
    key_prefix: String,
    grace: Duration,
    increment_script: Script,
    decrement_script: Script,
}

impl RedisCounterStore {
    /// Connect to `url` and verify the server answers.
    pub async fn connect(url: &str, key_prefix: &str, grace: Duration) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| {
            warn!(error = %e, "Failed to create Redis client for counters");
            StoreError::from(e)
        })?;

        let connection_manager = ConnectionManager::new(client).await?;

        let mut conn = connection_manager.clone();
        let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;

        debug!(key_prefix = %key_prefix, "Connected to Redis for rate limit counters");

        Ok(Self::from_connection(connection_manager, key_prefix, grace))
    }

    /// Build the store from an existing connection manager.
    pub fn from_connection(
        connection_manager: ConnectionManager,
        key_prefix: &str,
        grace: Duration,
    ) -> Self {
        Self {
            connection_manager,
            key_prefix: key_prefix.to_string(),
            grace,
            increment_script: Script::new(INCREMENT_SCRIPT),
            decrement_script: Script::new(DECREMENT_SCRIPT),
        }
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<CounterState, StoreError> {
        let mut conn = self.connection_manager.clone();
        let now_ms = Utc::now().timestamp_millis();

        let (count, expires_at_ms): (u64, i64) = self
            .increment_script
            .key(self.redis_key(key))
            .arg(now_ms)
            .arg(ttl.as_millis() as i64)
            .arg(self.grace.as_millis() as i64)
            .invoke_async(&mut conn)
            .await?;

        trace!(key = %key, count = count, "Incremented redis counter");

        Ok(CounterState {
            count,
            expires_at: from_millis(expires_at_ms)?,
        })
    }

    async fn decrement(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection_manager.clone();
        let _: i64 = self
            .decrement_script
            .key(self.redis_key(key))
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn reset_key(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection_manager.clone();
        let _: i64 = ::redis::cmd("DEL")
            .arg(self.redis_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        // Native key expiry at expires_at + grace already reclaims these.
        debug!(cutoff = %cutoff, "Redis reclaims expired counters natively");
        Ok(Vec::new())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn live_store() -> RedisCounterStore {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".into());
        let prefix = format!("bucketgate-test:{}:", uuid::Uuid::new_v4());
        RedisCounterStore::connect(&url, &prefix, Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let result = RedisCounterStore::connect("not a url", "p:", Duration::ZERO).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server (REDIS_URL)"]
    async fn test_redis_counter_contract() {
        let store = live_store().await;
        let window = Duration::from_secs(60);

        let first = store.increment("rate:a", window).await.unwrap();
        let second = store.increment("rate:a", window).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert_eq!(first.expires_at, second.expires_at);

        store.decrement("rate:a").await.unwrap();
        let third = store.increment("rate:a", window).await.unwrap();
        assert_eq!(third.count, 2);

        store.reset_key("rate:a").await.unwrap();
        store.reset_key("rate:a").await.unwrap();
        let fresh = store.increment("rate:a", window).await.unwrap();
        assert_eq!(fresh.count, 1);

        store.increment("rate:b", Duration::ZERO).await.unwrap();
        let restarted = store.increment("rate:b", Duration::ZERO).await.unwrap();
        assert_eq!(restarted.count, 1);
    }
}
