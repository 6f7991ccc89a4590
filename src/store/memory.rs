//! Process-local counter store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::trace;

use super::{ttl_delta, CounterState, CounterStore, StoreError};

#[derive(Debug, Clone, Copy)]
struct CounterRecord {
    count: u64,
    expires_at: DateTime<Utc>,
}

/// Counter store held in process memory.
///
/// Each operation runs under the shard lock of its key, which serializes
/// read-modify-write for concurrent callers sharing a fingerprint.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    records: DashMap<String, CounterRecord>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a live record without modifying it.
    pub fn get(&self, key: &str) -> Option<CounterState> {
        let now = Utc::now();
        self.records
            .get(key)
            .filter(|record| record.expires_at > now)
            .map(|record| CounterState {
                count: record.count,
                expires_at: record.expires_at,
            })
    }

    /// Number of records held, expired ones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<CounterState, StoreError> {
        let now = Utc::now();
        let mut record = self
            .records
            .entry(key.to_string())
            .or_insert(CounterRecord {
                count: 0,
                expires_at: now,
            });

        if record.expires_at <= now {
            record.count = 1;
            record.expires_at = now + ttl_delta(ttl);
        } else {
            record.count += 1;
        }

        trace!(key = %key, count = record.count, "Incremented memory counter");

        Ok(CounterState {
            count: record.count,
            expires_at: record.expires_at,
        })
    }

    async fn decrement(&self, key: &str) -> Result<(), StoreError> {
        let now = Utc::now();
        if let Some(mut record) = self.records.get_mut(key) {
            if record.expires_at > now && record.count > 0 {
                record.count -= 1;
            }
        }
        Ok(())
    }

    async fn reset_key(&self, key: &str) -> Result<(), StoreError> {
        self.records.remove(key);
        Ok(())
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let mut removed = Vec::new();
        self.records.retain(|key, record| {
            if record.expires_at <= cutoff {
                removed.push(key.clone());
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_increment_creates_then_counts() {
        let store = MemoryCounterStore::new();

        let first = store.increment("rate:a", WINDOW).await.unwrap();
        assert_eq!(first.count, 1);

        let second = store.increment("rate:a", WINDOW).await.unwrap();
        assert_eq!(second.count, 2);
        // fixed window: expiry anchored to the first hit
        assert_eq!(second.expires_at, first.expires_at);
    }

    #[tokio::test]
    async fn test_expired_record_restarts_at_one() {
        let store = MemoryCounterStore::new();

        // A zero TTL produces a record that is already expired.
        store.increment("rate:a", Duration::ZERO).await.unwrap();
        let state = store.increment("rate:a", Duration::ZERO).await.unwrap();
        assert_eq!(state.count, 1);

        let state = store.increment("rate:a", WINDOW).await.unwrap();
        assert_eq!(state.count, 1);
        assert!(state.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn test_decrement_refunds_and_never_creates() {
        let store = MemoryCounterStore::new();

        store.decrement("rate:missing").await.unwrap();
        assert!(store.is_empty());

        store.increment("rate:a", WINDOW).await.unwrap();
        store.increment("rate:a", WINDOW).await.unwrap();
        store.decrement("rate:a").await.unwrap();
        assert_eq!(store.get("rate:a").unwrap().count, 1);

        store.decrement("rate:a").await.unwrap();
        store.decrement("rate:a").await.unwrap();
        assert_eq!(store.get("rate:a").unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let store = MemoryCounterStore::new();
        store.increment("rate:a", WINDOW).await.unwrap();

        tokio_test::assert_ok!(store.reset_key("rate:a").await);
        tokio_test::assert_ok!(store.reset_key("rate:a").await);
        assert!(store.get("rate:a").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_purge_keeps_live_records() {
        let store = MemoryCounterStore::new();
        store.increment("rate:old", Duration::ZERO).await.unwrap();
        store.increment("rate:live", WINDOW).await.unwrap();

        let removed = store.purge_expired(Utc::now()).await.unwrap();
        assert_eq!(removed, vec!["rate:old".to_string()]);
        assert_eq!(store.len(), 1);
        assert!(store.get("rate:live").is_some());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryCounterStore::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.increment("rate:shared", WINDOW).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get("rate:shared").unwrap().count, 400);
    }
}
