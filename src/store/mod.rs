//! Persistent counter storage for the rate limiter.
//!
//! [`CounterStore`] is the capability every backend implements: process-local memory,
//! a networked Redis instance, or a relational SQLite database. Backends are selected
//! once at startup via [`connect`] and shared as `Arc<dyn CounterStore>`.

mod memory;
mod redis;
mod sql;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::config::CounterBackendConfig;

pub use self::memory::MemoryCounterStore;
pub use self::redis::RedisCounterStore;
pub use self::sql::SqlCounterStore;

pub(crate) use self::sql::open_pool;

/// Errors raised by counter store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or the operation failed in transit.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    /// The backend returned a record that cannot be interpreted.
    #[error("invalid counter record: {0}")]
    InvalidRecord(String),
}

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Snapshot of a live counter after an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterState {
    /// Hits recorded in the current window
    pub count: u64,
    /// When the current window closes
    pub expires_at: DateTime<Utc>,
}

impl CounterState {
    /// Time left until the window closes, zero once it has passed.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// A durable counter with fixed-window TTL semantics.
///
/// All operations are atomic per key with respect to other callers of the same
/// backend. A record whose `expires_at` is not in the future is treated as absent.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Record one hit for `key`.
    ///
    /// Creates a fresh record (`count = 1`, `expires_at = now + ttl`) when none is live,
    /// otherwise increments in place without moving `expires_at`.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<CounterState, StoreError>;

    /// Refund one hit. No-op when the record is absent, expired or already zero.
    async fn decrement(&self, key: &str) -> Result<(), StoreError>;

    /// Remove the record unconditionally. Idempotent.
    async fn reset_key(&self, key: &str) -> Result<(), StoreError>;

    /// Bulk-delete every record whose window closed at or before `cutoff`.
    ///
    /// Returns the removed keys. Records recreated after `cutoff` survive.
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Connect the backend selected in configuration.
///
/// `grace` is how long an expired record may linger before the backend or the
/// janitor reclaims it.
pub async fn connect(
    config: &CounterBackendConfig,
    grace: Duration,
) -> Result<Arc<dyn CounterStore>, StoreError> {
    let store: Arc<dyn CounterStore> = match config {
        CounterBackendConfig::Memory => Arc::new(MemoryCounterStore::new()),
        CounterBackendConfig::Redis { url, key_prefix } => {
            Arc::new(RedisCounterStore::connect(url, key_prefix, grace).await?)
        }
        CounterBackendConfig::Sqlite { url } => Arc::new(SqlCounterStore::connect(url).await?),
    };

    info!(backend = store.backend_name(), "Counter store connected");
    Ok(store)
}

pub(crate) fn ttl_delta(ttl: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(ttl.as_millis().min(i64::MAX as u128) as i64)
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::InvalidRecord(format!("timestamp out of range: {}", ms)))
}
