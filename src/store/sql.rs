//! Relational counter store on SQLite.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, trace};

use super::{from_millis, ttl_delta, CounterState, CounterStore, StoreError};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS rate_counters (
    key        TEXT PRIMARY KEY NOT NULL,
    count      INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
)
"#;

// Single statement, so SQLite applies create-or-increment atomically per key.
// SET expressions see the pre-update row.
const INCREMENT: &str = r#"
INSERT INTO rate_counters (key, count, expires_at) VALUES (?1, 1, ?2)
ON CONFLICT(key) DO UPDATE SET
    count = CASE WHEN rate_counters.expires_at <= ?3 THEN 1
                 ELSE rate_counters.count + 1 END,
    expires_at = CASE WHEN rate_counters.expires_at <= ?3 THEN excluded.expires_at
                      ELSE rate_counters.expires_at END
RETURNING count, expires_at
"#;

/// Counter store persisted in a `rate_counters` table.
#[derive(Debug, Clone)]
pub struct SqlCounterStore {
    pool: SqlitePool,
}

impl SqlCounterStore {
    /// Open a pool on `url` and make sure the table exists.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::from_pool(open_pool(url).await?).await
    }

    /// Use an existing pool, creating the table when missing.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        debug!("rate_counters table ready");
        Ok(Self { pool })
    }

    /// Read a live record without modifying it.
    pub async fn get(&self, key: &str) -> Result<Option<CounterState>, StoreError> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT count, expires_at FROM rate_counters WHERE key = ?1 AND expires_at > ?2",
        )
        .bind(key)
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(count, expires_at)| {
            Ok(CounterState {
                count: count.max(0) as u64,
                expires_at: from_millis(expires_at)?,
            })
        })
        .transpose()
    }
}

/// Open a SQLite pool.
///
/// In-memory databases are private to one connection, so they get exactly one
/// connection that is never recycled.
pub(crate) async fn open_pool(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(8)
    };
    options.connect(url).await
}

#[async_trait]
impl CounterStore for SqlCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<CounterState, StoreError> {
        let now = Utc::now();
        let fresh_expiry = (now + ttl_delta(ttl)).timestamp_millis();

        let (count, expires_at): (i64, i64) = sqlx::query_as(INCREMENT)
            .bind(key)
            .bind(fresh_expiry)
            .bind(now.timestamp_millis())
            .fetch_one(&self.pool)
            .await?;

        trace!(key = %key, count = count, "Incremented sql counter");

        Ok(CounterState {
            count: count.max(0) as u64,
            expires_at: from_millis(expires_at)?,
        })
    }

    async fn decrement(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE rate_counters SET count = count - 1 \
             WHERE key = ?1 AND count > 0 AND expires_at > ?2",
        )
        .bind(key)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_key(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM rate_counters WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("DELETE FROM rate_counters WHERE expires_at <= ?1 RETURNING key")
                .bind(cutoff.timestamp_millis())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
