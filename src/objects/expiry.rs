//! Side table of explicit object expiries.
//!
//! An upload may declare how long it must be kept. The janitor consults this
//! table before deleting an object that is past the retention threshold.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::sqlite::SqlitePool;
use tracing::debug;

use super::ObjectStoreError;
use crate::store::open_pool;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS object_expiry (
    key        TEXT PRIMARY KEY NOT NULL,
    expires_at INTEGER NOT NULL
)
"#;

/// Lookup and maintenance of per-object expiry records.
#[async_trait]
pub trait ExpiryIndex: Send + Sync {
    /// The recorded expiry for `key`, if any.
    async fn expiry_for(&self, key: &str) -> Result<Option<DateTime<Utc>>, ObjectStoreError>;

    /// Record or replace the expiry for `key`.
    async fn set_expiry(
        &self,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ObjectStoreError>;

    /// Drop the records of `keys`.
    async fn remove(&self, keys: &[String]) -> Result<(), ObjectStoreError>;
}

/// Expiry records held in process memory.
#[derive(Debug, Default)]
pub struct MemoryExpiryIndex {
    records: DashMap<String, DateTime<Utc>>,
}

impl MemoryExpiryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExpiryIndex for MemoryExpiryIndex {
    async fn expiry_for(&self, key: &str) -> Result<Option<DateTime<Utc>>, ObjectStoreError> {
        Ok(self.records.get(key).map(|r| *r))
    }

    async fn set_expiry(
        &self,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ObjectStoreError> {
        self.records.insert(key.to_string(), expires_at);
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<(), ObjectStoreError> {
        for key in keys {
            self.records.remove(key);
        }
        Ok(())
    }
}

/// Expiry records in an `object_expiry` SQLite table.
#[derive(Debug, Clone)]
pub struct SqlExpiryIndex {
    pool: SqlitePool,
}

impl SqlExpiryIndex {
    /// Open a pool on `url` and make sure the table exists.
    pub async fn connect(url: &str) -> Result<Self, ObjectStoreError> {
        Self::from_pool(open_pool(url).await?).await
    }

    /// Use an existing pool, creating the table when missing.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, ObjectStoreError> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        debug!("object_expiry table ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl ExpiryIndex for SqlExpiryIndex {
    async fn expiry_for(&self, key: &str) -> Result<Option<DateTime<Utc>>, ObjectStoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT expires_at FROM object_expiry WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(ms,)| {
            DateTime::<Utc>::from_timestamp_millis(ms)
                .ok_or_else(|| ObjectStoreError::Metadata(format!("bad expiry for {}", key)))
        })
        .transpose()
    }

    async fn set_expiry(
        &self,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ObjectStoreError> {
        sqlx::query(
            "INSERT INTO object_expiry (key, expires_at) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(expires_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<(), ObjectStoreError> {
        let mut tx = self.pool.begin().await?;
        for key in keys {
            sqlx::query("DELETE FROM object_expiry WHERE key = ?1")
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
