//! Object storage seen by the gateway.
//!
//! The bucket itself is an external collaborator reached through [`ObjectStore`].
//! This module also owns request-path to key derivation, content-type resolution,
//! and the side table of explicit object expiries used by the janitor.

mod content_type;
mod expiry;
mod fs;
mod key;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::{ObjectBackendConfig, StorageConfig};

pub use content_type::{from_extension, resolve_content_type, FALLBACK_CONTENT_TYPE};
pub use expiry::{ExpiryIndex, MemoryExpiryIndex, SqlExpiryIndex};
pub use fs::FsObjectStore;
pub use key::object_key;
pub use memory::MemoryObjectStore;

/// Maximum objects returned by one `list` call.
pub const LIST_LIMIT: usize = 1000;

/// Errors raised by object storage backends.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// Backend I/O failed
    #[error("storage I/O failed: {0}")]
    Io(String),
    /// Key cannot be mapped onto the backend
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    /// Stored metadata is unreadable
    #[error("invalid object metadata: {0}")]
    Metadata(String),
}

impl From<std::io::Error> for ObjectStoreError {
    fn from(err: std::io::Error) -> Self {
        ObjectStoreError::Io(err.to_string())
    }
}

impl From<sqlx::Error> for ObjectStoreError {
    fn from(err: sqlx::Error) -> Self {
        ObjectStoreError::Io(err.to_string())
    }
}

/// Metadata the backend reports for an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectMeta {
    /// Object key
    pub key: String,
    /// Body length in bytes
    pub size: u64,
    /// Opaque version tag, unquoted
    pub etag: String,
    /// When the object was last written
    pub uploaded_at: DateTime<Utc>,
    /// Content type recorded at upload, if any
    pub content_type: Option<String>,
}

/// An object body with its metadata.
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// Backend metadata
    pub meta: ObjectMeta,
    /// Full object body
    pub body: Bytes,
}

/// One page of a listing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectListing {
    pub objects: Vec<ObjectMeta>,
    /// More objects match than were returned
    pub truncated: bool,
}

/// Read/write access to the bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, ObjectStoreError>;

    /// Store `body` under `key`, replacing any previous object.
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<ObjectMeta, ObjectStoreError>;

    /// List objects whose key starts with `prefix`, in key order, at most `limit`.
    async fn list(&self, prefix: &str, limit: usize) -> Result<ObjectListing, ObjectStoreError>;

    /// Delete a batch of objects. Missing keys are ignored.
    async fn delete(&self, keys: &[String]) -> Result<(), ObjectStoreError>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Open the bucket and expiry table selected in configuration.
pub async fn open(
    config: &StorageConfig,
) -> Result<(Arc<dyn ObjectStore>, Arc<dyn ExpiryIndex>), ObjectStoreError> {
    let objects: Arc<dyn ObjectStore> = match &config.backend {
        ObjectBackendConfig::Memory => Arc::new(MemoryObjectStore::new()),
        ObjectBackendConfig::Filesystem { root } => Arc::new(FsObjectStore::open(root).await?),
    };

    let expiries: Arc<dyn ExpiryIndex> = match &config.metadata_url {
        Some(url) => Arc::new(SqlExpiryIndex::connect(url).await?),
        None => Arc::new(MemoryExpiryIndex::new()),
    };

    info!(
        backend = objects.backend_name(),
        route_prefix = %config.route_prefix,
        "Object storage opened"
    );
    Ok((objects, expiries))
}
