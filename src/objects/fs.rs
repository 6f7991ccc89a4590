//! Bucket stored as a directory tree.
//!
//! Object `a/b.png` lives at `<root>/a/b.png`; its metadata sidecar lives at
//! `<root>/.meta/a/b.png.json`. Writes land in a temporary file first and are
//! renamed into place, so readers never observe a partial object.

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use super::{ObjectListing, ObjectMeta, ObjectStore, ObjectStoreError, StoredObject};

const META_DIR: &str = ".meta";

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    uploaded_at: DateTime<Utc>,
}

/// A bucket rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open (and create if needed) a bucket at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, ObjectStoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(META_DIR)).await?;
        debug!(root = %root.display(), "Filesystem bucket ready");
        Ok(Self { root })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            && relative
                .components()
                .next()
                .map_or(false, |c| c.as_os_str() != META_DIR);
        if !valid {
            return Err(ObjectStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{}.json", key))
    }

    async fn read_meta(&self, key: &str, path: &Path) -> Result<ObjectMeta, ObjectStoreError> {
        let metadata = fs::metadata(path).await?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        let sidecar = match fs::read(self.sidecar_path(key)).await {
            Ok(raw) => Some(
                serde_json::from_slice::<Sidecar>(&raw)
                    .map_err(|e| ObjectStoreError::Metadata(e.to_string()))?,
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let mtime_nanos = modified
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        Ok(ObjectMeta {
            key: key.to_string(),
            size: metadata.len(),
            etag: format!("{:x}-{:x}", mtime_nanos, metadata.len()),
            uploaded_at: sidecar
                .as_ref()
                .map(|s| s.uploaded_at)
                .unwrap_or_else(|| DateTime::<Utc>::from(modified)),
            content_type: sidecar.map(|s| s.content_type),
        })
    }

    /// Every object key under the root, sorted.
    async fn all_keys(&self) -> Result<Vec<String>, ObjectStoreError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if dir == self.root && entry.file_name() == META_DIR {
                        continue;
                    }
                    pending.push(path);
                } else if file_type.is_file() {
                    if let Some(key) = self.key_for(&path) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
        Some(parts?.join("/"))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, ObjectStoreError> {
        let path = self.object_path(key)?;
        let body = match fs::read(&path).await {
            Ok(body) => Bytes::from(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta = self.read_meta(key, &path).await?;
        Ok(Some(StoredObject { meta, body }))
    }

    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<ObjectMeta, ObjectStoreError> {
        let path = self.object_path(key)?;
        let sidecar_path = self.sidecar_path(key);
        for parent in [path.parent(), sidecar_path.parent()].into_iter().flatten() {
            fs::create_dir_all(parent).await?;
        }

        let sidecar = Sidecar {
            content_type: content_type.to_string(),
            uploaded_at: Utc::now(),
        };
        let sidecar_json =
            serde_json::to_vec(&sidecar).map_err(|e| ObjectStoreError::Metadata(e.to_string()))?;

        let staging = self
            .root
            .join(META_DIR)
            .join(format!(".upload-{}", uuid::Uuid::new_v4().simple()));
        fs::write(&staging, &body).await?;
        fs::write(&sidecar_path, sidecar_json).await?;
        fs::rename(&staging, &path).await?;

        self.read_meta(key, &path).await
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<ObjectListing, ObjectStoreError> {
        let keys = self.all_keys().await?;
        let mut matching = keys.into_iter().filter(|k| k.starts_with(prefix));

        let mut objects = Vec::new();
        for key in matching.by_ref().take(limit) {
            let path = self.object_path(&key)?;
            match self.read_meta(&key, &path).await {
                Ok(meta) => objects.push(meta),
                // deleted between the directory walk and the stat
                Err(ObjectStoreError::Io(e)) => {
                    warn!(key = %key, error = %e, "Skipping unreadable object");
                }
                Err(e) => return Err(e),
            }
        }
        let truncated = matching.next().is_some();

        Ok(ObjectListing { objects, truncated })
    }

    async fn delete(&self, keys: &[String]) -> Result<(), ObjectStoreError> {
        for key in keys {
            let path = self.object_path(key)?;
            for target in [path, self.sidecar_path(key)] {
                match fs::remove_file(&target).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
