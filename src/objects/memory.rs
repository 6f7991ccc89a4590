//! In-memory bucket.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{ObjectListing, ObjectMeta, ObjectStore, ObjectStoreError, StoredObject};

/// A bucket held in process memory, ordered by key.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    /// Create an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object with an explicit upload time.
    pub fn put_at(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        uploaded_at: DateTime<Utc>,
    ) -> ObjectMeta {
        let meta = ObjectMeta {
            key: key.to_string(),
            size: body.len() as u64,
            etag: uuid::Uuid::new_v4().simple().to_string(),
            uploaded_at,
            content_type: Some(content_type.to_string()),
        };
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                meta: meta.clone(),
                body,
            },
        );
        meta
    }

    /// Number of objects held.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether the bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, ObjectStoreError> {
        Ok(self.objects.read().get(key).cloned())
    }

    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<ObjectMeta, ObjectStoreError> {
        Ok(self.put_at(key, body, content_type, Utc::now()))
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<ObjectListing, ObjectStoreError> {
        let objects = self.objects.read();
        let mut matching = objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, object)| object.meta.clone());

        let page: Vec<ObjectMeta> = matching.by_ref().take(limit).collect();
        let truncated = matching.next().is_some();

        Ok(ObjectListing {
            objects: page,
            truncated,
        })
    }

    async fn delete(&self, keys: &[String]) -> Result<(), ObjectStoreError> {
        let mut objects = self.objects.write();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryObjectStore::new();
        let meta = store
            .put("a.png", Bytes::from_static(b"\x89PNG"), "image/png")
            .await
            .unwrap();
        assert_eq!(meta.size, 4);

        let object = store.get("a.png").await.unwrap().unwrap();
        assert_eq!(object.body, Bytes::from_static(b"\x89PNG"));
        assert_eq!(object.meta.content_type.as_deref(), Some("image/png"));
        assert_eq!(object.meta.etag, meta.etag);

        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_prefix_with_truncation() {
        let store = MemoryObjectStore::new();
        for key in ["img/1.png", "img/2.png", "img/3.png", "other.png"] {
            store.put(key, Bytes::new(), "image/png").await.unwrap();
        }

        let listing = store.list("img/", 2).await.unwrap();
        let keys: Vec<_> = listing.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["img/1.png", "img/2.png"]);
        assert!(listing.truncated);

        let listing = store.list("img/", 10).await.unwrap();
        assert_eq!(listing.objects.len(), 3);
        assert!(!listing.truncated);

        assert_eq!(store.list("", 10).await.unwrap().objects.len(), 4);
    }

    #[tokio::test]
    async fn test_batch_delete_ignores_missing() {
        let store = MemoryObjectStore::new();
        store.put("a", Bytes::new(), "text/plain").await.unwrap();
        store.put("b", Bytes::new(), "text/plain").await.unwrap();

        store
            .delete(&["a".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("b").await.unwrap().is_some());
    }
}
