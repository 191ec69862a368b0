//! In-memory object store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::core::ObjectStore;
use crate::error::{MigrateError, Result};

use super::grant::AccessGrant;

/// Object store holding objects in a sorted map.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
    grant: AccessGrant,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grant(grant: AccessGrant) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            grant,
        }
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, name: &str, data: Bytes) -> Result<()> {
        self.grant.authorize_write(name)?;
        let mut objects = self.objects.lock().await;
        if objects.contains_key(name) {
            return Err(MigrateError::write_rejected(name, "object already exists"));
        }
        objects.insert(name.to_string(), data);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Bytes> {
        self.grant.authorize_read(name)?;
        self.objects
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| MigrateError::NoMatchingArtifact(name.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.grant.authorize_read(prefix)?;
        Ok(self
            .objects
            .lock()
            .await
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        self.grant.authorize_read(name)?;
        Ok(self.objects.lock().await.contains_key(name))
    }

    fn store_type(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_put_is_create_only() {
        let store = MemoryObjectStore::new();
        store.put("a", Bytes::from_static(b"1")).await.unwrap();
        assert!(store.put("a", Bytes::from_static(b"2")).await.is_err());
        assert_eq!(store.get("a").await.unwrap(), Bytes::from_static(b"1"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_filtered() {
        let store = MemoryObjectStore::new();
        for name in ["b_2", "a_1", "b_1"] {
            store.put(name, Bytes::new()).await.unwrap();
        }
        assert_eq!(store.list("b_").await.unwrap(), vec!["b_1", "b_2"]);
    }

    #[tokio::test]
    async fn test_expired_grant_rejects_list() {
        let store = MemoryObjectStore::with_grant(AccessGrant::ephemeral(Duration::seconds(-1)));
        let err = store.list("").await.unwrap_err();
        assert!(matches!(err, MigrateError::ReadRejected { .. }));
    }
}
