//! In-process store backed by ordered maps.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{BlobStore, KeyValueStore};
use crate::utils::error::Result;

/// Thread-safe in-memory store. Cloning shares the same underlying maps.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<BTreeMap<String, Value>>>,
    blobs: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Keys of all archived blobs.
    pub async fn blob_keys(&self) -> Vec<String> {
        self.blobs.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        self.records.write().await.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn query_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let guard = self.records.read().await;
        Ok(guard
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn batch_put(&self, items: &[(String, Value)]) -> Result<()> {
        let mut guard = self.records.write().await;
        for (k, v) in items {
            guard.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: &Value,
    ) -> Result<bool> {
        let mut guard = self.records.write().await;
        if guard.get(key) != expected {
            return Ok(false);
        }
        guard.insert(key.to_string(), new.clone());
        Ok(true)
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put_blob(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.blobs.write().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }
}
