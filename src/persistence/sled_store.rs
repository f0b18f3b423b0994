//! Embedded on-disk backend using `sled`.
//!
//! Records live in the `records` tree as JSON bytes; archived blobs live in
//! the `blobs` tree. sled calls block, so each one runs on the blocking pool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{decode, BlobStore, KeyValueStore};
use crate::utils::error::{Error, Result};

/// sled-backed store. Cheap to clone; all clones share one database.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    records: sled::Tree,
    blobs: sled::Tree,
}

impl SledStore {
    /// Open (or create) the database under `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let path: PathBuf = dir.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&path)?;
            Ok::<_, Error>(sled::open(&path)?)
        })
        .await??;
        let records = db.open_tree("records")?;
        let blobs = db.open_tree("blobs")?;
        debug!("opened sled store");
        Ok(Self { db, records, blobs })
    }

    /// Temporary database, removed when dropped.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        let records = db.open_tree("records")?;
        let blobs = db.open_tree("blobs")?;
        Ok(Self { db, records, blobs })
    }

    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SledStore {
    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        let tree = self.records.clone();
        let key = key.to_string();
        let bytes = serde_json::to_vec(value)?;
        tokio::task::spawn_blocking(move || {
            tree.insert(key.as_bytes(), bytes)?;
            Ok::<_, Error>(())
        })
        .await?
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let tree = self.records.clone();
        let key = key.to_string();
        let raw = tokio::task::spawn_blocking(move || tree.get(key.as_bytes())).await??;
        raw.map(|b| decode(&b)).transpose()
    }

    async fn query_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let tree = self.records.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<(String, Value)>> {
            let mut out = Vec::new();
            for item in tree.scan_prefix(prefix.as_bytes()) {
                let (k, v) = item?;
                let key = String::from_utf8(k.to_vec())
                    .map_err(|e| Error::PersistenceError(format!("non-utf8 key: {}", e)))?;
                out.push((key, decode(&v)?));
            }
            Ok(out)
        })
        .await?
    }

    async fn batch_put(&self, items: &[(String, Value)]) -> Result<()> {
        let tree = self.records.clone();
        let mut batch = sled::Batch::default();
        for (k, v) in items {
            batch.insert(k.as_bytes(), serde_json::to_vec(v)?);
        }
        tokio::task::spawn_blocking(move || {
            tree.apply_batch(batch)?;
            Ok::<_, Error>(())
        })
        .await?
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: &Value,
    ) -> Result<bool> {
        let tree = self.records.clone();
        let key = key.to_string();
        let expected = expected.cloned();
        let new_bytes = serde_json::to_vec(new)?;
        tokio::task::spawn_blocking(move || -> Result<bool> {
            // Compare decoded values, then swap against the exact bytes read.
            let current = tree.get(key.as_bytes())?;
            let current_value = current.as_ref().map(|b| decode(b)).transpose()?;
            if current_value != expected {
                return Ok(false);
            }
            let swapped = tree.compare_and_swap(key.as_bytes(), current, Some(new_bytes))?;
            Ok(swapped.is_ok())
        })
        .await?
    }
}

#[async_trait]
impl BlobStore for SledStore {
    async fn put_blob(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let tree = self.blobs.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            tree.insert(key.as_bytes(), bytes)?;
            Ok::<_, Error>(())
        })
        .await?
    }

    async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let tree = self.blobs.clone();
        let key = key.to_string();
        let raw = tokio::task::spawn_blocking(move || tree.get(key.as_bytes())).await??;
        Ok(raw.map(|b| b.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledStore::open(dir.path()).await.unwrap();
            store.put("proposals/a", &json!({"id": "a"})).await.unwrap();
            store.flush().await.unwrap();
        }
        let store = SledStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get("proposals/a").await.unwrap(), Some(json!({"id": "a"})));
    }

    #[tokio::test]
    async fn batch_and_prefix_scan() {
        let store = SledStore::temporary().unwrap();
        let items: Vec<(String, Value)> =
            (0..5).map(|i| (format!("signals/{}", i), json!(i))).collect();
        store.batch_put(&items).await.unwrap();
        store.put("proposals/x", &json!("x")).await.unwrap();
        let rows = store.query_prefix("signals/").await.unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0], ("signals/0".to_string(), json!(0)));
    }

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_expectation() {
        let store = SledStore::temporary().unwrap();
        assert!(store.compare_and_swap("model_state/k", None, &json!({"version": 1})).await.unwrap());
        let stale = json!({"version": 0});
        assert!(!store
            .compare_and_swap("model_state/k", Some(&stale), &json!({"version": 2}))
            .await
            .unwrap());
        let cur = json!({"version": 1});
        assert!(store
            .compare_and_swap("model_state/k", Some(&cur), &json!({"version": 2}))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn blobs_round_trip() {
        let store = SledStore::temporary().unwrap();
        store.put_blob("features/2024/01/01/00/b.json", b"{}".to_vec()).await.unwrap();
        assert_eq!(
            store.get_blob("features/2024/01/01/00/b.json").await.unwrap(),
            Some(b"{}".to_vec())
        );
    }
}
