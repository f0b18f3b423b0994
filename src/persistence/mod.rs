//! Persistence layer traits and implementations
//!
//! The pipeline treats durable storage as two collaborators: a keyed
//! table store (put, get, query-by-prefix, batch-write, compare-and-swap)
//! holding JSON records, and a blob store used to archive raw batches.
//! Backends: [`MemoryStore`] for tests and single-process use, and
//! [`SledStore`] for an embedded on-disk database.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::llm::with_timeout;
use crate::utils::error::{Error, Result};

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// Keyed JSON record store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Insert or overwrite a record.
    async fn put(&self, key: &str, value: &Value) -> Result<()>;

    /// Fetch a record.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// All records whose key starts with `prefix`, in key order.
    async fn query_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>>;

    /// Write several records; either all are written or the call fails.
    async fn batch_put(&self, items: &[(String, Value)]) -> Result<()>;

    /// Replace the record at `key` with `new` only if it currently equals
    /// `expected` (`None` meaning "absent"). Returns whether the swap happened.
    async fn compare_and_swap(&self, key: &str, expected: Option<&Value>, new: &Value)
        -> Result<bool>;
}

/// Opaque byte store used for archival.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_blob(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
    async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Record key layout shared by every stage.
pub mod keys {
    pub fn signal(id: &str) -> String {
        format!("signals/{}", id)
    }
    pub fn proposal(id: &str) -> String {
        format!("proposals/{}", id)
    }
    pub fn decision(proposal_id: &str) -> String {
        format!("decisions/{}", proposal_id)
    }
    pub fn evaluation(proposal_id: &str, outcome_id: &str) -> String {
        format!("evaluations/{}/{}", proposal_id, outcome_id)
    }
    pub fn evaluations_for(proposal_id: &str) -> String {
        format!("evaluations/{}/", proposal_id)
    }
    pub fn model_state(key: &str) -> String {
        format!("model_state/{}", key)
    }
    /// Blob key for an archived scoring batch: `features/YYYY/MM/DD/HH/<id>.json`.
    pub fn feature_batch(at: chrono::DateTime<chrono::Utc>, batch_id: &str) -> String {
        format!("features/{}/{}.json", at.format("%Y/%m/%d/%H"), batch_id)
    }
}

/// Serialize and store a typed record.
pub async fn put_record<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    record: &T,
) -> Result<()> {
    let value = serde_json::to_value(record)?;
    store.put(key, &value).await
}

/// Fetch and deserialize a typed record.
pub async fn get_record<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        | Some(v) => Ok(Some(serde_json::from_value(v)?)),
        | None => Ok(None),
    }
}

/// Wraps a store so that every call is bounded by a deadline.
#[derive(Clone)]
pub struct TimedStore<S> {
    inner: S,
    limit: Duration,
}

impl<S> TimedStore<S> {
    pub fn new(inner: S, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for TimedStore<S> {
    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        with_timeout(self.limit, self.inner.put(key, value)).await
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        with_timeout(self.limit, self.inner.get(key)).await
    }

    async fn query_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        with_timeout(self.limit, self.inner.query_prefix(prefix)).await
    }

    async fn batch_put(&self, items: &[(String, Value)]) -> Result<()> {
        with_timeout(self.limit, self.inner.batch_put(items)).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: &Value,
    ) -> Result<bool> {
        with_timeout(self.limit, self.inner.compare_and_swap(key, expected, new)).await
    }
}

#[async_trait]
impl<S: BlobStore> BlobStore for TimedStore<S> {
    async fn put_blob(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        with_timeout(self.limit, self.inner.put_blob(key, bytes)).await
    }

    async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        with_timeout(self.limit, self.inner.get_blob(key)).await
    }
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        (**self).put(key, value).await
    }
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        (**self).get(key).await
    }
    async fn query_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        (**self).query_prefix(prefix).await
    }
    async fn batch_put(&self, items: &[(String, Value)]) -> Result<()> {
        (**self).batch_put(items).await
    }
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: &Value,
    ) -> Result<bool> {
        (**self).compare_and_swap(key, expected, new).await
    }
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    async fn put_blob(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        (**self).put_blob(key, bytes).await
    }
    async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get_blob(key).await
    }
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::PersistenceError(format!("corrupt record: {}", e)))
}
