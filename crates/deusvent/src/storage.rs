//! Local key/value persistence.
//!
//! The client keeps a small amount of state between runs (currently the
//! identity key pair). Anything that can store strings under string keys
//! can back it by implementing [`KeyValueStore`].

use std::collections::BTreeMap;
use std::future::Future;

use tokio::sync::Mutex;

use crate::StorageError;

/// An asynchronous string-keyed store.
///
/// Implementations must serialize access internally; callers may use one
/// store from several tasks at once.
pub trait KeyValueStore: Send + Sync + 'static {
    /// Value stored under `key`.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, StorageError>> + Send;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(
        &self,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Removes `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Number of stored keys.
    fn count(&self) -> impl Future<Output = Result<usize, StorageError>> + Send;

    /// Values of every key starting with `prefix`, ordered by key.
    fn list_values(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<String>, StorageError>> + Send;

    /// Removes everything.
    fn clear(&self) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// In-process store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .await
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.entries.lock().await.len())
    }

    async fn list_values(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, value)| value.clone())
            .collect())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.entries.lock().await.clear();
        Ok(())
    }
}
