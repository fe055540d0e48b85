//! Key/value storage abstraction for the local caches.
//!
//! Implementations:
//! - `InMemoryStore` - For testing
//! - `FileStore` (in notes-sync) - One JSON file per key under a cache directory
//!
//! Both the tree cache and the note cache live in a single store, separated
//! by key: the tree blob under `tree`, notes under `notes/<id>`.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Serialization error for {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable byte storage addressed by string keys.
///
/// Implementations must be `Send + Sync`; the orchestrator shares one store
/// between the tree cache and the note cache.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value under `key`, `None` if absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, sorted
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).keys(prefix).await
    }
}

/// Read and decode a JSON value.
pub async fn get_json<S, T>(store: &S, key: &str) -> Result<Option<T>>
where
    S: KeyValueStore + ?Sized,
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Serialization {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode and write a JSON value.
pub async fn set_json<S, T>(store: &S, key: &str, value: &T) -> Result<()>
where
    S: KeyValueStore + ?Sized,
    T: Serialize + Sync,
{
    let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Serialization {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &bytes).await
}

/// In-memory store for testing
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        name: String,
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryStore::new();

        store.set("a", b"one").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"one".to_vec()));

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);

        // deleting twice is fine
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_by_prefix() {
        let store = InMemoryStore::new();
        store.set("notes/b", b"{}").await.unwrap();
        store.set("notes/a", b"{}").await.unwrap();
        store.set("tree", b"{}").await.unwrap();

        let keys = store.keys("notes/").await.unwrap();
        assert_eq!(keys, vec!["notes/a", "notes/b"]);
        assert_eq!(store.keys("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = Arc::new(InMemoryStore::new());
        let entry = Entry { name: "x".into() };

        set_json(&store, "k", &entry).await.unwrap();
        let back: Option<Entry> = get_json(&store, "k").await.unwrap();
        assert_eq!(back, Some(entry));

        let missing: Option<Entry> = get_json(&store, "other").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_json_is_an_error() {
        let store = InMemoryStore::new();
        store.set("k", b"not json").await.unwrap();

        let result: Result<Option<Entry>> = get_json(&store, "k").await;
        assert!(matches!(result, Err(StoreError::Serialization { .. })));
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.set("", b"x").await,
            Err(StoreError::InvalidKey(_))
        ));
    }
}
