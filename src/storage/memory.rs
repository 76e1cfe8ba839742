//! In-memory storage backend
//!
//! Bounded string store using Moka. Eviction is by entry count only;
//! expiry and version checks live in the cache service above it.

use async_trait::async_trait;
use moka::future::Cache;
use tracing::debug;

use super::StorageBackend;
use crate::errors::DataError;

/// Default maximum number of entries
const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Memory-backed storage with a bounded entry count
pub struct MemoryStorage {
    entries: Cache<String, String>,
}

impl MemoryStorage {
    /// Create a store with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    /// Create a store holding at most `max_entries` values
    pub fn with_capacity(max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .name("memory_storage")
            .build();
        Self { entries }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, DataError> {
        Ok(self.entries.get(key).await)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DataError> {
        self.entries.insert(key.to_string(), value.to_string()).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), DataError> {
        self.entries.invalidate(key).await;
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, DataError> {
        // Flush pending invalidations so the iterator reflects removals
        self.entries.run_pending_tasks().await;
        Ok(self.entries.iter().map(|(k, _)| (*k).clone()).collect())
    }

    async fn clear(&self) -> Result<(), DataError> {
        debug!("Clearing in-memory storage");
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryStorage::new();

        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));

        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_absent_key() {
        let store = MemoryStorage::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let store = MemoryStorage::new();

        store.set("a", "1").await.unwrap();
        store.set("a", "2").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_list_keys_and_clear() {
        let store = MemoryStorage::new();

        store.set("users:1", "x").await.unwrap();
        store.set("teams:1", "y").await.unwrap();

        let mut keys = store.list_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["teams:1".to_string(), "users:1".to_string()]);

        store.clear().await.unwrap();
        assert!(store.list_keys().await.unwrap().is_empty());
    }
}
