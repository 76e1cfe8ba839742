//! Pluggable key/value storage backends
//!
//! The cache service persists serialized entries through the
//! [`StorageBackend`] trait; any store that can hold strings by key
//! satisfies it. Ships with a bounded in-memory backend and an on-disk
//! backend for state that should survive restarts.

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;

use crate::errors::DataError;

/// Asynchronous key/value store used by the cache service.
///
/// All operations may fail; failures are reported to the caller as
/// [`DataError::Storage`]. The cache service converts any backend error
/// into a logged cache miss so a broken store never fails a read.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, DataError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), DataError>;

    /// Removes the value stored under `key`. Absent keys are not an error.
    async fn remove(&self, key: &str) -> Result<(), DataError>;

    /// Lists every key currently present in the store.
    async fn list_keys(&self) -> Result<Vec<String>, DataError>;

    /// Removes every entry from the store, across all namespaces.
    async fn clear(&self) -> Result<(), DataError>;
}
