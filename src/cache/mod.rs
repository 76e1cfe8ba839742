//! Namespaced, versioned TTL cache
//!
//! Wraps a [`StorageBackend`](crate::storage::StorageBackend) with
//! namespacing, time-based expiry, version-based mass invalidation, and
//! single-flight read-through loading.

pub mod service;

pub use service::{CacheOptions, CacheOptionsUpdate, CacheService};
