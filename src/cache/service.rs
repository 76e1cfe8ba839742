//! Cache service implementation
//!
//! Entries are wrapped with the write timestamp and the cache version,
//! serialized to JSON, and persisted through the storage backend under
//! `"<namespace>:<key>"`. A stale entry (expired or written under an
//! older version) is removed lazily by the read that discovers it, so
//! stale data never lingers in the backend indefinitely.
//!
//! Backend failures never fail a read: any storage error is logged and
//! treated as a cache miss, and the caller falls through to its loader.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::DataError;
use crate::storage::StorageBackend;

/// Default namespace for unscoped caches
const DEFAULT_NAMESPACE: &str = "app";

/// Default entry time-to-live
const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default cache version marker
const DEFAULT_VERSION: &str = "1.0";

/// Cache configuration options
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Key prefix grouping this cache's entries for scoped clearing
    pub namespace: String,
    /// Maximum entry age before it is treated as absent
    pub ttl: Duration,
    /// Version marker; bumping it invalidates every prior entry
    pub version: String,
    /// Emit debug-level log lines for every cache mutation
    pub debug: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ttl: DEFAULT_TTL,
            version: DEFAULT_VERSION.to_string(),
            debug: false,
        }
    }
}

impl CacheOptions {
    /// Default options scoped to the given namespace
    pub fn for_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }
}

/// Partial options update; `None` fields keep their current value
#[derive(Debug, Clone, Default)]
pub struct CacheOptionsUpdate {
    pub ttl: Option<Duration>,
    pub version: Option<String>,
    pub debug: Option<bool>,
}

/// Stored form of a cache entry. Never exposed to callers.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntry<T> {
    value: T,
    stored_at_ms: u64,
    version: String,
}

/// A load in progress, shared by every caller waiting on the same key.
/// Resolves to the serialized value so one map serves every value type.
type SharedLoad = Shared<BoxFuture<'static, Result<String, DataError>>>;

/// Namespaced TTL/version cache over a pluggable storage backend
#[derive(Clone)]
pub struct CacheService {
    backend: Arc<dyn StorageBackend>,
    options: Arc<RwLock<CacheOptions>>,
    in_flight: Arc<Mutex<HashMap<String, SharedLoad>>>,
}

impl CacheService {
    /// Create a cache service over the given backend
    pub fn new(backend: Arc<dyn StorageBackend>, options: CacheOptions) -> Self {
        Self {
            backend,
            options: Arc::new(RwLock::new(options)),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Snapshot of the current options
    pub fn options(&self) -> CacheOptions {
        self.options.read().unwrap().clone()
    }

    /// Apply a partial options update.
    ///
    /// `ttl` and `debug` take effect for subsequent calls immediately. A
    /// version change spawns an asynchronous clear of the namespace; the
    /// version check on read already rejects old-version entries, so they
    /// are unreachable before the clear completes.
    pub fn update_options(&self, update: CacheOptionsUpdate) {
        let version_changed = {
            let mut opts = self.options.write().unwrap();
            if let Some(ttl) = update.ttl {
                opts.ttl = ttl;
            }
            if let Some(debug) = update.debug {
                opts.debug = debug;
            }
            match update.version {
                Some(version) if version != opts.version => {
                    debug!(
                        namespace = %opts.namespace,
                        version = %version,
                        "Cache version bumped, scheduling clear"
                    );
                    opts.version = version;
                    true
                }
                _ => false,
            }
        };

        if version_changed {
            let service = self.clone();
            tokio::spawn(async move { service.clear().await });
        }
    }

    /// Retrieve the value stored under `key`.
    ///
    /// Returns the value only if it is present, parseable, written under
    /// the current version, and unexpired; any stale entry is removed
    /// before returning `None`. Never fails: backend errors are logged
    /// and reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let nk = self.namespaced_key(key);

        let raw = match self.backend.get(&nk).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %nk, error = %e, "Cache backend read failed, treating as miss");
                return None;
            }
        };

        let raw = match raw {
            Some(raw) => raw,
            None => {
                self.log_miss(&nk, "absent");
                return None;
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %nk, error = %e, "Unreadable cache entry, removing");
                self.remove_raw(&nk).await;
                return None;
            }
        };

        let opts = self.options();
        if entry.version != opts.version {
            self.log_miss(&nk, "version");
            self.remove_raw(&nk).await;
            return None;
        }

        let age_ms = now_ms().saturating_sub(entry.stored_at_ms);
        if age_ms > opts.ttl.as_millis() as u64 {
            self.log_miss(&nk, "expired");
            self.remove_raw(&nk).await;
            return None;
        }

        if opts.debug {
            debug!(key = %nk, "cache HIT");
        }
        Some(entry.value)
    }

    /// Store `value` under `key`, stamped with the current time and
    /// version. Backend failures are logged, never surfaced.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        let nk = self.namespaced_key(key);
        let opts = self.options();

        let entry = CacheEntry {
            value,
            stored_at_ms: now_ms(),
            version: opts.version.clone(),
        };

        match serde_json::to_string(&entry) {
            Ok(raw) => {
                if let Err(e) = self.backend.set(&nk, &raw).await {
                    warn!(key = %nk, error = %e, "Cache backend write failed");
                } else if opts.debug {
                    debug!(key = %nk, "cache SET");
                }
            }
            Err(e) => {
                warn!(key = %nk, error = %e, "Failed to serialize cache entry");
            }
        }
    }

    /// Return the cached value for `key`, or run `loader`, store its
    /// result, and return it.
    ///
    /// Concurrent calls for the same key run the loader at most once:
    /// late callers await the in-flight load and receive the same
    /// resolved value. Loader errors propagate to every waiter; cache
    /// read/write errors are absorbed as usual.
    pub async fn get_or_set<T, F, Fut>(&self, key: &str, loader: F) -> Result<T, DataError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DataError>> + Send + 'static,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let nk = self.namespaced_key(key);

        let load = {
            // The check-then-insert must be atomic; the guard is dropped
            // before any await
            let mut in_flight = self.in_flight.lock().unwrap();
            match in_flight.get(&nk) {
                Some(existing) => existing.clone(),
                None => {
                    let service = self.clone();
                    let key = key.to_string();
                    let fut = loader();
                    let load: SharedLoad = async move {
                        let value = fut.await?;
                        let raw = serde_json::to_string(&value)
                            .map_err(|e| DataError::Serialization(e.to_string()))?;
                        service.set(&key, &value).await;
                        Ok(raw)
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(nk.clone(), load.clone());
                    load
                }
            }
        };

        let result = load.clone().await;

        // Clear the slot once the load resolves. Every waiter races to do
        // this; ptr_eq keeps a newer load for the same key untouched.
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if in_flight.get(&nk).map(|l| l.ptr_eq(&load)).unwrap_or(false) {
                in_flight.remove(&nk);
            }
        }

        let raw = result?;
        serde_json::from_str(&raw).map_err(|e| DataError::Serialization(e.to_string()))
    }

    /// Remove the entry stored under `key`
    pub async fn remove(&self, key: &str) {
        let nk = self.namespaced_key(key);
        self.remove_raw(&nk).await;
        if self.options().debug {
            debug!(key = %nk, "cache REMOVE");
        }
    }

    /// Remove every entry under this cache's namespace.
    ///
    /// Keys under other namespaces sharing the same backend are never
    /// touched.
    pub async fn clear(&self) {
        let opts = self.options();
        let prefix = format!("{}:", opts.namespace);

        let keys = match self.backend.list_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(namespace = %opts.namespace, error = %e, "Cache clear failed to list keys");
                return;
            }
        };

        let mut removed = 0usize;
        for key in keys.iter().filter(|k| k.starts_with(&prefix)) {
            self.remove_raw(key).await;
            removed += 1;
        }

        if opts.debug {
            debug!(namespace = %opts.namespace, removed = removed, "cache CLEAR");
        }
    }

    fn namespaced_key(&self, key: &str) -> String {
        format!("{}:{}", self.options.read().unwrap().namespace, key)
    }

    async fn remove_raw(&self, namespaced_key: &str) {
        if let Err(e) = self.backend.remove(namespaced_key).await {
            warn!(key = %namespaced_key, error = %e, "Cache backend remove failed");
        }
    }

    fn log_miss(&self, namespaced_key: &str, reason: &'static str) {
        if self.options.read().unwrap().debug {
            debug!(key = %namespaced_key, reason = reason, "cache MISS");
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
