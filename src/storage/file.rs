//! On-disk storage backend
//!
//! Persists each entry as one file under a base directory so cached
//! state survives process restarts. Keys are percent-encoded into
//! filesystem-safe names; writes go through a temp file and rename so a
//! crash never leaves a half-written entry.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use super::StorageBackend;
use crate::errors::DataError;

/// Extension used for in-progress writes
const TMP_EXTENSION: &str = "tmp";

/// File-per-key storage rooted at a base directory
pub struct FileStorage {
    base_dir: PathBuf,
}

impl FileStorage {
    /// Create a store under the platform cache directory.
    ///
    /// # Arguments
    /// * `app_name` - Subdirectory name, one per application
    pub async fn new(app_name: &str) -> Result<Self, DataError> {
        let base_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(app_name);
        Self::with_dir(base_dir).await
    }

    /// Create a store rooted at an explicit directory
    pub async fn with_dir(base_dir: PathBuf) -> Result<Self, DataError> {
        fs::create_dir_all(&base_dir).await?;
        let store = Self { base_dir };
        store.cleanup().await;
        Ok(store)
    }

    /// Remove temp files left behind by interrupted writes
    async fn cleanup(&self) {
        let mut read_dir = match fs::read_dir(&self.base_dir).await {
            Ok(rd) => rd,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let path = entry.path();
            if path.extension().map(|e| e == TMP_EXTENSION).unwrap_or(false) {
                debug!(path = %path.display(), "Removing stale temp file");
                let _ = fs::remove_file(&path).await;
            }
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(urlencoding::encode(key).as_ref())
    }

    /// Get the base directory path
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, DataError> {
        match fs::read_to_string(self.key_path(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DataError> {
        let path = self.key_path(key);
        // Append rather than replace the extension: keys may contain
        // dots, and two keys must never share a temp file name
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".");
        tmp_name.push(TMP_EXTENSION);
        let tmp_path = PathBuf::from(tmp_name);

        // Atomic write: temp file first, then rename into place
        fs::write(&tmp_path, value).await?;
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), DataError> {
        match fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>, DataError> {
        let mut keys = Vec::new();
        let mut read_dir = fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == TMP_EXTENSION).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let encoded = name.to_string_lossy();
            match urlencoding::decode(&encoded) {
                Ok(key) => keys.push(key.into_owned()),
                Err(e) => {
                    warn!(file = %encoded, error = %e, "Skipping undecodable cache file");
                }
            }
        }

        Ok(keys)
    }

    async fn clear(&self) -> Result<(), DataError> {
        warn!(dir = %self.base_dir.display(), "Clearing file storage");
        fs::remove_dir_all(&self.base_dir).await?;
        fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }
}
