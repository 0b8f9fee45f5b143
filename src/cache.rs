//! Per-resource on-disk state cache. One JSON file per resource under
//! `<app_dir>/k8s_cache/<cluster_hash>/<key_hash>.json`, where `cluster_hash`
//! is a SHA-256 of the absolute kustomize root (a stable path identifier)
//! and `key_hash` is a SHA-1 of the resource's identity key (a content
//! fingerprint). Corrupt or missing files load as an empty record —
//! advisory only, never fatal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("io error writing cache file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheRecord {
    pub last_applied_hash: Option<String>,
    pub status: Option<serde_json::Value>,
    pub observed_at: Option<String>,
    pub proxy_installed: bool,
    pub key: Option<String>,
}

/// SHA-256 of an absolute path; used to scope the cache directory to one
/// kustomize root so distinct projects never collide.
pub fn cluster_hash(absolute_kustomize_root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(absolute_kustomize_root.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-1 of a resource identity key; the cache filename stem.
pub fn key_hash(identity_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(identity_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Owns the on-disk cache directory for one kustomize root, plus an
/// in-memory mirror guarded by per-resource locks so independent resources
/// never contend on each other's reads/writes.
pub struct Cache {
    dir: PathBuf,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl Cache {
    pub fn new(app_dir: &Path, absolute_kustomize_root: &Path) -> Self {
        let dir = app_dir.join("k8s_cache").join(cluster_hash(absolute_kustomize_root));
        Cache {
            dir,
            locks: RwLock::new(HashMap::new()),
        }
    }

    fn path_for(&self, identity_key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key_hash(identity_key)))
    }

    async fn lock_for(&self, identity_key: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(identity_key) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks
            .entry(identity_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Best-effort load: missing or corrupt files are an empty record, not
    /// an error.
    pub async fn load(&self, identity_key: &str) -> CacheRecord {
        let lock = self.lock_for(identity_key).await;
        let _guard = lock.lock().await;
        let path = self.path_for(identity_key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "corrupt cache record, treating as empty");
                CacheRecord::default()
            }),
            Err(_) => CacheRecord::default(),
        }
    }

    pub async fn store(&self, identity_key: &str, record: &CacheRecord) -> Result<(), CacheError> {
        let lock = self.lock_for(identity_key).await;
        let _guard = lock.lock().await;
        let path = self.path_for(identity_key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::Io(path.clone(), e))?;
        }
        let bytes = serde_json::to_vec_pretty(record).expect("CacheRecord always serializes");
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| CacheError::Io(path, e))
    }

    /// Delete every cache file under this cluster's directory.
    pub async fn clear_all(&self) -> Result<(), CacheError> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(self.dir.clone(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_record_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::new(tmp.path(), Path::new("/some/overlay"));
        let record = cache.load("app/deployment/web").await;
        assert_eq!(record, CacheRecord::default());
    }

    #[tokio::test]
    async fn store_then_load_roundtrips() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::new(tmp.path(), Path::new("/some/overlay"));
        let record = CacheRecord {
            last_applied_hash: Some("abc123".into()),
            proxy_installed: true,
            ..Default::default()
        };
        cache.store("app/deployment/web", &record).await.unwrap();
        let loaded = cache.load("app/deployment/web").await;
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn corrupt_file_loads_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::new(tmp.path(), Path::new("/some/overlay"));
        let path = cache.path_for("app/deployment/web");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"not json").await.unwrap();
        let record = cache.load("app/deployment/web").await;
        assert_eq!(record, CacheRecord::default());
    }

    #[tokio::test]
    async fn same_identity_produces_same_filename() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::new(tmp.path(), Path::new("/some/overlay"));
        assert_eq!(cache.path_for("app/deployment/web"), cache.path_for("app/deployment/web"));
    }

    #[tokio::test]
    async fn clear_all_removes_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::new(tmp.path(), Path::new("/some/overlay"));
        cache.store("app/deployment/web", &CacheRecord::default()).await.unwrap();
        cache.clear_all().await.unwrap();
        let record = cache.load("app/deployment/web").await;
        assert_eq!(record, CacheRecord::default());
    }
}
