use crate::cache::{CacheKey, CacheStore};
use crate::ProxyError;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Flat directory of artifacts named exactly by their cache key.
///
/// Writes go to a dot-prefixed temp file in the same directory and are
/// renamed into place, so a reader never observes a partial file. Concurrent
/// writers of the same key each rename a complete file; the last one wins.
pub struct DiskCache {
    dir: PathBuf,
    next_temp_id: AtomicU64,
}

impl DiskCache {
    /// Creates the root directory if needed and removes temp files left by
    /// interrupted writes. Safe to call on an existing cache.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, ProxyError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| {
            ProxyError::StorageError(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let cache = Self {
            dir,
            next_temp_id: AtomicU64::new(1),
        };
        cache.clean_orphaned_tmp().await;
        Ok(cache)
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.as_str())
    }

    fn temp_path(&self) -> PathBuf {
        let id = self.next_temp_id.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(".{}-{}.tmp", std::process::id(), id))
    }

    async fn clean_orphaned_tmp(&self) {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(_) => return,
        };
        let mut cleaned = 0u64;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with('.') && name.ends_with(".tmp")) {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => cleaned += 1,
                Err(e) => tracing::warn!("Failed to clean orphaned tmp file {}: {}", name, e),
            }
        }
        if cleaned > 0 {
            tracing::info!("Cleaned {} orphaned tmp files in {}", cleaned, self.dir.display());
        }
    }
}

#[async_trait::async_trait]
impl CacheStore for DiskCache {
    async fn exists(&self, key: &CacheKey) -> Result<bool, ProxyError> {
        match fs::metadata(self.path_for(key)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ProxyError::StorageError(format!("stat {}: {}", key, e))),
        }
    }

    async fn read(&self, key: &CacheKey) -> Result<Bytes, ProxyError> {
        fs::read(self.path_for(key))
            .await
            .map(Bytes::from)
            .map_err(|e| ProxyError::StorageError(format!("read {}: {}", key, e)))
    }

    async fn write_atomic(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), ProxyError> {
        let tmp = self.temp_path();
        let target = self.path_for(key);

        let written = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, &target).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(ProxyError::StorageError(format!("write {}: {}", key, e)));
        }
        Ok(())
    }

    async fn modified(&self, key: &CacheKey) -> Result<SystemTime, ProxyError> {
        fs::metadata(self.path_for(key))
            .await
            .and_then(|meta| meta.modified())
            .map_err(|e| ProxyError::StorageError(format!("stat {}: {}", key, e)))
    }

    fn root(&self) -> Option<&Path> {
        Some(&self.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Geometry;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn key(width: u32) -> CacheKey {
        CacheKey::new(&Geometry::Resize { width }, "https://example.com/a.jpg")
    }

    fn dir_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn write_then_read() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskCache::open(tmp.path()).await.unwrap();
        let k = key(100);

        assert!(!cache.exists(&k).await.unwrap());
        cache.write_atomic(&k, b"webp-bytes").await.unwrap();
        assert!(cache.exists(&k).await.unwrap());
        assert_eq!(cache.read(&k).await.unwrap(), Bytes::from_static(b"webp-bytes"));
        assert!(cache.modified(&k).await.is_ok());

        // flat layout, file named by the key, no temp leftovers
        assert_eq!(dir_names(tmp.path()), vec![k.as_str().to_string()]);
    }

    #[tokio::test]
    async fn load_reports_absent_entries() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskCache::open(tmp.path()).await.unwrap();
        assert!(cache.load(&key(1)).await.unwrap().is_none());

        cache.write_atomic(&key(1), b"x").await.unwrap();
        let entry = cache.load(&key(1)).await.unwrap().unwrap();
        assert_eq!(entry.bytes, Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn read_of_missing_entry_is_storage_error() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskCache::open(tmp.path()).await.unwrap();
        assert!(matches!(
            cache.read(&key(7)).await,
            Err(ProxyError::StorageError(_))
        ));
    }

    #[tokio::test]
    async fn overwrite_replaces_content() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskCache::open(tmp.path()).await.unwrap();
        cache.write_atomic(&key(2), b"first").await.unwrap();
        cache.write_atomic(&key(2), b"second").await.unwrap();
        assert_eq!(cache.read(&key(2)).await.unwrap(), Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn concurrent_writers_leave_one_complete_file() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(DiskCache::open(tmp.path()).await.unwrap());
        let payload = vec![42u8; 256 * 1024];

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let payload = payload.clone();
            tasks.push(tokio::spawn(async move {
                cache.write_atomic(&key(3), &payload).await.unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(cache.read(&key(3)).await.unwrap().len(), payload.len());
        assert_eq!(dir_names(tmp.path()).len(), 1);
    }

    #[tokio::test]
    async fn open_removes_orphaned_temp_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(".123-9.tmp"), b"partial").unwrap();
        std::fs::write(tmp.path().join("resize_1_abc.webp"), b"kept").unwrap();

        let cache = DiskCache::open(tmp.path()).await.unwrap();
        assert_eq!(dir_names(tmp.path()), vec!["resize_1_abc.webp".to_string()]);
        assert_eq!(cache.root(), Some(tmp.path()));
    }

    #[tokio::test]
    async fn open_is_idempotent_and_creates_nested_dirs() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("a").join("cache");
        DiskCache::open(&root).await.unwrap();
        DiskCache::open(&root).await.unwrap();
        assert!(root.is_dir());
    }
}
