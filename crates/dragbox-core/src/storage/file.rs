//! File-based durability cache.

use super::{BoxFuture, DurabilityCache, StorageError, StorageResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Stores each document snapshot as `<id>.loro` in a directory.
pub struct FileCache {
    /// Base directory for snapshots.
    base_path: PathBuf,
}

impl FileCache {
    /// Create a new file cache with the given base directory.
    ///
    /// Creates the directory if it doesn't exist.
    pub fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|e| {
                StorageError::Io(format!("Failed to create storage directory: {}", e))
            })?;
        }
        Ok(Self { base_path })
    }

    /// Create a file cache in the default location.
    ///
    /// On Unix: `~/.local/share/dragbox/documents/`
    /// On Windows: `%LOCALAPPDATA%\dragbox\documents\`
    pub fn default_location() -> StorageResult<Self> {
        Self::new(default_dir()?)
    }

    /// Get the file path for a document ID.
    fn document_path(&self, id: &str) -> PathBuf {
        let safe_id: String = id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_path.join(format!("{}.loro", safe_id))
    }

    /// Get the base path.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

/// Platform data directory for snapshots.
pub(crate) fn default_dir() -> StorageResult<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| StorageError::Io("Could not determine home directory".to_string()))?;
    Ok(base.join("dragbox").join("documents"))
}

impl DurabilityCache for FileCache {
    fn save(&self, id: &str, snapshot: &[u8]) -> BoxFuture<'_, StorageResult<()>> {
        let path = self.document_path(id);
        let tmp = path.with_extension("loro.tmp");
        let snapshot = snapshot.to_vec();

        Box::pin(async move {
            // Write-then-rename so a crash never leaves a torn snapshot.
            fs::write(&tmp, &snapshot)
                .and_then(|_| fs::rename(&tmp, &path))
                .map_err(|e| StorageError::Io(format!("Failed to write {}: {}", path.display(), e)))
        })
    }

    fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<Vec<u8>>> {
        let path = self.document_path(id);
        let id_owned = id.to_string();

        Box::pin(async move {
            if !path.exists() {
                return Err(StorageError::NotFound(id_owned));
            }
            fs::read(&path)
                .map_err(|e| StorageError::Io(format!("Failed to read {}: {}", path.display(), e)))
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'_, StorageResult<()>> {
        let path = self.document_path(id);

        Box::pin(async move {
            if path.exists() {
                fs::remove_file(&path).map_err(|e| {
                    StorageError::Io(format!("Failed to delete {}: {}", path.display(), e))
                })?;
            }
            Ok(())
        })
    }

    fn exists(&self, id: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let path = self.document_path(id);
        Box::pin(async move { Ok(path.exists()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block_on;
    use tempfile::TempDir;

    #[test]
    fn test_file_save_and_load() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();

        block_on(cache.save("room-1", b"\x01\x02\x03")).unwrap();
        assert_eq!(block_on(cache.load("room-1")).unwrap(), vec![1, 2, 3]);
        assert!(dir.path().join("room-1.loro").exists());
    }

    #[test]
    fn test_file_overwrite() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();

        block_on(cache.save("doc", b"old")).unwrap();
        block_on(cache.save("doc", b"new")).unwrap();
        assert_eq!(block_on(cache.load("doc")).unwrap(), b"new");
    }

    #[test]
    fn test_file_not_found() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        assert!(matches!(block_on(cache.load("missing")), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_file_id_sanitized() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();

        block_on(cache.save("../escape", b"x")).unwrap();
        assert!(dir.path().join("___escape.loro").exists());
        assert!(block_on(cache.exists("../escape")).unwrap());

        block_on(cache.delete("../escape")).unwrap();
        assert!(!block_on(cache.exists("../escape")).unwrap());
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let cache = FileCache::new(&nested).unwrap();
        assert_eq!(cache.base_path(), nested.as_path());
        assert!(nested.is_dir());
    }
}
