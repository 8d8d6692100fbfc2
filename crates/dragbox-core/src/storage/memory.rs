//! In-memory durability cache.

use super::{BoxFuture, DurabilityCache, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory cache for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryCache {
    documents: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    /// Create a new empty memory cache.
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other(format!("Lock error: {}", e))
}

impl DurabilityCache for MemoryCache {
    fn save(&self, id: &str, snapshot: &[u8]) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        let snapshot = snapshot.to_vec();
        Box::pin(async move {
            let mut docs = self.documents.write().map_err(lock_error)?;
            docs.insert(id, snapshot);
            Ok(())
        })
    }

    fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<Vec<u8>>> {
        let id = id.to_string();
        Box::pin(async move {
            let docs = self.documents.read().map_err(lock_error)?;
            docs.get(&id).cloned().ok_or(StorageError::NotFound(id))
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            let mut docs = self.documents.write().map_err(lock_error)?;
            docs.remove(&id);
            Ok(())
        })
    }

    fn exists(&self, id: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let id = id.to_string();
        Box::pin(async move {
            let docs = self.documents.read().map_err(lock_error)?;
            Ok(docs.contains_key(&id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block_on;

    #[test]
    fn test_save_and_load() {
        let cache = MemoryCache::new();
        block_on(cache.save("test", b"snapshot")).unwrap();
        assert_eq!(block_on(cache.load("test")).unwrap(), b"snapshot");
    }

    #[test]
    fn test_not_found() {
        let cache = MemoryCache::new();
        let result = block_on(cache.load("nonexistent"));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_exists_and_delete() {
        let cache = MemoryCache::new();
        assert!(!block_on(cache.exists("test")).unwrap());
        block_on(cache.save("test", b"x")).unwrap();
        assert!(block_on(cache.exists("test")).unwrap());
        block_on(cache.delete("test")).unwrap();
        assert!(!block_on(cache.exists("test")).unwrap());
    }
}
