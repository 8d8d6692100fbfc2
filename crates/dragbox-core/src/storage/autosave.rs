//! Throttled persistence of the shared document.

use super::{DurabilityCache, StorageResult};
use crate::crdt::SharedDocument;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default minimum time between two automatic saves.
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(2);

/// Writes document snapshots to a cache at most once per interval.
pub struct AutoSave {
    cache: Arc<dyn DurabilityCache>,
    document_id: String,
    interval: Duration,
    last_save: Option<Instant>,
    /// Whether the document changed since the last save.
    dirty: bool,
}

impl AutoSave {
    pub fn new(cache: Arc<dyn DurabilityCache>, document_id: impl Into<String>) -> Self {
        Self {
            cache,
            document_id: document_id.into(),
            interval: DEFAULT_AUTOSAVE_INTERVAL,
            last_save: None,
            dirty: false,
        }
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn cache(&self) -> &Arc<dyn DurabilityCache> {
        &self.cache
    }

    /// Mark the document as having unsaved changes.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Check if enough time has passed for an auto-save.
    pub fn should_save(&self) -> bool {
        if !self.dirty {
            return false;
        }
        match self.last_save {
            Some(last) => last.elapsed() >= self.interval,
            None => true,
        }
    }

    /// Save if dirty and the interval has elapsed. Returns true if a save happened.
    pub async fn maybe_save(&mut self, document: &SharedDocument) -> StorageResult<bool> {
        if !self.should_save() {
            return Ok(false);
        }
        self.save(document).await?;
        Ok(true)
    }

    /// Save a snapshot immediately.
    pub async fn save(&mut self, document: &SharedDocument) -> StorageResult<()> {
        let snapshot = document.export_snapshot();
        self.cache.save(&self.document_id, &snapshot).await?;
        log::debug!("Saved {} ({} bytes)", self.document_id, snapshot.len());

        self.last_save = Some(Instant::now());
        self.dirty = false;
        Ok(())
    }
}
