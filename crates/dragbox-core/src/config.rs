//! Session configuration parsed from environment variables.

use crate::storage::{DEFAULT_AUTOSAVE_INTERVAL, FileCache, StorageResult};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DOCUMENT_ID: &str = "dragbox";
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:3030/ws";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Shared document (and relay room) to open.
    pub document_id: String,
    /// Relay WebSocket endpoint.
    pub server_url: String,
    /// Minimum time between automatic snapshot saves.
    pub autosave_interval: Duration,
    /// Snapshot directory; the platform data directory when `None`.
    pub storage_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            document_id: DEFAULT_DOCUMENT_ID.to_string(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            autosave_interval: DEFAULT_AUTOSAVE_INTERVAL,
            storage_dir: None,
        }
    }
}

impl SessionConfig {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            ..Self::default()
        }
    }

    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `DRAGBOX_DOCUMENT`: document id, default `dragbox`
    /// - `DRAGBOX_SERVER_URL`: default `ws://localhost:3030/ws`
    /// - `DRAGBOX_AUTOSAVE_MS`: default 2000
    /// - `DRAGBOX_STORAGE_DIR`: default platform data directory
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let document_id = match lookup("DRAGBOX_DOCUMENT") {
            Some(id) if id.trim().is_empty() => {
                return Err(ConfigError::InvalidValue {
                    var: "DRAGBOX_DOCUMENT",
                    value: id,
                });
            }
            Some(id) => id,
            None => defaults.document_id,
        };
        let server_url = lookup("DRAGBOX_SERVER_URL").unwrap_or(defaults.server_url);
        let autosave_interval = match lookup("DRAGBOX_AUTOSAVE_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidValue {
                    var: "DRAGBOX_AUTOSAVE_MS",
                    value: raw,
                })?,
            None => defaults.autosave_interval,
        };
        let storage_dir = lookup("DRAGBOX_STORAGE_DIR").map(PathBuf::from);

        Ok(Self {
            document_id,
            server_url,
            autosave_interval,
            storage_dir,
        })
    }

    /// Open the file cache this config points at.
    pub fn file_cache(&self) -> StorageResult<FileCache> {
        match &self.storage_dir {
            Some(dir) => FileCache::new(dir),
            None => FileCache::default_location(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = SessionConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.document_id, "dragbox");
    }

    #[test]
    fn test_overrides() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("DRAGBOX_DOCUMENT", "room-7"),
            ("DRAGBOX_SERVER_URL", "wss://relay.example/ws"),
            ("DRAGBOX_AUTOSAVE_MS", "500"),
            ("DRAGBOX_STORAGE_DIR", "/tmp/dragbox"),
        ]))
        .unwrap();

        assert_eq!(config.document_id, "room-7");
        assert_eq!(config.server_url, "wss://relay.example/ws");
        assert_eq!(config.autosave_interval, Duration::from_millis(500));
        assert_eq!(config.storage_dir, Some(PathBuf::from("/tmp/dragbox")));
    }

    #[test]
    fn test_invalid_values() {
        let err = SessionConfig::from_lookup(lookup(&[("DRAGBOX_AUTOSAVE_MS", "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: "DRAGBOX_AUTOSAVE_MS",
                value: "soon".to_string()
            }
        );
        assert!(SessionConfig::from_lookup(lookup(&[("DRAGBOX_DOCUMENT", "  ")])).is_err());
    }

    #[test]
    fn test_file_cache_uses_storage_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = SessionConfig {
            storage_dir: Some(dir.path().join("snapshots")),
            ..SessionConfig::default()
        };
        let cache = config.file_cache().unwrap();
        assert_eq!(cache.base_path(), dir.path().join("snapshots").as_path());
    }
}
