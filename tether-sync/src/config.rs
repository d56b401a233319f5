//! Configuration for the sync layer.

use serde::{Deserialize, Serialize};
use std::path::Path;

pub use tether_storage::CacheConfig;

use crate::error::{SyncError, SyncResult};

/// Where and how the network repository reaches the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Backend root, e.g. `https://baas.example.com`.
    pub base_url: String,
    /// Application key, the second path segment of every collection URL.
    pub app_key: String,
    /// Bearer token sent with every request.
    pub auth_token: Option<String>,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// First path segment of every collection URL.
    pub namespace: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            app_key: String::new(),
            auth_token: None,
            timeout_ms: 30_000,
            namespace: "appdata".to_string(),
        }
    }
}

/// Sync log settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Reserved persister key holding the pending-mutation log.
    pub sync_collection: String,
    /// Maximum number of entries replayed concurrently by a push.
    pub push_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_collection: "__tether_sync".to_string(),
            push_concurrency: 10,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub network: NetworkConfig,
    pub cache: CacheConfig,
    pub sync: SyncConfig,
}

impl TetherConfig {
    /// Parses a JSON document. Missing sections and fields take their defaults.
    pub fn from_json_str(json: &str) -> SyncResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> SyncResult<()> {
        if self.sync.push_concurrency == 0 {
            return Err(SyncError::Config(
                "sync.push_concurrency must be at least 1".to_string(),
            ));
        }
        if self.sync.sync_collection.is_empty() {
            return Err(SyncError::Config(
                "sync.sync_collection must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
