//! Workspace configuration.
//!
//! Loaded from a JSON file or from `DOCSPACE_*` environment variables; every
//! field has a default so partial files are fine.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkspaceConfig {
    /// Base URL of the catalog API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Local cache ceiling in bytes (default 5 MiB)
    #[serde(default = "default_quota")]
    pub cache_quota_bytes: u64,

    /// Trash entries never evicted to make room (default 50)
    #[serde(default = "default_min_trash")]
    pub min_trash_retained: usize,

    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,

    /// Directory of the file-backed cache; in-memory when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_api_url() -> String { "http://127.0.0.1:8000/api".to_string() }
fn default_quota() -> u64 { 5 * 1024 * 1024 }
fn default_min_trash() -> usize { 50 }
fn default_timeout() -> u64 { 30 }

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            cache_quota_bytes: default_quota(),
            min_trash_retained: default_min_trash(),
            request_timeout_secs: default_timeout(),
            cache_dir: None,
        }
    }
}

impl WorkspaceConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Defaults overridden by any `DOCSPACE_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("DOCSPACE_API_URL") {
            config.api_url = url;
        }
        if let Ok(quota) = std::env::var("DOCSPACE_CACHE_QUOTA") {
            config.cache_quota_bytes = quota.parse().context("DOCSPACE_CACHE_QUOTA")?;
        }
        if let Ok(min) = std::env::var("DOCSPACE_MIN_TRASH") {
            config.min_trash_retained = min.parse().context("DOCSPACE_MIN_TRASH")?;
        }
        if let Ok(secs) = std::env::var("DOCSPACE_TIMEOUT_SECS") {
            config.request_timeout_secs = secs.parse().context("DOCSPACE_TIMEOUT_SECS")?;
        }
        if let Ok(dir) = std::env::var("DOCSPACE_CACHE_DIR") {
            config.cache_dir = Some(PathBuf::from(dir));
        }
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docspace.json");
        std::fs::write(&path, r#"{"cache_quota_bytes": 1024}"#).unwrap();
        let config = WorkspaceConfig::from_json_file(&path).unwrap();
        assert_eq!(config.cache_quota_bytes, 1024);
        assert_eq!(config.min_trash_retained, 50);
        assert_eq!(config.api_url, "http://127.0.0.1:8000/api");
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docspace.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(WorkspaceConfig::from_json_file(&path).is_err());
    }

    #[test]
    fn defaults() {
        let config = WorkspaceConfig::default();
        assert_eq!(config.cache_quota_bytes, 5 * 1024 * 1024);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }
}
