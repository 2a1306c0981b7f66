//! Runtime configuration. Loaded from `drivescope.toml` or defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Recognized deployment options. Every field has a default so a partial
/// config file (or none at all) works.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Directory holding the embedded index database.
    pub data_dir: PathBuf,
    /// Directory holding the snapshot and analytics cache files.
    pub cache_dir: PathBuf,
    /// Page size for remote list/changes calls.
    pub fetch_page_size: u32,
    /// Records per commit batch during a full crawl.
    pub commit_batch_crawl: usize,
    /// Records per commit batch during an incremental sync.
    pub commit_batch_sync: usize,
    /// Time-based validity window for the quick snapshot cache, in seconds.
    pub primary_cache_ttl_quick_secs: u64,
    /// Time-based validity window for the full snapshot cache, in seconds.
    pub primary_cache_ttl_full_secs: u64,
    /// Minimum file size considered by duplicate grouping.
    pub duplicate_min_size: i64,
    /// Maximum number of full paths reconstructed per file.
    pub path_max_paths: usize,
    /// Depth cap per reconstructed path (cycle defense).
    pub path_max_depth: usize,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            cache_dir: PathBuf::from("cache"),
            fetch_page_size: 1000,
            commit_batch_crawl: 500,
            commit_batch_sync: 100,
            primary_cache_ttl_quick_secs: 7 * 24 * 60 * 60,
            primary_cache_ttl_full_secs: 30 * 24 * 60 * 60,
            duplicate_min_size: 0,
            path_max_paths: 5,
            path_max_depth: 50,
        }
    }
}

impl DriveConfig {
    /// Load from a TOML file, falling back to defaults on any error.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Invalid config file, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Path to the index database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("drive_index.db")
    }

    pub fn primary_cache_ttl_quick(&self) -> Duration {
        Duration::from_secs(self.primary_cache_ttl_quick_secs)
    }

    pub fn primary_cache_ttl_full(&self) -> Duration {
        Duration::from_secs(self.primary_cache_ttl_full_secs)
    }
}
