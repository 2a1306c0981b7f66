//! Two-layer file-backed caching: the primary snapshot cache and the
//! derived analytics cache.
//!
//! Both use the same layout — a payload JSON next to a small metadata
//! sidecar, written via sibling temp file and atomic rename. The sidecar
//! lets status endpoints answer without parsing the large payload.
//!
//! Validity rules differ by layer: the primary cache combines a time TTL
//! with a cheap remote any-change-since probe; the derived cache is bound
//! strictly to the identity of the primary snapshot it was computed from
//! and never uses a TTL.

use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::Result;
use crate::remote::{self, RemoteClient};
use crate::types::parse_timestamp;

// ---------------------------------------------------------------------------
// Cache kinds and metadata
// ---------------------------------------------------------------------------

/// The named caches the coordinator manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    QuickScan,
    FullScan,
    FullScanAnalytics,
}

impl CacheKind {
    pub fn name(&self) -> &'static str {
        match self {
            CacheKind::QuickScan => "quick_scan",
            CacheKind::FullScan => "full_scan",
            CacheKind::FullScanAnalytics => "full_scan_analytics",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "quick_scan" => Some(CacheKind::QuickScan),
            "full_scan" => Some(CacheKind::FullScan),
            "full_scan_analytics" => Some(CacheKind::FullScanAnalytics),
            _ => None,
        }
    }
}

/// Sidecar metadata for a primary snapshot cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// ISO-8601 write time; the identity the derived cache pins against.
    pub timestamp: String,
    #[serde(default)]
    pub file_count: Option<i64>,
    #[serde(default)]
    pub total_size: Option<i64>,
    /// Most recent file modification time seen in the snapshot.
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default = "default_cache_version")]
    pub cache_version: u32,
    /// Times this entry passed validation after its TTL lapsed.
    #[serde(default)]
    pub validated_count: u32,
}

fn default_cache_version() -> u32 {
    1
}

impl CacheMetadata {
    pub fn new(file_count: Option<i64>, total_size: Option<i64>) -> Self {
        Self {
            timestamp: crate::types::now_iso(),
            file_count,
            total_size,
            last_modified: None,
            cache_version: 1,
            validated_count: 0,
        }
    }
}

/// Sidecar metadata for the derived analytics cache, pinning the exact
/// primary snapshot it was computed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsCacheMetadata {
    pub computed_at: String,
    pub source_cache_timestamp: String,
    pub source_cache_version: u32,
    #[serde(default)]
    pub source_file_count: Option<i64>,
    #[serde(default)]
    pub source_total_size: Option<i64>,
    pub derived_version: u32,
    #[serde(default)]
    pub timings_ms: BTreeMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// File-backed cache coordinator rooted at one directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    cache_dir: PathBuf,
}

impl CacheStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self { cache_dir: cache_dir.into() }
    }

    pub fn payload_path(&self, kind: CacheKind) -> PathBuf {
        self.cache_dir.join(format!("{}_cache.json", kind.name()))
    }

    pub fn meta_path(&self, kind: CacheKind) -> PathBuf {
        self.cache_dir.join(format!("{}_cache.meta.json", kind.name()))
    }

    /// Persist a payload and its sidecar. Both are written to sibling
    /// `.tmp` files and renamed, so readers never observe a partial write.
    pub fn save<T: Serialize, M: Serialize>(
        &self,
        kind: CacheKind,
        payload: &T,
        metadata: &M,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let start = std::time::Instant::now();

        write_atomic(&self.payload_path(kind), &serde_json::to_vec(payload)?)?;
        write_atomic(&self.meta_path(kind), &serde_json::to_vec_pretty(metadata)?)?;

        let size_mb = std::fs::metadata(self.payload_path(kind))
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);
        info!(
            cache = kind.name(),
            size_mb = format!("{size_mb:.2}").as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Cache saved"
        );
        Ok(())
    }

    /// Load a payload. An unparseable payload or sidecar is deleted and
    /// treated as absent.
    pub fn load<T: DeserializeOwned, M: DeserializeOwned>(
        &self,
        kind: CacheKind,
    ) -> Option<(T, M)> {
        let payload_path = self.payload_path(kind);
        if !payload_path.exists() {
            return None;
        }
        let parsed: Option<(T, M)> = (|| {
            let payload = serde_json::from_slice(&std::fs::read(&payload_path).ok()?).ok()?;
            let metadata =
                serde_json::from_slice(&std::fs::read(self.meta_path(kind)).ok()?).ok()?;
            Some((payload, metadata))
        })();

        if parsed.is_none() {
            warn!(cache = kind.name(), "Corrupt cache entry, deleting");
            let _ = std::fs::remove_file(&payload_path);
            let _ = std::fs::remove_file(self.meta_path(kind));
        }
        parsed
    }

    /// Read only the sidecar — cheap enough for status endpoints.
    pub fn metadata<M: DeserializeOwned>(&self, kind: CacheKind) -> Option<M> {
        let bytes = std::fs::read(self.meta_path(kind)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Remove the payload and sidecar for one cache, or every cache.
    pub fn clear(&self, kind: Option<CacheKind>) -> Result<()> {
        let kinds = match kind {
            Some(kind) => vec![kind],
            None => vec![CacheKind::QuickScan, CacheKind::FullScan, CacheKind::FullScanAnalytics],
        };
        for kind in kinds {
            for path in [self.payload_path(kind), self.meta_path(kind)] {
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Validity rules
// ---------------------------------------------------------------------------

/// Time-only validity: the entry is younger than `max_age`.
pub fn is_valid_time_based(metadata: &CacheMetadata, max_age: Duration) -> bool {
    match parse_timestamp(&metadata.timestamp) {
        Some(cached_at) => {
            let age = Utc::now() - cached_at;
            age.num_seconds() >= 0 && (age.num_seconds() as u64) < max_age.as_secs()
        }
        None => false,
    }
}

/// Primary snapshot validity: fresh within `max_age`, or — when past the
/// TTL — still valid if the remote reports nothing modified since the entry
/// was written. A failing probe falls back to the strict time check.
pub fn validate_snapshot(
    client: &dyn RemoteClient,
    metadata: &CacheMetadata,
    max_age: Duration,
) -> bool {
    if is_valid_time_based(metadata, max_age) {
        return true;
    }
    let Some(cached_at) = parse_timestamp(&metadata.timestamp) else {
        return false;
    };
    match remote::check_recently_modified(client, cached_at) {
        Ok(changed) => {
            if changed {
                info!(cache_timestamp = metadata.timestamp.as_str(), "Cache invalidated by remote change");
                false
            } else {
                let age_days = (Utc::now() - cached_at).num_days();
                info!(age_days, "Cache past TTL but remote unchanged, still valid");
                true
            }
        }
        Err(e) => {
            warn!(error = %e, "Remote probe failed, falling back to time-based validation");
            is_valid_time_based(metadata, max_age)
        }
    }
}

/// Derived analytics validity: bound strictly to the identity of the source
/// snapshot. Never time-based.
pub fn analytics_cache_valid(derived: &AnalyticsCacheMetadata, primary: &CacheMetadata) -> bool {
    derived.source_cache_timestamp == primary.timestamp
        && derived.source_cache_version == primary.cache_version
        && (derived.source_file_count.is_none()
            || derived.source_file_count == primary.file_count)
}
