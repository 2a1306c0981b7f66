//! Transport-agnostic service facade.
//!
//! Every exposed operation maps 1-1 onto whatever surface fronts this crate
//! (an HTTP layer, a CLI, tests). The facade owns the injected collaborators
//! — remote client, index store, cache coordinator, job registry, analytics
//! state — and the scheduler policy that keeps writer jobs mutually
//! exclusive and analytics pinned to the current primary snapshot.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::analytics::{self, AnalyticsBundle};
use crate::cache::{
    analytics_cache_valid, validate_snapshot, AnalyticsCacheMetadata, CacheKind, CacheMetadata,
    CacheStore,
};
use crate::config::DriveConfig;
use crate::crawl;
use crate::error::{Error, Result};
use crate::health::{self, HealthReport};
use crate::jobs::{AnalyticsRecord, AnalyticsState, JobKind, JobRecord, JobRegistry};
use crate::queries;
use crate::remote::{self, RemoteClient};
use crate::store::IndexStore;
use crate::sync;
use crate::types::{now_iso, DriveOverview, QuickScan, Snapshot};

/// Recognized analytics view names, in the order the bundle lays them out.
pub const ANALYTICS_VIEWS: &[&str] = &[
    "duplicates",
    "depths",
    "semantic",
    "age_semantic",
    "type_semantic",
    "orphans",
    "types",
    "timeline",
    "large",
];

/// Query extras accepted by [`DriveService::analytics_view`].
#[derive(Debug, Clone, Default)]
pub struct ViewQuery {
    pub limit: Option<usize>,
    pub offset: usize,
    pub category: Option<String>,
    pub file_type: Option<String>,
}

/// One analytics view plus conditional-read hints: a weak ETag derived from
/// the derived-cache identity, and a Last-Modified equal to `computed_at`.
/// Clients may advertise a one-hour browser TTL; both hints are advisory.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsView {
    pub view: String,
    pub etag: String,
    pub last_modified: String,
    pub data: serde_json::Value,
}

/// Analytics compute status plus the derived sidecar when one exists.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsStatus {
    #[serde(flatten)]
    pub record: AnalyticsRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AnalyticsCacheMetadata>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// The core engine behind the API surface. Cheap to clone; worker threads
/// carry their own clone.
#[derive(Clone)]
pub struct DriveService {
    remote: Arc<dyn RemoteClient>,
    index: IndexStore,
    cache: CacheStore,
    jobs: Arc<JobRegistry>,
    analytics: Arc<AnalyticsState>,
    config: Arc<DriveConfig>,
    /// Writer jobs must not overlap; held for the duration of a crawl/sync.
    writer_gate: Arc<Mutex<()>>,
}

impl DriveService {
    pub fn new(remote: Arc<dyn RemoteClient>, config: DriveConfig) -> Self {
        let index = IndexStore::new(config.db_path());
        let cache = CacheStore::new(config.cache_dir.clone());
        Self {
            remote,
            index,
            cache,
            jobs: Arc::new(JobRegistry::new()),
            analytics: Arc::new(AnalyticsState::new()),
            config: Arc::new(config),
            writer_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn index_store(&self) -> &IndexStore {
        &self.index
    }

    pub fn cache_store(&self) -> &CacheStore {
        &self.cache
    }

    // -----------------------------------------------------------------------
    // Overview
    // -----------------------------------------------------------------------

    /// Remote account quota and user identity.
    pub fn overview(&self) -> Result<DriveOverview> {
        remote::fetch_overview(self.remote.as_ref())
    }

    /// Overview plus root-level folders, served from the quick cache under
    /// the quick TTL and refreshed from the remote on a miss.
    pub fn quick_scan(&self) -> Result<(QuickScan, CacheMetadata)> {
        if let Some((scan, metadata)) =
            self.cache.load::<QuickScan, CacheMetadata>(CacheKind::QuickScan)
        {
            if validate_snapshot(
                self.remote.as_ref(),
                &metadata,
                self.config.primary_cache_ttl_quick(),
            ) {
                return Ok((scan, metadata));
            }
        }

        let scan = QuickScan {
            overview: remote::fetch_overview(self.remote.as_ref())?,
            top_folders: remote::get_top_level_folders(self.remote.as_ref(), &self.config)?,
        };
        let metadata = CacheMetadata::new(Some(scan.top_folders.len() as i64), None);
        self.cache.save(CacheKind::QuickScan, &scan, &metadata)?;
        Ok((scan, metadata))
    }

    // -----------------------------------------------------------------------
    // Writer jobs
    // -----------------------------------------------------------------------

    /// Begin a full crawl in the background, or short-circuit to the cached
    /// snapshot when it still passes validity. Returns the job id to poll.
    pub fn start_crawl(&self, force: bool) -> String {
        if !force {
            if let Some((_, metadata)) =
                self.cache.load::<Snapshot, CacheMetadata>(CacheKind::FullScan)
            {
                if validate_snapshot(
                    self.remote.as_ref(),
                    &metadata,
                    self.config.primary_cache_ttl_full(),
                ) {
                    info!(timestamp = metadata.timestamp.as_str(), "Crawl short-circuited to cached snapshot");
                    return self.jobs.create_completed(
                        JobKind::Scan,
                        json!({
                            "type": "cached",
                            "timestamp": metadata.timestamp,
                            "file_count": metadata.file_count,
                            "total_size": metadata.total_size,
                        }),
                    );
                }
            }
        }

        let job_id = self.jobs.create(JobKind::Scan);
        let service = self.clone();
        let id = job_id.clone();
        std::thread::spawn(move || service.crawl_worker(&id));
        job_id
    }

    /// Begin an incremental sync in the background. Fails fast with
    /// [`Error::NoContinuationToken`] when a full crawl is required first.
    pub fn start_sync(&self) -> Result<String> {
        if !sync::can_sync(&self.index) {
            return Err(Error::NoContinuationToken);
        }
        let job_id = self.jobs.create(JobKind::Sync);
        let service = self.clone();
        let id = job_id.clone();
        std::thread::spawn(move || service.sync_worker(&id));
        Ok(job_id)
    }

    /// Scheduler policy: run a full crawl when forced or when no
    /// continuation token exists, an incremental sync otherwise. Registered
    /// as an index job of the chosen kind.
    pub fn start_smart_sync(&self, force_full: bool) -> String {
        let kind = if force_full || crawl::needs_full_crawl(&self.index) {
            JobKind::Crawl
        } else {
            JobKind::Sync
        };
        let job_id = self.jobs.create(kind);
        let service = self.clone();
        let id = job_id.clone();
        match kind {
            JobKind::Sync => {
                std::thread::spawn(move || service.sync_worker(&id));
            }
            _ => {
                std::thread::spawn(move || service.crawl_worker(&id));
            }
        }
        job_id
    }

    fn crawl_worker(&self, job_id: &str) {
        let _writer = self.writer_gate.lock().expect("writer gate poisoned");
        let jobs = Arc::clone(&self.jobs);
        let id = job_id.to_string();
        let outcome = crawl::run_full_crawl(
            self.remote.as_ref(),
            &self.index,
            &self.config,
            false,
            &mut |progress| {
                jobs.publish_progress(&id, serde_json::to_value(progress).unwrap_or_default());
            },
        );

        match outcome.and_then(|progress| {
            let snapshot = self.persist_primary_snapshot()?;
            Ok((progress, snapshot))
        }) {
            Ok((progress, snapshot)) => {
                self.maybe_start_analytics();
                self.jobs.complete(
                    job_id,
                    json!({
                        "type": "full_crawl",
                        "stats": snapshot.stats,
                        "errors": progress.errors,
                        "started_at": progress.started_at,
                        "completed_at": progress.completed_at,
                    }),
                );
            }
            Err(e) => self.jobs.fail(job_id, &e),
        }
    }

    fn sync_worker(&self, job_id: &str) {
        let _writer = self.writer_gate.lock().expect("writer gate poisoned");
        let jobs = Arc::clone(&self.jobs);
        let id = job_id.to_string();
        let outcome =
            sync::run_sync(self.remote.as_ref(), &self.index, &self.config, &mut |progress| {
                jobs.publish_progress(&id, serde_json::to_value(progress).unwrap_or_default());
            });

        match outcome {
            Ok(progress) => {
                let applied =
                    progress.files_added + progress.files_updated + progress.files_removed;
                let result = if applied > 0 {
                    match self.persist_primary_snapshot() {
                        Ok(snapshot) => {
                            self.maybe_start_analytics();
                            json!({
                                "type": "incremental_sync",
                                "files_added": progress.files_added,
                                "files_updated": progress.files_updated,
                                "files_removed": progress.files_removed,
                                "errors": progress.errors,
                                "stats": snapshot.stats,
                            })
                        }
                        Err(e) => {
                            self.jobs.fail(job_id, &e);
                            return;
                        }
                    }
                } else {
                    json!({
                        "type": "incremental_sync",
                        "files_added": 0,
                        "files_updated": 0,
                        "files_removed": 0,
                        "errors": progress.errors,
                    })
                };
                self.jobs.complete(job_id, result);
            }
            Err(e) => self.jobs.fail(job_id, &e),
        }
    }

    /// Rebuild the primary snapshot from the store and rewrite the
    /// `full_scan` cache. The sidecar gets a fresh timestamp, so any derived
    /// cache is implicitly invalidated until analytics recomputes.
    fn persist_primary_snapshot(&self) -> Result<Snapshot> {
        let conn = self.index.connect()?;
        let snapshot = queries::build_snapshot(&conn)?;

        let mut metadata = CacheMetadata::new(
            Some(snapshot.stats.total_files as i64),
            Some(snapshot.stats.total_size),
        );
        metadata.last_modified = snapshot
            .files
            .iter()
            .filter_map(|f| f.modified_time.as_deref())
            .max()
            .map(|s| s.to_string());

        self.cache.save(CacheKind::FullScan, &snapshot, &metadata)?;
        Ok(snapshot)
    }

    // -----------------------------------------------------------------------
    // Polling and reads
    // -----------------------------------------------------------------------

    /// Snapshot of a job record by id, from either job table.
    pub fn job_status(&self, job_id: &str) -> Result<JobRecord> {
        self.jobs.get(job_id)
    }

    /// The cached primary snapshot, when it passes validity rules.
    pub fn cached_snapshot(&self) -> Result<(Snapshot, CacheMetadata)> {
        let (snapshot, metadata) = self
            .cache
            .load::<Snapshot, CacheMetadata>(CacheKind::FullScan)
            .ok_or_else(|| Error::NotFound("no cached snapshot".to_string()))?;
        if !validate_snapshot(self.remote.as_ref(), &metadata, self.config.primary_cache_ttl_full())
        {
            return Err(Error::CacheExpired("full_scan".to_string()));
        }
        Ok((snapshot, metadata))
    }

    /// Snapshot built live from the store, bypassing the cache.
    pub fn index_snapshot(&self) -> Result<Snapshot> {
        if !self.index.exists() {
            return Err(Error::NotFound("index is empty; run a crawl first".to_string()));
        }
        let conn = self.index.connect()?;
        let snapshot = queries::build_snapshot(&conn)?;
        if snapshot.files.is_empty() {
            return Err(Error::NotFound("index is empty; run a crawl first".to_string()));
        }
        Ok(snapshot)
    }

    /// Exact duplicate groups from the store (md5 + size).
    pub fn duplicates(
        &self,
        limit: Option<usize>,
        min_size: Option<i64>,
    ) -> Result<Vec<queries::DuplicateGroup>> {
        let conn = self.index.connect()?;
        queries::duplicate_groups(
            &conn,
            min_size.unwrap_or(self.config.duplicate_min_size),
            limit,
        )
    }

    /// Run every integrity check over the store.
    pub fn health(&self) -> HealthReport {
        health::run_all_health_checks(&self.index)
    }

    // -----------------------------------------------------------------------
    // Analytics
    // -----------------------------------------------------------------------

    /// Current compute status plus the derived sidecar when present.
    pub fn analytics_status(&self) -> AnalyticsStatus {
        AnalyticsStatus {
            record: self.analytics.snapshot(),
            metadata: self.cache.metadata(CacheKind::FullScanAnalytics),
        }
    }

    /// Start the derived-analytics compute. A second request while one is
    /// running is a no-op; returns the current status either way.
    pub fn start_analytics(&self) -> AnalyticsStatus {
        if self.analytics.try_start() {
            let service = self.clone();
            std::thread::spawn(move || service.analytics_worker());
        }
        self.analytics_status()
    }

    /// Enqueue analytics iff the derived cache is absent or fails the
    /// identity check against the current primary sidecar.
    pub fn maybe_start_analytics(&self) {
        let Some(primary) = self.cache.metadata::<CacheMetadata>(CacheKind::FullScan) else {
            return;
        };
        let valid = self
            .cache
            .metadata::<AnalyticsCacheMetadata>(CacheKind::FullScanAnalytics)
            .is_some_and(|derived| analytics_cache_valid(&derived, &primary));
        if !valid {
            self.start_analytics();
        }
    }

    fn analytics_worker(&self) {
        let outcome = (|| -> Result<String> {
            let (snapshot, source) = self
                .cache
                .load::<Snapshot, CacheMetadata>(CacheKind::FullScan)
                .ok_or_else(|| Error::CacheMiss("full_scan".to_string()))?;

            let (bundle, timings_ms) = analytics::compute_with_timings(&snapshot, Utc::now());
            let metadata = AnalyticsCacheMetadata {
                computed_at: now_iso(),
                source_cache_timestamp: source.timestamp,
                source_cache_version: source.cache_version,
                source_file_count: source.file_count,
                source_total_size: source.total_size,
                derived_version: bundle.derived_version,
                timings_ms,
            };
            self.cache.save(CacheKind::FullScanAnalytics, &bundle, &metadata)?;
            Ok(metadata.computed_at)
        })();

        match outcome {
            Ok(computed_at) => self.analytics.mark_ready(computed_at),
            Err(e) => {
                warn!(error = %e, "Analytics compute failed");
                self.analytics.mark_error(&e);
            }
        }
    }

    /// Fetch one derived view with pagination and filter extras. Starts a
    /// compute and returns [`Error::NotReady`] when the derived cache is
    /// absent or no longer matches the primary snapshot.
    pub fn analytics_view(&self, view: &str, query: &ViewQuery) -> Result<AnalyticsView> {
        if !ANALYTICS_VIEWS.contains(&view) {
            return Err(Error::Validation(format!("unknown analytics view '{view}'")));
        }

        let loaded = self
            .cache
            .load::<AnalyticsBundle, AnalyticsCacheMetadata>(CacheKind::FullScanAnalytics);
        let Some((bundle, metadata)) = loaded else {
            self.start_analytics();
            return Err(Error::NotReady(view.to_string()));
        };

        if let Some(primary) = self.cache.metadata::<CacheMetadata>(CacheKind::FullScan) {
            if !analytics_cache_valid(&metadata, &primary) {
                self.start_analytics();
                return Err(Error::NotReady(view.to_string()));
            }
        }

        let data = slice_view(&bundle, view, query)?;
        Ok(AnalyticsView {
            view: view.to_string(),
            etag: view_etag(&metadata, view, query),
            last_modified: metadata.computed_at.clone(),
            data,
        })
    }

    // -----------------------------------------------------------------------
    // Cache and index maintenance
    // -----------------------------------------------------------------------

    /// Remove the payload and sidecar for a named cache (or all of them).
    /// Clearing the derived cache resets the analytics state to missing.
    pub fn clear_cache(&self, kind: Option<&str>) -> Result<()> {
        let kind = match kind {
            Some(name) => Some(
                CacheKind::parse(name)
                    .ok_or_else(|| Error::Validation(format!("unknown cache '{name}'")))?,
            ),
            None => None,
        };
        self.cache.clear(kind)?;
        if kind.is_none() || kind == Some(CacheKind::FullScanAnalytics) {
            self.analytics.mark_missing();
        }
        Ok(())
    }

    /// Truncate the store tables, preserving the schema version.
    pub fn clear_index(&self) -> Result<()> {
        if self.index.exists() {
            self.index.clear()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// View slicing
// ---------------------------------------------------------------------------

fn paginate(values: &[serde_json::Value], query: &ViewQuery) -> Vec<serde_json::Value> {
    let offset = query.offset.min(values.len());
    let end = match query.limit {
        Some(limit) => (offset + limit).min(values.len()),
        None => values.len(),
    };
    values[offset..end].to_vec()
}

fn slice_view(
    bundle: &AnalyticsBundle,
    view: &str,
    query: &ViewQuery,
) -> Result<serde_json::Value> {
    let value = match view {
        "duplicates" => {
            let groups: Vec<serde_json::Value> = bundle
                .duplicates
                .groups
                .iter()
                .map(|g| serde_json::to_value(g))
                .collect::<std::result::Result<_, _>>()?;
            json!({
                "groups": paginate(&groups, query),
                "total_groups": bundle.duplicates.groups.len(),
                "total_potential_savings": bundle.duplicates.total_potential_savings,
            })
        }
        "orphans" => {
            let orphans: Vec<serde_json::Value> = bundle
                .orphans
                .orphans
                .iter()
                .map(|o| serde_json::to_value(o))
                .collect::<std::result::Result<_, _>>()?;
            json!({
                "orphans": paginate(&orphans, query),
                "count": bundle.orphans.count,
            })
        }
        "large" => {
            let ids = match query.file_type.as_deref() {
                Some("folders") => &bundle.large.top_folder_ids,
                _ => &bundle.large.top_file_ids,
            };
            let values: Vec<serde_json::Value> =
                ids.iter().map(|id| serde_json::Value::String(id.clone())).collect();
            json!({
                "ids": paginate(&values, query),
                "total": ids.len(),
            })
        }
        "semantic" => {
            let mut value = serde_json::to_value(&bundle.semantic)?;
            if let Some(category) = &query.category {
                let filtered = bundle
                    .semantic
                    .category_folder_ids
                    .get(category)
                    .cloned()
                    .unwrap_or_default();
                let mut map = serde_json::Map::new();
                map.insert(category.clone(), serde_json::to_value(filtered)?);
                value["category_folder_ids"] = serde_json::Value::Object(map);
            }
            value
        }
        "depths" => serde_json::to_value(&bundle.depths)?,
        "age_semantic" => serde_json::to_value(&bundle.age_semantic)?,
        "type_semantic" => serde_json::to_value(&bundle.type_semantic)?,
        "types" => serde_json::to_value(&bundle.types)?,
        "timeline" => serde_json::to_value(&bundle.timeline)?,
        _ => return Err(Error::Validation(format!("unknown analytics view '{view}'"))),
    };
    Ok(value)
}

/// Weak ETag over the derived identity plus the query extras.
fn view_etag(metadata: &AnalyticsCacheMetadata, view: &str, query: &ViewQuery) -> String {
    let mut hasher = DefaultHasher::new();
    query.limit.hash(&mut hasher);
    query.offset.hash(&mut hasher);
    query.category.hash(&mut hasher);
    query.file_type.hash(&mut hasher);
    format!(
        "W/\"{}-{}-{}-{:x}\"",
        metadata.derived_version,
        metadata.source_cache_timestamp,
        view,
        hasher.finish()
    )
}
