//! Background job coordination: in-memory job tables and the analytics
//! singleton state.
//!
//! Jobs run on worker threads and publish progress by rewriting their plain
//! job record; callers poll by id. Records are soft state — a process
//! restart clears them without affecting the store or the caches. No
//! cancellation primitive exists: jobs run to completion or error.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Job records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Scan,
    Crawl,
    Sync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Running,
    Complete,
    Error,
}

/// A plain snapshot of one background job. Progress is whatever the engine
/// publishes (serialized [`CrawlProgress`](crate::crawl::CrawlProgress) or
/// [`SyncProgress`](crate::sync::SyncProgress)); the result is attached on
/// completion. No in-process handles leak across this boundary.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// In-memory job tables: primary scan jobs and index crawl/sync jobs,
/// keyed by opaque UUIDv4 job ids.
#[derive(Debug, Default)]
pub struct JobRegistry {
    scans: DashMap<String, JobRecord>,
    index_jobs: DashMap<String, JobRecord>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: JobKind) -> &DashMap<String, JobRecord> {
        match kind {
            JobKind::Scan => &self.scans,
            JobKind::Crawl | JobKind::Sync => &self.index_jobs,
        }
    }

    /// Register a new job in `starting` state and return its id.
    pub fn create(&self, kind: JobKind) -> String {
        let id = Uuid::new_v4().to_string();
        let record = JobRecord {
            id: id.clone(),
            kind,
            status: JobStatus::Starting,
            progress: serde_json::Value::Null,
            result: None,
            error: None,
        };
        self.table(kind).insert(id.clone(), record);
        id
    }

    /// Register a job that is already finished (e.g. a crawl request
    /// short-circuited by a valid cached snapshot).
    pub fn create_completed(&self, kind: JobKind, result: serde_json::Value) -> String {
        let id = self.create(kind);
        self.complete(&id, result);
        id
    }

    pub fn publish_progress(&self, id: &str, progress: serde_json::Value) {
        for table in [&self.scans, &self.index_jobs] {
            if let Some(mut record) = table.get_mut(id) {
                record.status = JobStatus::Running;
                record.progress = progress;
                return;
            }
        }
    }

    pub fn complete(&self, id: &str, result: serde_json::Value) {
        for table in [&self.scans, &self.index_jobs] {
            if let Some(mut record) = table.get_mut(id) {
                record.status = JobStatus::Complete;
                record.result = Some(result);
                return;
            }
        }
    }

    pub fn fail(&self, id: &str, error: &Error) {
        for table in [&self.scans, &self.index_jobs] {
            if let Some(mut record) = table.get_mut(id) {
                record.status = JobStatus::Error;
                record.error = Some(error.to_string());
                return;
            }
        }
    }

    /// Snapshot of a job's current record, from either table.
    pub fn get(&self, id: &str) -> Result<JobRecord> {
        for table in [&self.scans, &self.index_jobs] {
            if let Some(record) = table.get(id) {
                return Ok(record.clone());
            }
        }
        Err(Error::NotFound(format!("job {id}")))
    }
}

// ---------------------------------------------------------------------------
// Analytics singleton state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsPhase {
    Missing,
    Running,
    Ready,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsRecord {
    pub phase: AnalyticsPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computed_at: Option<String>,
}

/// Singleton record tracking the derived-analytics compute. A second start
/// request while the phase is `running` is a no-op.
#[derive(Debug)]
pub struct AnalyticsState {
    record: Mutex<AnalyticsRecord>,
}

impl Default for AnalyticsState {
    fn default() -> Self {
        Self {
            record: Mutex::new(AnalyticsRecord {
                phase: AnalyticsPhase::Missing,
                error: None,
                computed_at: None,
            }),
        }
    }
}

impl AnalyticsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> AnalyticsRecord {
        self.record.lock().expect("analytics state poisoned").clone()
    }

    /// Transition to `running`. Returns false (and changes nothing) if a
    /// compute is already in flight.
    pub fn try_start(&self) -> bool {
        let mut record = self.record.lock().expect("analytics state poisoned");
        if record.phase == AnalyticsPhase::Running {
            return false;
        }
        record.phase = AnalyticsPhase::Running;
        record.error = None;
        true
    }

    pub fn mark_ready(&self, computed_at: String) {
        let mut record = self.record.lock().expect("analytics state poisoned");
        record.phase = AnalyticsPhase::Ready;
        record.computed_at = Some(computed_at);
        record.error = None;
    }

    pub fn mark_error(&self, error: &Error) {
        let mut record = self.record.lock().expect("analytics state poisoned");
        record.phase = AnalyticsPhase::Error;
        record.error = Some(error.to_string());
    }

    /// Reset to `missing`, e.g. after the derived cache is cleared.
    pub fn mark_missing(&self) {
        let mut record = self.record.lock().expect("analytics state poisoned");
        record.phase = AnalyticsPhase::Missing;
        record.computed_at = None;
        record.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_lifecycle_starting_running_complete() {
        let registry = JobRegistry::new();
        let id = registry.create(JobKind::Crawl);

        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Starting);
        assert_eq!(record.kind, JobKind::Crawl);

        registry.publish_progress(&id, json!({"stage": "fetching"}));
        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Running);
        assert_eq!(record.progress["stage"], "fetching");

        registry.complete(&id, json!({"total_files": 3}));
        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Complete);
        assert_eq!(record.result.unwrap()["total_files"], 3);
    }

    #[test]
    fn job_failure_records_message() {
        let registry = JobRegistry::new();
        let id = registry.create(JobKind::Sync);
        registry.fail(&id, &Error::NoContinuationToken);
        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert!(record.error.unwrap().contains("continuation token"));
    }

    #[test]
    fn unknown_job_is_not_found() {
        let registry = JobRegistry::new();
        assert!(matches!(registry.get("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn scan_and_index_tables_are_distinct_but_share_lookup() {
        let registry = JobRegistry::new();
        let scan_id = registry.create(JobKind::Scan);
        let crawl_id = registry.create(JobKind::Crawl);
        assert_ne!(scan_id, crawl_id);
        assert_eq!(registry.get(&scan_id).unwrap().kind, JobKind::Scan);
        assert_eq!(registry.get(&crawl_id).unwrap().kind, JobKind::Crawl);
    }

    #[test]
    fn completed_shortcut_job() {
        let registry = JobRegistry::new();
        let id = registry.create_completed(JobKind::Scan, json!({"cached": true}));
        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Complete);
        assert_eq!(record.result.unwrap()["cached"], true);
    }

    #[test]
    fn analytics_singleton_transitions() {
        let state = AnalyticsState::new();
        assert_eq!(state.snapshot().phase, AnalyticsPhase::Missing);

        assert!(state.try_start());
        assert!(!state.try_start());
        assert_eq!(state.snapshot().phase, AnalyticsPhase::Running);

        state.mark_ready("2025-01-01T00:00:00+00:00".into());
        let record = state.snapshot();
        assert_eq!(record.phase, AnalyticsPhase::Ready);
        assert!(record.computed_at.is_some());

        assert!(state.try_start());
        state.mark_error(&Error::CacheMiss("full_scan".into()));
        assert_eq!(state.snapshot().phase, AnalyticsPhase::Error);

        state.mark_missing();
        assert_eq!(state.snapshot().phase, AnalyticsPhase::Missing);
    }
}
