//! Service-level integration tests: the exposed operations, background job
//! lifecycle, cache gating, and the analytics pipeline.

mod helpers;

use helpers::{file, file_with_md5, folder, upsert, TestHarness};

use drivescope::error::Error;
use drivescope::jobs::{AnalyticsPhase, JobStatus};
use drivescope::service::ViewQuery;

// ---------------------------------------------------------------------------
// Overview
// ---------------------------------------------------------------------------

#[test]
fn overview_maps_quota_and_user() {
    let h = TestHarness::new();
    let overview = h.service.overview().unwrap();
    assert_eq!(overview.total_quota, Some(16_000_000_000));
    assert_eq!(overview.used, Some(5_000_000_000));
    assert_eq!(overview.user_email.as_deref(), Some("test@example.test"));
}

#[test]
fn quick_scan_caches_under_quick_ttl() {
    let h = TestHarness::new();
    h.remote.set_files(vec![folder("P1", "Docs", &[])]);

    let (scan, metadata) = h.service.quick_scan().unwrap();
    assert_eq!(scan.overview.user_email.as_deref(), Some("test@example.test"));
    assert_eq!(scan.top_folders.len(), 1);
    assert_eq!(scan.top_folders[0].calculated_size, Some(0));
    assert_eq!(metadata.file_count, Some(1));

    // A fresh quick cache answers the second call without remote listing.
    let calls = h.remote.list_calls();
    let (scan, _) = h.service.quick_scan().unwrap();
    assert_eq!(scan.top_folders.len(), 1);
    assert_eq!(h.remote.list_calls(), calls);
}

// ---------------------------------------------------------------------------
// Crawl job lifecycle
// ---------------------------------------------------------------------------

#[test]
fn crawl_job_completes_and_populates_caches() {
    let h = TestHarness::new();
    h.remote.set_files(vec![
        folder("P1", "Docs", &[]),
        file("F1", "a.txt", 100, &["P1"]),
        file("F2", "b.txt", 50, &["P1"]),
    ]);

    let job_id = h.service.start_crawl(false);
    let record = h.wait_for_job(&job_id);
    assert_eq!(record.status, JobStatus::Complete);
    let result = record.result.unwrap();
    assert_eq!(result["type"], "full_crawl");
    assert_eq!(result["stats"]["total_files"], 3);
    assert_eq!(result["stats"]["total_size"], 150);

    // The primary snapshot cache is now readable and valid.
    let (snapshot, metadata) = h.service.cached_snapshot().unwrap();
    assert_eq!(snapshot.files.len(), 3);
    assert_eq!(metadata.file_count, Some(3));

    // The live store view agrees.
    let live = h.service.index_snapshot().unwrap();
    assert_eq!(live.stats.total_files, 3);
    assert_eq!(live.children_map.get("P1").map(|v| v.len()), Some(2));
}

#[test]
fn second_crawl_short_circuits_to_cached_snapshot() {
    let h = TestHarness::new();
    h.remote.set_files(vec![file("F1", "a.txt", 1, &[])]);

    let first = h.service.start_crawl(false);
    h.wait_for_job(&first);

    let calls_after_first = h.remote.list_calls();
    let second = h.service.start_crawl(false);
    let record = h.wait_for_job(&second);
    assert_eq!(record.status, JobStatus::Complete);
    assert_eq!(record.result.unwrap()["type"], "cached");
    // Fresh cache passes the time check without another enumeration.
    assert_eq!(h.remote.list_calls(), calls_after_first);

    // Forcing re-runs the crawl.
    let third = h.service.start_crawl(true);
    let record = h.wait_for_job(&third);
    assert_eq!(record.result.unwrap()["type"], "full_crawl");
    assert!(h.remote.list_calls() > calls_after_first);
}

#[test]
fn job_status_for_unknown_id_is_not_found() {
    let h = TestHarness::new();
    assert!(matches!(h.service.job_status("missing"), Err(Error::NotFound(_))));
}

// ---------------------------------------------------------------------------
// Sync job lifecycle
// ---------------------------------------------------------------------------

#[test]
fn sync_requires_continuation_token() {
    let h = TestHarness::new();
    assert!(matches!(h.service.start_sync(), Err(Error::NoContinuationToken)));
}

#[test]
fn sync_job_applies_changes_and_refreshes_snapshot() {
    let h = TestHarness::new();
    h.remote.set_files(vec![file("F1", "a.txt", 100, &[])]);
    let crawl_id = h.service.start_crawl(false);
    h.wait_for_job(&crawl_id);
    let (_, before) = h.service.cached_snapshot().unwrap();

    h.remote.push_changes(vec![upsert(file("F2", "new.txt", 25, &[]))], "T1");
    let sync_id = h.service.start_sync().unwrap();
    let record = h.wait_for_job(&sync_id);
    assert_eq!(record.status, JobStatus::Complete);
    let result = record.result.unwrap();
    assert_eq!(result["files_added"], 1);
    assert_eq!(result["stats"]["total_files"], 2);

    // The primary cache was rewritten with a new identity.
    let (snapshot, after) = h.service.cached_snapshot().unwrap();
    assert_eq!(snapshot.files.len(), 2);
    assert_ne!(before.timestamp, after.timestamp);
    assert_eq!(after.file_count, Some(2));
}

#[test]
fn zero_change_sync_leaves_snapshot_cache_alone() {
    let h = TestHarness::new();
    h.remote.set_files(vec![file("F1", "a.txt", 100, &[])]);
    let crawl_id = h.service.start_crawl(false);
    h.wait_for_job(&crawl_id);
    let (_, before) = h.service.cached_snapshot().unwrap();

    h.remote.push_changes(vec![], "T1");
    let sync_id = h.service.start_sync().unwrap();
    let record = h.wait_for_job(&sync_id);
    assert_eq!(record.status, JobStatus::Complete);
    assert_eq!(record.result.unwrap()["files_added"], 0);

    let (_, after) = h.service.cached_snapshot().unwrap();
    assert_eq!(before.timestamp, after.timestamp);
}

#[test]
fn smart_sync_registers_the_chosen_kind() {
    let h = TestHarness::new();
    h.remote.set_files(vec![file("F1", "a.txt", 1, &[])]);

    // Nothing indexed yet: smart sync must crawl.
    let job_id = h.service.start_smart_sync(false);
    let record = h.wait_for_job(&job_id);
    assert_eq!(record.status, JobStatus::Complete);
    assert_eq!(record.result.unwrap()["type"], "full_crawl");

    // Token present: smart sync goes incremental.
    h.remote.push_changes(vec![], "T1");
    let job_id = h.service.start_smart_sync(false);
    let record = h.wait_for_job(&job_id);
    assert_eq!(record.result.unwrap()["type"], "incremental_sync");
}

// ---------------------------------------------------------------------------
// Duplicates and health through the facade
// ---------------------------------------------------------------------------

#[test]
fn duplicates_come_from_the_store() {
    let h = TestHarness::new();
    h.remote.set_files(vec![
        file_with_md5("F1", "x.bin", 5000, "abc"),
        file_with_md5("F2", "y.bin", 5000, "abc"),
    ]);
    let job_id = h.service.start_crawl(false);
    h.wait_for_job(&job_id);

    let groups = h.service.duplicates(Some(10), None).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].count, 2);
    assert_eq!(groups[0].total_wasted, 5000);

    // min_size above the file size filters the group out.
    assert!(h.service.duplicates(None, Some(10_000)).unwrap().is_empty());
}

#[test]
fn health_runs_through_the_facade() {
    let h = TestHarness::new();
    h.remote.set_files(vec![folder("P1", "Docs", &[]), file("F1", "a.txt", 1, &["P1"])]);
    let job_id = h.service.start_crawl(false);
    h.wait_for_job(&job_id);

    let report = h.service.health();
    assert!(report.passed);
    assert_eq!(report.stats.active_files, 2);
}

// ---------------------------------------------------------------------------
// Analytics pipeline
// ---------------------------------------------------------------------------

#[test]
fn crawl_triggers_analytics_and_views_serve() {
    let h = TestHarness::new();
    h.remote.set_files(vec![
        folder("P1", "Photos", &[]),
        file("F1", "dup.txt", 100, &["P1"]),
        file("F2", "dup.txt", 100, &["P1"]),
    ]);
    let job_id = h.service.start_crawl(false);
    h.wait_for_job(&job_id);

    let status = h.wait_for_analytics();
    assert_eq!(status.record.phase, AnalyticsPhase::Ready);
    let metadata = status.metadata.unwrap();
    assert_eq!(metadata.derived_version, 2);
    assert_eq!(metadata.source_file_count, Some(3));
    assert!(metadata.timings_ms.contains_key("analytics.total"));

    // Identity pin: the derived sidecar matches the primary sidecar.
    let (_, primary) = h.service.cached_snapshot().unwrap();
    assert_eq!(metadata.source_cache_timestamp, primary.timestamp);

    let view = h.service.analytics_view("duplicates", &ViewQuery::default()).unwrap();
    assert_eq!(view.view, "duplicates");
    assert!(view.etag.starts_with("W/\""));
    assert_eq!(view.last_modified, metadata.computed_at);
    assert_eq!(view.data["total_groups"], 1);
    assert_eq!(view.data["groups"][0]["count"], 2);
    assert_eq!(view.data["groups"][0]["potential_savings"], 100);

    let view = h.service.analytics_view("semantic", &ViewQuery::default()).unwrap();
    assert_eq!(view.data["folder_category"]["P1"]["category"], "Photos");

    let view = h.service.analytics_view("types", &ViewQuery::default()).unwrap();
    assert_eq!(view.data["groups"]["Folders"]["count"], 1);
}

#[test]
fn analytics_view_paginates_and_rejects_unknown_names() {
    let h = TestHarness::new();
    let mut files = vec![];
    for i in 0..5 {
        files.push(file(&format!("A{i}"), "same.txt", 10, &[]));
    }
    for i in 0..4 {
        files.push(file(&format!("B{i}"), "other.txt", 99, &[]));
    }
    h.remote.set_files(files);
    let job_id = h.service.start_crawl(false);
    h.wait_for_job(&job_id);
    h.wait_for_analytics();

    let query = ViewQuery { limit: Some(1), offset: 1, ..Default::default() };
    let view = h.service.analytics_view("duplicates", &query).unwrap();
    assert_eq!(view.data["total_groups"], 2);
    assert_eq!(view.data["groups"].as_array().unwrap().len(), 1);

    let err = h.service.analytics_view("nonsense", &ViewQuery::default()).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    // large view can select the folder list.
    let query = ViewQuery { file_type: Some("folders".into()), ..Default::default() };
    let view = h.service.analytics_view("large", &query).unwrap();
    assert_eq!(view.data["total"], 0);
}

#[test]
fn missing_derived_cache_yields_not_ready_and_starts_compute() {
    let h = TestHarness::new();
    h.remote.set_files(vec![file("F1", "a.txt", 1, &[])]);
    let job_id = h.service.start_crawl(false);
    h.wait_for_job(&job_id);
    h.wait_for_analytics();

    h.service.clear_cache(Some("full_scan_analytics")).unwrap();
    assert_eq!(h.service.analytics_status().record.phase, AnalyticsPhase::Missing);

    let err = h.service.analytics_view("timeline", &ViewQuery::default()).unwrap_err();
    assert!(matches!(err, Error::NotReady(_)));

    // The rejected read kicked off a recompute; it settles back to ready.
    let status = h.wait_for_analytics();
    assert_eq!(status.record.phase, AnalyticsPhase::Ready);
    assert!(h.service.analytics_view("timeline", &ViewQuery::default()).is_ok());
}

#[test]
fn second_start_analytics_is_a_noop_while_running() {
    let h = TestHarness::new();
    h.remote.set_files(vec![file("F1", "a.txt", 1, &[])]);
    let job_id = h.service.start_crawl(false);
    h.wait_for_job(&job_id);
    h.wait_for_analytics();

    // A second start while one may still be running is absorbed; the state
    // settles back to ready either way.
    h.service.start_analytics();
    h.service.start_analytics();
    let status = h.wait_for_analytics();
    assert_eq!(status.record.phase, AnalyticsPhase::Ready);
    assert!(status.metadata.is_some());
}

// ---------------------------------------------------------------------------
// Cache and index maintenance
// ---------------------------------------------------------------------------

#[test]
fn clear_cache_validates_names() {
    let h = TestHarness::new();
    assert!(matches!(h.service.clear_cache(Some("bogus")), Err(Error::Validation(_))));
    h.service.clear_cache(Some("full_scan")).unwrap();
    h.service.clear_cache(None).unwrap();
}

#[test]
fn stale_snapshot_survives_only_while_remote_is_quiet() {
    use drivescope::cache::{CacheKind, CacheMetadata};
    use drivescope::types::Snapshot;

    let h = TestHarness::new();
    h.remote.set_files(vec![file("F1", "a.txt", 1, &[])]);
    let job_id = h.service.start_crawl(false);
    h.wait_for_job(&job_id);

    // Age the sidecar far past the 30-day TTL.
    let (snapshot, mut metadata) =
        h.cache.load::<Snapshot, CacheMetadata>(CacheKind::FullScan).unwrap();
    metadata.timestamp =
        (chrono::Utc::now() - chrono::Duration::days(90)).to_rfc3339();
    h.cache.save(CacheKind::FullScan, &snapshot, &metadata).unwrap();

    // Past TTL but the remote reports nothing modified: still valid.
    h.remote.set_recently_modified(false);
    assert!(h.service.cached_snapshot().is_ok());

    // Past TTL and the remote did change: expired.
    h.remote.set_recently_modified(true);
    assert!(matches!(h.service.cached_snapshot(), Err(Error::CacheExpired(_))));
}

#[test]
fn cached_snapshot_missing_is_not_found() {
    let h = TestHarness::new();
    assert!(matches!(h.service.cached_snapshot(), Err(Error::NotFound(_))));
    assert!(matches!(h.service.index_snapshot(), Err(Error::NotFound(_))));
}

#[test]
fn clear_index_truncates_but_keeps_schema() {
    let h = TestHarness::new();
    h.remote.set_files(vec![file("F1", "a.txt", 1, &[])]);
    let job_id = h.service.start_crawl(false);
    h.wait_for_job(&job_id);

    h.service.clear_index().unwrap();

    let conn = h.index.connect().unwrap();
    assert_eq!(drivescope::store::file_count(&conn, true).unwrap(), 0);
    assert_eq!(
        drivescope::store::get_sync_state(&conn, "schema_version").unwrap().as_deref(),
        Some("1")
    );
    // An index with no rows reads as empty.
    assert!(matches!(h.service.index_snapshot(), Err(Error::NotFound(_))));
}
