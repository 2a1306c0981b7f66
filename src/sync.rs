//! Incremental sync via the remote change feed.
//!
//! Consumes the feed from the stored continuation token forward, applying
//! each change idempotently by id: removals tombstone the row and drop its
//! edges, everything else upserts and rebuilds the edge set. The new token
//! is written only after every change is durably applied — a crash mid-sync
//! leaves the old token in place, and re-consuming the same span is safe.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::DriveConfig;
use crate::crawl::{self, CrawlProgress};
use crate::error::{Error, Result};
use crate::remote::{self, RemoteClient};
use crate::store::{self, IndexStore};
use crate::types::{now_iso, Stage};

/// Progress for a running or finished sync. Published at every stage
/// transition and at batch-commit boundaries.
#[derive(Debug, Clone, Serialize)]
pub struct SyncProgress {
    pub stage: Stage,
    pub changes_fetched: usize,
    pub changes_processed: usize,
    pub total_changes: usize,
    pub files_added: usize,
    pub files_updated: usize,
    pub files_removed: usize,
    pub pages_fetched: usize,
    pub errors: usize,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub message: String,
    pub progress_pct: f64,
}

impl SyncProgress {
    fn new() -> Self {
        Self {
            stage: Stage::Initializing,
            changes_fetched: 0,
            changes_processed: 0,
            total_changes: 0,
            files_added: 0,
            files_updated: 0,
            files_removed: 0,
            pages_fetched: 0,
            errors: 0,
            started_at: None,
            completed_at: None,
            message: String::new(),
            progress_pct: 0.0,
        }
    }

    fn compute_pct(&self) -> f64 {
        match self.stage {
            Stage::Complete => 100.0,
            // No estimate until the feed is drained.
            Stage::Fetching => 30.0,
            Stage::Processing => {
                if self.total_changes == 0 {
                    50.0
                } else {
                    30.0 + (self.changes_processed as f64 / self.total_changes as f64) * 60.0
                }
            }
            Stage::Finalizing => 90.0,
            _ => 0.0,
        }
    }

    fn touch(&mut self) {
        self.progress_pct = self.compute_pct();
    }
}

/// Apply all changes since the last sync/crawl to the index.
///
/// Fails with [`Error::NoContinuationToken`] if no token is stored (a full
/// crawl is required first) and propagates [`Error::TokenExpired`] from the
/// remote adapter untouched.
pub fn run_sync(
    client: &dyn RemoteClient,
    index: &IndexStore,
    config: &DriveConfig,
    progress_callback: &mut dyn FnMut(&SyncProgress),
) -> Result<SyncProgress> {
    let mut progress = SyncProgress::new();
    progress.started_at = Some(now_iso());
    let start = std::time::Instant::now();

    let result = sync_inner(client, index, config, &mut progress, progress_callback);

    match result {
        Ok(()) => {
            info!(
                duration_ms = start.elapsed().as_millis() as u64,
                changes = progress.total_changes,
                added = progress.files_added,
                updated = progress.files_updated,
                removed = progress.files_removed,
                errors = progress.errors,
                "Sync complete"
            );
            Ok(progress)
        }
        Err(e) => {
            progress.stage = Stage::Error;
            progress.message = format!("Error: {e}");
            progress.completed_at = Some(now_iso());
            progress.touch();
            progress_callback(&progress);
            error!(
                duration_ms = start.elapsed().as_millis() as u64,
                changes_processed = progress.changes_processed,
                error = %e,
                "Sync failed"
            );
            Err(e)
        }
    }
}

fn sync_inner(
    client: &dyn RemoteClient,
    index: &IndexStore,
    config: &DriveConfig,
    progress: &mut SyncProgress,
    publish: &mut dyn FnMut(&SyncProgress),
) -> Result<()> {
    // Stage 1: load the continuation token.
    progress.stage = Stage::Initializing;
    progress.message = "Loading sync token...".to_string();
    progress.touch();
    publish(progress);

    let conn = index.connect()?;
    let start_token =
        store::get_sync_state(&conn, "start_page_token")?.ok_or(Error::NoContinuationToken)?;
    drop(conn);

    let token_prefix: String = start_token.chars().take(10).collect();
    info!(token_prefix = token_prefix.as_str(), "Sync starting");

    // Stage 2: drain the change feed.
    progress.stage = Stage::Fetching;
    progress.message = "Fetching changes from remote store...".to_string();
    progress.touch();
    publish(progress);

    let (all_changes, new_token) =
        remote::collect_changes(client, config, &start_token, |changes, pages| {
            progress.changes_fetched = changes;
            progress.pages_fetched = pages;
            progress.message = format!("Fetched {changes} changes...");
            progress.touch();
            publish(progress);
        })?;
    progress.total_changes = all_changes.len();

    // Stage 3: apply changes in feed order, committing in batches.
    progress.stage = Stage::Processing;
    progress.message = "Processing changes...".to_string();
    progress.touch();
    publish(progress);

    let mut conn = index.connect()?;
    for batch in all_changes.chunks(config.commit_batch_sync.max(1)) {
        let tx = conn.transaction()?;
        for change in batch {
            let applied = apply_change(&tx, change, progress);
            if let Err(e) = applied {
                progress.errors += 1;
                let _ = store::log_file_error(&tx, Some(&change.file_id), "sync", &e.to_string());
                error!(file_id = change.file_id.as_str(), error = %e, "Skipping change");
            }
            progress.changes_processed += 1;
        }
        tx.commit()?;
        progress.message =
            format!("Processed {}/{} changes...", progress.changes_processed, progress.total_changes);
        progress.touch();
        publish(progress);
    }

    // Stage 4: commit the new token, only now that all changes are durable.
    progress.stage = Stage::Finalizing;
    progress.message = "Saving sync state...".to_string();
    progress.touch();
    publish(progress);

    let tx = conn.transaction()?;
    store::set_sync_state(&tx, "start_page_token", &new_token)?;
    store::set_sync_state(&tx, "last_sync_time", &now_iso())?;
    tx.commit()?;

    // Stage 5: done.
    progress.stage = Stage::Complete;
    progress.completed_at = Some(now_iso());
    progress.message = if progress.total_changes == 0 {
        "No changes detected".to_string()
    } else {
        format!(
            "Sync complete: {} added, {} updated, {} removed",
            progress.files_added, progress.files_updated, progress.files_removed
        )
    };
    progress.touch();
    publish(progress);
    Ok(())
}

fn apply_change(
    conn: &rusqlite::Connection,
    change: &remote::Change,
    progress: &mut SyncProgress,
) -> Result<()> {
    if change.removed {
        if !change.file_id.is_empty() {
            store::mark_removed(conn, &change.file_id)?;
            progress.files_removed += 1;
        }
        return Ok(());
    }
    let Some(file) = &change.file else { return Ok(()) };

    let existing = store::file_exists(conn, &file.id)?;
    store::upsert_file(conn, file)?;
    store::replace_parents(conn, &file.id, &file.parents)?;
    if existing {
        progress.files_updated += 1;
    } else {
        progress.files_added += 1;
    }
    Ok(())
}

/// True if a continuation token is stored, i.e. incremental sync is possible.
pub fn can_sync(index: &IndexStore) -> bool {
    !crawl::needs_full_crawl(index)
}

/// Summary of the last sync, or None if the store is uninitialized.
#[derive(Debug, Clone, Serialize)]
pub struct LastSyncInfo {
    pub last_sync_time: Option<String>,
    pub last_full_crawl_time: Option<String>,
    pub has_token: bool,
}

pub fn last_sync_info(index: &IndexStore) -> Option<LastSyncInfo> {
    if !index.exists() {
        return None;
    }
    let conn = index.connect().ok()?;
    Some(LastSyncInfo {
        last_sync_time: store::get_sync_state(&conn, "last_sync_time").ok()?,
        last_full_crawl_time: store::get_sync_state(&conn, "last_full_crawl_time").ok()?,
        has_token: store::get_sync_state(&conn, "start_page_token").ok()?.is_some(),
    })
}

// ---------------------------------------------------------------------------
// Smart sync (scheduler policy)
// ---------------------------------------------------------------------------

/// Progress event spanning both writer kinds, for callers driving either.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WriterProgress {
    FullCrawl(CrawlProgress),
    IncrementalSync(SyncProgress),
}

/// Outcome of a smart sync, tagged with which engine ran.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SmartSyncResult {
    FullCrawl { progress: CrawlProgress },
    IncrementalSync { progress: SyncProgress },
}

/// Choose between the crawl and sync engines: a full crawl when forced or
/// when no continuation token exists, incremental sync otherwise. An
/// expired token falls back to a full crawl — the index itself is intact,
/// only the feed anchor was lost.
pub fn smart_sync(
    client: &dyn RemoteClient,
    index: &IndexStore,
    config: &DriveConfig,
    force_full_crawl: bool,
    progress_callback: &mut dyn FnMut(&WriterProgress),
) -> Result<SmartSyncResult> {
    if force_full_crawl || crawl::needs_full_crawl(index) {
        info!("Smart sync: running full crawl");
        let progress = crawl::run_full_crawl(client, index, config, false, &mut |p| {
            progress_callback(&WriterProgress::FullCrawl(p.clone()))
        })?;
        return Ok(SmartSyncResult::FullCrawl { progress });
    }

    info!("Smart sync: running incremental sync");
    let sync_result = run_sync(client, index, config, &mut |p| {
        progress_callback(&WriterProgress::IncrementalSync(p.clone()))
    });

    match sync_result {
        Ok(progress) => Ok(SmartSyncResult::IncrementalSync { progress }),
        Err(Error::TokenExpired) => {
            warn!("Continuation token expired; falling back to full crawl");
            let progress = crawl::run_full_crawl(client, index, config, false, &mut |p| {
                progress_callback(&WriterProgress::FullCrawl(p.clone()))
            })?;
            Ok(SmartSyncResult::FullCrawl { progress })
        }
        Err(e) => Err(e),
    }
}
