//! Full crawl: build the index from scratch.
//!
//! Enumerates every visible file with the FULL projection, upserts records
//! and rebuilds their edges in commit batches, then anchors the change feed
//! by storing a fresh start page token. The token write is the last store
//! mutation — it is the linearization point for "this crawl is durably
//! applied". Re-running converges to the same terminal state.

use serde::Serialize;
use tracing::{error, info};

use crate::config::DriveConfig;
use crate::error::Result;
use crate::remote::{self, RemoteClient};
use crate::store::{self, IndexStore};
use crate::types::{now_iso, Stage};

/// Progress for a running or finished crawl. Published at every stage
/// transition and at batch-commit boundaries.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlProgress {
    pub stage: Stage,
    pub files_fetched: usize,
    pub files_processed: usize,
    pub total_files: usize,
    pub pages_fetched: usize,
    pub errors: usize,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub message: String,
    pub progress_pct: f64,
}

impl CrawlProgress {
    fn new() -> Self {
        Self {
            stage: Stage::Initializing,
            files_fetched: 0,
            files_processed: 0,
            total_files: 0,
            pages_fetched: 0,
            errors: 0,
            started_at: None,
            completed_at: None,
            message: String::new(),
            progress_pct: 0.0,
        }
    }

    /// Stage-weighted completion estimate in [0, 100]. Fetching is capped at
    /// 40% (sized against a typical ~5000-file drive), processing runs to
    /// 90%, finalizing holds at 90%.
    fn compute_pct(&self) -> f64 {
        match self.stage {
            Stage::Complete => 100.0,
            Stage::Fetching => ((self.files_fetched as f64 / 5000.0) * 40.0).min(40.0),
            Stage::Processing => {
                if self.total_files == 0 {
                    50.0
                } else {
                    40.0 + (self.files_processed as f64 / self.total_files as f64) * 50.0
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

/// Run a full crawl of the remote store into the index.
///
/// Single-record store failures are logged to `file_errors`, counted, and
/// skipped; they never fail the crawl. Remote failures abort with the error
/// category intact and leave any previously stored token untouched.
pub fn run_full_crawl(
    client: &dyn RemoteClient,
    index: &IndexStore,
    config: &DriveConfig,
    include_trashed: bool,
    progress_callback: &mut dyn FnMut(&CrawlProgress),
) -> Result<CrawlProgress> {
    let mut progress = CrawlProgress::new();
    progress.started_at = Some(now_iso());
    let start = std::time::Instant::now();

    let result = crawl_inner(client, index, config, include_trashed, &mut progress, progress_callback);

    match result {
        Ok(()) => {
            info!(
                duration_ms = start.elapsed().as_millis() as u64,
                files = progress.total_files,
                errors = progress.errors,
                "Full crawl complete"
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
                files_processed = progress.files_processed,
                error = %e,
                "Full crawl failed"
            );
            Err(e)
        }
    }
}

fn crawl_inner(
    client: &dyn RemoteClient,
    index: &IndexStore,
    config: &DriveConfig,
    include_trashed: bool,
    progress: &mut CrawlProgress,
    publish: &mut dyn FnMut(&CrawlProgress),
) -> Result<()> {
    // Stage 1: initialize the store.
    progress.stage = Stage::Initializing;
    progress.message = "Initializing index...".to_string();
    progress.touch();
    publish(progress);
    index.init()?;

    // Stage 2: enumerate everything.
    progress.stage = Stage::Fetching;
    progress.message = "Fetching files from remote store...".to_string();
    progress.touch();
    publish(progress);

    let all_files = remote::list_all_files(client, config, include_trashed, |files, pages| {
        progress.files_fetched = files;
        progress.pages_fetched = pages;
        progress.message = format!("Fetched {files} files ({pages} pages)...");
        progress.touch();
        publish(progress);
    })?;
    progress.total_files = all_files.len();

    // Stage 3: upsert records and rebuild edges in commit batches.
    progress.stage = Stage::Processing;
    progress.message = "Processing files into index...".to_string();
    progress.touch();
    publish(progress);

    let mut conn = index.connect()?;
    for batch in all_files.chunks(config.commit_batch_crawl.max(1)) {
        let tx = conn.transaction()?;
        for file in batch {
            let applied = store::upsert_file(&tx, file)
                .and_then(|_| store::replace_parents(&tx, &file.id, &file.parents));
            if let Err(e) = applied {
                progress.errors += 1;
                let _ = store::log_file_error(&tx, Some(&file.id), "crawl", &e.to_string());
                error!(file_id = file.id.as_str(), error = %e, "Skipping record");
            }
            progress.files_processed += 1;
        }
        tx.commit()?;
        progress.message =
            format!("Processed {}/{} files...", progress.files_processed, progress.total_files);
        progress.touch();
        publish(progress);
    }

    // Stage 4: anchor the change feed. Fetched after enumeration so the feed
    // covers anything written while the crawl ran.
    progress.stage = Stage::Finalizing;
    progress.message = "Storing sync token...".to_string();
    progress.touch();
    publish(progress);

    let start_token = client.get_start_page_token()?;
    let now = now_iso();
    let tx = conn.transaction()?;
    store::set_sync_state(&tx, "start_page_token", &start_token)?;
    store::set_sync_state(&tx, "last_full_crawl_time", &now)?;
    store::set_sync_state(&tx, "last_sync_time", &now)?;
    store::set_sync_state(&tx, "file_count", &progress.total_files.to_string())?;
    tx.commit()?;

    // Stage 5: done.
    progress.stage = Stage::Complete;
    progress.completed_at = Some(now_iso());
    progress.message = format!("Crawl complete: {} files indexed", progress.total_files);
    progress.touch();
    publish(progress);
    Ok(())
}

/// True when the index is uninitialized or no continuation token is stored —
/// i.e. incremental sync is impossible and a full crawl is required.
pub fn needs_full_crawl(index: &IndexStore) -> bool {
    if !index.exists() {
        return true;
    }
    match index.connect().and_then(|conn| store::get_sync_state(&conn, "start_page_token")) {
        Ok(token) => token.is_none(),
        Err(_) => true,
    }
}

/// Summary of the last completed crawl, or None if never crawled.
#[derive(Debug, Clone, Serialize)]
pub struct LastCrawlInfo {
    pub last_full_crawl_time: String,
    pub last_sync_time: Option<String>,
    pub file_count: i64,
}

pub fn last_crawl_info(index: &IndexStore) -> Option<LastCrawlInfo> {
    if !index.exists() {
        return None;
    }
    let conn = index.connect().ok()?;
    let last_crawl = store::get_sync_state(&conn, "last_full_crawl_time").ok()??;
    let last_sync = store::get_sync_state(&conn, "last_sync_time").ok()?;
    let file_count = store::file_count(&conn, false).ok()?;
    Some(LastCrawlInfo { last_full_crawl_time: last_crawl, last_sync_time: last_sync, file_count })
}
