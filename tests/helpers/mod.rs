#![allow(dead_code)]

//! Test harness for crawl/sync/service integration tests.
//!
//! Provides a scripted in-memory [`RemoteClient`] fake plus a temp-dir
//! backed service. Change-feed batches are queued per test; each
//! `list_changes` drain consumes one batch and hands back its token.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use drivescope::cache::CacheStore;
use drivescope::config::DriveConfig;
use drivescope::error::{Error, Result};
use drivescope::jobs::JobStatus;
use drivescope::remote::{About, AccountUser, Change, ChangePage, FilePage, RemoteClient, StorageQuota};
use drivescope::service::DriveService;
use drivescope::store::IndexStore;
use drivescope::types::{DriveFile, ShortcutDetails, FOLDER_MIME};

// ---------------------------------------------------------------------------
// Fake remote
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    files: Vec<DriveFile>,
    /// Each entry is one full change-feed span and the token that commits it.
    change_batches: VecDeque<(Vec<Change>, String)>,
    start_token: String,
    /// What the any-change-since probe answers.
    recently_modified: bool,
    /// When set, `list_changes` rejects the stored token as expired.
    expire_token: bool,
    list_calls: usize,
    changes_calls: usize,
}

pub struct FakeRemote {
    state: Mutex<FakeState>,
}

impl FakeRemote {
    pub fn new(start_token: &str) -> Self {
        Self {
            state: Mutex::new(FakeState {
                start_token: start_token.to_string(),
                ..Default::default()
            }),
        }
    }

    pub fn set_files(&self, files: Vec<DriveFile>) {
        self.state.lock().unwrap().files = files;
    }

    pub fn set_start_token(&self, token: &str) {
        self.state.lock().unwrap().start_token = token.to_string();
    }

    pub fn push_changes(&self, changes: Vec<Change>, new_token: &str) {
        self.state.lock().unwrap().change_batches.push_back((changes, new_token.to_string()));
    }

    pub fn set_recently_modified(&self, modified: bool) {
        self.state.lock().unwrap().recently_modified = modified;
    }

    pub fn set_expire_token(&self, expire: bool) {
        self.state.lock().unwrap().expire_token = expire;
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn changes_calls(&self) -> usize {
        self.state.lock().unwrap().changes_calls
    }
}

impl RemoteClient for FakeRemote {
    fn list_files(
        &self,
        query: &str,
        _fields: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<FilePage> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;

        // The any-change-since probe filters on modifiedTime.
        if query.contains("modifiedTime >") {
            let files = if state.recently_modified {
                vec![DriveFile { id: "recently-modified".into(), ..Default::default() }]
            } else {
                vec![]
            };
            return Ok(FilePage { files, next_page_token: None });
        }

        let offset: usize = page_token.map(|t| t.parse().unwrap_or(0)).unwrap_or(0);
        let end = (offset + page_size as usize).min(state.files.len());
        let files = state.files[offset..end].to_vec();
        let next_page_token = if end < state.files.len() { Some(end.to_string()) } else { None };
        Ok(FilePage { files, next_page_token })
    }

    fn get_start_page_token(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().start_token.clone())
    }

    fn list_changes(&self, page_token: &str, _fields: &str, _page_size: u32) -> Result<ChangePage> {
        let mut state = self.state.lock().unwrap();
        state.changes_calls += 1;
        if state.expire_token {
            return Err(Error::TokenExpired);
        }
        match state.change_batches.pop_front() {
            Some((changes, new_token)) => Ok(ChangePage {
                changes,
                next_page_token: None,
                new_start_page_token: Some(new_token),
            }),
            None => Ok(ChangePage {
                changes: vec![],
                next_page_token: None,
                new_start_page_token: Some(page_token.to_string()),
            }),
        }
    }

    fn about(&self) -> Result<About> {
        Ok(About {
            storage_quota: StorageQuota {
                limit: Some(16_000_000_000),
                usage: Some(5_000_000_000),
                usage_in_drive: Some(4_000_000_000),
            },
            user: AccountUser {
                display_name: Some("Test User".into()),
                email_address: Some("test@example.test".into()),
            },
        })
    }

    fn get_file(&self, id: &str, _fields: &str) -> Result<DriveFile> {
        let state = self.state.lock().unwrap();
        state
            .files
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("file {id}")))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct TestHarness {
    pub remote: Arc<FakeRemote>,
    pub service: DriveService,
    pub index: IndexStore,
    pub cache: CacheStore,
    pub config: DriveConfig,
    _temp_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let config = DriveConfig {
            data_dir: temp_dir.path().join("data"),
            cache_dir: temp_dir.path().join("cache"),
            ..Default::default()
        };
        let remote = Arc::new(FakeRemote::new("T0"));
        let service = DriveService::new(remote.clone(), config.clone());
        let index = IndexStore::new(config.db_path());
        let cache = CacheStore::new(config.cache_dir.clone());
        Self { remote, service, index, cache, config, _temp_dir: temp_dir }
    }

    /// Poll a job until it leaves the running states, failing the test on
    /// timeout.
    pub fn wait_for_job(&self, job_id: &str) -> drivescope::jobs::JobRecord {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let record = self.service.job_status(job_id).expect("job exists");
            match record.status {
                JobStatus::Complete | JobStatus::Error => return record,
                _ if Instant::now() > deadline => panic!("job {job_id} timed out"),
                _ => std::thread::sleep(Duration::from_millis(10)),
            }
        }
    }

    /// Wait until the analytics singleton settles into ready or error.
    pub fn wait_for_analytics(&self) -> drivescope::service::AnalyticsStatus {
        use drivescope::jobs::AnalyticsPhase;
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let status = self.service.analytics_status();
            match status.record.phase {
                AnalyticsPhase::Ready | AnalyticsPhase::Error => return status,
                _ if Instant::now() > deadline => panic!("analytics timed out"),
                _ => std::thread::sleep(Duration::from_millis(10)),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Record builders
// ---------------------------------------------------------------------------

pub fn folder(id: &str, name: &str, parents: &[&str]) -> DriveFile {
    DriveFile {
        id: id.into(),
        name: Some(name.into()),
        mime_type: Some(FOLDER_MIME.into()),
        parents: parents.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

pub fn file(id: &str, name: &str, size: i64, parents: &[&str]) -> DriveFile {
    DriveFile {
        id: id.into(),
        name: Some(name.into()),
        mime_type: Some("text/plain".into()),
        size: Some(size),
        parents: parents.iter().map(|s| s.to_string()).collect(),
        created_time: Some("2025-01-01T00:00:00.000Z".into()),
        modified_time: Some("2025-01-02T00:00:00.000Z".into()),
        ..Default::default()
    }
}

pub fn file_with_md5(id: &str, name: &str, size: i64, md5: &str) -> DriveFile {
    let mut f = file(id, name, size, &[]);
    f.md5_checksum = Some(md5.into());
    f
}

pub fn shortcut(id: &str, name: &str, target_id: &str) -> DriveFile {
    DriveFile {
        id: id.into(),
        name: Some(name.into()),
        mime_type: Some(drivescope::types::SHORTCUT_MIME.into()),
        shortcut_details: Some(ShortcutDetails {
            target_id: Some(target_id.into()),
            target_mime_type: Some("text/plain".into()),
        }),
        ..Default::default()
    }
}

pub fn removal(file_id: &str) -> Change {
    Change { file_id: file_id.into(), removed: true, file: None }
}

pub fn upsert(file: DriveFile) -> Change {
    Change { file_id: file.id.clone(), removed: false, file: Some(file) }
}
