//! Remote client adapter — the only seam to the cloud file store.
//!
//! The core depends on five endpoint semantics: paginated listing, the
//! change feed, start-token anchoring, per-file get, and the account
//! overview. Everything behind them (HTTP transport, OAuth, retries at the
//! wire level) lives outside this crate; implementations plug in through
//! [`RemoteClient`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::DriveConfig;
use crate::error::Result;
use crate::types::{DriveFile, DriveOverview};

// ---------------------------------------------------------------------------
// Field projections
// ---------------------------------------------------------------------------

/// Full metadata projection used by the crawl and by change-feed payloads.
/// Captures everything needed for duplicate detection (md5Checksum, size),
/// shortcut resolution, capabilities, and owner info.
pub const FULL_FIELDS: &str = "nextPageToken, files(\
id, name, mimeType, parents, trashed, createdTime, modifiedTime, \
size, md5Checksum, ownedByMe, \
owners(displayName, emailAddress, permissionId), \
capabilities(canTrash, canDelete, canMoveItemWithinDrive, \
canRemoveChildren, canAddChildren, canRename, canShare), \
shortcutDetails(targetId, targetMimeType), \
starred, webViewLink, iconLink)";

/// Projection for change-feed responses (FULL file payloads per change).
pub const CHANGES_FIELDS: &str = "nextPageToken, newStartPageToken, \
changes(fileId, removed, file(\
id, name, mimeType, parents, trashed, createdTime, modifiedTime, \
size, md5Checksum, ownedByMe, \
owners(displayName, emailAddress, permissionId), \
capabilities(canTrash, canDelete, canMoveItemWithinDrive, \
canRemoveChildren, canAddChildren, canRename, canShare), \
shortcutDetails(targetId, targetMimeType), \
starred, webViewLink, iconLink))";

/// Minimal projection for the cheap any-change-since probe.
pub const MINIMAL_FIELDS: &str = "nextPageToken, files(id, name, modifiedTime)";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One page of a file listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilePage {
    pub files: Vec<DriveFile>,
    pub next_page_token: Option<String>,
}

/// One entry from the change feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Change {
    pub file_id: String,
    pub removed: bool,
    pub file: Option<DriveFile>,
}

/// One page of the change feed. The final page carries
/// `new_start_page_token` instead of `next_page_token`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangePage {
    pub changes: Vec<Change>,
    pub next_page_token: Option<String>,
    pub new_start_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageQuota {
    #[serde(deserialize_with = "de_quota")]
    pub limit: Option<i64>,
    #[serde(deserialize_with = "de_quota")]
    pub usage: Option<i64>,
    #[serde(deserialize_with = "de_quota")]
    pub usage_in_drive: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountUser {
    pub display_name: Option<String>,
    pub email_address: Option<String>,
}

/// Response of the `About` endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct About {
    pub storage_quota: StorageQuota,
    pub user: AccountUser,
}

fn de_quota<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    // Quota fields arrive as decimal strings, same as file sizes.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
        None,
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Int(n) => Some(n),
        Raw::Str(s) => s.trim().parse::<i64>().ok(),
        Raw::None => None,
    })
}

// ---------------------------------------------------------------------------
// Client trait
// ---------------------------------------------------------------------------

/// Typed access to the remote file-store endpoints.
///
/// Implementations fail with `Error::Network`, `Error::Auth`,
/// `Error::Remote`, or `Error::TokenExpired` (when the change feed rejects a
/// stale continuation token). Callers never retry silently.
pub trait RemoteClient: Send + Sync {
    /// Paginated listing with a boolean query and field projection.
    fn list_files(
        &self,
        query: &str,
        fields: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<FilePage>;

    /// Fetch an opaque token anchoring future change-feed reads.
    fn get_start_page_token(&self) -> Result<String>;

    /// Read one page of the change feed from a continuation token.
    fn list_changes(&self, page_token: &str, fields: &str, page_size: u32) -> Result<ChangePage>;

    /// Account quota and user identity.
    fn about(&self) -> Result<About>;

    /// Fetch a single record by id. Rarely used.
    fn get_file(&self, id: &str, fields: &str) -> Result<DriveFile>;
}

// ---------------------------------------------------------------------------
// Pagination helpers
// ---------------------------------------------------------------------------

/// Enumerate every visible file with the FULL projection, following
/// continuation tokens until exhausted. The progress callback receives
/// `(files_so_far, pages_fetched)` after each page.
pub fn list_all_files(
    client: &dyn RemoteClient,
    config: &DriveConfig,
    include_trashed: bool,
    mut progress: impl FnMut(usize, usize),
) -> Result<Vec<DriveFile>> {
    let query = if include_trashed { "" } else { "trashed=false" };
    let mut all_files = Vec::new();
    let mut page_token: Option<String> = None;
    let mut page_count = 0usize;
    let start = std::time::Instant::now();

    loop {
        page_count += 1;
        let page = client
            .list_files(query, FULL_FIELDS, page_token.as_deref(), config.fetch_page_size)
            .inspect_err(|e| {
                error!(
                    page = page_count,
                    files_fetched = all_files.len(),
                    error = %e,
                    "Full enumeration failed"
                );
            })?;

        all_files.extend(page.files);
        progress(all_files.len(), page_count);

        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    info!(
        files = all_files.len(),
        pages = page_count,
        duration_ms = start.elapsed().as_millis() as u64,
        "Full enumeration complete"
    );
    Ok(all_files)
}

/// Drain the change feed from `start_token` forward. Follows
/// `next_page_token` until a page yields a `new_start_page_token`, which is
/// returned as the token to commit after the changes are applied. The
/// progress callback receives `(changes_so_far, pages_fetched)`.
pub fn collect_changes(
    client: &dyn RemoteClient,
    config: &DriveConfig,
    start_token: &str,
    mut progress: impl FnMut(usize, usize),
) -> Result<(Vec<Change>, String)> {
    let mut all_changes = Vec::new();
    let mut token = start_token.to_string();
    let mut page_count = 0usize;

    loop {
        page_count += 1;
        let page = client.list_changes(&token, CHANGES_FIELDS, config.fetch_page_size)?;
        all_changes.extend(page.changes);
        progress(all_changes.len(), page_count);

        if let Some(new_token) = page.new_start_page_token {
            info!(changes = all_changes.len(), pages = page_count, "Change feed drained");
            return Ok((all_changes, new_token));
        }
        match page.next_page_token {
            Some(next) => token = next,
            None => {
                // A well-formed feed always terminates with a new start
                // token; treat its absence as a malformed remote response.
                return Err(crate::error::Error::Remote(
                    "change feed ended without a new start page token".to_string(),
                ));
            }
        }
    }
}

/// Cheap probe: has any live file been modified since `since`? A single
/// one-item page with the MINIMAL projection is enough to answer.
pub fn check_recently_modified(
    client: &dyn RemoteClient,
    since: DateTime<Utc>,
) -> Result<bool> {
    let timestamp = since.format("%Y-%m-%dT%H:%M:%S").to_string();
    let query = format!("trashed=false and modifiedTime > '{timestamp}'");
    let page = client.list_files(&query, MINIMAL_FIELDS, None, 1)?;
    Ok(!page.files.is_empty())
}

/// Root-level folders only, for the quick scan. Sizes are not calculated
/// here; that happens during a full crawl.
pub fn get_top_level_folders(
    client: &dyn RemoteClient,
    config: &DriveConfig,
) -> Result<Vec<DriveFile>> {
    let query = format!(
        "trashed=false and mimeType='{}' and 'root' in parents",
        crate::types::FOLDER_MIME
    );
    let mut folders = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let page =
            client.list_files(&query, FULL_FIELDS, page_token.as_deref(), config.fetch_page_size)?;
        folders.extend(page.files);
        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }
    for folder in &mut folders {
        folder.calculated_size = Some(0);
    }
    Ok(folders)
}

/// Account overview in the shape the API surface exposes.
pub fn fetch_overview(client: &dyn RemoteClient) -> Result<DriveOverview> {
    let about = client.about()?;
    Ok(DriveOverview {
        total_quota: about.storage_quota.limit,
        used: about.storage_quota.usage,
        used_in_drive: about.storage_quota.usage_in_drive,
        user_email: about.user.email_address,
        user_display_name: about.user.display_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn change_page_parses_terminal_page() {
        let page: ChangePage = serde_json::from_value(json!({
            "changes": [
                {"fileId": "f1", "removed": true},
                {"fileId": "f2", "removed": false, "file": {"id": "f2", "name": "a"}}
            ],
            "newStartPageToken": "T9"
        }))
        .unwrap();
        assert_eq!(page.changes.len(), 2);
        assert!(page.changes[0].removed);
        assert_eq!(page.new_start_page_token.as_deref(), Some("T9"));
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn quota_strings_parse() {
        let about: About = serde_json::from_value(json!({
            "storageQuota": {"limit": "16106127360", "usage": "1024"},
            "user": {"displayName": "Test User", "emailAddress": "t@example.test"}
        }))
        .unwrap();
        assert_eq!(about.storage_quota.limit, Some(16_106_127_360));
        assert_eq!(about.storage_quota.usage, Some(1024));
        assert_eq!(about.user.email_address.as_deref(), Some("t@example.test"));
    }
}
