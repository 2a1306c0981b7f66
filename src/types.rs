//! Shared core types: wire records, snapshots, stats, and progress stages.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// MIME sentinels
// ---------------------------------------------------------------------------

/// MIME type identifying a folder.
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// MIME type identifying a shortcut (a pointer to another file).
pub const SHORTCUT_MIME: &str = "application/vnd.google-apps.shortcut";

/// Prefix shared by all Google-native document types.
pub const GOOGLE_APPS_PREFIX: &str = "application/vnd.google-apps.";

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

/// Shortcut target details as delivered by the remote API.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ShortcutDetails {
    pub target_id: Option<String>,
    pub target_mime_type: Option<String>,
}

/// A file record as delivered by the remote API (FULL projection).
///
/// Unknown fields are retained in `extra` so serializing a record reproduces
/// the original payload verbatim — the store persists that round-trip as the
/// raw JSON column for forward compatibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriveFile {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trashed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,
    /// The remote API serializes sizes as decimal strings; accept both.
    #[serde(deserialize_with = "de_opt_i64", skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5_checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owned_by_me: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owners: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortcut_details: Option<ShortcutDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starred: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_link: Option<String>,
    /// Recursive folder size, computed locally while building a snapshot.
    /// Never sent by the remote.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculated_size: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME)
    }

    pub fn is_shortcut(&self) -> bool {
        self.mime_type.as_deref() == Some(SHORTCUT_MIME)
    }

    /// Effective size for accounting: calculated size for folders when
    /// available, direct size otherwise.
    pub fn effective_size(&self) -> i64 {
        self.calculated_size.or(self.size).unwrap_or(0)
    }
}

/// Accept an integer, a decimal string, or null.
fn de_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
        None,
    }
    match Raw::deserialize(deserializer)? {
        Raw::Int(n) => Ok(Some(n)),
        Raw::Str(s) => Ok(s.trim().parse::<i64>().ok()),
        Raw::None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Aggregate statistics over a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriveStats {
    pub total_files: usize,
    pub total_size: i64,
    pub folder_count: usize,
    pub file_count: usize,
}

/// The state of the index at the end of a crawl or sync: every live file,
/// the containment map, and aggregate stats. This is the unit the primary
/// cache persists and the analytics engine consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub files: Vec<DriveFile>,
    pub children_map: HashMap<String, Vec<String>>,
    pub stats: DriveStats,
}

/// Remote account quota and identity, from the `About` endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriveOverview {
    pub total_quota: Option<i64>,
    pub used: Option<i64>,
    pub used_in_drive: Option<i64>,
    pub user_email: Option<String>,
    pub user_display_name: Option<String>,
}

/// Cheap account picture: the overview plus root-level folders. Served from
/// the quick cache while it stays fresh; folder sizes are filled in by the
/// next full crawl.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuickScan {
    pub overview: DriveOverview,
    pub top_folders: Vec<DriveFile>,
}

// ---------------------------------------------------------------------------
// Progress stages
// ---------------------------------------------------------------------------

/// Stage label shared by the crawl and sync state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Initializing,
    Fetching,
    Processing,
    Finalizing,
    Complete,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initializing => "initializing",
            Stage::Fetching => "fetching",
            Stage::Processing => "processing",
            Stage::Finalizing => "finalizing",
            Stage::Complete => "complete",
            Stage::Error => "error",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Timestamp helpers
// ---------------------------------------------------------------------------

/// Parse an ISO-8601 timestamp with `Z` or offset suffix. Returns None on
/// anything unparseable rather than failing the surrounding computation.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Current instant as an ISO-8601 UTC string with offset suffix.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
