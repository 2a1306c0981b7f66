//! Derived analytics computed from a snapshot.
//!
//! Every view is a pure function of `(snapshot, now)` — the single `now`
//! stamp is captured once at invocation so age bucketing is deterministic
//! and tests can freeze time. The bundle is computed once per primary cache
//! version and persisted through the cache coordinator under a version gate.

use chrono::{DateTime, Datelike, Duration, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::types::{parse_timestamp, DriveFile, Snapshot};

/// Bumped on any breaking change to a view schema.
pub const DERIVED_VERSION: u32 = 2;

// ---------------------------------------------------------------------------
// View types
// ---------------------------------------------------------------------------

/// A group of non-folder files sharing `(name, size)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameSizeDuplicateGroup {
    pub name: String,
    pub size: i64,
    pub file_ids: Vec<String>,
    pub count: usize,
    /// Bytes recoverable by keeping one copy.
    pub potential_savings: i64,
    /// True iff every member agrees with the first on name, size, MIME type,
    /// and both timestamps.
    pub identical_metadata: bool,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub groups: Vec<NameSizeDuplicateGroup>,
    pub total_potential_savings: i64,
}

/// A file whose parent list references ids absent from the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanEntry {
    pub file_id: String,
    pub missing_parent_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrphanReport {
    pub orphans: Vec<OrphanEntry>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthBucket {
    pub depth: u32,
    pub folder_count: usize,
    pub total_size: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepthReport {
    pub depth_by_id: HashMap<String, u32>,
    pub distribution: Vec<DepthBucket>,
    pub max_depth: u32,
    /// Top 50 deepest folder ids, deepest first.
    pub deepest_folder_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderCategory {
    pub category: String,
    /// `high` for name matches, `medium` for content inference.
    pub confidence: String,
    /// `name` or `content`.
    pub method: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub folder_count: usize,
    pub total_size: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticReport {
    pub folder_category: HashMap<String, FolderCategory>,
    pub totals: BTreeMap<String, CategoryTotals>,
    pub category_folder_ids: BTreeMap<String, Vec<String>>,
    pub uncategorized_count: usize,
    pub uncategorized_folder_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolderCell {
    pub folder_count: usize,
    pub total_size: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgeSemanticReport {
    pub buckets: Vec<String>,
    /// category -> age bucket -> cell.
    pub matrix: BTreeMap<String, BTreeMap<String, FolderCell>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileCell {
    pub file_count: usize,
    pub total_size: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeSemanticReport {
    pub groups: Vec<String>,
    /// category-of-first-parent -> broad type -> cell.
    pub matrix: BTreeMap<String, BTreeMap<String, FileCell>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeStatsEntry {
    pub count: usize,
    pub total_size: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeStats {
    pub groups: BTreeMap<String, TypeStatsEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineBucket {
    pub count: usize,
    pub total_size: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineSeries {
    /// Keyed `YYYY-MM-DD`.
    pub day: BTreeMap<String, TimelineBucket>,
    /// Keyed by ISO week start (Monday) as `YYYY-MM-DD`.
    pub week: BTreeMap<String, TimelineBucket>,
    /// Keyed `YYYY-MM`.
    pub month: BTreeMap<String, TimelineBucket>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineReport {
    pub created: TimelineSeries,
    pub modified: TimelineSeries,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LargeLists {
    /// Top 2000 file ids by size, largest first.
    pub top_file_ids: Vec<String>,
    /// Top 1000 folder ids by calculated size, largest first.
    pub top_folder_ids: Vec<String>,
}

/// The complete derived bundle, persisted under `derived_version`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsBundle {
    pub derived_version: u32,
    pub duplicates: DuplicateReport,
    pub depths: DepthReport,
    pub semantic: SemanticReport,
    pub age_semantic: AgeSemanticReport,
    pub type_semantic: TypeSemanticReport,
    pub orphans: OrphanReport,
    pub types: TypeStats,
    pub timeline: TimelineReport,
    pub large: LargeLists,
}

// ---------------------------------------------------------------------------
// Semantic categories
// ---------------------------------------------------------------------------

/// Category rules evaluated in order; the first keyword hit wins.
const SEMANTIC_CATEGORIES: &[(&str, &[&str])] = &[
    ("Backup/Archive", &["backup", "backup_", "old", "old_", "archive", "legacy", "bak", "oldbackup"]),
    ("Photos", &["photo", "photos", "picture", "pictures", "images", "camera", "pic", "pics", "img"]),
    ("Work", &["work", "business", "client", "project", "projects", "office", "corporate", "job"]),
    ("Personal", &["personal", "home", "family", "private", "my", "self"]),
    ("Documents", &["document", "doc", "documents", "files", "paperwork"]),
    ("Music", &["music", "audio", "song", "songs", "mp3", "sound", "tunes"]),
    ("Videos", &["video", "videos", "movie", "movies", "film", "films"]),
    ("Downloads", &["download", "downloaded", "temp", "tmp"]),
    ("Code", &["code", "dev", "development", "src", "source", "script", "scripts", "programming"]),
    ("School", &["school", "education", "study", "studies", "course", "courses", "class", "university"]),
];

const AGE_BUCKETS: &[(&str, i64, i64)] = &[
    ("0-30 days", 0, 30),
    ("30-90 days", 30, 90),
    ("90-180 days", 90, 180),
    ("180-365 days", 180, 365),
    ("365+ days", 365, 10_000),
];

const TYPE_GROUPS: &[&str] = &["Images", "Videos", "Audio", "Documents", "Other"];

fn classify_folder_by_name(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    for (category, keywords) in SEMANTIC_CATEGORIES {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return Some(category);
        }
    }
    None
}

/// Content rule: examine direct child non-folder files; a >80% majority of
/// one kind assigns the category.
fn classify_folder_by_content(
    child_ids: &[String],
    index: &HashMap<&str, &DriveFile>,
    now: DateTime<Utc>,
) -> Option<&'static str> {
    let mut total = 0usize;
    let mut images = 0usize;
    let mut videos = 0usize;
    let mut audio = 0usize;
    let mut docs = 0usize;
    let mut old = 0usize;

    let one_year = Duration::days(365);
    for child_id in child_ids {
        let Some(child) = index.get(child_id.as_str()) else { continue };
        if child.is_folder() {
            continue;
        }
        total += 1;
        let mime = child.mime_type.as_deref().unwrap_or("").to_lowercase();
        if mime.starts_with("image/") {
            images += 1;
        } else if mime.starts_with("video/") {
            videos += 1;
        } else if mime.starts_with("audio/") {
            audio += 1;
        } else if mime.contains("document") || mime.contains("pdf") {
            docs += 1;
        }
        if let Some(modified) = child.modified_time.as_deref().and_then(parse_timestamp) {
            if now - modified > one_year {
                old += 1;
            }
        }
    }

    if total == 0 {
        return None;
    }
    let majority = |count: usize| count as f64 / total as f64 > 0.8;
    if majority(images) {
        Some("Photos")
    } else if majority(old) {
        Some("Backup/Archive")
    } else if majority(videos) {
        Some("Videos")
    } else if majority(audio) {
        Some("Music")
    } else if majority(docs) {
        Some("Documents")
    } else {
        None
    }
}

fn file_type_group(mime: &str) -> &'static str {
    let m = mime.to_lowercase();
    if m.starts_with("image/") {
        "Images"
    } else if m.starts_with("video/") {
        "Videos"
    } else if m.starts_with("audio/") {
        "Audio"
    } else if m.starts_with("application/pdf")
        || m.starts_with("application/vnd.google-apps.document")
        || m.starts_with("application/msword")
        || m.starts_with("application/vnd.openxmlformats")
    {
        "Documents"
    } else {
        "Other"
    }
}

fn file_index(files: &[DriveFile]) -> HashMap<&str, &DriveFile> {
    files.iter().filter(|f| !f.id.is_empty()).map(|f| (f.id.as_str(), f)).collect()
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Group non-folders by `(name, size)`; groups of two or more are potential
/// duplicates, ordered by potential savings descending.
pub fn compute_duplicates(files: &[DriveFile]) -> DuplicateReport {
    let mut groups: BTreeMap<(String, i64), Vec<&DriveFile>> = BTreeMap::new();
    for file in files {
        if file.is_folder() {
            continue;
        }
        let name = file.name.clone().unwrap_or_default();
        let size = file.size.unwrap_or(0);
        groups.entry((name, size)).or_default().push(file);
    }

    let mut out_groups = Vec::new();
    let mut total_potential_savings = 0i64;
    for ((name, size), members) in groups {
        if members.len() < 2 {
            continue;
        }
        let potential_savings = (members.len() as i64 - 1) * size;
        total_potential_savings += potential_savings;

        let first = members[0];
        let identical_metadata = members.iter().skip(1).all(|f| {
            f.name == first.name
                && f.size.unwrap_or(0) == first.size.unwrap_or(0)
                && f.mime_type == first.mime_type
                && f.created_time == first.created_time
                && f.modified_time == first.modified_time
        });

        out_groups.push(NameSizeDuplicateGroup {
            name,
            size,
            file_ids: members.iter().filter(|f| !f.id.is_empty()).map(|f| f.id.clone()).collect(),
            count: members.len(),
            potential_savings,
            identical_metadata,
            mime_type: first.mime_type.clone(),
        });
    }

    out_groups.sort_by(|a, b| {
        b.potential_savings
            .cmp(&a.potential_savings)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.size.cmp(&b.size))
    });
    DuplicateReport { groups: out_groups, total_potential_savings }
}

/// Files whose parent references point outside the snapshot.
pub fn compute_orphans(files: &[DriveFile], index: &HashMap<&str, &DriveFile>) -> OrphanReport {
    let mut orphans = Vec::new();
    for file in files {
        if file.parents.is_empty() {
            continue;
        }
        let missing: Vec<String> =
            file.parents.iter().filter(|p| !index.contains_key(p.as_str())).cloned().collect();
        if !missing.is_empty() {
            orphans.push(OrphanEntry { file_id: file.id.clone(), missing_parent_ids: missing });
        }
    }
    let count = orphans.len();
    OrphanReport { orphans, count }
}

/// Per-folder depth = 1 + max(parent depth), with a visiting set so a cycle
/// resolves the current node to depth 0 instead of recursing forever.
pub fn compute_depths(files: &[DriveFile], index: &HashMap<&str, &DriveFile>) -> DepthReport {
    fn depth(
        node_id: &str,
        index: &HashMap<&str, &DriveFile>,
        memo: &mut HashMap<String, u32>,
        visiting: &mut HashSet<String>,
    ) -> u32 {
        if let Some(&d) = memo.get(node_id) {
            return d;
        }
        if visiting.contains(node_id) {
            return 0;
        }
        let Some(node) = index.get(node_id) else {
            memo.insert(node_id.to_string(), 0);
            return 0;
        };
        if !node.is_folder() || node.parents.is_empty() {
            memo.insert(node_id.to_string(), 0);
            return 0;
        }
        visiting.insert(node_id.to_string());
        let max_parent =
            node.parents.iter().map(|p| depth(p, index, memo, visiting)).max().unwrap_or(0);
        visiting.remove(node_id);
        let d = max_parent + 1;
        memo.insert(node_id.to_string(), d);
        d
    }

    let folders: Vec<&DriveFile> =
        files.iter().filter(|f| f.is_folder() && !f.id.is_empty()).collect();

    let mut memo = HashMap::new();
    let mut visiting = HashSet::new();
    for folder in &folders {
        depth(&folder.id, index, &mut memo, &mut visiting);
    }

    let mut distribution: BTreeMap<u32, DepthBucket> = BTreeMap::new();
    for folder in &folders {
        let d = memo.get(&folder.id).copied().unwrap_or(0);
        let bucket = distribution
            .entry(d)
            .or_insert(DepthBucket { depth: d, folder_count: 0, total_size: 0 });
        bucket.folder_count += 1;
        bucket.total_size += folder.effective_size();
    }

    // Only folder entries participate in the published map and top list.
    let depth_by_id: HashMap<String, u32> =
        folders.iter().map(|f| (f.id.clone(), memo.get(&f.id).copied().unwrap_or(0))).collect();
    let max_depth = depth_by_id.values().copied().max().unwrap_or(0);

    let mut deepest: Vec<(&String, &u32)> = depth_by_id.iter().collect();
    deepest.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    let deepest_folder_ids = deepest.into_iter().take(50).map(|(id, _)| id.clone()).collect();

    DepthReport {
        depth_by_id,
        distribution: distribution.into_values().collect(),
        max_depth,
        deepest_folder_ids,
    }
}

/// Assign each folder one semantic category (or none): name rule first at
/// high confidence, then the content rule at medium confidence.
pub fn compute_semantic(
    files: &[DriveFile],
    children_map: &HashMap<String, Vec<String>>,
    index: &HashMap<&str, &DriveFile>,
    now: DateTime<Utc>,
) -> SemanticReport {
    let mut report = SemanticReport::default();

    for file in files {
        if !file.is_folder() || file.id.is_empty() {
            continue;
        }
        let name = file.name.as_deref().unwrap_or("");

        let (category, confidence, method) = match classify_folder_by_name(name) {
            Some(category) => (Some(category), "high", "name"),
            None => {
                let empty = Vec::new();
                let child_ids = children_map.get(&file.id).unwrap_or(&empty);
                match classify_folder_by_content(child_ids, index, now) {
                    Some(category) => (Some(category), "medium", "content"),
                    None => (None, "", ""),
                }
            }
        };

        match category {
            Some(category) => {
                report.folder_category.insert(
                    file.id.clone(),
                    FolderCategory {
                        category: category.to_string(),
                        confidence: confidence.to_string(),
                        method: method.to_string(),
                    },
                );
                let totals = report.totals.entry(category.to_string()).or_default();
                totals.folder_count += 1;
                totals.total_size += file.effective_size();
                report.category_folder_ids.entry(category.to_string()).or_default().push(file.id.clone());
            }
            None => {
                report.uncategorized_count += 1;
                report.uncategorized_folder_ids.push(file.id.clone());
            }
        }
    }
    report
}

/// Folder age (by modified time) x semantic category matrix.
pub fn compute_age_semantic(
    files: &[DriveFile],
    folder_category: &HashMap<String, FolderCategory>,
    now: DateTime<Utc>,
) -> AgeSemanticReport {
    let mut matrix: BTreeMap<String, BTreeMap<String, FolderCell>> = BTreeMap::new();

    for file in files {
        if !file.is_folder() || file.id.is_empty() {
            continue;
        }
        let category = folder_category
            .get(&file.id)
            .map(|c| c.category.clone())
            .unwrap_or_else(|| "Uncategorized".to_string());

        let age_days = file
            .modified_time
            .as_deref()
            .and_then(parse_timestamp)
            .map(|modified| (now - modified).num_days())
            .unwrap_or(10_000);

        let mut label = "365+ days";
        for (bucket_label, start, end) in AGE_BUCKETS {
            if age_days >= *start && age_days < *end {
                label = bucket_label;
                break;
            }
        }

        let cell = matrix.entry(category).or_default().entry(label.to_string()).or_default();
        cell.folder_count += 1;
        cell.total_size += file.effective_size();
    }

    AgeSemanticReport {
        buckets: AGE_BUCKETS.iter().map(|(label, _, _)| label.to_string()).collect(),
        matrix,
    }
}

/// Non-folder files grouped by (category of first parent, broad type).
pub fn compute_type_semantic(
    files: &[DriveFile],
    folder_category: &HashMap<String, FolderCategory>,
) -> TypeSemanticReport {
    let mut matrix: BTreeMap<String, BTreeMap<String, FileCell>> = BTreeMap::new();

    for file in files {
        if file.is_folder() || file.id.is_empty() {
            continue;
        }
        let category = file
            .parents
            .first()
            .and_then(|p| folder_category.get(p))
            .map(|c| c.category.clone())
            .unwrap_or_else(|| "Uncategorized".to_string());
        let group = file_type_group(file.mime_type.as_deref().unwrap_or(""));

        let cell = matrix.entry(category).or_default().entry(group.to_string()).or_default();
        cell.file_count += 1;
        cell.total_size += file.effective_size();
    }

    TypeSemanticReport {
        groups: TYPE_GROUPS.iter().map(|g| g.to_string()).collect(),
        matrix,
    }
}

/// Overall count and size per broad type group. Empty groups are dropped.
pub fn compute_type_stats(files: &[DriveFile]) -> TypeStats {
    let mut groups: BTreeMap<String, TypeStatsEntry> = BTreeMap::new();
    for file in files {
        let group = if file.is_folder() {
            "Folders"
        } else {
            file_type_group(file.mime_type.as_deref().unwrap_or(""))
        };
        let entry = groups.entry(group.to_string()).or_default();
        entry.count += 1;
        entry.total_size += file.effective_size();
    }
    TypeStats { groups }
}

/// Activity buckets keyed by day, ISO week start (Monday), and month, on
/// both created and modified times. Folders are excluded.
pub fn compute_timeline(files: &[DriveFile]) -> TimelineReport {
    fn add(series: &mut TimelineSeries, dt: DateTime<Utc>, size: i64) {
        let day = dt.format("%Y-%m-%d").to_string();
        let week_start = dt.date_naive()
            - Duration::days(i64::from(dt.date_naive().weekday().num_days_from_monday()));
        let week = week_start.format("%Y-%m-%d").to_string();
        let month = dt.format("%Y-%m").to_string();

        for (map, key) in [
            (&mut series.day, day),
            (&mut series.week, week),
            (&mut series.month, month),
        ] {
            let bucket = map.entry(key).or_default();
            bucket.count += 1;
            bucket.total_size += size;
        }
    }

    let mut report = TimelineReport::default();
    for file in files {
        if file.is_folder() {
            continue;
        }
        let size = file.effective_size();
        if let Some(created) = file.created_time.as_deref().and_then(parse_timestamp) {
            add(&mut report.created, created, size);
        }
        if let Some(modified) = file.modified_time.as_deref().and_then(parse_timestamp) {
            add(&mut report.modified, modified, size);
        }
    }
    report
}

/// Bounded top lists by size: 2000 files, 1000 folders.
pub fn compute_large_lists(files: &[DriveFile]) -> LargeLists {
    let mut folders: Vec<&DriveFile> =
        files.par_iter().filter(|f| f.is_folder() && !f.id.is_empty()).collect();
    let mut nonfolders: Vec<&DriveFile> =
        files.par_iter().filter(|f| !f.is_folder() && !f.id.is_empty()).collect();

    nonfolders.par_sort_by(|a, b| {
        b.effective_size().cmp(&a.effective_size()).then_with(|| a.id.cmp(&b.id))
    });
    folders.par_sort_by(|a, b| {
        b.effective_size().cmp(&a.effective_size()).then_with(|| a.id.cmp(&b.id))
    });

    LargeLists {
        top_file_ids: nonfolders.into_iter().take(2000).map(|f| f.id.clone()).collect(),
        top_folder_ids: folders.into_iter().take(1000).map(|f| f.id.clone()).collect(),
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// Compute every view from one snapshot. Deterministic given inputs.
pub fn compute_all(snapshot: &Snapshot, now: DateTime<Utc>) -> AnalyticsBundle {
    let (bundle, _timings) = compute_with_timings(snapshot, now);
    bundle
}

/// Same as [`compute_all`], also returning per-view wall-clock timings in
/// milliseconds for the derived-cache sidecar.
pub fn compute_with_timings(
    snapshot: &Snapshot,
    now: DateTime<Utc>,
) -> (AnalyticsBundle, BTreeMap<String, f64>) {
    let files = &snapshot.files;
    let index = file_index(files);
    let mut timings = BTreeMap::new();

    macro_rules! time_view {
        ($name:literal, $expr:expr) => {{
            let start = std::time::Instant::now();
            let value = $expr;
            timings.insert($name.to_string(), start.elapsed().as_secs_f64() * 1000.0);
            value
        }};
    }

    let duplicates = time_view!("duplicates", compute_duplicates(files));
    let depths = time_view!("depths", compute_depths(files, &index));
    let semantic =
        time_view!("semantic", compute_semantic(files, &snapshot.children_map, &index, now));
    let age_semantic =
        time_view!("age_semantic", compute_age_semantic(files, &semantic.folder_category, now));
    let type_semantic =
        time_view!("type_semantic", compute_type_semantic(files, &semantic.folder_category));
    let orphans = time_view!("orphans", compute_orphans(files, &index));
    let types = time_view!("types", compute_type_stats(files));
    let timeline = time_view!("timeline", compute_timeline(files));
    let large = time_view!("large", compute_large_lists(files));

    let total: f64 = timings.values().sum();
    timings.insert("analytics.total".to_string(), total);

    (
        AnalyticsBundle {
            derived_version: DERIVED_VERSION,
            duplicates,
            depths,
            semantic,
            age_semantic,
            type_semantic,
            orphans,
            types,
            timeline,
            large,
        },
        timings,
    )
}
