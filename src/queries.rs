//! Read-only queries over the index: DAG traversal, duplicate grouping,
//! large-file and MIME rollups, shortcut resolution, and snapshot building.
//!
//! Everything here runs against a plain read connection and never blocks
//! writers (WAL readers see a consistent prefix of committed batches).

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::store::{self, FileRow};
use crate::types::{DriveFile, DriveStats, Snapshot};

// ---------------------------------------------------------------------------
// Path reconstruction
// ---------------------------------------------------------------------------

/// Reconstruct up to `max_paths` full location paths for a file by following
/// in-edges recursively. Multi-parent files yield one path per containment
/// chain. Each path is capped at `max_depth` segments to defend against
/// cycles; a node with no in-edges resolves to `"Root"`.
///
/// Paths are ordered shortest-first (ties lexicographic), so the first entry
/// is the primary path for display.
pub fn reconstruct_paths(
    conn: &Connection,
    file_id: &str,
    max_paths: usize,
    max_depth: usize,
) -> Result<Vec<String>> {
    let mut visiting = HashSet::new();
    let chains = ancestor_chains(conn, file_id, max_depth, &mut visiting)?;

    let mut paths: Vec<String> = chains
        .into_iter()
        .map(|chain| {
            if chain.is_empty() {
                "Root".to_string()
            } else {
                format!("Root/{}", chain.join("/"))
            }
        })
        .collect();
    paths.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    paths.dedup();
    paths.truncate(max_paths);
    Ok(paths)
}

/// Chains of ancestor folder names, root-first, excluding the node itself.
fn ancestor_chains(
    conn: &Connection,
    node_id: &str,
    depth_left: usize,
    visiting: &mut HashSet<String>,
) -> Result<Vec<Vec<String>>> {
    if depth_left == 0 || visiting.contains(node_id) {
        // Cycle or depth cap: terminate this chain at a synthetic root.
        return Ok(vec![vec![]]);
    }
    let mut parent_ids = store::get_parents(conn, node_id)?;
    if parent_ids.is_empty() {
        return Ok(vec![vec![]]);
    }
    parent_ids.sort();

    visiting.insert(node_id.to_string());
    let mut chains = Vec::new();
    for parent_id in &parent_ids {
        let parent_name = store::get_file_by_id(conn, parent_id)?
            .and_then(|row| row.name)
            .unwrap_or_else(|| parent_id.clone());
        for mut chain in ancestor_chains(conn, parent_id, depth_left - 1, visiting)? {
            chain.push(parent_name.clone());
            chains.push(chain);
        }
    }
    visiting.remove(node_id);
    Ok(chains)
}

// ---------------------------------------------------------------------------
// Children map
// ---------------------------------------------------------------------------

/// `parent_id -> [child_id]` over live, non-trashed children.
pub fn build_children_map(conn: &Connection) -> Result<HashMap<String, Vec<String>>> {
    let mut stmt = conn.prepare(
        "SELECT p.parent_id, p.child_id
         FROM parents p
         JOIN files f ON p.child_id = f.id
         WHERE f.removed = 0 AND f.trashed = 0",
    )?;
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (parent, child) = row?;
        map.entry(parent).or_default().push(child);
    }
    Ok(map)
}

// ---------------------------------------------------------------------------
// Duplicate groups (md5 + size)
// ---------------------------------------------------------------------------

/// A group of live files sharing `(md5, size)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub md5: String,
    pub size: i64,
    pub count: usize,
    pub file_ids: Vec<String>,
    /// Bytes recoverable by keeping one copy: `size * (count - 1)`.
    pub total_wasted: i64,
}

/// Group live, non-trashed, non-shortcut rows by `(md5, size)` and keep
/// groups with more than one member, ordered by wasted bytes descending.
pub fn duplicate_groups(
    conn: &Connection,
    min_size: i64,
    limit: Option<usize>,
) -> Result<Vec<DuplicateGroup>> {
    let mut stmt = conn.prepare(
        "SELECT md5, size, COUNT(*) AS count, GROUP_CONCAT(id) AS ids,
                size * (COUNT(*) - 1) AS total_wasted
         FROM files
         WHERE removed = 0 AND trashed = 0 AND is_shortcut = 0
           AND md5 IS NOT NULL AND size IS NOT NULL AND size >= ?1
         GROUP BY md5, size
         HAVING COUNT(*) > 1
         ORDER BY total_wasted DESC
         LIMIT ?2",
    )?;
    let limit = limit.map(|n| n as i64).unwrap_or(-1);
    let groups = stmt
        .query_map(params![min_size, limit], |row| {
            let ids: String = row.get("ids")?;
            Ok(DuplicateGroup {
                md5: row.get("md5")?,
                size: row.get("size")?,
                count: row.get::<_, i64>("count")? as usize,
                file_ids: ids.split(',').map(|s| s.to_string()).collect(),
                total_wasted: row.get("total_wasted")?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(groups)
}

/// Roll-up across every duplicate group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateSavings {
    pub total_groups: usize,
    pub total_duplicate_files: usize,
    pub total_wasted_bytes: i64,
}

pub fn total_duplicate_savings(conn: &Connection, min_size: i64) -> Result<DuplicateSavings> {
    let groups = duplicate_groups(conn, min_size, None)?;
    Ok(DuplicateSavings {
        total_groups: groups.len(),
        total_duplicate_files: groups.iter().map(|g| g.count).sum(),
        total_wasted_bytes: groups.iter().map(|g| g.total_wasted).sum(),
    })
}

/// Per-file detail for report output, with the primary reconstructed path.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateFileDetail {
    pub id: String,
    pub name: Option<String>,
    pub path: String,
    pub owned_by_me: bool,
    pub trashed: bool,
    pub web_view_link: Option<String>,
}

pub fn duplicate_files_detail(
    conn: &Connection,
    file_ids: &[String],
    max_paths: usize,
    max_depth: usize,
) -> Result<Vec<DuplicateFileDetail>> {
    let mut details = Vec::with_capacity(file_ids.len());
    for id in file_ids {
        let Some(row) = store::get_file_by_id(conn, id)? else { continue };
        let paths = reconstruct_paths(conn, id, max_paths, max_depth)?;
        details.push(DuplicateFileDetail {
            id: row.id,
            name: row.name,
            path: paths.into_iter().next().unwrap_or_else(|| "Root".to_string()),
            owned_by_me: row.owned_by_me,
            trashed: row.trashed,
            web_view_link: row.web_view_link,
        });
    }
    Ok(details)
}

// ---------------------------------------------------------------------------
// Large files and MIME breakdown
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LargeFile {
    pub id: String,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub size: i64,
    pub web_view_link: Option<String>,
}

/// Top-N live files by size descending, filtered by `min_size`.
pub fn large_files(conn: &Connection, min_size: i64, limit: usize) -> Result<Vec<LargeFile>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, mime_type, size, web_view_link
         FROM files
         WHERE removed = 0 AND trashed = 0 AND size IS NOT NULL AND size >= ?1
         ORDER BY size DESC
         LIMIT ?2",
    )?;
    let files = stmt
        .query_map(params![min_size, limit as i64], |row| {
            Ok(LargeFile {
                id: row.get(0)?,
                name: row.get(1)?,
                mime_type: row.get(2)?,
                size: row.get(3)?,
                web_view_link: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(files)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MimeBucket {
    pub mime_type: Option<String>,
    pub count: usize,
    pub total_size: i64,
}

/// `(mime_type, count, total_size)` over live rows, ordered by count.
pub fn mime_breakdown(conn: &Connection) -> Result<Vec<MimeBucket>> {
    let mut stmt = conn.prepare(
        "SELECT mime_type, COUNT(*) AS count, SUM(COALESCE(size, 0)) AS total_size
         FROM files
         WHERE removed = 0 AND trashed = 0
         GROUP BY mime_type
         ORDER BY count DESC",
    )?;
    let buckets = stmt
        .query_map([], |row| {
            Ok(MimeBucket {
                mime_type: row.get(0)?,
                count: row.get::<_, i64>(1)? as usize,
                total_size: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(buckets)
}

// ---------------------------------------------------------------------------
// Shortcut resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedShortcut {
    pub id: String,
    pub name: Option<String>,
    pub target_id: String,
    pub target_name: Option<String>,
    pub target_mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedShortcut {
    pub id: String,
    pub name: Option<String>,
    pub target_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ShortcutResolution {
    pub resolved: Vec<ResolvedShortcut>,
    pub unresolved: Vec<UnresolvedShortcut>,
}

/// Join live shortcuts to their targets; report both the resolved pairs and
/// the shortcuts whose target is absent or tombstoned.
pub fn resolve_shortcuts(conn: &Connection) -> Result<ShortcutResolution> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.shortcut_target_id, t.name, t.mime_type
         FROM files s
         JOIN files t ON s.shortcut_target_id = t.id AND t.removed = 0
         WHERE s.is_shortcut = 1 AND s.removed = 0 AND s.trashed = 0",
    )?;
    let resolved = stmt
        .query_map([], |row| {
            Ok(ResolvedShortcut {
                id: row.get(0)?,
                name: row.get(1)?,
                target_id: row.get(2)?,
                target_name: row.get(3)?,
                target_mime_type: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.shortcut_target_id
         FROM files s
         LEFT JOIN files t ON s.shortcut_target_id = t.id AND t.removed = 0
         WHERE s.is_shortcut = 1 AND s.removed = 0 AND s.trashed = 0
           AND t.id IS NULL",
    )?;
    let unresolved = stmt
        .query_map([], |row| {
            Ok(UnresolvedShortcut {
                id: row.get(0)?,
                name: row.get(1)?,
                target_id: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(ShortcutResolution { resolved, unresolved })
}

// ---------------------------------------------------------------------------
// Snapshot building
// ---------------------------------------------------------------------------

/// Build a full snapshot from the store: live non-trashed records with
/// parents rebuilt from the edge table, the children map, recursively
/// calculated folder sizes, and aggregate stats.
pub fn build_snapshot(conn: &Connection) -> Result<Snapshot> {
    let rows = store::get_all_files(conn, false, false)?;

    // parents come from the edge table, which is authoritative after syncs.
    let mut parents_by_child: HashMap<String, Vec<String>> = HashMap::new();
    {
        let mut stmt = conn.prepare("SELECT parent_id, child_id FROM parents")?;
        let edges = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for edge in edges {
            let (parent, child) = edge?;
            parents_by_child.entry(child).or_default().push(parent);
        }
    }

    let mut files = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut file = match row.to_drive_file() {
            Ok(file) => file,
            // A raw payload that no longer parses falls back to the
            // normalized columns rather than dropping the record.
            Err(_) => drive_file_from_columns(row),
        };
        let mut parents = parents_by_child.remove(&row.id).unwrap_or_default();
        parents.sort();
        file.parents = parents;
        files.push(file);
    }

    let children_map = build_children_map(conn)?;
    calculate_folder_sizes(&mut files, &children_map);

    let folder_count = files.iter().filter(|f| f.is_folder()).count();
    let total_size: i64 = files.iter().filter(|f| !f.is_folder()).map(|f| f.size.unwrap_or(0)).sum();
    let stats = DriveStats {
        total_files: files.len(),
        total_size,
        folder_count,
        file_count: files.len() - folder_count,
    };

    Ok(Snapshot { files, children_map, stats })
}

fn drive_file_from_columns(row: &FileRow) -> DriveFile {
    DriveFile {
        id: row.id.clone(),
        name: row.name.clone(),
        mime_type: row.mime_type.clone(),
        trashed: Some(row.trashed),
        created_time: row.created_time.clone(),
        modified_time: row.modified_time.clone(),
        size: row.size,
        md5_checksum: row.md5.clone(),
        owned_by_me: Some(row.owned_by_me),
        starred: Some(row.starred),
        web_view_link: row.web_view_link.clone(),
        icon_link: row.icon_link.clone(),
        ..Default::default()
    }
}

/// Fill `calculated_size` on every folder: the recursive sum of descendant
/// file sizes, with a visiting set so cycles contribute zero instead of
/// recursing forever.
pub fn calculate_folder_sizes(
    files: &mut [DriveFile],
    children_map: &HashMap<String, Vec<String>>,
) {
    let index: HashMap<String, usize> =
        files.iter().enumerate().map(|(i, f)| (f.id.clone(), i)).collect();

    fn calc(
        id: &str,
        files: &[DriveFile],
        index: &HashMap<String, usize>,
        children_map: &HashMap<String, Vec<String>>,
        memo: &mut HashMap<String, i64>,
        visiting: &mut HashSet<String>,
    ) -> i64 {
        if let Some(&size) = memo.get(id) {
            return size;
        }
        if visiting.contains(id) {
            return 0;
        }
        let Some(&i) = index.get(id) else { return 0 };
        let file = &files[i];
        if !file.is_folder() {
            return file.size.unwrap_or(0);
        }
        visiting.insert(id.to_string());
        let total = children_map
            .get(id)
            .map(|children| {
                children.iter().map(|c| calc(c, files, index, children_map, memo, visiting)).sum()
            })
            .unwrap_or(0);
        visiting.remove(id);
        memo.insert(id.to_string(), total);
        total
    }

    let folder_ids: Vec<String> =
        files.iter().filter(|f| f.is_folder()).map(|f| f.id.clone()).collect();
    let mut memo = HashMap::new();
    let mut visiting = HashSet::new();
    for id in &folder_ids {
        calc(id, files, &index, children_map, &mut memo, &mut visiting);
    }
    for file in files.iter_mut() {
        if file.is_folder() {
            file.calculated_size = Some(memo.get(&file.id).copied().unwrap_or(0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{replace_parents, upsert_file, IndexStore};
    use crate::types::{ShortcutDetails, FOLDER_MIME, SHORTCUT_MIME};
    use tempfile::TempDir;

    fn test_conn() -> (TempDir, Connection) {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path().join("drive_index.db"));
        store.init().unwrap();
        let conn = store.connect().unwrap();
        (dir, conn)
    }

    fn folder(id: &str, name: &str) -> DriveFile {
        DriveFile {
            id: id.into(),
            name: Some(name.into()),
            mime_type: Some(FOLDER_MIME.into()),
            ..Default::default()
        }
    }

    fn plain(id: &str, name: &str, size: i64) -> DriveFile {
        DriveFile {
            id: id.into(),
            name: Some(name.into()),
            mime_type: Some("text/plain".into()),
            size: Some(size),
            ..Default::default()
        }
    }

    fn insert(conn: &Connection, file: &DriveFile, parents: &[&str]) {
        upsert_file(conn, file).unwrap();
        let parent_ids: Vec<String> = parents.iter().map(|s| s.to_string()).collect();
        replace_parents(conn, &file.id, &parent_ids).unwrap();
    }

    #[test]
    fn paths_for_rootless_file() {
        let (_dir, conn) = test_conn();
        insert(&conn, &plain("F1", "a.txt", 1), &[]);
        let paths = reconstruct_paths(&conn, "F1", 5, 50).unwrap();
        assert_eq!(paths, vec!["Root"]);
    }

    #[test]
    fn multi_parent_file_yields_multiple_paths() {
        let (_dir, conn) = test_conn();
        insert(&conn, &folder("P1", "Work"), &[]);
        insert(&conn, &folder("P2", "Shared"), &[]);
        insert(&conn, &plain("F1", "doc.txt", 1), &["P1", "P2"]);

        let paths = reconstruct_paths(&conn, "F1", 5, 50).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&"Root/Work".to_string()));
        assert!(paths.contains(&"Root/Shared".to_string()));
    }

    #[test]
    fn path_reconstruction_terminates_on_cycle() {
        let (_dir, conn) = test_conn();
        insert(&conn, &folder("A", "A"), &["B"]);
        insert(&conn, &folder("B", "B"), &["A"]);
        insert(&conn, &plain("F1", "f", 1), &["A"]);

        let paths = reconstruct_paths(&conn, "F1", 5, 50).unwrap();
        assert!(!paths.is_empty());
        assert!(paths[0].starts_with("Root"));
    }

    #[test]
    fn nested_path_renders_root_first() {
        let (_dir, conn) = test_conn();
        insert(&conn, &folder("P1", "Work"), &[]);
        insert(&conn, &folder("P2", "Projects"), &["P1"]);
        insert(&conn, &plain("F1", "plan.md", 1), &["P2"]);

        let paths = reconstruct_paths(&conn, "F1", 5, 50).unwrap();
        assert_eq!(paths[0], "Root/Work/Projects");
    }

    #[test]
    fn children_map_skips_trashed_children() {
        let (_dir, conn) = test_conn();
        insert(&conn, &folder("P1", "Work"), &[]);
        insert(&conn, &plain("F1", "live.txt", 1), &["P1"]);
        let mut trashed = plain("F2", "gone.txt", 1);
        trashed.trashed = Some(true);
        insert(&conn, &trashed, &["P1"]);

        let map = build_children_map(&conn).unwrap();
        assert_eq!(map.get("P1").unwrap(), &vec!["F1".to_string()]);
    }

    #[test]
    fn duplicate_groups_by_md5_and_size() {
        let (_dir, conn) = test_conn();
        for id in ["F1", "F2"] {
            let mut f = plain(id, "copy.bin", 5000);
            f.md5_checksum = Some("abc".into());
            insert(&conn, &f, &[]);
        }
        // Same md5, different size: separate group, below threshold of 2.
        let mut odd = plain("F3", "other.bin", 4000);
        odd.md5_checksum = Some("abc".into());
        insert(&conn, &odd, &[]);
        // No md5: never grouped.
        insert(&conn, &plain("F4", "nochk.bin", 5000), &[]);

        let groups = duplicate_groups(&conn, 0, None).unwrap();
        assert_eq!(groups.len(), 1);
        let g = &groups[0];
        assert_eq!(g.count, 2);
        assert_eq!(g.size, 5000);
        assert_eq!(g.total_wasted, 5000);
        assert_eq!(g.file_ids.len(), 2);

        let savings = total_duplicate_savings(&conn, 0).unwrap();
        assert_eq!(savings.total_groups, 1);
        assert_eq!(savings.total_duplicate_files, 2);
        assert_eq!(savings.total_wasted_bytes, 5000);
    }

    #[test]
    fn duplicate_groups_respect_min_size() {
        let (_dir, conn) = test_conn();
        for id in ["F1", "F2"] {
            let mut f = plain(id, "small.bin", 100);
            f.md5_checksum = Some("xyz".into());
            insert(&conn, &f, &[]);
        }
        assert!(duplicate_groups(&conn, 1000, None).unwrap().is_empty());
        assert_eq!(duplicate_groups(&conn, 100, None).unwrap().len(), 1);
    }

    #[test]
    fn duplicates_exclude_shortcuts_and_removed() {
        let (_dir, conn) = test_conn();
        let mut a = plain("F1", "x", 5000);
        a.md5_checksum = Some("abc".into());
        insert(&conn, &a, &[]);
        let mut b = plain("F2", "x", 5000);
        b.md5_checksum = Some("abc".into());
        insert(&conn, &b, &[]);
        let mut shortcut = DriveFile {
            id: "S1".into(),
            mime_type: Some(SHORTCUT_MIME.into()),
            size: Some(5000),
            ..Default::default()
        };
        shortcut.md5_checksum = Some("abc".into());
        insert(&conn, &shortcut, &[]);

        let groups = duplicate_groups(&conn, 0, None).unwrap();
        assert_eq!(groups[0].count, 2);

        store::mark_removed(&conn, "F2").unwrap();
        assert!(duplicate_groups(&conn, 0, None).unwrap().is_empty());
    }

    #[test]
    fn large_files_ordered_desc() {
        let (_dir, conn) = test_conn();
        insert(&conn, &plain("F1", "small", 10), &[]);
        insert(&conn, &plain("F2", "big", 1000), &[]);
        insert(&conn, &plain("F3", "mid", 100), &[]);

        let top = large_files(&conn, 0, 2).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].id, "F2");
        assert_eq!(top[1].id, "F3");

        let filtered = large_files(&conn, 500, 10).unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn shortcut_resolution_splits_sets() {
        let (_dir, conn) = test_conn();
        insert(&conn, &plain("T1", "target.pdf", 10), &[]);
        let resolved = DriveFile {
            id: "S1".into(),
            name: Some("ok-link".into()),
            mime_type: Some(SHORTCUT_MIME.into()),
            shortcut_details: Some(ShortcutDetails {
                target_id: Some("T1".into()),
                target_mime_type: Some("application/pdf".into()),
            }),
            ..Default::default()
        };
        insert(&conn, &resolved, &[]);
        let dangling = DriveFile {
            id: "S2".into(),
            name: Some("broken-link".into()),
            mime_type: Some(SHORTCUT_MIME.into()),
            shortcut_details: Some(ShortcutDetails {
                target_id: Some("MISSING".into()),
                target_mime_type: None,
            }),
            ..Default::default()
        };
        insert(&conn, &dangling, &[]);

        let resolution = resolve_shortcuts(&conn).unwrap();
        assert_eq!(resolution.resolved.len(), 1);
        assert_eq!(resolution.resolved[0].target_id, "T1");
        assert_eq!(resolution.unresolved.len(), 1);
        assert_eq!(resolution.unresolved[0].id, "S2");
    }

    #[test]
    fn snapshot_carries_parents_sizes_and_stats() {
        let (_dir, conn) = test_conn();
        insert(&conn, &folder("P1", "Docs"), &[]);
        insert(&conn, &folder("P2", "Nested"), &["P1"]);
        insert(&conn, &plain("F1", "a.txt", 100), &["P2"]);
        insert(&conn, &plain("F2", "b.txt", 50), &["P1"]);

        let snapshot = build_snapshot(&conn).unwrap();
        assert_eq!(snapshot.stats.total_files, 4);
        assert_eq!(snapshot.stats.folder_count, 2);
        assert_eq!(snapshot.stats.file_count, 2);
        assert_eq!(snapshot.stats.total_size, 150);

        let by_id: HashMap<&str, &DriveFile> =
            snapshot.files.iter().map(|f| (f.id.as_str(), f)).collect();
        assert_eq!(by_id["F1"].parents, vec!["P2"]);
        assert_eq!(by_id["P2"].calculated_size, Some(100));
        assert_eq!(by_id["P1"].calculated_size, Some(150));
        assert_eq!(snapshot.children_map.get("P1").map(|v| v.len()), Some(2));
    }

    #[test]
    fn folder_size_calculation_survives_cycles() {
        let (_dir, conn) = test_conn();
        insert(&conn, &folder("A", "A"), &["B"]);
        insert(&conn, &folder("B", "B"), &["A"]);
        insert(&conn, &plain("F1", "f", 30), &["A"]);

        let snapshot = build_snapshot(&conn).unwrap();
        let by_id: HashMap<&str, &DriveFile> =
            snapshot.files.iter().map(|f| (f.id.as_str(), f)).collect();
        // Finite sizes despite the A <-> B cycle.
        assert!(by_id["A"].calculated_size.unwrap() >= 30);
        assert!(by_id["B"].calculated_size.is_some());
    }
}
