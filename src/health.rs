//! Integrity checks over the index.
//!
//! Run after crawl/sync to detect drift: dangling edges, unresolved
//! shortcuts, containment cycles, and distribution stats. Cycles are fatal
//! (the containment graph must be a DAG); dangling edges and unresolved
//! shortcuts are warnings — shared items routinely reference parents the
//! account cannot see.

use rusqlite::Connection;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::error::Result;
use crate::queries;
use crate::store::IndexStore;
use crate::types::{FOLDER_MIME, GOOGLE_APPS_PREFIX};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Edges whose parent or child row is missing, plus files with no in-edges
/// (root-level items legitimately appear here).
#[derive(Debug, Clone, Default, Serialize)]
pub struct DanglingEdgeReport {
    /// `(child_id, missing_parent_id)` pairs.
    pub missing_parents: Vec<(String, String)>,
    /// `(parent_id, missing_child_id)` pairs.
    pub missing_children: Vec<(String, String)>,
    /// Live files with no parent edges at all.
    pub rootless_files: Vec<RootlessFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RootlessFile {
    pub id: String,
    pub name: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ShortcutReport {
    pub unresolved: Vec<queries::UnresolvedShortcut>,
    pub resolved_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// Each cycle as the chain of folder ids, closing on its first element.
    pub cycles: Vec<Vec<String>>,
}

impl CycleReport {
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }
}

/// Counts and distributions over the indexed data.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub total_files: i64,
    pub active_files: i64,
    pub trashed_files: i64,
    pub removed_files: i64,
    pub folders: i64,
    pub files: i64,
    pub shortcuts: i64,
    pub google_native: i64,
    pub binary_files: i64,
    pub total_size_bytes: i64,
    pub with_md5: i64,
    pub owned_by_me: i64,
    pub parent_edges: i64,
}

/// Combined result of all checks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub passed: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub stats: IndexStats,
    pub dangling_edges: DanglingEdgeReport,
    pub shortcuts: ShortcutReport,
    pub cycles: CycleReport,
    pub mime_types: Vec<queries::MimeBucket>,
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

/// Left-join probe for edges referencing rows that don't exist.
pub fn check_dangling_edges(conn: &Connection) -> Result<DanglingEdgeReport> {
    let mut stmt = conn.prepare(
        "SELECT p.child_id, p.parent_id
         FROM parents p
         LEFT JOIN files f ON p.parent_id = f.id
         WHERE f.id IS NULL",
    )?;
    let missing_parents = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<(String, String)>>>()?;

    let mut stmt = conn.prepare(
        "SELECT p.parent_id, p.child_id
         FROM parents p
         LEFT JOIN files f ON p.child_id = f.id
         WHERE f.id IS NULL",
    )?;
    let missing_children = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<(String, String)>>>()?;

    let mut stmt = conn.prepare(
        "SELECT f.id, f.name, f.mime_type
         FROM files f
         LEFT JOIN parents p ON f.id = p.child_id
         WHERE p.child_id IS NULL AND f.removed = 0 AND f.trashed = 0",
    )?;
    let rootless_files = stmt
        .query_map([], |row| {
            Ok(RootlessFile { id: row.get(0)?, name: row.get(1)?, mime_type: row.get(2)? })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(DanglingEdgeReport { missing_parents, missing_children, rootless_files })
}

/// Live shortcuts whose target is absent or tombstoned.
pub fn check_unresolved_shortcuts(conn: &Connection) -> Result<ShortcutReport> {
    let resolution = queries::resolve_shortcuts(conn)?;
    Ok(ShortcutReport {
        unresolved: resolution.unresolved,
        resolved_count: resolution.resolved.len(),
    })
}

/// DFS over folder-only edges with a recursion stack; every back-edge is
/// reported as a cycle chain.
pub fn check_folder_cycles(conn: &Connection) -> Result<CycleReport> {
    let mut stmt = conn.prepare(
        "SELECT id FROM files
         WHERE mime_type = ?1 AND removed = 0 AND trashed = 0",
    )?;
    let folder_ids = stmt
        .query_map([FOLDER_MIME], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<HashSet<String>>>()?;

    let mut children_map: HashMap<String, Vec<String>> = HashMap::new();
    let mut stmt = conn.prepare("SELECT parent_id, child_id FROM parents")?;
    let edges = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for edge in edges {
        let (parent, child) = edge?;
        if folder_ids.contains(&parent) && folder_ids.contains(&child) {
            children_map.entry(parent).or_default().push(child);
        }
    }

    fn dfs(
        node: &str,
        children_map: &HashMap<String, Vec<String>>,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
        cycles: &mut Vec<Vec<String>>,
    ) -> bool {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(children) = children_map.get(node) {
            for child in children {
                if !visited.contains(child) {
                    if dfs(child, children_map, visited, rec_stack, path, cycles) {
                        return true;
                    }
                } else if rec_stack.contains(child) {
                    let start = path.iter().position(|n| n == child).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].to_vec();
                    cycle.push(child.clone());
                    cycles.push(cycle);
                    return true;
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        false
    }

    let mut cycles = Vec::new();
    let mut visited = HashSet::new();
    let mut sorted_ids: Vec<&String> = folder_ids.iter().collect();
    sorted_ids.sort();
    for folder_id in sorted_ids {
        if !visited.contains(folder_id) {
            let mut rec_stack = HashSet::new();
            let mut path = Vec::new();
            dfs(folder_id, &children_map, &mut visited, &mut rec_stack, &mut path, &mut cycles);
        }
    }

    Ok(CycleReport { cycles })
}

/// Totals by `(trashed, removed)`, folder/file split, shortcut count,
/// Google-native vs binary, size sum, md5 coverage, ownership, edge count.
pub fn collect_stats(conn: &Connection) -> Result<IndexStats> {
    let count = |sql: &str| -> Result<i64> {
        Ok(conn.query_row(sql, [], |row| row.get(0))?)
    };

    let total_files = count("SELECT COUNT(*) FROM files WHERE removed = 0")?;
    let trashed_files = count("SELECT COUNT(*) FROM files WHERE removed = 0 AND trashed = 1")?;
    let active_files = count("SELECT COUNT(*) FROM files WHERE removed = 0 AND trashed = 0")?;
    let folders = conn.query_row(
        "SELECT COUNT(*) FROM files
         WHERE removed = 0 AND trashed = 0 AND mime_type = ?1",
        [FOLDER_MIME],
        |row| row.get(0),
    )?;
    let shortcuts =
        count("SELECT COUNT(*) FROM files WHERE removed = 0 AND trashed = 0 AND is_shortcut = 1")?;
    let google_native = conn.query_row(
        "SELECT COUNT(*) FROM files
         WHERE removed = 0 AND trashed = 0
           AND mime_type LIKE ?1 AND mime_type != ?2 AND is_shortcut = 0",
        [format!("{GOOGLE_APPS_PREFIX}%"), FOLDER_MIME.to_string()],
        |row| row.get(0),
    )?;
    let binary_files = conn.query_row(
        "SELECT COUNT(*) FROM files
         WHERE removed = 0 AND trashed = 0 AND mime_type NOT LIKE ?1",
        [format!("{GOOGLE_APPS_PREFIX}%")],
        |row| row.get(0),
    )?;
    let total_size_bytes = conn.query_row(
        "SELECT SUM(COALESCE(size, 0)) FROM files WHERE removed = 0 AND trashed = 0",
        [],
        |row| row.get::<_, Option<i64>>(0),
    )?
    .unwrap_or(0);
    let with_md5 = count(
        "SELECT COUNT(*) FROM files WHERE removed = 0 AND trashed = 0 AND md5 IS NOT NULL",
    )?;
    let owned_by_me = count(
        "SELECT COUNT(*) FROM files WHERE removed = 0 AND trashed = 0 AND owned_by_me = 1",
    )?;
    let parent_edges = count("SELECT COUNT(*) FROM parents")?;
    let removed_files = count("SELECT COUNT(*) FROM files WHERE removed = 1")?;

    Ok(IndexStats {
        total_files,
        active_files,
        trashed_files,
        removed_files,
        folders,
        files: active_files - folders,
        shortcuts,
        google_native,
        binary_files,
        total_size_bytes,
        with_md5,
        owned_by_me,
        parent_edges,
    })
}

// ---------------------------------------------------------------------------
// Combined run
// ---------------------------------------------------------------------------

/// Run every check and fold the results into one report.
pub fn run_all_health_checks(index: &IndexStore) -> HealthReport {
    let mut report = HealthReport { passed: true, ..Default::default() };

    let outcome = (|| -> Result<()> {
        let conn = index.connect()?;
        report.stats = collect_stats(&conn)?;

        report.dangling_edges = check_dangling_edges(&conn)?;
        if !report.dangling_edges.missing_parents.is_empty() {
            report.warnings.push(format!(
                "Found {} edges with missing parents",
                report.dangling_edges.missing_parents.len()
            ));
        }
        if !report.dangling_edges.missing_children.is_empty() {
            report.warnings.push(format!(
                "Found {} edges with missing children",
                report.dangling_edges.missing_children.len()
            ));
        }

        report.shortcuts = check_unresolved_shortcuts(&conn)?;
        if !report.shortcuts.unresolved.is_empty() {
            report.warnings.push(format!(
                "Found {} shortcuts with missing targets",
                report.shortcuts.unresolved.len()
            ));
        }

        report.cycles = check_folder_cycles(&conn)?;
        if report.cycles.has_cycles() {
            report.errors.push(format!(
                "Found {} cycle(s) in folder structure",
                report.cycles.cycles.len()
            ));
            report.passed = false;
        }

        report.mime_types = queries::mime_breakdown(&conn)?;
        Ok(())
    })();

    if let Err(e) = outcome {
        report.errors.push(format!("Health check failed: {e}"));
        report.passed = false;
    }

    info!(
        passed = report.passed,
        warnings = report.warnings.len(),
        errors = report.errors.len(),
        files = report.stats.total_files,
        "Health checks complete"
    );
    report
}

/// Format a report as an aligned human-readable summary block.
pub fn format_health_summary(report: &HealthReport) -> String {
    let mut lines = Vec::new();
    lines.push("=".repeat(60));
    lines.push("DRIVE INDEX HEALTH CHECK".to_string());
    lines.push("=".repeat(60));
    lines.push(if report.passed { "Status: PASSED".to_string() } else { "Status: FAILED".to_string() });
    lines.push(String::new());

    let s = &report.stats;
    lines.push("Statistics:".to_string());
    lines.push(format!("  Total files:     {}", s.total_files));
    lines.push(format!("  Active files:    {}", s.active_files));
    lines.push(format!("  Folders:         {}", s.folders));
    lines.push(format!("  Files:           {}", s.files));
    lines.push(format!("  Shortcuts:       {}", s.shortcuts));
    lines.push(format!("  Google native:   {}", s.google_native));
    lines.push(format!("  Binary files:    {}", s.binary_files));
    lines.push(format!(
        "  Total size:      {:.2} GB",
        s.total_size_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    ));
    lines.push(format!("  With MD5:        {}", s.with_md5));
    lines.push(format!("  Owned by me:     {}", s.owned_by_me));
    lines.push(format!("  Parent edges:    {}", s.parent_edges));
    lines.push(String::new());

    if !report.warnings.is_empty() {
        lines.push("Warnings:".to_string());
        for warning in &report.warnings {
            lines.push(format!("  ! {warning}"));
        }
        lines.push(String::new());
    }
    if !report.errors.is_empty() {
        lines.push("Errors:".to_string());
        for error in &report.errors {
            lines.push(format!("  x {error}"));
        }
        lines.push(String::new());
    }

    lines.push("=".repeat(60));
    lines.join("\n")
}
