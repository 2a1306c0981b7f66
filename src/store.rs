//! SQLite persistence layer for the metadata index.
//!
//! Normalized columns plus the raw JSON payload per file, a parent/child
//! edge table for the containment DAG, a key/value sync-state table, and an
//! append-only error log. WAL journaling so readers run concurrently with
//! the single writer job.
//!
//! Mutation functions take a `&Connection` so they compose with explicit
//! transactions: the crawl and sync engines batch them under
//! `Connection::transaction()` and commit at batch boundaries.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::Result;
use crate::types::{now_iso, DriveFile, FOLDER_MIME, SHORTCUT_MIME};

/// Bumped on any breaking schema change.
pub const SCHEMA_VERSION: i64 = 1;

// ---------------------------------------------------------------------------
// Store handle (lifecycle)
// ---------------------------------------------------------------------------

/// Cheap handle to the on-disk store; opens one connection per caller.
/// Worker jobs each open their own connection on their own thread.
#[derive(Debug, Clone)]
pub struct IndexStore {
    db_path: PathBuf,
}

impl IndexStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self { db_path: db_path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Open a configured connection: WAL journal, foreign keys, 30s busy
    /// timeout. Creates the parent directory if needed.
    pub fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    /// Create tables and indexes. Idempotent; records the schema version.
    pub fn init(&self) -> Result<()> {
        let conn = self.connect()?;
        init_schema(&conn)?;
        Ok(())
    }

    /// True once the store file exists and carries a schema version.
    pub fn exists(&self) -> bool {
        if !self.db_path.exists() {
            return false;
        }
        match self.connect() {
            Ok(conn) => get_sync_state(&conn, "schema_version").ok().flatten().is_some(),
            Err(_) => false,
        }
    }

    /// Truncate all data, preserving `schema_version`.
    pub fn clear(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM parents", [])?;
        conn.execute("DELETE FROM files", [])?;
        conn.execute("DELETE FROM file_errors", [])?;
        conn.execute("DELETE FROM sync_state WHERE key != 'schema_version'", [])?;
        info!("Index cleared");
        Ok(())
    }
}

/// Create tables and indexes if they don't exist, then record the schema
/// version. Safe to call repeatedly.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            name TEXT,
            mime_type TEXT,
            trashed INTEGER NOT NULL DEFAULT 0,
            created_time TEXT,
            modified_time TEXT,
            size INTEGER,
            md5 TEXT,
            owned_by_me INTEGER,
            owners_json TEXT,
            capabilities_json TEXT,
            is_shortcut INTEGER NOT NULL DEFAULT 0,
            shortcut_target_id TEXT,
            shortcut_target_mime TEXT,
            starred INTEGER,
            web_view_link TEXT,
            icon_link TEXT,
            raw_json TEXT NOT NULL,
            removed INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS parents (
            parent_id TEXT NOT NULL,
            child_id TEXT NOT NULL,
            PRIMARY KEY(parent_id, child_id)
        );
        CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS file_errors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id TEXT,
            stage TEXT,
            error TEXT,
            created_time TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_files_md5_size ON files(md5, size);
        CREATE INDEX IF NOT EXISTS idx_files_mime ON files(mime_type);
        CREATE INDEX IF NOT EXISTS idx_files_modified ON files(modified_time);
        CREATE INDEX IF NOT EXISTS idx_files_trashed ON files(trashed);
        CREATE INDEX IF NOT EXISTS idx_files_removed ON files(removed);
        CREATE INDEX IF NOT EXISTS idx_parents_parent ON parents(parent_id);
        CREATE INDEX IF NOT EXISTS idx_parents_child ON parents(child_id);",
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO sync_state (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION.to_string()],
    )?;
    info!(schema_version = SCHEMA_VERSION, "Store initialized");
    Ok(())
}

// ---------------------------------------------------------------------------
// Row type
// ---------------------------------------------------------------------------

/// A normalized file row as stored. `raw` retains the original remote
/// payload verbatim.
#[derive(Debug, Clone)]
pub struct FileRow {
    pub id: String,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub trashed: bool,
    pub created_time: Option<String>,
    pub modified_time: Option<String>,
    pub size: Option<i64>,
    pub md5: Option<String>,
    pub owned_by_me: bool,
    pub is_shortcut: bool,
    pub shortcut_target_id: Option<String>,
    pub shortcut_target_mime: Option<String>,
    pub starred: bool,
    pub web_view_link: Option<String>,
    pub icon_link: Option<String>,
    pub raw_json: String,
    pub removed: bool,
}

impl FileRow {
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME)
    }

    /// Rehydrate the original wire record from the retained raw payload.
    pub fn to_drive_file(&self) -> Result<DriveFile> {
        Ok(serde_json::from_str(&self.raw_json)?)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(FileRow {
            id: row.get("id")?,
            name: row.get("name")?,
            mime_type: row.get("mime_type")?,
            trashed: row.get::<_, i64>("trashed")? != 0,
            created_time: row.get("created_time")?,
            modified_time: row.get("modified_time")?,
            size: row.get("size")?,
            md5: row.get("md5")?,
            owned_by_me: row.get::<_, Option<i64>>("owned_by_me")?.unwrap_or(0) != 0,
            is_shortcut: row.get::<_, i64>("is_shortcut")? != 0,
            shortcut_target_id: row.get("shortcut_target_id")?,
            shortcut_target_mime: row.get("shortcut_target_mime")?,
            starred: row.get::<_, Option<i64>>("starred")?.unwrap_or(0) != 0,
            web_view_link: row.get("web_view_link")?,
            icon_link: row.get("icon_link")?,
            raw_json: row.get("raw_json")?,
            removed: row.get::<_, i64>("removed")? != 0,
        })
    }
}

const SELECT_COLUMNS: &str = "id, name, mime_type, trashed, created_time, modified_time, \
size, md5, owned_by_me, is_shortcut, shortcut_target_id, shortcut_target_mime, \
starred, web_view_link, icon_link, raw_json, removed";

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// Insert or update a record by id, clearing the tombstone on reinsertion.
/// A record without an id is a no-op.
pub fn upsert_file(conn: &Connection, file: &DriveFile) -> Result<()> {
    if file.id.is_empty() {
        return Ok(());
    }

    let mime_type = file.mime_type.clone().unwrap_or_default();
    let is_shortcut = mime_type == SHORTCUT_MIME;
    let (target_id, target_mime) = match &file.shortcut_details {
        Some(details) => (details.target_id.clone(), details.target_mime_type.clone()),
        None => (None, None),
    };
    let owners_json = file.owners.as_ref().map(serde_json::to_string).transpose()?;
    let capabilities_json = file.capabilities.as_ref().map(serde_json::to_string).transpose()?;
    let raw_json = serde_json::to_string(file)?;

    conn.execute(
        "INSERT INTO files (
            id, name, mime_type, trashed, created_time, modified_time,
            size, md5, owned_by_me, owners_json, capabilities_json,
            is_shortcut, shortcut_target_id, shortcut_target_mime,
            starred, web_view_link, icon_link, raw_json, removed
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, 0)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            mime_type = excluded.mime_type,
            trashed = excluded.trashed,
            created_time = excluded.created_time,
            modified_time = excluded.modified_time,
            size = excluded.size,
            md5 = excluded.md5,
            owned_by_me = excluded.owned_by_me,
            owners_json = excluded.owners_json,
            capabilities_json = excluded.capabilities_json,
            is_shortcut = excluded.is_shortcut,
            shortcut_target_id = excluded.shortcut_target_id,
            shortcut_target_mime = excluded.shortcut_target_mime,
            starred = excluded.starred,
            web_view_link = excluded.web_view_link,
            icon_link = excluded.icon_link,
            raw_json = excluded.raw_json,
            removed = 0",
        params![
            file.id,
            file.name,
            mime_type,
            file.trashed.unwrap_or(false) as i64,
            file.created_time,
            file.modified_time,
            file.size,
            file.md5_checksum,
            file.owned_by_me.unwrap_or(false) as i64,
            owners_json,
            capabilities_json,
            is_shortcut as i64,
            target_id,
            target_mime,
            file.starred.unwrap_or(false) as i64,
            file.web_view_link,
            file.icon_link,
            raw_json,
        ],
    )?;
    Ok(())
}

/// Replace all parent edges for a file. Handles moves: the old edge set is
/// deleted wholesale and the new set inserted.
pub fn replace_parents(conn: &Connection, child_id: &str, parent_ids: &[String]) -> Result<()> {
    conn.execute("DELETE FROM parents WHERE child_id = ?1", params![child_id])?;
    let mut stmt =
        conn.prepare_cached("INSERT OR IGNORE INTO parents (parent_id, child_id) VALUES (?1, ?2)")?;
    for parent_id in parent_ids {
        stmt.execute(params![parent_id, child_id])?;
    }
    Ok(())
}

/// Tombstone a file reported removed by the change feed. The row is
/// retained for history; all edges pointing at it as a child are dropped.
/// Idempotent against feed replay.
pub fn mark_removed(conn: &Connection, file_id: &str) -> Result<()> {
    conn.execute("UPDATE files SET removed = 1 WHERE id = ?1", params![file_id])?;
    conn.execute("DELETE FROM parents WHERE child_id = ?1", params![file_id])?;
    Ok(())
}

/// Append a per-record processing error for later inspection.
pub fn log_file_error(
    conn: &Connection,
    file_id: Option<&str>,
    stage: &str,
    error: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO file_errors (file_id, stage, error, created_time) VALUES (?1, ?2, ?3, ?4)",
        params![file_id, stage, error, now_iso()],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Sync state
// ---------------------------------------------------------------------------

pub fn get_sync_state(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM sync_state WHERE key = ?1", params![key], |row| row.get(0))
        .optional()?;
    Ok(value)
}

pub fn set_sync_state(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Fetch a live (non-removed) row by id.
pub fn get_file_by_id(conn: &Connection, file_id: &str) -> Result<Option<FileRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM files WHERE id = ?1 AND removed = 0"),
            params![file_id],
            FileRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// True if any row (live or tombstoned) exists for the id. Used by the sync
/// engine to classify a change as add vs update.
pub fn file_exists(conn: &Connection, file_id: &str) -> Result<bool> {
    let row: Option<String> = conn
        .query_row("SELECT id FROM files WHERE id = ?1", params![file_id], |row| row.get(0))
        .optional()?;
    Ok(row.is_some())
}

pub fn get_all_files(
    conn: &Connection,
    include_trashed: bool,
    include_removed: bool,
) -> Result<Vec<FileRow>> {
    let mut conditions = Vec::new();
    if !include_removed {
        conditions.push("removed = 0");
    }
    if !include_trashed {
        conditions.push("trashed = 0");
    }
    let where_clause =
        if conditions.is_empty() { "1=1".to_string() } else { conditions.join(" AND ") };

    let mut stmt =
        conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM files WHERE {where_clause}"))?;
    let rows = stmt.query_map([], FileRow::from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn get_parents(conn: &Connection, child_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare_cached("SELECT parent_id FROM parents WHERE child_id = ?1")?;
    let ids = stmt
        .query_map(params![child_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

pub fn get_children(conn: &Connection, parent_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare_cached("SELECT child_id FROM parents WHERE parent_id = ?1")?;
    let ids = stmt
        .query_map(params![parent_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

/// Count of live files, optionally including trashed ones.
pub fn file_count(conn: &Connection, include_trashed: bool) -> Result<i64> {
    let sql = if include_trashed {
        "SELECT COUNT(*) FROM files WHERE removed = 0"
    } else {
        "SELECT COUNT(*) FROM files WHERE removed = 0 AND trashed = 0"
    };
    let count = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}

pub fn edge_count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM parents", [], |row| row.get(0))?;
    Ok(count)
}

/// Count of logged per-record errors.
pub fn error_count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM file_errors", [], |row| row.get(0))?;
    Ok(count)
}
