//! Database schema definitions and creation
//!
//! This module defines the SQLite schema for the hierarchical scan summary
//! and provides functions to create and configure the database.

use crate::error::DbResult;
use rusqlite::Connection;

/// Current schema version for migrations
pub const SCHEMA_VERSION: u32 = 1;

/// Directory tree, one row per directory
/// Note: ids are assigned by the importer in (depth, path) order, so a
/// parent always has a smaller id than its children.
const CREATE_DIRECTORIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS directories (
    dir_id INTEGER PRIMARY KEY,
    parent_id INTEGER,            -- NULL only for the scan root
    name TEXT NOT NULL,
    depth INTEGER NOT NULL,

    FOREIGN KEY (parent_id) REFERENCES directories(dir_id)
)
"#;

/// Per-directory statistics
/// Owner columns: -1 = no files seen, NULL = several owners, else the id.
const CREATE_DIRECTORY_STATS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS directory_stats (
    dir_id INTEGER PRIMARY KEY,

    file_count_nr INTEGER NOT NULL DEFAULT 0,
    dir_count_nr INTEGER NOT NULL DEFAULT 0,
    total_size_nr INTEGER NOT NULL DEFAULT 0,
    max_atime_nr INTEGER,         -- Unix timestamp
    owner_uid_nr INTEGER DEFAULT -1,
    owner_gid_nr INTEGER DEFAULT -1,

    file_count_r INTEGER NOT NULL DEFAULT 0,
    dir_count_r INTEGER NOT NULL DEFAULT 0,
    total_size_r INTEGER NOT NULL DEFAULT 0,
    max_atime_r INTEGER,
    owner_uid_r INTEGER DEFAULT -1,
    owner_gid_r INTEGER DEFAULT -1,

    FOREIGN KEY (dir_id) REFERENCES directories(dir_id)
)
"#;

/// Sparse per-owner histograms; kind is 'atime' or 'size'
const CREATE_OWNER_HISTOGRAM_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS owner_histogram (
    owner_uid INTEGER NOT NULL,
    kind TEXT NOT NULL,
    bucket_index INTEGER NOT NULL,
    file_count INTEGER NOT NULL,
    total_size INTEGER NOT NULL,

    PRIMARY KEY (owner_uid, kind, bucket_index)
) WITHOUT ROWID
"#;

/// Exact per-group totals
const CREATE_GROUP_USAGE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS group_usage (
    owner_gid INTEGER PRIMARY KEY,
    file_count INTEGER NOT NULL,
    total_size INTEGER NOT NULL
)
"#;

const CREATE_USER_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS user_info (
    uid INTEGER PRIMARY KEY,
    username TEXT,                -- NULL when the uid could not be resolved
    full_name TEXT
)
"#;

const CREATE_GROUP_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS group_info (
    gid INTEGER PRIMARY KEY,
    groupname TEXT
)
"#;

const CREATE_OWNER_SUMMARY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS owner_summary (
    owner_uid INTEGER PRIMARY KEY,
    total_size INTEGER NOT NULL,
    total_files INTEGER NOT NULL,
    directory_count INTEGER NOT NULL
)
"#;

const CREATE_GROUP_SUMMARY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS group_summary (
    owner_gid INTEGER PRIMARY KEY,
    total_size INTEGER NOT NULL,
    total_files INTEGER NOT NULL,
    directory_count INTEGER NOT NULL
)
"#;

/// Provenance of a completed import; absent for partial imports
const CREATE_SCAN_METADATA_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS scan_metadata (
    scan_id INTEGER PRIMARY KEY,
    source_file TEXT NOT NULL,
    filesystem TEXT NOT NULL,
    scan_timestamp TEXT,          -- ISO 8601, from the log file name
    import_timestamp TEXT NOT NULL,
    parser_format TEXT NOT NULL,
    worker_count INTEGER NOT NULL,
    total_directories INTEGER NOT NULL,
    total_files INTEGER NOT NULL,
    total_size INTEGER NOT NULL,
    lines_read INTEGER NOT NULL,
    skipped_lines INTEGER NOT NULL,
    unresolved_entries INTEGER NOT NULL
)
"#;

/// SQL to create import metadata table
const CREATE_IMPORT_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS import_info (
    key TEXT PRIMARY KEY,
    value TEXT
)
"#;

/// Indexes needed by the bottom-up aggregation (created after Pass 1)
const CREATE_HIERARCHY_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_directories_parent ON directories(parent_id)",
    "CREATE INDEX IF NOT EXISTS idx_directories_depth ON directories(depth)",
];

/// Indexes for common queries (created once all statistics are final)
const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_stats_owner_uid ON directory_stats(owner_uid_r)",
    "CREATE INDEX IF NOT EXISTS idx_stats_owner_gid ON directory_stats(owner_gid_r)",
    "CREATE INDEX IF NOT EXISTS idx_stats_size ON directory_stats(total_size_r)",
    "CREATE INDEX IF NOT EXISTS idx_stats_atime ON directory_stats(max_atime_r)",
    "CREATE INDEX IF NOT EXISTS idx_directories_name ON directories(name)",
];

/// SQLite pragmas for optimal write performance
const WRITE_PRAGMAS: &[&str] = &[
    "PRAGMA journal_mode = WAL",
    "PRAGMA synchronous = OFF",
    "PRAGMA cache_size = -128000",   // 128MB cache
    "PRAGMA temp_store = MEMORY",
    "PRAGMA mmap_size = 536870912",  // 512MB mmap
    "PRAGMA locking_mode = EXCLUSIVE",
    "PRAGMA wal_autocheckpoint = 10000",
];

/// SQLite pragmas for read-optimized queries (applied after the import)
const READ_PRAGMAS: &[&str] = &["PRAGMA synchronous = FULL", "PRAGMA locking_mode = NORMAL"];

/// Run pragmas one by one; several of them report their new value as a row
fn apply_pragmas(conn: &Connection, pragmas: &[&str]) -> DbResult<()> {
    for sql in pragmas {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        while rows.next()?.is_some() {}
    }
    Ok(())
}

/// Create and configure a new database for writing
pub fn create_database(conn: &Connection) -> DbResult<()> {
    apply_pragmas(conn, WRITE_PRAGMAS)?;

    conn.execute(CREATE_DIRECTORIES_TABLE, [])?;
    conn.execute(CREATE_DIRECTORY_STATS_TABLE, [])?;
    conn.execute(CREATE_OWNER_HISTOGRAM_TABLE, [])?;
    conn.execute(CREATE_GROUP_USAGE_TABLE, [])?;
    conn.execute(CREATE_USER_INFO_TABLE, [])?;
    conn.execute(CREATE_GROUP_INFO_TABLE, [])?;
    conn.execute(CREATE_OWNER_SUMMARY_TABLE, [])?;
    conn.execute(CREATE_GROUP_SUMMARY_TABLE, [])?;
    conn.execute(CREATE_SCAN_METADATA_TABLE, [])?;
    conn.execute(CREATE_IMPORT_INFO_TABLE, [])?;

    Ok(())
}

/// Indexes the per-level aggregation queries rely on
pub fn create_hierarchy_indexes(conn: &Connection) -> DbResult<()> {
    for sql in CREATE_HIERARCHY_INDEXES {
        conn.execute(sql, [])?;
    }
    Ok(())
}

/// Create query indexes (called after aggregation for better update performance)
pub fn create_indexes(conn: &Connection) -> DbResult<()> {
    for sql in CREATE_INDEXES {
        conn.execute(sql, [])?;
    }
    Ok(())
}

/// Apply read-optimized settings
pub fn optimize_for_reads(conn: &Connection) -> DbResult<()> {
    apply_pragmas(conn, READ_PRAGMAS)?;

    // Run ANALYZE to update statistics for query planner
    conn.execute("ANALYZE", [])?;

    Ok(())
}

/// Store import metadata
pub fn set_import_info(conn: &Connection, key: &str, value: &str) -> DbResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO import_info (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

/// Get import metadata
pub fn get_import_info(conn: &Connection, key: &str) -> DbResult<Option<String>> {
    let result = conn.query_row(
        "SELECT value FROM import_info WHERE key = ?1",
        [key],
        |row| row.get(0),
    );

    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Metadata keys used by the importer
pub mod keys {
    /// Scan log that was imported
    pub const SOURCE_FILE: &str = "source_file";

    /// Parser format used
    pub const FORMAT: &str = "format";

    /// Timestamp when import started (ISO 8601)
    pub const START_TIME: &str = "start_time";

    /// Timestamp when import completed (ISO 8601)
    pub const END_TIME: &str = "end_time";

    /// Total duration in seconds
    pub const DURATION_SECS: &str = "duration_secs";

    /// Number of worker threads used
    pub const WORKER_COUNT: &str = "worker_count";

    /// Schema version
    pub const SCHEMA_VERSION: &str = "schema_version";

    /// Importer version
    pub const IMPORTER_VERSION: &str = "importer_version";

    /// Import status: "running", "completed", "interrupted", "failed"
    pub const STATUS: &str = "status";
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_create_database() {
        let conn = Connection::open_in_memory().unwrap();
        create_database(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for expected in [
            "directories",
            "directory_stats",
            "group_info",
            "group_summary",
            "group_usage",
            "import_info",
            "owner_histogram",
            "owner_summary",
            "scan_metadata",
            "user_info",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[test]
    fn test_stats_defaults_are_unseen() {
        let conn = Connection::open_in_memory().unwrap();
        create_database(&conn).unwrap();
        conn.execute(
            "INSERT INTO directories (dir_id, parent_id, name, depth) VALUES (1, NULL, '/', 0)",
            [],
        )
        .unwrap();
        conn.execute("INSERT INTO directory_stats (dir_id) VALUES (1)", [])
            .unwrap();

        let (uid_nr, uid_r, atime): (i64, i64, Option<i64>) = conn
            .query_row(
                "SELECT owner_uid_nr, owner_uid_r, max_atime_r FROM directory_stats",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!((uid_nr, uid_r, atime), (-1, -1, None));
    }

    #[test]
    fn test_import_info() {
        let conn = Connection::open_in_memory().unwrap();
        create_database(&conn).unwrap();

        set_import_info(&conn, keys::STATUS, "running").unwrap();
        set_import_info(&conn, keys::STATUS, "completed").unwrap();

        let value = get_import_info(&conn, keys::STATUS).unwrap();
        assert_eq!(value, Some("completed".to_string()));

        let missing = get_import_info(&conn, "nonexistent").unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_create_indexes() {
        let conn = Connection::open_in_memory().unwrap();
        create_database(&conn).unwrap();
        create_hierarchy_indexes(&conn).unwrap();
        create_indexes(&conn).unwrap();
        optimize_for_reads(&conn).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 7);
    }
}
