//! Pass 3: identities, owner/group rollups and scan provenance
//!
//! Runs only on data already persisted by Passes 2a and 2b.
//!
//! Owner and group totals come from the exact per-file accounting of Pass
//! 2a (the size histogram and `group_usage`), never from summing recursive
//! directory totals, so nested directories are not counted twice.
//! `directory_count` counts the *maximal* single-owner directories of an
//! owner: directories whose subtree belongs entirely to that owner while
//! their parent's subtree does not.

use crate::db::ScanStore;
use crate::error::Result;
use crate::identity::{IdentityCache, IdentityResolver};
use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::{debug, info};

const DISTINCT_UIDS_SQL: &str = r#"
SELECT owner_uid FROM owner_histogram
UNION
SELECT owner_uid_r FROM directory_stats WHERE owner_uid_r >= 0
UNION
SELECT owner_uid_nr FROM directory_stats WHERE owner_uid_nr >= 0
ORDER BY 1
"#;

const DISTINCT_GIDS_SQL: &str = r#"
SELECT owner_gid FROM group_usage
UNION
SELECT owner_gid_r FROM directory_stats WHERE owner_gid_r >= 0
UNION
SELECT owner_gid_nr FROM directory_stats WHERE owner_gid_nr >= 0
ORDER BY 1
"#;

const OWNER_SUMMARY_SQL: &str = r#"
WITH totals AS (
    SELECT owner_uid, SUM(file_count) AS total_files, SUM(total_size) AS total_size
    FROM owner_histogram
    WHERE kind = 'size'
    GROUP BY owner_uid
),
maximal AS (
    SELECT s.owner_uid_r AS owner_uid, COUNT(*) AS directory_count
    FROM directory_stats s
    JOIN directories d ON d.dir_id = s.dir_id
    LEFT JOIN directory_stats p ON p.dir_id = d.parent_id
    WHERE s.owner_uid_r >= 0
      AND (p.dir_id IS NULL OR p.owner_uid_r IS NULL OR p.owner_uid_r != s.owner_uid_r)
    GROUP BY s.owner_uid_r
)
INSERT INTO owner_summary (owner_uid, total_size, total_files, directory_count)
SELECT t.owner_uid, t.total_size, t.total_files, COALESCE(m.directory_count, 0)
FROM totals t
LEFT JOIN maximal m ON m.owner_uid = t.owner_uid
"#;

const GROUP_SUMMARY_SQL: &str = r#"
WITH maximal AS (
    SELECT s.owner_gid_r AS owner_gid, COUNT(*) AS directory_count
    FROM directory_stats s
    JOIN directories d ON d.dir_id = s.dir_id
    LEFT JOIN directory_stats p ON p.dir_id = d.parent_id
    WHERE s.owner_gid_r >= 0
      AND (p.dir_id IS NULL OR p.owner_gid_r IS NULL OR p.owner_gid_r != s.owner_gid_r)
    GROUP BY s.owner_gid_r
)
INSERT INTO group_summary (owner_gid, total_size, total_files, directory_count)
SELECT g.owner_gid, g.total_size, g.file_count, COALESCE(m.directory_count, 0)
FROM group_usage g
LEFT JOIN maximal m ON m.owner_gid = g.owner_gid
"#;

/// Everything about the run that ends up in `scan_metadata`
#[derive(Debug, Clone)]
pub struct ScanProvenance {
    pub source_file: String,
    pub filesystem: String,
    /// Scan date from the log file name or the command line
    pub scan_timestamp: Option<DateTime<Utc>>,
    pub parser_format: String,
    pub worker_count: usize,
    pub lines_read: u64,
    pub skipped_lines: u64,
    pub unresolved_entries: u64,
}

/// Totals of a finished Pass 3
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryTotals {
    pub users: usize,
    pub groups: usize,
    pub unresolved_identities: usize,
    pub total_directories: u64,
    pub total_files: u64,
    pub total_size: u64,
}

pub fn build_summaries(
    store: &mut ScanStore,
    resolver: &dyn IdentityResolver,
    provenance: &ScanProvenance,
) -> Result<SummaryTotals> {
    let mut totals = SummaryTotals::default();
    let mut identities = IdentityCache::new(resolver);

    resolve_identities(store, &mut identities, &mut totals)?;
    totals.unresolved_identities = identities.unresolved();
    info!(
        users = totals.users,
        groups = totals.groups,
        unresolved = totals.unresolved_identities,
        "Resolved identities"
    );

    {
        let tx = store.conn_mut().transaction()?;
        tx.execute("DELETE FROM owner_summary", [])?;
        tx.execute("DELETE FROM group_summary", [])?;
        let owners = tx.execute(OWNER_SUMMARY_SQL, [])?;
        let groups = tx.execute(GROUP_SUMMARY_SQL, [])?;
        tx.commit()?;
        debug!(owners, groups, "Owner and group summaries written");
    }

    record_scan_metadata(store, provenance, &mut totals)?;
    Ok(totals)
}

fn resolve_identities(
    store: &mut ScanStore,
    identities: &mut IdentityCache<'_>,
    totals: &mut SummaryTotals,
) -> Result<()> {
    let uids: Vec<u32> = query_ids(store, DISTINCT_UIDS_SQL)?;
    let gids: Vec<u32> = query_ids(store, DISTINCT_GIDS_SQL)?;

    let tx = store.conn_mut().transaction()?;
    {
        let mut user_stmt = tx.prepare_cached(
            "INSERT OR REPLACE INTO user_info (uid, username, full_name) VALUES (?1, ?2, ?3)",
        )?;
        for uid in &uids {
            let user = identities.user(*uid);
            user_stmt.execute(params![
                uid,
                user.map(|u| u.username.as_str()),
                user.and_then(|u| u.full_name.as_deref()),
            ])?;
        }

        let mut group_stmt =
            tx.prepare_cached("INSERT OR REPLACE INTO group_info (gid, groupname) VALUES (?1, ?2)")?;
        for gid in &gids {
            group_stmt.execute(params![gid, identities.group(*gid)])?;
        }
    }
    tx.commit()?;

    totals.users = uids.len();
    totals.groups = gids.len();
    Ok(())
}

fn query_ids(store: &ScanStore, sql: &str) -> Result<Vec<u32>> {
    let mut stmt = store.conn().prepare(sql)?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<u32>>>()?;
    Ok(ids)
}

fn record_scan_metadata(
    store: &ScanStore,
    provenance: &ScanProvenance,
    totals: &mut SummaryTotals,
) -> Result<()> {
    let conn = store.conn();

    let total_directories: i64 =
        conn.query_row("SELECT COUNT(*) FROM directories", [], |row| row.get(0))?;
    let (total_files, total_size): (i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(s.file_count_r), 0), COALESCE(SUM(s.total_size_r), 0)
         FROM directories d JOIN directory_stats s ON s.dir_id = d.dir_id
         WHERE d.parent_id IS NULL",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    conn.execute(
        "INSERT INTO scan_metadata (
            source_file, filesystem, scan_timestamp, import_timestamp, parser_format,
            worker_count, total_directories, total_files, total_size,
            lines_read, skipped_lines, unresolved_entries
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            provenance.source_file,
            provenance.filesystem,
            provenance.scan_timestamp.map(|t| t.to_rfc3339()),
            Utc::now().to_rfc3339(),
            provenance.parser_format,
            provenance.worker_count as i64,
            total_directories,
            total_files,
            total_size,
            provenance.lines_read as i64,
            provenance.skipped_lines as i64,
            provenance.unresolved_entries as i64,
        ],
    )?;

    totals.total_directories = total_directories as u64;
    totals.total_files = total_files as u64;
    totals.total_size = total_size as u64;
    info!(
        source = %provenance.source_file,
        directories = total_directories,
        files = total_files,
        "Recorded scan metadata"
    );
    Ok(())
}
