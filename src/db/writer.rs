//! The scan store: the one SQLite connection of an import run
//!
//! `ScanStore` is created once per run and owned by the dispatcher thread,
//! which makes it the single writer. Every write is batched into explicit
//! transactions with cached prepared statements.
//!
//! # Performance Characteristics
//!
//! - Directory rows inserted in chunked transactions
//! - Statistic deltas applied as in-place `UPDATE`s, one per touched directory
//!   per flush, never one per log line
//! - WAL mode with synchronous=OFF while importing

use crate::accumulate::{GroupUsage, NrDelta};
use crate::db::schema::{self, keys};
use crate::error::{DbError, DbResult};
use crate::hierarchy::DirectoryRow;
use crate::histogram::{HistogramKind, OwnerHistogram};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Fold an incoming owner state (`?N`) into an owner column
macro_rules! owner_merge_sql {
    ($col:literal, $param:literal) => {
        concat!(
            "CASE WHEN ", $param, " = -1 THEN ", $col,
            " WHEN ", $col, " = -1 THEN ", $param,
            " WHEN ", $col, " IS NULL OR ", $param, " IS NULL THEN NULL",
            " WHEN ", $col, " = ", $param, " THEN ", $col,
            " ELSE NULL END"
        )
    };
}

const APPLY_NR_DELTA_SQL: &str = concat!(
    "UPDATE directory_stats SET ",
    "file_count_nr = file_count_nr + ?2, ",
    "dir_count_nr = dir_count_nr + ?3, ",
    "total_size_nr = total_size_nr + ?4, ",
    "max_atime_nr = CASE WHEN ?5 IS NULL THEN max_atime_nr ",
    "WHEN max_atime_nr IS NULL OR ?5 > max_atime_nr THEN ?5 ",
    "ELSE max_atime_nr END, ",
    "owner_uid_nr = ",
    owner_merge_sql!("owner_uid_nr", "?6"),
    ", owner_gid_nr = ",
    owner_merge_sql!("owner_gid_nr", "?7"),
    " WHERE dir_id = ?1"
);

const UPSERT_HISTOGRAM_SQL: &str = r#"
INSERT INTO owner_histogram (owner_uid, kind, bucket_index, file_count, total_size)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT (owner_uid, kind, bucket_index) DO UPDATE SET
    file_count = file_count + excluded.file_count,
    total_size = total_size + excluded.total_size
"#;

const UPSERT_GROUP_USAGE_SQL: &str = r#"
INSERT INTO group_usage (owner_gid, file_count, total_size)
VALUES (?1, ?2, ?3)
ON CONFLICT (owner_gid) DO UPDATE SET
    file_count = file_count + excluded.file_count,
    total_size = total_size + excluded.total_size
"#;

/// Statistics about write operations
#[derive(Debug, Default, Clone)]
pub struct WriterStats {
    /// Directory rows inserted
    pub directories_written: u64,

    /// Non-recursive deltas applied
    pub deltas_applied: u64,

    /// Histogram bucket rows upserted
    pub histogram_rows: u64,

    /// Total transactions committed
    pub batches_committed: u64,
}

/// Owned connection to the output database
pub struct ScanStore {
    conn: Connection,
    stats: WriterStats,
}

impl ScanStore {
    /// Create the output database
    ///
    /// An existing database is only removed when `replace` is set.
    pub fn create(path: &Path, replace: bool) -> DbResult<Self> {
        if path.exists() {
            if !replace {
                return Err(DbError::AlreadyExists {
                    path: path.to_path_buf(),
                });
            }
            remove_database_files(path)?;
            info!(path = %path.display(), "Replaced existing database");
        }

        let conn = Connection::open(path).map_err(|e| DbError::CreateFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        schema::create_database(&conn)?;
        schema::set_import_info(&conn, keys::SCHEMA_VERSION, &schema::SCHEMA_VERSION.to_string())?;
        schema::set_import_info(&conn, keys::IMPORTER_VERSION, env!("CARGO_PKG_VERSION"))?;

        Ok(Self {
            conn,
            stats: WriterStats::default(),
        })
    }

    /// In-memory store, mostly for tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::create_database(&conn)?;
        Ok(Self {
            conn,
            stats: WriterStats::default(),
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    pub fn set_info(&self, key: &str, value: &str) -> DbResult<()> {
        schema::set_import_info(&self.conn, key, value)
    }

    /// Insert directory rows with empty statistics, `chunk_size` per transaction
    pub fn insert_directories(&mut self, rows: &[DirectoryRow], chunk_size: usize) -> DbResult<()> {
        for chunk in rows.chunks(chunk_size.max(1)) {
            let tx = self.conn.transaction()?;
            {
                let mut dir_stmt = tx.prepare_cached(
                    "INSERT INTO directories (dir_id, parent_id, name, depth) VALUES (?1, ?2, ?3, ?4)",
                )?;
                let mut stats_stmt =
                    tx.prepare_cached("INSERT INTO directory_stats (dir_id) VALUES (?1)")?;

                for row in chunk {
                    dir_stmt.execute(params![row.dir_id, row.parent_id, row.name, row.depth])?;
                    stats_stmt.execute([row.dir_id])?;
                }
            }
            tx.commit()?;
            self.stats.directories_written += chunk.len() as u64;
            self.stats.batches_committed += 1;
        }
        Ok(())
    }

    /// Add non-recursive deltas to their directories in one transaction
    pub fn apply_nr_deltas(&mut self, deltas: &[(u32, NrDelta)]) -> DbResult<()> {
        if deltas.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(APPLY_NR_DELTA_SQL)?;
            for (dir_id, delta) in deltas {
                let changed = stmt.execute(params![
                    dir_id,
                    delta.file_count as i64,
                    delta.dir_count as i64,
                    delta.total_size as i64,
                    delta.max_atime,
                    delta.owner_uid,
                    delta.owner_gid,
                ])?;
                if changed != 1 {
                    return Err(DbError::Schema(format!(
                        "no statistics row for directory {}",
                        dir_id
                    )));
                }
            }
        }
        tx.commit()?;

        self.stats.deltas_applied += deltas.len() as u64;
        self.stats.batches_committed += 1;
        debug!(directories = deltas.len(), "Flushed non-recursive deltas");
        Ok(())
    }

    /// Add histogram counts, storing only non-empty buckets
    pub fn merge_owner_histograms(&mut self, histograms: &HashMap<u32, OwnerHistogram>) -> DbResult<()> {
        let mut owners: Vec<_> = histograms.keys().copied().collect();
        owners.sort_unstable();

        let tx = self.conn.transaction()?;
        let mut rows = 0u64;
        {
            let mut stmt = tx.prepare_cached(UPSERT_HISTOGRAM_SQL)?;
            for uid in owners {
                let histogram = &histograms[&uid];
                for kind in HistogramKind::ALL {
                    for (index, files, bytes) in histogram.buckets(kind).non_empty() {
                        stmt.execute(params![uid, kind.as_str(), index as i64, files as i64, bytes as i64])?;
                        rows += 1;
                    }
                }
            }
        }
        tx.commit()?;

        self.stats.histogram_rows += rows;
        self.stats.batches_committed += 1;
        Ok(())
    }

    /// Add per-group totals
    pub fn merge_group_usage(&mut self, usage: &HashMap<u32, GroupUsage>) -> DbResult<()> {
        let mut groups: Vec<_> = usage.keys().copied().collect();
        groups.sort_unstable();

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_GROUP_USAGE_SQL)?;
            for gid in groups {
                let totals = &usage[&gid];
                stmt.execute(params![gid, totals.file_count as i64, totals.total_size as i64])?;
            }
        }
        tx.commit()?;
        self.stats.batches_committed += 1;
        Ok(())
    }

    /// Build query indexes and switch to read-optimized settings
    pub fn finalize(&self) -> DbResult<()> {
        schema::create_indexes(&self.conn)?;
        schema::optimize_for_reads(&self.conn)?;
        Ok(())
    }
}

/// Remove a database together with its WAL side files
fn remove_database_files(path: &Path) -> DbResult<()> {
    let remove = |p: &Path| -> DbResult<()> {
        match fs::remove_file(p) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DbError::CreateFailed {
                path: p.to_path_buf(),
                reason: format!("cannot remove existing file: {}", e),
            }),
        }
    };

    remove(path)?;
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        remove(Path::new(&side))?;
    }
    Ok(())
}
