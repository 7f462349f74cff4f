//! Integration tests for fs-scan-importer
//!
//! Each test writes a small scan log to a temporary directory, runs a full
//! import and inspects the resulting SQLite database.

use flate2::write::GzEncoder;
use flate2::Compression;
use fs_scan_importer::config::ImportConfig;
use fs_scan_importer::db::{get_import_info, keys};
use fs_scan_importer::error::{DbError, ImportError};
use fs_scan_importer::identity::StaticIdentityResolver;
use fs_scan_importer::importer::{ImportResult, Importer};
use rusqlite::types::Value;
use rusqlite::Connection;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

const LOG_NAME: &str = "20240115_csfs1_asp.list";

fn gpfs_file(path: &str, size: u64, alloc_kib: u64, uid: u32, gid: u32) -> String {
    format!(
        "<1> 100 1 0 s={} a={} u={} g={} p=-rw-r--r-- ac=2024-01-10 08:00:00 -- {}",
        size, alloc_kib, uid, gid, path
    )
}

fn gpfs_dir(path: &str) -> String {
    format!("<1> 100 1 0 s=4096 a=4 u=0 g=0 p=drwxr-xr-x ac=2024-01-10 08:00:00 -- {}", path)
}

struct Imported {
    _dir: TempDir,
    db: PathBuf,
    result: ImportResult,
}

impl Imported {
    fn conn(&self) -> Connection {
        Connection::open(&self.db).unwrap()
    }
}

fn write_log(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let input = dir.join(name);
    let mut body = lines.join("\n");
    body.push('\n');
    fs::write(&input, body).unwrap();
    input
}

fn run_import(input: &Path, db: &Path, workers: usize, batch_lines: usize) -> Result<ImportResult, ImportError> {
    let mut config = ImportConfig::new(input, db, "asp");
    config.worker_count = workers;
    config.batch_lines = batch_lines;
    config.flush_batch_size = 3;
    config.queue_factor = 2;

    let resolver = StaticIdentityResolver::new()
        .with_user(10, "alice", Some("Alice"))
        .with_group(100, "staff");
    Importer::new(config)?
        .with_identity_resolver(Box::new(resolver))
        .run()
}

fn import(lines: &[String], workers: usize, batch_lines: usize) -> Imported {
    let dir = tempdir().unwrap();
    let input = write_log(dir.path(), LOG_NAME, lines);
    let db = dir.path().join("asp.db");
    let result = run_import(&input, &db, workers, batch_lines).unwrap();
    Imported { _dir: dir, db, result }
}

/// Resolve a path to its dir_id by walking `directories` from the root
fn dir_id(conn: &Connection, path: &str) -> i64 {
    let mut id: i64 = conn
        .query_row("SELECT dir_id FROM directories WHERE parent_id IS NULL", [], |row| row.get(0))
        .unwrap();
    for name in path.split('/').filter(|s| !s.is_empty()) {
        id = conn
            .query_row(
                "SELECT dir_id FROM directories WHERE parent_id = ?1 AND name = ?2",
                rusqlite::params![id, name],
                |row| row.get(0),
            )
            .unwrap();
    }
    id
}

fn dump(conn: &Connection, sql: &str) -> Vec<Vec<Value>> {
    let mut stmt = conn.prepare(sql).unwrap();
    let columns = stmt.column_count();
    let rows = stmt
        .query_map([], |row| {
            (0..columns)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<Value>>>()
        })
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap();
    rows
}

fn scalar(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

/// Deterministic tree: 3 top-level dirs, nested projects, 4 owners
fn generated_log() -> Vec<String> {
    let mut lines = Vec::new();
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    for top in ["home", "proj", "scratch"] {
        lines.push(gpfs_dir(&format!("/{}", top)));
        for sub in 0..6 {
            let dir = format!("/{}/d{}", top, sub);
            lines.push(gpfs_dir(&dir));
            for deep in 0..3 {
                let leaf = format!("{}/n{}", dir, deep);
                if next() % 4 != 0 {
                    lines.push(gpfs_dir(&leaf));
                }
                for f in 0..(next() % 12) {
                    let r = next();
                    let uid = 10 + (r % 4) as u32;
                    let size = r % 5_000_000;
                    lines.push(gpfs_file(
                        &format!("{}/f{}", leaf, f),
                        size,
                        size.div_ceil(1024),
                        uid,
                        100 + uid % 2,
                    ));
                }
            }
        }
    }
    lines
}

#[test]
fn test_end_to_end_example() {
    let lines = vec![
        gpfs_dir("/a"),
        gpfs_dir("/a/b"),
        gpfs_file("/a/f1", 500, 0, 10, 100),
        gpfs_file("/a/b/f2", 2_000_000, 1954, 10, 100),
        gpfs_file("/a/b/f3", 50, 0, 20, 200),
    ];
    let imported = import(&lines, 1, 1_000);
    let conn = imported.conn();

    let a = dir_id(&conn, "/a");
    let b = dir_id(&conn, "/a/b");
    let stats = |id: i64| -> (i64, i64, i64, Option<i64>, Option<i64>) {
        conn.query_row(
            "SELECT file_count_nr, file_count_r, dir_count_nr, owner_uid_nr, owner_uid_r
             FROM directory_stats WHERE dir_id = ?1",
            [id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .unwrap()
    };

    assert_eq!(stats(a), (1, 3, 1, Some(10), None));
    assert_eq!(stats(b), (2, 2, 0, None, None));

    let total_a: i64 = conn
        .query_row("SELECT total_size_r FROM directory_stats WHERE dir_id = ?1", [a], |row| row.get(0))
        .unwrap();
    assert_eq!(total_a, 500 + 1954 * 1024 + 50);

    let size_buckets = dump(
        &conn,
        "SELECT owner_uid, bucket_index FROM owner_histogram WHERE kind = 'size' ORDER BY 1, 2",
    );
    assert_eq!(
        size_buckets,
        vec![
            vec![Value::Integer(10), Value::Integer(0)],
            vec![Value::Integer(10), Value::Integer(4)],
            vec![Value::Integer(20), Value::Integer(0)],
        ]
    );

    // Accessed less than a week before the scan date
    let atime_buckets = dump(
        &conn,
        "SELECT DISTINCT bucket_index FROM owner_histogram WHERE kind = 'atime'",
    );
    assert_eq!(atime_buckets, vec![vec![Value::Integer(0)]]);

    assert_eq!(imported.result.total_dirs, 3);
    assert_eq!(imported.result.total_files, 3);
}

#[test]
fn test_parallel_serial_parity() {
    let lines = generated_log();
    let serial = import(&lines, 1, 1_000);
    let parallel = import(&lines, 8, 7);

    for sql in [
        "SELECT * FROM directories ORDER BY dir_id",
        "SELECT * FROM directory_stats ORDER BY dir_id",
        "SELECT * FROM owner_histogram ORDER BY owner_uid, kind, bucket_index",
        "SELECT * FROM group_usage ORDER BY owner_gid",
        "SELECT * FROM owner_summary ORDER BY owner_uid",
        "SELECT * FROM group_summary ORDER BY owner_gid",
    ] {
        assert_eq!(dump(&serial.conn(), sql), dump(&parallel.conn(), sql), "{}", sql);
    }
}

#[test]
fn test_empty_directory() {
    let lines = vec![gpfs_dir("/a"), gpfs_dir("/a/empty"), gpfs_file("/a/f", 10, 1, 10, 100)];
    let imported = import(&lines, 1, 1_000);
    let conn = imported.conn();

    let empty = dir_id(&conn, "/a/empty");
    let row: (i64, i64, i64, Option<i64>) = conn
        .query_row(
            "SELECT file_count_nr, file_count_r, owner_uid_r, max_atime_r FROM directory_stats WHERE dir_id = ?1",
            [empty],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();
    assert_eq!(row, (0, 0, -1, None));

    // An empty child does not disturb its parent's single owner
    let owner: i64 = conn
        .query_row(
            "SELECT owner_uid_r FROM directory_stats WHERE dir_id = ?1",
            [dir_id(&conn, "/a")],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(owner, 10);
}

#[test]
fn test_sum_invariants() {
    let lines = generated_log();
    let file_lines = lines.iter().filter(|l| l.contains("p=-")).count() as i64;
    let imported = import(&lines, 4, 16);
    let conn = imported.conn();

    assert_eq!(scalar(&conn, "SELECT SUM(file_count_nr) FROM directory_stats"), file_lines);

    let violations = scalar(
        &conn,
        "SELECT COUNT(*) FROM directory_stats p
         JOIN directories d ON d.dir_id = p.dir_id
         WHERE p.file_count_r != p.file_count_nr + COALESCE((
                 SELECT SUM(c.file_count_r) FROM directory_stats c
                 JOIN directories cd ON cd.dir_id = c.dir_id WHERE cd.parent_id = d.dir_id), 0)
            OR p.total_size_r != p.total_size_nr + COALESCE((
                 SELECT SUM(c.total_size_r) FROM directory_stats c
                 JOIN directories cd ON cd.dir_id = c.dir_id WHERE cd.parent_id = d.dir_id), 0)
            OR p.dir_count_r != p.dir_count_nr + COALESCE((
                 SELECT SUM(c.dir_count_r) FROM directory_stats c
                 JOIN directories cd ON cd.dir_id = c.dir_id WHERE cd.parent_id = d.dir_id), 0)",
    );
    assert_eq!(violations, 0);

    let root_files = scalar(
        &conn,
        "SELECT s.file_count_r FROM directory_stats s JOIN directories d USING (dir_id)
         WHERE d.parent_id IS NULL",
    );
    assert_eq!(root_files, file_lines);
    assert_eq!(imported.result.total_files as i64, file_lines);
}

#[test]
fn test_owner_monotonicity() {
    let imported = import(&generated_log(), 3, 25);
    let conn = imported.conn();

    assert_eq!(
        scalar(
            &conn,
            "SELECT COUNT(*) FROM directory_stats WHERE owner_uid_nr IS NULL AND owner_uid_r IS NOT NULL"
        ),
        0
    );
    assert_eq!(
        scalar(
            &conn,
            "SELECT COUNT(*) FROM directory_stats c
             JOIN directories d ON d.dir_id = c.dir_id
             JOIN directory_stats p ON p.dir_id = d.parent_id
             WHERE c.owner_uid_r IS NULL AND p.owner_uid_r IS NOT NULL"
        ),
        0
    );
    // Four owners are spread over the whole tree
    assert_eq!(
        scalar(
            &conn,
            "SELECT COUNT(*) FROM directory_stats s JOIN directories d USING (dir_id)
             WHERE d.parent_id IS NULL AND s.owner_uid_r IS NULL"
        ),
        1
    );
}

#[test]
fn test_histogram_completeness() {
    let lines = generated_log();
    let imported = import(&lines, 2, 40);
    let conn = imported.conn();
    let files = imported.result.total_files as i64;

    for kind in ["atime", "size"] {
        let sum: i64 = conn
            .query_row(
                "SELECT SUM(file_count) FROM owner_histogram WHERE kind = ?1",
                [kind],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(sum, files, "{}", kind);
    }
    assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM owner_histogram WHERE file_count = 0"), 0);
    assert_eq!(scalar(&conn, "SELECT SUM(total_files) FROM owner_summary"), files);
    assert_eq!(scalar(&conn, "SELECT SUM(total_files) FROM group_summary"), files);
}

#[test]
fn test_duplicate_lines_do_not_duplicate_directories() {
    let lines = generated_log();
    let doubled: Vec<String> = lines.iter().flat_map(|l| [l.clone(), l.clone()]).collect();

    let once = import(&lines, 2, 50);
    let twice = import(&doubled, 2, 50);

    let sql = "SELECT * FROM directories ORDER BY dir_id";
    assert_eq!(dump(&once.conn(), sql), dump(&twice.conn(), sql));
    assert_eq!(twice.result.total_files, once.result.total_files * 2);
}

#[test]
fn test_skipped_lines_are_counted() {
    let lines = vec![
        gpfs_dir("/a"),
        "not a gpfs record".to_string(),
        gpfs_file("/a/f", 10, 1, 10, 100),
        "<1> 1 1 0 s=10 p=-rw-r--r-- -- /a/no-owner".to_string(),
        String::new(),
    ];
    let imported = import(&lines, 1, 1_000);
    let conn = imported.conn();

    let (read, skipped, unresolved): (i64, i64, i64) = conn
        .query_row(
            "SELECT lines_read, skipped_lines, unresolved_entries FROM scan_metadata",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!((read, skipped, unresolved), (5, 3, 0));
    assert_eq!(imported.result.skipped_lines, 3);
}

#[test]
fn test_identity_and_provenance() {
    let imported = import(&generated_log(), 1, 1_000);
    let conn = imported.conn();

    let alice: Option<String> = conn
        .query_row("SELECT username FROM user_info WHERE uid = 10", [], |row| row.get(0))
        .unwrap();
    assert_eq!(alice.as_deref(), Some("alice"));
    let unknown: Option<String> = conn
        .query_row("SELECT username FROM user_info WHERE uid = 11", [], |row| row.get(0))
        .unwrap();
    assert_eq!(unknown, None);

    let (source, fs_name, scan_ts, format): (String, String, String, String) = conn
        .query_row(
            "SELECT source_file, filesystem, scan_timestamp, parser_format FROM scan_metadata",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();
    assert_eq!(source, LOG_NAME);
    assert_eq!(fs_name, "asp");
    assert!(scan_ts.starts_with("2024-01-15T00:00:00"));
    assert_eq!(format, "gpfs");
    assert_eq!(get_import_info(&conn, keys::STATUS).unwrap().as_deref(), Some("completed"));
}

#[test]
fn test_replace_mode() {
    let dir = tempdir().unwrap();
    let input = write_log(dir.path(), LOG_NAME, &[gpfs_file("/a/f", 10, 1, 10, 100)]);
    let db = dir.path().join("asp.db");

    run_import(&input, &db, 1, 1_000).unwrap();
    let err = run_import(&input, &db, 1, 1_000).unwrap_err();
    assert!(matches!(err, ImportError::Database(DbError::AlreadyExists { .. })));

    let mut config = ImportConfig::new(&input, &db, "asp");
    config.replace = true;
    let result = Importer::new(config).unwrap().run().unwrap();
    assert_eq!(result.total_files, 1);

    let conn = Connection::open(&db).unwrap();
    assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM scan_metadata"), 1);
}

#[test]
fn test_gzip_input() {
    let lines = generated_log();
    let dir = tempdir().unwrap();
    let input = dir.path().join(format!("{}.gz", LOG_NAME));
    let mut encoder = GzEncoder::new(fs::File::create(&input).unwrap(), Compression::fast());
    for line in &lines {
        writeln!(encoder, "{}", line).unwrap();
    }
    encoder.finish().unwrap();

    let db = dir.path().join("gz.db");
    let from_gz = run_import(&input, &db, 2, 64).unwrap();
    let plain = import(&lines, 2, 64);

    assert_eq!(from_gz.total_files, plain.result.total_files);
    let sql = "SELECT * FROM directory_stats ORDER BY dir_id";
    assert_eq!(dump(&Connection::open(&db).unwrap(), sql), dump(&plain.conn(), sql));
}

#[test]
fn test_lustre_without_scan_date() {
    let dir = tempdir().unwrap();
    let input = write_log(
        dir.path(),
        "lustre_scan.txt",
        &[
            "# path|size|allocated|uid|gid|mode|atime|mtime|ctime".to_string(),
            "/lustre/u1|4096|4096|10|100|40755|0|0|0".to_string(),
            "/lustre/u1/a.dat|100|4096|10|100|100644|1705314600|1705314600|1705314600".to_string(),
            "/lustre/u1/b.dat|5000|8192|10|100|100644|1705314600|1705314600|1705314600".to_string(),
        ],
    );
    let db = dir.path().join("lustre.db");
    let result = run_import(&input, &db, 1, 1_000).unwrap();
    assert_eq!(result.total_files, 2);
    assert_eq!(result.total_bytes, 12_288);

    // No scan date: every file lands in the oldest access bucket
    let conn = Connection::open(&db).unwrap();
    assert_eq!(
        dump(&conn, "SELECT bucket_index, file_count FROM owner_histogram WHERE kind = 'atime'"),
        vec![vec![Value::Integer(9), Value::Integer(2)]]
    );
}
