//! Configuration types for fs-scan-importer
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Scan provenance derived from the log file name

use crate::error::ConfigError;
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Maximum reasonable worker count
const MAX_WORKERS: usize = 256;

/// Lines per pipeline batch
const MIN_BATCH_LINES: usize = 1_000;
const MAX_BATCH_LINES: usize = 1_000_000;
const DEFAULT_BATCH_LINES: usize = 50_000;

/// Directories pending before a Pass 2a flush
const MIN_BATCH_SIZE: usize = 100;
const MAX_BATCH_SIZE: usize = 1_000_000;
const DEFAULT_BATCH_SIZE: usize = 10_000;

const MAX_QUEUE_FACTOR: usize = 64;
const DEFAULT_QUEUE_FACTOR: usize = 4;

/// `YYYYMMDD_<server>_<filesystem>.list`
static FILESYSTEM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{8}_[^_]+_([^.]+)\.list").expect("Invalid filesystem regex")
});

/// `YYYYMMDD_` prefix of a scan log name
static SCAN_DATE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{8})_").expect("Invalid scan date regex"));

/// Multi-pass importer for filesystem scan logs
#[derive(Parser, Debug, Clone)]
#[command(
    name = "fs-scan-importer",
    version,
    about = "Import a filesystem scan log into a hierarchical SQLite summary",
    long_about = "Reads a GPFS policy-engine list, a Lustre scan or a POSIX JSON-lines log and \
                  builds per-directory statistics (direct and recursive), per-owner histograms \
                  and owner/group summaries in an SQLite database.\n\n\
                  The log is read twice; memory stays proportional to the number of directories.",
    after_help = "EXAMPLES:\n    \
        fs-scan-importer 20240115_csfs1_asp.list\n    \
        fs-scan-importer 20240115_csfs1_asp.list.gz -w 16 --replace\n    \
        fs-scan-importer scan.jsonl -F posix -f home --scan-date 2024-01-15\n    \
        FS_SCAN_DB=/tmp/asp.db fs-scan-importer 20240115_csfs1_asp.list"
)]
pub struct CliArgs {
    /// Scan log to import (plain text or .gz)
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Log format (detected from the file name when omitted)
    #[arg(short = 'F', long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Output database file
    #[arg(long, env = "FS_SCAN_DB", value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Directory holding one database per filesystem
    #[arg(long, env = "FS_SCAN_DATA_DIR", default_value = "./data", value_name = "DIR")]
    pub data_dir: PathBuf,

    /// Filesystem name (derived from the log file name when omitted)
    #[arg(short = 'f', long, value_name = "NAME")]
    pub filesystem: Option<String>,

    /// Number of parser worker threads
    #[arg(short = 'w', long, default_value_t = default_workers(), value_name = "NUM")]
    pub workers: usize,

    /// Log lines per pipeline batch
    #[arg(long, default_value_t = DEFAULT_BATCH_LINES, value_name = "NUM")]
    pub batch_lines: usize,

    /// Pending directories before statistics are flushed
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, value_name = "NUM")]
    pub batch_size: usize,

    /// Queued batches per worker
    #[arg(long, default_value_t = DEFAULT_QUEUE_FACTOR, value_name = "NUM")]
    pub queue_factor: usize,

    /// Scan date used for access-age buckets (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub scan_date: Option<String>,

    /// Overwrite an existing database
    #[arg(long)]
    pub replace: bool,

    /// Do not resolve uids and gids to names
    #[arg(long)]
    pub skip_identity: bool,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

pub fn default_workers() -> usize {
    num_cpus::get().clamp(1, MAX_WORKERS)
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Scan log path
    pub input_path: PathBuf,

    /// Explicit log format, if any
    pub format: Option<String>,

    /// Output database path
    pub output_path: PathBuf,

    /// Filesystem the scan describes
    pub filesystem: String,

    /// Scan date, midnight UTC
    pub scan_date: Option<DateTime<Utc>>,

    /// Number of worker threads
    pub worker_count: usize,

    /// Lines per pipeline batch
    pub batch_lines: usize,

    /// Directories per Pass 2a flush
    pub flush_batch_size: usize,

    /// Queue capacity per worker
    pub queue_factor: usize,

    /// Overwrite an existing database
    pub replace: bool,

    /// Skip uid/gid name lookups
    pub skip_identity: bool,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl ImportConfig {
    /// Configuration with default tuning, scan date taken from the file name
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, filesystem: &str) -> Self {
        let input_path = input.into();
        let scan_date = extract_scan_date(&input_path);
        Self {
            input_path,
            format: None,
            output_path: output.into(),
            filesystem: filesystem.to_string(),
            scan_date,
            worker_count: 1,
            batch_lines: DEFAULT_BATCH_LINES,
            flush_batch_size: DEFAULT_BATCH_SIZE,
            queue_factor: DEFAULT_QUEUE_FACTOR,
            replace: false,
            skip_identity: true,
            show_progress: false,
            verbose: false,
        }
    }

    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if !args.input.is_file() {
            return Err(ConfigError::InputNotFound { path: args.input });
        }

        if args.workers == 0 || args.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: args.workers,
                max: MAX_WORKERS,
            });
        }

        if !(MIN_BATCH_LINES..=MAX_BATCH_LINES).contains(&args.batch_lines) {
            return Err(ConfigError::InvalidBatchLines {
                size: args.batch_lines,
                min: MIN_BATCH_LINES,
                max: MAX_BATCH_LINES,
            });
        }

        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&args.batch_size) {
            return Err(ConfigError::InvalidBatchSize {
                size: args.batch_size,
                min: MIN_BATCH_SIZE,
                max: MAX_BATCH_SIZE,
            });
        }

        if args.queue_factor == 0 || args.queue_factor > MAX_QUEUE_FACTOR {
            return Err(ConfigError::InvalidQueueFactor {
                factor: args.queue_factor,
                max: MAX_QUEUE_FACTOR,
            });
        }

        let scan_date = match args.scan_date.as_deref() {
            Some(value) => Some(parse_scan_date(value)?),
            None => extract_scan_date(&args.input),
        };

        let filesystem = match args.filesystem.or_else(|| extract_filesystem(&args.input)) {
            Some(fs) => fs,
            // An explicit database does not need the name, but provenance does
            None if args.db.is_some() => file_stem(&args.input),
            None => {
                return Err(ConfigError::MissingFilesystem { path: args.input });
            }
        };

        let output_path = resolve_db_path(args.db, &args.data_dir, &filesystem);
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ConfigError::InvalidOutputPath {
                    path: output_path.clone(),
                    reason: format!("Parent directory '{}' does not exist", parent.display()),
                });
            }
        }

        Ok(Self {
            input_path: args.input,
            format: args.format,
            output_path,
            filesystem,
            scan_date,
            worker_count: args.workers,
            batch_lines: args.batch_lines,
            flush_batch_size: args.batch_size,
            queue_factor: args.queue_factor,
            replace: args.replace,
            skip_identity: args.skip_identity,
            show_progress: !args.quiet,
            verbose: args.verbose,
        })
    }

    /// Scan date as Unix seconds, the reference point of access-age buckets
    pub fn scan_time(&self) -> Option<i64> {
        self.scan_date.map(|d| d.timestamp())
    }
}

/// `--db` (or `FS_SCAN_DB`, folded in by clap) wins over `<data-dir>/<fs>.db`
pub fn resolve_db_path(explicit: Option<PathBuf>, data_dir: &Path, filesystem: &str) -> PathBuf {
    explicit.unwrap_or_else(|| data_dir.join(format!("{}.db", filesystem.to_lowercase())))
}

/// Filesystem name from a `YYYYMMDD_<server>_<fs>.list` file name
pub fn extract_filesystem(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    FILESYSTEM_REGEX
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Scan date from the `YYYYMMDD_` file name prefix
pub fn extract_scan_date(path: &Path) -> Option<DateTime<Utc>> {
    let name = path.file_name()?.to_str()?;
    let digits = SCAN_DATE_REGEX.captures(name)?.get(1)?.as_str();
    NaiveDate::parse_from_str(digits, "%Y%m%d")
        .ok()
        .and_then(midnight_utc)
}

fn parse_scan_date(value: &str) -> Result<DateTime<Utc>, ConfigError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(midnight_utc)
        .ok_or_else(|| ConfigError::InvalidScanDate {
            value: value.to_string(),
        })
}

fn midnight_utc(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
}

fn file_stem(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .filter(|s| !s.is_empty())
        .unwrap_or("scan")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn args_for(input: &Path) -> CliArgs {
        CliArgs::parse_from(["fs-scan-importer", input.to_str().unwrap(), "-w", "4"])
    }

    #[test]
    fn test_extract_from_file_name() {
        let path = Path::new("/logs/20240115_csfs1_asp.list.gz");
        assert_eq!(extract_filesystem(path).as_deref(), Some("asp"));

        let date = extract_scan_date(path).unwrap();
        assert_eq!(date.to_rfc3339(), "2024-01-15T00:00:00+00:00");

        assert_eq!(extract_filesystem(Path::new("scan.jsonl")), None);
        assert_eq!(extract_scan_date(Path::new("scan.jsonl")), None);
        // Eight digits that are not a date
        assert_eq!(extract_scan_date(Path::new("20241399_x_y.list")), None);
    }

    #[test]
    fn test_db_path_precedence() {
        let data = Path::new("/data");
        assert_eq!(resolve_db_path(None, data, "ASP"), PathBuf::from("/data/asp.db"));
        assert_eq!(
            resolve_db_path(Some(PathBuf::from("/tmp/x.db")), data, "asp"),
            PathBuf::from("/tmp/x.db")
        );
    }

    #[test]
    fn test_from_args_derives_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("20240115_csfs1_asp.list");
        File::create(&input).unwrap();

        let mut args = args_for(&input);
        args.data_dir = dir.path().to_path_buf();
        args.db = None;
        let config = ImportConfig::from_args(args).unwrap();

        assert_eq!(config.filesystem, "asp");
        assert_eq!(config.output_path, dir.path().join("asp.db"));
        assert_eq!(config.worker_count, 4);
        assert!(config.scan_time().is_some());
        assert!(config.show_progress);
    }

    #[test]
    fn test_from_args_validation() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("20240115_csfs1_asp.list");
        File::create(&input).unwrap();

        let mut args = args_for(&input);
        args.data_dir = dir.path().to_path_buf();
        args.workers = 0;
        assert!(matches!(
            ImportConfig::from_args(args.clone()),
            Err(ConfigError::InvalidWorkerCount { .. })
        ));

        args.workers = 2;
        args.batch_lines = 10;
        assert!(matches!(
            ImportConfig::from_args(args.clone()),
            Err(ConfigError::InvalidBatchLines { .. })
        ));

        args.batch_lines = DEFAULT_BATCH_LINES;
        args.scan_date = Some("15/01/2024".into());
        assert!(matches!(
            ImportConfig::from_args(args.clone()),
            Err(ConfigError::InvalidScanDate { .. })
        ));

        args.scan_date = None;
        args.input = dir.path().join("missing.list");
        assert!(matches!(
            ImportConfig::from_args(args),
            Err(ConfigError::InputNotFound { .. })
        ));
    }

    #[test]
    fn test_filesystem_required_without_db() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("scan.jsonl");
        File::create(&input).unwrap();

        let mut args = args_for(&input);
        args.data_dir = dir.path().to_path_buf();
        args.db = None;
        assert!(matches!(
            ImportConfig::from_args(args.clone()),
            Err(ConfigError::MissingFilesystem { .. })
        ));

        args.db = Some(dir.path().join("out.db"));
        let config = ImportConfig::from_args(args).unwrap();
        assert_eq!(config.filesystem, "scan");
        assert_eq!(config.scan_date, None);
    }

    #[test]
    fn test_explicit_scan_date() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("20240115_csfs1_asp.list");
        File::create(&input).unwrap();

        let mut args = args_for(&input);
        args.data_dir = dir.path().to_path_buf();
        args.scan_date = Some("2023-06-01".into());
        let config = ImportConfig::from_args(args).unwrap();
        assert_eq!(config.scan_date.unwrap().to_rfc3339(), "2023-06-01T00:00:00+00:00");
    }
}
