//! GPFS policy-engine scan log parser
//!
//! Line format:
//!
//! ```text
//! <thread> inode fileset_id snapshot key=value ... -- /path
//! <0> 123456 1 0 s=4096 a=4 u=1000 g=100 p=-rw-r--r-- ac=2024-01-15 10:30:00 -- /gpfs/asp/f.txt
//! ```
//!
//! Fields: `s=` size in bytes, `a=` allocated KiB, `u=` uid, `g=` gid,
//! `p=` permission string (leading `d` marks a directory), `ac=` access time
//! in UTC.

use super::{LogEntry, LogParser};
use crate::paths;
use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::LazyLock;

/// `<thread> inode fileset snapshot fields -- path`
static LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<\d+>\s+\d+\s+\d+\s+\d+\s+(.+?)\s+--\s+(.+)$").expect("Invalid GPFS line regex")
});

static SIZE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)s=(\d+)").expect("Invalid GPFS size regex"));

static ALLOCATED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)a=(\d+)").expect("Invalid GPFS allocated regex"));

static UID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)u=(\d+)").expect("Invalid GPFS uid regex"));

static GID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)g=(\d+)").expect("Invalid GPFS gid regex"));

static PERMISSIONS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)p=(\S+)").expect("Invalid GPFS permissions regex"));

static ATIME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)ac=(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2})")
        .expect("Invalid GPFS atime regex")
});

/// `YYYYMMDD_server_fileset.list...`
static FILE_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{8}_[^_]+_[^.]+\.list").expect("Invalid GPFS file name regex"));

/// Files at or below this size may live inside the inode with no blocks
const DATA_IN_INODE_MAX: u64 = 4096;

#[derive(Debug, Default)]
pub struct GpfsParser;

impl GpfsParser {
    pub fn new() -> Self {
        Self
    }
}

fn capture<T: std::str::FromStr>(regex: &Regex, fields: &str) -> Option<T> {
    regex.captures(fields)?.get(1)?.as_str().parse().ok()
}

fn parse_access_time(fields: &str) -> Option<i64> {
    let raw = ATIME_REGEX.captures(fields)?.get(1)?.as_str();
    // Collapse any run of whitespace between date and time
    let mut parts = raw.split_whitespace();
    let normalized = format!("{} {}", parts.next()?, parts.next()?);
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

impl LogParser for GpfsParser {
    fn format_name(&self) -> &'static str {
        "gpfs"
    }

    fn can_parse(&self, file_name: &str) -> bool {
        FILE_NAME_REGEX.is_match(file_name)
    }

    fn parse_line(&self, line: &str) -> Option<LogEntry> {
        let caps = LINE_REGEX.captures(line)?;
        let fields = caps.get(1)?.as_str();
        let path = paths::normalize(caps.get(2)?.as_str().trim_end())?;

        let permissions = PERMISSIONS_REGEX.captures(fields)?.get(1)?.as_str();
        let size_bytes: u64 = capture(&SIZE_REGEX, fields)?;
        let owner_uid: u32 = capture(&UID_REGEX, fields)?;
        let owner_gid: Option<u32> = capture(&GID_REGEX, fields);

        let allocated_kib: u64 = capture(&ALLOCATED_REGEX, fields).unwrap_or(0);
        let mut allocated_bytes = allocated_kib.saturating_mul(1024);
        if allocated_bytes == 0 && size_bytes <= DATA_IN_INODE_MAX {
            allocated_bytes = size_bytes;
        }

        Some(LogEntry {
            path,
            is_dir: permissions.starts_with('d'),
            size_bytes,
            allocated_bytes,
            owner_uid,
            owner_gid,
            access_time: parse_access_time(fields),
        })
    }
}
