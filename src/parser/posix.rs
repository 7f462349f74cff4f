//! Generic POSIX scan log parser (JSON lines)
//!
//! One JSON object per line, as emitted by tree-walk scripts:
//!
//! ```text
//! {"path": "/home/u1/a.txt", "size": 1024, "blocks": 8, "uid": 1000, "gid": 100,
//!  "mode": "100644", "atime": "2024-01-15T10:30:00", "is_dir": false}
//! ```
//!
//! `blocks` counts 512-byte blocks. `atime` may be Unix seconds (integer or
//! fractional) or an ISO-8601 string (naive strings are taken as UTC). An
//! atime of any other shape is dropped; the record itself is kept.

use super::{octal_mode_is_dir, LogEntry, LogParser};
use crate::paths;
use chrono::{DateTime, NaiveDateTime};
use serde::de::IgnoredAny;
use serde::Deserialize;

const BLOCK_SIZE: u64 = 512;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Epoch(i64),
    Fractional(f64),
    Text(String),
    Unrecognized(IgnoredAny),
}

impl Timestamp {
    fn to_unix(&self) -> Option<i64> {
        match self {
            Timestamp::Epoch(secs) => Some(*secs),
            Timestamp::Fractional(secs) if secs.is_finite() => Some(secs.trunc() as i64),
            Timestamp::Fractional(_) | Timestamp::Unrecognized(_) => None,
            Timestamp::Text(text) => DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.timestamp())
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
                        .map(|dt| dt.and_utc().timestamp())
                })
                .ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PosixRecord {
    path: String,
    size: u64,
    #[serde(default)]
    blocks: Option<u64>,
    uid: u32,
    #[serde(default)]
    gid: Option<u32>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    atime: Option<Timestamp>,
    #[serde(default)]
    is_dir: Option<bool>,
}

#[derive(Debug, Default)]
pub struct PosixParser;

impl PosixParser {
    pub fn new() -> Self {
        Self
    }
}

impl LogParser for PosixParser {
    fn format_name(&self) -> &'static str {
        "posix"
    }

    fn can_parse(&self, file_name: &str) -> bool {
        file_name.contains(".jsonl") || file_name.contains(".ndjson") || file_name.contains(".posix")
    }

    fn parse_line(&self, line: &str) -> Option<LogEntry> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let record: PosixRecord = serde_json::from_str(line).ok()?;
        let path = paths::normalize(&record.path)?;

        let is_dir = match (record.is_dir, record.mode.as_deref()) {
            (Some(flag), _) => flag,
            (None, Some(mode)) => octal_mode_is_dir(mode)?,
            (None, None) => false,
        };

        let allocated_bytes = record
            .blocks
            .map(|b| b.saturating_mul(BLOCK_SIZE))
            .unwrap_or(record.size);

        Some(LogEntry {
            path,
            is_dir,
            size_bytes: record.size,
            allocated_bytes,
            owner_uid: record.uid,
            owner_gid: record.gid,
            access_time: record.atime.as_ref().and_then(Timestamp::to_unix).filter(|&t| t > 0),
        })
    }
}
