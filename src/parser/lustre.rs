//! Lustre scan log parser
//!
//! Pipe-delimited records as produced by `lfs find` / robinhood exports:
//!
//! ```text
//! path|size|allocated|uid|gid|mode|atime|mtime|ctime
//! /lustre/scratch/u1/out.dat|2000000|2097152|1000|100|100644|1705314600|1705314600|1705314600
//! ```
//!
//! `mode` is the octal `st_mode`, times are Unix seconds and `allocated` is
//! in bytes. Paths may themselves contain `|`, so records are split from the
//! right. Lines starting with `#` are comments.

use super::{octal_mode_is_dir, LogEntry, LogParser};
use crate::paths;

const FIELD_COUNT: usize = 9;

#[derive(Debug, Default)]
pub struct LustreParser;

impl LustreParser {
    pub fn new() -> Self {
        Self
    }
}

impl LogParser for LustreParser {
    fn format_name(&self) -> &'static str {
        "lustre"
    }

    fn can_parse(&self, file_name: &str) -> bool {
        file_name.starts_with("lustre_scan") || file_name.contains(".lustre")
    }

    fn parse_line(&self, line: &str) -> Option<LogEntry> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        // rsplitn yields fields right to left; the path comes out last
        let mut fields: Vec<&str> = line.rsplitn(FIELD_COUNT, '|').collect();
        if fields.len() != FIELD_COUNT {
            return None;
        }
        fields.reverse();

        let path = paths::normalize(fields[0])?;
        let size_bytes: u64 = fields[1].trim().parse().ok()?;
        let allocated_bytes: u64 = fields[2].trim().parse().unwrap_or(size_bytes);
        let owner_uid: u32 = fields[3].trim().parse().ok()?;
        let owner_gid: Option<u32> = fields[4].trim().parse().ok();
        let is_dir = octal_mode_is_dir(fields[5])?;
        let access_time = fields[6].trim().parse::<i64>().ok().filter(|&t| t > 0);

        Some(LogEntry {
            path,
            is_dir,
            size_bytes,
            allocated_bytes,
            owner_uid,
            owner_gid,
            access_time,
        })
    }
}
