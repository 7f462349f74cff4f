//! Scan log parsers
//!
//! A parser turns one raw line of a filesystem scan log into a normalized
//! [`LogEntry`]. Each supported format is one implementation of
//! [`LogParser`]; the importer picks one per run, either by name
//! (`--format`) or by looking at the input file name.
//!
//! Parsers never fail hard: a malformed or unrecognized line yields `None`
//! and is counted by the caller as a skipped line.

mod gpfs;
mod lustre;
mod posix;

pub use gpfs::GpfsParser;
pub use lustre::LustreParser;
pub use posix::PosixParser;

use crate::error::ConfigError;
use crate::paths;
use std::path::Path;

/// One file or directory from a scan log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Normalized absolute path
    pub path: String,

    /// True for directories
    pub is_dir: bool,

    /// Logical size in bytes
    pub size_bytes: u64,

    /// Bytes actually allocated on disk
    pub allocated_bytes: u64,

    pub owner_uid: u32,

    /// Group owner; some GPFS policy outputs omit it
    pub owner_gid: Option<u32>,

    /// Last access time (Unix seconds)
    pub access_time: Option<i64>,
}

impl LogEntry {
    /// Directory that lists this entry, `None` for the scan root
    pub fn parent_path(&self) -> Option<&str> {
        paths::parent_of(&self.path)
    }

    /// Deepest directory implied by this entry: itself for directories,
    /// its parent for files
    pub fn containing_dir(&self) -> Option<&str> {
        if self.is_dir {
            Some(&self.path)
        } else {
            self.parent_path()
        }
    }
}

/// Format-specific line parser
pub trait LogParser: Send + Sync {
    /// Short identifier used with `--format`
    fn format_name(&self) -> &'static str;

    /// Whether this parser recognizes a scan log by its file name
    fn can_parse(&self, file_name: &str) -> bool;

    /// Parse one line; `None` means skip
    fn parse_line(&self, line: &str) -> Option<LogEntry>;
}

/// Parsers in detection order
fn registry() -> Vec<Box<dyn LogParser>> {
    vec![
        Box::new(GpfsParser::new()),
        Box::new(LustreParser::new()),
        Box::new(PosixParser::new()),
    ]
}

/// Names accepted by `--format`
pub fn available_formats() -> Vec<&'static str> {
    registry().iter().map(|p| p.format_name()).collect()
}

/// Parser for an explicit format name
pub fn parser_for_format(name: &str) -> Result<Box<dyn LogParser>, ConfigError> {
    let wanted = name.trim().to_ascii_lowercase();
    registry()
        .into_iter()
        .find(|p| p.format_name() == wanted)
        .ok_or_else(|| ConfigError::UnknownFormat {
            format: name.to_string(),
            available: available_formats().join(", "),
        })
}

/// First parser whose file-name detection matches the given log
pub fn detect_parser(path: &Path) -> Option<Box<dyn LogParser>> {
    let file_name = path.file_name()?.to_string_lossy();
    registry().into_iter().find(|p| p.can_parse(&file_name))
}

/// Pick the parser for a run: explicit format wins, else detection
pub fn select_parser(format: Option<&str>, input: &Path) -> Result<Box<dyn LogParser>, ConfigError> {
    match format {
        Some(name) => parser_for_format(name),
        None => detect_parser(input).ok_or_else(|| ConfigError::UndetectedFormat {
            path: input.to_path_buf(),
        }),
    }
}

/// Mode bits of a directory in `st_mode`
const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;

/// Directory test on an octal `st_mode` string such as `40755` or `0100644`
pub(crate) fn octal_mode_is_dir(mode: &str) -> Option<bool> {
    let mode = u32::from_str_radix(mode.trim(), 8).ok()?;
    Some(mode & S_IFMT == S_IFDIR)
}
