//! fs-scan-importer - hierarchical summaries of filesystem scan logs
//!
//! Turns a scan log of a large shared filesystem (hundreds of millions of
//! lines, one per file or directory) into an SQLite database of
//! per-directory statistics, direct and recursive, per-owner histograms
//! and owner/group rollups. Memory stays proportional to the number of
//! directories, never to the number of lines.
//!
//! # Features
//!
//! - **Several log formats**: GPFS policy-engine lists, Lustre scans and
//!   POSIX JSON lines, plain or gzip-compressed.
//!
//! - **Parallel parsing**: a reader thread, a pool of parser threads and a
//!   single writer, connected by bounded crossbeam channels.
//!
//! - **Bounded memory**: two streaming passes over the log; recursive
//!   totals are folded in SQL one depth level at a time.
//!
//! - **Deterministic output**: directory ids and every statistic are the
//!   same for any worker count.
//!
//! # Architecture
//!
//! ```text
//!                   ┌──────────────────────────┐
//!                   │    Scan log (.list/.gz)  │
//!                   └────────────┬─────────────┘
//!                                │ read twice
//!            ┌───────────────────┴───────────────────┐
//!            ▼                                       ▼
//! ┌─────────────────────┐                 ┌─────────────────────┐
//! │ Pass 1  hierarchy   │   DirectoryIndex│ Pass 2a  non-       │
//! │ discover + insert   │────────────────►│ recursive stats,    │
//! │ level by level      │  path -> dir_id │ owner histograms    │
//! └─────────┬───────────┘                 └─────────┬───────────┘
//!           │                                       │
//!           ▼                                       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SQLite store                         │
//! │  directories  directory_stats  owner_histogram  group_usage │
//! └─────────┬───────────────────────────────────────┬───────────┘
//!           │                                       │
//!           ▼                                       ▼
//! ┌─────────────────────┐                 ┌─────────────────────┐
//! │ Pass 2b  recursive  │                 │ Pass 3  identities, │
//! │ fold, deepest first │────────────────►│ summaries, metadata │
//! └─────────────────────┘                 └─────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Import a GPFS list; filesystem and scan date come from the file name
//! fs-scan-importer 20240115_csfs1_asp.list
//!
//! # Largest directories owned by a single user
//! sqlite3 data/asp.db "SELECT d.name, s.total_size_r FROM directories d
//!     JOIN directory_stats s USING (dir_id)
//!     WHERE s.owner_uid_r = 1000 ORDER BY s.total_size_r DESC LIMIT 10"
//! ```

pub mod accumulate;
pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod hierarchy;
pub mod histogram;
pub mod identity;
pub mod importer;
pub mod owner;
pub mod parser;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod summary;

pub use config::{CliArgs, ImportConfig};
pub use error::{ImportError, Result};
pub use importer::{ImportResult, Importer};
pub use owner::OwnerState;
pub use parser::{LogEntry, LogParser};
