//! SQLite storage for the hierarchical scan summary
//!
//! One [`ScanStore`] per import run owns the only connection. It lives on
//! the dispatcher thread, so every write in the process goes through a
//! single writer and no locking is needed around it.
//!
//! # Write pattern
//!
//! ```text
//!   Pass 1   INSERT directories + empty directory_stats, level by level
//!   Pass 2a  UPDATE directory_stats (non-recursive deltas, flushed in bulk)
//!            UPSERT owner_histogram, group_usage
//!   Pass 2b  UPDATE directory_stats ... FROM child aggregate, per depth
//!   Pass 3   INSERT user_info, group_info, owner/group summaries, scan_metadata
//! ```

pub mod schema;
pub mod writer;

pub use schema::{create_database, create_indexes, get_import_info, keys, optimize_for_reads};
pub use writer::{ScanStore, WriterStats};
