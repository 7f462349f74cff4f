//! Pass 2a: non-recursive statistics and owner histograms
//!
//! The log is streamed a second time. Each worker reduces its batch to
//! per-directory deltas, keyed by the parent's `dir_id` looked up in the
//! read-only [`DirectoryIndex`], plus per-owner histograms and per-group
//! totals. The dispatcher merges those into pending maps and flushes the
//! directory deltas to the store whenever enough directories are pending.
//!
//! Every merge here is associative and commutative, and so is the SQL that
//! applies a delta to a row, so neither batch order nor flush timing can
//! change the result.

use crate::db::ScanStore;
use crate::error::Result;
use crate::hierarchy::DirectoryIndex;
use crate::histogram::{self, merge_histograms, OwnerHistogram};
use crate::owner::OwnerState;
use crate::parser::{LogEntry, LogParser};
use crate::pipeline::{BatchWorker, LineBatch};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Change to one directory's non-recursive statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NrDelta {
    pub file_count: u64,
    pub dir_count: u64,
    pub total_size: u64,
    pub max_atime: Option<i64>,
    pub owner_uid: OwnerState,
    pub owner_gid: OwnerState,
}

impl NrDelta {
    /// Account one file listed directly in the directory
    pub fn record_file(&mut self, entry: &LogEntry) {
        self.file_count += 1;
        self.total_size += entry.allocated_bytes;
        if let Some(atime) = entry.access_time.filter(|&t| t > 0) {
            self.max_atime = Some(self.max_atime.map_or(atime, |cur| cur.max(atime)));
        }
        self.owner_uid.observe(entry.owner_uid);
        if let Some(gid) = entry.owner_gid {
            self.owner_gid.observe(gid);
        }
    }

    /// Account one subdirectory listed directly in the directory
    pub fn record_dir(&mut self) {
        self.dir_count += 1;
    }

    pub fn merge(&mut self, other: &NrDelta) {
        self.file_count += other.file_count;
        self.dir_count += other.dir_count;
        self.total_size += other.total_size;
        self.max_atime = match (self.max_atime, other.max_atime) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.owner_uid = self.owner_uid.merge(other.owner_uid);
        self.owner_gid = self.owner_gid.merge(other.owner_gid);
    }
}

/// Files and allocated bytes of one group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupUsage {
    pub file_count: u64,
    pub total_size: u64,
}

impl GroupUsage {
    fn merge(&mut self, other: &GroupUsage) {
        self.file_count += other.file_count;
        self.total_size += other.total_size;
    }
}

/// Worker output of Pass 2a
#[derive(Debug, Default)]
pub struct AccumulatedBatch {
    pub dirs: HashMap<u32, NrDelta>,
    pub owners: HashMap<u32, OwnerHistogram>,
    pub groups: HashMap<u32, GroupUsage>,
    pub lines: u64,
    pub files: u64,
    pub directories: u64,
    pub skipped: u64,
    /// Entries whose parent directory is not in the index
    pub unresolved: u64,
}

/// Pass 2a batch processing
pub struct AccumulateWorker {
    parser: Arc<dyn LogParser>,
    index: Arc<DirectoryIndex>,
    scan_time: Option<i64>,
}

impl AccumulateWorker {
    pub fn new(parser: Arc<dyn LogParser>, index: Arc<DirectoryIndex>, scan_time: Option<i64>) -> Self {
        Self {
            parser,
            index,
            scan_time,
        }
    }

    fn account(&self, entry: &LogEntry, out: &mut AccumulatedBatch) {
        if entry.is_dir {
            out.directories += 1;
        } else {
            out.files += 1;
            let atime_bucket = histogram::classify_atime(
                entry.access_time.filter(|&t| t > 0),
                self.scan_time,
            );
            let size_bucket = histogram::classify_size(entry.allocated_bytes);
            out.owners
                .entry(entry.owner_uid)
                .or_default()
                .record(atime_bucket, size_bucket, entry.allocated_bytes);
            if let Some(gid) = entry.owner_gid {
                let usage = out.groups.entry(gid).or_default();
                usage.file_count += 1;
                usage.total_size += entry.allocated_bytes;
            }
        }

        // The scan root has no parent to account it in
        let Some(parent) = entry.parent_path() else {
            return;
        };
        let Some(parent_id) = self.index.get(parent) else {
            out.unresolved += 1;
            return;
        };

        let delta = out.dirs.entry(parent_id).or_default();
        if entry.is_dir {
            delta.record_dir();
        } else {
            delta.record_file(entry);
        }
    }
}

impl BatchWorker for AccumulateWorker {
    type Output = AccumulatedBatch;

    fn process(&self, batch: LineBatch) -> AccumulatedBatch {
        let mut out = AccumulatedBatch {
            lines: batch.lines.len() as u64,
            ..AccumulatedBatch::default()
        };

        for line in &batch.lines {
            match self.parser.parse_line(line) {
                Some(entry) => self.account(&entry, &mut out),
                None => out.skipped += 1,
            }
        }
        out
    }
}

/// Totals of a finished Pass 2a
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccumulationSummary {
    pub lines: u64,
    pub files: u64,
    pub directories: u64,
    pub skipped: u64,
    pub unresolved: u64,
    pub flushes: u64,
}

/// Dispatcher-side merge state of Pass 2a
pub struct NonRecursiveAccumulator {
    pending: HashMap<u32, NrDelta>,
    owners: HashMap<u32, OwnerHistogram>,
    groups: HashMap<u32, GroupUsage>,
    flush_threshold: usize,
    summary: AccumulationSummary,
}

impl NonRecursiveAccumulator {
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            pending: HashMap::new(),
            owners: HashMap::new(),
            groups: HashMap::new(),
            flush_threshold: flush_threshold.max(1),
            summary: AccumulationSummary::default(),
        }
    }

    /// Merge one worker output, flushing directory deltas when due
    pub fn absorb(&mut self, batch: AccumulatedBatch, store: &mut ScanStore) -> Result<()> {
        self.summary.lines += batch.lines;
        self.summary.files += batch.files;
        self.summary.directories += batch.directories;
        self.summary.skipped += batch.skipped;
        self.summary.unresolved += batch.unresolved;

        for (dir_id, delta) in batch.dirs {
            self.pending.entry(dir_id).or_default().merge(&delta);
        }
        merge_histograms(&mut self.owners, batch.owners);
        for (gid, usage) in batch.groups {
            self.groups.entry(gid).or_default().merge(&usage);
        }

        if self.pending.len() >= self.flush_threshold {
            self.flush(store)?;
        }
        Ok(())
    }

    pub fn summary(&self) -> &AccumulationSummary {
        &self.summary
    }

    fn flush(&mut self, store: &mut ScanStore) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut deltas: Vec<(u32, NrDelta)> = self.pending.drain().collect();
        deltas.sort_unstable_by_key(|(dir_id, _)| *dir_id);
        store.apply_nr_deltas(&deltas)?;
        self.summary.flushes += 1;
        Ok(())
    }

    /// Flush everything still pending, including histograms and group totals
    pub fn finish(mut self, store: &mut ScanStore) -> Result<AccumulationSummary> {
        self.flush(store)?;
        store.merge_owner_histograms(&self.owners)?;
        store.merge_group_usage(&self.groups)?;
        debug!(
            owners = self.owners.len(),
            groups = self.groups.len(),
            flushes = self.summary.flushes,
            "Non-recursive accumulation flushed"
        );
        Ok(self.summary)
    }
}
