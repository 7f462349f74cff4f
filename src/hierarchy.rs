//! Pass 1: directory hierarchy discovery and materialization
//!
//! Phase A streams the log once and records every directory the log
//! implies, explicitly (a directory line) or implicitly (the parent chain of
//! any entry), into a single `path -> depth` map.
//!
//! Phase B drains that map into a vector sorted by `(depth, path)` and
//! inserts it level by level: parents are always written and assigned an id
//! before their children, so every `parent_id` is resolved from the ids of
//! the previous level. The freshly assigned ids are written back into the
//! same map, which then becomes the `path -> dir_id` [`DirectoryIndex`] used
//! by Pass 2a. Only one full-size map exists at any point.

use crate::db::ScanStore;
use crate::error::{DbError, Result};
use crate::parser::LogParser;
use crate::paths;
use crate::pipeline::{BatchWorker, LineBatch};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A directory row ready for insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRow {
    pub dir_id: u32,
    pub parent_id: Option<u32>,
    pub name: String,
    pub depth: u32,
}

/// Worker output of Phase A
#[derive(Debug, Default)]
pub struct DiscoveredBatch {
    /// Deepest directory implied by each entry, adjacent duplicates removed
    pub dirs: Vec<String>,
    pub lines: u64,
    pub parsed: u64,
    pub skipped: u64,
}

/// Phase A batch processing
pub struct DiscoveryWorker {
    parser: Arc<dyn LogParser>,
}

impl DiscoveryWorker {
    pub fn new(parser: Arc<dyn LogParser>) -> Self {
        Self { parser }
    }
}

impl BatchWorker for DiscoveryWorker {
    type Output = DiscoveredBatch;

    fn process(&self, batch: LineBatch) -> DiscoveredBatch {
        let mut out = DiscoveredBatch {
            lines: batch.lines.len() as u64,
            ..DiscoveredBatch::default()
        };

        for line in &batch.lines {
            let Some(entry) = self.parser.parse_line(line) else {
                out.skipped += 1;
                continue;
            };
            out.parsed += 1;

            // Files of one directory tend to be listed together
            if let Some(dir) = entry.containing_dir() {
                if out.dirs.last().map(String::as_str) != Some(dir) {
                    out.dirs.push(dir.to_string());
                }
            }
        }
        out
    }
}

/// Phase A state: every discovered directory and its depth
///
/// The map is kept ancestor-closed: whenever a path is present, so are all
/// of its ancestors up to the root.
#[derive(Debug, Default)]
pub struct DirectoryDiscovery {
    paths: HashMap<String, u32>,
}

impl DirectoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a directory and all of its ancestors
    pub fn record(&mut self, dir: &str) {
        let mut current = Some(dir);
        while let Some(path) = current {
            if self.paths.contains_key(path) {
                // Ancestors are already present
                break;
            }
            self.paths.insert(path.to_string(), paths::depth_of(path));
            current = paths::parent_of(path);
        }
    }

    pub fn absorb(&mut self, batch: &DiscoveredBatch) {
        for dir in &batch.dirs {
            self.record(dir);
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Phase B: assign ids and insert all directories, parents first
    pub fn materialize(self, store: &mut ScanStore, chunk_size: usize) -> Result<DirectoryIndex> {
        let mut map = self.paths;
        let mut ordered: Vec<(u32, String)> = map.drain().map(|(path, depth)| (depth, path)).collect();
        ordered.sort_unstable();

        let mut next_id: u32 = 1;
        let mut max_depth = 0;
        let mut level_depth: Option<u32> = None;
        let mut level_rows: Vec<DirectoryRow> = Vec::new();
        let mut level_paths: Vec<String> = Vec::new();

        for (depth, path) in ordered {
            if level_depth != Some(depth) {
                flush_level(store, &mut map, &mut level_rows, &mut level_paths, chunk_size)?;
                level_depth = Some(depth);
            }

            let parent_id = match paths::parent_of(&path) {
                None => None,
                Some(parent) => Some(*map.get(parent).ok_or_else(|| {
                    DbError::Schema(format!("parent of '{}' was not materialized", path))
                })?),
            };

            level_rows.push(DirectoryRow {
                dir_id: next_id,
                parent_id,
                name: paths::name_of(&path).to_string(),
                depth,
            });
            level_paths.push(path);
            next_id += 1;
            max_depth = depth;
        }
        flush_level(store, &mut map, &mut level_rows, &mut level_paths, chunk_size)?;

        info!(
            directories = map.len(),
            max_depth,
            "Directory hierarchy materialized"
        );
        Ok(DirectoryIndex { ids: map, max_depth })
    }
}

/// Insert one depth level and publish its ids for the next level
fn flush_level(
    store: &mut ScanStore,
    map: &mut HashMap<String, u32>,
    rows: &mut Vec<DirectoryRow>,
    level_paths: &mut Vec<String>,
    chunk_size: usize,
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    store.insert_directories(rows, chunk_size)?;
    debug!(depth = rows[0].depth, directories = rows.len(), "Inserted level");

    for (path, row) in level_paths.drain(..).zip(rows.iter()) {
        map.insert(path, row.dir_id);
    }
    rows.clear();
    Ok(())
}

/// Read-only `path -> dir_id` lookup shared with Pass 2a workers
#[derive(Debug, Default)]
pub struct DirectoryIndex {
    ids: HashMap<String, u32>,
    max_depth: u32,
}

impl DirectoryIndex {
    pub fn get(&self, path: &str) -> Option<u32> {
        self.ids.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }
}
