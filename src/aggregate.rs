//! Pass 2b: bottom-up recursive aggregation
//!
//! Recursive statistics are computed entirely in SQL, one depth level at a
//! time from the deepest level up to the root. When level `d` is processed,
//! every directory at `d + 1` already holds final recursive values, so each
//! level needs exactly two statements:
//!
//! 1. seed the level's recursive columns from its non-recursive ones
//! 2. fold in the per-parent aggregate of the children at `d + 1`
//!
//! The owner fold follows the sentinel rules of [`crate::owner`]: any mixed
//! child makes the parent mixed, two distinct child owners make it mixed,
//! `-1` children contribute nothing.

use crate::db::ScanStore;
use crate::error::Result;
use std::time::Instant;
use tracing::{debug, info};

const SEED_LEVEL_SQL: &str = r#"
UPDATE directory_stats SET
    file_count_r = file_count_nr,
    dir_count_r = dir_count_nr,
    total_size_r = total_size_nr,
    max_atime_r = max_atime_nr,
    owner_uid_r = owner_uid_nr,
    owner_gid_r = owner_gid_nr
WHERE dir_id IN (SELECT dir_id FROM directories WHERE depth = ?1)
"#;

/// Fold the children of level ?1 (which sit at depth ?1 + 1) into their parents
const FOLD_CHILDREN_SQL: &str = r#"
WITH child_agg AS (
    SELECT
        d.parent_id AS parent_id,
        SUM(s.file_count_r) AS file_count,
        SUM(s.dir_count_r) AS dir_count,
        SUM(s.total_size_r) AS total_size,
        MAX(s.max_atime_r) AS max_atime,
        MAX(s.owner_uid_r IS NULL) AS uid_mixed,
        COUNT(DISTINCT CASE WHEN s.owner_uid_r >= 0 THEN s.owner_uid_r END) AS uid_distinct,
        MAX(CASE WHEN s.owner_uid_r >= 0 THEN s.owner_uid_r END) AS uid_common,
        MAX(s.owner_gid_r IS NULL) AS gid_mixed,
        COUNT(DISTINCT CASE WHEN s.owner_gid_r >= 0 THEN s.owner_gid_r END) AS gid_distinct,
        MAX(CASE WHEN s.owner_gid_r >= 0 THEN s.owner_gid_r END) AS gid_common
    FROM directories d
    JOIN directory_stats s ON s.dir_id = d.dir_id
    WHERE d.depth = ?1 + 1
    GROUP BY d.parent_id
)
UPDATE directory_stats SET
    file_count_r = directory_stats.file_count_r + child_agg.file_count,
    dir_count_r = directory_stats.dir_count_r + child_agg.dir_count,
    total_size_r = directory_stats.total_size_r + child_agg.total_size,
    max_atime_r = CASE
        WHEN child_agg.max_atime IS NULL THEN directory_stats.max_atime_r
        WHEN directory_stats.max_atime_r IS NULL
             OR child_agg.max_atime > directory_stats.max_atime_r THEN child_agg.max_atime
        ELSE directory_stats.max_atime_r
    END,
    owner_uid_r = CASE
        WHEN directory_stats.owner_uid_r IS NULL THEN NULL
        WHEN child_agg.uid_mixed = 1 OR child_agg.uid_distinct > 1 THEN NULL
        WHEN child_agg.uid_distinct = 0 THEN directory_stats.owner_uid_r
        WHEN directory_stats.owner_uid_r = -1 THEN child_agg.uid_common
        WHEN directory_stats.owner_uid_r = child_agg.uid_common THEN directory_stats.owner_uid_r
        ELSE NULL
    END,
    owner_gid_r = CASE
        WHEN directory_stats.owner_gid_r IS NULL THEN NULL
        WHEN child_agg.gid_mixed = 1 OR child_agg.gid_distinct > 1 THEN NULL
        WHEN child_agg.gid_distinct = 0 THEN directory_stats.owner_gid_r
        WHEN directory_stats.owner_gid_r = -1 THEN child_agg.gid_common
        WHEN directory_stats.owner_gid_r = child_agg.gid_common THEN directory_stats.owner_gid_r
        ELSE NULL
    END
FROM child_agg
WHERE directory_stats.dir_id = child_agg.parent_id
"#;

/// Totals of a finished Pass 2b
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregationSummary {
    pub levels: u32,
    pub parents_updated: u64,
}

/// Compute all recursive columns from the non-recursive ones
pub fn aggregate_recursive(store: &mut ScanStore) -> Result<AggregationSummary> {
    let start = Instant::now();
    let max_depth: Option<u32> = store
        .conn()
        .query_row("SELECT MAX(depth) FROM directories", [], |row| row.get(0))?;

    let Some(max_depth) = max_depth else {
        info!("No directories to aggregate");
        return Ok(AggregationSummary::default());
    };

    let mut summary = AggregationSummary::default();
    for depth in (0..=max_depth).rev() {
        let tx = store.conn_mut().transaction()?;
        let seeded = tx.execute(SEED_LEVEL_SQL, [depth])?;
        let folded = tx.execute(FOLD_CHILDREN_SQL, [depth])?;
        tx.commit()?;

        summary.levels += 1;
        summary.parents_updated += folded as u64;
        debug!(depth, seeded, folded, "Aggregated level");
    }

    info!(
        levels = summary.levels,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Recursive aggregation complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulate::NrDelta;
    use crate::hierarchy::DirectoryDiscovery;
    use crate::owner::OwnerState;

    fn store_with(paths: &[&str]) -> (ScanStore, crate::hierarchy::DirectoryIndex) {
        let mut store = ScanStore::open_in_memory().unwrap();
        let mut discovery = DirectoryDiscovery::new();
        for p in paths {
            discovery.record(p);
        }
        let index = discovery.materialize(&mut store, 100).unwrap();
        (store, index)
    }

    fn files(count: u64, size: u64, uid: u32, atime: i64) -> NrDelta {
        NrDelta {
            file_count: count,
            total_size: size,
            max_atime: Some(atime),
            owner_uid: OwnerState::Single(uid),
            owner_gid: OwnerState::Single(uid + 100),
            ..NrDelta::default()
        }
    }

    fn recursive(store: &ScanStore, dir_id: u32) -> (i64, i64, i64, Option<i64>, OwnerState, OwnerState) {
        store
            .conn()
            .query_row(
                "SELECT file_count_r, dir_count_r, total_size_r, max_atime_r, owner_uid_r, owner_gid_r
                 FROM directory_stats WHERE dir_id = ?1",
                [dir_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
            )
            .unwrap()
    }

    #[test]
    fn test_sums_and_max_atime() {
        let (mut store, index) = store_with(&["/a/b/c", "/a/d"]);
        let a = index.get("/a").unwrap();
        let b = index.get("/a/b").unwrap();
        let c = index.get("/a/b/c").unwrap();
        let d = index.get("/a/d").unwrap();

        let mut with_dirs = files(1, 10, 7, 100);
        with_dirs.dir_count = 2;
        store
            .apply_nr_deltas(&[
                (a, with_dirs),
                (c, files(3, 300, 7, 500)),
                (d, files(2, 20, 7, 50)),
            ])
            .unwrap();

        let summary = aggregate_recursive(&mut store).unwrap();
        assert_eq!(summary.levels, 4);

        assert_eq!(recursive(&store, c).0, 3);
        let (files_b, _, size_b, atime_b, uid_b, _) = recursive(&store, b);
        assert_eq!((files_b, size_b, atime_b), (3, 300, Some(500)));
        assert_eq!(uid_b, OwnerState::Single(7));

        let (files_a, dirs_a, size_a, atime_a, uid_a, gid_a) = recursive(&store, a);
        assert_eq!((files_a, dirs_a, size_a, atime_a), (6, 2, 330, Some(500)));
        assert_eq!(uid_a, OwnerState::Single(7));
        assert_eq!(gid_a, OwnerState::Single(107));

        assert_eq!(recursive(&store, index.get("/").unwrap()).0, 6);
    }

    #[test]
    fn test_owner_fold_rules() {
        let (mut store, index) = store_with(&["/p/x", "/p/y", "/p/empty", "/q/x", "/r/x", "/r/y"]);
        let id = |p: &str| index.get(p).unwrap();

        store
            .apply_nr_deltas(&[
                // /p: children 5 and 5, an empty child is a no-op
                (id("/p/x"), files(1, 1, 5, 1)),
                (id("/p/y"), files(1, 1, 5, 1)),
                // /q: own files 5, child 6
                (id("/q"), files(1, 1, 5, 1)),
                (id("/q/x"), files(1, 1, 6, 1)),
                // /r: children 5 and 6
                (id("/r/x"), files(1, 1, 5, 1)),
                (id("/r/y"), files(1, 1, 6, 1)),
            ])
            .unwrap();

        aggregate_recursive(&mut store).unwrap();

        assert_eq!(recursive(&store, id("/p")).4, OwnerState::Single(5));
        assert_eq!(recursive(&store, id("/p/empty")).4, OwnerState::Unseen);
        assert_eq!(recursive(&store, id("/q")).4, OwnerState::Mixed);
        assert_eq!(recursive(&store, id("/r")).4, OwnerState::Mixed);
        // A mixed child makes every ancestor mixed
        assert_eq!(recursive(&store, id("/")).4, OwnerState::Mixed);
    }

    #[test]
    fn test_empty_directory_keeps_sentinels() {
        let (mut store, index) = store_with(&["/empty"]);
        aggregate_recursive(&mut store).unwrap();

        let (files, _, size, atime, uid, gid) = recursive(&store, index.get("/empty").unwrap());
        assert_eq!((files, size, atime), (0, 0, None));
        assert_eq!((uid, gid), (OwnerState::Unseen, OwnerState::Unseen));
    }

    #[test]
    fn test_no_directories() {
        let mut store = ScanStore::open_in_memory().unwrap();
        assert_eq!(aggregate_recursive(&mut store).unwrap(), AggregationSummary::default());
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let (mut store, index) = store_with(&["/a/b"]);
        store
            .apply_nr_deltas(&[(index.get("/a/b").unwrap(), files(2, 20, 1, 1))])
            .unwrap();

        aggregate_recursive(&mut store).unwrap();
        let first = recursive(&store, index.get("/").unwrap());
        aggregate_recursive(&mut store).unwrap();
        assert_eq!(recursive(&store, index.get("/").unwrap()), first);
    }
}
