//! Fixed-bucket histograms of per-owner usage
//!
//! Every file lands in exactly one access-age bucket and one allocated-size
//! bucket of its owner's histogram. Bucket boundaries are fixed so that
//! histograms from different scans can be compared directly.

use std::collections::HashMap;

/// Number of buckets per histogram kind
pub const BUCKET_COUNT: usize = 10;

const DAY_SECS: i64 = 86_400;

/// Upper bounds (exclusive, in days) of all but the last access-age bucket
pub const ATIME_BUCKET_DAYS: [i64; BUCKET_COUNT - 1] =
    [30, 90, 180, 365, 730, 1095, 1460, 2190, 2555];

/// Upper bounds (exclusive, in bytes) of all but the last size bucket
pub const SIZE_BUCKET_BYTES: [u64; BUCKET_COUNT - 1] = [
    1 << 10,
    10 << 10,
    100 << 10,
    1 << 20,
    10 << 20,
    100 << 20,
    1 << 30,
    10 << 30,
    100 << 30,
];

/// Access-age bucket of a file
///
/// Age is measured in whole days (floor) between the access time and the
/// scan date. Files without a usable access time, or scans without a known
/// date, land in the last bucket.
pub fn classify_atime(access_time: Option<i64>, scan_time: Option<i64>) -> usize {
    let (Some(atime), Some(scan)) = (access_time, scan_time) else {
        return BUCKET_COUNT - 1;
    };
    let days_old = (scan - atime).div_euclid(DAY_SECS);
    ATIME_BUCKET_DAYS.partition_point(|&bound| bound <= days_old)
}

/// Allocated-size bucket of a file
pub fn classify_size(allocated_bytes: u64) -> usize {
    SIZE_BUCKET_BYTES.partition_point(|&bound| bound <= allocated_bytes)
}

/// Histogram kind, stored in the `kind` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistogramKind {
    AccessTime,
    Size,
}

impl HistogramKind {
    pub const ALL: [HistogramKind; 2] = [HistogramKind::AccessTime, HistogramKind::Size];

    pub fn as_str(self) -> &'static str {
        match self {
            HistogramKind::AccessTime => "atime",
            HistogramKind::Size => "size",
        }
    }
}

/// File count and allocated bytes per bucket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buckets {
    pub file_count: [u64; BUCKET_COUNT],
    pub total_size: [u64; BUCKET_COUNT],
}

impl Buckets {
    fn add(&mut self, index: usize, bytes: u64) {
        self.file_count[index] += 1;
        self.total_size[index] += bytes;
    }

    fn merge(&mut self, other: &Buckets) {
        for i in 0..BUCKET_COUNT {
            self.file_count[i] += other.file_count[i];
            self.total_size[i] += other.total_size[i];
        }
    }

    /// Non-empty buckets as `(index, file_count, total_size)`
    pub fn non_empty(&self) -> impl Iterator<Item = (usize, u64, u64)> + '_ {
        (0..BUCKET_COUNT)
            .filter(|&i| self.file_count[i] > 0)
            .map(|i| (i, self.file_count[i], self.total_size[i]))
    }

    pub fn total_files(&self) -> u64 {
        self.file_count.iter().sum()
    }
}

/// Both histograms of one owner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerHistogram {
    pub atime: Buckets,
    pub size: Buckets,
}

impl OwnerHistogram {
    pub fn record(&mut self, atime_bucket: usize, size_bucket: usize, allocated_bytes: u64) {
        self.atime.add(atime_bucket, allocated_bytes);
        self.size.add(size_bucket, allocated_bytes);
    }

    pub fn merge(&mut self, other: &OwnerHistogram) {
        self.atime.merge(&other.atime);
        self.size.merge(&other.size);
    }

    pub fn buckets(&self, kind: HistogramKind) -> &Buckets {
        match kind {
            HistogramKind::AccessTime => &self.atime,
            HistogramKind::Size => &self.size,
        }
    }
}

/// Merge a map of per-owner histograms into another
pub fn merge_histograms(into: &mut HashMap<u32, OwnerHistogram>, from: HashMap<u32, OwnerHistogram>) {
    for (uid, histogram) in from {
        into.entry(uid).or_default().merge(&histogram);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCAN: i64 = 1_705_276_800; // 2024-01-15 00:00:00 UTC

    fn days_ago(days: i64) -> Option<i64> {
        Some(SCAN - days * DAY_SECS)
    }

    #[test]
    fn test_atime_buckets() {
        assert_eq!(classify_atime(days_ago(0), Some(SCAN)), 0);
        assert_eq!(classify_atime(days_ago(29), Some(SCAN)), 0);
        assert_eq!(classify_atime(days_ago(30), Some(SCAN)), 1);
        assert_eq!(classify_atime(days_ago(364), Some(SCAN)), 3);
        assert_eq!(classify_atime(days_ago(365), Some(SCAN)), 4);
        assert_eq!(classify_atime(days_ago(2554), Some(SCAN)), 8);
        assert_eq!(classify_atime(days_ago(2555), Some(SCAN)), 9);
        assert_eq!(classify_atime(days_ago(10_000), Some(SCAN)), 9);
    }

    #[test]
    fn test_atime_edge_cases() {
        // Accessed after the scan date
        assert_eq!(classify_atime(Some(SCAN + 5 * DAY_SECS), Some(SCAN)), 0);
        // One second short of 30 days floors to 29
        assert_eq!(classify_atime(Some(SCAN - 30 * DAY_SECS + 1), Some(SCAN)), 0);
        assert_eq!(classify_atime(None, Some(SCAN)), BUCKET_COUNT - 1);
        assert_eq!(classify_atime(days_ago(1), None), BUCKET_COUNT - 1);
    }

    #[test]
    fn test_size_buckets() {
        assert_eq!(classify_size(0), 0);
        assert_eq!(classify_size(50), 0);
        assert_eq!(classify_size(500), 0);
        assert_eq!(classify_size(1023), 0);
        assert_eq!(classify_size(1024), 1);
        assert_eq!(classify_size(2_000_000), 4);
        assert_eq!(classify_size(1 << 30), 7);
        assert_eq!(classify_size((100 << 30) - 1), 8);
        assert_eq!(classify_size(100 << 30), 9);
        assert_eq!(classify_size(u64::MAX), 9);
    }

    #[test]
    fn test_histogram_merge() {
        let mut a = OwnerHistogram::default();
        a.record(0, 0, 500);
        let mut b = OwnerHistogram::default();
        b.record(0, 4, 2_000_000);
        b.record(9, 0, 10);

        a.merge(&b);
        assert_eq!(a.size.total_files(), 3);
        assert_eq!(a.atime.total_files(), 3);
        let sizes: Vec<_> = a.size.non_empty().collect();
        assert_eq!(sizes, vec![(0, 2, 510), (4, 1, 2_000_000)]);
    }
}
