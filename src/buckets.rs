//! Sorted-boundary buckets, used for size partitioning and size histograms.

use crate::error::CacheError;

/// Strictly ascending boundaries with an implicit first boundary of 0.
///
/// Bucket `i` covers `bound(i) ..= bound(i + 1) - 1`; the last bucket is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buckets {
    bounds: Vec<u64>,
}

impl Default for Buckets {
    fn default() -> Self {
        Buckets { bounds: vec![0] }
    }
}

impl Buckets {
    /// Build from boundary values in any order; duplicates are dropped.
    pub fn new(bounds: impl IntoIterator<Item = u64>) -> Self {
        let mut all: Vec<u64> = std::iter::once(0).chain(bounds).collect();
        all.sort_unstable();
        all.dedup();
        Buckets { bounds: all }
    }

    /// Index of the bucket containing `x`.
    pub fn index_containing(&self, x: u64) -> usize {
        // bounds[0] == 0, so the partition point is always at least 1
        self.bounds.partition_point(|&b| b <= x) - 1
    }

    /// Index of the bucket whose lower boundary is exactly `bound`.
    pub fn index_of(&self, bound: u64) -> Result<usize, CacheError> {
        self.bounds.binary_search(&bound).map_err(|_| {
            CacheError::ConfigError(format!(
                "no size bucket with bound {} in {:?}",
                bound, self.bounds
            ))
        })
    }

    pub fn bound(&self, i: usize) -> u64 {
        self.bounds[i]
    }

    /// `(min, max)` of bucket `i`; `max` is `None` for the last bucket.
    pub fn minmax(&self, i: usize) -> (u64, Option<u64>) {
        let max = self.bounds.get(i + 1).map(|next| next - 1);
        (self.bounds[i], max)
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}
