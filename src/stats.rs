//! Per-field bucket histograms and the pipeline-wide accumulator.
//!
//! Every tile arrives with a histogram per schema field: bucket key to point
//! count, bucket keys spaced [`BUCKET_WIDTH`] apart. The cache folds those
//! into one running total that brushes read when computing color parameters,
//! so a field's observed range is available without rescanning buffers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Histogram bucket spacing used by the loader when binning field values.
pub const BUCKET_WIDTH: i64 = 10;

/// Bucket key for a raw field value.
pub fn bucket_key(value: f64) -> i64 {
    (value / BUCKET_WIDTH as f64).floor() as i64 * BUCKET_WIDTH
}

/// Bucketed value counts for a single field.
pub type Histogram = BTreeMap<i64, u64>;

/// Per-field histograms, as shipped on a tile or merged pipeline-wide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferStats(pub BTreeMap<String, Histogram>);

impl BufferStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a single field value into its bucket.
    pub fn add(&mut self, field: &str, value: f64) {
        *self
            .0
            .entry(field.to_string())
            .or_default()
            .entry(bucket_key(value))
            .or_insert(0) += 1;
    }

    /// Fold `incoming` into `self`, field-wise, bucket-wise by addition.
    pub fn merge_from(&mut self, incoming: &BufferStats) {
        for (field, hist) in &incoming.0 {
            let target = self.0.entry(field.clone()).or_default();
            for (&bucket, &count) in hist {
                *target.entry(bucket).or_insert(0) += count;
            }
        }
    }

    /// Observed `(min, max)` range of a field. The maximum extends one bucket
    /// past the last key since a bucket covers `[key, key + BUCKET_WIDTH)`.
    pub fn range(&self, field: &str) -> Option<(f64, f64)> {
        let hist = self.0.get(field)?;
        let first = *hist.keys().next()?;
        let last = *hist.keys().next_back()?;
        Some((first as f64, (last + BUCKET_WIDTH) as f64))
    }

    pub fn field(&self, name: &str) -> Option<&Histogram> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total count across all buckets of a field.
    pub fn total_count(&self, field: &str) -> u64 {
        self.0
            .get(field)
            .map(|h| h.values().sum())
            .unwrap_or(0)
    }
}

/// Merge histograms field-wise, bucket-wise by addition.
///
/// Monotone under insertion; the cache never reverses a merge on tile
/// removal, so after many removals the totals drift above the live set.
/// That drift is accepted; `flush` is the only reset.
pub fn accumulate(mut running: BufferStats, incoming: &BufferStats) -> BufferStats {
    running.merge_from(incoming);
    running
}
