//! Online per-column accumulators.

pub mod frequency;
pub mod moments;
pub mod tdigest;

pub use frequency::{CategoryFrequency, FrequencyTable};
pub use moments::StreamingMoments;
pub use tdigest::{Centroid, TDigest};

use crate::schema::ValueFilter;
use serde::Serialize;

pub const DEFAULT_QUANTILES: [f64; 5] = [0.1, 0.25, 0.5, 0.75, 0.9];

/// Moments plus a t-digest for one numeric column.
#[derive(Clone, Debug)]
pub struct NumericAccumulator {
    filter: ValueFilter,
    moments: StreamingMoments,
    digest: TDigest,
    nulls: u64,
    zeros: u64,
}

/// Finalized statistics of one numeric column.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnStats {
    pub count: u64,
    pub nulls: u64,
    pub zeros: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub skewness: Option<f64>,
    pub kurtosis: Option<f64>,
    /// `(q, value)` pairs in request order.
    pub quantiles: Vec<(f64, f64)>,
}

impl NumericAccumulator {
    pub fn new(filter: ValueFilter, compression: f64, buffer: usize) -> Self {
        Self {
            filter,
            moments: StreamingMoments::new(),
            digest: TDigest::new(compression, buffer),
            nulls: 0,
            zeros: 0,
        }
    }

    /// Missing, non-finite and filtered-out values count as nulls.
    pub fn add(&mut self, value: Option<f64>) {
        match value {
            Some(v) if v.is_finite() && !self.filter.excludes(v) => {
                if v == 0.0 {
                    self.zeros += 1;
                }
                self.moments.add(v);
                self.digest.add(v);
            }
            _ => self.nulls += 1,
        }
    }

    pub fn count(&self) -> u64 {
        self.moments.count()
    }

    pub fn finish(mut self, quantiles: &[f64]) -> ColumnStats {
        self.digest.flush();
        debug_assert_eq!(self.digest.total_weight(), self.moments.count());
        ColumnStats {
            count: self.moments.count(),
            nulls: self.nulls,
            zeros: self.zeros,
            min: self.moments.min(),
            max: self.moments.max(),
            mean: self.moments.mean(),
            std_dev: self.moments.std_dev(),
            skewness: self.moments.skewness(),
            kurtosis: self.moments.kurtosis(),
            quantiles: quantiles
                .iter()
                .filter_map(|&q| self.digest.quantile(q).map(|v| (q, v)))
                .collect(),
        }
    }
}
