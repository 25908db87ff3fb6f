//! Fixed-width bins along one coordinate axis.

use super::require_axes;
use crate::geometry::Axis;
use crate::message::Events;
use crate::pass::{run_pass, PassSummary, RowSink};
use crate::request::{EngineConfig, SwathRequest, SwathStatistic};
use crate::row::Row;
use crate::stats::TDigest;
use crate::{ScanError, ScanResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// Summary of one variable within one bin.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwathCell {
    pub count: u64,
    pub sum: f64,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub quantiles: Vec<(f64, f64)>,
    /// The requested statistic.
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwathBin {
    pub index: i64,
    pub from: f64,
    pub to: f64,
    pub center: f64,
    pub rows: u64,
    pub variables: BTreeMap<String, SwathCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwathResult {
    pub axis: Axis,
    pub column: String,
    pub bin_width: f64,
    pub origin: f64,
    pub statistic: SwathStatistic,
    /// Sorted by center.
    pub bins: Vec<SwathBin>,
    #[serde(flatten)]
    pub summary: PassSummary,
}

#[derive(Clone)]
struct CellAccumulator {
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
    digest: TDigest,
}

impl CellAccumulator {
    fn new(compression: f64, buffer: usize) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            digest: TDigest::new(compression, buffer),
        }
    }

    fn add(&mut self, v: f64) {
        self.count += 1;
        self.sum += v;
        self.sum_sq += v * v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.digest.add(v);
    }

    fn finish(mut self, quantiles: &[f64], statistic: SwathStatistic) -> SwathCell {
        self.digest.flush();
        let n = self.count as f64;
        let mean = (self.count > 0).then(|| self.sum / n);
        let std_dev = (self.count > 1)
            .then(|| ((self.sum_sq - self.sum * self.sum / n) / (n - 1.0)).max(0.0).sqrt());
        let min = (self.count > 0).then_some(self.min);
        let max = (self.count > 0).then_some(self.max);
        let value = match statistic {
            SwathStatistic::Mean => mean,
            SwathStatistic::Median => self.digest.quantile(0.5),
            SwathStatistic::Count => Some(n),
            SwathStatistic::Sum => Some(self.sum),
            SwathStatistic::Min => min,
            SwathStatistic::Max => max,
        };
        SwathCell {
            count: self.count,
            sum: self.sum,
            mean,
            std_dev,
            min,
            max,
            quantiles: quantiles
                .iter()
                .filter_map(|&q| self.digest.quantile(q).map(|v| (q, v)))
                .collect(),
            value,
        }
    }
}

struct BinAccumulator {
    rows: u64,
    cells: Vec<CellAccumulator>,
}

struct SwathSink {
    axis_slot: usize,
    origin: f64,
    width: f64,
    variables: Vec<(String, usize)>,
    bins: BTreeMap<i64, BinAccumulator>,
    template: CellAccumulator,
}

impl RowSink for SwathSink {
    fn accept(&mut self, row: &Row, _raw: &[String]) {
        let Some(coord) = row.number(self.axis_slot).filter(|c| c.is_finite()) else {
            return;
        };
        let index = ((coord - self.origin) / self.width).floor() as i64;
        let bin = self.bins.entry(index).or_insert_with(|| BinAccumulator {
            rows: 0,
            cells: vec![self.template.clone(); self.variables.len()],
        });
        bin.rows += 1;
        for ((_, slot), cell) in self.variables.iter().zip(&mut bin.cells) {
            if let Some(v) = row.number(*slot).filter(|v| v.is_finite()) {
                cell.add(v);
            }
        }
    }
}

/// Bin admitted rows along `request.axis` and summarize each variable per bin.
pub async fn swath(
    request: &SwathRequest,
    config: &EngineConfig,
    events: &Events,
) -> ScanResult<SwathResult> {
    if !(request.bin_width.is_finite() && request.bin_width > 0.0) {
        return Err(ScanError::InvalidRequest(format!(
            "bin width must be positive, got {}",
            request.bin_width
        )));
    }
    let origin = request.origin.unwrap_or(0.0);
    let mut column = String::new();
    let (sink, summary, _ctx) = run_pass(&request.scan, config, events, |ctx| {
        let axes = require_axes(ctx, &request.scan, &[request.axis])?;
        let binding = axes
            .into_iter()
            .find(|b| b.axis == request.axis)
            .ok_or_else(|| ScanError::MissingColumn(super::axis_name(request.axis).into()))?;
        column = binding.column;
        let variables = request
            .variables
            .iter()
            .map(|name| ctx.slot(name).map(|slot| (name.clone(), slot)))
            .collect::<ScanResult<Vec<_>>>()?;
        Ok(SwathSink {
            axis_slot: binding.slot,
            origin,
            width: request.bin_width,
            variables,
            bins: BTreeMap::new(),
            template: CellAccumulator::new(config.digest_compression, config.digest_buffer),
        })
    })
    .await?;

    let width = sink.width;
    let names = sink.variables;
    let bins = sink
        .bins
        .into_iter()
        .map(|(index, bin)| {
            let from = origin + index as f64 * width;
            SwathBin {
                index,
                from,
                to: from + width,
                center: from + width / 2.0,
                rows: bin.rows,
                variables: names
                    .iter()
                    .map(|(n, _)| n.clone())
                    .zip(bin.cells)
                    .map(|(n, cell)| (n, cell.finish(&config.quantiles, request.statistic)))
                    .collect(),
            }
        })
        .collect();

    Ok(SwathResult {
        axis: request.axis,
        column,
        bin_width: width,
        origin,
        statistic: request.statistic,
        bins,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_summaries() {
        let mut cell = CellAccumulator::new(100.0, 500);
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            cell.add(v);
        }
        let s = cell.finish(&[0.5], SwathStatistic::Max);
        assert_eq!(s.count, 8);
        assert_eq!(s.mean, Some(5.0));
        assert!((s.std_dev.unwrap() - 2.138).abs() < 1e-3);
        assert_eq!(s.value, Some(9.0));
        assert_eq!(s.quantiles.len(), 1);
    }

    #[test]
    fn empty_cell_has_no_moments() {
        let s = CellAccumulator::new(100.0, 500).finish(&[0.5], SwathStatistic::Mean);
        assert_eq!(s.count, 0);
        assert_eq!(s.mean, None);
        assert_eq!(s.value, None);
        assert!(s.quantiles.is_empty());
    }
}
