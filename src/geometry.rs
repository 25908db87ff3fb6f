//! Grid geometry and loop-order inference from coordinate columns.
//!
//! Each axis keeps the set of distinct coordinates (rounded to a precision
//! taken from the raw text of the first rows) and, at the end, turns the
//! histogram of spacings between neighbouring coordinates into a block size
//! and optional sub-block sizes. Per-row dimension columns, when present,
//! replace the spacing heuristic.

use crate::request::{AxisColumns, EngineConfig};
use crate::row::Row;
use crate::schema::{ColumnType, Schema};
use crate::script::Value;
use crate::sniff::clean_field;
use crate::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A spacing is significant above this share of all spacing observations.
pub const SPACING_SIGNIFICANCE: f64 = 0.02;
/// Allowed relative deviation of `parent / spacing` from an integer.
pub const SUBBLOCK_RATIO_TOLERANCE: f64 = 0.05;
/// Coordinates are never rounded finer than this many decimals.
pub const MAX_PRECISION: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        self as usize
    }
}

const COORDINATE_NAMES: [&[&str]; 3] = [
    &["x", "xc", "xcentre", "xcenter", "xcen", "xmid", "midx", "centroidx", "east", "easting", "xworld"],
    &["y", "yc", "ycentre", "ycenter", "ycen", "ymid", "midy", "centroidy", "north", "northing", "yworld"],
    &["z", "zc", "zcentre", "zcenter", "zcen", "zmid", "midz", "centroidz", "elev", "elevation", "rl", "zworld"],
];

const DIMENSION_NAMES: [&[&str]; 3] = [
    &["dx", "xinc", "xsize", "xdim", "sizex", "dimx", "xlen", "xlength", "xblock"],
    &["dy", "yinc", "ysize", "ydim", "sizey", "dimy", "ylen", "ylength", "yblock"],
    &["dz", "zinc", "zsize", "zdim", "sizez", "dimz", "zlen", "zlength", "zblock"],
];

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn find_by_alias<'a>(schema: &'a Schema, aliases: &[&str]) -> Option<&'a str> {
    // earlier aliases are stronger matches
    aliases.iter().find_map(|alias| {
        schema
            .columns
            .iter()
            .filter(|c| c.kind == ColumnType::Numeric)
            .find(|c| normalize(&c.name) == *alias)
            .map(|c| c.name.as_str())
    })
}

/// Coordinate and optional dimension column of one axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisBinding {
    pub axis: Axis,
    pub column: String,
    pub slot: usize,
    pub dimension: Option<(String, usize)>,
}

/// Resolve the columns bound to each axis. Overrides must name existing
/// columns; otherwise common block-model names are recognized.
pub fn bind_axes(
    schema: &Schema,
    coordinates: &AxisColumns,
    dimensions: &AxisColumns,
) -> ScanResult<Vec<AxisBinding>> {
    let lookup = |name: &str| {
        schema
            .column(name)
            .map(|c| c.index)
            .ok_or_else(|| ScanError::MissingColumn(name.to_string()))
    };
    let mut out = Vec::new();
    for axis in Axis::ALL {
        let column = match coordinates.get(axis) {
            Some(name) => Some(name),
            None => find_by_alias(schema, COORDINATE_NAMES[axis.index()]),
        };
        let Some(column) = column else {
            continue;
        };
        let dimension = match dimensions.get(axis) {
            Some(name) => Some(name),
            None => find_by_alias(schema, DIMENSION_NAMES[axis.index()]),
        };
        out.push(AxisBinding {
            axis,
            column: column.to_string(),
            slot: lookup(column)?,
            dimension: dimension
                .map(|d| lookup(d).map(|slot| (d.to_string(), slot)))
                .transpose()?,
        });
    }
    Ok(out)
}

/// Digits after the decimal point in a numeric literal, capped at [`MAX_PRECISION`].
///
/// An exponent shifts the count: `1.5e-3` has 4 places, `1.25e1` has 1.
pub fn decimals(text: &str) -> u32 {
    let (mantissa, exponent) = match text.split_once(['e', 'E']) {
        Some((m, e)) => (m, e.parse::<i64>().unwrap_or(0)),
        None => (text, 0),
    };
    let frac = match mantissa.split_once('.') {
        Some((_, frac)) => frac.trim_end_matches('0').len() as i64,
        None => 0,
    };
    (frac - exponent).clamp(0, MAX_PRECISION as i64) as u32
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubBlock {
    pub size: f64,
    /// `parent / size`
    pub ratio: f64,
    pub occurrences: u64,
}

/// Block size decision for one axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Spacing {
    pub block_size: Option<f64>,
    pub sub_blocks: Vec<SubBlock>,
}

impl Spacing {
    pub fn is_sub_blocked(&self) -> bool {
        !self.sub_blocks.is_empty()
    }
}

fn most_frequent(hist: &[(f64, u64)]) -> Option<f64> {
    // ties go to the smaller spacing
    hist.iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.total_cmp(&a.0)))
        .map(|(s, _)| *s)
}

/// Decide block and sub-block sizes from a `(spacing, occurrences)` histogram.
pub fn classify_spacings(hist: &[(f64, u64)]) -> Spacing {
    let total: u64 = hist.iter().map(|(_, n)| n).sum();
    if total == 0 {
        return Spacing::default();
    }
    let significant: Vec<(f64, u64)> = hist
        .iter()
        .copied()
        .filter(|&(s, n)| s > 0.0 && n as f64 / total as f64 > SPACING_SIGNIFICANCE)
        .collect();
    let fallback = Spacing {
        block_size: most_frequent(hist),
        sub_blocks: Vec::new(),
    };
    if significant.len() < 2 {
        return fallback;
    }

    let parent = significant
        .iter()
        .map(|(s, _)| *s)
        .fold(f64::NEG_INFINITY, f64::max);
    let mut sub_blocks = Vec::new();
    for &(size, occurrences) in significant.iter().filter(|(s, _)| *s < parent) {
        let ratio = parent / size;
        let whole = ratio.round();
        if whole < 2.0 || (ratio - whole).abs() > SUBBLOCK_RATIO_TOLERANCE * whole {
            return fallback;
        }
        sub_blocks.push(SubBlock {
            size,
            ratio: whole,
            occurrences,
        });
    }
    sub_blocks.sort_by(|a, b| b.size.total_cmp(&a.size));
    Spacing {
        block_size: Some(parent),
        sub_blocks,
    }
}

/// Decide block and sub-block sizes from the distinct values of a dimension
/// column: the largest is the parent, every smaller value a sub-block.
pub fn classify_dimensions(sizes: &[(f64, u64)]) -> Spacing {
    let positive: Vec<(f64, u64)> = sizes.iter().copied().filter(|(s, _)| *s > 0.0).collect();
    let Some(parent) = positive.iter().map(|(s, _)| *s).reduce(f64::max) else {
        return Spacing::default();
    };
    let mut sub_blocks: Vec<SubBlock> = positive
        .iter()
        .filter(|(s, _)| *s < parent)
        .map(|&(size, occurrences)| SubBlock {
            size,
            ratio: parent / size,
            occurrences,
        })
        .collect();
    sub_blocks.sort_by(|a, b| b.size.total_cmp(&a.size));
    Spacing {
        block_size: Some(parent),
        sub_blocks,
    }
}

/// Inferred grid of one axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryAxis {
    pub axis: Axis,
    pub column: String,
    pub dimension_column: Option<String>,
    pub origin: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub block_size: Option<f64>,
    pub sub_blocks: Vec<SubBlock>,
    pub sub_blocked: bool,
    pub unique_count: usize,
    pub grid_count: u64,
    pub extent: Option<f64>,
    pub precision: u32,
    /// The distinct-coordinate cap was reached.
    pub truncated: bool,
}

/// Axes ordered from fastest- to slowest-varying along the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinateOrder {
    pub order: Vec<Axis>,
    pub transitions: BTreeMap<Axis, u64>,
    pub rows_sampled: u64,
}

impl CoordinateOrder {
    pub fn fastest(&self) -> Option<Axis> {
        self.order.first().copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Geometry {
    pub axes: Vec<GeometryAxis>,
    pub order: CoordinateOrder,
}

#[derive(Debug, Clone)]
struct AxisAccumulator {
    binding: AxisBinding,
    precision: u32,
    precision_settled: bool,
    pending: Vec<(f64, Option<f64>)>,
    coordinates: BTreeSet<i64>,
    dimensions: BTreeMap<i64, u64>,
    min: f64,
    max: f64,
    max_distinct: usize,
    truncated: bool,
}

impl AxisAccumulator {
    fn new(binding: AxisBinding, max_distinct: usize) -> Self {
        Self {
            binding,
            precision: 0,
            precision_settled: false,
            pending: Vec::new(),
            coordinates: BTreeSet::new(),
            dimensions: BTreeMap::new(),
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            max_distinct,
            truncated: false,
        }
    }

    fn scale(&self) -> f64 {
        10f64.powi(self.precision as i32)
    }

    fn key(&self, v: f64) -> i64 {
        (v * self.scale()).round() as i64
    }

    /// `places` holds the decimal places seen for the coordinate and the
    /// dimension; ignored once precision is settled.
    fn observe(&mut self, coordinate: f64, dimension: Option<f64>, places: [Option<u32>; 2]) {
        self.min = self.min.min(coordinate);
        self.max = self.max.max(coordinate);
        if self.precision_settled {
            self.record(coordinate, dimension);
        } else {
            for p in places.into_iter().flatten() {
                self.precision = self.precision.max(p);
            }
            self.pending.push((coordinate, dimension));
        }
    }

    fn settle_precision(&mut self) {
        if self.precision_settled {
            return;
        }
        self.precision_settled = true;
        for (c, d) in std::mem::take(&mut self.pending) {
            self.record(c, d);
        }
    }

    fn record(&mut self, coordinate: f64, dimension: Option<f64>) {
        let key = self.key(coordinate);
        if self.coordinates.len() < self.max_distinct || self.coordinates.contains(&key) {
            self.coordinates.insert(key);
        } else {
            self.truncated = true;
        }
        if let Some(d) = dimension.filter(|d| d.is_finite() && *d > 0.0) {
            let key = self.key(d);
            if self.dimensions.len() < self.max_distinct || self.dimensions.contains_key(&key) {
                *self.dimensions.entry(key).or_default() += 1;
            }
        }
    }

    fn finish(mut self) -> GeometryAxis {
        self.settle_precision();
        let scale = self.scale();

        let spacing = if self.dimensions.is_empty() {
            let mut hist: BTreeMap<i64, u64> = BTreeMap::new();
            let keys: Vec<i64> = self.coordinates.iter().copied().collect();
            for w in keys.windows(2) {
                *hist.entry(w[1] - w[0]).or_default() += 1;
            }
            let hist: Vec<(f64, u64)> = hist.into_iter().map(|(d, n)| (d as f64 / scale, n)).collect();
            classify_spacings(&hist)
        } else {
            let sizes: Vec<(f64, u64)> = self
                .dimensions
                .iter()
                .map(|(&d, &n)| (d as f64 / scale, n))
                .collect();
            classify_dimensions(&sizes)
        };

        let observed = self.min.is_finite();
        let origin = observed.then(|| (self.min * scale).round() / scale);
        let unique_count = self.coordinates.len();
        let (grid_count, extent) = match (spacing.block_size, origin) {
            (Some(bs), Some(origin)) if bs > 0.0 => {
                let n = ((self.max - origin) / bs).round() as u64 + 1;
                (n, Some(n as f64 * bs))
            }
            _ => (
                unique_count as u64,
                observed.then(|| self.max - self.min),
            ),
        };

        GeometryAxis {
            axis: self.binding.axis,
            column: self.binding.column,
            dimension_column: self.binding.dimension.map(|(name, _)| name),
            origin,
            min: observed.then_some(self.min),
            max: observed.then_some(self.max),
            block_size: spacing.block_size,
            sub_blocked: spacing.is_sub_blocked(),
            sub_blocks: spacing.sub_blocks,
            unique_count,
            grid_count,
            extent,
            precision: self.precision,
            truncated: self.truncated,
        }
    }
}

/// Counts coordinate changes between consecutive rows over a bounded sample.
#[derive(Debug, Clone)]
pub struct TransitionCounter {
    previous: Vec<Option<f64>>,
    transitions: Vec<u64>,
    rows: u64,
    limit: u64,
}

impl TransitionCounter {
    pub fn new(axes: usize, limit: usize) -> Self {
        Self {
            previous: vec![None; axes],
            transitions: vec![0; axes],
            rows: 0,
            limit: limit as u64,
        }
    }

    pub fn observe(&mut self, values: &[Option<f64>]) {
        if self.rows >= self.limit {
            return;
        }
        self.rows += 1;
        for (i, v) in values.iter().enumerate() {
            if let (Some(prev), Some(cur)) = (self.previous[i], v) {
                if prev != *cur {
                    self.transitions[i] += 1;
                }
            }
            if v.is_some() {
                self.previous[i] = *v;
            }
        }
    }

    /// Axes sorted by transition count, most first; ties keep axis order.
    pub fn finish(self, axes: &[Axis]) -> CoordinateOrder {
        let mut order: Vec<(Axis, u64)> = axes.iter().copied().zip(self.transitions).collect();
        order.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        CoordinateOrder {
            transitions: order.iter().copied().collect(),
            order: order.into_iter().map(|(a, _)| a).collect(),
            rows_sampled: self.rows,
        }
    }
}

/// Geometry accumulation for the main pass.
#[derive(Debug, Clone)]
pub struct GeometryAccumulator {
    axes: Vec<AxisAccumulator>,
    transitions: TransitionCounter,
    precision_rows: u64,
    rows: u64,
}

impl GeometryAccumulator {
    pub fn new(bindings: Vec<AxisBinding>, config: &EngineConfig) -> Self {
        let transitions = TransitionCounter::new(bindings.len(), config.transition_rows);
        Self {
            axes: bindings
                .into_iter()
                .map(|b| AxisAccumulator::new(b, config.max_distinct_coordinates))
                .collect(),
            transitions,
            precision_rows: config.precision_rows as u64,
            rows: 0,
        }
    }

    pub fn observe(&mut self, row: &Row, raw: &[String]) {
        if self.axes.is_empty() {
            return;
        }
        // derived columns have no raw text; their printed value stands in
        let places = |slot: usize, value: Option<f64>| match raw.get(slot) {
            Some(s) => Some(decimals(clean_field(s))),
            None => value.map(|v| decimals(&v.to_string())),
        };
        let mut coords = Vec::with_capacity(self.axes.len());
        for acc in &mut self.axes {
            let coordinate = finite(row.get(acc.binding.slot));
            coords.push(coordinate);
            let Some(c) = coordinate else {
                continue;
            };
            let dim_slot = acc.binding.dimension.as_ref().map(|(_, s)| *s);
            let dimension = dim_slot.and_then(|s| finite(row.get(s)));
            let seen = if acc.precision_settled {
                [None, None]
            } else {
                [places(acc.binding.slot, Some(c)), dim_slot.and_then(|s| places(s, dimension))]
            };
            acc.observe(c, dimension, seen);
        }
        self.transitions.observe(&coords);

        self.rows += 1;
        if self.rows == self.precision_rows {
            self.axes.iter_mut().for_each(AxisAccumulator::settle_precision);
        }
    }

    pub fn finish(self) -> Geometry {
        let axes: Vec<Axis> = self.axes.iter().map(|a| a.binding.axis).collect();
        Geometry {
            order: self.transitions.finish(&axes),
            axes: self.axes.into_iter().map(AxisAccumulator::finish).collect(),
        }
    }
}

fn finite(v: &Value) -> Option<f64> {
    v.as_number().filter(|n| n.is_finite())
}
