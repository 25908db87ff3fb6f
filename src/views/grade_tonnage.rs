//! Grade-tonnage curves: tonnage, metal and mean grade above every cutoff.

use super::require_axes;
use crate::analyze::category_key;
use crate::message::Events;
use crate::pass::{run_pass, PassSummary, RowSink};
use crate::request::{DensitySource, EngineConfig, GradeRange, GradeTonnageRequest};
use crate::row::Row;
use crate::{ScanError, ScanResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// Material at or above `cutoff`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurvePoint {
    pub cutoff: f64,
    pub tonnage: f64,
    pub metal: f64,
    /// `metal / tonnage`; absent when nothing lies above the cutoff.
    pub grade: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeTonnageCurve {
    pub variable: String,
    pub min: f64,
    pub max: f64,
    pub bucket_width: f64,
    /// One point per bucket, ascending cutoff.
    pub points: Vec<CurvePoint>,
    /// Same curve restricted to each tracked group.
    pub groups: BTreeMap<String, Vec<CurvePoint>>,
}

impl GradeTonnageCurve {
    pub fn total_tonnage(&self) -> f64 {
        self.points.first().map_or(0.0, |p| p.tonnage)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeTonnageResult {
    pub curves: Vec<GradeTonnageCurve>,
    pub group_column: Option<String>,
    /// Groups past the cap are missing from the breakdown but not from `points`.
    pub groups_overflowed: bool,
    /// Admitted rows without a usable tonnage (missing density or weight)
    pub rows_without_tonnage: u64,
    #[serde(flatten)]
    pub summary: PassSummary,
}

/// Tonnage and metal per grade bucket.
#[derive(Debug, Clone)]
struct Buckets {
    tonnage: Vec<f64>,
    metal: Vec<f64>,
}

impl Buckets {
    fn new(n: usize) -> Self {
        Self {
            tonnage: vec![0.0; n],
            metal: vec![0.0; n],
        }
    }

    fn add(&mut self, bucket: usize, tonnes: f64, grade: f64) {
        self.tonnage[bucket] += tonnes;
        self.metal[bucket] += tonnes * grade;
    }

    /// Suffix sums from the top bucket down.
    fn curve(&self, min: f64, width: f64) -> Vec<CurvePoint> {
        let n = self.tonnage.len();
        let mut points = Vec::with_capacity(n);
        let (mut tonnage, mut metal) = (0.0, 0.0);
        for i in (0..n).rev() {
            tonnage += self.tonnage[i];
            metal += self.metal[i];
            points.push(CurvePoint {
                cutoff: min + i as f64 * width,
                tonnage,
                metal,
                grade: (tonnage > 0.0).then(|| metal / tonnage),
            });
        }
        points.reverse();
        points
    }
}

#[derive(Debug, Clone, Copy)]
enum Volume {
    Fixed(f64),
    Dimensions([usize; 3]),
}

#[derive(Debug, Clone, Copy)]
enum Density {
    Constant(f64),
    Column(usize),
}

struct Variable {
    range: GradeRange,
    slot: usize,
    width: f64,
}

impl Variable {
    fn bucket(&self, grade: f64, n: usize) -> usize {
        let i = ((grade - self.range.min) / self.width).floor();
        (i.max(0.0) as usize).min(n - 1)
    }
}

struct GradeTonnageSink {
    variables: Vec<Variable>,
    buckets: usize,
    volume: Volume,
    density: Option<Density>,
    weight: Option<usize>,
    totals: Vec<Buckets>,
    group_slot: Option<usize>,
    group_cap: usize,
    groups: BTreeMap<String, Vec<Buckets>>,
    groups_overflowed: bool,
    rows_without_tonnage: u64,
}

fn positive(row: &Row, slot: usize) -> Option<f64> {
    row.number(slot).filter(|v| v.is_finite() && *v >= 0.0)
}

impl GradeTonnageSink {
    fn tonnage(&self, row: &Row) -> Option<f64> {
        let volume = match self.volume {
            Volume::Fixed(v) => v,
            Volume::Dimensions(slots) => slots
                .iter()
                .map(|&s| positive(row, s))
                .product::<Option<f64>>()?,
        };
        let density = match self.density {
            None => 1.0,
            Some(Density::Constant(d)) => d,
            Some(Density::Column(slot)) => positive(row, slot)?,
        };
        let weight = match self.weight {
            None => 1.0,
            Some(slot) => positive(row, slot)?,
        };
        Some(volume * density * weight)
    }
}

impl RowSink for GradeTonnageSink {
    fn accept(&mut self, row: &Row, _raw: &[String]) {
        let Some(tonnes) = self.tonnage(row) else {
            self.rows_without_tonnage += 1;
            return;
        };

        let group = self.group_slot.and_then(|slot| category_key(row.get(slot)));
        let mut group_buckets = None;
        if let Some(key) = group {
            if !self.groups.contains_key(&key) && self.groups.len() >= self.group_cap {
                self.groups_overflowed = true;
            } else {
                let (buckets, count) = (self.buckets, self.variables.len());
                group_buckets = Some(
                    self.groups
                        .entry(key)
                        .or_insert_with(|| vec![Buckets::new(buckets); count]),
                );
            }
        }

        for (i, var) in self.variables.iter().enumerate() {
            let Some(grade) = row.number(var.slot).filter(|g| g.is_finite()) else {
                continue;
            };
            let bucket = var.bucket(grade, self.buckets);
            self.totals[i].add(bucket, tonnes, grade);
            if let Some(g) = group_buckets.as_mut() {
                g[i].add(bucket, tonnes, grade);
            }
        }
    }
}

/// Build one cutoff curve per requested grade variable.
pub async fn grade_tonnage(
    request: &GradeTonnageRequest,
    config: &EngineConfig,
    events: &Events,
) -> ScanResult<GradeTonnageResult> {
    let buckets = request.buckets.unwrap_or(config.grade_tonnage_buckets);
    if buckets == 0 {
        return Err(ScanError::InvalidRequest("bucket count must be positive".into()));
    }
    for v in &request.variables {
        if !(v.min.is_finite() && v.max.is_finite() && v.max > v.min) {
            return Err(ScanError::InvalidRequest(format!(
                "grade range of {} must satisfy min < max",
                v.name
            )));
        }
    }

    let (sink, summary, _ctx) = run_pass(&request.scan, config, events, |ctx| {
        let variables = request
            .variables
            .iter()
            .map(|range| {
                Ok(Variable {
                    slot: ctx.slot(&range.name)?,
                    width: (range.max - range.min) / buckets as f64,
                    range: range.clone(),
                })
            })
            .collect::<ScanResult<Vec<_>>>()?;

        let volume = match request.volume_override {
            Some(v) => Volume::Fixed(v),
            None => {
                let axes = require_axes(ctx, &request.scan, &[])?;
                let dims: Vec<usize> = axes
                    .iter()
                    .filter_map(|b| b.dimension.as_ref().map(|(_, slot)| *slot))
                    .collect();
                match <[usize; 3]>::try_from(dims) {
                    Ok(slots) => Volume::Dimensions(slots),
                    Err(_) => Volume::Fixed(request.block_volume.unwrap_or(1.0)),
                }
            }
        };
        let density = match &request.density {
            None => None,
            Some(DensitySource::Constant(d)) => Some(Density::Constant(*d)),
            Some(DensitySource::Column(name)) => Some(Density::Column(ctx.slot(name)?)),
        };
        let weight = request
            .weight_column
            .as_deref()
            .map(|w| ctx.slot(w))
            .transpose()?;
        let group_slot = request
            .scan
            .group_by_column
            .as_deref()
            .map(|g| ctx.slot(g))
            .transpose()?;

        Ok(GradeTonnageSink {
            totals: vec![Buckets::new(buckets); variables.len()],
            variables,
            buckets,
            volume,
            density,
            weight,
            group_slot,
            group_cap: config.grade_tonnage_group_cap,
            groups: BTreeMap::new(),
            groups_overflowed: false,
            rows_without_tonnage: 0,
        })
    })
    .await?;

    let curves = sink
        .variables
        .iter()
        .enumerate()
        .map(|(i, var)| GradeTonnageCurve {
            variable: var.range.name.clone(),
            min: var.range.min,
            max: var.range.max,
            bucket_width: var.width,
            points: sink.totals[i].curve(var.range.min, var.width),
            groups: sink
                .groups
                .iter()
                .map(|(key, b)| (key.clone(), b[i].curve(var.range.min, var.width)))
                .collect(),
        })
        .collect();

    Ok(GradeTonnageResult {
        curves,
        group_column: request.scan.group_by_column.clone(),
        groups_overflowed: sink.groups_overflowed,
        rows_without_tonnage: sink.rows_without_tonnage,
        summary,
    })
}
