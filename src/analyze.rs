//! The main analysis pass.

use crate::geometry::{bind_axes, Geometry, GeometryAccumulator};
use crate::message::Events;
use crate::pass::{run_pass, PassContext, PassSummary, RowSink};
use crate::request::{EngineConfig, ScanRequest};
use crate::row::Row;
use crate::schema::Column;
use crate::script::Value;
use crate::stats::{CategoryFrequency, ColumnStats, FrequencyTable, NumericAccumulator};
use crate::ScanResult;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumericSummary {
    pub name: String,
    #[serde(flatten)]
    pub stats: ColumnStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub name: String,
    #[serde(flatten)]
    pub frequencies: FrequencyTable,
}

/// Numeric statistics broken down by the values of one categorical column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedStats {
    pub column: String,
    /// group → row count
    pub rows: BTreeMap<String, u64>,
    /// group → column → statistics
    pub stats: BTreeMap<String, BTreeMap<String, ColumnStats>>,
    /// Groups past the cap were left out of the breakdown.
    pub overflowed: bool,
}

/// Snapshot of one finished analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub source: String,
    pub delimiter: char,
    pub columns: Vec<Column>,
    pub numeric: Vec<NumericSummary>,
    pub categories: Vec<CategorySummary>,
    pub geometry: Geometry,
    pub groups: Option<GroupedStats>,
    #[serde(flatten)]
    pub summary: PassSummary,
}

impl AnalysisResult {
    pub fn numeric(&self, name: &str) -> Option<&ColumnStats> {
        self.numeric.iter().find(|n| n.name == name).map(|n| &n.stats)
    }

    pub fn category(&self, name: &str) -> Option<&FrequencyTable> {
        self.categories
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.frequencies)
    }
}

/// Display form of a value used as a category or group key.
pub(crate) fn category_key(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::Text(t) if t.trim().is_empty() => None,
        Value::Text(t) => Some(t.clone()),
        other => Some(other.to_string()),
    }
}

struct Group {
    rows: u64,
    columns: Vec<NumericAccumulator>,
}

struct GroupAccumulator {
    column: String,
    slot: usize,
    cap: usize,
    groups: BTreeMap<String, Group>,
    overflowed: bool,
}

struct AnalysisSink {
    numeric: Vec<(Column, NumericAccumulator)>,
    categorical: Vec<(Column, CategoryFrequency)>,
    geometry: GeometryAccumulator,
    groups: Option<GroupAccumulator>,
    compression: f64,
    buffer: usize,
}

impl AnalysisSink {
    fn new(ctx: &PassContext, request: &ScanRequest, config: &EngineConfig) -> ScanResult<Self> {
        let accumulator =
            |c: &Column| NumericAccumulator::new(c.filter, config.digest_compression, config.digest_buffer);
        let bindings = bind_axes(
            &ctx.schema,
            &request.coordinate_axis_override,
            &request.dimension_column_override,
        )?;
        let groups = match &request.group_by_column {
            Some(name) => Some(GroupAccumulator {
                column: name.clone(),
                slot: ctx.slot(name)?,
                cap: config.group_cap,
                groups: BTreeMap::new(),
                overflowed: false,
            }),
            None => None,
        };
        Ok(Self {
            numeric: ctx
                .schema
                .numeric()
                .map(|c| (c.clone(), accumulator(c)))
                .collect(),
            categorical: ctx
                .schema
                .categorical()
                .map(|c| (c.clone(), CategoryFrequency::new(config.category_cap)))
                .collect(),
            geometry: GeometryAccumulator::new(bindings, config),
            groups,
            compression: config.digest_compression,
            buffer: config.digest_buffer,
        })
    }

    fn finish(self, ctx: PassContext, summary: PassSummary, quantiles: &[f64]) -> AnalysisResult {
        let names: Vec<String> = self.numeric.iter().map(|(c, _)| c.name.clone()).collect();
        let groups = self.groups.map(|g| GroupedStats {
            column: g.column,
            overflowed: g.overflowed,
            rows: g.groups.iter().map(|(k, v)| (k.clone(), v.rows)).collect(),
            stats: g
                .groups
                .into_iter()
                .map(|(key, group)| {
                    let per_column = names
                        .iter()
                        .cloned()
                        .zip(group.columns)
                        .map(|(name, acc)| (name, acc.finish(quantiles)))
                        .collect();
                    (key, per_column)
                })
                .collect(),
        });
        AnalysisResult {
            source: ctx.source,
            delimiter: ctx.delimiter as char,
            columns: ctx.schema.columns,
            numeric: self
                .numeric
                .into_iter()
                .map(|(c, acc)| NumericSummary {
                    name: c.name,
                    stats: acc.finish(quantiles),
                })
                .collect(),
            categories: self
                .categorical
                .into_iter()
                .map(|(c, freq)| CategorySummary {
                    name: c.name,
                    frequencies: freq.finish(),
                })
                .collect(),
            geometry: self.geometry.finish(),
            groups,
            summary,
        }
    }
}

impl RowSink for AnalysisSink {
    fn accept(&mut self, row: &Row, raw: &[String]) {
        for (c, acc) in &mut self.numeric {
            acc.add(row.number(c.index));
        }
        for (c, freq) in &mut self.categorical {
            if let Some(key) = category_key(row.get(c.index)) {
                freq.add(&key);
            }
        }
        self.geometry.observe(row, raw);

        let Some(g) = &mut self.groups else {
            return;
        };
        let Some(key) = category_key(row.get(g.slot)) else {
            return;
        };
        if !g.groups.contains_key(&key) {
            if g.groups.len() >= g.cap {
                g.overflowed = true;
                return;
            }
            let columns = self
                .numeric
                .iter()
                .map(|(c, _)| NumericAccumulator::new(c.filter, self.compression, self.buffer))
                .collect();
            g.groups.insert(key.clone(), Group { rows: 0, columns });
        }
        if let Some(group) = g.groups.get_mut(&key) {
            group.rows += 1;
            for ((c, _), acc) in self.numeric.iter().zip(&mut group.columns) {
                acc.add(row.number(c.index));
            }
        }
    }
}

/// Run the main analysis pass: schema, statistics, frequencies and geometry.
pub async fn analyze(
    request: &ScanRequest,
    config: &EngineConfig,
    events: &Events,
) -> ScanResult<AnalysisResult> {
    let (sink, summary, ctx) =
        run_pass(request, config, events, |ctx| AnalysisSink::new(ctx, request, config)).await?;
    Ok(sink.finish(ctx, summary, &config.quantiles))
}
