use crate::geometry::Axis;
use crate::schema::{ColumnType, ValueFilter};
use crate::stats::tdigest::{DEFAULT_BUFFER, DEFAULT_COMPRESSION};
use crate::stats::DEFAULT_QUANTILES;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Fields shared by every pass kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanRequest {
    pub file: PathBuf,
    pub zip_entry_name: Option<String>,
    /// `encoding_rs` label; UTF-8 when absent.
    pub charset: Option<String>,
    /// Persisted global filter.
    pub filter_expression: Option<String>,
    /// Ad hoc filter applied on top of the global one.
    pub local_filter_expression: Option<String>,
    pub type_overrides: HashMap<String, ColumnType>,
    pub skipped_columns: Vec<String>,
    pub per_column_value_filters: HashMap<String, ValueFilter>,
    pub derived_column_script: Option<String>,
    /// Declared output types of derived columns.
    pub derived_column_meta: HashMap<String, ColumnType>,
    pub group_by_column: Option<String>,
    pub coordinate_axis_override: AxisColumns,
    pub dimension_column_override: AxisColumns,
}

impl ScanRequest {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            ..Default::default()
        }
    }

    pub(crate) fn filters(&self) -> Vec<&str> {
        [&self.filter_expression, &self.local_filter_expression]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect()
    }
}

/// Optional column name per axis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisColumns {
    pub x: Option<String>,
    pub y: Option<String>,
    pub z: Option<String>,
}

impl AxisColumns {
    pub fn get(&self, axis: Axis) -> Option<&str> {
        match axis {
            Axis::X => self.x.as_deref(),
            Axis::Y => self.y.as_deref(),
            Axis::Z => self.z.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwathStatistic {
    #[default]
    Mean,
    Median,
    Count,
    Sum,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwathRequest {
    #[serde(flatten)]
    pub scan: ScanRequest,
    pub axis: Axis,
    pub bin_width: f64,
    /// Bins start at this coordinate; 0 when absent.
    #[serde(default)]
    pub origin: Option<f64>,
    pub variables: Vec<String>,
    #[serde(default)]
    pub statistic: SwathStatistic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRange {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

/// Constant density or a per-row density column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DensitySource {
    Constant(f64),
    Column(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeTonnageRequest {
    #[serde(flatten)]
    pub scan: ScanRequest,
    pub variables: Vec<GradeRange>,
    /// Bucket count per variable; engine default when absent.
    #[serde(default)]
    pub buckets: Option<usize>,
    #[serde(default)]
    pub density: Option<DensitySource>,
    #[serde(default)]
    pub weight_column: Option<String>,
    /// Volume applied to every row, ahead of per-row dimensions.
    #[serde(default)]
    pub volume_override: Option<f64>,
    /// Fallback volume when no dimension columns resolve.
    #[serde(default)]
    pub block_volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRequest {
    #[serde(flatten)]
    pub scan: ScanRequest,
    pub normal_axis: Axis,
    pub position: f64,
    pub tolerance: f64,
    pub color_variable: String,
    #[serde(default)]
    pub max_blocks: Option<usize>,
}

/// One pass of any kind, tagged by `"pass"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pass", rename_all = "kebab-case")]
pub enum PassRequest {
    Analyze(ScanRequest),
    Swath(SwathRequest),
    GradeTonnage(GradeTonnageRequest),
    Section(SectionRequest),
}

impl PassRequest {
    pub fn scan(&self) -> &ScanRequest {
        match self {
            PassRequest::Analyze(s) => s,
            PassRequest::Swath(r) => &r.scan,
            PassRequest::GradeTonnage(r) => &r.scan,
            PassRequest::Section(r) => &r.scan,
        }
    }
}

/// Engine tunables. A partial JSON object overrides only the fields it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Lines sampled for delimiter detection.
    pub sniff_lines: usize,
    pub sniff_bytes: usize,
    /// Votes after which a column's type is settled.
    pub detect_min_votes: u64,
    /// Rows after which type detection stops regardless.
    pub detect_max_rows: usize,
    pub derived_preview_rows: usize,
    pub digest_compression: f64,
    pub digest_buffer: usize,
    pub quantiles: Vec<f64>,
    pub category_cap: usize,
    pub group_cap: usize,
    pub grade_tonnage_buckets: usize,
    pub grade_tonnage_group_cap: usize,
    /// Rows whose coordinate text sets the rounding precision.
    pub precision_rows: usize,
    pub max_distinct_coordinates: usize,
    pub transition_rows: usize,
    pub progress_rows: u64,
    pub progress_bytes: u64,
    pub read_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sniff_lines: 20,
            sniff_bytes: 64 * 1024,
            detect_min_votes: 100,
            detect_max_rows: 2_000,
            derived_preview_rows: 200,
            digest_compression: DEFAULT_COMPRESSION,
            digest_buffer: DEFAULT_BUFFER,
            quantiles: DEFAULT_QUANTILES.to_vec(),
            category_cap: 1_000,
            group_cap: 50,
            grade_tonnage_buckets: 2_000,
            grade_tonnage_group_cap: 20,
            precision_rows: 1_000,
            max_distinct_coordinates: 100_000,
            transition_rows: 10_000,
            progress_rows: 100_000,
            progress_bytes: 8 * 1024 * 1024,
            read_buffer: 1 << 20,
        }
    }
}
