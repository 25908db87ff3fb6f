//! Planar slice: the blocks crossing a plane normal to one axis.

use super::{axis_name, require_axes};
use crate::geometry::Axis;
use crate::message::Events;
use crate::pass::{run_pass, PassSummary, RowSink};
use crate::request::{EngineConfig, SectionRequest};
use crate::row::Row;
use crate::script::Value;
use crate::{ScanError, ScanResult};
use serde::Serialize;

/// One block in section coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionBlock {
    pub u: f64,
    pub v: f64,
    pub du: Option<f64>,
    pub dv: Option<f64>,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionResult {
    pub normal_axis: Axis,
    pub u_axis: Axis,
    pub v_axis: Axis,
    pub position: f64,
    pub tolerance: f64,
    pub color_variable: String,
    pub blocks: Vec<SectionBlock>,
    /// Rows inside the slab, including any past the block cap.
    pub matched: u64,
    pub truncated: bool,
    #[serde(flatten)]
    pub summary: PassSummary,
}

/// In-plane axes for a slice normal to `normal`.
pub fn plane_axes(normal: Axis) -> (Axis, Axis) {
    match normal {
        Axis::X => (Axis::Y, Axis::Z),
        Axis::Y => (Axis::X, Axis::Z),
        Axis::Z => (Axis::X, Axis::Y),
    }
}

struct Plane {
    slot: usize,
    dimension: Option<usize>,
}

struct SectionSink {
    normal_slot: usize,
    low: f64,
    high: f64,
    u: Plane,
    v: Plane,
    color_slot: usize,
    max_blocks: Option<usize>,
    blocks: Vec<SectionBlock>,
    matched: u64,
    truncated: bool,
}

impl RowSink for SectionSink {
    fn accept(&mut self, row: &Row, _raw: &[String]) {
        let Some(n) = row.number(self.normal_slot) else {
            return;
        };
        if n < self.low || n > self.high {
            return;
        }
        let (Some(u), Some(v)) = (row.number(self.u.slot), row.number(self.v.slot)) else {
            return;
        };
        self.matched += 1;
        if self.max_blocks.is_some_and(|cap| self.blocks.len() >= cap) {
            self.truncated = true;
            return;
        }
        self.blocks.push(SectionBlock {
            u,
            v,
            du: self.u.dimension.and_then(|s| row.number(s)),
            dv: self.v.dimension.and_then(|s| row.number(s)),
            value: row.get(self.color_slot).clone(),
        });
    }
}

/// Collect blocks whose normal coordinate lies within `tolerance / 2` of `position`.
pub async fn section(
    request: &SectionRequest,
    config: &EngineConfig,
    events: &Events,
) -> ScanResult<SectionResult> {
    if !(request.tolerance.is_finite() && request.tolerance >= 0.0) {
        return Err(ScanError::InvalidRequest(format!(
            "section tolerance must be non-negative, got {}",
            request.tolerance
        )));
    }
    let (u_axis, v_axis) = plane_axes(request.normal_axis);
    let half = request.tolerance / 2.0;

    let (sink, summary, _ctx) = run_pass(&request.scan, config, events, |ctx| {
        let axes = require_axes(ctx, &request.scan, &[request.normal_axis, u_axis, v_axis])?;
        let find = |axis: Axis| {
            axes.iter()
                .find(|b| b.axis == axis)
                .ok_or_else(|| ScanError::MissingColumn(axis_name(axis).into()))
        };
        let normal = find(request.normal_axis)?;
        let plane = |axis: Axis| {
            find(axis).map(|b| Plane {
                slot: b.slot,
                dimension: b.dimension.as_ref().map(|(_, s)| *s),
            })
        };
        Ok(SectionSink {
            normal_slot: normal.slot,
            low: request.position - half,
            high: request.position + half,
            u: plane(u_axis)?,
            v: plane(v_axis)?,
            color_slot: ctx.slot(&request.color_variable)?,
            max_blocks: request.max_blocks,
            blocks: Vec::new(),
            matched: 0,
            truncated: false,
        })
    })
    .await?;

    Ok(SectionResult {
        normal_axis: request.normal_axis,
        u_axis,
        v_axis,
        position: request.position,
        tolerance: request.tolerance,
        color_variable: request.color_variable.clone(),
        blocks: sink.blocks,
        matched: sink.matched,
        truncated: sink.truncated,
        summary,
    })
}
