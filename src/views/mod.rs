//! Derived views. Each runs as its own pass with its own accumulators.

pub mod grade_tonnage;
pub mod section;
pub mod swath;

pub use grade_tonnage::{grade_tonnage, CurvePoint, GradeTonnageCurve, GradeTonnageResult};
pub use section::{section, SectionBlock, SectionResult};
pub use swath::{swath, SwathBin, SwathCell, SwathResult};

use crate::geometry::{bind_axes, Axis, AxisBinding};
use crate::pass::PassContext;
use crate::request::ScanRequest;
use crate::{ScanError, ScanResult};

/// Bind every axis the request and header allow, then require `needed`.
pub(crate) fn require_axes(
    ctx: &PassContext,
    request: &ScanRequest,
    needed: &[Axis],
) -> ScanResult<Vec<AxisBinding>> {
    let bindings = bind_axes(
        &ctx.schema,
        &request.coordinate_axis_override,
        &request.dimension_column_override,
    )?;
    for axis in needed {
        if !bindings.iter().any(|b| b.axis == *axis) {
            return Err(ScanError::MissingColumn(format!(
                "no coordinate column for axis {}",
                axis_name(*axis)
            )));
        }
    }
    Ok(bindings)
}

pub(crate) fn axis_name(axis: Axis) -> &'static str {
    match axis {
        Axis::X => "x",
        Axis::Y => "y",
        Axis::Z => "z",
    }
}
