//! Summation of two independently-gridded dose volumes.
//!
//! Grids sharing a lattice are summed directly; otherwise both fields
//! are tri-linearly resampled onto the coarser lattice spanning their
//! spatial overlap. The output is a new [`DoseGrid`] whose scaling is
//! the sum of the input scalings.

use ndarray::Array3;
use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::dose::{DoseGrid, SummationType};
use crate::interpolator::Interpolator;
use crate::worker::{CancelToken, Cancelled, ProgressSink, check_cancelled, post};

#[derive(Debug, Error)]
pub enum PlanSumError {
    #[error("dose grids reference different plans")]
    PlanMismatch,

    #[error("dose grids share no spatial overlap")]
    NoOverlap,

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Sums two dose grids into a new one.
///
/// Both grids must reference the same plan. Fast path when origin,
/// shape, spacing and frame offsets all match; otherwise the general
/// trilinear resample over the overlap region.
pub fn sum_doses(
    a: &DoseGrid,
    b: &DoseGrid,
    progress: Option<ProgressSink<'_>>,
    cancel: &CancelToken,
) -> Result<DoseGrid, PlanSumError> {
    if !a.referenced_plan_series.is_empty()
        && !b.referenced_plan_series.is_empty()
        && a.referenced_plan_series != b.referenced_plan_series
    {
        return Err(PlanSumError::PlanMismatch);
    }

    if a.origin == b.origin
        && a.frames.dim() == b.frames.dim()
        && a.pixel_spacing == b.pixel_spacing
        && a.offsets() == b.offsets()
    {
        return Ok(direct_sum(a, b));
    }
    resampled_sum(a, b, progress, cancel)
}

/// Identical lattices: per-voxel weighted sum, quantized once by the
/// combined scaling.
fn direct_sum(a: &DoseGrid, b: &DoseGrid) -> DoseGrid {
    let scaling = a.scaling + b.scaling;
    let frames = ndarray::Zip::from(&a.frames)
        .and(&b.frames)
        .map_collect(|&va, &vb| {
            let dose = f64::from(va) * a.scaling + f64::from(vb) * b.scaling;
            (dose / scaling).round() as u32
        });
    debug!(shape = ?frames.dim(), "direct plan sum");
    let mut sum = DoseGrid::new(
        a.origin,
        a.orientation,
        a.pixel_spacing,
        a.offsets().to_vec(),
        frames,
        scaling,
        a.units.clone(),
        a.dose_type.clone(),
        SummationType::Plan,
    );
    sum.referenced_plan_series = a.referenced_plan_series.clone();
    sum
}

/// Half-open per-axis extent of a grid in patient mm, plus its pitch.
struct AxisExtent {
    min: f64,
    max: f64,
    scale: f64,
}

fn extents(grid: &DoseGrid) -> [AxisExtent; 3] {
    let (_, rows, columns) = grid.frames.dim();
    let (dx, dy) = grid.pixel_spacing;
    let zs = grid.frame_zs();
    let dz = grid
        .offsets()
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(f64::INFINITY, f64::min);
    let dz = if dz.is_finite() && dz > 0.0 { dz } else { 1.0 };
    [
        AxisExtent {
            min: grid.origin[0],
            max: grid.origin[0] + dx * (columns.saturating_sub(1)) as f64,
            scale: dx,
        },
        AxisExtent {
            min: grid.origin[1],
            max: grid.origin[1] + dy * (rows.saturating_sub(1)) as f64,
            scale: dy,
        },
        AxisExtent {
            min: zs.iter().copied().fold(f64::INFINITY, f64::min),
            max: zs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            scale: dz,
        },
    ]
}

fn lattice(from: f64, to: f64, step: f64) -> Vec<f64> {
    let mut values = Vec::new();
    let mut v = from;
    while v <= to + 1e-9 {
        values.push(v);
        v += step;
    }
    values
}

fn resampled_sum(
    a: &DoseGrid,
    b: &DoseGrid,
    progress: Option<ProgressSink<'_>>,
    cancel: &CancelToken,
) -> Result<DoseGrid, PlanSumError> {
    let ea = extents(a);
    let eb = extents(b);

    // Coarser pitch wins on every axis.
    let step: Vec<f64> = ea
        .iter()
        .zip(&eb)
        .map(|(xa, xb)| xa.scale.max(xb.scale))
        .collect();
    let overlap: Vec<(f64, f64)> = ea
        .iter()
        .zip(&eb)
        .map(|(xa, xb)| (xa.min.max(xb.min), xa.max.min(xb.max)))
        .collect();
    if overlap.iter().any(|(min, max)| min > max) {
        return Err(PlanSumError::NoOverlap);
    }

    let x_vals = lattice(overlap[0].0, overlap[0].1, step[0]);
    let y_vals = lattice(overlap[1].0, overlap[1].1, step[1]);
    let z_vals = lattice(overlap[2].0, overlap[2].1, step[2]);

    let a_field = a.frames.mapv(f64::from);
    let b_field = b.frames.mapv(f64::from);
    let a_zs = a.frame_zs();
    let b_zs = b.frame_zs();
    let scaling = a.scaling + b.scaling;

    let total = z_vals.len();
    let mut voxels: Vec<u32> = Vec::with_capacity(total * y_vals.len() * x_vals.len());
    for (done, &z) in z_vals.iter().enumerate() {
        check_cancelled(cancel, progress, done, total)?;

        let frame: Vec<u32> = y_vals
            .par_iter()
            .flat_map_iter(|&y| x_vals.iter().map(move |&x| (x, y)))
            .map(|(x, y)| {
                let sample = |field: &Array3<f64>,
                              grid: &DoseGrid,
                              zs: &[f64],
                              ext: &[AxisExtent; 3]| {
                    let iz = (z - zs.first().copied().unwrap_or(0.0)) / ext[2].scale;
                    let iy = (y - grid.origin[1]) / ext[1].scale;
                    let ix = (x - grid.origin[0]) / ext[0].scale;
                    Interpolator::trilinear_interpolate(&field.view(), iz, iy, ix)
                };
                let dose = sample(&a_field, a, &a_zs, &ea) * a.scaling
                    + sample(&b_field, b, &b_zs, &eb) * b.scaling;
                (dose / scaling).round() as u32
            })
            .collect();
        voxels.extend(frame);

        post(progress, done + 1, total, "plan sum");
    }

    let shape = (z_vals.len(), y_vals.len(), x_vals.len());
    let frames = Array3::from_shape_vec(shape, voxels).map_err(|_| PlanSumError::NoOverlap)?;
    debug!(shape = ?shape, scaling, "resampled plan sum");

    let origin = [overlap[0].0, overlap[1].0, overlap[2].0];
    let offsets: Vec<f64> = z_vals.iter().map(|z| z - origin[2]).collect();
    let mut sum = DoseGrid::new(
        origin,
        a.orientation,
        (step[0], step[1]),
        offsets,
        frames,
        scaling,
        a.units.clone(),
        a.dose_type.clone(),
        SummationType::Plan,
    );
    sum.referenced_plan_series = a.referenced_plan_series.clone();
    Ok(sum)
}
