//! Conformity of a prescription isodose envelope to a target
//! structure: PITV, coverage volume and the Paddick index.

use tracing::debug;

use crate::dose::{DoseGrid, FRAME_SNAP_THRESHOLD};
use crate::geometry;
use crate::model::Structure;
use crate::worker::{CancelToken, Cancelled, ProgressSink, check_cancelled, post};

/// Volumes (cc) accumulated over all planes of the structure.
#[derive(Debug, Clone, PartialEq)]
pub struct ConformityReport {
    /// Prescription isodose total volume.
    pub pitv: f64,
    /// Coverage volume: target volume inside the isodose envelope.
    pub cv: f64,
    /// Target (structure) volume.
    pub tv: f64,
}

impl ConformityReport {
    /// Paddick conformity index `CV² / (TV · PITV)`.
    pub fn conformity_index(&self) -> f64 {
        if self.tv <= 0.0 || self.pitv <= 0.0 {
            return 0.0;
        }
        self.cv * self.cv / (self.tv * self.pitv)
    }

    /// Paddick index as a percentage.
    pub fn conformity_index_percent(&self) -> f64 {
        self.conformity_index() * 100.0
    }

    /// `CV / TV`: fraction of the target covered by the prescription.
    pub fn underdose_ratio(&self) -> f64 {
        if self.tv <= 0.0 { 0.0 } else { self.cv / self.tv }
    }

    /// `CV / PITV`: fraction of the prescription volume on target.
    pub fn overdose_ratio(&self) -> f64 {
        if self.pitv <= 0.0 { 0.0 } else { self.cv / self.pitv }
    }
}

/// Evaluates the isodose envelope at `level` cGy against `structure`.
///
/// Planes without dose coverage contribute zero to PITV and CV.
pub fn conformity(
    structure: &Structure,
    dose: &DoseGrid,
    level: f64,
    progress: Option<ProgressSink<'_>>,
    cancel: &CancelToken,
) -> Result<ConformityReport, Cancelled> {
    let zs = structure.z_values().to_vec();
    let total = zs.len();
    let (xs, ys) = dose.pixel_lut();
    let (dx, dy) = dose.pixel_spacing;
    let to_cgy = dose.scaling * 100.0;
    let voxel_volume = dx * dy * structure.thickness();

    let mut pitv_voxels = 0.0_f64;
    let mut cv_voxels = 0.0_f64;

    for (done, &z) in zs.iter().enumerate() {
        check_cancelled(cancel, progress, done, total)?;

        let Some(plane) = dose.dose_plane(z, FRAME_SNAP_THRESHOLD) else {
            post(progress, done + 1, total, &structure.name);
            continue;
        };

        let mask = structure_mask(structure, z, &xs, &ys);
        for ((row, col), &value) in plane.indexed_iter() {
            if value * to_cgy < level {
                continue;
            }
            pitv_voxels += 1.0;
            if mask.as_ref().is_some_and(|m| m[[row, col]]) {
                cv_voxels += 1.0;
            }
        }
        post(progress, done + 1, total, &structure.name);
    }

    let report = ConformityReport {
        pitv: pitv_voxels * voxel_volume / 1000.0,
        cv: cv_voxels * voxel_volume / 1000.0,
        tv: structure.volume_cc(),
    };
    debug!(
        structure = %structure.name,
        level,
        ci = report.conformity_index(),
        "computed conformity"
    );
    Ok(report)
}

/// Effective boolean mask of one plane: the largest contour, islands
/// carved out, detached contours added.
fn structure_mask(
    structure: &Structure,
    z: f64,
    xs: &[f64],
    ys: &[f64],
) -> Option<ndarray::Array2<bool>> {
    let contours = structure.contours_at(z);
    let rings: Vec<&[[f64; 3]]> = contours.iter().map(|c| c.points.as_slice()).collect();
    let largest = geometry::largest_ring(&rings)?;

    let mut mask = geometry::rasterize(rings[largest], xs, ys);
    for (i, ring) in rings.iter().enumerate() {
        if i == largest {
            continue;
        }
        let inner = geometry::rasterize(ring, xs, ys);
        let inside = ring
            .first()
            .is_some_and(|p| geometry::point_in_polygon(p[0], p[1], rings[largest]));
        for (cell, &in_inner) in mask.iter_mut().zip(inner.iter()) {
            if inside {
                *cell = *cell && !in_inner;
            } else {
                *cell = *cell || in_inner;
            }
        }
    }
    Some(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dose::{DoseType, SummationType};
    use crate::geometry::z_key;
    use crate::model::{Contour, ContourKind};
    use ndarray::Array3;
    use std::collections::BTreeMap;

    fn half_irradiated_dose() -> DoseGrid {
        // Columns 0..=5 carry 5 cGy, the rest nothing.
        let frames = Array3::from_shape_fn((3, 12, 12), |(_, _, col)| u32::from(col < 6) * 100);
        DoseGrid::new(
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            (1.0, 1.0),
            vec![0.0, 1.0, 2.0],
            frames,
            0.0005,
            "GY".into(),
            DoseType::Physical,
            SummationType::Plan,
        )
    }

    fn square_structure(zs: &[f64]) -> Structure {
        let mut planes = BTreeMap::new();
        for &z in zs {
            let ring = Contour {
                kind: ContourKind::ClosedPlanar,
                points: vec![
                    [-0.5, -0.5, z],
                    [9.5, -0.5, z],
                    [9.5, 9.5, z],
                    [-0.5, 9.5, z],
                ],
            };
            planes.insert(z_key(z), vec![ring]);
        }
        Structure::new(1, "PTV".into(), [255, 0, 0], "PTV".into(), planes)
    }

    #[test]
    fn report_arithmetic_matches_paddick() {
        let report = ConformityReport {
            pitv: 10.0,
            cv: 7.0,
            tv: 8.0,
        };
        assert!((report.conformity_index() - 0.6125).abs() < 1e-12);
        assert!((report.conformity_index_percent() - 61.25).abs() < 1e-12);
        assert!((report.underdose_ratio() - 0.875).abs() < 1e-12);
        assert!((report.overdose_ratio() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn degenerate_volumes_yield_zero_ratios() {
        let report = ConformityReport {
            pitv: 0.0,
            cv: 0.0,
            tv: 0.0,
        };
        assert_eq!(report.conformity_index(), 0.0);
        assert_eq!(report.underdose_ratio(), 0.0);
        assert_eq!(report.overdose_ratio(), 0.0);
    }

    #[test]
    fn half_covered_square_end_to_end() {
        let structure = square_structure(&[0.0, 1.0, 2.0]);
        let report = conformity(
            &structure,
            &half_irradiated_dose(),
            2.0,
            None,
            &CancelToken::new(),
        )
        .expect("not cancelled");
        // PITV: 12 rows x 6 hot columns x 3 planes = 216 mm^3.
        assert!((report.pitv - 0.216).abs() < 1e-9);
        // CV: 10 rows of the mask x 6 hot columns x 3 planes = 180 mm^3.
        assert!((report.cv - 0.18).abs() < 1e-9);
        // TV: 100 mm^2 x (0.5 + 1 + 0.5) mm = 200 mm^3.
        assert!((report.tv - 0.2).abs() < 1e-9);
        assert!((report.conformity_index() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn planes_outside_the_grid_contribute_nothing() {
        let structure = square_structure(&[50.0, 51.0]);
        let report = conformity(
            &structure,
            &half_irradiated_dose(),
            2.0,
            None,
            &CancelToken::new(),
        )
        .expect("not cancelled");
        assert_eq!(report.pitv, 0.0);
        assert_eq!(report.cv, 0.0);
    }
}
