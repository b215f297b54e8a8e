//! Computes a cumulative DVH for one structure against one dose grid:
//! per plane, every contour is rasterized onto the dose-pixel lattice,
//! the covered dose values are histogrammed into 1-cGy bins, and the
//! per-contour histograms are combined with island-in-hole logic.

use ndarray::Array2;
use tracing::debug;

use crate::dose::{DoseGrid, FRAME_SNAP_THRESHOLD};
use crate::dvh::{Dvh, cumulative_from_differential};
use crate::geometry;
use crate::model::{Contour, Structure};
use crate::worker::{CancelToken, Cancelled, ProgressSink, check_cancelled, post};

/// Cumulative DVH of `structure` over `dose`, bins of 1 cGy.
///
/// `limit` optionally clips the histogram at a dose (cGy); mass at or
/// above the clip is discarded. `counts[0]` of the result is the
/// structure volume in cm³ as sampled on the dose lattice.
///
/// A plane without dose coverage ends the accumulation early; a
/// structure without planes or an empty grid yields the length-1 DVH
/// `[0]`.
pub fn calculate_dvh(
    structure: &Structure,
    dose: &DoseGrid,
    limit: Option<usize>,
    progress: Option<ProgressSink<'_>>,
    cancel: &CancelToken,
) -> Result<Dvh, Cancelled> {
    let zs = structure.z_values().to_vec();
    let total = zs.len();
    if total == 0 || dose.is_empty() {
        return Ok(Dvh::cumulative(vec![0.0], 1.0));
    }

    let (xs, ys) = dose.pixel_lut();
    let (dx, dy) = dose.pixel_spacing;
    let to_cgy = dose.scaling * 100.0;
    let max_bin = (f64::from(dose.max_pixel()) * to_cgy) as usize + 1;
    let bins = limit.map_or(max_bin, |l| l.min(max_bin)).max(1);

    let mut histogram = vec![0.0_f64; bins];
    let mut volume = 0.0_f64;
    let voxel_area = dx * dy;
    let thickness = structure.thickness();

    for (done, &z) in zs.iter().enumerate() {
        check_cancelled(cancel, progress, done, total)?;

        let Some(plane) = dose.dose_plane(z, FRAME_SNAP_THRESHOLD) else {
            debug!(z, "no dose coverage on plane, stopping accumulation");
            break;
        };

        let contours = structure.contours_at(z);
        let rings: Vec<&[[f64; 3]]> = contours.iter().map(|c| c.points.as_slice()).collect();
        let Some(largest) = geometry::largest_ring(&rings) else {
            continue;
        };

        for (i, contour) in contours.iter().enumerate() {
            let (contour_hist, contour_vol) =
                contour_histogram(contour, &plane, &xs, &ys, to_cgy, bins);
            let contour_vol = contour_vol * voxel_area * thickness;

            let add = i == largest || !inside_largest(contour, rings[largest]);
            for (bin, count) in histogram.iter_mut().zip(&contour_hist) {
                if add {
                    *bin += count;
                } else {
                    *bin -= count;
                }
            }
            if add {
                volume += contour_vol;
            } else {
                volume -= contour_vol;
            }
        }

        post(progress, done + 1, total, &structure.name);
    }

    volume /= 1000.0;

    // Rescale so the histogram mass equals the volume in cm³, then trim.
    let mass: f64 = histogram.iter().sum();
    if mass > 0.0 {
        let factor = volume / mass;
        for bin in &mut histogram {
            *bin *= factor;
        }
    }

    let mut dvh = Dvh::cumulative(cumulative_from_differential(&histogram), 1.0);
    dvh.trim_trailing_zeros();
    debug!(
        structure = %structure.name,
        volume_cc = volume,
        bins = dvh.counts.len(),
        "computed DVH"
    );
    Ok(dvh)
}

/// Histogram of the dose pixels covered by one contour; the second
/// value is the covered pixel count (volume in voxel units).
fn contour_histogram(
    contour: &Contour,
    plane: &Array2<f64>,
    xs: &[f64],
    ys: &[f64],
    to_cgy: f64,
    bins: usize,
) -> (Vec<f64>, f64) {
    let mask = geometry::rasterize(&contour.points, xs, ys);
    let mut histogram = vec![0.0_f64; bins];
    let mut covered = 0.0_f64;
    for ((row, col), &in_mask) in mask.indexed_iter() {
        if !in_mask || row >= plane.nrows() || col >= plane.ncols() {
            continue;
        }
        let dose_cgy = plane[[row, col]] * to_cgy;
        let bin = dose_cgy.floor() as usize;
        if bin < bins {
            histogram[bin] += 1.0;
            covered += 1.0;
        }
    }
    (histogram, covered)
}

fn inside_largest(contour: &Contour, largest: &[[f64; 3]]) -> bool {
    contour
        .points
        .first()
        .is_some_and(|p| geometry::point_in_polygon(p[0], p[1], largest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dose::{DoseType, SummationType};
    use crate::geometry::z_key;
    use crate::model::ContourKind;
    use ndarray::Array3;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use crate::worker::Progress;

    /// 12x12 px grid, 1 mm pitch, frames at z = 0..=4, uniform stored
    /// value 100 with scaling 0.0005 => 5 cGy everywhere.
    fn uniform_dose() -> DoseGrid {
        DoseGrid::new(
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            (1.0, 1.0),
            vec![0.0, 1.0, 2.0, 3.0, 4.0],
            Array3::from_elem((5, 12, 12), 100),
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
    fn uniform_dose_yields_flat_cumulative_dvh() {
        let structure = square_structure(&[0.0, 1.0, 2.0, 3.0, 4.0]);
        let dvh = calculate_dvh(&structure, &uniform_dose(), None, None, &CancelToken::new())
            .expect("not cancelled");
        // 10x10 lattice points per plane, 5 planes, 1 mm^3 voxels = 0.5 cc.
        assert!((dvh.total_volume() - 0.5).abs() < 1e-9);
        // All mass sits at 5 cGy, so the cumulative stays flat below it.
        assert_eq!(dvh.counts.len(), 6);
        for &count in &dvh.counts {
            assert!((count - 0.5).abs() < 1e-9);
        }
        assert_eq!(dvh.volume_constraint(99.0), 0.0);
    }

    #[test]
    fn limit_clips_high_dose_mass() {
        let structure = square_structure(&[0.0, 1.0]);
        let dvh = calculate_dvh(&structure, &uniform_dose(), Some(3), None, &CancelToken::new())
            .expect("not cancelled");
        // Everything is at 5 cGy, above the 3 cGy clip.
        assert_eq!(dvh.counts, vec![0.0]);
    }

    #[test]
    fn structure_without_planes_yields_empty_dvh() {
        let structure = Structure::new(9, "void".into(), [0, 0, 0], "ORGAN".into(), BTreeMap::new());
        let dvh = calculate_dvh(&structure, &uniform_dose(), None, None, &CancelToken::new())
            .expect("not cancelled");
        assert_eq!(dvh.counts, vec![0.0]);
    }

    #[test]
    fn plane_outside_grid_stops_accumulation() {
        // Planes beyond the frame range: only the covered ones count.
        let structure = square_structure(&[0.0, 1.0, 40.0]);
        let dvh = calculate_dvh(&structure, &uniform_dose(), None, None, &CancelToken::new())
            .expect("not cancelled");
        assert!((dvh.total_volume() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn progress_is_posted_per_plane() {
        let structure = square_structure(&[0.0, 1.0, 2.0]);
        let events: Mutex<Vec<Progress>> = Mutex::new(Vec::new());
        let sink = |p: Progress| events.lock().unwrap().push(p);
        calculate_dvh(&structure, &uniform_dose(), None, Some(&sink), &CancelToken::new())
            .expect("not cancelled");
        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], Progress::new(3, 3, "PTV"));
    }

    #[test]
    fn cancellation_discards_the_partial_dvh() {
        let structure = square_structure(&[0.0, 1.0]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = calculate_dvh(&structure, &uniform_dose(), None, None, &cancel);
        assert!(matches!(result, Err(Cancelled)));
    }
}
