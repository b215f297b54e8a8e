//! Planar geometry primitives shared by the DVH and conformity
//! calculators: polygon area, point-in-polygon, rasterization of a
//! contour onto dose-grid sample points, and plane bookkeeping.

use ndarray::Array2;
use rayon::prelude::*;

/// Shoelace area of a closed planar ring, in the square of the input
/// unit (mm²). Orientation is ignored.
pub fn polygon_area(ring: &[[f64; 3]]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0;
    for (i, p) in ring.iter().enumerate() {
        let q = &ring[(i + 1) % ring.len()];
        twice_area += p[0] * q[1] - q[0] * p[1];
    }
    twice_area.abs() / 2.0
}

/// Ray cast from `(x, y)` along +x, toggling on each edge crossing.
///
/// Points exactly on an edge are implementation-defined; callers must
/// not rely on boundary behavior.
pub fn point_in_polygon(x: f64, y: f64, ring: &[[f64; 3]]) -> bool {
    let mut inside = false;
    let mut j = ring.len().wrapping_sub(1);
    for i in 0..ring.len() {
        let (xi, yi) = (ring[i][0], ring[i][1]);
        let (xj, yj) = (ring[j][0], ring[j][1]);
        if (yi > y) != (yj > y) {
            let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Rasterizes a contour onto the sample points given by two ascending
/// coordinate vectors (patient mm). `mask[[j, i]]` is true iff
/// `(xs[i], ys[j])` lies inside the ring. Empty rings yield an all-false
/// mask.
pub fn rasterize(ring: &[[f64; 3]], xs: &[f64], ys: &[f64]) -> Array2<bool> {
    let (rows, cols) = (ys.len(), xs.len());
    if ring.len() < 3 {
        return Array2::from_elem((rows, cols), false);
    }
    let cells: Vec<bool> = ys
        .par_iter()
        .flat_map_iter(|&y| xs.iter().map(move |&x| (x, y)))
        .map(|(x, y)| point_in_polygon(x, y, ring))
        .collect();
    Array2::from_shape_vec((rows, cols), cells)
        .unwrap_or_else(|_| Array2::from_elem((rows, cols), false))
}

/// Renders a plane height as the canonical string key used to group
/// sibling contours: two decimals, with "-0.00" collapsed to "0.00".
pub fn z_key(z: f64) -> String {
    let key = format!("{z:.2}");
    if key == "-0.00" {
        "0.00".to_string()
    } else {
        key
    }
}

/// Minimum positive spacing between consecutive plane heights.
/// `None` when fewer than two distinct planes exist.
pub fn plane_thickness(zs: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = zs.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|delta| *delta > 0.0)
        .min_by(f64::total_cmp)
}

/// Index of the largest ring (by shoelace area) among the contours of a
/// plane. Ties keep the first.
pub fn largest_ring(rings: &[&[[f64; 3]]]) -> Option<usize> {
    rings
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| polygon_area(a).total_cmp(&polygon_area(b)))
        .map(|(i, _)| i)
}
