use ndarray::ArrayView3;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Trilinear sample of `volume` (z, y, x index order) at fractional
    /// index coordinates. Coordinates outside the volume contribute zero.
    pub(crate) fn trilinear_interpolate(volume: &ArrayView3<f64>, z: f64, y: f64, x: f64) -> f64 {
        let (depth, height, width) = volume.dim();
        if depth == 0 || height == 0 || width == 0 {
            return 0.0;
        }
        if z < 0.0
            || y < 0.0
            || x < 0.0
            || z > (depth - 1) as f64
            || y > (height - 1) as f64
            || x > (width - 1) as f64
        {
            return 0.0;
        }

        let z0 = z.floor() as usize;
        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let z1 = (z0 + 1).min(depth - 1);
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);

        let dz = z - z0 as f64;
        let dy = y - y0 as f64;
        let dx = x - x0 as f64;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;

        let lerp_plane = |zi: usize| {
            let v00 = volume[[zi, y0, x0]];
            let v01 = volume[[zi, y0, x1]];
            let v10 = volume[[zi, y1, x0]];
            let v11 = volume[[zi, y1, x1]];
            let v0 = v00.mul_add(one_minus_dx, v01 * dx);
            let v1 = v10.mul_add(one_minus_dx, v11 * dx);
            v0.mul_add(one_minus_dy, v1 * dy)
        };

        let p0 = lerp_plane(z0);
        let p1 = lerp_plane(z1);
        p0.mul_add(1.0 - dz, p1 * dz)
    }
}
