//! The 3-D dose grid: stored integer frames with an affine
//! pixel→patient mapping, a multiplicative dose scaling and per-frame z
//! offsets. Supports direct frame lookup and linear interpolation
//! between frames.

use ndarray::{Array2, Array3};

/// Default distance (mm) under which a requested z snaps to a stored
/// frame instead of interpolating.
pub const FRAME_SNAP_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoseType {
    Physical,
    Effective,
    Other(String),
}

impl DoseType {
    pub fn from_dicom(value: &str) -> Self {
        match value.trim() {
            "PHYSICAL" => Self::Physical,
            "EFFECTIVE" => Self::Effective,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummationType {
    Plan,
    Fraction,
    Beam,
    Other(String),
}

impl SummationType {
    pub fn from_dicom(value: &str) -> Self {
        match value.trim() {
            "PLAN" => Self::Plan,
            "FRACTION" => Self::Fraction,
            "BEAM" => Self::Beam,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Summary of the dose object exposed to viewers and reports.
#[derive(Debug, Clone)]
pub struct DoseData {
    pub units: String,
    pub dose_type: DoseType,
    pub summation: SummationType,
    pub scaling: f64,
    /// Largest stored pixel times the grid scaling (Gy).
    pub max_dose: f64,
}

#[derive(Debug, Clone)]
pub struct DoseGrid {
    /// ImagePositionPatient of frame 0, mm.
    pub origin: [f64; 3],
    pub orientation: [f64; 6],
    /// (column spacing dx, row spacing dy) in mm.
    pub pixel_spacing: (f64, f64),
    /// Frame z offsets relative to `origin[2]`, ascending.
    offsets: Vec<f64>,
    /// Stored pixel values, shape (frames, rows, columns).
    pub frames: Array3<u32>,
    /// Multiplies stored values into physical dose (`units`).
    pub scaling: f64,
    pub units: String,
    pub dose_type: DoseType,
    pub summation: SummationType,
    pub sop_instance_uid: String,
    /// Series UID of the referenced RT Plan; plan sums refuse to mix.
    pub referenced_plan_series: String,
}

impl DoseGrid {
    /// Builds a grid, normalizing the grid-frame-offset vector: vendors
    /// write it either relative (first entry 0) or absolute (first
    /// entry equal to `origin.z`), ascending or descending. Stored
    /// relative and ascending in all cases, reordering the frames and
    /// rebasing the origin when the input runs the other way.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mut origin: [f64; 3],
        orientation: [f64; 6],
        pixel_spacing: (f64, f64),
        offsets: Vec<f64>,
        mut frames: Array3<u32>,
        scaling: f64,
        units: String,
        dose_type: DoseType,
        summation: SummationType,
    ) -> Self {
        let mut offsets = match offsets.first() {
            Some(&first) if first != 0.0 => offsets.iter().map(|o| o - first).collect(),
            _ => offsets,
        };
        if offsets.len() > 1 && offsets[offsets.len() - 1] < offsets[0] {
            origin[2] += offsets[offsets.len() - 1];
            offsets.reverse();
            let base = offsets[0];
            for offset in &mut offsets {
                *offset -= base;
            }
            frames.invert_axis(ndarray::Axis(0));
        }
        Self {
            origin,
            orientation,
            pixel_spacing,
            offsets,
            frames,
            scaling,
            units,
            dose_type,
            summation,
            sop_instance_uid: String::new(),
            referenced_plan_series: String::new(),
        }
    }

    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }

    /// Absolute patient-space z of each frame.
    pub fn frame_zs(&self) -> Vec<f64> {
        self.offsets.iter().map(|o| o + self.origin[2]).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Largest stored pixel value.
    pub fn max_pixel(&self) -> u32 {
        self.frames.iter().copied().max().unwrap_or(0)
    }

    pub fn dose_data(&self) -> DoseData {
        DoseData {
            units: self.units.clone(),
            dose_type: self.dose_type.clone(),
            summation: self.summation.clone(),
            scaling: self.scaling,
            max_dose: f64::from(self.max_pixel()) * self.scaling,
        }
    }

    /// Dose plane at patient z, in stored (unscaled) units.
    ///
    /// Snaps to the nearest frame within `threshold` mm; otherwise
    /// linearly interpolates between the two bracketing frames.
    /// Returns `None` when z lies outside the grid.
    pub fn dose_plane(&self, z: f64, threshold: f64) -> Option<Array2<f64>> {
        let planes = self.frame_zs();
        if planes.is_empty() || self.is_empty() {
            return None;
        }
        let nearest = planes
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (*a - z).abs().total_cmp(&(*b - z).abs()))
            .map(|(i, _)| i)?;
        if (planes[nearest] - z).abs() < threshold {
            return Some(self.frames.index_axis(ndarray::Axis(0), nearest).mapv(f64::from));
        }

        let (min_z, max_z) = (planes[0], planes[planes.len() - 1]);
        if z < min_z.min(max_z) || z > min_z.max(max_z) {
            return None;
        }

        // Offsets are monotonic, so the bracketing frames are the
        // nearest one and its neighbour on the other side of z.
        let (lb, ub) = if planes[nearest] < z {
            (nearest, nearest + 1)
        } else {
            (nearest - 1, nearest)
        };
        let fz = (z - planes[lb]) / (planes[ub] - planes[lb]);
        let lower = self.frames.index_axis(ndarray::Axis(0), lb).mapv(f64::from);
        let upper = self.frames.index_axis(ndarray::Axis(0), ub).mapv(f64::from);
        Some(&upper * fz + &lower * (1.0 - fz))
    }

    /// (column, row) indices of the plane at z whose dose is at least
    /// `level` cGy.
    pub fn isodose_points(&self, z: f64, level: f64, threshold: f64) -> Vec<(usize, usize)> {
        let Some(plane) = self.dose_plane(z, threshold) else {
            return Vec::new();
        };
        let to_cgy = self.scaling * 100.0;
        plane
            .indexed_iter()
            .filter(|&(_, &value)| value * to_cgy >= level)
            .map(|((row, col), _)| (col, row))
            .collect()
    }

    /// Patient-space coordinates of the pixel centres: one vector per
    /// axis, x from the column index, y from the row index.
    pub fn pixel_lut(&self) -> (Vec<f64>, Vec<f64>) {
        let (frames_rows, columns) = {
            let (_, rows, columns) = self.frames.dim();
            (rows, columns)
        };
        patient_pixel_lut(
            self.origin,
            self.orientation,
            self.pixel_spacing,
            frames_rows,
            columns,
        )
    }
}

/// Pixel-centre LUT from the DICOM affine: the first two columns of the
/// 4×4 mapping are `orientation[0..3]·dx` and `orientation[3..6]·dy`.
/// The x vector varies the column index at row 0; the y vector varies
/// the row index at column 0.
pub fn patient_pixel_lut(
    position: [f64; 3],
    orientation: [f64; 6],
    pixel_spacing: (f64, f64),
    rows: usize,
    columns: usize,
) -> (Vec<f64>, Vec<f64>) {
    let (dx, dy) = pixel_spacing;
    let xs = (0..columns)
        .map(|i| position[0] + orientation[0] * dx * i as f64)
        .collect();
    let ys = (0..rows)
        .map(|j| position[1] + orientation[4] * dy * j as f64)
        .collect();
    (xs, ys)
}
