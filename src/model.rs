//! Plain records assembled from DICOM-RT objects: demographics, image
//! slices, segmented structures, plans and the per-patient record that
//! groups them.
//!
//! Records are immutable after assembly except for additive caches
//! (structure volume and plane index), which use [`OnceLock`].

use std::collections::BTreeMap;
use std::sync::OnceLock;

use ndarray::Array2;

use crate::dose::DoseGrid;
use crate::dvh::Dvh;
use crate::geometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn from_dicom(code: &str) -> Self {
        match code.trim() {
            "M" => Self::Male,
            "F" => Self::Female,
            _ => Self::Other,
        }
    }
}

/// Patient demographics; missing DICOM fields fail soft to the
/// placeholder strings chosen at decode time.
#[derive(Debug, Clone)]
pub struct Demographics {
    pub name: String,
    pub id: String,
    pub birth_date: String,
    pub gender: Gender,
}

/// One image slice of a series, pixel matrix included.
#[derive(Debug, Clone)]
pub struct ImageSlice {
    /// ImagePositionPatient in mm.
    pub position: [f64; 3],
    /// ImageOrientationPatient: two row-direction cosines.
    pub orientation: [f64; 6],
    /// (column spacing dx, row spacing dy) in mm.
    pub pixel_spacing: (f64, f64),
    pub rows: usize,
    pub columns: usize,
    /// PatientPosition code, e.g. "HFS" or "FFP".
    pub patient_position: String,
    pub sop_instance_uid: String,
    pub series_instance_uid: String,
    pub instance_number: Option<i32>,
    pub acquisition_number: Option<i32>,
    /// (slope, intercept) when RescaleSlope/RescaleIntercept are present.
    pub rescale: Option<(f64, f64)>,
    /// Default (window, level) from the object, if any.
    pub window_level: Option<(f64, f64)>,
    pub pixels: Array2<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContourKind {
    ClosedPlanar,
    Point,
    OpenPlanar,
    Other(String),
}

impl ContourKind {
    pub fn from_dicom(geometric_type: &str) -> Self {
        match geometric_type.trim() {
            "CLOSED_PLANAR" => Self::ClosedPlanar,
            "POINT" => Self::Point,
            "OPEN_PLANAR" => Self::OpenPlanar,
            other => Self::Other(other.to_string()),
        }
    }
}

/// An ordered ring of 3-D points sharing one z.
#[derive(Debug, Clone)]
pub struct Contour {
    pub kind: ContourKind,
    pub points: Vec<[f64; 3]>,
}

impl Contour {
    /// z of the plane this contour lies on (0.0 for empty contours).
    pub fn z(&self) -> f64 {
        self.points.first().map_or(0.0, |p| p[2])
    }

    pub fn area(&self) -> f64 {
        geometry::polygon_area(&self.points)
    }
}

/// A segmented region of interest: contours grouped by normalized
/// z-key, plus derived thickness and cached volume.
#[derive(Debug)]
pub struct Structure {
    pub id: u16,
    pub name: String,
    pub color: [u8; 3],
    /// RT ROI interpreted type: PTV, ORGAN, EXTERNAL, ...
    pub roi_type: String,
    /// z-key (see [`geometry::z_key`]) to sibling contours on that plane.
    pub planes: BTreeMap<String, Vec<Contour>>,
    z_index: OnceLock<Vec<f64>>,
    volume: OnceLock<f64>,
}

impl Structure {
    pub fn new(
        id: u16,
        name: String,
        color: [u8; 3],
        roi_type: String,
        planes: BTreeMap<String, Vec<Contour>>,
    ) -> Self {
        Self {
            id,
            name,
            color,
            roi_type,
            planes,
            z_index: OnceLock::new(),
            volume: OnceLock::new(),
        }
    }

    /// Plane heights in ascending order, built once on first use.
    pub fn z_values(&self) -> &[f64] {
        self.z_index.get_or_init(|| {
            let mut zs: Vec<f64> = self
                .planes
                .values()
                .filter_map(|contours| contours.first())
                .map(Contour::z)
                .collect();
            zs.sort_by(f64::total_cmp);
            zs
        })
    }

    /// Minimum positive plane spacing in mm; 0.0 when indeterminate.
    pub fn thickness(&self) -> f64 {
        geometry::plane_thickness(self.z_values()).unwrap_or(0.0)
    }

    pub fn contours_at(&self, z: f64) -> &[Contour] {
        self.planes
            .get(&geometry::z_key(z))
            .map_or(&[], Vec::as_slice)
    }

    /// Effective area of one plane: the largest contour, with every
    /// other contour added, or subtracted when its representative point
    /// falls inside the largest (island-in-hole).
    fn plane_area(contours: &[Contour]) -> f64 {
        let rings: Vec<&[[f64; 3]]> = contours.iter().map(|c| c.points.as_slice()).collect();
        let Some(largest) = geometry::largest_ring(&rings) else {
            return 0.0;
        };
        let mut area = geometry::polygon_area(rings[largest]);
        for (i, ring) in rings.iter().enumerate() {
            if i == largest {
                continue;
            }
            let inner = geometry::polygon_area(ring);
            match ring.first() {
                Some(p) if geometry::point_in_polygon(p[0], p[1], rings[largest]) => area -= inner,
                _ => area += inner,
            }
        }
        area
    }

    /// Structure volume in cm³: per-plane effective areas weighted by the
    /// structure thickness, half weight on the top and bottom planes.
    pub fn volume_cc(&self) -> f64 {
        *self.volume.get_or_init(|| {
            let zs = self.z_values();
            let thickness = self.thickness();
            let planes = zs.len();
            let mut volume = 0.0;
            for (i, &z) in zs.iter().enumerate() {
                let weight = if i == 0 || i + 1 == planes { 0.5 } else { 1.0 };
                volume += Self::plane_area(self.contours_at(z)) * thickness * weight;
            }
            volume / 1000.0
        })
    }
}

/// Treatment plan summary; `rx_dose` in cGy.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub label: String,
    pub name: String,
    pub rx_dose: f64,
    pub date: String,
    pub time: String,
}

/// One patient's assembled record.
#[derive(Debug, Default)]
pub struct Patient {
    pub demographics: Option<Demographics>,
    pub images: Option<Vec<ImageSlice>>,
    pub structures: Option<BTreeMap<u16, Structure>>,
    pub plan: Option<Plan>,
    pub dose: Option<DoseGrid>,
    pub dvhs: BTreeMap<u16, Dvh>,
}
