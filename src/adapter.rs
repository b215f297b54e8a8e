//! Read-only projections over parsed DICOM-RT objects.
//!
//! [`RtObject`] wraps a `FileDicomObject<InMemDicomObject>` and exposes
//! one typed accessor per record the core consumes: demographics,
//! study/series info, referenced UIDs, image slices, structure sets,
//! stored DVHs, dose grids and plans. The core never branches on
//! concrete object type except through [`RtObject::sop_class`].

use std::collections::BTreeMap;
use std::path::Path;

use dicom::object::{FileDicomObject, InMemDicomObject, open_file};
use dicom::pixeldata::PixelDecoder;
use dicom_dictionary_std::tags;
use image::{ImageBuffer, Luma};
use ndarray::{Array2, Array3, s};
use thiserror::Error;
use tracing::debug;

use crate::dose::{DoseGrid, DoseType, SummationType, patient_pixel_lut};
use crate::dvh::Dvh;
use crate::geometry;
use crate::model::{Contour, ContourKind, Demographics, Gender, ImageSlice, Plan, Structure};

pub type DicomFile = FileDicomObject<InMemDicomObject>;

pub const UID_RT_DOSE: &str = "1.2.840.10008.5.1.4.1.1.481.2";
pub const UID_RT_STRUCT: &str = "1.2.840.10008.5.1.4.1.1.481.3";
pub const UID_RT_PLAN: &str = "1.2.840.10008.5.1.4.1.1.481.5";
pub const UID_CT_IMAGE: &str = "1.2.840.10008.5.1.4.1.1.2";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("not a DICOM file: {0}")]
    NotADicomFile(#[from] dicom::object::ReadError),

    #[error("object carries no SOP class UID")]
    MissingSopClass,

    #[error("pixel data missing or undecodable")]
    InvalidPixelData,
}

/// The four SOP classes the core recognizes. Anything carrying
/// ImageOrientationPatient that is not a dose grid counts as an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SopClass {
    RtDose,
    RtStruct,
    RtPlan,
    Image,
    Other,
}

#[derive(Debug, Clone)]
pub struct StudyInfo {
    pub description: String,
    pub uid: String,
}

#[derive(Debug, Clone)]
pub struct SeriesInfo {
    pub description: String,
    pub uid: String,
    pub modality: String,
}

/// A parsed DICOM-RT object with typed read-only accessors.
pub struct RtObject {
    pub ds: DicomFile,
}

impl RtObject {
    /// Opens and parses one DICOM file.
    ///
    /// # Errors
    ///
    /// `NotADicomFile` for unreadable or non-DICOM input,
    /// `MissingSopClass` when the mandatory SOP class UID is absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AdapterError> {
        let ds = open_file(path.as_ref())?;
        let object = Self { ds };
        if object.sop_class_uid().is_empty() {
            return Err(AdapterError::MissingSopClass);
        }
        Ok(object)
    }

    pub fn from_object(ds: DicomFile) -> Self {
        Self { ds }
    }

    fn string_of(&self, tag: dicom::core::Tag) -> Option<String> {
        self.ds
            .element(tag)
            .ok()
            .and_then(|el| el.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn string_or(&self, tag: dicom::core::Tag, default: &str) -> String {
        self.string_of(tag).unwrap_or_else(|| default.to_string())
    }

    fn floats_of(&self, tag: dicom::core::Tag) -> Option<Vec<f64>> {
        self.ds
            .element(tag)
            .ok()
            .and_then(|el| el.to_multi_float64().ok())
    }

    fn float_of(&self, tag: dicom::core::Tag) -> Option<f64> {
        self.ds.element(tag).ok().and_then(|el| el.to_float64().ok())
    }

    fn int_of(&self, tag: dicom::core::Tag) -> Option<i32> {
        self.ds.element(tag).ok().and_then(|el| el.to_int().ok())
    }

    pub fn sop_class_uid(&self) -> String {
        self.string_or(tags::SOP_CLASS_UID, "")
    }

    pub fn sop_instance_uid(&self) -> String {
        self.string_or(tags::SOP_INSTANCE_UID, "")
    }

    pub fn sop_class(&self) -> SopClass {
        match self.sop_class_uid().as_str() {
            UID_RT_DOSE => SopClass::RtDose,
            UID_RT_STRUCT => SopClass::RtStruct,
            UID_RT_PLAN => SopClass::RtPlan,
            UID_CT_IMAGE => SopClass::Image,
            _ if self.ds.element(tags::IMAGE_ORIENTATION_PATIENT).is_ok() => SopClass::Image,
            _ => SopClass::Other,
        }
    }

    pub fn modality(&self) -> String {
        self.string_or(tags::MODALITY, "")
    }

    pub fn demographics(&self) -> Demographics {
        Demographics {
            name: self
                .string_or(tags::PATIENT_NAME, "N/A")
                .replace('^', " ")
                .trim()
                .to_string(),
            id: self.string_or(tags::PATIENT_ID, "N/A"),
            birth_date: self.string_or(tags::PATIENT_BIRTH_DATE, "None Found"),
            gender: Gender::from_dicom(&self.string_or(tags::PATIENT_SEX, "")),
        }
    }

    pub fn study_info(&self) -> StudyInfo {
        StudyInfo {
            description: self.string_or(tags::STUDY_DESCRIPTION, "No description"),
            // Some vendors omit the study UID; fall back to the series.
            uid: self
                .string_of(tags::STUDY_INSTANCE_UID)
                .unwrap_or_else(|| self.string_or(tags::SERIES_INSTANCE_UID, "")),
        }
    }

    pub fn series_info(&self) -> SeriesInfo {
        SeriesInfo {
            description: self.string_or(tags::SERIES_DESCRIPTION, "No description"),
            uid: self.string_or(tags::SERIES_INSTANCE_UID, ""),
            modality: self.modality(),
        }
    }

    pub fn frame_of_reference(&self) -> String {
        self.string_or(tags::FRAME_OF_REFERENCE_UID, "")
    }

    fn sequence_items(&self, tag: dicom::core::Tag) -> &[InMemDicomObject] {
        self.ds
            .element(tag)
            .ok()
            .and_then(|el| el.items())
            .map_or(&[], |items| items)
    }

    /// Series UID the structure set references, or empty.
    pub fn referenced_series(&self) -> String {
        for frame_ref in self.sequence_items(tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE) {
            for study in item_sequence(frame_ref, tags::RT_REFERENCED_STUDY_SEQUENCE) {
                for series in item_sequence(study, tags::RT_REFERENCED_SERIES_SEQUENCE) {
                    if let Some(uid) = item_string(series, tags::SERIES_INSTANCE_UID) {
                        return uid;
                    }
                }
            }
        }
        String::new()
    }

    /// Structure set SOP instance a plan or dose references, or empty.
    pub fn referenced_structure_set(&self) -> String {
        self.sequence_items(tags::REFERENCED_STRUCTURE_SET_SEQUENCE)
            .first()
            .and_then(|item| item_string(item, tags::REFERENCED_SOP_INSTANCE_UID))
            .unwrap_or_default()
    }

    /// RT Plan SOP instance a dose references, or empty.
    pub fn referenced_rt_plan(&self) -> String {
        self.sequence_items(tags::REFERENCED_RT_PLAN_SEQUENCE)
            .first()
            .and_then(|item| item_string(item, tags::REFERENCED_SOP_INSTANCE_UID))
            .unwrap_or_default()
    }

    /// Beam number referenced through the fraction group, or empty.
    pub fn referenced_beam_in_fraction(&self) -> String {
        self.sequence_items(tags::REFERENCED_RT_PLAN_SEQUENCE)
            .first()
            .and_then(|plan| item_sequence(plan, tags::REFERENCED_FRACTION_GROUP_SEQUENCE).first())
            .and_then(|group| item_sequence(group, tags::REFERENCED_BEAM_SEQUENCE).first())
            .and_then(|beam| item_string(beam, tags::REFERENCED_BEAM_NUMBER))
            .unwrap_or_default()
    }

    /// Beam numbers defined in a plan's beam sequence.
    pub fn beam_numbers(&self) -> Vec<String> {
        self.sequence_items(tags::BEAM_SEQUENCE)
            .iter()
            .filter_map(|beam| item_string(beam, tags::BEAM_NUMBER))
            .collect()
    }

    /// Geometric attributes and pixel matrix of an image slice.
    pub fn image_data(&self) -> Result<ImageSlice, AdapterError> {
        let position = self
            .floats_of(tags::IMAGE_POSITION_PATIENT)
            .filter(|v| v.len() >= 3)
            .map_or([0.0; 3], |v| [v[0], v[1], v[2]]);
        let orientation = self
            .floats_of(tags::IMAGE_ORIENTATION_PATIENT)
            .filter(|v| v.len() >= 6)
            .map_or([1.0, 0.0, 0.0, 0.0, 1.0, 0.0], |v| {
                [v[0], v[1], v[2], v[3], v[4], v[5]]
            });
        // PixelSpacing is (row spacing, column spacing): (dy, dx).
        let spacing = self
            .floats_of(tags::PIXEL_SPACING)
            .filter(|v| v.len() >= 2)
            .map_or((1.0, 1.0), |v| (v[1], v[0]));

        let pixels = self.decode_pixels()?;
        let (rows, columns) = pixels.dim();

        Ok(ImageSlice {
            position,
            orientation,
            pixel_spacing: spacing,
            rows,
            columns,
            patient_position: self.string_or(tags::PATIENT_POSITION, ""),
            sop_instance_uid: self.sop_instance_uid(),
            series_instance_uid: self.string_or(tags::SERIES_INSTANCE_UID, ""),
            instance_number: self.int_of(tags::INSTANCE_NUMBER),
            acquisition_number: self.int_of(tags::ACQUISITION_NUMBER),
            rescale: self.rescale(),
            window_level: self.stored_window_level(),
            pixels,
        })
    }

    fn decode_pixels(&self) -> Result<Array2<i32>, AdapterError> {
        let decoded = self
            .ds
            .decode_pixel_data()
            .map_err(|_| AdapterError::InvalidPixelData)?;
        decoded
            .to_ndarray::<i32>()
            .map_err(|_| AdapterError::InvalidPixelData)
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn rescale(&self) -> Option<(f64, f64)> {
        let slope = self.float_of(tags::RESCALE_SLOPE)?;
        let intercept = self.float_of(tags::RESCALE_INTERCEPT)?;
        Some((slope, intercept))
    }

    fn stored_window_level(&self) -> Option<(f64, f64)> {
        // Multi-valued window tags: the second entry wins, per the
        // original viewer behavior.
        let pick = |values: Vec<f64>| match values.len() {
            0 => None,
            1 => Some(values[0]),
            _ => Some(values[1]),
        };
        let window = pick(self.floats_of(tags::WINDOW_WIDTH)?)?;
        let level = pick(self.floats_of(tags::WINDOW_CENTER)?)?;
        Some((window, level))
    }

    /// Default display window and level: the stored tags when present,
    /// otherwise `W = |max| + |min|`, `L = W/2 − |min|` over the
    /// rescaled pixel values.
    pub fn default_window_level(&self) -> Result<(f64, f64), AdapterError> {
        if let Some(stored) = self.stored_window_level() {
            return Ok(stored);
        }
        let pixels = self.decode_pixels()?;
        let (slope, intercept) = self.rescale().unwrap_or((1.0, 0.0));
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &raw in &pixels {
            let value = f64::from(raw) * slope + intercept;
            min = min.min(value);
            max = max.max(value);
        }
        let window = max.abs() + min.abs();
        Ok((window, window / 2.0 - min.abs()))
    }

    /// Renders the slice through the DICOM C.11.2 window/level LUT as an
    /// 8-bit greyscale image. Rescale slope/intercept applies first.
    pub fn image(&self, window: f64, level: f64) -> Result<ImageBuffer<Luma<u8>, Vec<u8>>, AdapterError> {
        let pixels = self.decode_pixels()?;
        let (slope, intercept) = self.rescale().unwrap_or((1.0, 0.0));
        let (rows, columns) = pixels.dim();
        let data: Vec<u8> = pixels
            .iter()
            .map(|&raw| window_lut(f64::from(raw) * slope + intercept, window, level))
            .collect();
        ImageBuffer::from_raw(columns as u32, rows as u32, data)
            .ok_or(AdapterError::InvalidPixelData)
    }

    /// Patient-space coordinates of the image's pixel centres.
    pub fn patient_to_pixel_lut(&self) -> Result<(Vec<f64>, Vec<f64>), AdapterError> {
        let slice = self.image_data()?;
        Ok(patient_pixel_lut(
            slice.position,
            slice.orientation,
            slice.pixel_spacing,
            slice.rows,
            slice.columns,
        ))
    }

    /// Decodes the structure set into ROI-number → [`Structure`].
    pub fn structures(&self) -> BTreeMap<u16, Structure> {
        let mut names: BTreeMap<u16, String> = BTreeMap::new();
        for roi in self.sequence_items(tags::STRUCTURE_SET_ROI_SEQUENCE) {
            if let Some(number) = item_int(roi, tags::ROI_NUMBER) {
                let name = item_string(roi, tags::ROI_NAME).unwrap_or_default();
                names.insert(number as u16, name);
            }
        }

        let mut types: BTreeMap<u16, String> = BTreeMap::new();
        for observation in self.sequence_items(tags::RTROI_OBSERVATIONS_SEQUENCE) {
            if let Some(number) = item_int(observation, tags::REFERENCED_ROI_NUMBER) {
                let roi_type =
                    item_string(observation, tags::RTROI_INTERPRETED_TYPE).unwrap_or_default();
                types.insert(number as u16, roi_type);
            }
        }

        let mut structures = BTreeMap::new();
        for roi_contour in self.sequence_items(tags::ROI_CONTOUR_SEQUENCE) {
            let Some(number) = item_int(roi_contour, tags::REFERENCED_ROI_NUMBER) else {
                continue;
            };
            let number = number as u16;
            let color = item_floats(roi_contour, tags::ROI_DISPLAY_COLOR)
                .filter(|v| v.len() >= 3)
                .map_or_else(
                    || fallback_color(number),
                    |v| [v[0] as u8, v[1] as u8, v[2] as u8],
                );

            let mut planes: BTreeMap<String, Vec<Contour>> = BTreeMap::new();
            for item in item_sequence(roi_contour, tags::CONTOUR_SEQUENCE) {
                let Some(contour) = decode_contour(item) else {
                    continue;
                };
                planes
                    .entry(geometry::z_key(contour.z()))
                    .or_default()
                    .push(contour);
            }

            structures.insert(
                number,
                Structure::new(
                    number,
                    names.get(&number).cloned().unwrap_or_default(),
                    color,
                    types.get(&number).cloned().unwrap_or_default(),
                    planes,
                ),
            );
        }
        debug!(count = structures.len(), "decoded structure set");
        structures
    }

    pub fn has_dvhs(&self) -> bool {
        !self.sequence_items(tags::DVH_SEQUENCE).is_empty()
    }

    /// Stored DVHs keyed by referenced ROI number. Differential DVHs
    /// are converted to cumulative on ingest.
    pub fn dvhs(&self) -> BTreeMap<u16, Dvh> {
        let mut dvhs = BTreeMap::new();
        for item in self.sequence_items(tags::DVH_SEQUENCE) {
            let Some(roi) = item_sequence(item, tags::DVH_REFERENCED_ROI_SEQUENCE)
                .first()
                .and_then(|r| item_int(r, tags::REFERENCED_ROI_NUMBER))
            else {
                continue;
            };
            let Some(data) = item_floats(item, tags::DVH_DATA) else {
                continue;
            };
            let kind = item_string(item, tags::DVH_TYPE).unwrap_or_default();
            let scaling_gy = item_floats(item, tags::DVH_DOSE_SCALING)
                .and_then(|v| v.first().copied())
                .unwrap_or(1.0);

            let dvh = if kind.eq_ignore_ascii_case("DIFFERENTIAL") {
                // Pairs of (bin width, volume); the dose axis is the
                // running sum of the widths.
                let mut pairs = Vec::with_capacity(data.len() / 2);
                let mut dose_gy = 0.0;
                for pair in data.chunks_exact(2) {
                    dose_gy += pair[0] * scaling_gy;
                    pairs.push((dose_gy, pair[1]));
                }
                Dvh::from_differential_pairs(&pairs)
            } else {
                let counts: Vec<f64> = data.chunks_exact(2).map(|pair| pair[1]).collect();
                // Bin width is the dose scaling in Gy; counts are cGy-binned.
                Dvh::cumulative(counts, scaling_gy * 100.0)
            };
            dvhs.insert(roi as u16, dvh);
        }
        dvhs
    }

    /// Decodes the RT Dose grid.
    pub fn dose_grid(&self) -> Result<DoseGrid, AdapterError> {
        let origin = self
            .floats_of(tags::IMAGE_POSITION_PATIENT)
            .filter(|v| v.len() >= 3)
            .map_or([0.0; 3], |v| [v[0], v[1], v[2]]);
        let orientation = self
            .floats_of(tags::IMAGE_ORIENTATION_PATIENT)
            .filter(|v| v.len() >= 6)
            .map_or([1.0, 0.0, 0.0, 0.0, 1.0, 0.0], |v| {
                [v[0], v[1], v[2], v[3], v[4], v[5]]
            });
        let spacing = self
            .floats_of(tags::PIXEL_SPACING)
            .filter(|v| v.len() >= 2)
            .map_or((1.0, 1.0), |v| (v[1], v[0]));
        let offsets = self
            .floats_of(tags::GRID_FRAME_OFFSET_VECTOR)
            .unwrap_or_default();
        let scaling = self.float_of(tags::DOSE_GRID_SCALING).unwrap_or(1.0);

        let frames = self.dose_frames()?;
        let mut grid = DoseGrid::new(
            origin,
            orientation,
            spacing,
            offsets,
            frames,
            scaling,
            self.string_or(tags::DOSE_UNITS, "GY"),
            DoseType::from_dicom(&self.string_or(tags::DOSE_TYPE, "")),
            SummationType::from_dicom(&self.string_or(tags::DOSE_SUMMATION_TYPE, "")),
        );
        grid.sop_instance_uid = self.sop_instance_uid();
        grid.referenced_plan_series = self.referenced_rt_plan();
        Ok(grid)
    }

    /// RT Dose pixel data: raw 16- or 32-bit little-endian words, shaped
    /// (frames, rows, columns). dicom-pixeldata does not cover 32-bit
    /// dose frames, so the words are assembled from the raw element.
    fn dose_frames(&self) -> Result<Array3<u32>, AdapterError> {
        let rows = self.int_of(tags::ROWS).unwrap_or(0).max(0) as usize;
        let columns = self.int_of(tags::COLUMNS).unwrap_or(0).max(0) as usize;
        let frames = self.int_of(tags::NUMBER_OF_FRAMES).unwrap_or(1).max(0) as usize;
        let bits = self.int_of(tags::BITS_ALLOCATED).unwrap_or(32);

        let bytes = self
            .ds
            .element(tags::PIXEL_DATA)
            .ok()
            .and_then(|el| el.to_bytes().ok())
            .ok_or(AdapterError::InvalidPixelData)?;

        let values: Vec<u32> = match bits {
            16 => bytes
                .chunks_exact(2)
                .map(|b| u32::from(u16::from_le_bytes([b[0], b[1]])))
                .collect(),
            32 => bytes
                .chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            _ => return Err(AdapterError::InvalidPixelData),
        };

        if values.len() < frames * rows * columns {
            return Err(AdapterError::InvalidPixelData);
        }
        Array3::from_shape_vec((frames, rows, columns), values[..frames * rows * columns].to_vec())
            .map_err(|_| AdapterError::InvalidPixelData)
    }

    /// Decodes the RT Plan and resolves the prescription dose.
    ///
    /// Priority: a SITE or VOLUME dose reference carrying a target
    /// prescription dose (Gy → cGy), then the per-beam doses times the
    /// planned fractions, then 0.
    pub fn plan(&self) -> Plan {
        let mut plan = Plan {
            label: self.string_or(tags::RT_PLAN_LABEL, ""),
            name: self.string_or(tags::RT_PLAN_NAME, ""),
            rx_dose: 0.0,
            date: self.string_or(tags::RT_PLAN_DATE, ""),
            time: self.string_or(tags::RT_PLAN_TIME, ""),
        };

        for reference in self.sequence_items(tags::DOSE_REFERENCE_SEQUENCE) {
            let structure_type =
                item_string(reference, tags::DOSE_REFERENCE_STRUCTURE_TYPE).unwrap_or_default();
            if structure_type == "SITE" || structure_type == "VOLUME" {
                if let Some(dose_gy) = item_floats(reference, tags::TARGET_PRESCRIPTION_DOSE)
                    .and_then(|v| v.first().copied())
                {
                    plan.rx_dose = (dose_gy * 100.0).round();
                    return plan;
                }
            }
        }

        if let Some(group) = self.sequence_items(tags::FRACTION_GROUP_SEQUENCE).first() {
            let fractions = item_int(group, tags::NUMBER_OF_FRACTIONS_PLANNED).unwrap_or(0);
            let beam_dose_gy: f64 = item_sequence(group, tags::REFERENCED_BEAM_SEQUENCE)
                .iter()
                .filter_map(|beam| {
                    item_floats(beam, tags::BEAM_DOSE).and_then(|v| v.first().copied())
                })
                .sum();
            plan.rx_dose = (beam_dose_gy * f64::from(fractions) * 100.0).round();
        }
        plan
    }
}

fn item_sequence(item: &InMemDicomObject, tag: dicom::core::Tag) -> &[InMemDicomObject] {
    item.element(tag)
        .ok()
        .and_then(|el| el.items())
        .map_or(&[], |items| items)
}

fn item_string(item: &InMemDicomObject, tag: dicom::core::Tag) -> Option<String> {
    item.element(tag)
        .ok()
        .and_then(|el| el.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn item_int(item: &InMemDicomObject, tag: dicom::core::Tag) -> Option<i32> {
    item.element(tag).ok().and_then(|el| el.to_int().ok())
}

fn item_floats(item: &InMemDicomObject, tag: dicom::core::Tag) -> Option<Vec<f64>> {
    item.element(tag)
        .ok()
        .and_then(|el| el.to_multi_float64().ok())
}

fn decode_contour(item: &InMemDicomObject) -> Option<Contour> {
    let kind = ContourKind::from_dicom(&item_string(item, tags::CONTOUR_GEOMETRIC_TYPE)?);
    let data = item_floats(item, tags::CONTOUR_DATA)?;
    let points: Vec<[f64; 3]> = data
        .chunks_exact(3)
        .map(|p| [p[0], p[1], p[2]])
        .collect();
    if points.is_empty() {
        return None;
    }
    Some(Contour { kind, points })
}

/// Deterministic stand-in color for ROIs without a stored one.
fn fallback_color(roi_number: u16) -> [u8; 3] {
    let mixed = u32::from(roi_number).wrapping_mul(2_654_435_761);
    [
        (mixed >> 24) as u8,
        (mixed >> 16) as u8,
        (mixed >> 8) as u8,
    ]
}

/// DICOM PS3.3 C.11.2.1.2 window/level LUT onto 8-bit grey.
fn window_lut(value: f64, window: f64, level: f64) -> u8 {
    let half = (window - 1.0) / 2.0;
    if value <= level - 0.5 - half {
        0
    } else if value > level - 0.5 + half {
        255
    } else {
        (((value - level + 0.5) / (window - 1.0) + 0.5) * 255.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::value::DataSetSequence;
    use dicom::core::{DataElement, PrimitiveValue, VR};
    use dicom::object::FileMetaTableBuilder;

    fn seq(items: Vec<InMemDicomObject>) -> DataSetSequence<InMemDicomObject> {
        DataSetSequence::from(items)
    }

    fn wrap(ds: InMemDicomObject, sop_class: &str) -> RtObject {
        let ds = ds
            .with_meta(
                FileMetaTableBuilder::new()
                    .media_storage_sop_class_uid(sop_class)
                    .media_storage_sop_instance_uid("2.25.1")
                    .transfer_syntax("1.2.840.10008.1.2.1"),
            )
            .expect("valid file meta");
        RtObject::from_object(ds)
    }

    fn with_sop_class(uid: &str) -> InMemDicomObject {
        let mut ds = InMemDicomObject::new_empty();
        ds.put(DataElement::new(
            tags::SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(uid),
        ));
        ds.put(DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from("2.25.1"),
        ));
        ds
    }

    #[test]
    fn sop_classification_covers_the_four_kinds() {
        assert_eq!(wrap(with_sop_class(UID_RT_DOSE), UID_RT_DOSE).sop_class(), SopClass::RtDose);
        assert_eq!(
            wrap(with_sop_class(UID_RT_STRUCT), UID_RT_STRUCT).sop_class(),
            SopClass::RtStruct
        );
        assert_eq!(wrap(with_sop_class(UID_RT_PLAN), UID_RT_PLAN).sop_class(), SopClass::RtPlan);
        assert_eq!(wrap(with_sop_class(UID_CT_IMAGE), UID_CT_IMAGE).sop_class(), SopClass::Image);
        assert_eq!(wrap(with_sop_class("1.2.3.4"), "1.2.3.4").sop_class(), SopClass::Other);
    }

    #[test]
    fn oriented_objects_without_known_uid_count_as_images() {
        let mut ds = with_sop_class("1.2.840.10008.5.1.4.1.1.4");
        ds.put(DataElement::new(
            tags::IMAGE_ORIENTATION_PATIENT,
            VR::DS,
            PrimitiveValue::F64(vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0].into()),
        ));
        assert_eq!(wrap(ds, "1.2.840.10008.5.1.4.1.1.4").sop_class(), SopClass::Image);
    }

    #[test]
    fn demographics_fail_soft() {
        let object = wrap(with_sop_class(UID_CT_IMAGE), UID_CT_IMAGE);
        let demo = object.demographics();
        assert_eq!(demo.name, "N/A");
        assert_eq!(demo.id, "N/A");
        assert_eq!(demo.birth_date, "None Found");
        assert_eq!(demo.gender, Gender::Other);
    }

    #[test]
    fn demographics_decode_name_and_gender() {
        let mut ds = with_sop_class(UID_CT_IMAGE);
        ds.put(DataElement::new(
            tags::PATIENT_NAME,
            VR::PN,
            PrimitiveValue::from("Doe^Jane"),
        ));
        ds.put(DataElement::new(tags::PATIENT_SEX, VR::CS, PrimitiveValue::from("F")));
        let demo = wrap(ds, UID_CT_IMAGE).demographics();
        assert_eq!(demo.name, "Doe Jane");
        assert_eq!(demo.gender, Gender::Female);
    }

    #[test]
    fn study_uid_falls_back_to_series() {
        let mut ds = with_sop_class(UID_CT_IMAGE);
        ds.put(DataElement::new(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from("2.25.77"),
        ));
        let info = wrap(ds, UID_CT_IMAGE).study_info();
        assert_eq!(info.uid, "2.25.77");
        assert_eq!(info.description, "No description");
    }

    #[test]
    fn window_lut_matches_part_3_formula() {
        // W=4096, L=2048: thresholds at 2047.5 +/- 2047.5.
        assert_eq!(window_lut(-0.5, 4096.0, 2048.0), 0);
        assert_eq!(window_lut(4095.5, 4096.0, 2048.0), 255);
        let mid = window_lut(2047.5, 4096.0, 2048.0);
        assert!((126..=128).contains(&mid), "midpoint maps near grey: {mid}");
    }

    #[test]
    fn plan_prefers_target_prescription_dose() {
        let mut reference = InMemDicomObject::new_empty();
        reference.put(DataElement::new(
            tags::DOSE_REFERENCE_STRUCTURE_TYPE,
            VR::CS,
            PrimitiveValue::from("SITE"),
        ));
        reference.put(DataElement::new(
            tags::TARGET_PRESCRIPTION_DOSE,
            VR::DS,
            PrimitiveValue::from(60.0),
        ));
        let mut ds = with_sop_class(UID_RT_PLAN);
        ds.put(DataElement::new(
            tags::DOSE_REFERENCE_SEQUENCE,
            VR::SQ,
            seq(vec![reference]),
        ));
        assert_eq!(wrap(ds, UID_RT_PLAN).plan().rx_dose, 6000.0);
    }

    #[test]
    fn plan_falls_back_to_beam_dose_times_fractions() {
        let mut beam = InMemDicomObject::new_empty();
        beam.put(DataElement::new(tags::BEAM_DOSE, VR::DS, PrimitiveValue::from(2.0)));
        let mut group = InMemDicomObject::new_empty();
        group.put(DataElement::new(
            tags::NUMBER_OF_FRACTIONS_PLANNED,
            VR::IS,
            PrimitiveValue::from(30),
        ));
        group.put(DataElement::new(
            tags::REFERENCED_BEAM_SEQUENCE,
            VR::SQ,
            seq(vec![beam]),
        ));
        let mut ds = with_sop_class(UID_RT_PLAN);
        ds.put(DataElement::new(
            tags::FRACTION_GROUP_SEQUENCE,
            VR::SQ,
            seq(vec![group]),
        ));
        assert_eq!(wrap(ds, UID_RT_PLAN).plan().rx_dose, 6000.0);
    }

    #[test]
    fn plan_without_references_has_zero_rx() {
        assert_eq!(wrap(with_sop_class(UID_RT_PLAN), UID_RT_PLAN).plan().rx_dose, 0.0);
    }

    #[test]
    fn structures_decode_contours_and_group_planes() {
        let mut roi = InMemDicomObject::new_empty();
        roi.put(DataElement::new(tags::ROI_NUMBER, VR::IS, PrimitiveValue::from(4)));
        roi.put(DataElement::new(tags::ROI_NAME, VR::LO, PrimitiveValue::from("PTV")));

        let mut contour = InMemDicomObject::new_empty();
        contour.put(DataElement::new(
            tags::CONTOUR_GEOMETRIC_TYPE,
            VR::CS,
            PrimitiveValue::from("CLOSED_PLANAR"),
        ));
        contour.put(DataElement::new(
            tags::CONTOUR_DATA,
            VR::DS,
            PrimitiveValue::F64(vec![0.0, 0.0, 2.0, 10.0, 0.0, 2.0, 10.0, 10.0, 2.0].into()),
        ));
        let mut roi_contour = InMemDicomObject::new_empty();
        roi_contour.put(DataElement::new(
            tags::REFERENCED_ROI_NUMBER,
            VR::IS,
            PrimitiveValue::from(4),
        ));
        roi_contour.put(DataElement::new(
            tags::ROI_DISPLAY_COLOR,
            VR::IS,
            PrimitiveValue::F64(vec![255.0, 128.0, 0.0].into()),
        ));
        roi_contour.put(DataElement::new(
            tags::CONTOUR_SEQUENCE,
            VR::SQ,
            seq(vec![contour]),
        ));

        let mut ds = with_sop_class(UID_RT_STRUCT);
        ds.put(DataElement::new(
            tags::STRUCTURE_SET_ROI_SEQUENCE,
            VR::SQ,
            seq(vec![roi]),
        ));
        ds.put(DataElement::new(
            tags::ROI_CONTOUR_SEQUENCE,
            VR::SQ,
            seq(vec![roi_contour]),
        ));

        let structures = wrap(ds, UID_RT_STRUCT).structures();
        let ptv = structures.get(&4).expect("ROI 4 decoded");
        assert_eq!(ptv.name, "PTV");
        assert_eq!(ptv.color, [255, 128, 0]);
        assert_eq!(ptv.planes.len(), 1);
        assert_eq!(ptv.contours_at(2.0).len(), 1);
        assert_eq!(ptv.contours_at(2.0)[0].points.len(), 3);
    }

    #[test]
    fn dose_grid_reads_32_bit_pixels_and_offsets() {
        let mut ds = with_sop_class(UID_RT_DOSE);
        ds.put(DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(1_u16)));
        ds.put(DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(2_u16)));
        ds.put(DataElement::new(
            tags::NUMBER_OF_FRAMES,
            VR::IS,
            PrimitiveValue::from(1),
        ));
        ds.put(DataElement::new(
            tags::BITS_ALLOCATED,
            VR::US,
            PrimitiveValue::from(32_u16),
        ));
        ds.put(DataElement::new(
            tags::GRID_FRAME_OFFSET_VECTOR,
            VR::DS,
            PrimitiveValue::F64(vec![0.0].into()),
        ));
        ds.put(DataElement::new(
            tags::DOSE_GRID_SCALING,
            VR::DS,
            PrimitiveValue::from(0.001),
        ));
        let words: Vec<u8> = [7_u32, 1_000_000]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        ds.put(DataElement::new(
            tags::PIXEL_DATA,
            VR::OW,
            PrimitiveValue::from(words),
        ));

        let grid = wrap(ds, UID_RT_DOSE).dose_grid().expect("grid decodes");
        assert_eq!(grid.frames.dim(), (1, 1, 2));
        assert_eq!(grid.frames[[0, 0, 0]], 7);
        assert_eq!(grid.frames[[0, 0, 1]], 1_000_000);
        assert_eq!(grid.scaling, 0.001);
    }

    #[test]
    fn stored_cumulative_dvh_is_keyed_by_roi() {
        let mut roi_ref = InMemDicomObject::new_empty();
        roi_ref.put(DataElement::new(
            tags::REFERENCED_ROI_NUMBER,
            VR::IS,
            PrimitiveValue::from(2),
        ));
        let mut dvh_item = InMemDicomObject::new_empty();
        dvh_item.put(DataElement::new(
            tags::DVH_TYPE,
            VR::CS,
            PrimitiveValue::from("CUMULATIVE"),
        ));
        dvh_item.put(DataElement::new(
            tags::DVH_DOSE_SCALING,
            VR::DS,
            PrimitiveValue::from(0.01),
        ));
        dvh_item.put(DataElement::new(
            tags::DVH_DATA,
            VR::DS,
            PrimitiveValue::F64(vec![0.01, 30.0, 0.01, 20.0, 0.01, 10.0].into()),
        ));
        dvh_item.put(DataElement::new(
            tags::DVH_REFERENCED_ROI_SEQUENCE,
            VR::SQ,
            seq(vec![roi_ref]),
        ));
        let mut ds = with_sop_class(UID_RT_DOSE);
        ds.put(DataElement::new(
            tags::DVH_SEQUENCE,
            VR::SQ,
            seq(vec![dvh_item]),
        ));

        let object = wrap(ds, UID_RT_DOSE);
        assert!(object.has_dvhs());
        let dvhs = object.dvhs();
        let dvh = dvhs.get(&2).expect("ROI 2 DVH present");
        assert_eq!(dvh.counts, vec![30.0, 20.0, 10.0]);
        assert_eq!(dvh.bin_width, 1.0);
    }
}
