//! Groups a stream of parsed DICOM objects into per-patient records:
//! SHA-1 patient keying, SOP-class bucketing, resolution of the
//! dose → plan → structure set → series chain, slice ordering and the
//! final patient build.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapter::{RtObject, SopClass};
use crate::dose::SummationType;
use crate::model::{ImageSlice, Patient};
use crate::worker::{CancelToken, Cancelled, ProgressSink, check_cancelled, post};

pub const MISSING_STRUCTURE_SET: &str = "RT Structure Set not found";
pub const MISSING_PLAN: &str = "RT Plan not found";
pub const MISSING_DOSE: &str = "RT Dose not found";

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Patients are keyed by the SHA-1 of their PatientID.
pub fn patient_hash(patient_id: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(patient_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One image series of a patient.
#[derive(Debug, Default)]
pub struct SeriesBucket {
    pub uid: String,
    pub description: String,
    pub modality: String,
    pub frame_of_reference: String,
    pub files: Vec<PathBuf>,
}

#[derive(Debug)]
pub struct StructureSetRef {
    pub label: String,
    pub file: PathBuf,
    pub referenced_series: String,
    pub frame_of_reference: String,
}

#[derive(Debug)]
pub struct PlanRef {
    pub label: String,
    pub name: String,
    pub rx_dose: f64,
    pub referenced_structure_set: String,
    pub beams: Vec<String>,
    pub file: PathBuf,
}

#[derive(Debug)]
pub struct DoseRef {
    pub has_dvhs: bool,
    pub has_grid: bool,
    pub summation: SummationType,
    pub referenced_plan: String,
    pub referenced_structure_set: String,
    pub referenced_beam: String,
    pub file: PathBuf,
}

/// Everything indexed for one patient before the full record is built.
#[derive(Debug, Default)]
pub struct PatientIndex {
    pub name: String,
    pub id: String,
    pub series: BTreeMap<String, SeriesBucket>,
    pub structure_sets: BTreeMap<String, StructureSetRef>,
    pub plans: BTreeMap<String, PlanRef>,
    pub doses: BTreeMap<String, DoseRef>,
}

/// The dose→plan→rtss→series chain of one dose object, with
/// placeholders where a link is missing so a display can still anchor
/// the dose to a frame of reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoseChain {
    pub dose_uid: String,
    pub plan_label: String,
    pub structure_set_label: String,
    pub series_uid: String,
}

impl PatientIndex {
    fn absorb(&mut self, object: &RtObject, path: &Path) {
        let sop_instance = object.sop_instance_uid();
        match object.sop_class() {
            SopClass::Image => {
                let info = object.series_info();
                let bucket = self.series.entry(info.uid.clone()).or_default();
                bucket.uid = info.uid;
                bucket.description = info.description;
                bucket.modality = info.modality;
                bucket.frame_of_reference = object.frame_of_reference();
                bucket.files.push(path.to_path_buf());
            }
            SopClass::RtStruct => {
                // Last-wins on duplicate SOP instances.
                if self.structure_sets.contains_key(&sop_instance) {
                    debug!(uid = %sop_instance, "duplicate structure set, overwriting");
                }
                self.structure_sets.insert(
                    sop_instance,
                    StructureSetRef {
                        label: object.series_info().description,
                        file: path.to_path_buf(),
                        referenced_series: object.referenced_series(),
                        frame_of_reference: object.frame_of_reference(),
                    },
                );
            }
            SopClass::RtPlan => {
                let plan = object.plan();
                self.plans.insert(
                    sop_instance,
                    PlanRef {
                        label: plan.label,
                        name: plan.name,
                        rx_dose: plan.rx_dose,
                        referenced_structure_set: object.referenced_structure_set(),
                        beams: object.beam_numbers(),
                        file: path.to_path_buf(),
                    },
                );
            }
            SopClass::RtDose => {
                self.doses.insert(
                    sop_instance,
                    DoseRef {
                        has_dvhs: object.has_dvhs(),
                        has_grid: object
                            .ds
                            .element(dicom_dictionary_std::tags::PIXEL_DATA)
                            .is_ok(),
                        summation: SummationType::from_dicom(
                            &object
                                .ds
                                .element(dicom_dictionary_std::tags::DOSE_SUMMATION_TYPE)
                                .ok()
                                .and_then(|el| el.to_str().ok())
                                .map(|s| s.trim().to_string())
                                .unwrap_or_default(),
                        ),
                        referenced_plan: object.referenced_rt_plan(),
                        referenced_structure_set: object.referenced_structure_set(),
                        referenced_beam: object.referenced_beam_in_fraction(),
                        file: path.to_path_buf(),
                    },
                );
            }
            SopClass::Other => {
                info!(path = %path.display(), "unsupported SOP class, skipping");
            }
        }
    }

    /// Resolves every dose's chain, substituting placeholder labels for
    /// missing links.
    pub fn dose_chains(&self) -> Vec<DoseChain> {
        self.doses
            .iter()
            .map(|(dose_uid, dose)| {
                let plan = self.plans.get(&dose.referenced_plan);
                let rtss_uid = plan
                    .map(|p| p.referenced_structure_set.clone())
                    .filter(|uid| !uid.is_empty())
                    .unwrap_or_else(|| dose.referenced_structure_set.clone());
                let rtss = self.structure_sets.get(&rtss_uid);
                DoseChain {
                    dose_uid: dose_uid.clone(),
                    plan_label: plan.map_or_else(
                        || MISSING_PLAN.to_string(),
                        |p| {
                            if p.label.is_empty() {
                                p.name.clone()
                            } else {
                                p.label.clone()
                            }
                        },
                    ),
                    structure_set_label: rtss
                        .map_or_else(|| MISSING_STRUCTURE_SET.to_string(), |s| s.label.clone()),
                    series_uid: rtss.map(|s| s.referenced_series.clone()).unwrap_or_default(),
                }
            })
            .collect()
    }

    pub fn all_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .series
            .values()
            .flat_map(|s| s.files.iter().cloned())
            .collect();
        files.extend(self.structure_sets.values().map(|s| s.file.clone()));
        files.extend(self.plans.values().map(|p| p.file.clone()));
        files.extend(self.doses.values().map(|d| d.file.clone()));
        files
    }
}

/// Scans a directory for DICOM objects and indexes them per patient.
///
/// Non-DICOM and unreadable files are logged and skipped; an invalid or
/// empty directory yields an empty map. Progress is posted per file.
pub fn scan_directory(
    path: impl AsRef<Path>,
    search_subfolders: bool,
    progress: Option<ProgressSink<'_>>,
    cancel: &CancelToken,
) -> Result<BTreeMap<String, PatientIndex>, AssembleError> {
    let mut files = Vec::new();
    collect_files(path.as_ref(), search_subfolders, &mut files);
    if files.is_empty() {
        warn!(path = %path.as_ref().display(), "no files found to import");
        return Ok(BTreeMap::new());
    }
    files.sort();

    let total = files.len();
    let mut patients: BTreeMap<String, PatientIndex> = BTreeMap::new();
    for (done, file) in files.iter().enumerate() {
        check_cancelled(cancel, progress, done, total)?;

        match RtObject::open(file) {
            Ok(object) => {
                let demographics = object.demographics();
                let index = patients.entry(patient_hash(&demographics.id)).or_default();
                index.name = demographics.name;
                index.id = demographics.id;
                index.absorb(&object, file);
            }
            Err(error) => {
                info!(path = %file.display(), %error, "skipping file");
            }
        }
        post(progress, done + 1, total, &file.display().to_string());
    }
    debug!(patients = patients.len(), files = total, "scan complete");
    Ok(patients)
}

fn collect_files(path: &Path, recurse: bool, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(path) else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        let entry_path = entry.path();
        if entry_path.is_dir() {
            if recurse {
                collect_files(&entry_path, recurse, out);
            }
        } else {
            out.push(entry_path);
        }
    }
}

/// Builds the full patient record from one patient's files: sorted
/// image series plus structures, plan, dose grid and stored DVHs.
pub fn build_patient(
    index: &PatientIndex,
    progress: Option<ProgressSink<'_>>,
    cancel: &CancelToken,
) -> Result<Patient, AssembleError> {
    let files = index.all_files();
    let total = files.len();
    let mut patient = Patient::default();
    let mut slices: Vec<ImageSlice> = Vec::new();

    for (done, file) in files.iter().enumerate() {
        check_cancelled(cancel, progress, done, total)?;

        let object = match RtObject::open(file) {
            Ok(object) => object,
            Err(error) => {
                info!(path = %file.display(), %error, "skipping file");
                continue;
            }
        };
        if patient.demographics.is_none() {
            patient.demographics = Some(object.demographics());
        }
        match object.sop_class() {
            SopClass::Image => match object.image_data() {
                Ok(slice) => slices.push(slice),
                Err(error) => warn!(path = %file.display(), %error, "undecodable image"),
            },
            SopClass::RtStruct => {
                patient.structures = Some(object.structures());
            }
            SopClass::RtPlan => {
                patient.plan = Some(object.plan());
            }
            SopClass::RtDose => {
                if object.has_dvhs() {
                    patient.dvhs.extend(object.dvhs());
                }
                match object.dose_grid() {
                    Ok(grid) => patient.dose = Some(grid),
                    Err(error) => warn!(path = %file.display(), %error, "undecodable dose"),
                }
            }
            SopClass::Other => {}
        }
        post(progress, done + 1, total, &file.display().to_string());
    }

    if !slices.is_empty() {
        sort_images(&mut slices);
        patient.images = Some(slices);
    }
    Ok(patient)
}

/// Orders image slices for display.
///
/// A series is "parallel" when every consecutive pair differs in both
/// rounded orientation and rounded position. Parallel series sort by
/// position z (descending for head-first patients); other series fall
/// back to InstanceNumber, then AcquisitionNumber.
pub fn sort_images(slices: &mut [ImageSlice]) {
    if slices.len() < 2 {
        return;
    }

    let parallel = slices.windows(2).all(|pair| {
        let orientation_delta = pair[0]
            .orientation
            .iter()
            .zip(&pair[1].orientation)
            .any(|(a, b)| (a - b).round() != 0.0);
        let position_delta = pair[0]
            .position
            .iter()
            .zip(&pair[1].position)
            .any(|(a, b)| (a - b).round() != 0.0);
        orientation_delta && position_delta
    });

    let instance_numbers_differ = slices
        .windows(2)
        .any(|pair| pair[0].instance_number != pair[1].instance_number);

    if parallel {
        let head_first = slices[0].patient_position.to_ascii_lowercase().contains("hf");
        slices.sort_by(|a, b| a.position[2].total_cmp(&b.position[2]));
        if head_first {
            slices.reverse();
        }
    } else if instance_numbers_differ {
        slices.sort_by_key(|s| s.instance_number);
    } else {
        slices.sort_by_key(|s| s.acquisition_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn slice(z: f64, orientation_x: f64, instance: i32, acquisition: i32, position: &str) -> ImageSlice {
        ImageSlice {
            position: [0.0, 0.0, z],
            orientation: [orientation_x, 0.0, 0.0, 0.0, 1.0, 0.0],
            pixel_spacing: (1.0, 1.0),
            rows: 1,
            columns: 1,
            patient_position: position.to_string(),
            sop_instance_uid: format!("2.25.{instance}"),
            series_instance_uid: "2.25.9".to_string(),
            instance_number: Some(instance),
            acquisition_number: Some(acquisition),
            rescale: None,
            window_level: None,
            pixels: Array2::zeros((1, 1)),
        }
    }

    #[test]
    fn patient_hash_is_stable_and_hex() {
        let hash = patient_hash("PAT-001");
        assert_eq!(hash.len(), 40);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, patient_hash("PAT-001"));
        assert_ne!(hash, patient_hash("PAT-002"));
    }

    #[test]
    fn parallel_head_first_series_sorts_z_descending() {
        // Orientation and position both change between slices.
        let mut slices = vec![
            slice(10.0, 1.0, 1, 1, "HFS"),
            slice(30.0, 2.0, 2, 1, "HFS"),
            slice(20.0, 3.0, 3, 1, "HFS"),
        ];
        sort_images(&mut slices);
        let zs: Vec<f64> = slices.iter().map(|s| s.position[2]).collect();
        assert_eq!(zs, vec![30.0, 20.0, 10.0]);
    }

    #[test]
    fn parallel_feet_first_series_sorts_z_ascending() {
        let mut slices = vec![
            slice(30.0, 1.0, 1, 1, "FFS"),
            slice(10.0, 2.0, 2, 1, "FFS"),
        ];
        sort_images(&mut slices);
        let zs: Vec<f64> = slices.iter().map(|s| s.position[2]).collect();
        assert_eq!(zs, vec![10.0, 30.0]);
    }

    #[test]
    fn non_parallel_series_sorts_by_instance_number() {
        // Identical orientations: not a "parallel" stack.
        let mut slices = vec![
            slice(30.0, 1.0, 3, 1, "HFS"),
            slice(10.0, 1.0, 1, 1, "HFS"),
            slice(20.0, 1.0, 2, 1, "HFS"),
        ];
        sort_images(&mut slices);
        let numbers: Vec<i32> = slices.iter().filter_map(|s| s.instance_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn equal_instance_numbers_fall_back_to_acquisition() {
        let mut slices = vec![
            slice(30.0, 1.0, 1, 5, "HFS"),
            slice(10.0, 1.0, 1, 2, "HFS"),
        ];
        sort_images(&mut slices);
        let acquisitions: Vec<i32> = slices.iter().filter_map(|s| s.acquisition_number).collect();
        assert_eq!(acquisitions, vec![2, 5]);
    }

    #[test]
    fn dose_chain_placeholders_for_missing_links() {
        let mut index = PatientIndex::default();
        index.doses.insert(
            "2.25.50".into(),
            DoseRef {
                has_dvhs: false,
                has_grid: true,
                summation: SummationType::Plan,
                referenced_plan: "2.25.60".into(),
                referenced_structure_set: String::new(),
                referenced_beam: String::new(),
                file: PathBuf::from("dose.dcm"),
            },
        );
        let chains = index.dose_chains();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].plan_label, MISSING_PLAN);
        assert_eq!(chains[0].structure_set_label, MISSING_STRUCTURE_SET);
    }

    #[test]
    fn dose_chain_resolves_through_plan_to_series() {
        let mut index = PatientIndex::default();
        index.structure_sets.insert(
            "2.25.70".into(),
            StructureSetRef {
                label: "Pelvis".into(),
                file: PathBuf::from("rtss.dcm"),
                referenced_series: "2.25.80".into(),
                frame_of_reference: "2.25.90".into(),
            },
        );
        index.plans.insert(
            "2.25.60".into(),
            PlanRef {
                label: "Plan A".into(),
                name: String::new(),
                rx_dose: 6000.0,
                referenced_structure_set: "2.25.70".into(),
                beams: Vec::new(),
                file: PathBuf::from("rtplan.dcm"),
            },
        );
        index.doses.insert(
            "2.25.50".into(),
            DoseRef {
                has_dvhs: true,
                has_grid: true,
                summation: SummationType::Plan,
                referenced_plan: "2.25.60".into(),
                referenced_structure_set: String::new(),
                referenced_beam: String::new(),
                file: PathBuf::from("dose.dcm"),
            },
        );
        let chains = index.dose_chains();
        assert_eq!(
            chains[0],
            DoseChain {
                dose_uid: "2.25.50".into(),
                plan_label: "Plan A".into(),
                structure_set_label: "Pelvis".into(),
                series_uid: "2.25.80".into(),
            }
        );
    }

    #[test]
    fn scanning_a_missing_directory_yields_no_patients() {
        let patients = scan_directory(
            "/definitely/not/a/real/path",
            true,
            None,
            &CancelToken::new(),
        )
        .expect("not cancelled");
        assert!(patients.is_empty());
    }
}
