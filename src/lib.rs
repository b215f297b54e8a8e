//! # DICOM-RT dose analysis library
//!
//! This crate computes dose-volume histograms, conformity indices and
//! plan sums over DICOM-RT object sets.
//!
//! This library is part of the dicom-rs ecosystem and leverages its
//! components to read RT Dose, RT Structure Set, RT Plan and image
//! storage objects. A directory of files is scanned into per-patient
//! records keyed by a hash of the PatientID; each record carries the
//! sorted image series, segmented structures, the plan and the dose
//! grid. From there:
//!  - cumulative DVHs are calculated per structure from the contour
//!    geometry and the dose grid, or taken from the RT Dose object
//!    when it already carries them,
//!  - DVHs answer dose and volume constraints (D_v, V_d, min, mean,
//!    max) in absolute or relative terms,
//!  - the Paddick conformity index and over/underdose ratios are
//!    derived for a prescription isodose level,
//!  - two independently gridded dose volumes are trilinearly resampled
//!    onto a common lattice and summed,
//!  - object sets are anonymized in place.
//!
//! Plane rasterization and resampling are parallelized with rayon.
//! Long-running operations accept a progress callback and a
//! cooperative cancel token.
//!
//! # Examples
//!
//! ## Calculating a DVH for every structure of a patient
//!
//! ```no_run
//! # use dicom_dvh::assembler::{scan_directory, build_patient};
//! # use dicom_dvh::dvhcalc::calculate_dvh;
//! # use dicom_dvh::worker::CancelToken;
//! let cancel = CancelToken::new();
//! let patients = scan_directory("dicom", true, None, &cancel)?;
//! for index in patients.values() {
//!     let patient = build_patient(index, None, &cancel)?;
//!     let (Some(structures), Some(dose)) = (&patient.structures, &patient.dose) else {
//!         continue;
//!     };
//!     for structure in structures.values() {
//!         let dvh = calculate_dvh(structure, dose, None, None, &cancel)?;
//!         println!("{}: {:.1} cc", structure.name, dvh.total_volume());
//!     }
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod adapter;
pub mod anonymize;
pub mod assembler;
pub mod config;
pub mod conformity;
pub mod dose;
pub mod dvh;
pub mod dvhcalc;
pub mod export;
pub mod geometry;
mod interpolator;
pub mod model;
pub mod output;
pub mod plansum;
pub mod worker;
