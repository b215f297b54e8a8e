//! CSV dump of a patient's DVH set.
//!
//! One file per patient: a header row of 10-cGy dose columns up to the
//! largest dose observed across all structures, then one row per ROI
//! with relative-volume counts. Cells past a structure's last bin are
//! 0.0.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::dvh::{Dvh, VolumeUnits};
use crate::model::Structure;

const COLUMN_STEP_CGY: f64 = 10.0;

/// Renders the CSV content for one patient.
pub fn dvh_csv(
    hash_id: &str,
    structures: &BTreeMap<u16, Structure>,
    dvhs: &BTreeMap<u16, Dvh>,
) -> String {
    let max_dose = dvhs
        .values()
        .map(|dvh| (dvh.counts.len().saturating_sub(1)) as f64 * dvh.bin_width)
        .fold(0.0_f64, f64::max);
    let columns = (max_dose / COLUMN_STEP_CGY).floor() as usize + 1;

    let mut out = String::from("Hash ID, ROI, Volume (mL)");
    for column in 0..columns {
        let _ = write!(out, ", {}cGy", column as f64 * COLUMN_STEP_CGY);
    }
    out.push('\n');

    for (roi, dvh) in dvhs {
        let name = structures
            .get(roi)
            .map_or_else(|| roi.to_string(), |s| s.name.clone());
        let volume = match dvh.volume_units {
            VolumeUnits::Cm3 => dvh.total_volume(),
            VolumeUnits::Percent => structures.get(roi).map_or(0.0, Structure::volume_cc),
        };
        let relative = dvh.relative_volume();

        let _ = write!(out, "{hash_id}, {name}, {volume:.1}");
        for column in 0..columns {
            let dose = column as f64 * COLUMN_STEP_CGY;
            let index = (dose / dvh.bin_width) as usize;
            let value = relative.counts.get(index).copied().unwrap_or(0.0);
            let _ = write!(out, ", {value:.1}");
        }
        out.push('\n');
    }
    out
}

/// Writes `<hash_id>.csv` into `dir` and returns its path.
pub fn write_dvh_csv(
    dir: impl AsRef<Path>,
    hash_id: &str,
    structures: &BTreeMap<u16, Structure>,
    dvhs: &BTreeMap<u16, Dvh>,
) -> io::Result<PathBuf> {
    let path = dir.as_ref().join(format!("{hash_id}.csv"));
    std::fs::write(&path, dvh_csv(hash_id, structures, dvhs))?;
    info!(path = %path.display(), rois = dvhs.len(), "wrote DVH csv");
    Ok(path)
}
