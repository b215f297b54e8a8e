use std::path::PathBuf;

use anyhow::Context;
use tracing::{Level, info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use dicom_dvh::assembler::{build_patient, scan_directory};
use dicom_dvh::config::{DvhRecalcSetting, preferences};
use dicom_dvh::dvhcalc::calculate_dvh;
use dicom_dvh::export::write_dvh_csv;
use dicom_dvh::worker::{CancelToken, Progress};

fn init_logger(level: Level) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true)
                .with_file(false)
                .with_line_number(false)
                .with_target(false),
        )
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::from_level(level).into())
                .from_env_lossy(),
        )
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logger(Level::INFO);
    let preferences = preferences();

    let import_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| preferences.general.dicom.import_location.clone());
    let out_dir = PathBuf::from(std::env::args().nth(2).unwrap_or_else(|| ".".to_string()));

    let cancel = CancelToken::new();
    let report = |p: Progress| info!("{}/{} {}", p.done, p.total, p.message);

    let patients = scan_directory(
        &import_dir,
        preferences.general.dicom.import_search_subfolders,
        Some(&report),
        &cancel,
    )
    .with_context(|| format!("scanning {import_dir}"))?;
    info!(patients = patients.len(), "import finished");

    for (hash_id, index) in &patients {
        let patient = build_patient(index, Some(&report), &cancel)
            .with_context(|| format!("assembling patient {hash_id}"))?;
        let Some(structures) = &patient.structures else {
            warn!(patient = %hash_id, "no structure set, skipping");
            continue;
        };

        let use_stored = preferences.general.calculation.dvh_recalc
            == DvhRecalcSetting::UseRtDoseDvhIfPresent
            && !patient.dvhs.is_empty();
        let dvhs = if use_stored {
            patient.dvhs.clone()
        } else if let Some(dose) = &patient.dose {
            let mut dvhs = std::collections::BTreeMap::new();
            for (roi, structure) in structures {
                let dvh = calculate_dvh(structure, dose, None, Some(&report), &cancel)?;
                dvhs.insert(*roi, dvh);
            }
            dvhs
        } else {
            warn!(patient = %hash_id, "no dose grid, skipping");
            continue;
        };

        let path = write_dvh_csv(&out_dir, hash_id, structures, &dvhs)?;
        info!(patient = %hash_id, path = %path.display(), "patient done");
    }
    Ok(())
}
