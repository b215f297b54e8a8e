//! Layered preferences: compiled-in defaults, an optional
//! `preferences.toml` next to the binary, then `DICOM_DVH_`-prefixed
//! environment variables with sections separated by `__`, as in
//! `DICOM_DVH_GENERAL__DICOM__IMPORT_LOCATION`.

use serde::Deserialize;
use std::sync::OnceLock;

#[derive(Debug, Deserialize)]
pub struct Preferences {
    pub general: GeneralPreferences,
}

#[derive(Debug, Deserialize)]
pub struct GeneralPreferences {
    pub dicom: DicomPreferences,
    pub calculation: CalculationPreferences,
}

#[derive(Debug, Deserialize)]
pub struct DicomPreferences {
    /// Default folder offered for directory import.
    pub import_location: String,
    /// When off, only the top level of the import folder is scanned.
    pub import_search_subfolders: bool,
    pub import_location_setting: ImportLocationSetting,
}

#[derive(Debug, Deserialize)]
pub struct CalculationPreferences {
    pub dvh_recalc: DvhRecalcSetting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ImportLocationSetting {
    #[serde(rename = "remember_last_used")]
    RememberLastUsed,
    #[serde(rename = "always_use_default")]
    AlwaysUseDefault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DvhRecalcSetting {
    /// Take the DVH stored in the RT Dose object when one exists.
    #[serde(rename = "use_rt_dose_dvh_if_present")]
    UseRtDoseDvhIfPresent,
    #[serde(rename = "always_recalculate")]
    AlwaysRecalculate,
}

impl Preferences {
    pub fn new() -> Result<Self, config::ConfigError> {
        use config::Config;
        let s = Config::builder()
            .add_source(config::File::from_str(
                include_str!("defaults.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name("preferences.toml").required(false))
            .add_source(config::Environment::with_prefix("DICOM_DVH").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

pub fn preferences() -> &'static Preferences {
    static PREFERENCES: OnceLock<Preferences> = OnceLock::new();
    PREFERENCES
        .get_or_init(|| Preferences::new().unwrap_or_else(|e| panic!("failed to load preferences: {e:?}")))
}
