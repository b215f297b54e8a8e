//! Dose-volume histograms and the queries a physicist runs against
//! them: D_v, V_d, min/mean/max dose and relative views.
//!
//! A cumulative DVH stores one count per dose bin; `counts[i]` is the
//! volume receiving at least `i * bin_width` cGy. Counts are
//! non-increasing and `counts[0]` is the total structure volume.

use std::sync::OnceLock;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DvhKind {
    Cumulative,
    Differential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeUnits {
    Cm3,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoseUnits {
    CGy,
    /// Percent of the prescription dose (relative-dose view).
    Percent,
}

#[derive(Debug, Error, PartialEq)]
pub enum DvhError {
    #[error("no prescription dose attached to this DVH")]
    MissingRxDose,
    #[error("operation requires a cumulative DVH")]
    NotCumulative,
}

#[derive(Debug, Clone)]
pub struct Dvh {
    pub kind: DvhKind,
    /// One entry per dose bin.
    pub counts: Vec<f64>,
    /// Bin width in `dose_units` (the DVH dose scaling), typically 1 cGy.
    pub bin_width: f64,
    pub dose_units: DoseUnits,
    pub volume_units: VolumeUnits,
    /// Prescription dose in cGy, when known.
    pub rx_dose: Option<f64>,
    min: OnceLock<f64>,
    mean: OnceLock<f64>,
    max: OnceLock<f64>,
}

impl Dvh {
    pub fn cumulative(counts: Vec<f64>, bin_width: f64) -> Self {
        Self {
            kind: DvhKind::Cumulative,
            counts,
            bin_width,
            dose_units: DoseUnits::CGy,
            volume_units: VolumeUnits::Cm3,
            rx_dose: None,
            min: OnceLock::new(),
            mean: OnceLock::new(),
            max: OnceLock::new(),
        }
    }

    pub fn with_rx_dose(mut self, rx_dose: f64) -> Self {
        self.rx_dose = Some(rx_dose);
        self
    }

    /// Builds a cumulative DVH from differential (dose, volume) samples,
    /// dose in Gy. Each sample's volume is split linearly between the
    /// two adjacent 1-cGy bins, then integrated from above.
    pub fn from_differential_pairs(pairs: &[(f64, f64)]) -> Self {
        let max_cgy = pairs
            .iter()
            .map(|(dose, _)| dose * 100.0)
            .fold(0.0_f64, f64::max);
        let bins = max_cgy.ceil() as usize + 2;
        let mut differential = vec![0.0; bins];
        for &(dose_gy, volume) in pairs {
            let dose = (dose_gy * 100.0).max(0.0);
            let lower = dose.floor() as usize;
            let frac = dose - dose.floor();
            differential[lower] += volume * (1.0 - frac);
            if frac > 0.0 {
                differential[lower + 1] += volume * frac;
            }
        }
        let mut dvh = Self::cumulative(cumulative_from_differential(&differential), 1.0);
        dvh.trim_trailing_zeros();
        dvh
    }

    /// Total volume covered by the histogram (`counts[0]`).
    pub fn total_volume(&self) -> f64 {
        self.counts.first().copied().unwrap_or(0.0)
    }

    /// V_d: volume receiving at least `dose` (in `dose_units`).
    pub fn volume_constraint(&self, dose: f64) -> f64 {
        let index = (dose / self.bin_width).floor() as usize;
        self.counts.get(index).copied().unwrap_or(0.0)
    }

    /// V_d in cc, for DVHs whose counts are relative-volume percent.
    pub fn volume_constraint_cc(&self, dose: f64, total_volume_cc: f64) -> f64 {
        self.volume_constraint(dose) * total_volume_cc / 100.0
    }

    /// D_v: the dose whose count is closest to `volume`; the smallest
    /// index wins ties.
    pub fn dose_constraint(&self, volume: f64) -> f64 {
        let mut best = 0usize;
        let mut best_delta = f64::INFINITY;
        for (i, &count) in self.counts.iter().enumerate() {
            let delta = (count - volume).abs();
            if delta < best_delta {
                best_delta = delta;
                best = i;
            }
        }
        self.bin_width * best as f64
    }

    /// A view whose dose axis is percent of the prescription dose.
    pub fn relative_dose(&self) -> Result<Self, DvhError> {
        let rx = self.rx_dose.ok_or(DvhError::MissingRxDose)?;
        let mut view = Self::cumulative(self.counts.clone(), 100.0 / rx * self.bin_width);
        view.dose_units = DoseUnits::Percent;
        view.volume_units = self.volume_units;
        view.rx_dose = self.rx_dose;
        Ok(view)
    }

    /// A view with counts normalized so `counts[0] = 100`.
    pub fn relative_volume(&self) -> Self {
        let total = self.total_volume();
        let counts = if total > 0.0 {
            self.counts.iter().map(|c| c / total * 100.0).collect()
        } else {
            vec![0.0; self.counts.len()]
        };
        let mut view = Self::cumulative(counts, self.bin_width);
        view.dose_units = self.dose_units;
        view.volume_units = VolumeUnits::Percent;
        view.rx_dose = self.rx_dose;
        view
    }

    /// Differential view: successive differences, final element equal to
    /// the last cumulative count.
    pub fn differential_counts(&self) -> Vec<f64> {
        if self.counts.is_empty() {
            return Vec::new();
        }
        let mut diff: Vec<f64> = self.counts.windows(2).map(|w| w[0] - w[1]).collect();
        diff.push(*self.counts.last().unwrap_or(&0.0));
        diff
    }

    /// Lowest dose where the cumulative count first dips below the
    /// total volume.
    pub fn min_dose(&self) -> f64 {
        *self.min.get_or_init(|| {
            let total = self.total_volume();
            self.counts
                .iter()
                .position(|&c| c < total)
                .map_or(0.0, |i| i as f64 * self.bin_width)
        })
    }

    /// Highest bin with a non-zero differential count.
    pub fn max_dose(&self) -> f64 {
        *self.max.get_or_init(|| {
            let diff = self.differential_counts();
            diff.iter()
                .rposition(|&d| d > 0.0)
                .map_or(0.0, |i| i as f64 * self.bin_width)
        })
    }

    /// Volume-weighted mean dose over the differential view.
    pub fn mean_dose(&self) -> f64 {
        *self.mean.get_or_init(|| {
            let total = self.total_volume();
            if total <= 0.0 {
                return 0.0;
            }
            let diff = self.differential_counts();
            let weighted: f64 = diff
                .iter()
                .enumerate()
                .map(|(i, &d)| d * i as f64 * self.bin_width)
                .sum();
            weighted / total
        })
    }

    /// Scales the dose axis of this DVH by adjusting the bin width,
    /// used when re-normalizing to a new prescription.
    pub fn scale_dose(&self, factor: f64) -> Self {
        let mut scaled = Self::cumulative(self.counts.clone(), self.bin_width * factor);
        scaled.dose_units = self.dose_units;
        scaled.volume_units = self.volume_units;
        scaled.rx_dose = self.rx_dose.map(|rx| rx * factor);
        scaled
    }

    pub fn trim_trailing_zeros(&mut self) {
        let keep = self.counts.iter().rposition(|&c| c != 0.0).map_or(1, |i| i + 1);
        self.counts.truncate(keep.max(1));
    }
}

/// Integrates a differential histogram from above.
pub fn cumulative_from_differential(differential: &[f64]) -> Vec<f64> {
    let mut cumulative = vec![0.0; differential.len()];
    let mut running = 0.0;
    for (i, &d) in differential.iter().enumerate().rev() {
        running += d;
        cumulative[i] = running;
    }
    cumulative
}
