//! Detector energy-resolution model.
//!
//! FWHM squared is linear in photon energy through the Fano factor:
//! `FWHM²(E) = FWHM_ref² + 8 ln2 · Fano · w · (E − E_ref)` with `w`
//! the detector's energy per charge pair. The fit engine updates the
//! reference FWHM and the Fano factor from accepted peak widths.

use crate::common::constants::{
    EIGHT_LN_2, MN_KA_ENERGY_EV, SI_ENERGY_PER_PAIR_EV, SQRT_EIGHT_LN_2,
};
use serde::{Deserialize, Serialize};

// FWHM² floor so the model never reports a vanishing resolution.
const MIN_FWHM_SQUARED: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectorModel {
    /// FWHM at the reference energy, eV.
    fwhm_ref: f64,
    fano: f64,
    /// Reference energy for `fwhm_ref`, eV.
    reference_energy: f64,
    /// Energy per charge pair, eV.
    energy_per_pair: f64,
}

impl Default for DetectorModel {
    fn default() -> Self {
        // A typical silicon drift detector, referenced at Mn K-alpha.
        Self {
            fwhm_ref: 165.0,
            fano: 0.12,
            reference_energy: MN_KA_ENERGY_EV,
            energy_per_pair: SI_ENERGY_PER_PAIR_EV,
        }
    }
}

impl DetectorModel {
    pub fn new(fwhm_ref: f64, fano: f64) -> Self {
        Self {
            fwhm_ref,
            fano,
            ..Self::default()
        }
    }

    /// FWHM at `energy`, eV.
    pub fn resolution(&self, energy: f64) -> f64 {
        let fwhm_squared = self.fwhm_ref * self.fwhm_ref
            + self.fwhm_squared_slope() * (energy - self.reference_energy);
        fwhm_squared.max(MIN_FWHM_SQUARED).sqrt()
    }

    /// Gaussian sigma at `energy`, eV.
    pub fn sigma(&self, energy: f64) -> f64 {
        self.resolution(energy) / SQRT_EIGHT_LN_2
    }

    /// Slope of FWHM² with respect to photon energy.
    pub fn fwhm_squared_slope(&self) -> f64 {
        EIGHT_LN_2 * self.fano * self.energy_per_pair
    }

    pub const fn fwhm_ref(&self) -> f64 {
        self.fwhm_ref
    }

    pub const fn fano(&self) -> f64 {
        self.fano
    }

    pub const fn reference_energy(&self) -> f64 {
        self.reference_energy
    }

    pub const fn energy_per_pair(&self) -> f64 {
        self.energy_per_pair
    }

    pub fn set_fwhm_ref(&mut self, fwhm_ref: f64) {
        self.fwhm_ref = fwhm_ref.max(MIN_FWHM_SQUARED.sqrt());
    }

    pub fn set_fano(&mut self, fano: f64) {
        if fano > 0.0 {
            self.fano = fano;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DetectorModel;
    use crate::common::constants::MN_KA_ENERGY_EV;

    #[test]
    fn resolution_at_reference_is_the_reference_fwhm() {
        let detector = DetectorModel::default();
        assert!((detector.resolution(MN_KA_ENERGY_EV) - 165.0).abs() < 1.0e-9);
    }

    #[test]
    fn resolution_grows_with_energy_and_never_vanishes() {
        let detector = DetectorModel::new(150.0, 0.12);
        assert!(detector.resolution(10_000.0) > detector.resolution(5_000.0));
        // Far below the reference the linear term goes negative; the
        // floor keeps the result usable.
        assert!(detector.resolution(-1.0e9) > 0.0);
    }

    #[test]
    fn fwhm_squared_is_linear_in_energy() {
        let detector = DetectorModel::default();
        let e1 = 4_000.0;
        let e2 = 9_000.0;
        let f1 = detector.resolution(e1).powi(2);
        let f2 = detector.resolution(e2).powi(2);
        let slope = (f2 - f1) / (e2 - e1);
        assert!((slope - detector.fwhm_squared_slope()).abs() < 1.0e-9);
    }

    #[test]
    fn setters_ignore_nonphysical_values() {
        let mut detector = DetectorModel::default();
        detector.set_fano(-1.0);
        assert_eq!(detector.fano(), 0.12);
        detector.set_fwhm_ref(0.0);
        assert!(detector.fwhm_ref() > 0.0);
    }
}
