//! Affine channel-to-energy map with an accumulated correction.
//!
//! The instrument calibration (start energy and energy per channel) is
//! kept separate from the correction (offset and tilt) found by the
//! fit, so the applied correction stays reportable at the end of a
//! run.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyCalibration {
    /// Energy of channel zero, eV, as supplied by the instrument.
    energy_start: f64,
    /// Nominal energy per channel, eV.
    energy_per_channel: f64,
    /// Accumulated offset correction, eV.
    #[serde(default)]
    offset: f64,
    /// Accumulated slope correction, eV per channel.
    #[serde(default)]
    tilt: f64,
}

impl EnergyCalibration {
    pub const fn new(energy_start: f64, energy_per_channel: f64) -> Self {
        Self {
            energy_start,
            energy_per_channel,
            offset: 0.0,
            tilt: 0.0,
        }
    }

    /// A calibration is usable when its slope is positive and finite.
    pub fn good(&self) -> bool {
        self.energy_start.is_finite()
            && self.energy_per_channel.is_finite()
            && self.energy_per_channel > 0.0
            && self.offset.is_finite()
            && self.tilt.is_finite()
            && self.energy_per_channel + self.tilt > 0.0
    }

    pub fn energy(&self, channel: f64) -> f64 {
        self.energy_start + self.offset + (self.energy_per_channel + self.tilt) * channel
    }

    pub fn channel(&self, energy: f64) -> f64 {
        (energy - self.energy_start - self.offset) / (self.energy_per_channel + self.tilt)
    }

    /// Slope currently in effect, nominal plus correction.
    pub fn effective_energy_per_channel(&self) -> f64 {
        self.energy_per_channel + self.tilt
    }

    pub const fn energy_start(&self) -> f64 {
        self.energy_start
    }

    pub const fn offset(&self) -> f64 {
        self.offset
    }

    pub const fn tilt(&self) -> f64 {
        self.tilt
    }

    pub fn apply_correction(&mut self, offset_delta: f64, tilt_delta: f64) {
        self.offset += offset_delta;
        self.tilt += tilt_delta;
    }
}

#[cfg(test)]
mod tests {
    use super::EnergyCalibration;

    #[test]
    fn energy_and_channel_are_inverse_maps() {
        let mut calibration = EnergyCalibration::new(-10.0, 10.0);
        assert!(calibration.good());
        calibration.apply_correction(-20.0, 0.05);
        let channel = 123.0;
        let energy = calibration.energy(channel);
        assert!((calibration.channel(energy) - channel).abs() < 1.0e-9);
        assert!((calibration.offset() - -20.0).abs() < 1.0e-12);
    }

    #[test]
    fn correction_shifts_energies_down_and_channels_up() {
        let nominal = EnergyCalibration::new(0.0, 10.0);
        let mut corrected = nominal;
        corrected.apply_correction(-20.0, 0.0);
        assert!((corrected.energy(100.0) - (nominal.energy(100.0) - 20.0)).abs() < 1.0e-9);
        assert!((corrected.channel(1000.0) - (nominal.channel(1000.0) + 2.0)).abs() < 1.0e-9);
    }

    #[test]
    fn degenerate_slopes_are_not_good() {
        assert!(!EnergyCalibration::new(0.0, 0.0).good());
        assert!(!EnergyCalibration::new(0.0, -5.0).good());
        assert!(!EnergyCalibration::new(f64::NAN, 10.0).good());
        let mut calibration = EnergyCalibration::new(0.0, 10.0);
        calibration.apply_correction(0.0, -10.0);
        assert!(!calibration.good());
    }
}
