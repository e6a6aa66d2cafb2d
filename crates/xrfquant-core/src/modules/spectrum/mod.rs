//! The measured spectrum and its keyed component collection.
//!
//! Components are stored in insertion order with a key index on the
//! side, so iteration is deterministic and every lookup or update goes
//! through the component identity.

pub mod calibration;

pub use calibration::EnergyCalibration;

use crate::domain::{ComponentKey, Element, QuantError, QuantResult};
use crate::modules::component::SpectrumComponent;
use crate::numerics::LeastSquaresFit;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Spectrum {
    measured: Vec<f64>,
    sigma: Vec<f64>,
    live_time: f64,
    calibration: EnergyCalibration,
    components: Vec<SpectrumComponent>,
    index: HashMap<ComponentKey, usize>,
    background: Vec<f64>,
    calculated: Vec<f64>,
}

impl Spectrum {
    pub fn new(
        measured: Vec<f64>,
        calibration: EnergyCalibration,
        live_time: f64,
    ) -> QuantResult<Self> {
        if measured.is_empty() {
            return Err(QuantError::invalid_input(
                "SPECTRUM.EMPTY",
                "measured spectrum has no channels",
            ));
        }
        if !calibration.good() {
            return Err(QuantError::invalid_input(
                "SPECTRUM.CALIBRATION",
                "energy calibration is missing or degenerate",
            ));
        }
        if !(live_time > 0.0) {
            return Err(QuantError::invalid_input(
                "SPECTRUM.LIVE_TIME",
                format!("live time must be positive, got {live_time}"),
            ));
        }
        // Counting statistics with a floor for empty channels, so
        // zero-count channels still carry a finite weight.
        let sigma = measured
            .iter()
            .map(|&counts| {
                if counts > 0.0 {
                    (counts + 2.0).sqrt()
                } else {
                    2.0_f64.sqrt()
                }
            })
            .collect();
        let channels = measured.len();
        Ok(Self {
            measured,
            sigma,
            live_time,
            calibration,
            components: Vec::new(),
            index: HashMap::new(),
            background: vec![0.0; channels],
            calculated: vec![0.0; channels],
        })
    }

    pub fn channels(&self) -> usize {
        self.measured.len()
    }

    pub fn measured(&self) -> &[f64] {
        &self.measured
    }

    pub fn sigma(&self) -> &[f64] {
        &self.sigma
    }

    pub const fn live_time(&self) -> f64 {
        self.live_time
    }

    pub const fn calibration(&self) -> &EnergyCalibration {
        &self.calibration
    }

    pub fn calibration_mut(&mut self) -> &mut EnergyCalibration {
        &mut self.calibration
    }

    /// Energy at the center of each channel, in channel order.
    pub fn energies(&self) -> Vec<f64> {
        (0..self.channels())
            .map(|channel| self.calibration.energy(channel as f64))
            .collect()
    }

    pub fn background(&self) -> &[f64] {
        &self.background
    }

    pub fn calculated(&self) -> &[f64] {
        &self.calculated
    }

    pub fn components(&self) -> &[SpectrumComponent] {
        &self.components
    }

    pub fn component(&self, key: &ComponentKey) -> Option<&SpectrumComponent> {
        self.index.get(key).map(|&position| &self.components[position])
    }

    pub fn component_mut(&mut self, key: &ComponentKey) -> Option<&mut SpectrumComponent> {
        self.index
            .get(key)
            .map(|&position| &mut self.components[position])
    }

    /// Insert a component, or refresh the shape-bearing fields of an
    /// existing one with the same identity. Fit state (`coefficient`,
    /// `enabled`, `fit`, `quant`) persists across refreshes.
    pub fn add_component(&mut self, component: SpectrumComponent) {
        match self.index.get(&component.key()) {
            Some(&position) => {
                let existing = &mut self.components[position];
                existing.shape = component.shape;
                existing.intensity = component.intensity;
                existing.matrix_factor = component.matrix_factor;
                existing.peak_energy = component.peak_energy;
            }
            None => {
                self.index.insert(component.key(), self.components.len());
                self.components.push(component);
            }
        }
    }

    /// Quant component for `element`, if any.
    pub fn quant_component(&self, element: Element) -> Option<&SpectrumComponent> {
        self.components
            .iter()
            .find(|c| c.quant && c.element() == Some(element))
    }

    /// Keys of the components that belong in the design matrix:
    /// enabled, fit-flagged, with a finite positive shape that is not
    /// negligibly small next to the largest shape.
    pub fn fit_selection(&self, tiny_ratio: f64) -> Vec<ComponentKey> {
        let channels = self.channels();
        let candidates: Vec<(ComponentKey, f64)> = self
            .components
            .iter()
            .filter(|c| c.enabled && c.fit && c.shape.len() == channels)
            .map(|c| (c.key(), c.shape_integral()))
            .filter(|(_, integral)| integral.is_finite() && *integral > 0.0)
            .collect();
        let largest = candidates
            .iter()
            .map(|(_, integral)| *integral)
            .fold(0.0_f64, f64::max);
        candidates
            .into_iter()
            .filter(|(_, integral)| *integral > tiny_ratio * largest)
            .map(|(key, _)| key)
            .collect()
    }

    /// Flattened design matrix for the given keys, basis vectors back
    /// to back in key order.
    pub fn design_matrix(&self, keys: &[ComponentKey]) -> Vec<f64> {
        let channels = self.channels();
        let mut design = Vec::with_capacity(keys.len() * channels);
        for key in keys {
            match self.component(key) {
                Some(component) => design.extend_from_slice(&component.shape),
                None => design.extend(std::iter::repeat_n(0.0, channels)),
            }
        }
        design
    }

    /// Measured counts minus the contribution of every enabled
    /// component that does not have its own design-matrix column.
    pub fn net_measured(&self) -> Vec<f64> {
        let mut net = self.measured.clone();
        for component in &self.components {
            if !component.enabled || component.fit || component.shape.len() != net.len() {
                continue;
            }
            for (value, shape) in net.iter_mut().zip(&component.shape) {
                *value -= component.coefficient * shape;
            }
        }
        net
    }

    /// Store solved coefficients and variances back into the
    /// components, in the key order the design matrix was built with.
    pub fn apply_fit(&mut self, keys: &[ComponentKey], fit: &LeastSquaresFit) {
        debug_assert_eq!(keys.len(), fit.coefficients.len());
        for (position, key) in keys.iter().enumerate() {
            if let Some(component) = self.component_mut(key) {
                component.coefficient = fit.coefficients[position];
                component.variance = fit.variances[position];
            }
        }
    }

    /// Coefficients of ratio-locked components follow their element's
    /// quant component.
    pub fn update_non_fit_coefficients(&mut self) {
        let mut updates: Vec<(ComponentKey, f64)> = Vec::new();
        for component in &self.components {
            if component.enabled
                && !component.fit
                && component.ratio_to_quant > 0.0
                && component.component_type().has_element()
            {
                if let Some(element) = component.element() {
                    if let Some(quant) = self.quant_component(element) {
                        updates.push((
                            component.key(),
                            component.ratio_to_quant * quant.coefficient,
                        ));
                    }
                }
            }
        }
        for (key, coefficient) in updates {
            if let Some(component) = self.component_mut(&key) {
                component.coefficient = coefficient;
            }
        }
    }

    /// Accumulate enabled background components into the background
    /// array. Components with non-positive coefficients are skipped so
    /// an ill-fitted region cannot carve counts out of the background.
    pub fn update_background(&mut self) {
        let channels = self.channels();
        self.background.iter_mut().for_each(|value| *value = 0.0);
        for component in &self.components {
            if !component.enabled
                || !component.is_background()
                || component.coefficient <= 0.0
                || component.shape.len() != channels
            {
                continue;
            }
            for (value, shape) in self.background.iter_mut().zip(&component.shape) {
                *value += component.coefficient * shape;
            }
        }
    }

    /// Rebuild the calculated spectrum: every enabled non-background
    /// component at its coefficient, plus the background exactly once.
    pub fn update_calculated(&mut self) {
        let channels = self.channels();
        self.calculated.copy_from_slice(&self.background);
        for component in &self.components {
            if !component.enabled
                || component.is_background()
                || component.shape.len() != channels
            {
                continue;
            }
            for (value, shape) in self.calculated.iter_mut().zip(&component.shape) {
                *value += component.coefficient * shape;
            }
        }
    }

    pub fn residual(&self) -> Vec<f64> {
        self.measured
            .iter()
            .zip(&self.calculated)
            .map(|(measured, calculated)| measured - calculated)
            .collect()
    }

    pub fn chi_squared(&self) -> f64 {
        self.measured
            .iter()
            .zip(&self.calculated)
            .zip(&self.sigma)
            .map(|((measured, calculated), sigma)| {
                let diff = (measured - calculated) / sigma;
                diff * diff
            })
            .sum()
    }

    /// Fresh fit sequences start from unit coefficients.
    pub fn reset_fit_coefficients(&mut self) {
        for component in &mut self.components {
            if component.fit {
                component.coefficient = 1.0;
                component.variance = 0.0;
            }
        }
    }
}
