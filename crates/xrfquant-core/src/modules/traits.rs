//! Collaborator seams of the engine.
//!
//! The physics model turns a composition into components and shapes;
//! the ECF provider converts fitted coefficients into mass fractions.
//! Both are pure functions from the engine's perspective and are
//! called once per outer iteration at most.

use crate::domain::{ComponentType, EdgeLevel, Element, QuantResult};
use crate::modules::component::{make_components, LineGroup, SpectrumComponent};
use crate::modules::detector::DetectorModel;
use crate::modules::quant::Composition;
use crate::modules::spectrum::EnergyCalibration;
use std::collections::HashMap;
use std::f64::consts::TAU;

pub trait PhysicsModel {
    /// Element and scatter components for this element set, before any
    /// shape has been rendered.
    fn components(&self, elements: &[Element]) -> QuantResult<Vec<SpectrumComponent>>;

    /// Render one component's per-channel shape for the current
    /// composition, calibration, and detector state. The returned
    /// vector must have exactly `channels` entries.
    fn render_shape(
        &self,
        component: &SpectrumComponent,
        composition: &Composition,
        calibration: &EnergyCalibration,
        detector: &DetectorModel,
        channels: usize,
    ) -> QuantResult<Vec<f64>>;
}

/// Element calibration factor with its uncertainty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EcfValue {
    pub factor: f64,
    pub sigma: f64,
}

impl Default for EcfValue {
    fn default() -> Self {
        Self {
            factor: 1.0,
            sigma: 0.0,
        }
    }
}

pub trait EcfProvider {
    fn calibration_factor(&self, element: Element, level: EdgeLevel) -> EcfValue;
}

/// Table-backed ECF lookup with a fallback value for elements that
/// have no entry.
#[derive(Debug, Clone, Default)]
pub struct TableEcf {
    table: HashMap<(Element, EdgeLevel), EcfValue>,
    fallback: EcfValue,
}

impl TableEcf {
    pub fn new(fallback: EcfValue) -> Self {
        Self {
            table: HashMap::new(),
            fallback,
        }
    }

    pub fn insert(&mut self, element: Element, level: EdgeLevel, value: EcfValue) {
        self.table.insert((element, level), value);
    }
}

impl EcfProvider for TableEcf {
    fn calibration_factor(&self, element: Element, level: EdgeLevel) -> EcfValue {
        self.table
            .get(&(element, level))
            .copied()
            .unwrap_or(self.fallback)
    }
}

/// One synthetic emission line for the Gaussian physics model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticLine {
    pub element: Element,
    pub level: EdgeLevel,
    /// Line energy, eV.
    pub energy: f64,
    /// Relative line strength within its group.
    pub relative_intensity: f64,
}

/// Simplified physics model rendering pure Gaussian peaks on a flat
/// background, used by tests and the demo path. The peak area per
/// unit coefficient is the line intensity times a global scale, so
/// fitted coefficients read directly as mass fractions.
#[derive(Debug, Clone)]
pub struct GaussianPhysics {
    lines: Vec<SyntheticLine>,
    /// Counts per unit mass fraction for a line of unit relative
    /// intensity.
    counts_per_fraction: f64,
    /// Flat background level, counts per channel at unit coefficient.
    background_level: f64,
}

impl GaussianPhysics {
    pub fn new(lines: Vec<SyntheticLine>, counts_per_fraction: f64, background_level: f64) -> Self {
        Self {
            lines,
            counts_per_fraction,
            background_level,
        }
    }
}

impl PhysicsModel for GaussianPhysics {
    fn components(&self, elements: &[Element]) -> QuantResult<Vec<SpectrumComponent>> {
        let groups: Vec<LineGroup> = self
            .lines
            .iter()
            .filter(|line| elements.contains(&line.element))
            .map(|line| LineGroup {
                element: line.element,
                level: line.level,
                energy: line.energy,
                intensity: line.relative_intensity * self.counts_per_fraction,
                matrix_factor: 1.0,
            })
            .collect();
        Ok(make_components(ComponentType::Element, &groups))
    }

    fn render_shape(
        &self,
        component: &SpectrumComponent,
        _composition: &Composition,
        calibration: &EnergyCalibration,
        detector: &DetectorModel,
        channels: usize,
    ) -> QuantResult<Vec<f64>> {
        match component.component_type() {
            ComponentType::Element => {
                let mut shape = vec![0.0; channels];
                let ev_per_channel = calibration.effective_energy_per_channel();
                for line in &self.lines {
                    let accepted = component
                        .element()
                        .zip(component.level())
                        .is_some_and(|(element, level)| {
                            line.element == element && line.level == level
                        });
                    if !accepted {
                        continue;
                    }
                    let center = calibration.channel(line.energy);
                    let sigma_channels = detector.sigma(line.energy) / ev_per_channel;
                    if !(sigma_channels > 0.0) {
                        continue;
                    }
                    let area = line.relative_intensity * self.counts_per_fraction;
                    let peak = area / (sigma_channels * TAU.sqrt());
                    for (channel, value) in shape.iter_mut().enumerate() {
                        let z = (channel as f64 - center) / sigma_channels;
                        *value += peak * (-0.5 * z * z).exp();
                    }
                }
                Ok(shape)
            }
            ComponentType::Continuum | ComponentType::SnipBackground => {
                Ok(vec![self.background_level; channels])
            }
            _ => Ok(vec![0.0; channels]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EcfProvider, EcfValue, GaussianPhysics, PhysicsModel, SyntheticLine, TableEcf};
    use crate::domain::{ComponentKey, ComponentType, EdgeLevel, Element};
    use crate::modules::component::SpectrumComponent;
    use crate::modules::detector::DetectorModel;
    use crate::modules::quant::Composition;
    use crate::modules::spectrum::EnergyCalibration;
    use crate::numerics::stable_sum;

    fn iron() -> Element {
        Element::from_symbol("Fe").expect("iron")
    }

    fn physics() -> GaussianPhysics {
        GaussianPhysics::new(
            vec![
                SyntheticLine {
                    element: iron(),
                    level: EdgeLevel::K,
                    energy: 6403.8,
                    relative_intensity: 1.0,
                },
                SyntheticLine {
                    element: iron(),
                    level: EdgeLevel::K,
                    energy: 7058.0,
                    relative_intensity: 0.14,
                },
            ],
            1.0e4,
            2.0,
        )
    }

    #[test]
    fn gaussian_shape_area_matches_line_intensity() {
        let physics = physics();
        let components = physics.components(&[iron()]).expect("components");
        assert_eq!(components.len(), 1);

        let calibration = EnergyCalibration::new(0.0, 10.0);
        let detector = DetectorModel::default();
        let composition = Composition::uniform(&[iron()]);
        let shape = physics
            .render_shape(&components[0], &composition, &calibration, &detector, 2048)
            .expect("shape");
        assert_eq!(shape.len(), 2048);
        // Both peaks are well inside the channel range, so the total
        // area is the summed line intensities.
        assert!((stable_sum(&shape) - 1.14e4).abs() / 1.14e4 < 1.0e-3);
        // Peak maximum sits at the strongest line's channel.
        let argmax = shape
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(channel, _)| channel)
            .expect("argmax");
        assert!((argmax as f64 - calibration.channel(6403.8)).abs() <= 1.0);
    }

    #[test]
    fn background_shape_is_flat_and_unknown_types_render_empty() {
        let physics = physics();
        let calibration = EnergyCalibration::new(0.0, 10.0);
        let detector = DetectorModel::default();
        let composition = Composition::uniform(&[iron()]);

        let background =
            SpectrumComponent::new(ComponentKey::background(ComponentType::Continuum, 0));
        let shape = physics
            .render_shape(&background, &composition, &calibration, &detector, 64)
            .expect("shape");
        assert_eq!(shape, vec![2.0; 64]);

        let pileup = SpectrumComponent::new(ComponentKey::standalone(ComponentType::Pileup));
        let shape = physics
            .render_shape(&pileup, &composition, &calibration, &detector, 64)
            .expect("shape");
        assert!(shape.iter().all(|value| *value == 0.0));
    }

    #[test]
    fn table_ecf_falls_back_for_missing_elements() {
        let mut ecf = TableEcf::new(EcfValue::default());
        ecf.insert(
            iron(),
            EdgeLevel::K,
            EcfValue {
                factor: 1.25,
                sigma: 0.05,
            },
        );
        assert_eq!(ecf.calibration_factor(iron(), EdgeLevel::K).factor, 1.25);
        let calcium = Element::from_symbol("Ca").expect("calcium");
        assert_eq!(ecf.calibration_factor(calcium, EdgeLevel::K).factor, 1.0);
    }
}
