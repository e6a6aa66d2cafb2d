//! Outer self-consistency loop: regenerate shapes, fit, update the
//! composition, repeat until composition and calibration stop moving.

use crate::common::config::EngineConfig;
use crate::common::constants::NEGLIGIBLE_FRACTION;
use crate::domain::{
    ComponentKey, ComponentType, EdgeLevel, Element, QuantError, QuantResult,
};
use crate::modules::component::{make_background_components, split_weight, SpectrumComponent};
use crate::modules::detector::DetectorModel;
use crate::modules::fit::{fit_spectrum, FitSignal};
use crate::modules::spectrum::Spectrum;
use crate::modules::traits::{EcfProvider, PhysicsModel};
use crate::numerics::stable_sum;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Mass fractions by element.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Composition {
    fractions: BTreeMap<Element, f64>,
}

impl Composition {
    /// Equal fractions over the element set, summing to one.
    pub fn uniform(elements: &[Element]) -> Self {
        let mut fractions = BTreeMap::new();
        if !elements.is_empty() {
            let fraction = 1.0 / elements.len() as f64;
            for &element in elements {
                fractions.insert(element, fraction);
            }
        }
        Self { fractions }
    }

    pub fn fraction(&self, element: Element) -> f64 {
        self.fractions.get(&element).copied().unwrap_or(0.0)
    }

    pub fn set_fraction(&mut self, element: Element, fraction: f64) {
        self.fractions.insert(element, fraction);
    }

    pub fn total(&self) -> f64 {
        self.fractions.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Element, f64)> + '_ {
        self.fractions.iter().map(|(&element, &fraction)| (element, fraction))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentResult {
    pub description: String,
    pub coefficient: f64,
    pub sigma: f64,
    pub enabled: bool,
}

/// Final state of a quantification run. `converged == false` means
/// the iteration cap was exhausted; the result is still the best
/// available state and `iterations` equals the cap.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantReport {
    pub composition: Composition,
    pub iterations: u32,
    pub converged: bool,
    pub chi_squared: f64,
    pub chi_squared_per_channel: f64,
    pub calibration_offset: f64,
    pub calibration_tilt: f64,
    pub resolution_fwhm: f64,
    pub fano: f64,
    pub components: Vec<ComponentResult>,
}

/// Run the full quantification: build components for the element set,
/// then iterate RECOMPUTE, FIT, UPDATE until the fit reports done at
/// or after the forced minimum iteration count.
pub fn quantify<P: PhysicsModel, E: EcfProvider>(
    spectrum: &mut Spectrum,
    detector: &mut DetectorModel,
    physics: &P,
    ecf: &E,
    elements: &[Element],
    config: &EngineConfig,
) -> QuantResult<QuantReport> {
    config.validate()?;
    if elements.is_empty() {
        return Err(QuantError::invalid_input(
            "QUANT.NO_ELEMENTS",
            "no elements to quantify",
        ));
    }

    let mut components = physics.components(elements)?;
    for &element in elements {
        mark_quant_component(&mut components, element, config)?;
    }
    // Background components join after the element set so region
    // indices are stable before any pruning can happen.
    components.extend(make_background_components(
        ComponentType::Continuum,
        config.background_regions(),
    ));
    for component in components {
        spectrum.add_component(component);
    }
    spectrum.reset_fit_coefficients();

    let mut composition = Composition::uniform(elements);
    let mut floored: BTreeMap<ComponentKey, bool> = BTreeMap::new();
    let mut converged = false;
    let mut iterations = 0;

    for iteration in 1..=config.max_iterations {
        iterations = iteration;
        recompute_shapes(spectrum, physics, &composition, detector, config)?;
        let signal = fit_spectrum(spectrum, detector, config)?;
        let negatives_handled = update_composition(
            spectrum,
            ecf,
            elements,
            &mut composition,
            &mut floored,
            iteration,
            config,
        )?;
        debug!(
            iteration,
            ?signal,
            negatives_handled,
            chi_squared = spectrum.chi_squared(),
            "iteration complete"
        );
        // An iteration that had to floor or disable a negative
        // coefficient is never self-consistent.
        if iteration >= config.minimum_iterations
            && !negatives_handled
            && matches!(signal, FitSignal::Done | FitSignal::NoAdjustment)
        {
            converged = true;
            break;
        }
    }
    if !converged {
        warn!(iterations, "iteration cap reached without convergence");
    }

    let chi_squared = spectrum.chi_squared();
    info!(iterations, converged, chi_squared, "quantification finished");
    Ok(QuantReport {
        composition,
        iterations,
        converged,
        chi_squared,
        chi_squared_per_channel: chi_squared / spectrum.channels() as f64,
        calibration_offset: spectrum.calibration().offset(),
        calibration_tilt: spectrum.calibration().tilt(),
        resolution_fwhm: detector.fwhm_ref(),
        fano: detector.fano(),
        components: spectrum
            .components()
            .iter()
            .map(|component| ComponentResult {
                description: component.description(),
                coefficient: component.coefficient,
                sigma: component.variance.max(0.0).sqrt(),
                enabled: component.enabled,
            })
            .collect(),
    })
}

/// Pick the authoritative component for `element` (lowest edge level
/// wins) and ratio-lock its siblings at other levels.
fn mark_quant_component(
    components: &mut [SpectrumComponent],
    element: Element,
    config: &EngineConfig,
) -> QuantResult<()> {
    let mut best: Option<(EdgeLevel, usize)> = None;
    for (position, component) in components.iter().enumerate() {
        if component.component_type() == ComponentType::Element
            && component.element() == Some(element)
        {
            if let Some(level) = component.level() {
                if best.is_none_or(|(best_level, _)| level < best_level) {
                    best = Some((level, position));
                }
            }
        }
    }
    let Some((quant_level, quant_position)) = best else {
        return Err(QuantError::invalid_input(
            "QUANT.NO_COMPONENT",
            format!("physics model produced no component for element {element}"),
        ));
    };
    components[quant_position].quant = true;
    for component in components.iter_mut() {
        if component.component_type() == ComponentType::Element
            && component.element() == Some(element)
            && !component.quant
        {
            component.fit = false;
            component.ratio_to_quant = component
                .level()
                .map_or(1.0, |level| sibling_ratio(quant_level, level, config));
        }
    }
    Ok(())
}

/// Coefficient ratio of a sibling component to its element's quant
/// component, chained level by level: an M sibling of a K quant
/// component carries both the L-to-K and the M-to-L factors.
fn sibling_ratio(quant_level: EdgeLevel, sibling: EdgeLevel, config: &EngineConfig) -> f64 {
    let mut ratio = 1.0;
    for (level, step) in [
        (EdgeLevel::L, config.ratio_l_to_k),
        (EdgeLevel::M, config.ratio_m_to_l),
    ] {
        if level > quant_level && level <= sibling {
            ratio *= step;
        }
    }
    ratio
}

/// RECOMPUTE: regenerate every enabled component's shape for the
/// current composition, calibration, and detector state. A component
/// whose computed intensity is not a positive finite number is
/// disabled with a warning, unless it is a quant component, which
/// aborts the run.
fn recompute_shapes<P: PhysicsModel>(
    spectrum: &mut Spectrum,
    physics: &P,
    composition: &Composition,
    detector: &DetectorModel,
    config: &EngineConfig,
) -> QuantResult<()> {
    let channels = spectrum.channels();
    let calibration = *spectrum.calibration();
    let energies = spectrum.energies();
    let keys: Vec<ComponentKey> = spectrum
        .components()
        .iter()
        .filter(|component| component.enabled)
        .map(|component| component.key())
        .collect();

    for key in keys {
        let Some(component) = spectrum.component(&key) else {
            continue;
        };
        let mut shape =
            physics.render_shape(component, composition, &calibration, detector, channels)?;
        if key.component_type.splittable() && !config.background_split_energies.is_empty() {
            for (value, energy) in shape.iter_mut().zip(&energies) {
                *value *= split_weight(
                    *energy,
                    &config.background_split_energies,
                    key.background_index as usize,
                );
            }
        }
        let integral = stable_sum(&shape);
        let Some(component) = spectrum.component_mut(&key) else {
            continue;
        };
        if !integral.is_finite() || integral <= 0.0 {
            if component.quant {
                return Err(QuantError::numeric_anomaly(
                    "QUANT.DEAD_COMPONENT",
                    format!(
                        "quant component {} computed a non-positive intensity",
                        component.description()
                    ),
                ));
            }
            component.enabled = false;
            warn!(
                component = %component.description(),
                "component disabled: non-positive computed intensity"
            );
            continue;
        }
        component.shape = shape;
    }
    Ok(())
}

/// UPDATE: mass fraction from each quant coefficient over its
/// element's calibration factor, with the non-negativity policy. A
/// negative coefficient is floored to a negligible fraction once;
/// still negative after the forced minimum, the component is disabled
/// for the rest of the run. Returns whether any coefficient needed
/// negative handling this pass.
fn update_composition<E: EcfProvider>(
    spectrum: &mut Spectrum,
    ecf: &E,
    elements: &[Element],
    composition: &mut Composition,
    floored: &mut BTreeMap<ComponentKey, bool>,
    iteration: u32,
    config: &EngineConfig,
) -> QuantResult<bool> {
    let mut negatives_handled = false;
    for &element in elements {
        let state = spectrum
            .quant_component(element)
            .map(|c| (c.key(), c.coefficient, c.enabled, c.level()));
        let Some((key, coefficient, enabled, level)) = state else {
            composition.set_fraction(element, 0.0);
            continue;
        };
        if !enabled {
            composition.set_fraction(element, 0.0);
            continue;
        }
        if coefficient < 0.0 {
            negatives_handled = true;
            let was_floored = floored.get(&key).copied().unwrap_or(false);
            if was_floored && iteration > config.minimum_iterations {
                if let Some(component) = spectrum.component_mut(&key) {
                    component.enabled = false;
                }
                composition.set_fraction(element, 0.0);
                warn!(
                    element = %element,
                    "element disabled after repeated negative coefficient"
                );
            } else {
                floored.insert(key, true);
                composition.set_fraction(element, NEGLIGIBLE_FRACTION);
            }
            continue;
        }
        floored.insert(key, false);
        let factor = ecf
            .calibration_factor(element, level.unwrap_or(EdgeLevel::K))
            .factor;
        if !(factor > 0.0) {
            return Err(QuantError::invalid_input(
                "QUANT.ECF",
                format!("non-positive calibration factor for element {element}"),
            ));
        }
        composition.set_fraction(element, coefficient / factor);
    }

    // Degenerate guard: never hand the physics model an all-zero
    // composition.
    if composition.total() <= 0.0 {
        let first = elements[0];
        composition.set_fraction(first, NEGLIGIBLE_FRACTION);
        warn!(element = %first, "all fractions zero, forcing a minimal floor");
    }
    Ok(negatives_handled)
}
