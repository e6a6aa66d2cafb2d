//! Spectrum components: the additive terms of the spectral model.
//!
//! Each component owns a rendered shape over the spectrum channels and
//! a fitted coefficient. Identity is the `ComponentKey`; all merging,
//! lookup, and bookkeeping goes through the key so that disabling or
//! reordering components can never misattribute a coefficient.

pub mod split;

pub use split::split_weight;

use crate::domain::{ComponentKey, ComponentType, EdgeLevel, Element};
use crate::numerics::stable_sum;

/// One group of emission lines sharing an element and edge level, as
/// produced by the physics model. Energies are in eV.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineGroup {
    pub element: Element,
    pub level: EdgeLevel,
    /// Energy of the strongest line in the group.
    pub energy: f64,
    /// Expected counts per unit mass fraction.
    pub intensity: f64,
    /// Matrix-effect factor folded into the calibration relation.
    pub matrix_factor: f64,
}

/// An additive term of the spectral model with its fit state.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumComponent {
    key: ComponentKey,
    /// Rendered counts per channel at unit coefficient.
    pub shape: Vec<f64>,
    pub coefficient: f64,
    pub variance: f64,
    /// Net line intensity from the physics model, counts per unit
    /// mass fraction.
    pub intensity: f64,
    pub matrix_factor: f64,
    /// Energy of the strongest peak, eV. Zero for shapes without a
    /// characteristic peak.
    pub peak_energy: f64,
    /// Disabled components are excluded from the fit and from the
    /// calculated spectrum.
    pub enabled: bool,
    /// Whether this component gets its own column in the design
    /// matrix. Non-fit components ride along at a fixed coefficient
    /// or at a ratio to a quant sibling.
    pub fit: bool,
    /// Whether this component's coefficient converts to a mass
    /// fraction for its element.
    pub quant: bool,
    /// For a non-fit element component, coefficient ratio to its
    /// element's quant component. Zero means no tie.
    pub ratio_to_quant: f64,
}

impl SpectrumComponent {
    pub fn new(key: ComponentKey) -> Self {
        // Escape and pileup shapes are scaled by the physics model,
        // not by the fit.
        let fit = !matches!(
            key.component_type,
            ComponentType::DetectorComptonEscape | ComponentType::Pileup
        );
        Self {
            key,
            shape: Vec::new(),
            coefficient: 1.0,
            variance: 0.0,
            intensity: 0.0,
            matrix_factor: 1.0,
            peak_energy: 0.0,
            enabled: true,
            fit,
            quant: false,
            ratio_to_quant: 0.0,
        }
    }

    pub const fn key(&self) -> ComponentKey {
        self.key
    }

    pub const fn component_type(&self) -> ComponentType {
        self.key.component_type
    }

    pub const fn element(&self) -> Option<Element> {
        self.key.element
    }

    pub const fn level(&self) -> Option<EdgeLevel> {
        self.key.level
    }

    pub fn is_background(&self) -> bool {
        self.key.component_type.is_background()
    }

    /// Whether a line belongs in this component.
    pub fn accepts_line(&self, element: Element, level: EdgeLevel) -> bool {
        self.key.component_type.has_element()
            && self.key.element == Some(element)
            && self.key.level == Some(level)
    }

    pub fn matches(&self, key: &ComponentKey) -> bool {
        self.key == *key
    }

    pub fn shape_integral(&self) -> f64 {
        stable_sum(&self.shape)
    }

    /// Coefficient relative standard error, infinite when undefined.
    pub fn relative_error(&self) -> f64 {
        if self.coefficient != 0.0 && self.variance > 0.0 {
            self.variance.sqrt() / self.coefficient.abs()
        } else {
            f64::INFINITY
        }
    }

    /// Stable, human-readable label. Distinct identities always get
    /// distinct labels.
    pub fn description(&self) -> String {
        let key = self.key;
        match key.component_type {
            ComponentType::Element => label_with_lines(&key, ""),
            ComponentType::Rayleigh => label_with_lines(&key, "_coh"),
            ComponentType::Compton => label_with_lines(&key, "_inc"),
            ComponentType::PrimaryLines => label_with_lines(&key, "_pri"),
            ComponentType::Continuum => format!("calc bkg{}", key.background_index),
            ComponentType::SnipBackground => format!("SNIP bkg{}", key.background_index),
            ComponentType::DetectorComptonEscape => "DetCE".to_string(),
            ComponentType::Pileup => "Pileup".to_string(),
            ComponentType::PrimaryContinuum => "continuum".to_string(),
            ComponentType::OpticTransmission => "Optic".to_string(),
        }
    }
}

fn label_with_lines(key: &ComponentKey, suffix: &str) -> String {
    let symbol = key.element.map_or("?", Element::symbol);
    let level = key.level.map_or("?", EdgeLevel::as_str);
    format!("{symbol}_{level}{suffix}")
}

/// Recover a component identity from its `description()` text, or
/// from the shorthand forms used in calibration files. Returns `None`
/// for text that names no known component.
pub fn parse_component(text: &str) -> Option<ComponentKey> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed {
        "DetCE" => return Some(ComponentKey::standalone(ComponentType::DetectorComptonEscape)),
        "Pileup" => return Some(ComponentKey::standalone(ComponentType::Pileup)),
        "continuum" => return Some(ComponentKey::standalone(ComponentType::PrimaryContinuum)),
        "Optic" => return Some(ComponentKey::standalone(ComponentType::OpticTransmission)),
        _ => {}
    }
    if let Some(index_text) = trimmed.strip_prefix("calc bkg") {
        let index = index_text.parse().ok()?;
        return Some(ComponentKey::background(ComponentType::Continuum, index));
    }
    if let Some(index_text) = trimmed.strip_prefix("SNIP bkg") {
        let index = index_text.parse().ok()?;
        return Some(ComponentKey::background(ComponentType::SnipBackground, index));
    }
    // Shorthand for a whole background, region zero.
    if trimmed.eq_ignore_ascii_case("bkg") {
        return Some(ComponentKey::background(ComponentType::SnipBackground, 0));
    }

    // Element forms: "Fe", "Fe_K", "Fe_K_coh", "Fe_K_inc", "Fe_K_pri".
    let mut parts = trimmed.split('_');
    let element = Element::from_symbol(parts.next()?)?;
    let level = match parts.next() {
        Some(token) => EdgeLevel::from_str_opt(token)?,
        None => EdgeLevel::K,
    };
    let component_type = match parts.next() {
        None => ComponentType::Element,
        Some("coh") => ComponentType::Rayleigh,
        Some("inc") => ComponentType::Compton,
        Some("pri") => ComponentType::PrimaryLines,
        Some(_) => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(ComponentKey::for_lines(component_type, element, level))
}

/// Group line groups into components, merging groups that share an
/// identity. Line groups for the same element and level accumulate
/// their intensities; the strongest line sets the peak energy.
pub fn make_components(
    component_type: ComponentType,
    line_groups: &[LineGroup],
) -> Vec<SpectrumComponent> {
    let mut components: Vec<SpectrumComponent> = Vec::new();
    for group in line_groups {
        let key = ComponentKey::for_lines(component_type, group.element, group.level);
        let position = match components.iter().position(|c| c.matches(&key)) {
            Some(position) => position,
            None => {
                components.push(SpectrumComponent::new(key));
                components.len() - 1
            }
        };
        let component = &mut components[position];
        if group.intensity > component.intensity {
            component.peak_energy = group.energy;
            component.matrix_factor = group.matrix_factor;
        }
        component.intensity += group.intensity;
    }
    components
}

/// One placeholder component per background region. The shapes are
/// rendered later; the region index is the identity.
pub fn make_background_components(
    component_type: ComponentType,
    regions: u32,
) -> Vec<SpectrumComponent> {
    debug_assert!(component_type.splittable());
    (0..regions)
        .map(|index| SpectrumComponent::new(ComponentKey::background(component_type, index)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        make_background_components, make_components, parse_component, LineGroup,
        SpectrumComponent,
    };
    use crate::domain::{ComponentKey, ComponentType, EdgeLevel, Element};

    fn iron() -> Element {
        Element::from_symbol("Fe").expect("iron")
    }

    fn group(symbol: &str, level: EdgeLevel, energy: f64, intensity: f64) -> LineGroup {
        LineGroup {
            element: Element::from_symbol(symbol).expect("element"),
            level,
            energy,
            intensity,
            matrix_factor: 1.0,
        }
    }

    #[test]
    fn line_groups_with_same_identity_merge_into_one_component() {
        let groups = [
            group("Fe", EdgeLevel::K, 6403.8, 100.0),
            group("Fe", EdgeLevel::K, 7058.0, 14.0),
            group("Fe", EdgeLevel::L, 705.0, 8.0),
            group("Ca", EdgeLevel::K, 3691.7, 50.0),
        ];
        let components = make_components(ComponentType::Element, &groups);
        assert_eq!(components.len(), 3);

        let fe_k = components
            .iter()
            .find(|c| c.accepts_line(iron(), EdgeLevel::K))
            .expect("Fe K component");
        assert_eq!(fe_k.intensity, 114.0);
        // Strongest line sets the reference peak.
        assert_eq!(fe_k.peak_energy, 6403.8);
        assert!(fe_k.fit);
        assert!(fe_k.enabled);
    }

    #[test]
    fn background_components_are_indexed_by_region() {
        let components = make_background_components(ComponentType::SnipBackground, 3);
        assert_eq!(components.len(), 3);
        assert_eq!(components[2].key().background_index, 2);
        assert!(components[0].is_background());
        assert!(components[0].fit);
    }

    #[test]
    fn escape_and_pileup_components_default_to_non_fit() {
        let escape =
            SpectrumComponent::new(ComponentKey::standalone(ComponentType::DetectorComptonEscape));
        let pileup = SpectrumComponent::new(ComponentKey::standalone(ComponentType::Pileup));
        assert!(!escape.fit);
        assert!(!pileup.fit);
        assert_eq!(escape.coefficient, 1.0);
    }

    #[test]
    fn descriptions_never_collide_for_distinct_identities() {
        let mut components = make_components(
            ComponentType::Element,
            &[
                group("Fe", EdgeLevel::K, 6403.8, 100.0),
                group("Fe", EdgeLevel::L, 705.0, 8.0),
            ],
        );
        components.extend(make_components(
            ComponentType::Compton,
            &[group("Rh", EdgeLevel::K, 19150.5, 30.0)],
        ));
        components.extend(make_background_components(ComponentType::Continuum, 2));
        components.extend(make_background_components(ComponentType::SnipBackground, 2));
        components.push(SpectrumComponent::new(ComponentKey::standalone(
            ComponentType::DetectorComptonEscape,
        )));

        let mut labels: Vec<String> = components.iter().map(|c| c.description()).collect();
        labels.sort();
        let before = labels.len();
        labels.dedup();
        assert_eq!(labels.len(), before, "duplicate labels: {labels:?}");
    }

    #[test]
    fn descriptions_round_trip_through_parse() {
        let mut components = make_components(
            ComponentType::Element,
            &[group("Ca", EdgeLevel::K, 3691.7, 50.0)],
        );
        components.extend(make_components(
            ComponentType::Rayleigh,
            &[group("Rh", EdgeLevel::L, 2696.7, 10.0)],
        ));
        components.extend(make_background_components(ComponentType::Continuum, 2));
        for component in &components {
            let parsed = parse_component(&component.description())
                .unwrap_or_else(|| panic!("unparsed: {}", component.description()));
            assert_eq!(parsed, component.key());
        }
    }

    #[test]
    fn parse_accepts_shorthand_forms() {
        assert_eq!(
            parse_component("Fe"),
            Some(ComponentKey::for_lines(
                ComponentType::Element,
                iron(),
                EdgeLevel::K
            ))
        );
        assert_eq!(
            parse_component("bkg"),
            Some(ComponentKey::background(ComponentType::SnipBackground, 0))
        );
        assert_eq!(parse_component(""), None);
        assert_eq!(parse_component("Fe_K_bogus"), None);
        assert_eq!(parse_component("Xx_K"), None);
    }

    #[test]
    fn relative_error_is_infinite_without_a_variance() {
        let mut component =
            SpectrumComponent::new(ComponentKey::for_lines(ComponentType::Element, iron(), EdgeLevel::K));
        assert!(component.relative_error().is_infinite());
        component.coefficient = 2.0;
        component.variance = 0.04;
        assert!((component.relative_error() - 0.1).abs() < 1.0e-12);
    }
}
