pub mod element;
pub mod errors;

pub use element::{Element, MAX_ATOMIC_NUMBER};
pub use errors::{QuantError, QuantErrorCategory, QuantResult};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Principal quantum number of the absorption edge whose emission lines
/// are grouped into one spectrum component.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum EdgeLevel {
    K,
    L,
    M,
    N,
}

impl EdgeLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::K => "K",
            Self::L => "L",
            Self::M => "M",
            Self::N => "N",
        }
    }

    pub fn from_str_opt(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "K" => Some(Self::K),
            "L" => Some(Self::L),
            "M" => Some(Self::M),
            "N" => Some(Self::N),
            _ => None,
        }
    }
}

impl Display for EdgeLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// Physical process that generates one additive term of the spectral
/// model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComponentType {
    /// Characteristic emission lines of a specimen element.
    Element,
    /// Coherent (Rayleigh) scatter of source lines.
    Rayleigh,
    /// Incoherent (Compton) scatter of source lines.
    Compton,
    /// Calculated continuum background.
    Continuum,
    /// Digital-filter (SNIP) background estimate.
    SnipBackground,
    /// Compton-escape shelf in the detector.
    DetectorComptonEscape,
    /// Pulse pileup.
    Pileup,
    /// Primary source lines reaching the detector (diagnostic only).
    PrimaryLines,
    /// Primary source continuum reaching the detector (diagnostic only).
    PrimaryContinuum,
    /// Optic transmission curve (diagnostic only).
    OpticTransmission,
}

impl ComponentType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Element => "ELEMENT",
            Self::Rayleigh => "RAYLEIGH",
            Self::Compton => "COMPTON",
            Self::Continuum => "CONTINUUM",
            Self::SnipBackground => "SNIP_BKG",
            Self::DetectorComptonEscape => "DETECTOR_CE",
            Self::Pileup => "PILEUP",
            Self::PrimaryLines => "PRIMARY_LINES",
            Self::PrimaryContinuum => "PRIMARY_CONTINUUM",
            Self::OpticTransmission => "OPTIC_TRANS",
        }
    }

    /// Types that carry an associated element and edge level.
    pub const fn has_element(self) -> bool {
        matches!(
            self,
            Self::Element | Self::Rayleigh | Self::Compton | Self::PrimaryLines
        )
    }

    /// Types whose contribution accumulates into the spectrum background.
    pub const fn is_background(self) -> bool {
        matches!(
            self,
            Self::Continuum | Self::SnipBackground | Self::DetectorComptonEscape
        )
    }

    /// Types that may be split into several independently fitted
    /// energy regions.
    pub const fn splittable(self) -> bool {
        matches!(self, Self::Continuum | Self::SnipBackground)
    }
}

impl Display for ComponentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// Identity of a spectrum component. Two components are the same
/// entity exactly when their keys are equal; all merging and lookup
/// goes through this key, never through positional indices.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ComponentKey {
    pub component_type: ComponentType,
    pub element: Option<Element>,
    pub level: Option<EdgeLevel>,
    pub background_index: u32,
}

impl ComponentKey {
    pub fn for_lines(component_type: ComponentType, element: Element, level: EdgeLevel) -> Self {
        Self {
            component_type,
            element: Some(element),
            level: Some(level),
            background_index: 0,
        }
    }

    pub fn standalone(component_type: ComponentType) -> Self {
        Self {
            component_type,
            element: None,
            level: None,
            background_index: 0,
        }
    }

    pub fn background(component_type: ComponentType, background_index: u32) -> Self {
        Self {
            component_type,
            element: None,
            level: None,
            background_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ComponentKey, ComponentType, EdgeLevel, Element};

    #[test]
    fn edge_level_parses_case_insensitively() {
        assert_eq!(EdgeLevel::from_str_opt("k"), Some(EdgeLevel::K));
        assert_eq!(EdgeLevel::from_str_opt(" L "), Some(EdgeLevel::L));
        assert_eq!(EdgeLevel::from_str_opt("X"), None);
    }

    #[test]
    fn keys_differ_when_any_identity_field_differs() {
        let iron = Element::from_symbol("Fe").expect("iron");
        let k_lines = ComponentKey::for_lines(ComponentType::Element, iron, EdgeLevel::K);
        let l_lines = ComponentKey::for_lines(ComponentType::Element, iron, EdgeLevel::L);
        let scatter = ComponentKey::for_lines(ComponentType::Rayleigh, iron, EdgeLevel::K);
        assert_ne!(k_lines, l_lines);
        assert_ne!(k_lines, scatter);
        assert_eq!(
            k_lines,
            ComponentKey::for_lines(ComponentType::Element, iron, EdgeLevel::K)
        );
    }

    #[test]
    fn background_keys_carry_region_index() {
        let first = ComponentKey::background(ComponentType::Continuum, 0);
        let second = ComponentKey::background(ComponentType::Continuum, 1);
        assert_ne!(first, second);
        assert_eq!(first.background_index, 0);
        assert!(first.component_type.is_background());
    }
}
