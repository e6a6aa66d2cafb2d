//! Element identity keyed by atomic number, with symbol lookup for
//! component descriptions and calibration-file round trips.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub const MAX_ATOMIC_NUMBER: usize = 98;

const ELEMENT_SYMBOLS: [&str; MAX_ATOMIC_NUMBER] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl",
    "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am", "Cm", "Bk",
    "Cf",
];

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "ElementRepr", into = "ElementRepr")]
pub struct Element {
    atomic_number: u32,
}

impl Element {
    pub fn new(atomic_number: u32) -> Option<Self> {
        if atomic_number == 0 || atomic_number as usize > MAX_ATOMIC_NUMBER {
            None
        } else {
            Some(Self { atomic_number })
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let normalized = symbol.trim();
        if normalized.is_empty() {
            return None;
        }
        ELEMENT_SYMBOLS
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(normalized))
            .map(|index| Self {
                atomic_number: index as u32 + 1,
            })
    }

    pub const fn atomic_number(self) -> u32 {
        self.atomic_number
    }

    pub fn symbol(self) -> &'static str {
        ELEMENT_SYMBOLS[self.atomic_number as usize - 1]
    }
}

impl Display for Element {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Serialized form: either an element symbol or an atomic number.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ElementRepr {
    Symbol(String),
    AtomicNumber(u32),
}

impl From<Element> for ElementRepr {
    fn from(element: Element) -> Self {
        ElementRepr::Symbol(element.symbol().to_string())
    }
}

impl TryFrom<ElementRepr> for Element {
    type Error = String;

    fn try_from(repr: ElementRepr) -> Result<Self, Self::Error> {
        match repr {
            ElementRepr::Symbol(symbol) => Element::from_symbol(&symbol)
                .ok_or_else(|| format!("unknown element symbol '{symbol}'")),
            ElementRepr::AtomicNumber(z) => {
                Element::new(z).ok_or_else(|| format!("atomic number {z} out of range"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Element, MAX_ATOMIC_NUMBER};

    #[test]
    fn lookup_rejects_out_of_range_atomic_numbers() {
        assert!(Element::new(0).is_none());
        assert!(Element::new(MAX_ATOMIC_NUMBER as u32 + 1).is_none());
        assert!(Element::new(26).is_some());
    }

    #[test]
    fn symbol_roundtrip_matches_atomic_number() {
        assert_eq!(Element::from_symbol("Fe").map(Element::atomic_number), Some(26));
        assert_eq!(Element::from_symbol("fe").map(Element::atomic_number), Some(26));
        assert_eq!(Element::from_symbol(" U "), Element::new(92));
        assert_eq!(Element::new(45).map(Element::symbol), Some("Rh"));
        assert_eq!(Element::from_symbol(""), None);
        assert_eq!(Element::from_symbol("Xx"), None);
    }

    #[test]
    fn serde_accepts_symbol_or_atomic_number() {
        let from_symbol: Element = serde_json::from_str("\"Ca\"").expect("symbol should parse");
        let from_number: Element = serde_json::from_str("20").expect("number should parse");
        assert_eq!(from_symbol, from_number);
        assert_eq!(serde_json::to_string(&from_symbol).expect("serialize"), "\"Ca\"");
        assert!(serde_json::from_str::<Element>("\"Zz\"").is_err());
    }
}
