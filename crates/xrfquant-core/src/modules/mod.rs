pub mod component;
pub mod detector;
pub mod fit;
pub mod quant;
pub mod spectrum;
pub mod traits;

pub use component::{LineGroup, SpectrumComponent};
pub use detector::DetectorModel;
pub use fit::{fit_spectrum, FitSignal};
pub use quant::{quantify, Composition, QuantReport};
pub use spectrum::{EnergyCalibration, Spectrum};
pub use traits::{EcfProvider, EcfValue, GaussianPhysics, PhysicsModel, SyntheticLine, TableEcf};
