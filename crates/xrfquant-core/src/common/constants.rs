//! Physical and numerical constants shared across the engine.

/// Ratio of Gaussian FWHM to sigma, sqrt(8 ln 2).
pub const SQRT_EIGHT_LN_2: f64 = 2.354_820_045_030_949;

/// 8 ln 2, used where the FWHM/sigma ratio appears squared.
pub const EIGHT_LN_2: f64 = 5.545_177_444_479_562;

/// Floor substituted for near-zero pivots during LU decomposition.
pub const PIVOT_FLOOR: f64 = 1.0e-30;

/// Mass fraction assigned to an element whose coefficient went
/// negative, for one further iteration before it is disabled.
pub const NEGLIGIBLE_FRACTION: f64 = 1.0e-8;

/// Mn K-alpha energy in eV, the conventional reference point for
/// detector resolution.
pub const MN_KA_ENERGY_EV: f64 = 5898.8;

/// Energy per electron-hole pair in silicon, eV.
pub const SI_ENERGY_PER_PAIR_EV: f64 = 3.65;
