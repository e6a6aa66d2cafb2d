//! Iterative self-consistent fitting engine for X-ray fluorescence
//! quantification.
//!
//! The engine models a measured spectrum as a weighted sum of physically
//! meaningful components, fits the component coefficients by weighted
//! linear least squares, and iterates the composition and the energy
//! calibration to a mutual fixed point.

pub mod common;
pub mod domain;
pub mod modules;
pub mod numerics;
