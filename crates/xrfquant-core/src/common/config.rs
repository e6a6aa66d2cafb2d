//! Run-scoped engine configuration.
//!
//! Every tunable that governs convergence, damping, and correction
//! acceptance is carried in one immutable value handed to the engine,
//! so runs are reproducible and tests can tighten or relax individual
//! bounds.

use crate::domain::{QuantError, QuantResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Relative coefficient change below which an element component
    /// counts as converged.
    pub fit_coefficient_delta: f64,
    /// Hard cap on outer iterations.
    pub max_iterations: u32,
    /// Iterations always run before the loop may report convergence;
    /// the earliest iterations are never self-consistent.
    pub minimum_iterations: u32,
    /// Fraction of each calibration/resolution correction actually
    /// applied. Corrections interact nonlinearly with the next shape
    /// recomputation, so full steps oscillate.
    pub correction_damping: f64,
    /// Largest accepted calibration offset correction, as a fraction
    /// of the detector resolution.
    pub max_offset_fraction: f64,
    /// Largest accepted calibration slope correction, in percent of
    /// the energy per channel.
    pub max_slope_percent: f64,
    /// Largest accepted relative change of the detector resolution.
    pub max_resolution_change: f64,
    /// Largest accepted relative change of the Fano factor.
    pub max_fano_change: f64,
    /// Fraction of the total peak weight that must survive the width
    /// acceptance windows before a resolution update is trusted.
    pub width_weight_fraction: f64,
    /// Allow the fit to correct the energy calibration.
    pub adjust_energy: bool,
    /// Allow the fit to correct the detector resolution and Fano factor.
    pub adjust_resolution: bool,
    /// Coefficient ratio tying a non-fit L component to its element's
    /// K quant component.
    pub ratio_l_to_k: f64,
    /// Coefficient ratio tying a non-fit M component to its element's
    /// L quant component.
    pub ratio_m_to_l: f64,
    /// Components whose shape integral falls below this fraction of
    /// the largest shape are left out of the design matrix.
    pub tiny_component_ratio: f64,
    /// Boundary energies (eV) splitting the background into
    /// independently fitted regions; empty means one region.
    pub background_split_energies: Vec<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fit_coefficient_delta: 0.001,
            max_iterations: 40,
            minimum_iterations: 3,
            correction_damping: 0.8,
            max_offset_fraction: 0.5,
            max_slope_percent: 1.0,
            max_resolution_change: 0.2,
            max_fano_change: 0.4,
            width_weight_fraction: 0.8,
            adjust_energy: true,
            adjust_resolution: true,
            ratio_l_to_k: 1.0,
            ratio_m_to_l: 1.0,
            tiny_component_ratio: 1.0e-10,
            background_split_energies: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> QuantResult<()> {
        if !(self.fit_coefficient_delta > 0.0) {
            return Err(QuantError::invalid_input(
                "CONFIG.FIT_DELTA",
                format!(
                    "fit coefficient delta must be positive, got {}",
                    self.fit_coefficient_delta
                ),
            ));
        }
        if self.max_iterations == 0 || self.minimum_iterations > self.max_iterations {
            return Err(QuantError::invalid_input(
                "CONFIG.ITERATIONS",
                format!(
                    "iteration bounds are inconsistent: minimum {} maximum {}",
                    self.minimum_iterations, self.max_iterations
                ),
            ));
        }
        if !(self.correction_damping > 0.0 && self.correction_damping <= 1.0) {
            return Err(QuantError::invalid_input(
                "CONFIG.DAMPING",
                format!(
                    "correction damping must be in (0, 1], got {}",
                    self.correction_damping
                ),
            ));
        }
        if !self
            .background_split_energies
            .windows(2)
            .all(|pair| pair[0] < pair[1])
        {
            return Err(QuantError::invalid_input(
                "CONFIG.BKG_SPLIT",
                "background split energies must be strictly increasing",
            ));
        }
        Ok(())
    }

    /// Number of background components implied by the split list.
    pub fn background_regions(&self) -> u32 {
        self.background_split_energies.len().max(1) as u32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("failed to read engine config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse engine config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub fn load_engine_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigFileError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| ConfigFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
