//! One fit iteration: linear solve plus perturbative calibration and
//! resolution correction.
//!
//! The linear part is exact; the calibration part linearizes peak
//! shifts and width changes as the first and second derivative of
//! each component's model curve weighted against the residual. Shifts
//! and widths are nonlinear parameters, so only a damped fraction of
//! each accepted correction is applied and everything outside the
//! sanity bounds is rejected with a warning.

use crate::common::config::EngineConfig;
use crate::common::constants::{EIGHT_LN_2, SQRT_EIGHT_LN_2};
use crate::domain::{ComponentType, QuantError, QuantResult};
use crate::modules::detector::DetectorModel;
use crate::modules::spectrum::Spectrum;
use crate::numerics::{differentiate, fit_weighted_line, linear_least_squares};
use std::ops::Range;
use tracing::{debug, warn};

// Corrections below these floors count as "nothing applied", so a
// converged fit cannot bounce forever on vanishing adjustments.
const NEGLIGIBLE_OFFSET_FRACTION: f64 = 1.0e-4;
const NEGLIGIBLE_TILT_FRACTION: f64 = 1.0e-6;
const NEGLIGIBLE_RELATIVE_CHANGE: f64 = 1.0e-4;

/// Outcome of one fit iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitSignal {
    /// Coefficients converged and no correction was applied.
    Done,
    /// Coefficients still moving, or a correction was applied and the
    /// shapes must be regenerated.
    NotDone,
    /// Coefficients converged with self-correction disabled.
    NoAdjustment,
}

/// Fit all enabled fit components, update derived spectra, and when
/// the coefficients have converged, estimate and apply calibration and
/// resolution corrections.
pub fn fit_spectrum(
    spectrum: &mut Spectrum,
    detector: &mut DetectorModel,
    config: &EngineConfig,
) -> QuantResult<FitSignal> {
    let selection = spectrum.fit_selection(config.tiny_component_ratio);
    if selection.is_empty() {
        return Err(QuantError::invalid_input(
            "FIT.NO_COMPONENTS",
            "no enabled fit component has a usable shape",
        ));
    }
    let net = spectrum.net_measured();
    let design = spectrum.design_matrix(&selection);
    let solved = linear_least_squares(&net, spectrum.sigma(), &design, selection.len())?;

    // Convergence gates on element components with a reference peak;
    // background and scatter coefficients may keep drifting.
    let mut converged = true;
    for (position, key) in selection.iter().enumerate() {
        let Some(component) = spectrum.component(key) else {
            continue;
        };
        if component.component_type() != ComponentType::Element
            || !(component.peak_energy > 0.0)
        {
            continue;
        }
        let new = solved.coefficients[position];
        let old = component.coefficient;
        let scale = new.abs().max(old.abs());
        if scale > 0.0 && (new - old).abs() > config.fit_coefficient_delta * scale {
            converged = false;
        }
    }

    spectrum.apply_fit(&selection, &solved);
    spectrum.update_non_fit_coefficients();
    spectrum.update_background();
    spectrum.update_calculated();
    debug!(
        components = selection.len(),
        chi_squared = solved.chi_squared,
        converged,
        "linear fit complete"
    );

    if !converged {
        return Ok(FitSignal::NotDone);
    }
    if !(config.adjust_energy || config.adjust_resolution) {
        return Ok(FitSignal::NoAdjustment);
    }
    let applied = apply_corrections(spectrum, detector, config);
    Ok(if applied {
        FitSignal::NotDone
    } else {
        FitSignal::Done
    })
}

struct ShiftPoint {
    channel: f64,
    shift_ev: f64,
    /// Relative standard error of the peak area, the regression sigma.
    sigma: f64,
}

struct WidthPoint {
    energy: f64,
    fwhm_squared: f64,
    sigma: f64,
}

fn apply_corrections(
    spectrum: &mut Spectrum,
    detector: &mut DetectorModel,
    config: &EngineConfig,
) -> bool {
    let residual = spectrum.residual();
    let calibration = *spectrum.calibration();
    let ev_per_channel = calibration.effective_energy_per_channel();
    let channels = spectrum.channels();

    let mut shift_points: Vec<ShiftPoint> = Vec::new();
    let mut width_points: Vec<WidthPoint> = Vec::new();
    let mut total_weight = 0.0;
    let mut accepted_width_weight = 0.0;

    for component in spectrum.components() {
        if !component.enabled
            || !component.fit
            || component.component_type() != ComponentType::Element
            || !(component.peak_energy > 0.0)
            || component.coefficient <= 0.0
            || component.shape.len() != channels
        {
            continue;
        }
        let resolution = detector.resolution(component.peak_energy);
        let center = calibration.channel(component.peak_energy);
        if !(center > 0.0 && center < channels as f64 - 1.0) {
            continue;
        }
        let fwhm_channels = resolution / ev_per_channel;

        // Every estimate from this peak is gated and weighted by the
        // relative standard error of its fitted area, so a weak or
        // poorly determined peak cannot steer the corrections.
        let relative_error = component.relative_error();
        if !relative_error.is_finite() || !(relative_error > 0.0) {
            continue;
        }
        let weight = 1.0 / (relative_error * relative_error);
        total_weight += weight;

        let mut first: Vec<f64> = component
            .shape
            .iter()
            .map(|value| value * component.coefficient)
            .collect();
        differentiate(&mut first);
        let mut second = first.clone();
        differentiate(&mut second);

        // A peak displaced by +d channels leaves a residual of about
        // -d times the model's first derivative, which is exactly the
        // energy-offset correction once scaled to eV.
        let window = window_around(center, fwhm_channels, channels);
        let Some(amplitude) = fitted_amplitude(&residual, &first, window) else {
            continue;
        };
        let shift_ev = amplitude * ev_per_channel;
        if shift_ev.abs() < resolution / 4.0 {
            shift_points.push(ShiftPoint {
                channel: center,
                shift_ev,
                sigma: relative_error,
            });
        } else {
            debug!(
                peak = component.peak_energy,
                shift_ev, "shift estimate rejected"
            );
        }

        // Width against the second derivative, within a quarter of the
        // local resolution of the peak center. The width estimate is
        // unreliable when the peak is badly displaced, so it requires
        // a small shift first.
        if shift_ev.abs() < resolution / 3.0 {
            let window = window_around(center, 0.25 * fwhm_channels, channels);
            if let Some(amplitude) = fitted_amplitude(&residual, &second, window) {
                let fwhm_increase =
                    SQRT_EIGHT_LN_2 * amplitude * ev_per_channel * ev_per_channel / resolution;
                if fwhm_increase.abs() < resolution / 4.0 {
                    let fwhm = resolution + fwhm_increase;
                    width_points.push(WidthPoint {
                        energy: component.peak_energy,
                        fwhm_squared: fwhm * fwhm,
                        sigma: relative_error,
                    });
                    accepted_width_weight += weight;
                } else {
                    debug!(
                        peak = component.peak_energy,
                        fwhm_increase, "width estimate rejected"
                    );
                }
            }
        }
    }

    let mut applied = false;
    if config.adjust_energy {
        applied |= apply_energy_correction(spectrum, detector, config, &shift_points);
    }
    // Most of the peak weight must back the resolution update, not
    // just a few small peaks.
    if config.adjust_resolution
        && total_weight > 0.0
        && accepted_width_weight >= config.width_weight_fraction * total_weight
    {
        applied |= apply_resolution_correction(detector, config, &width_points);
    }
    applied
}

fn apply_energy_correction(
    spectrum: &mut Spectrum,
    detector: &DetectorModel,
    config: &EngineConfig,
    shift_points: &[ShiftPoint],
) -> bool {
    let ev_per_channel = spectrum.calibration().effective_energy_per_channel();
    let (offset, tilt) = match shift_points {
        [] => return false,
        // One peak only determines one parameter; correct the slope
        // through the origin and leave the offset alone.
        [only] => (0.0, only.shift_ev / only.channel),
        _ => {
            let x: Vec<f64> = shift_points.iter().map(|p| p.channel).collect();
            let y: Vec<f64> = shift_points.iter().map(|p| p.shift_ev).collect();
            let s: Vec<f64> = shift_points.iter().map(|p| p.sigma).collect();
            match fit_weighted_line(&x, &y, &s) {
                Some(fit) => (fit.intercept, fit.slope),
                None => return false,
            }
        }
    };
    let offset = config.correction_damping * offset;
    let tilt = config.correction_damping * tilt;
    let reference_resolution = detector.resolution(detector.reference_energy());

    if offset.abs() > config.max_offset_fraction * reference_resolution {
        warn!(offset, "energy offset correction exceeds sanity bound, not applied");
        return false;
    }
    if tilt.abs() > config.max_slope_percent / 100.0 * ev_per_channel {
        warn!(tilt, "energy slope correction exceeds sanity bound, not applied");
        return false;
    }
    if offset.abs() <= NEGLIGIBLE_OFFSET_FRACTION * reference_resolution
        && tilt.abs() <= NEGLIGIBLE_TILT_FRACTION * ev_per_channel
    {
        return false;
    }
    spectrum.calibration_mut().apply_correction(offset, tilt);
    debug!(offset, tilt, "energy calibration correction applied");
    true
}

fn apply_resolution_correction(
    detector: &mut DetectorModel,
    config: &EngineConfig,
    width_points: &[WidthPoint],
) -> bool {
    let current_fwhm = detector.fwhm_ref();
    let current_fano = detector.fano();
    let estimate = match width_points {
        [] => None,
        // One width rescales the reference resolution and keeps the
        // Fano-derived slope.
        [only] => {
            let scale = only.fwhm_squared.sqrt() / detector.resolution(only.energy);
            (scale > 0.0).then(|| (scale * current_fwhm, current_fano))
        }
        _ => {
            let x: Vec<f64> = width_points.iter().map(|p| p.energy).collect();
            let y: Vec<f64> = width_points.iter().map(|p| p.fwhm_squared).collect();
            let s: Vec<f64> = width_points.iter().map(|p| p.sigma).collect();
            fit_weighted_line(&x, &y, &s).and_then(|fit| {
                let reference_squared =
                    fit.intercept + fit.slope * detector.reference_energy();
                let fano = fit.slope / (EIGHT_LN_2 * detector.energy_per_pair());
                (reference_squared > 0.0 && fano > 0.0)
                    .then(|| (reference_squared.sqrt(), fano))
            })
        }
    };
    let Some((fwhm_estimate, fano_estimate)) = estimate else {
        return false;
    };

    let fwhm_new = current_fwhm + config.correction_damping * (fwhm_estimate - current_fwhm);
    let fano_new = current_fano + config.correction_damping * (fano_estimate - current_fano);
    let fwhm_change = (fwhm_new - current_fwhm).abs() / current_fwhm;
    let fano_change = (fano_new - current_fano).abs() / current_fano;
    if fwhm_change > config.max_resolution_change {
        warn!(
            fwhm_new,
            "resolution correction exceeds sanity bound, not applied"
        );
        return false;
    }
    if fano_change > config.max_fano_change {
        warn!(fano_new, "Fano correction exceeds sanity bound, not applied");
        return false;
    }
    if fwhm_change <= NEGLIGIBLE_RELATIVE_CHANGE && fano_change <= NEGLIGIBLE_RELATIVE_CHANGE {
        return false;
    }
    detector.set_fwhm_ref(fwhm_new);
    detector.set_fano(fano_new);
    debug!(fwhm_new, fano_new, "detector resolution correction applied");
    true
}

/// Single-parameter regression of `residual` against `basis` over a
/// channel window.
fn fitted_amplitude(residual: &[f64], basis: &[f64], window: Range<usize>) -> Option<f64> {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for i in window {
        numerator += residual[i] * basis[i];
        denominator += basis[i] * basis[i];
    }
    (denominator > 0.0).then(|| numerator / denominator)
}

fn window_around(center: f64, half_width_channels: f64, channels: usize) -> Range<usize> {
    let lo = (center - half_width_channels).floor().max(0.0) as usize;
    let hi = (((center + half_width_channels).ceil()) as usize + 1).min(channels);
    lo..hi.max(lo)
}
