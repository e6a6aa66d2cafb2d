use super::CliError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use xrfquant_core::common::config::{load_engine_config, EngineConfig};
use xrfquant_core::domain::{EdgeLevel, Element, QuantError};
use xrfquant_core::modules::detector::DetectorModel;
use xrfquant_core::modules::quant::{quantify, QuantReport};
use xrfquant_core::modules::spectrum::{EnergyCalibration, Spectrum};
use xrfquant_core::modules::traits::{EcfValue, GaussianPhysics, SyntheticLine, TableEcf};

#[derive(clap::Args)]
pub(super) struct QuantifyArgs {
    /// Spectrum analysis file (JSON)
    input: PathBuf,

    /// Engine configuration file (JSON); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON report output path
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct ConfigArgs {
    /// Engine configuration file (JSON) to merge over the defaults
    #[arg(long)]
    config: Option<PathBuf>,
}

/// On-disk description of one analysis: the measured spectrum, its
/// calibration, the element set, and the synthetic line catalog.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AnalysisInput {
    counts: Vec<f64>,
    #[serde(default)]
    energy_start_ev: f64,
    energy_per_channel_ev: f64,
    live_time: f64,
    elements: Vec<Element>,
    lines: Vec<LineInput>,
    #[serde(default = "default_counts_per_fraction")]
    counts_per_fraction: f64,
    #[serde(default = "default_background_level")]
    background_level: f64,
    #[serde(default)]
    detector: DetectorModel,
    /// Element calibration factors by symbol; missing elements use 1.
    #[serde(default)]
    ecf: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LineInput {
    element: Element,
    #[serde(default = "default_level")]
    level: EdgeLevel,
    energy_ev: f64,
    #[serde(default = "default_intensity")]
    relative_intensity: f64,
}

fn default_counts_per_fraction() -> f64 {
    1.0
}

fn default_background_level() -> f64 {
    1.0
}

fn default_level() -> EdgeLevel {
    EdgeLevel::K
}

fn default_intensity() -> f64 {
    1.0
}

pub(super) fn run_quantify_command(args: QuantifyArgs) -> Result<i32, CliError> {
    let input = load_analysis_input(&args.input)?;
    let config = load_config(args.config.as_deref())?;
    info!(
        channels = input.counts.len(),
        elements = input.elements.len(),
        "analysis input loaded"
    );

    let calibration =
        EnergyCalibration::new(input.energy_start_ev, input.energy_per_channel_ev);
    let mut spectrum = Spectrum::new(input.counts, calibration, input.live_time)
        .map_err(CliError::Compute)?;
    let mut detector = input.detector;

    let lines = input
        .lines
        .iter()
        .map(|line| SyntheticLine {
            element: line.element,
            level: line.level,
            energy: line.energy_ev,
            relative_intensity: line.relative_intensity,
        })
        .collect();
    let physics = GaussianPhysics::new(lines, input.counts_per_fraction, input.background_level);

    let mut ecf = TableEcf::new(EcfValue::default());
    for (symbol, factor) in &input.ecf {
        let element = Element::from_symbol(symbol).ok_or_else(|| {
            CliError::Compute(QuantError::invalid_input(
                "INPUT.ECF_ELEMENT",
                format!("unknown element symbol '{symbol}' in ecf table"),
            ))
        })?;
        for level in [EdgeLevel::K, EdgeLevel::L, EdgeLevel::M, EdgeLevel::N] {
            ecf.insert(
                element,
                level,
                EcfValue {
                    factor: *factor,
                    sigma: 0.0,
                },
            );
        }
    }

    let report = quantify(
        &mut spectrum,
        &mut detector,
        &physics,
        &ecf,
        &input.elements,
        &config,
    )
    .map_err(CliError::Compute)?;

    println!("{}", render_human_summary(&report));
    if let Some(report_path) = &args.report {
        write_report(report_path, &report)?;
        println!("JSON report: {}", report_path.display());
    }

    if report.converged { Ok(0) } else { Ok(1) }
}

pub(super) fn run_config_command(args: ConfigArgs) -> Result<i32, CliError> {
    let config = load_config(args.config.as_deref())?;
    config.validate().map_err(CliError::Compute)?;
    let rendered = serde_json::to_string_pretty(&config)
        .map_err(|source| CliError::Internal(source.into()))?;
    println!("{rendered}");
    Ok(0)
}

fn load_analysis_input(path: &Path) -> Result<AnalysisInput, CliError> {
    let source = fs::read_to_string(path).map_err(|source| {
        CliError::Compute(QuantError::io_system(
            "IO.ANALYSIS_READ",
            format!("failed to read analysis file '{}': {source}", path.display()),
        ))
    })?;
    serde_json::from_str(&source).map_err(|source| {
        CliError::Compute(QuantError::invalid_input(
            "INPUT.ANALYSIS_PARSE",
            format!(
                "failed to parse analysis file '{}': {source}",
                path.display()
            ),
        ))
    })
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, CliError> {
    match path {
        Some(path) => load_engine_config(path).map_err(|source| {
            CliError::Compute(QuantError::io_system("IO.CONFIG", source.to_string()))
        }),
        None => Ok(EngineConfig::default()),
    }
}

fn write_report(path: &Path, report: &QuantReport) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| {
                CliError::Compute(QuantError::io_system(
                    "IO.REPORT_DIR",
                    format!(
                        "failed to create report directory '{}': {source}",
                        parent.display()
                    ),
                ))
            })?;
        }
    }
    let rendered = serde_json::to_string_pretty(report)
        .map_err(|source| CliError::Internal(source.into()))?;
    fs::write(path, rendered).map_err(|source| {
        CliError::Compute(QuantError::io_system(
            "IO.REPORT_WRITE",
            format!("failed to write report '{}': {source}", path.display()),
        ))
    })
}

fn render_human_summary(report: &QuantReport) -> String {
    let mut out = String::new();
    if report.converged {
        out.push_str(&format!(
            "Quantification converged after {} iterations.\n",
            report.iterations
        ));
    } else {
        out.push_str(&format!(
            "Quantification hit the iteration cap at {} iterations; results are best effort.\n",
            report.iterations
        ));
    }
    out.push_str(&format!(
        "chi-squared per channel: {:.4}\n",
        report.chi_squared_per_channel
    ));
    out.push_str(&format!(
        "calibration offset {:+.2} eV, slope correction {:+.5} eV/channel\n",
        report.calibration_offset, report.calibration_tilt
    ));
    out.push_str(&format!(
        "detector resolution {:.1} eV FWHM, Fano factor {:.4}\n",
        report.resolution_fwhm, report.fano
    ));
    out.push_str("Mass fractions:\n");
    for (element, fraction) in report.composition.iter() {
        out.push_str(&format!("  {:3} {:.6}\n", element.symbol(), fraction));
    }
    out.push_str("Components:\n");
    for component in &report.components {
        out.push_str(&format!(
            "  {:12} {:14.6} +/- {:.6}{}\n",
            component.description,
            component.coefficient,
            component.sigma,
            if component.enabled { "" } else { "  (disabled)" }
        ));
    }
    out.trim_end().to_string()
}
