//! Common types shared across the engine: error taxonomy, result alias,
//! and the traits that bound the engine at its seams.

use crate::beam::Beam;

/// Sentinel for a value that could not be computed.
///
/// Numeric edge cases (zero denominators, insufficient samples) degrade to
/// this value rather than propagating NaN into output fields.
pub const MISSING: f64 = -9999.0;

/// Common error type for the moments engine.
///
/// Only configuration and calibration problems at startup are fatal;
/// per-gate numeric failures are absorbed as [`MISSING`] values and never
/// surface here.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("calibration unavailable or invalid: {0}")]
    Calibration(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("engine shut down")]
    ShutDown,
    #[error("internal failure: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Control events delivered to the sink, interleaved in beam order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEvent {
    StartOfSweep(i32),
    EndOfSweep(i32),
    StartOfVolume(i32),
    EndOfVolume(i32),
    ScanTypeChange,
}

/// Downstream consumer of computed beams.
///
/// Beams arrive in strict submission order regardless of which worker
/// finished first. Control events are interleaved in the same order as the
/// beams that triggered them.
pub trait BeamSink: Send {
    fn write_beam(&mut self, beam: &Beam);
    fn write_event(&mut self, event: ScanEvent);
}

/// Range-indexed inputs handed to an external KDP estimator.
pub struct KdpInputs<'a> {
    pub elevation_deg: f64,
    pub azimuth_deg: f64,
    pub wavelength_m: f64,
    pub start_range_km: f64,
    pub gate_spacing_km: f64,
    pub snr: &'a [f64],
    pub dbz: &'a [f64],
    pub zdr: &'a [f64],
    pub rhohv: &'a [f64],
    pub phidp: &'a [f64],
    pub missing: f64,
}

/// Range-indexed outputs from an external KDP estimator.
#[derive(Debug, Clone, Default)]
pub struct KdpOutputs {
    pub kdp: Vec<f64>,
    pub dbz_atten_corrected: Vec<f64>,
    pub zdr_atten_corrected: Vec<f64>,
    pub phidp_conditioned: Vec<f64>,
    pub phidp_smoothed: Vec<f64>,
    pub phidp_sdev: Vec<f64>,
}

/// External phase-unwrap/KDP library boundary.
///
/// The engine does not estimate KDP itself; when an estimator is injected
/// the orchestrator calls it once per beam per field set.
pub trait KdpEstimator: Send + Sync {
    fn compute(&self, inputs: KdpInputs) -> KdpOutputs;
}

/// Output selection per field set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FieldSelection {
    Unfiltered,
    Filtered,
    Both,
}

pub(crate) fn constrain(val: f64, min_val: f64, max_val: f64) -> f64 {
    if val < min_val {
        min_val
    } else if val > max_val {
        max_val
    } else {
        val
    }
}

/// True when a field value is usable (not the missing sentinel).
pub fn is_valid(val: f64) -> bool {
    val != MISSING
}
