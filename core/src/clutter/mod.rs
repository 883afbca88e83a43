//! Clutter suppression: the spectral/regression filter bank and the
//! fuzzy classifier (CMD) that decides where to apply it.

pub mod bank;
pub mod cmd;
pub mod regression;
pub mod spectra;

pub use bank::{ClutterFilterBank, FilterOutput};
pub use cmd::{nexrad_spike_filter, CmdClassifier, InterestMap};
pub use regression::RegressionFilter;

use serde::{Deserialize, Serialize};

/// Which clutter filter the bank applies at flagged gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterStrategy {
    /// No filtering; the bank is bypassed entirely.
    None,
    /// Fixed-width spectral notch around DC.
    Notch,
    /// Adaptive spectral notch with interpolation across the clutter.
    Adaptive,
    /// Forsythe polynomial regression in the time domain.
    Regression,
}
