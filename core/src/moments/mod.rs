//! Covariance and moment estimation.
//!
//! `MomentEstimator` holds the per-dwell context (calibration, window
//! correlations, range corrections) and the per-mode routines in `modes`
//! fill a `MomentsFields` for each gate.

pub mod calib;
pub mod cpa;
pub mod estimator;
pub mod fields;
pub mod gate_data;
mod modes;
pub mod stag;
pub mod width;

pub use calib::CalibSnapshot;
pub use estimator::MomentEstimator;
pub use fields::{FieldId, MomentsFields};
pub use gate_data::GateData;
pub use stag::{StagCovars, StagPrt};
pub use width::WidthMethod;
