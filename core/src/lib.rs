//! Real-time radar moments engine.
//!
//! Takes dwells of pulse I/Q data and produces calibrated per-gate
//! moments (reflectivity, velocity, width, the dual-pol set) for every
//! transmit/receive polarization mode and PRT strategy, with clutter
//! identification and filtering in the signal path. Compute is spread
//! over a pool of worker threads while output order is kept strictly
//! equal to input order.

pub mod beam;
pub mod clutter;
pub mod config;
pub mod engine;
pub mod math;
pub mod moments;
pub mod prelude;
pub mod telemetry;

pub use beam::{Beam, BeamMeta, Pulse};
pub use config::EngineConfig;
pub use engine::MomentsEngine;
pub use prelude::{BeamSink, EngineError, EngineResult, ScanEvent, MISSING};
