//! Engine counters, shared across the compute slots.

pub mod metrics;

pub use metrics::{MetricsRecorder, MetricsSnapshot};
