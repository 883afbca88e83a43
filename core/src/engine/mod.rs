//! Thread-pool harness around the per-beam pipeline.

#[allow(clippy::module_inception)]
pub mod engine;
pub mod pool;
pub(crate) mod slots;

pub use engine::MomentsEngine;
pub use pool::BeamPool;
