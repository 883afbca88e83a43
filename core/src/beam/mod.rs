//! Beam assembly and the per-beam compute pipeline.

pub mod beam;
pub mod orchestrator;

pub use beam::{Beam, BeamMeta, Georeference, Pulse, ScanMode};
pub use orchestrator::{BeamOrchestrator, SlotKernels};
