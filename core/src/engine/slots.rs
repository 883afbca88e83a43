//! Compute slots: one worker thread per slot, fed through bounded
//! channels of depth one.
//!
//! A slot holds at most one beam in flight. The engine inserts beams
//! round-robin and retrieves them in the same order, so delivery order is
//! the submission order no matter which worker finishes first.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::error;

use crate::beam::{Beam, BeamOrchestrator, SlotKernels};
use crate::prelude::{EngineError, EngineResult};
use crate::telemetry::MetricsRecorder;

pub(crate) struct ComputeSlot {
    job_tx: Option<Sender<Box<Beam>>>,
    done_rx: Receiver<Box<Beam>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ComputeSlot {
    pub fn spawn(
        id: usize,
        orchestrator: Arc<BeamOrchestrator>,
        metrics: Arc<MetricsRecorder>,
    ) -> EngineResult<Self> {
        let (job_tx, job_rx) = bounded::<Box<Beam>>(1);
        let (done_tx, done_rx) = bounded::<Box<Beam>>(1);

        let handle = thread::Builder::new()
            .name(format!("moments-slot-{}", id))
            .spawn(move || {
                // kernels are per-thread; they rebuild only when the
                // dwell geometry changes
                let mut kernels = SlotKernels::new();
                for mut beam in job_rx.iter() {
                    match orchestrator.process(&mut beam, &mut kernels) {
                        Ok(()) => metrics.record_beam(),
                        Err(err) => {
                            error!("beam compute failed: {}", err);
                            metrics.record_error();
                        }
                    }
                    if done_tx.send(beam).is_err() {
                        break;
                    }
                }
            })
            .map_err(|err| EngineError::Internal(format!("spawning slot {}: {}", id, err)))?;

        Ok(Self {
            job_tx: Some(job_tx),
            done_rx,
            handle: Some(handle),
        })
    }

    /// Hand a beam to the worker. Blocks only if the slot already holds a
    /// beam, which the engine's accounting prevents.
    pub fn submit(&self, beam: Box<Beam>) -> EngineResult<()> {
        match &self.job_tx {
            Some(tx) => tx.send(beam).map_err(|_| EngineError::ShutDown),
            None => Err(EngineError::ShutDown),
        }
    }

    /// Wait for the worker to finish its beam.
    pub fn retrieve(&self) -> EngineResult<Box<Beam>> {
        self.done_rx.recv().map_err(|_| EngineError::ShutDown)
    }

    /// Close the job channel and join the worker.
    pub fn shutdown(&mut self) {
        self.job_tx = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("compute slot worker panicked");
            }
        }
    }
}

impl Drop for ComputeSlot {
    fn drop(&mut self) {
        self.shutdown();
    }
}
