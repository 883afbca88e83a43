//! The moments engine: round-robin dispatch over compute slots with
//! strictly ordered delivery.
//!
//! Beams are inserted into slots in rotation. Before a slot is reused its
//! previous beam is retrieved and written to the sink, so the sink sees
//! beams in exactly the submission order regardless of per-beam compute
//! time. Scan events are tagged with their position in the beam stream and
//! delivered at the same position on the way out.

use std::collections::VecDeque;
use std::sync::Arc;

use log::info;

use crate::beam::{Beam, BeamOrchestrator};
use crate::config::EngineConfig;
use crate::prelude::{BeamSink, EngineResult, KdpEstimator, ScanEvent};
use crate::telemetry::{MetricsRecorder, MetricsSnapshot};

use super::pool::BeamPool;
use super::slots::ComputeSlot;

pub struct MomentsEngine {
    slots: Vec<ComputeSlot>,
    pool: Arc<BeamPool>,
    metrics: Arc<MetricsRecorder>,
    sink: Box<dyn BeamSink>,

    /// Beams handed to slots so far.
    insert_count: u64,
    /// Beams retrieved and written to the sink so far.
    retrieve_count: u64,
    /// Events waiting for the beam stream to reach their position.
    pending_events: VecDeque<(u64, ScanEvent)>,
}

impl MomentsEngine {
    pub fn new(
        config: &EngineConfig,
        sink: Box<dyn BeamSink>,
        kdp_estimator: Option<Arc<dyn KdpEstimator>>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let orchestrator = Arc::new(BeamOrchestrator::new(config, kdp_estimator));
        let metrics = Arc::new(MetricsRecorder::new());

        let mut slots = Vec::with_capacity(config.n_threads);
        for id in 0..config.n_threads {
            slots.push(ComputeSlot::spawn(id, orchestrator.clone(), metrics.clone())?);
        }
        info!("moments engine started with {} compute slots", slots.len());

        Ok(Self {
            slots,
            pool: Arc::new(BeamPool::new()),
            metrics,
            sink,
            insert_count: 0,
            retrieve_count: 0,
            pending_events: VecDeque::new(),
        })
    }

    /// Take a recycled beam to fill with pulses for the next dwell.
    pub fn checkout_beam(&self) -> Box<Beam> {
        self.pool.checkout()
    }

    /// Queue a loaded beam for compute. Blocks when all slots are busy,
    /// which bounds the number of beams in flight to the thread count.
    pub fn process_beam(&mut self, beam: Box<Beam>) -> EngineResult<()> {
        if self.insert_count - self.retrieve_count >= self.slots.len() as u64 {
            self.retrieve_one()?;
        }
        let slot = (self.insert_count % self.slots.len() as u64) as usize;
        self.slots[slot].submit(beam)?;
        self.insert_count += 1;
        Ok(())
    }

    /// Record a scan event at the current position in the beam stream; it
    /// reaches the sink after every beam inserted before it and before
    /// every beam inserted after it.
    pub fn post_event(&mut self, event: ScanEvent) {
        if self.retrieve_count == self.insert_count {
            self.deliver_event(event);
        } else {
            self.pending_events.push_back((self.insert_count, event));
        }
    }

    /// Drain all in-flight beams to the sink.
    pub fn flush(&mut self) -> EngineResult<()> {
        while self.retrieve_count < self.insert_count {
            self.retrieve_one()?;
        }
        while let Some((_, event)) = self.pending_events.pop_front() {
            self.deliver_event(event);
        }
        Ok(())
    }

    /// Drain, then stop the workers. The engine is unusable afterwards.
    pub fn shutdown(&mut self) -> EngineResult<()> {
        self.flush()?;
        for slot in self.slots.iter_mut() {
            slot.shutdown();
        }
        let snap = self.metrics.snapshot();
        info!(
            "moments engine stopped: {} beams, {} errors, {} events",
            snap.beams, snap.errors, snap.events
        );
        Ok(())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn retrieve_one(&mut self) -> EngineResult<()> {
        // events posted before this beam go out first
        while matches!(self.pending_events.front(), Some((pos, _)) if *pos <= self.retrieve_count)
        {
            if let Some((_, event)) = self.pending_events.pop_front() {
                self.deliver_event(event);
            }
        }
        let slot = (self.retrieve_count % self.slots.len() as u64) as usize;
        let beam = self.slots[slot].retrieve()?;
        self.sink.write_beam(&beam);
        self.pool.release(beam);
        self.retrieve_count += 1;
        Ok(())
    }

    fn deliver_event(&mut self, event: ScanEvent) {
        self.sink.write_event(event);
        self.metrics.record_event();
    }
}

impl Drop for MomentsEngine {
    fn drop(&mut self) {
        // best effort; explicit shutdown reports errors properly
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beam::{BeamMeta, Pulse};
    use crate::clutter::FilterStrategy;
    use crate::config::{PrtMode, XmitRcvMode};
    use crate::moments::CalibSnapshot;
    use num_complex::Complex64;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Mutex;

    const N_SAMPLES: usize = 16;
    const N_GATES: usize = 8;

    #[derive(Debug, Clone, PartialEq)]
    enum SinkItem {
        Beam(f64),
        Event(ScanEvent),
    }

    struct RecordingSink {
        items: Arc<Mutex<Vec<SinkItem>>>,
    }

    impl BeamSink for RecordingSink {
        fn write_beam(&mut self, beam: &Beam) {
            self.items
                .lock()
                .unwrap()
                .push(SinkItem::Beam(beam.meta.azimuth_deg));
        }
        fn write_event(&mut self, event: ScanEvent) {
            self.items.lock().unwrap().push(SinkItem::Event(event));
        }
    }

    fn calib() -> CalibSnapshot {
        CalibSnapshot {
            noise_dbm_hc: -77.0,
            base_dbz_1km_hc: -46.0,
            ..CalibSnapshot::default()
        }
    }

    fn load_test_beam(beam: &mut Beam, azimuth: f64, seed: u64) {
        let meta = BeamMeta {
            azimuth_deg: azimuth,
            ..BeamMeta::default()
        };
        beam.reinit(
            meta,
            XmitRcvMode::SinglePol,
            PrtMode::Fixed,
            N_SAMPLES,
            N_GATES,
            0.15,
            0.25,
            calib(),
        );
        beam.prt = 0.001;
        let mut rng = StdRng::seed_from_u64(seed);
        let pulses: Vec<Pulse> = (0..N_SAMPLES)
            .map(|pp| Pulse {
                time_secs: pp as f64 * 0.001,
                chan_iq: vec![(0..N_GATES)
                    .map(|_| {
                        Complex64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5) * 1.0e-3
                    })
                    .collect()],
            })
            .collect();
        beam.load_pulses(&pulses).unwrap();
    }

    fn engine_with_sink(n_threads: usize) -> (MomentsEngine, Arc<Mutex<Vec<SinkItem>>>) {
        let mut config = EngineConfig::default();
        config.n_threads = n_threads;
        config.clutter.strategy = FilterStrategy::None;
        let items = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            items: items.clone(),
        };
        let engine = MomentsEngine::new(&config, Box::new(sink), None).unwrap();
        (engine, items)
    }

    #[test]
    fn beams_arrive_in_submission_order() {
        let (mut engine, items) = engine_with_sink(3);
        let n_beams = 24;
        for ii in 0..n_beams {
            let mut beam = engine.checkout_beam();
            load_test_beam(&mut beam, ii as f64, ii as u64);
            engine.process_beam(beam).unwrap();
        }
        engine.shutdown().unwrap();

        let items = items.lock().unwrap();
        let azimuths: Vec<f64> = items
            .iter()
            .filter_map(|item| match item {
                SinkItem::Beam(az) => Some(*az),
                _ => None,
            })
            .collect();
        let expected: Vec<f64> = (0..n_beams).map(|ii| ii as f64).collect();
        assert_eq!(azimuths, expected);
        assert_eq!(engine.metrics().beams, n_beams);
    }

    #[test]
    fn events_interleave_at_their_posted_position() {
        let (mut engine, items) = engine_with_sink(2);
        engine.post_event(ScanEvent::StartOfVolume(1));
        for ii in 0..4 {
            let mut beam = engine.checkout_beam();
            load_test_beam(&mut beam, ii as f64, ii as u64);
            engine.process_beam(beam).unwrap();
            if ii == 1 {
                engine.post_event(ScanEvent::EndOfSweep(0));
            }
        }
        engine.post_event(ScanEvent::EndOfVolume(1));
        engine.shutdown().unwrap();

        let items = items.lock().unwrap().clone();
        assert_eq!(
            items,
            vec![
                SinkItem::Event(ScanEvent::StartOfVolume(1)),
                SinkItem::Beam(0.0),
                SinkItem::Beam(1.0),
                SinkItem::Event(ScanEvent::EndOfSweep(0)),
                SinkItem::Beam(2.0),
                SinkItem::Beam(3.0),
                SinkItem::Event(ScanEvent::EndOfVolume(1)),
            ]
        );
    }

    #[test]
    fn pool_reuses_beams_after_delivery() {
        let (mut engine, _items) = engine_with_sink(2);
        for ii in 0..10 {
            let mut beam = engine.checkout_beam();
            load_test_beam(&mut beam, ii as f64, ii as u64);
            engine.process_beam(beam).unwrap();
        }
        engine.shutdown().unwrap();
        // at most n_threads + 1 beams ever existed at once
        let (free, outstanding, allocated) = engine.pool.stats();
        assert_eq!(outstanding, 0);
        assert_eq!(free, allocated);
        assert!(allocated <= 3, "allocated {}", allocated);
    }

    #[test]
    fn rejects_zero_thread_config() {
        let mut config = EngineConfig::default();
        config.n_threads = 0;
        let items: Arc<Mutex<Vec<SinkItem>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink { items };
        assert!(MomentsEngine::new(&config, Box::new(sink), None).is_err());
    }
}
