//! End-to-end check that sink delivery order equals submission order even
//! when per-beam compute time varies wildly between workers.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use momentscore::beam::{Beam, BeamMeta, Pulse};
use momentscore::clutter::FilterStrategy;
use momentscore::config::{PrtMode, XmitRcvMode};
use momentscore::moments::CalibSnapshot;
use momentscore::prelude::{BeamSink, KdpEstimator, KdpInputs, KdpOutputs, ScanEvent};
use momentscore::{EngineConfig, MomentsEngine};

const N_SAMPLES: usize = 16;
const N_GATES: usize = 8;

/// KDP stand-in that sleeps a beam-dependent amount, so workers finish
/// out of submission order.
struct JitterKdp;

impl KdpEstimator for JitterKdp {
    fn compute(&self, inputs: KdpInputs) -> KdpOutputs {
        let mut rng = StdRng::seed_from_u64(inputs.azimuth_deg as u64);
        thread::sleep(Duration::from_millis(rng.gen_range(0..8)));
        KdpOutputs::default()
    }
}

struct OrderSink {
    seen: Arc<Mutex<Vec<f64>>>,
    events: Arc<Mutex<Vec<ScanEvent>>>,
}

impl BeamSink for OrderSink {
    fn write_beam(&mut self, beam: &Beam) {
        self.seen.lock().unwrap().push(beam.meta.azimuth_deg);
    }
    fn write_event(&mut self, event: ScanEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn load_beam(beam: &mut Beam, azimuth: f64) {
    let calib = CalibSnapshot {
        noise_dbm_hc: -77.0,
        base_dbz_1km_hc: -46.0,
        ..CalibSnapshot::default()
    };
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
        calib,
    );
    beam.prt = 0.001;
    let mut rng = StdRng::seed_from_u64(azimuth as u64);
    let pulses: Vec<Pulse> = (0..N_SAMPLES)
        .map(|pp| Pulse {
            time_secs: pp as f64 * 0.001,
            chan_iq: vec![(0..N_GATES)
                .map(|_| Complex64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5) * 1.0e-3)
                .collect()],
        })
        .collect();
    beam.load_pulses(&pulses).unwrap();
}

#[test]
fn delivery_order_survives_compute_jitter() {
    let mut config = EngineConfig::default();
    config.n_threads = 4;
    config.clutter.strategy = FilterStrategy::None;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = OrderSink {
        seen: seen.clone(),
        events: events.clone(),
    };
    let mut engine = MomentsEngine::new(&config, Box::new(sink), Some(Arc::new(JitterKdp))).unwrap();

    let n_beams = 40;
    engine.post_event(ScanEvent::StartOfSweep(0));
    for ii in 0..n_beams {
        let mut beam = engine.checkout_beam();
        load_beam(&mut beam, ii as f64);
        engine.process_beam(beam).unwrap();
    }
    engine.post_event(ScanEvent::EndOfSweep(0));
    engine.shutdown().unwrap();

    let seen = seen.lock().unwrap();
    let expected: Vec<f64> = (0..n_beams).map(|ii| ii as f64).collect();
    assert_eq!(*seen, expected);

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![ScanEvent::StartOfSweep(0), ScanEvent::EndOfSweep(0)]
    );
}
