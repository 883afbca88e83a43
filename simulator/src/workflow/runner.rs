use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use log::info;
use momentscore::beam::{Beam, BeamMeta};
use momentscore::config::PrtMode;
use momentscore::moments::CalibSnapshot;
use momentscore::prelude::{is_valid, BeamSink, ScanEvent};
use momentscore::MomentsEngine;
use serde::Serialize;

use crate::generator::dwell::DwellGenerator;
use crate::workflow::config::WorkflowConfig;

const WAVELENGTH_M: f64 = 0.10;
const NOISE_DBM: f64 = -77.0;
const ANTENNA_RATE_DPS: f64 = 10.0;

/// Aggregate results of a simulated scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub beams: usize,
    pub events: usize,
    pub flagged_gates: usize,
    pub censored_gates: usize,
    dbz_sum: f64,
    dbz_count: usize,
    vel_sum: f64,
    vel_count: usize,
}

impl RunStats {
    pub fn mean_dbz(&self) -> f64 {
        if self.dbz_count > 0 {
            self.dbz_sum / self.dbz_count as f64
        } else {
            f64::NAN
        }
    }

    pub fn mean_vel(&self) -> f64 {
        if self.vel_count > 0 {
            self.vel_sum / self.vel_count as f64
        } else {
            f64::NAN
        }
    }
}

struct SummarySink {
    stats: Arc<Mutex<RunStats>>,
}

impl BeamSink for SummarySink {
    fn write_beam(&mut self, beam: &Beam) {
        let mut stats = match self.stats.lock() {
            Ok(stats) => stats,
            Err(_) => return,
        };
        stats.beams += 1;
        for fields in &beam.fields {
            if fields.cmd_flag {
                stats.flagged_gates += 1;
            }
            if fields.censoring_flag {
                stats.censored_gates += 1;
            }
            if is_valid(fields.dbz) {
                stats.dbz_sum += fields.dbz;
                stats.dbz_count += 1;
            }
            if is_valid(fields.vel) {
                stats.vel_sum += fields.vel;
                stats.vel_count += 1;
            }
        }
    }

    fn write_event(&mut self, event: ScanEvent) {
        info!("scan event: {:?}", event);
        if let Ok(mut stats) = self.stats.lock() {
            stats.events += 1;
        }
    }
}

pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    /// Generate one sweep of synthetic dwells, run them through the
    /// engine and collect the delivered output.
    pub fn execute(&self) -> anyhow::Result<RunStats> {
        let config = &self.config;
        if config.engine.prt_mode != PrtMode::Fixed {
            bail!("the simulator generates fixed-PRT dwells only");
        }

        let stats = Arc::new(Mutex::new(RunStats::default()));
        let sink = SummarySink {
            stats: stats.clone(),
        };
        let mut engine = MomentsEngine::new(&config.engine, Box::new(sink), None)
            .context("starting moments engine")?;
        let mut generator = DwellGenerator::new(config, WAVELENGTH_M, NOISE_DBM);
        let calib = calib_snapshot();

        engine.post_event(ScanEvent::StartOfVolume(0));
        engine.post_event(ScanEvent::StartOfSweep(0));
        for beam_num in 0..config.n_beams {
            let mut beam = engine.checkout_beam();
            let meta = BeamMeta {
                time_secs: beam_num as i64,
                azimuth_deg: beam_num as f64 * (ANTENNA_RATE_DPS * 0.1),
                antenna_rate_dps: ANTENNA_RATE_DPS,
                sweep_num: 0,
                ..BeamMeta::default()
            };
            beam.reinit(
                meta,
                config.engine.xmit_rcv_mode,
                config.engine.prt_mode,
                config.n_samples,
                config.n_gates,
                config.start_range_km,
                config.gate_spacing_km,
                calib.clone(),
            );
            beam.prt = config.prt_secs;
            beam.prt_short = config.prt_secs;
            beam.prt_long = config.prt_secs;

            let pulses = generator.dwell(config.engine.xmit_rcv_mode, config.n_gates);
            beam.load_pulses(&pulses)
                .with_context(|| format!("loading beam {}", beam_num))?;
            engine
                .process_beam(beam)
                .with_context(|| format!("submitting beam {}", beam_num))?;
        }
        engine.post_event(ScanEvent::EndOfSweep(0));
        engine.post_event(ScanEvent::EndOfVolume(0));
        engine.shutdown().context("draining engine")?;

        let stats = match stats.lock() {
            Ok(stats) => stats.clone(),
            Err(_) => bail!("sink stats poisoned"),
        };
        info!(
            "run complete: {} beams, {} flagged gates, mean dbz {:.1}",
            stats.beams,
            stats.flagged_gates,
            stats.mean_dbz()
        );
        Ok(stats)
    }
}

fn calib_snapshot() -> CalibSnapshot {
    CalibSnapshot {
        wavelength_m: WAVELENGTH_M,
        noise_dbm_hc: NOISE_DBM,
        noise_dbm_vc: NOISE_DBM,
        noise_dbm_hx: NOISE_DBM,
        noise_dbm_vx: NOISE_DBM,
        base_dbz_1km_hc: -46.0,
        base_dbz_1km_vc: -46.0,
        base_dbz_1km_hx: -46.0,
        base_dbz_1km_vx: -46.0,
        ..CalibSnapshot::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_flags_the_clutter_patch() {
        let mut config = WorkflowConfig::from_args(4, 48, 64);
        config.engine.n_threads = 2;
        config.scenario.clutter_gate_start = 10;
        config.scenario.clutter_gate_count = 8;
        config.scenario.clutter_csr_db = 30.0;

        let stats = Runner::new(config).execute().unwrap();
        assert_eq!(stats.beams, 4);
        assert_eq!(stats.events, 4);
        assert!(stats.flagged_gates > 0);
        // weather fills the scene, so reflectivity is well formed
        assert!(stats.mean_dbz().is_finite());
        // clutter gates pull the beam-mean velocity below the 8 m/s weather
        let vel = stats.mean_vel();
        assert!(vel > 5.0 && vel < 9.0, "vel {}", vel);
    }

    #[test]
    fn runner_rejects_staggered_config() {
        let mut config = WorkflowConfig::from_args(1, 8, 32);
        config.engine.prt_mode = PrtMode::Staggered {
            stag_m: 2,
            stag_n: 3,
        };
        assert!(Runner::new(config).execute().is_err());
    }
}
