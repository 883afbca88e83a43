//! Per-beam processing pipeline.
//!
//! Runs on a compute-slot worker thread: windowing, per-mode moment
//! estimation, median smoothing, the clutter classifier and filter bank,
//! platform-motion correction, the external KDP hook, censoring and
//! copy-out. Every stage degrades to MISSING on insufficient data rather
//! than failing the beam.

use std::sync::Arc;

use log::{debug, warn};
use num_complex::Complex64;

use crate::clutter::{ClutterFilterBank, CmdClassifier, FilterOutput, FilterStrategy};
use crate::clutter::{nexrad_spike_filter, RegressionFilter};
use crate::config::{CensorMode, EngineConfig, PrtMode, XmitRcvMode};
use crate::math::fft::GateFft;
use crate::math::stats::median_filter;
use crate::math::window::{apply_window, WindowType};
use crate::moments::cpa::{compute_cpa, compute_cpa_alt, compute_cpa_alt_dual, compute_cpa_dual};
use crate::moments::gate_data::GateData;
use crate::moments::stag::expanded_len;
use crate::moments::{FieldId, MomentEstimator, MomentsFields};
use crate::prelude::{is_valid, EngineResult, KdpEstimator, KdpInputs, MISSING};

use super::beam::Beam;

/// Spike threshold for the NEXRAD censor, dB.
const SPIKE_TCN_DB: f64 = 9.0;

/// Uncensored runs shorter than this are re-examined against their
/// neighborhood during censoring.
const MIN_VALID_RUN: usize = 5;

/// Dwell-sized kernels owned by one compute slot. Rebuilt only when the
/// dwell geometry changes, so steady-state beams plan no FFTs and build
/// no polynomial bases.
pub struct SlotKernels {
    key: Option<(usize, WindowType, PrtMode)>,
    kernels: Option<Kernels>,
}

pub struct Kernels {
    pub window: Vec<f64>,
    pub window_half: Vec<f64>,
    /// Dedicated von Hann window for the off-zero SNR check, independent
    /// of the configured moments window.
    pub window_vonhann: Vec<f64>,
    pub window_vonhann_half: Vec<f64>,
    pub fft: GateFft,
    pub fft_half: GateFft,
    pub fft_expanded: Option<GateFft>,
    pub regr: RegressionFilter,
    pub regr_half: RegressionFilter,
    pub regr_stag: Option<RegressionFilter>,
}

impl SlotKernels {
    pub fn new() -> Self {
        Self {
            key: None,
            kernels: None,
        }
    }

    pub fn prepare(
        &mut self,
        window_type: WindowType,
        n_samples: usize,
        prt_mode: PrtMode,
    ) -> &mut Kernels {
        let key = (n_samples, window_type, prt_mode);
        if self.key != Some(key) {
            self.kernels = None;
            self.key = Some(key);
        }
        self.kernels.get_or_insert_with(|| {
            debug!("building slot kernels for dwell of {} samples", n_samples);
            Kernels::build(window_type, n_samples, prt_mode)
        })
    }
}

impl Kernels {
    fn build(window_type: WindowType, n_samples: usize, prt_mode: PrtMode) -> Self {
        let half = (n_samples / 2).max(1);
        let max_order = n_samples.saturating_sub(2).min(32);
        let (fft_expanded, regr_stag) = match prt_mode {
            PrtMode::Fixed => (None, None),
            PrtMode::Staggered { stag_m, stag_n } => (
                Some(GateFft::new(expanded_len(n_samples, stag_m, stag_n))),
                Some(RegressionFilter::new_staggered(
                    n_samples, stag_m, stag_n, max_order,
                )),
            ),
        };
        Self {
            window: window_type.coefficients(n_samples),
            window_half: window_type.coefficients(half),
            window_vonhann: WindowType::VonHann.coefficients(n_samples),
            window_vonhann_half: WindowType::VonHann.coefficients(half),
            fft: GateFft::new(n_samples),
            fft_half: GateFft::new(half),
            fft_expanded,
            regr: RegressionFilter::new(n_samples, max_order),
            regr_half: RegressionFilter::new(half, max_order.min(half.saturating_sub(2))),
            regr_stag,
        }
    }
}

impl Default for SlotKernels {
    fn default() -> Self {
        Self::new()
    }
}

/// Stateless per-beam pipeline; one instance shared by all slots.
pub struct BeamOrchestrator {
    config: EngineConfig,
    classifier: CmdClassifier,
    kdp_estimator: Option<Arc<dyn KdpEstimator>>,
}

impl BeamOrchestrator {
    pub fn new(config: &EngineConfig, kdp_estimator: Option<Arc<dyn KdpEstimator>>) -> Self {
        Self {
            config: config.clone(),
            classifier: CmdClassifier::new(&config.cmd),
            kdp_estimator,
        }
    }

    /// Run the full pipeline over one loaded beam.
    pub fn process(&self, beam: &mut Beam, slot: &mut SlotKernels) -> EngineResult<()> {
        if beam.n_gates == 0 || beam.n_samples < 8 {
            warn!(
                "beam too small to process: {} gates, {} samples",
                beam.n_gates, beam.n_samples
            );
            beam.copy_out(self.config.field_selection);
            return Ok(());
        }

        let kernels = slot.prepare(self.config.window, beam.n_samples, beam.prt_mode);
        let est = self.build_estimator(beam, &kernels.window)?;

        self.compute_moments_pass(beam, &est, kernels);
        self.apply_median_filters(beam);
        if matches!(beam.prt_mode, PrtMode::Staggered { .. }) {
            self.reconcile_staggered_velocity(beam, &est);
        }

        if self.config.clutter.strategy != FilterStrategy::None {
            self.clutter_stage(beam, &est, kernels);
        } else {
            for gate in beam.gates.iter_mut().take(beam.n_gates) {
                gate.seed_filtered_fields();
            }
        }

        if self.config.correct_for_platform_motion {
            self.correct_for_platform_motion(beam, &est);
        }
        if let Some(kdp) = &self.kdp_estimator {
            self.run_kdp(beam, kdp.as_ref());
        }
        self.apply_censoring(beam);
        beam.copy_out(self.config.field_selection);
        Ok(())
    }

    fn build_estimator(&self, beam: &Beam, window: &[f64]) -> EngineResult<MomentEstimator> {
        match beam.mode {
            XmitRcvMode::SinglePol => beam.calib.validate_h_only()?,
            XmitRcvMode::SinglePolV => beam.calib.validate_v_only()?,
            _ => beam.calib.validate_dual()?,
        }

        let mut est = match beam.prt_mode {
            PrtMode::Fixed => MomentEstimator::new(
                &self.config,
                &beam.calib,
                beam.prt,
                beam.n_samples,
                beam.n_gates,
                beam.start_range_km,
                beam.gate_spacing_km,
            ),
            PrtMode::Staggered { stag_m, stag_n } => MomentEstimator::new_staggered(
                &self.config,
                &beam.calib,
                beam.prt_short,
                beam.prt_long,
                stag_m,
                stag_n,
                beam.n_samples,
                beam.n_gates_prt_short,
                beam.n_gates,
                beam.start_range_km,
                beam.gate_spacing_km,
            ),
        };
        est.set_window(window);
        est.load_atmos_atten(beam.meta.elevation_deg);
        est.set_measured_xmit_power(
            beam.measured_xmit_power_dbm_h,
            beam.measured_xmit_power_dbm_v,
            beam.calib.xmit_power_dbm_h,
            beam.calib.xmit_power_dbm_v,
        );
        Ok(est)
    }

    /// Stage (d): window the co-polar series and compute unfiltered
    /// moments per gate; CPA always comes from the raw series.
    fn compute_moments_pass(&self, beam: &mut Beam, est: &MomentEstimator, kernels: &mut Kernels) {
        let half = beam.n_samples / 2;
        let staggered = matches!(beam.prt_mode, PrtMode::Staggered { .. });
        let mode = beam.mode;

        for gg in 0..beam.n_gates {
            let gate = &mut beam.gates[gg];

            if staggered {
                match mode {
                    XmitRcvMode::DpSimHv | XmitRcvMode::DpSimHvSwitched => est.dp_sim_hv_stag_prt(
                        &gate.iq_hc,
                        &gate.iq_vc,
                        &gate.iq_hc_short,
                        &gate.iq_hc_long,
                        &gate.iq_vc_short,
                        &gate.iq_vc_long,
                        gg,
                        false,
                        &mut gate.fields,
                    ),
                    _ => est.single_pol_stag_prt(
                        &gate.iq_hc,
                        &gate.iq_hc_short,
                        &gate.iq_hc_long,
                        gg,
                        false,
                        &mut gate.fields,
                    ),
                }
                continue;
            }

            match mode {
                XmitRcvMode::SinglePol => {
                    apply_window(&gate.iq_hc, &kernels.window, &mut gate.iq_hc_windowed);
                    est.single_pol(&gate.iq_hc_windowed, gg, false, &mut gate.fields);
                }
                XmitRcvMode::SinglePolV => {
                    apply_window(&gate.iq_vc, &kernels.window, &mut gate.iq_vc_windowed);
                    est.single_pol_v(&gate.iq_vc_windowed, gg, false, &mut gate.fields);
                }
                XmitRcvMode::DpSimHv | XmitRcvMode::DpSimHvSwitched => {
                    apply_window(&gate.iq_hc, &kernels.window, &mut gate.iq_hc_windowed);
                    apply_window(&gate.iq_vc, &kernels.window, &mut gate.iq_vc_windowed);
                    est.dp_sim_hv(
                        &gate.iq_hc_windowed,
                        &gate.iq_vc_windowed,
                        gg,
                        false,
                        &mut gate.fields,
                    );
                }
                XmitRcvMode::DpHOnly => {
                    apply_window(&gate.iq_hc, &kernels.window, &mut gate.iq_hc_windowed);
                    est.dp_h_only(&gate.iq_hc_windowed, &gate.iq_vx, gg, false, &mut gate.fields);
                }
                XmitRcvMode::DpVOnly => {
                    apply_window(&gate.iq_vc, &kernels.window, &mut gate.iq_vc_windowed);
                    est.dp_v_only(&gate.iq_vc_windowed, &gate.iq_hx, gg, false, &mut gate.fields);
                }
                XmitRcvMode::DpAltHvCoOnly => {
                    apply_window(&gate.iq_hc[..half], &kernels.window_half, &mut gate.iq_hc_windowed);
                    apply_window(&gate.iq_vc[..half], &kernels.window_half, &mut gate.iq_vc_windowed);
                    est.dp_alt_hv_co_only(
                        &gate.iq_hc_windowed,
                        &gate.iq_vc_windowed,
                        gg,
                        false,
                        &mut gate.fields,
                    );
                }
                XmitRcvMode::DpAltHvCoCross => {
                    apply_window(&gate.iq_hc[..half], &kernels.window_half, &mut gate.iq_hc_windowed);
                    apply_window(&gate.iq_vc[..half], &kernels.window_half, &mut gate.iq_vc_windowed);
                    est.dp_alt_hv_co_cross(
                        &gate.iq_hc_windowed,
                        &gate.iq_vc_windowed,
                        &gate.iq_hx[..half],
                        &gate.iq_vx[..half],
                        gg,
                        false,
                        &mut gate.fields,
                    );
                }
            }
        }

        // CPA from the unwindowed series
        let use_alt = self.config.compute_cpa_using_alt;
        for gate in beam.gates.iter_mut().take(beam.n_gates) {
            let cpa = match mode {
                XmitRcvMode::SinglePol | XmitRcvMode::DpHOnly => {
                    if use_alt {
                        compute_cpa_alt(&gate.iq_hc)
                    } else {
                        compute_cpa(&gate.iq_hc)
                    }
                }
                XmitRcvMode::SinglePolV | XmitRcvMode::DpVOnly => {
                    if use_alt {
                        compute_cpa_alt(&gate.iq_vc)
                    } else {
                        compute_cpa(&gate.iq_vc)
                    }
                }
                XmitRcvMode::DpAltHvCoOnly | XmitRcvMode::DpAltHvCoCross => {
                    let hc = &gate.iq_hc[..half];
                    let vc = &gate.iq_vc[..half];
                    if use_alt {
                        compute_cpa_alt_dual(hc, vc)
                    } else {
                        compute_cpa_dual(hc, vc)
                    }
                }
                XmitRcvMode::DpSimHv | XmitRcvMode::DpSimHvSwitched => {
                    if use_alt {
                        compute_cpa_alt_dual(&gate.iq_hc, &gate.iq_vc)
                    } else {
                        compute_cpa_dual(&gate.iq_hc, &gate.iq_vc)
                    }
                }
            };
            gate.fields.cpa = cpa;
        }
    }

    /// Stage (e): median filters suppress single-gate outliers before the
    /// classifier sees the fields.
    fn apply_median_filters(&self, beam: &mut Beam) {
        let median = &self.config.median;
        if median.apply_to_cpa {
            self.median_over_gates(beam, median.cpa_filter_len, |f| f.cpa, |f, v| f.cpa = v);
        }
        if median.apply_to_zdr {
            self.median_over_gates(beam, median.zdr_filter_len, |f| f.zdr, |f, v| f.zdr = v);
        }
        if median.apply_to_rhohv {
            self.median_over_gates(beam, median.rhohv_filter_len, |f| f.rhohv, |f, v| {
                f.rhohv = v
            });
        }
    }

    fn median_over_gates(
        &self,
        beam: &mut Beam,
        filter_len: usize,
        get: impl Fn(&MomentsFields) -> f64,
        set: impl Fn(&mut MomentsFields, f64),
    ) {
        let mut vals: Vec<f64> = beam
            .gates
            .iter()
            .take(beam.n_gates)
            .map(|g| get(&g.fields))
            .collect();
        median_filter(&mut vals, filter_len);
        for (gate, val) in beam.gates.iter_mut().zip(vals.into_iter()) {
            set(&mut gate.fields, val);
        }
    }

    /// Stage (f): median the per-PRT velocities and re-run the unfold so
    /// a single noisy short/long pair cannot flip the unfold interval.
    fn reconcile_staggered_velocity(&self, beam: &mut Beam, est: &MomentEstimator) {
        let stag = match &est.stag {
            Some(stag) => stag,
            None => return,
        };
        let filter_len = self.config.median.stag_vel_filter_len;
        if filter_len < 3 {
            return;
        }
        let mut vel_short: Vec<f64> = beam
            .gates
            .iter()
            .take(beam.n_gates)
            .map(|g| g.fields.vel_prt_short)
            .collect();
        let mut vel_long: Vec<f64> = beam
            .gates
            .iter()
            .take(beam.n_gates)
            .map(|g| g.fields.vel_prt_long)
            .collect();
        median_filter(&mut vel_short, filter_len);
        median_filter(&mut vel_long, filter_len);

        for (gg, gate) in beam.gates.iter_mut().take(beam.n_gates).enumerate() {
            if is_valid(vel_short[gg]) && is_valid(vel_long[gg]) && is_valid(gate.fields.vel) {
                let (vel, interval) = stag.dealias(vel_short[gg], vel_long[gg]);
                gate.fields.vel = vel;
                gate.fields.vel_unfold_interval = interval as f64;
            }
        }
    }

    /// Stage (g): classifier, then the filter bank at flagged gates.
    fn clutter_stage(&self, beam: &mut Beam, est: &MomentEstimator, kernels: &mut Kernels) {
        let n_gates = beam.n_gates;
        let staggered = matches!(beam.prt_mode, PrtMode::Staggered { .. });
        let alternating = matches!(
            beam.mode,
            XmitRcvMode::DpAltHvCoOnly | XmitRcvMode::DpAltHvCoCross
        );
        let v_primary = matches!(
            beam.mode,
            XmitRcvMode::DpVOnly | XmitRcvMode::SinglePolV
        );
        for gate in beam.gates.iter_mut().take(n_gates) {
            gate.seed_filtered_fields();
        }

        // off-zero SNR always works on the raw co-polar series under its
        // own von Hann window, whatever the moments window is
        if self.config.cmd.apply_off_zero_snr_check {
            let half = beam.n_samples / 2;
            let noise = if v_primary {
                est.est_noise_power_vc
            } else {
                est.est_noise_power_hc
            };
            let mut windowed = Vec::new();
            for gate in beam.gates.iter_mut().take(n_gates) {
                let raw: &[Complex64] = if v_primary {
                    &gate.iq_vc
                } else if alternating {
                    &gate.iq_hc[..half]
                } else {
                    &gate.iq_hc
                };
                let (vonhann, fft) = if alternating {
                    (&kernels.window_vonhann_half, &mut kernels.fft_half)
                } else {
                    (&kernels.window_vonhann, &mut kernels.fft)
                };
                apply_window(raw, vonhann, &mut windowed);
                gate.fields.ozsnr = est.compute_oz_snr(
                    &windowed,
                    fft,
                    self.config.cmd.off_zero_notch_width_mps,
                    noise,
                );
            }
        }

        // wind-farm contamination lifts the whole spectral noise floor;
        // measure it at strong high-CPA gates before the classifier runs
        if self.config.cmd.apply_windfarm_check && !staggered {
            let calib_noise = if v_primary {
                est.cal_noise_power_vc
            } else {
                est.cal_noise_power_hc
            };
            let min_snr = self.config.cmd.windfarm_min_snr_db;
            let min_cpa = self.config.cmd.windfarm_min_cpa;
            let n_segments = self.config.clutter.spectral_noise_segments;
            for gate in beam.gates.iter_mut().take(n_gates) {
                let snr = if v_primary {
                    gate.fields.snrvc
                } else {
                    gate.fields.snrhc
                };
                if !is_valid(snr) || snr < min_snr {
                    continue;
                }
                if !is_valid(gate.fields.cpa) || gate.fields.cpa < min_cpa {
                    continue;
                }
                let windowed: &[Complex64] = if v_primary {
                    &gate.iq_vc_windowed
                } else {
                    &gate.iq_hc_windowed
                };
                let fft = if alternating {
                    &mut kernels.fft_half
                } else {
                    &mut kernels.fft
                };
                let (spectral_noise, spectral_snr) =
                    est.compute_spectral_snr(windowed, fft, calib_noise, n_segments);
                gate.fields.spectral_noise = if spectral_noise > 0.0 {
                    10.0 * spectral_noise.log10()
                } else {
                    MISSING
                };
                gate.fields.spectral_snr = if spectral_snr > 0.0 {
                    10.0 * spectral_snr.log10()
                } else {
                    MISSING
                };
            }
        }

        // run the classifier; alternating-trip dwells split the gate set
        // so features never mix trips
        let mut fields: Vec<MomentsFields> = beam
            .gates
            .iter()
            .take(n_gates)
            .map(|g| g.fields.clone())
            .collect();
        if beam.alternating_trips {
            let mid = n_gates / 2;
            let (first, second) = fields.split_at_mut(mid);
            self.classifier.run(first);
            self.classifier.run(second);
        } else {
            self.classifier.run(&mut fields);
        }
        for (gate, f) in beam.gates.iter_mut().zip(fields.into_iter()) {
            gate.fields = f;
        }

        let bank = ClutterFilterBank::new(self.config.clutter.clone(), est.nyquist);
        let antenna_rate = beam.meta.antenna_rate_dps;
        let mode = beam.mode;
        let prt = beam.prt;

        for gg in 0..n_gates {
            let rhohv_testable = self.rhohv_test_applies(&beam.gates[gg].fields);
            if !beam.gates[gg].fields.cmd_flag && !rhohv_testable {
                continue;
            }

            // the improvement test works directly on the raw series,
            // bypassing the bank
            let mut rhohv_improved = false;
            if rhohv_testable {
                rhohv_improved = self.run_rhohv_test(beam, est, kernels, gg);
            }
            let cmd_flag = beam.gates[gg].fields.cmd_flag;
            if !cmd_flag && !rhohv_improved {
                continue;
            }

            let gate = &mut beam.gates[gg];
            let out = if staggered {
                self.filter_gate_staggered(est, gate, gg, mode, &bank, kernels, prt, antenna_rate)
            } else {
                self.filter_gate_fixed(est, gate, gg, mode, &bank, kernels, prt, antenna_rate)
            };
            self.store_filter_diagnostics(gate, &out);

            if cmd_flag && rhohv_testable && !rhohv_improved {
                // classifier said clutter but filtering did not improve
                // the correlation: discard the filtered values
                gate.fields_f = gate.fields.clone();
                gate.fields_f.rhohv_test_flag = false;
            } else if !cmd_flag && rhohv_improved {
                // classifier missed it: keep unfiltered moments but adopt
                // the filtered dual-pol fields
                let filtered = gate.fields_f.clone();
                gate.fields_f = gate.fields.clone();
                substitute_dual_pol(&mut gate.fields_f, &filtered);
                gate.fields_f.rhohv_test_flag = true;
            }
        }

        if self.config.cmd.apply_nexrad_spike_filter {
            let mut dbz: Vec<f64> = beam
                .gates
                .iter()
                .take(n_gates)
                .map(|g| g.fields_f.dbz)
                .collect();
            nexrad_spike_filter(&mut dbz, SPIKE_TCN_DB);
            for (gate, val) in beam.gates.iter_mut().zip(dbz.into_iter()) {
                gate.fields_f.dbz = val;
            }
        }
    }

    fn rhohv_test_applies(&self, fields: &MomentsFields) -> bool {
        self.config.cmd.apply_rhohv_test
            && is_valid(fields.rhohv)
            && fields.rhohv >= self.config.cmd.rhohv_test_min_rhohv
            && fields.rhohv <= self.config.cmd.rhohv_test_max_rhohv
    }

    /// Regression-filter the raw co-polar pair and compare correlation
    /// loss before and after. Writes the test fields on the gate.
    fn run_rhohv_test(
        &self,
        beam: &mut Beam,
        est: &MomentEstimator,
        kernels: &mut Kernels,
        gg: usize,
    ) -> bool {
        let half = beam.n_samples / 2;
        let alternating = matches!(
            beam.mode,
            XmitRcvMode::DpAltHvCoOnly | XmitRcvMode::DpAltHvCoCross
        );
        let dual = alternating
            || matches!(
                beam.mode,
                XmitRcvMode::DpSimHv | XmitRcvMode::DpSimHvSwitched
            );
        if !dual {
            return false;
        }

        let order = self.config.clutter.regression_order.max(5);
        let gate = &mut beam.gates[gg];
        let (hc, vc, regr): (&[Complex64], &[Complex64], &RegressionFilter) = if alternating {
            (&gate.iq_hc[..half], &gate.iq_vc[..half], &kernels.regr_half)
        } else {
            (&gate.iq_hc, &gate.iq_vc, &kernels.regr)
        };

        let rhohv_unfilt = if alternating {
            est.compute_rhohv_alt(hc, vc)
        } else {
            est.compute_rhohv_sim(hc, vc)
        };

        let mut hc_f = Vec::with_capacity(hc.len());
        let mut vc_f = Vec::with_capacity(vc.len());
        regr.apply(hc, order, &mut hc_f);
        regr.apply(vc, order, &mut vc_f);
        let rhohv_filt = if alternating {
            est.compute_rhohv_alt(&hc_f, &vc_f)
        } else {
            est.compute_rhohv_sim(&hc_f, &vc_f)
        };

        let (improvement, improved) = self.classifier.rhohv_improvement(rhohv_unfilt, rhohv_filt);
        gate.fields.rhohv_test_unfilt = rhohv_unfilt;
        gate.fields.rhohv_test_filt = rhohv_filt;
        gate.fields.rhohv_test_improv = improvement;
        gate.fields_f.rhohv_test_unfilt = rhohv_unfilt;
        gate.fields_f.rhohv_test_filt = rhohv_filt;
        gate.fields_f.rhohv_test_improv = improvement;
        improved
    }

    /// Filter the primary channel of a fixed-PRT gate, spread the ratio
    /// across the other channels and recompute the filtered moments.
    #[allow(clippy::too_many_arguments)]
    fn filter_gate_fixed(
        &self,
        est: &MomentEstimator,
        gate: &mut GateData,
        gg: usize,
        mode: XmitRcvMode,
        bank: &ClutterFilterBank,
        kernels: &mut Kernels,
        prt: f64,
        antenna_rate: f64,
    ) -> FilterOutput {
        let alternating = matches!(
            mode,
            XmitRcvMode::DpAltHvCoOnly | XmitRcvMode::DpAltHvCoCross
        );
        let half_len = est.n_samples_half;

        // primary channel: V co-polar in V-only modes, H co-polar otherwise
        let v_primary = matches!(mode, XmitRcvMode::DpVOnly | XmitRcvMode::SinglePolV);
        let calib_noise = if v_primary {
            est.cal_noise_power_vc
        } else {
            est.cal_noise_power_hc
        };

        let out = {
            let (raw, windowed): (&[Complex64], &[Complex64]) = if v_primary {
                (&gate.iq_vc, &gate.iq_vc_windowed)
            } else if alternating {
                (&gate.iq_hc[..half_len], &gate.iq_hc_windowed)
            } else {
                (&gate.iq_hc, &gate.iq_hc_windowed)
            };
            let (fft, window, regr) = if alternating {
                (&mut kernels.fft_half, &kernels.window_half, &kernels.regr_half)
            } else {
                (&mut kernels.fft, &kernels.window, &kernels.regr)
            };
            match self.config.clutter.strategy {
                FilterStrategy::Notch => bank.apply_notch_filter(windowed, calib_noise, fft),
                FilterStrategy::Regression => bank.apply_regression_filter(
                    raw,
                    window,
                    calib_noise,
                    prt,
                    antenna_rate,
                    fft,
                    regr,
                ),
                _ => bank.apply_adaptive_filter(windowed, calib_noise, fft),
            }
        };

        // secondary channels reuse the primary ratio so the filtered
        // phase relationships stay consistent
        let fft = if alternating {
            &mut kernels.fft_half
        } else {
            &mut kernels.fft
        };
        if v_primary {
            gate.iq_vc_filtered.clone_from(&out.filtered);
            gate.iq_vc_notched.clone_from(&out.notched);
            if mode == XmitRcvMode::DpVOnly {
                let (f, _) =
                    bank.apply_filter_ratio(&gate.iq_hx, &out.spec_ratio, &out.notch_bins, fft);
                gate.iq_hx_filtered = f;
            }
        } else {
            gate.iq_hc_filtered.clone_from(&out.filtered);
            gate.iq_hc_notched.clone_from(&out.notched);
            match mode {
                XmitRcvMode::DpSimHv
                | XmitRcvMode::DpSimHvSwitched
                | XmitRcvMode::DpAltHvCoOnly
                | XmitRcvMode::DpAltHvCoCross => {
                    let (f, n) = bank.apply_filter_ratio(
                        &gate.iq_vc_windowed,
                        &out.spec_ratio,
                        &out.notch_bins,
                        fft,
                    );
                    gate.iq_vc_filtered = f;
                    gate.iq_vc_notched = n;
                }
                _ => {}
            }
            match mode {
                XmitRcvMode::DpHOnly => {
                    let (f, _) =
                        bank.apply_filter_ratio(&gate.iq_vx, &out.spec_ratio, &out.notch_bins, fft);
                    gate.iq_vx_filtered = f;
                }
                XmitRcvMode::DpAltHvCoCross => {
                    let (f, _) = bank.apply_filter_ratio(
                        &gate.iq_hx[..half_len],
                        &out.spec_ratio,
                        &out.notch_bins,
                        fft,
                    );
                    gate.iq_hx_filtered = f;
                    let (f, _) = bank.apply_filter_ratio(
                        &gate.iq_vx[..half_len],
                        &out.spec_ratio,
                        &out.notch_bins,
                        fft,
                    );
                    gate.iq_vx_filtered = f;
                }
                _ => {}
            }
        }

        self.recompute_filtered_moments(est, gate, gg, mode);
        self.recompute_from_notched(est, gate, gg, mode);
        out
    }

    /// Moment recompute from the filtered buffers into `fields_f`.
    fn recompute_filtered_moments(
        &self,
        est: &MomentEstimator,
        gate: &mut GateData,
        gg: usize,
        mode: XmitRcvMode,
    ) {
        let half_len = est.n_samples_half;
        match mode {
            XmitRcvMode::SinglePol => {
                est.single_pol(&gate.iq_hc_filtered, gg, true, &mut gate.fields_f)
            }
            XmitRcvMode::SinglePolV => {
                est.single_pol_v(&gate.iq_vc_filtered, gg, true, &mut gate.fields_f)
            }
            XmitRcvMode::DpSimHv | XmitRcvMode::DpSimHvSwitched => est.dp_sim_hv(
                &gate.iq_hc_filtered,
                &gate.iq_vc_filtered,
                gg,
                true,
                &mut gate.fields_f,
            ),
            XmitRcvMode::DpHOnly => est.dp_h_only(
                &gate.iq_hc_filtered,
                &gate.iq_vx_filtered,
                gg,
                true,
                &mut gate.fields_f,
            ),
            XmitRcvMode::DpVOnly => est.dp_v_only(
                &gate.iq_vc_filtered,
                &gate.iq_hx_filtered,
                gg,
                true,
                &mut gate.fields_f,
            ),
            XmitRcvMode::DpAltHvCoOnly => {
                est.dp_alt_hv_co_only(
                    &gate.iq_hc_filtered[..half_len],
                    &gate.iq_vc_filtered[..half_len],
                    gg,
                    true,
                    &mut gate.fields_f,
                );
                self.substitute_alt_clutter_vel(est, &mut gate.fields_f);
            }
            XmitRcvMode::DpAltHvCoCross => {
                est.dp_alt_hv_co_cross(
                    &gate.iq_hc_filtered[..half_len],
                    &gate.iq_vc_filtered[..half_len],
                    &gate.iq_hx_filtered[..half_len],
                    &gate.iq_vx_filtered[..half_len],
                    gg,
                    true,
                    &mut gate.fields_f,
                );
                self.substitute_alt_clutter_vel(est, &mut gate.fields_f);
            }
        }
    }

    /// In alternating mode the filtered H/V phase reconstruction is
    /// unreliable close to the notch; the H-only velocity is cleaner
    /// there.
    fn substitute_alt_clutter_vel(&self, est: &MomentEstimator, fields: &mut MomentsFields) {
        if is_valid(fields.vel_h_only) && fields.vel_h_only.abs() < est.nyquist / 4.0 {
            fields.vel = fields.vel_h_only;
        }
    }

    /// Phase-sensitive dual-pol fields come from the narrower notched
    /// series rather than the full filtered series.
    fn recompute_from_notched(
        &self,
        est: &MomentEstimator,
        gate: &mut GateData,
        gg: usize,
        mode: XmitRcvMode,
    ) {
        let half_len = est.n_samples_half;
        let mut notched = MomentsFields::new();
        match mode {
            XmitRcvMode::DpSimHv | XmitRcvMode::DpSimHvSwitched => est.dp_sim_hv(
                &gate.iq_hc_notched,
                &gate.iq_vc_notched,
                gg,
                true,
                &mut notched,
            ),
            XmitRcvMode::DpAltHvCoOnly | XmitRcvMode::DpAltHvCoCross => est.dp_alt_hv_co_only(
                &gate.iq_hc_notched[..half_len],
                &gate.iq_vc_notched[..half_len],
                gg,
                true,
                &mut notched,
            ),
            _ => return,
        }
        substitute_dual_pol(&mut gate.fields_f, &notched);
    }

    /// Staggered-PRT filtering: the bank operates on the combined series.
    #[allow(clippy::too_many_arguments)]
    fn filter_gate_staggered(
        &self,
        est: &MomentEstimator,
        gate: &mut GateData,
        gg: usize,
        mode: XmitRcvMode,
        bank: &ClutterFilterBank,
        kernels: &mut Kernels,
        prt: f64,
        antenna_rate: f64,
    ) -> FilterOutput {
        let stag = match &est.stag {
            Some(stag) => stag,
            None => return FilterOutput::default(),
        };
        let calib_noise = est.cal_noise_power_hc;
        let regression = self.config.clutter.strategy == FilterStrategy::Regression;

        // notch and adaptive both fall back to the per-half adaptive
        // filter; only regression works on the combined series directly
        let out = if regression {
            match (kernels.fft_expanded.as_mut(), kernels.regr_stag.as_ref()) {
                (Some(fft_expanded), Some(regr_stag)) => bank.apply_regression_stag_filter(
                    &gate.iq_hc,
                    calib_noise,
                    prt,
                    antenna_rate,
                    stag,
                    fft_expanded,
                    regr_stag,
                ),
                _ => bank.apply_adaptive_stag_filter(
                    &gate.iq_hc,
                    calib_noise,
                    stag,
                    &mut kernels.fft_half,
                ),
            }
        } else {
            bank.apply_adaptive_stag_filter(&gate.iq_hc, calib_noise, stag, &mut kernels.fft_half)
        };
        gate.iq_hc_filtered.clone_from(&out.filtered);
        gate.iq_hc_notched.clone_from(&out.notched);

        let sim = matches!(mode, XmitRcvMode::DpSimHv | XmitRcvMode::DpSimHvSwitched);
        if sim {
            gate.iq_vc_filtered = match kernels.fft_expanded.as_mut() {
                Some(fft_expanded) if regression => {
                    bank.apply_filter_ratio_stag(&gate.iq_vc, &out.spec_ratio, stag, fft_expanded)
                }
                _ => bank.apply_filter_ratio_stag_halves(
                    &gate.iq_vc,
                    &out.spec_ratio,
                    &mut kernels.fft_half,
                ),
            };
        }

        // re-split the filtered series for the staggered covariances
        let half = est.n_samples_half;
        for ii in 0..half {
            gate.iq_hc_short_filtered[ii] = gate.iq_hc_filtered[2 * ii];
            gate.iq_hc_long_filtered[ii] = gate.iq_hc_filtered[2 * ii + 1];
            if sim {
                gate.iq_vc_short_filtered[ii] = gate.iq_vc_filtered[2 * ii];
                gate.iq_vc_long_filtered[ii] = gate.iq_vc_filtered[2 * ii + 1];
            }
        }

        if sim {
            est.dp_sim_hv_stag_prt(
                &gate.iq_hc_filtered,
                &gate.iq_vc_filtered,
                &gate.iq_hc_short_filtered,
                &gate.iq_hc_long_filtered,
                &gate.iq_vc_short_filtered,
                &gate.iq_vc_long_filtered,
                gg,
                true,
                &mut gate.fields_f,
            );
        } else {
            est.single_pol_stag_prt(
                &gate.iq_hc_filtered,
                &gate.iq_hc_short_filtered,
                &gate.iq_hc_long_filtered,
                gg,
                true,
                &mut gate.fields_f,
            );
        }
        out
    }

    /// Clutter diagnostics shared by all filter paths.
    fn store_filter_diagnostics(&self, gate: &mut GateData, out: &FilterOutput) {
        let fields_f = &mut gate.fields_f;
        fields_f.clut_2_wx_ratio = if out.filter_ratio > 1.0 {
            10.0 * (out.filter_ratio - 1.0).log10()
        } else {
            MISSING
        };
        fields_f.spectral_noise = if out.spectral_noise > 0.0 {
            10.0 * out.spectral_noise.log10()
        } else {
            MISSING
        };
        fields_f.spectral_snr = if out.spectral_snr > 0.0 {
            10.0 * out.spectral_snr.log10()
        } else {
            MISSING
        };
        gate.fields.spectral_noise = fields_f.spectral_noise;
        gate.fields.spectral_snr = fields_f.spectral_snr;

        let dbz = gate.fields.dbz;
        let dbz_f = fields_f.dbz;
        fields_f.clut = if is_valid(dbz) && is_valid(dbz_f) && dbz != dbz_f {
            dbz - dbz_f
        } else {
            MISSING
        };
    }

    /// Stage (h): remove the platform's own motion from the measured
    /// radial velocity, re-folded into the nyquist interval.
    fn correct_for_platform_motion(&self, beam: &mut Beam, est: &MomentEstimator) {
        let georef = match &beam.georef {
            Some(georef) => *georef,
            None => return,
        };
        let az = beam.meta.azimuth_deg.to_radians();
        let el = beam.meta.elevation_deg.to_radians();
        let vel_platform = georef.ew_velocity_mps * az.sin() * el.cos()
            + georef.ns_velocity_mps * az.cos() * el.cos()
            + georef.vert_velocity_mps * el.sin();

        let nyquist = est.nyquist;
        for gate in beam.gates.iter_mut().take(beam.n_gates) {
            for fields in [&mut gate.fields, &mut gate.fields_f] {
                if is_valid(fields.vel) {
                    fields.vel_corrected = fold_velocity(fields.vel + vel_platform, nyquist);
                }
                if is_valid(fields.width) {
                    fields.width_corrected = fields.width;
                }
            }
        }
    }

    /// Stage (i): hand range profiles to the injected KDP estimator.
    fn run_kdp(&self, beam: &mut Beam, kdp: &dyn KdpEstimator) {
        for filtered in [false, true] {
            let snr = field_profile(&beam.gates, beam.n_gates, FieldId::Snr, filtered);
            let dbz = field_profile(&beam.gates, beam.n_gates, FieldId::Dbz, filtered);
            let zdr = field_profile(&beam.gates, beam.n_gates, FieldId::Zdr, filtered);
            let rhohv = field_profile(&beam.gates, beam.n_gates, FieldId::Rhohv, filtered);
            let phidp = field_profile(&beam.gates, beam.n_gates, FieldId::Phidp, filtered);

            let outputs = kdp.compute(KdpInputs {
                elevation_deg: beam.meta.elevation_deg,
                azimuth_deg: beam.meta.azimuth_deg,
                wavelength_m: beam.calib.wavelength_m,
                start_range_km: beam.start_range_km,
                gate_spacing_km: beam.gate_spacing_km,
                snr: &snr,
                dbz: &dbz,
                zdr: &zdr,
                rhohv: &rhohv,
                phidp: &phidp,
                missing: MISSING,
            });

            for (gg, gate) in beam.gates.iter_mut().take(beam.n_gates).enumerate() {
                let fields = if filtered {
                    &mut gate.fields_f
                } else {
                    &mut gate.fields
                };
                if let Some(val) = outputs.kdp.get(gg) {
                    fields.kdp = *val;
                }
                if let Some(val) = outputs.dbz_atten_corrected.get(gg) {
                    fields.dbz_atten_corrected = *val;
                }
                if let Some(val) = outputs.zdr_atten_corrected.get(gg) {
                    fields.zdr_atten_corrected = *val;
                }
            }
        }
    }

    /// Stage (j): censoring with a minimum-run rule and small-gap fill.
    fn apply_censoring(&self, beam: &mut Beam) {
        let censoring = &self.config.censoring;
        let n = beam.n_gates;
        let mut censor = vec![false; n];
        match censoring.mode {
            CensorMode::None => return,
            CensorMode::NoiseFlag => {
                for (gg, gate) in beam.gates.iter_mut().take(n).enumerate() {
                    let flag = beam.noise_flags.get(gg).copied().unwrap_or(false);
                    gate.fields.noise_flag = flag;
                    gate.fields_f.noise_flag = flag;
                    censor[gg] = flag;
                }
            }
            CensorMode::SnrAndNcp => {
                for (gg, gate) in beam.gates.iter().take(n).enumerate() {
                    let fields = &gate.fields;
                    let snr_low =
                        !is_valid(fields.snr) || fields.snr < censoring.snr_threshold_db;
                    let ncp_low = !is_valid(fields.ncp) || fields.ncp < censoring.ncp_threshold;
                    censor[gg] = snr_low && ncp_low;
                }
            }
        }

        // short valid runs surrounded by censored gates are noise too
        let mut ii = 0usize;
        while ii < n {
            if censor[ii] {
                ii += 1;
                continue;
            }
            let start = ii;
            while ii < n && !censor[ii] {
                ii += 1;
            }
            let run_len = ii - start;
            if run_len < MIN_VALID_RUN {
                let lo = start.saturating_sub(MIN_VALID_RUN);
                let hi = (ii + MIN_VALID_RUN).min(n);
                let neighborhood = (start - lo) + (hi - ii);
                let censored_neighbors = censor[lo..start].iter().filter(|c| **c).count()
                    + censor[ii..hi].iter().filter(|c| **c).count();
                if neighborhood > 0
                    && censored_neighbors as f64 / neighborhood as f64 >= 0.7
                {
                    for flag in censor[start..ii].iter_mut() {
                        *flag = true;
                    }
                }
            }
        }

        // un-censor one and two gate holes between valid runs
        if censoring.apply_fill_in {
            let snapshot = censor.clone();
            let mut ii = 0usize;
            while ii < n {
                if !snapshot[ii] {
                    ii += 1;
                    continue;
                }
                let start = ii;
                while ii < n && snapshot[ii] {
                    ii += 1;
                }
                let run_len = ii - start;
                if run_len <= 2 && start > 0 && ii < n {
                    for flag in censor[start..ii].iter_mut() {
                        *flag = false;
                    }
                }
            }
        }

        for (gg, gate) in beam.gates.iter_mut().take(n).enumerate() {
            if censor[gg] {
                gate.fields.censoring_flag = true;
                gate.fields_f.censoring_flag = true;
                gate.fields.censor();
                gate.fields_f.censor();
            }
        }
    }
}

/// Range profile of one field across the gates of a beam.
fn field_profile(gates: &[GateData], n_gates: usize, field: FieldId, filtered: bool) -> Vec<f64> {
    gates
        .iter()
        .take(n_gates)
        .map(|g| {
            if filtered {
                field.get(&g.fields_f)
            } else {
                field.get(&g.fields)
            }
        })
        .collect()
}

/// Copy the phase-sensitive dual-pol fields from `src` into `dst`.
fn substitute_dual_pol(dst: &mut MomentsFields, src: &MomentsFields) {
    dst.zdrm = src.zdrm;
    dst.zdr = src.zdr;
    dst.ldr = src.ldr;
    dst.rhohv = src.rhohv;
    dst.rhohv_nnc = src.rhohv_nnc;
    dst.phidp = src.phidp;
}

fn fold_velocity(mut vel: f64, nyquist: f64) -> f64 {
    if nyquist <= 0.0 {
        return vel;
    }
    while vel > nyquist {
        vel -= 2.0 * nyquist;
    }
    while vel < -nyquist {
        vel += 2.0 * nyquist;
    }
    vel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beam::beam::{BeamMeta, Pulse};
    use crate::moments::CalibSnapshot;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    const N_SAMPLES: usize = 64;
    const N_GATES: usize = 32;
    const PRT: f64 = 0.001;
    const WAVELENGTH_M: f64 = 0.10;

    fn calib() -> CalibSnapshot {
        CalibSnapshot {
            wavelength_m: WAVELENGTH_M,
            noise_dbm_hc: -77.0,
            noise_dbm_vc: -77.0,
            noise_dbm_hx: -77.0,
            noise_dbm_vx: -77.0,
            base_dbz_1km_hc: -46.0,
            base_dbz_1km_vc: -46.0,
            base_dbz_1km_hx: -46.0,
            base_dbz_1km_vx: -46.0,
            ..CalibSnapshot::default()
        }
    }

    /// Weather tone at the given velocity and amplitude, plus thermal
    /// noise near the calibrated floor. Positive velocity is away from
    /// the radar, so the pulse-to-pulse phase decreases.
    fn weather_sample(vel: f64, amp: f64, pulse: usize, rng: &mut StdRng) -> Complex64 {
        let omega = -4.0 * PI * vel / WAVELENGTH_M;
        let phase = omega * pulse as f64 * PRT;
        let noise_amp = 1.0e-4;
        Complex64::new(phase.cos(), phase.sin()) * amp
            + Complex64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5) * noise_amp
    }

    fn single_pol_beam(config: &EngineConfig, clutter_gates: &[usize]) -> Beam {
        let mut rng = StdRng::seed_from_u64(99);
        let mut beam = Beam::new();
        beam.reinit(
            BeamMeta::default(),
            config.xmit_rcv_mode,
            config.prt_mode,
            N_SAMPLES,
            N_GATES,
            0.15,
            0.25,
            calib(),
        );
        beam.prt = PRT;
        beam.prt_short = PRT;
        beam.prt_long = PRT * 1.5;

        let pulses: Vec<Pulse> = (0..N_SAMPLES)
            .map(|pp| Pulse {
                time_secs: pp as f64 * PRT,
                chan_iq: vec![(0..N_GATES)
                    .map(|gg| {
                        let mut sample = weather_sample(6.0, 1.0e-3, pp, &mut rng);
                        if clutter_gates.contains(&gg) {
                            sample += Complex64::new(0.05, 0.0);
                        }
                        sample
                    })
                    .collect()],
            })
            .collect();
        beam.load_pulses(&pulses).unwrap();
        beam
    }

    #[test]
    fn pipeline_produces_moments_for_weather_beam() {
        let mut config = EngineConfig::default();
        config.clutter.strategy = FilterStrategy::None;
        let orchestrator = BeamOrchestrator::new(&config, None);
        let mut slot = SlotKernels::new();
        let mut beam = single_pol_beam(&config, &[]);
        orchestrator.process(&mut beam, &mut slot).unwrap();

        assert_eq!(beam.fields.len(), N_GATES);
        let mid = &beam.fields[N_GATES / 2];
        assert!(is_valid(mid.dbz));
        assert!((mid.vel - 6.0).abs() < 1.0, "vel {}", mid.vel);
        // filtered set mirrors unfiltered when no filtering ran
        assert_eq!(beam.fields_f[N_GATES / 2].dbz, mid.dbz);
    }

    #[test]
    fn clutter_gate_is_flagged_and_filtered() {
        let mut config = EngineConfig::default();
        config.clutter.strategy = FilterStrategy::Adaptive;
        let orchestrator = BeamOrchestrator::new(&config, None);
        let mut slot = SlotKernels::new();
        // contiguous clutter patch so the speckle filter keeps the flags
        let clutter: Vec<usize> = (10..18).collect();
        let mut beam = single_pol_beam(&config, &clutter);
        orchestrator.process(&mut beam, &mut slot).unwrap();

        let gate = &beam.fields[14];
        let gate_f = &beam.fields_f[14];
        assert!(gate.cmd_flag, "cmd {} at clutter gate", gate.cmd);
        // filtered reflectivity well below unfiltered
        assert!(
            gate.dbz - gate_f.dbz > 3.0,
            "dbz {} -> {}",
            gate.dbz,
            gate_f.dbz
        );
        assert!(is_valid(gate_f.clut_2_wx_ratio));
        // weather gate left alone
        let weather = &beam.fields[25];
        assert!(!weather.cmd_flag);
        assert_eq!(beam.fields_f[25].dbz, weather.dbz);
    }

    /// Beam where the given gates carry a strong DC return plus a raised
    /// broadband floor, like the return from a wind turbine.
    fn turbine_beam(config: &EngineConfig, turbine_gates: &[usize]) -> Beam {
        let mut rng = StdRng::seed_from_u64(7);
        let mut beam = Beam::new();
        beam.reinit(
            BeamMeta::default(),
            config.xmit_rcv_mode,
            config.prt_mode,
            N_SAMPLES,
            N_GATES,
            0.15,
            0.25,
            calib(),
        );
        beam.prt = PRT;
        let pulses: Vec<Pulse> = (0..N_SAMPLES)
            .map(|pp| Pulse {
                time_secs: pp as f64 * PRT,
                chan_iq: vec![(0..N_GATES)
                    .map(|gg| {
                        let mut sample = weather_sample(6.0, 1.0e-3, pp, &mut rng);
                        if turbine_gates.contains(&gg) {
                            sample += Complex64::new(0.05, 0.0);
                            sample += Complex64::new(
                                rng.gen::<f64>() - 0.5,
                                rng.gen::<f64>() - 0.5,
                            ) * 0.02;
                        }
                        sample
                    })
                    .collect()],
            })
            .collect();
        beam.load_pulses(&pulses).unwrap();
        beam
    }

    #[test]
    fn windfarm_check_clears_flag_where_spectral_floor_is_raised() {
        let turbines: Vec<usize> = (10..18).collect();

        // without the check the raised-floor gates classify as clutter
        let mut config = EngineConfig::default();
        config.clutter.strategy = FilterStrategy::Adaptive;
        let orchestrator = BeamOrchestrator::new(&config, None);
        let mut slot = SlotKernels::new();
        let mut beam = turbine_beam(&config, &turbines);
        orchestrator.process(&mut beam, &mut slot).unwrap();
        assert!(beam.fields[14].cmd_flag, "cmd {}", beam.fields[14].cmd);

        // the check measures spectral SNR at strong high-CPA gates and
        // vetoes the flag where the whole floor is lifted
        config.cmd.apply_windfarm_check = true;
        let orchestrator = BeamOrchestrator::new(&config, None);
        let mut beam = turbine_beam(&config, &turbines);
        orchestrator.process(&mut beam, &mut slot).unwrap();
        let gate = &beam.fields[14];
        assert!(is_valid(gate.spectral_snr), "spectral snr not computed");
        assert!(
            gate.spectral_snr >= config.cmd.windfarm_spectral_snr_db,
            "spectral snr {}",
            gate.spectral_snr
        );
        assert!(!gate.cmd_flag, "flag not cleared, cmd {}", gate.cmd);
        // plain weather gates stay below the snr/cpa gates for the check
        assert!(!is_valid(beam.fields[25].spectral_snr));
    }

    #[test]
    fn off_zero_snr_is_computed_under_its_own_window() {
        // the check runs on the raw series with a von Hann window even
        // when the moments window is rectangular
        let mut config = EngineConfig::default();
        config.window = WindowType::Rect;
        config.clutter.strategy = FilterStrategy::Adaptive;
        config.cmd.apply_off_zero_snr_check = true;
        let orchestrator = BeamOrchestrator::new(&config, None);
        let mut slot = SlotKernels::new();

        // strong weather at 6 m/s, well outside the 3 m/s notch
        let mut rng = StdRng::seed_from_u64(21);
        let mut beam = Beam::new();
        beam.reinit(
            BeamMeta::default(),
            XmitRcvMode::SinglePol,
            PrtMode::Fixed,
            N_SAMPLES,
            N_GATES,
            0.15,
            0.25,
            calib(),
        );
        beam.prt = PRT;
        let pulses: Vec<Pulse> = (0..N_SAMPLES)
            .map(|pp| Pulse {
                time_secs: pp as f64 * PRT,
                chan_iq: vec![(0..N_GATES)
                    .map(|_| weather_sample(6.0, 1.0e-2, pp, &mut rng))
                    .collect()],
            })
            .collect();
        beam.load_pulses(&pulses).unwrap();
        orchestrator.process(&mut beam, &mut slot).unwrap();

        let mid = &beam.fields[N_GATES / 2];
        assert!(is_valid(mid.ozsnr));
        assert!(mid.ozsnr > 10.0, "ozsnr {}", mid.ozsnr);
    }

    #[test]
    fn noise_flag_censoring_uses_external_flags() {
        let mut config = EngineConfig::default();
        config.clutter.strategy = FilterStrategy::None;
        config.censoring.mode = CensorMode::NoiseFlag;
        let orchestrator = BeamOrchestrator::new(&config, None);
        let mut slot = SlotKernels::new();
        let mut beam = single_pol_beam(&config, &[]);
        let flags: Vec<bool> = (0..N_GATES).map(|gg| gg >= 20).collect();
        beam.set_noise_flags(&flags);
        orchestrator.process(&mut beam, &mut slot).unwrap();

        assert!(!beam.fields[5].censoring_flag);
        assert!(is_valid(beam.fields[5].dbz));
        let flagged = &beam.fields[25];
        assert!(flagged.noise_flag);
        assert!(flagged.censoring_flag);
        assert_eq!(flagged.dbz, MISSING);
    }

    #[test]
    fn switched_mode_matches_sim_hv_for_same_series() {
        let mut rng = StdRng::seed_from_u64(13);
        // H at twice the V amplitude: 6 dB of ZDR
        let h: Vec<Vec<Complex64>> = (0..N_SAMPLES)
            .map(|pp| {
                (0..N_GATES)
                    .map(|_| weather_sample(6.0, 2.0e-3, pp, &mut rng))
                    .collect()
            })
            .collect();
        let v: Vec<Vec<Complex64>> = (0..N_SAMPLES)
            .map(|pp| {
                (0..N_GATES)
                    .map(|_| weather_sample(6.0, 1.0e-3, pp, &mut rng))
                    .collect()
            })
            .collect();

        let run = |mode: XmitRcvMode, pulses: Vec<Pulse>| -> Vec<MomentsFields> {
            let mut config = EngineConfig::default();
            config.xmit_rcv_mode = mode;
            config.clutter.strategy = FilterStrategy::None;
            let orchestrator = BeamOrchestrator::new(&config, None);
            let mut slot = SlotKernels::new();
            let mut beam = Beam::new();
            beam.reinit(
                BeamMeta::default(),
                mode,
                PrtMode::Fixed,
                N_SAMPLES,
                N_GATES,
                0.15,
                0.25,
                calib(),
            );
            beam.prt = PRT;
            beam.load_pulses(&pulses).unwrap();
            orchestrator.process(&mut beam, &mut slot).unwrap();
            beam.fields
        };

        let sim_pulses: Vec<Pulse> = (0..N_SAMPLES)
            .map(|pp| Pulse {
                time_secs: pp as f64 * PRT,
                chan_iq: vec![h[pp].clone(), v[pp].clone()],
            })
            .collect();
        // switched receivers: channel 0 carries H on even pulses only
        let switched_pulses: Vec<Pulse> = (0..N_SAMPLES)
            .map(|pp| Pulse {
                time_secs: pp as f64 * PRT,
                chan_iq: if pp % 2 == 0 {
                    vec![h[pp].clone(), v[pp].clone()]
                } else {
                    vec![v[pp].clone(), h[pp].clone()]
                },
            })
            .collect();

        let sim = run(XmitRcvMode::DpSimHv, sim_pulses);
        let switched = run(XmitRcvMode::DpSimHvSwitched, switched_pulses);
        let gate = N_GATES / 2;
        assert_eq!(sim[gate].vel, switched[gate].vel);
        assert_eq!(sim[gate].zdr, switched[gate].zdr);
        assert!((switched[gate].zdr - 6.02).abs() < 0.2, "zdr {}", switched[gate].zdr);
        assert_eq!(sim[gate].rhohv, switched[gate].rhohv);
    }

    #[test]
    fn single_pol_v_beam_produces_v_channel_moments() {
        let mut config = EngineConfig::default();
        config.xmit_rcv_mode = XmitRcvMode::SinglePolV;
        config.clutter.strategy = FilterStrategy::None;
        let orchestrator = BeamOrchestrator::new(&config, None);
        let mut slot = SlotKernels::new();
        let mut beam = single_pol_beam(&config, &[]);
        orchestrator.process(&mut beam, &mut slot).unwrap();

        let mid = &beam.fields[N_GATES / 2];
        assert!(is_valid(mid.dbz));
        assert_eq!(mid.dbz, mid.dbzvc);
        assert_eq!(mid.snr, mid.snrvc);
        assert!((mid.vel - 6.0).abs() < 1.0, "vel {}", mid.vel);
    }

    #[test]
    fn censoring_clears_noise_only_gates() {
        let mut config = EngineConfig::default();
        config.clutter.strategy = FilterStrategy::None;
        config.censoring.mode = CensorMode::SnrAndNcp;
        config.censoring.snr_threshold_db = 3.0;
        let orchestrator = BeamOrchestrator::new(&config, None);
        let mut slot = SlotKernels::new();

        // noise-only beam: no coherent signal anywhere
        let mut rng = StdRng::seed_from_u64(5);
        let mut beam = Beam::new();
        beam.reinit(
            BeamMeta::default(),
            XmitRcvMode::SinglePol,
            PrtMode::Fixed,
            N_SAMPLES,
            N_GATES,
            0.15,
            0.25,
            calib(),
        );
        beam.prt = PRT;
        let pulses: Vec<Pulse> = (0..N_SAMPLES)
            .map(|pp| Pulse {
                time_secs: pp as f64 * PRT,
                chan_iq: vec![(0..N_GATES)
                    .map(|_| {
                        Complex64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5) * 1.0e-5
                    })
                    .collect()],
            })
            .collect();
        beam.load_pulses(&pulses).unwrap();
        orchestrator.process(&mut beam, &mut slot).unwrap();

        let censored = beam.fields.iter().filter(|f| f.censoring_flag).count();
        assert!(censored > N_GATES / 2, "censored {}", censored);
        let first = beam.fields.iter().find(|f| f.censoring_flag).unwrap();
        assert_eq!(first.dbz, MISSING);
        assert_eq!(first.vel, MISSING);
    }

    #[test]
    fn platform_motion_correction_folds_into_nyquist() {
        let mut config = EngineConfig::default();
        config.clutter.strategy = FilterStrategy::None;
        config.correct_for_platform_motion = true;
        let orchestrator = BeamOrchestrator::new(&config, None);
        let mut slot = SlotKernels::new();
        let mut beam = single_pol_beam(&config, &[]);
        // platform moving north, beam pointing north
        beam.meta.azimuth_deg = 0.0;
        beam.georef = Some(crate::beam::beam::Georeference {
            ns_velocity_mps: 10.0,
            ..Default::default()
        });
        orchestrator.process(&mut beam, &mut slot).unwrap();
        let mid = &beam.fields[N_GATES / 2];
        assert!(is_valid(mid.vel_corrected));
        assert!((mid.vel_corrected - (mid.vel + 10.0)).abs() < 1e-6);
    }

    #[test]
    fn kernels_rebuild_only_on_dwell_change() {
        let mut slot = SlotKernels::new();
        let w1 = slot.prepare(WindowType::VonHann, 64, PrtMode::Fixed).window.as_ptr();
        let w2 = slot.prepare(WindowType::VonHann, 64, PrtMode::Fixed).window.as_ptr();
        assert_eq!(w1, w2, "same dwell geometry must not rebuild");
        let k3 = slot.prepare(WindowType::VonHann, 128, PrtMode::Fixed);
        assert_eq!(k3.window.len(), 128);
        assert!(k3.fft_expanded.is_none());
        let k4 = slot.prepare(
            WindowType::VonHann,
            64,
            PrtMode::Staggered {
                stag_m: 2,
                stag_n: 3,
            },
        );
        assert!(k4.fft_expanded.is_some() && k4.regr_stag.is_some());
    }
}
