//! Covariance/moment estimator context.
//!
//! One estimator instance is built per compute slot and re-initialized for
//! each beam from that beam's calibration snapshot, PRT and dwell size. All
//! derived constants live here so the per-gate mode routines in `modes` and
//! `stag` stay free of setup logic.

use num_complex::Complex64;

use super::calib::CalibSnapshot;
use super::stag::StagPrt;
use super::width::WidthMethod;
use crate::clutter::spectra::compute_spectral_noise;
use crate::config::EngineConfig;
use crate::math::complex::phasor;
use crate::math::window::window_correlation;
use crate::math::GateFft;
use crate::prelude::MISSING;

pub struct MomentEstimator {
    pub n_samples: usize,
    pub n_samples_half: usize,
    pub prt: f64,
    pub prt_short: f64,
    pub prt_long: f64,
    pub nyquist: f64,
    pub wavelength_m: f64,
    pub start_range_km: f64,
    pub gate_spacing_km: f64,

    pub(crate) range_corr: Vec<f64>,
    pub(crate) atmos_atten_corr: Vec<f64>,

    // window lag correlations for width correction
    pub(crate) window_r1: f64,
    pub(crate) window_r2: f64,
    pub(crate) window_r3: f64,

    // noise powers estimated for this beam (linear)
    pub(crate) est_noise_power_hc: f64,
    pub(crate) est_noise_power_vc: f64,
    pub(crate) est_noise_power_hx: f64,
    pub(crate) est_noise_power_vx: f64,
    // calibrated noise powers (linear)
    pub(crate) cal_noise_power_hc: f64,
    pub(crate) cal_noise_power_vc: f64,
    pub(crate) cal_noise_power_hx: f64,
    pub(crate) cal_noise_power_vx: f64,

    pub(crate) receiver_gain_db_hc: f64,
    pub(crate) receiver_gain_db_vc: f64,
    pub(crate) receiver_gain_db_hx: f64,
    pub(crate) receiver_gain_db_vx: f64,

    pub(crate) base_dbz_1km_hc: f64,
    pub(crate) base_dbz_1km_vc: f64,
    pub(crate) base_dbz_1km_hx: f64,
    pub(crate) base_dbz_1km_vx: f64,

    pub(crate) dbz_correction: f64,
    pub(crate) zdr_correction_db: f64,
    pub(crate) ldr_correction_db_h: f64,
    pub(crate) ldr_correction_db_v: f64,

    // measured vs calibrated transmit power, dBm
    pub(crate) adjust_dbz_for_xmit_power: bool,
    pub(crate) adjust_zdr_for_xmit_power: bool,
    pub(crate) meas_xmit_power_dbm_h: f64,
    pub(crate) meas_xmit_power_dbm_v: f64,
    pub(crate) calib_xmit_power_dbm_h: f64,
    pub(crate) calib_xmit_power_dbm_v: f64,

    /// Detectable-signal threshold, linear.
    pub(crate) min_detectable_snr: f64,
    pub(crate) min_snr_db_for_zdr: f64,
    pub(crate) min_snr_db_for_ldr: f64,
    pub(crate) compute_zdr_using_snr: bool,
    pub(crate) use_cpa_alt: bool,

    pub(crate) width_method: WidthMethod,

    pub(crate) vel_sign: f64,
    pub(crate) vel_sign_staggered: f64,
    pub(crate) phidp_sign: f64,
    pub(crate) phidp_offset_alt: Complex64,
    pub(crate) phidp_offset_sim: Complex64,

    pub stag: Option<StagPrt>,
}

impl MomentEstimator {
    /// Build an estimator for a fixed-PRT dwell.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &EngineConfig,
        calib: &CalibSnapshot,
        prt: f64,
        n_samples: usize,
        n_gates: usize,
        start_range_km: f64,
        gate_spacing_km: f64,
    ) -> Self {
        let nyquist = (calib.wavelength_m / prt) / 4.0;
        let mut est = Self::base(config, calib, prt, n_samples, start_range_km, gate_spacing_km);
        est.nyquist = nyquist;
        est.compute_range_correction(n_gates);
        est
    }

    /// Build an estimator for a staggered-PRT dwell.
    #[allow(clippy::too_many_arguments)]
    pub fn new_staggered(
        config: &EngineConfig,
        calib: &CalibSnapshot,
        prt_short: f64,
        prt_long: f64,
        stag_m: i64,
        stag_n: i64,
        n_samples: usize,
        n_gates_prt_short: usize,
        n_gates_prt_long: usize,
        start_range_km: f64,
        gate_spacing_km: f64,
    ) -> Self {
        let stag = StagPrt::new(
            prt_short,
            prt_long,
            stag_m,
            stag_n,
            n_gates_prt_short,
            n_gates_prt_long,
            calib.wavelength_m,
        );
        let mut est = Self::base(
            config,
            calib,
            prt_short,
            n_samples,
            start_range_km,
            gate_spacing_km,
        );
        est.prt_short = prt_short;
        est.prt_long = prt_long;
        est.nyquist = stag.nyquist;
        est.compute_range_correction(n_gates_prt_long);
        est.stag = Some(stag);
        est
    }

    fn base(
        config: &EngineConfig,
        calib: &CalibSnapshot,
        prt: f64,
        n_samples: usize,
        start_range_km: f64,
        gate_spacing_km: f64,
    ) -> Self {
        let phidp_offset_rad = calib.system_phidp_deg.to_radians();
        Self {
            n_samples,
            n_samples_half: n_samples / 2,
            prt,
            prt_short: prt,
            prt_long: prt,
            nyquist: 0.0,
            wavelength_m: calib.wavelength_m,
            start_range_km,
            gate_spacing_km,
            range_corr: Vec::new(),
            atmos_atten_corr: Vec::new(),
            window_r1: 1.0,
            window_r2: 1.0,
            window_r3: 1.0,
            est_noise_power_hc: calib.noise_power_hc(),
            est_noise_power_vc: calib.noise_power_vc(),
            est_noise_power_hx: calib.noise_power_hx(),
            est_noise_power_vx: calib.noise_power_vx(),
            cal_noise_power_hc: calib.noise_power_hc(),
            cal_noise_power_vc: calib.noise_power_vc(),
            cal_noise_power_hx: calib.noise_power_hx(),
            cal_noise_power_vx: calib.noise_power_vx(),
            receiver_gain_db_hc: calib.receiver_gain_db_hc,
            receiver_gain_db_vc: calib.receiver_gain_db_vc,
            receiver_gain_db_hx: calib.receiver_gain_db_hx,
            receiver_gain_db_vx: calib.receiver_gain_db_vx,
            base_dbz_1km_hc: calib.base_dbz_1km_hc,
            base_dbz_1km_vc: calib.base_dbz_1km_vc,
            base_dbz_1km_hx: calib.base_dbz_1km_hx,
            base_dbz_1km_vx: calib.base_dbz_1km_vx,
            dbz_correction: calib.dbz_correction,
            zdr_correction_db: calib.zdr_correction_db,
            ldr_correction_db_h: calib.ldr_correction_db_h,
            ldr_correction_db_v: calib.ldr_correction_db_v,
            adjust_dbz_for_xmit_power: config.adjust_dbz_for_measured_xmit_power,
            adjust_zdr_for_xmit_power: config.adjust_zdr_for_measured_xmit_power,
            meas_xmit_power_dbm_h: MISSING,
            meas_xmit_power_dbm_v: MISSING,
            calib_xmit_power_dbm_h: MISSING,
            calib_xmit_power_dbm_v: MISSING,
            min_detectable_snr: 10.0_f64.powf(config.min_detectable_snr_db / 10.0),
            min_snr_db_for_zdr: config.min_snr_db_for_zdr,
            min_snr_db_for_ldr: config.min_snr_db_for_ldr,
            compute_zdr_using_snr: config.compute_zdr_using_snr,
            use_cpa_alt: config.compute_cpa_using_alt,
            width_method: config.width_method,
            vel_sign: if config.change_vel_sign { 1.0 } else { -1.0 },
            vel_sign_staggered: if config.change_vel_sign_staggered {
                -1.0
            } else {
                1.0
            },
            phidp_sign: if config.change_phidp_sign { -1.0 } else { 1.0 },
            phidp_offset_alt: phasor(-phidp_offset_rad / 2.0),
            phidp_offset_sim: phasor(phidp_offset_rad),
            stag: None,
        }
    }

    /// Replace the estimated noise powers with values measured for this
    /// beam; the calibrated powers stay as the SNR reference.
    pub fn set_estimated_noise_power(&mut self, hc: f64, vc: f64, hx: f64, vx: f64) {
        if hc > 0.0 {
            self.est_noise_power_hc = hc;
        }
        if vc > 0.0 {
            self.est_noise_power_vc = vc;
        }
        if hx > 0.0 {
            self.est_noise_power_hx = hx;
        }
        if vx > 0.0 {
            self.est_noise_power_vx = vx;
        }
    }

    pub fn set_measured_xmit_power(&mut self, meas_h: f64, meas_v: f64, cal_h: f64, cal_v: f64) {
        self.meas_xmit_power_dbm_h = meas_h;
        self.meas_xmit_power_dbm_v = meas_v;
        self.calib_xmit_power_dbm_h = cal_h;
        self.calib_xmit_power_dbm_v = cal_v;
    }

    /// Record the lag correlations of the active window; these divide the
    /// lag magnitudes in the width estimators.
    pub fn set_window(&mut self, window: &[f64]) {
        self.window_r1 = window_correlation(window, 1);
        self.window_r2 = window_correlation(window, 2);
        self.window_r3 = window_correlation(window, 3);
    }

    /// 20 log10(range) correction per gate, zero inside 1 m.
    fn compute_range_correction(&mut self, n_gates: usize) {
        self.range_corr.clear();
        self.atmos_atten_corr.clear();
        for ii in 0..n_gates {
            let range_km = self.start_range_km + ii as f64 * self.gate_spacing_km;
            if range_km < 0.001 {
                self.range_corr.push(0.0);
            } else {
                self.range_corr.push(20.0 * range_km.log10());
            }
        }
        self.atmos_atten_corr.resize(n_gates, 0.0);
    }

    /// Two-way gaseous attenuation along the beam for the given elevation.
    ///
    /// Uses the CRPL exponential reference atmosphere fit: the total
    /// attenuation saturates with range, faster at low elevations.
    pub fn load_atmos_atten(&mut self, elevation_deg: f64) {
        let elev = elevation_deg.max(0.0);
        let aa = 0.4 + 3.45 * (-elev / 1.8).exp();
        let bb = 27.8 + 154.0 * (-elev / 2.2).exp();
        for (ii, corr) in self.atmos_atten_corr.iter_mut().enumerate() {
            let range_km = self.start_range_km + ii as f64 * self.gate_spacing_km;
            *corr = (aa * range_km) / (range_km + bb);
        }
    }

    pub(crate) fn range_corr(&self, gate_num: usize) -> f64 {
        self.range_corr.get(gate_num).copied().unwrap_or(0.0)
    }

    pub(crate) fn atmos_atten(&self, gate_num: usize) -> f64 {
        self.atmos_atten_corr.get(gate_num).copied().unwrap_or(0.0)
    }

    pub(crate) fn adjust_dbz_for_pwr_h(&self, dbz: f64) -> f64 {
        if !self.adjust_dbz_for_xmit_power
            || self.meas_xmit_power_dbm_h < -9990.0
            || self.calib_xmit_power_dbm_h < -9990.0
        {
            return dbz;
        }
        dbz - (self.meas_xmit_power_dbm_h - self.calib_xmit_power_dbm_h)
    }

    pub(crate) fn adjust_dbz_for_pwr_v(&self, dbz: f64) -> f64 {
        if !self.adjust_dbz_for_xmit_power
            || self.meas_xmit_power_dbm_v < -9990.0
            || self.calib_xmit_power_dbm_v < -9990.0
        {
            return dbz;
        }
        dbz - (self.meas_xmit_power_dbm_v - self.calib_xmit_power_dbm_v)
    }

    pub(crate) fn adjust_zdr_for_pwr(&self, zdr: f64) -> f64 {
        if !self.adjust_zdr_for_xmit_power
            || self.meas_xmit_power_dbm_h < -9990.0
            || self.calib_xmit_power_dbm_h < -9990.0
            || self.meas_xmit_power_dbm_v < -9990.0
            || self.calib_xmit_power_dbm_v < -9990.0
        {
            return zdr;
        }
        let diff_h = self.meas_xmit_power_dbm_h - self.calib_xmit_power_dbm_h;
        let diff_v = self.meas_xmit_power_dbm_v - self.calib_xmit_power_dbm_v;
        zdr - (diff_h - diff_v)
    }

    pub(crate) fn set_field_meta(&self, fields: &mut super::fields::MomentsFields) {
        fields.prt = self.prt;
        fields.num_pulses = self.n_samples as f64;
        fields.prt_short = self.prt_short;
        fields.prt_long = self.prt_long;
    }

    /// SNR of the spectrum away from DC: mean power outside a notch of the
    /// given width, noise-subtracted. Used to detect weather offset from
    /// zero Doppler under a clutter-dominated gate.
    pub fn compute_oz_snr(
        &self,
        iq_windowed: &[Complex64],
        fft: &mut GateFft,
        notch_width_mps: f64,
        noise_power: f64,
    ) -> f64 {
        let n_samples = iq_windowed.len();
        let mut spec = Vec::with_capacity(n_samples);
        fft.forward(iq_windowed, &mut spec);

        let half_width =
            (((notch_width_mps / 2.0) / self.nyquist) * n_samples as f64 + 0.5) as usize;

        // scale bin powers by 1/n so they are comparable to the
        // time-domain noise power
        let bin_scale = 1.0 / n_samples as f64;
        let mut sum_power = 0.0;
        let mut count = 0.0;
        for val in spec
            .iter()
            .take(n_samples.saturating_sub(half_width))
            .skip(half_width)
        {
            sum_power += val.norm_sqr() * bin_scale;
            count += 1.0;
        }
        let min_snr_db = 10.0 * self.min_detectable_snr.log10();
        if count < 1.0 {
            return min_snr_db;
        }
        let power_ns = sum_power / count - noise_power;
        if power_ns < 0.0 {
            return min_snr_db;
        }
        10.0 * (power_ns / noise_power).log10()
    }

    /// Spectral noise floor of the windowed series and its SNR over the
    /// calibrated noise, both linear. Wind turbines lift the whole floor,
    /// so a large value at a high-CPA gate marks wind-farm contamination.
    pub fn compute_spectral_snr(
        &self,
        iq_windowed: &[Complex64],
        fft: &mut GateFft,
        calib_noise: f64,
        n_noise_segments: usize,
    ) -> (f64, f64) {
        let n = iq_windowed.len();
        let mut spec = Vec::with_capacity(n);
        fft.forward(iq_windowed, &mut spec);
        let bin_scale = 1.0 / n.max(1) as f64;
        let power_spec: Vec<f64> = spec.iter().map(|c| c.norm_sqr() * bin_scale).collect();
        let spectral_noise = compute_spectral_noise(&power_spec, n_noise_segments);
        let noise = calib_noise.max(1.0e-12);
        (spectral_noise, (spectral_noise - noise) / noise)
    }
}
