//! Clutter filter bank: applies the configured filter strategy to a
//! gate's I/Q series and reports the spectral diagnostics the moments
//! recompute needs.
//!
//! All filters return their output in the same domain as the covariance
//! computation consumes: windowed time series for the fixed-PRT spectral
//! and regression paths, interleaved short/long series for staggered PRT.
//! The per-bin magnitude ratio from the primary (H co-polar) channel is
//! reused on the other channels through `apply_filter_ratio`, matching
//! the filtered phase relationships across channels.

use num_complex::Complex64;

use crate::config::ClutterConfig;
use crate::math::complex::mean_power;
use crate::math::fft::GateFft;
use crate::math::window::apply_window;
use crate::moments::stag::{
    combine_stag_iq, condense_stag_iq, expand_stag_iq, separate_stag_iq, StagPrt,
};

use super::regression::{order_from_cnr, RegressionFilter};
use super::spectra::{
    compute_spectral_noise, interp_across_notch, interp_across_stag_notches, perform_adaptive,
    perform_notch,
};

const POWER_FLOOR: f64 = 1.0e-12;
const CZERO: Complex64 = Complex64::new(0.0, 0.0);

/// Below this clutter-to-signal ratio the regression filter passes the
/// series through unchanged.
const REGR_MIN_CSR: f64 = 0.1;

/// Result of filtering one channel at one gate.
#[derive(Debug, Clone, Default)]
pub struct FilterOutput {
    /// Filtered series, ready for covariance computation.
    pub filtered: Vec<Complex64>,
    /// Series with the notch bins zeroed outright (no interpolation).
    pub notched: Vec<Complex64>,
    /// Per-bin magnitude ratio filtered/raw, for reuse on other channels.
    pub spec_ratio: Vec<f64>,
    /// Wrapped spectrum indices covered by the notch.
    pub notch_bins: Vec<usize>,
    pub raw_power: f64,
    pub filtered_power: f64,
    /// Linear power ratio raw / filtered, >= 1 when power was removed.
    pub filter_ratio: f64,
    pub spectral_noise: f64,
    pub spectral_snr: f64,
    pub clutter_found: bool,
}

impl FilterOutput {
    fn passthrough(iq: &[Complex64], n_spec: usize) -> Self {
        let power = mean_power(iq);
        Self {
            filtered: iq.to_vec(),
            notched: iq.to_vec(),
            spec_ratio: vec![1.0; n_spec],
            notch_bins: Vec::new(),
            raw_power: power,
            filtered_power: power,
            filter_ratio: 1.0,
            spectral_noise: POWER_FLOOR,
            spectral_snr: 1.0,
            clutter_found: false,
        }
    }
}

/// Per-dwell filter bank. Holds the configuration and nyquist; the FFT
/// and regression kernels are owned by the compute slot and borrowed per
/// call.
#[derive(Debug, Clone)]
pub struct ClutterFilterBank {
    config: ClutterConfig,
    nyquist: f64,
}

impl ClutterFilterBank {
    pub fn new(config: ClutterConfig, nyquist: f64) -> Self {
        Self { config, nyquist }
    }

    pub fn config(&self) -> &ClutterConfig {
        &self.config
    }

    /// Fixed notch around DC. Input is the windowed series.
    pub fn apply_notch_filter(
        &self,
        iq_windowed: &[Complex64],
        calib_noise: f64,
        fft: &mut GateFft,
    ) -> FilterOutput {
        let n = iq_windowed.len();
        let mut spec = Vec::with_capacity(n);
        fft.forward(iq_windowed, &mut spec);
        let power_spec = scaled_power_spec(&spec);

        let mut result = perform_notch(&power_spec, self.config.notch_width_mps, self.nyquist);
        result.spectral_noise = calib_noise;

        self.rebuild_from_power(&spec, &power_spec, &mut result, 1.0, calib_noise, fft)
    }

    /// Adaptive notch with interpolation across the removed clutter.
    /// Input is the windowed series.
    pub fn apply_adaptive_filter(
        &self,
        iq_windowed: &[Complex64],
        calib_noise: f64,
        fft: &mut GateFft,
    ) -> FilterOutput {
        let n = iq_windowed.len();
        let mut spec = Vec::with_capacity(n);
        fft.forward(iq_windowed, &mut spec);
        let power_spec = scaled_power_spec(&spec);

        let mut result = perform_adaptive(
            &power_spec,
            self.config.clutter_width_mps,
            self.config.init_notch_width_mps,
            self.nyquist,
            false,
            self.config.spectral_noise_segments,
        );
        if !result.clutter_found {
            let mut out = FilterOutput::passthrough(iq_windowed, n);
            out.spectral_noise = result.spectral_noise;
            out.spectral_snr = spectral_snr(result.spectral_noise, calib_noise);
            return out;
        }
        let snr = spectral_snr(result.spectral_noise, calib_noise);
        self.rebuild_from_power(&spec, &power_spec, &mut result, snr, calib_noise, fft)
    }

    /// Polynomial regression filter. Takes the raw (unwindowed) series;
    /// the output is windowed and spectrally adjusted across the notch.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_regression_filter(
        &self,
        iq_raw: &[Complex64],
        window: &[f64],
        calib_noise: f64,
        prt_secs: f64,
        antenna_rate_dps: f64,
        fft: &mut GateFft,
        regr: &RegressionFilter,
    ) -> FilterOutput {
        let n = iq_raw.len();
        let power_orig = mean_power(iq_raw);

        let mut residual = Vec::with_capacity(n);
        let order = self.select_order(iq_raw, calib_noise, prt_secs, antenna_rate_dps, regr);
        regr.apply(iq_raw, order, &mut residual);
        let power_regr = mean_power(&residual).max(POWER_FLOOR);

        // weak clutter: leave the series alone
        let csr = (power_orig - power_regr) / power_regr;
        let mut windowed_orig = Vec::with_capacity(n);
        apply_window(iq_raw, window, &mut windowed_orig);
        if csr < REGR_MIN_CSR {
            return FilterOutput::passthrough(&windowed_orig, n);
        }

        let mut windowed_regr = Vec::with_capacity(n);
        apply_window(&residual, window, &mut windowed_regr);

        let mut orig_spec = Vec::with_capacity(n);
        let mut regr_spec = Vec::with_capacity(n);
        fft.forward(&windowed_orig, &mut orig_spec);
        fft.forward(&windowed_regr, &mut regr_spec);
        let orig_power_spec = scaled_power_spec(&orig_spec);
        let regr_power_spec = scaled_power_spec(&regr_spec);

        // fill the polynomial notch before estimating noise and the
        // residue correction
        let mut interp_power_spec = regr_power_spec.clone();
        if self.config.regression_interp_across_notch {
            interp_across_notch(&mut interp_power_spec);
        }
        let spectral_noise =
            compute_spectral_noise(&interp_power_spec, self.config.spectral_noise_segments);
        let snr = spectral_snr(spectral_noise, calib_noise);

        let raw_power = mean(&orig_power_spec);
        let filtered_power_pre = mean(&interp_power_spec);
        let correction = self.pwr_correction_ratio(
            snr,
            raw_power,
            filtered_power_pre,
            raw_power - filtered_power_pre,
            calib_noise,
        );

        // reconstruct from the original (windowed) spectrum so the
        // filtered phases stay consistent with the raw series
        let mut spec_ratio = vec![1.0; n];
        let mut filtered_spec = orig_spec.clone();
        for ii in 0..n {
            let target = (interp_power_spec[ii] * correction).max(0.0);
            let ratio = (target / orig_power_spec[ii].max(POWER_FLOOR)).sqrt();
            spec_ratio[ii] = ratio;
            filtered_spec[ii] *= ratio;
        }

        let mut filtered = Vec::with_capacity(n);
        fft.inverse(&filtered_spec, &mut filtered);
        let filtered_power = mean_power(&filtered).max(POWER_FLOOR);

        FilterOutput {
            filtered,
            notched: windowed_regr,
            spec_ratio,
            notch_bins: Vec::new(),
            raw_power,
            filtered_power,
            filter_ratio: raw_power / filtered_power,
            spectral_noise,
            spectral_snr: snr,
            clutter_found: true,
        }
    }

    /// Adaptive filter for staggered PRT: the short and long sub-series
    /// are filtered independently at the short-plus-long nyquist, with
    /// the notch set to the spectral noise rather than interpolated.
    pub fn apply_adaptive_stag_filter(
        &self,
        iq_combined: &[Complex64],
        calib_noise: f64,
        stag: &StagPrt,
        fft_half: &mut GateFft,
    ) -> FilterOutput {
        let n = iq_combined.len();
        let half = n / 2;
        let mut iq_short = vec![CZERO; half];
        let mut iq_long = vec![CZERO; half];
        separate_stag_iq(iq_combined, &mut iq_short, &mut iq_long);

        let filter_nyquist = stag.nyquist_short_plus_long;
        let mut halves_filtered = Vec::with_capacity(2);
        let mut halves_notched = Vec::with_capacity(2);
        let mut spec_ratio = Vec::with_capacity(n);
        let mut notch_bins = Vec::new();
        let mut raw_power = 0.0;
        let mut filtered_power = 0.0;
        let mut spectral_noise = 0.0;
        let mut clutter_found = false;

        for (hh, iq_half) in [&iq_short, &iq_long].into_iter().enumerate() {
            let mut spec = Vec::with_capacity(half);
            fft_half.forward(iq_half, &mut spec);
            let power_spec = scaled_power_spec(&spec);

            let mut result = perform_adaptive(
                &power_spec,
                self.config.clutter_width_mps,
                self.config.init_notch_width_mps,
                filter_nyquist,
                true,
                self.config.spectral_noise_segments,
            );
            raw_power += result.raw_power;
            spectral_noise += result.spectral_noise;

            if result.clutter_found {
                clutter_found = true;
                let snr = spectral_snr(result.spectral_noise, calib_noise);
                let out = self
                    .rebuild_from_power(&spec, &power_spec, &mut result, snr, calib_noise, fft_half);
                filtered_power += out.filtered_power;
                spec_ratio.extend_from_slice(&out.spec_ratio);
                notch_bins.extend(out.notch_bins.iter().map(|b| b + hh * half));
                halves_filtered.push(out.filtered);
                halves_notched.push(out.notched);
            } else {
                filtered_power += result.raw_power;
                spec_ratio.extend(std::iter::repeat(1.0).take(half));
                halves_filtered.push(iq_half.to_vec());
                halves_notched.push(iq_half.to_vec());
            }
        }

        let mut filtered = vec![CZERO; n];
        let mut notched = vec![CZERO; n];
        combine_stag_iq(&halves_filtered[0], &halves_filtered[1], &mut filtered);
        combine_stag_iq(&halves_notched[0], &halves_notched[1], &mut notched);

        raw_power /= 2.0;
        filtered_power = (filtered_power / 2.0).max(POWER_FLOOR);
        spectral_noise /= 2.0;

        FilterOutput {
            filtered,
            notched,
            spec_ratio,
            notch_bins,
            raw_power,
            filtered_power,
            filter_ratio: raw_power / filtered_power,
            spectral_noise,
            spectral_snr: spectral_snr(spectral_noise, calib_noise),
            clutter_found,
        }
    }

    /// Regression filter for staggered PRT. The polynomial is fitted at
    /// the true staggered sample times; the spectral adjustment runs in
    /// the expanded pseudo-constant-PRT domain where the notch replicas
    /// sit at multiples of n/2.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_regression_stag_filter(
        &self,
        iq_combined: &[Complex64],
        calib_noise: f64,
        prt_secs: f64,
        antenna_rate_dps: f64,
        stag: &StagPrt,
        fft_expanded: &mut GateFft,
        regr: &RegressionFilter,
    ) -> FilterOutput {
        let n = iq_combined.len();
        let power_orig = mean_power(iq_combined);

        let mut residual = Vec::with_capacity(n);
        let order = self.select_order(iq_combined, calib_noise, prt_secs, antenna_rate_dps, regr);
        regr.apply(iq_combined, order, &mut residual);
        let power_regr = mean_power(&residual).max(POWER_FLOOR);

        let n_expanded = fft_expanded.size();
        let csr = (power_orig - power_regr) / power_regr;
        if csr < REGR_MIN_CSR {
            return FilterOutput::passthrough(iq_combined, n_expanded);
        }

        let mut orig_expanded = Vec::new();
        let mut regr_expanded = Vec::new();
        expand_stag_iq(iq_combined, stag.stag_m, stag.stag_n, &mut orig_expanded);
        expand_stag_iq(&residual, stag.stag_m, stag.stag_n, &mut regr_expanded);

        let mut orig_spec = Vec::with_capacity(n_expanded);
        let mut regr_spec = Vec::with_capacity(n_expanded);
        fft_expanded.forward(&orig_expanded, &mut orig_spec);
        fft_expanded.forward(&regr_expanded, &mut regr_spec);
        let orig_power_spec = scaled_power_spec(&orig_spec);
        let regr_power_spec = scaled_power_spec(&regr_spec);

        let mut interp_power_spec = regr_power_spec.clone();
        if self.config.regression_interp_across_notch {
            interp_across_stag_notches(&mut interp_power_spec, n, stag.stag_m, stag.stag_n);
        }
        let spectral_noise =
            compute_spectral_noise(&interp_power_spec, self.config.spectral_noise_segments);
        let snr = spectral_snr(spectral_noise, calib_noise);

        let raw_power = mean(&orig_power_spec);
        let filtered_power_pre = mean(&interp_power_spec);
        let correction = self.pwr_correction_ratio(
            snr,
            raw_power,
            filtered_power_pre,
            raw_power - filtered_power_pre,
            calib_noise,
        );

        let mut spec_ratio = vec![1.0; n_expanded];
        let mut filtered_spec = orig_spec.clone();
        for ii in 0..n_expanded {
            let target = (interp_power_spec[ii] * correction).max(0.0);
            let ratio = (target / orig_power_spec[ii].max(POWER_FLOOR)).sqrt();
            spec_ratio[ii] = ratio;
            filtered_spec[ii] *= ratio;
        }

        let mut filtered_expanded = Vec::with_capacity(n_expanded);
        fft_expanded.inverse(&filtered_spec, &mut filtered_expanded);
        let mut filtered = Vec::with_capacity(n);
        condense_stag_iq(&filtered_expanded, n, stag.stag_m, stag.stag_n, &mut filtered);
        let filtered_power = mean_power(&filtered).max(POWER_FLOOR);

        FilterOutput {
            filtered,
            notched: residual,
            spec_ratio,
            notch_bins: Vec::new(),
            raw_power: power_orig,
            filtered_power,
            filter_ratio: power_orig / filtered_power,
            spectral_noise,
            spectral_snr: snr,
            clutter_found: true,
        }
    }

    /// Apply the per-bin magnitude ratio from an already-filtered channel
    /// to another channel of the same gate, fixed PRT. Input is the
    /// windowed series of the secondary channel.
    pub fn apply_filter_ratio(
        &self,
        iq_windowed: &[Complex64],
        spec_ratio: &[f64],
        notch_bins: &[usize],
        fft: &mut GateFft,
    ) -> (Vec<Complex64>, Vec<Complex64>) {
        let n = iq_windowed.len();
        let mut spec = Vec::with_capacity(n);
        fft.forward(iq_windowed, &mut spec);

        let mut notched_spec = spec.clone();
        for &bin in notch_bins {
            notched_spec[bin] = CZERO;
        }
        for (bin, ratio) in spec.iter_mut().zip(spec_ratio.iter()) {
            *bin *= *ratio;
        }

        let mut filtered = Vec::with_capacity(n);
        let mut notched = Vec::with_capacity(n);
        fft.inverse(&spec, &mut filtered);
        fft.inverse(&notched_spec, &mut notched);
        (filtered, notched)
    }

    /// Secondary-channel ratio application for the staggered regression
    /// path: expand, scale in the pseudo-constant-PRT spectrum, condense.
    pub fn apply_filter_ratio_stag(
        &self,
        iq_combined: &[Complex64],
        spec_ratio: &[f64],
        stag: &StagPrt,
        fft_expanded: &mut GateFft,
    ) -> Vec<Complex64> {
        let n = iq_combined.len();
        let mut expanded = Vec::new();
        expand_stag_iq(iq_combined, stag.stag_m, stag.stag_n, &mut expanded);
        let mut spec = Vec::with_capacity(expanded.len());
        fft_expanded.forward(&expanded, &mut spec);
        for (bin, ratio) in spec.iter_mut().zip(spec_ratio.iter()) {
            *bin *= *ratio;
        }
        let mut filtered_expanded = Vec::with_capacity(expanded.len());
        fft_expanded.inverse(&spec, &mut filtered_expanded);
        let mut filtered = Vec::with_capacity(n);
        condense_stag_iq(&filtered_expanded, n, stag.stag_m, stag.stag_n, &mut filtered);
        filtered
    }

    /// Secondary-channel ratio application for the staggered adaptive
    /// path: the ratio vector holds the short-half bins followed by the
    /// long-half bins.
    pub fn apply_filter_ratio_stag_halves(
        &self,
        iq_combined: &[Complex64],
        spec_ratio: &[f64],
        fft_half: &mut GateFft,
    ) -> Vec<Complex64> {
        let n = iq_combined.len();
        let half = n / 2;
        let mut iq_short = vec![CZERO; half];
        let mut iq_long = vec![CZERO; half];
        separate_stag_iq(iq_combined, &mut iq_short, &mut iq_long);

        let mut halves = Vec::with_capacity(2);
        for (hh, iq_half) in [&iq_short, &iq_long].into_iter().enumerate() {
            let mut spec = Vec::with_capacity(half);
            fft_half.forward(iq_half, &mut spec);
            for (bin, ratio) in spec.iter_mut().zip(spec_ratio[hh * half..].iter()) {
                *bin *= *ratio;
            }
            let mut filtered_half = Vec::with_capacity(half);
            fft_half.inverse(&spec, &mut filtered_half);
            halves.push(filtered_half);
        }

        let mut filtered = vec![CZERO; n];
        combine_stag_iq(&halves[0], &halves[1], &mut filtered);
        filtered
    }

    /// Rebuild a time series from a power-spectrum filter result,
    /// applying the residue correction and capturing the notched series.
    fn rebuild_from_power(
        &self,
        spec: &[Complex64],
        raw_power_spec: &[f64],
        result: &mut super::spectra::SpectrumFilterResult,
        snr: f64,
        calib_noise: f64,
        fft: &mut GateFft,
    ) -> FilterOutput {
        let n = spec.len();
        let correction = self.pwr_correction_ratio(
            snr,
            result.raw_power,
            result.filtered_power,
            result.power_removed,
            calib_noise,
        );

        let mut spec_ratio = vec![1.0; n];
        let mut filtered_spec = spec.to_vec();
        let mut notched_spec = spec.to_vec();
        for ii in 0..n {
            let target = (result.filtered[ii] * correction).max(0.0);
            let ratio = (target / raw_power_spec[ii].max(POWER_FLOOR)).sqrt();
            spec_ratio[ii] = ratio;
            filtered_spec[ii] *= ratio;
        }
        for &bin in &result.notch_bins {
            notched_spec[bin] = CZERO;
        }

        let mut filtered = Vec::with_capacity(n);
        let mut notched = Vec::with_capacity(n);
        fft.inverse(&filtered_spec, &mut filtered);
        fft.inverse(&notched_spec, &mut notched);
        let filtered_power = mean_power(&filtered).max(POWER_FLOOR);

        FilterOutput {
            filtered,
            notched,
            spec_ratio,
            notch_bins: std::mem::take(&mut result.notch_bins),
            raw_power: result.raw_power,
            filtered_power,
            filter_ratio: result.raw_power / filtered_power,
            spectral_noise: result.spectral_noise,
            spectral_snr: snr,
            clutter_found: result.clutter_found,
        }
    }

    /// Polynomial order for the regression filter: the configured order,
    /// or derived from the clutter-to-noise ratio when configured as 0.
    fn select_order(
        &self,
        iq: &[Complex64],
        calib_noise: f64,
        prt_secs: f64,
        antenna_rate_dps: f64,
        regr: &RegressionFilter,
    ) -> usize {
        if self.config.regression_order > 0 {
            return self.config.regression_order;
        }
        // low-order pre-pass bounds the clutter power for the CNR
        let mut prefit = Vec::with_capacity(iq.len());
        regr.apply(iq, 3, &mut prefit);
        let clutter = (mean_power(iq) - mean_power(&prefit)).max(POWER_FLOOR);
        let cnr_db = 10.0 * (clutter / calib_noise.max(POWER_FLOOR)).log10();
        order_from_cnr(cnr_db, iq.len(), antenna_rate_dps, prt_secs)
    }

    /// Correction applied to the filtered power spectrum to account for
    /// clutter residue spread across the spectrum by the filter notch.
    fn pwr_correction_ratio(
        &self,
        spectral_snr: f64,
        raw_power: f64,
        _filtered_power: f64,
        power_removed: f64,
        calib_noise: f64,
    ) -> f64 {
        if !self.config.apply_spectral_residue_correction {
            return 1.0;
        }
        let noise = calib_noise.max(POWER_FLOOR);
        let snr_db = 10.0 * ((raw_power - noise).max(POWER_FLOOR) / noise).log10();
        if snr_db < self.config.min_snr_db_for_residue_correction {
            return 1.0;
        }

        if self.config.apply_db_for_db_correction {
            let diff_db = 10.0 * raw_power.max(POWER_FLOOR).log10()
                - 10.0 * (raw_power - power_removed).max(POWER_FLOOR).log10();
            let corr_db = diff_db * self.config.db_for_db_ratio
                + (diff_db - self.config.db_for_db_threshold).max(0.0);
            return 10.0_f64.powf(-corr_db / 10.0);
        }

        let filt = (raw_power - power_removed).max(POWER_FLOOR);
        let clut_2_wx_db = 10.0 * (power_removed.max(POWER_FLOOR) / filt).log10();
        let fraction = ((clut_2_wx_db - 6.0) / 6.0).clamp(0.0, 1.0);
        let residue_db = 10.0 * (1.0 / spectral_snr.max(POWER_FLOOR)).log10();
        10.0_f64.powf(residue_db * fraction / 10.0)
    }
}

fn scaled_power_spec(spec: &[Complex64]) -> Vec<f64> {
    let scale = 1.0 / spec.len().max(1) as f64;
    spec.iter().map(|c| c.norm_sqr() * scale).collect()
}

fn spectral_snr(spectral_noise: f64, calib_noise: f64) -> f64 {
    let noise = calib_noise.max(POWER_FLOOR);
    ((spectral_noise - noise) / noise).max(POWER_FLOOR)
}

fn mean(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return 0.0;
    }
    vals.iter().sum::<f64>() / vals.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClutterConfig;
    use crate::math::complex::phasor;
    use crate::math::window::WindowType;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    const NYQUIST: f64 = 25.0;
    const N: usize = 64;

    fn weather_tone(vel_frac: f64, amp: f64, rng: &mut StdRng) -> Vec<Complex64> {
        (0..N)
            .map(|ii| {
                let phase = PI * vel_frac * ii as f64;
                let noise = Complex64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5) * 0.01;
                phasor(phase) * amp + noise
            })
            .collect()
    }

    fn windowed(iq: &[Complex64]) -> Vec<Complex64> {
        let window = WindowType::VonHann.coefficients(iq.len());
        let mut out = Vec::new();
        apply_window(iq, &window, &mut out);
        out
    }

    #[test]
    fn adaptive_leaves_pure_weather_untouched() {
        let mut rng = StdRng::seed_from_u64(7);
        let iq = windowed(&weather_tone(0.5, 1.0, &mut rng));
        let bank = ClutterFilterBank::new(ClutterConfig::default(), NYQUIST);
        let mut fft = GateFft::new(N);
        let out = bank.apply_adaptive_filter(&iq, 1.0e-6, &mut fft);
        assert!(!out.clutter_found);
        assert!((out.filter_ratio - 1.0).abs() < 1e-9);
        for (a, b) in iq.iter().zip(out.filtered.iter()) {
            assert!((a - b).norm() < 1e-9);
        }
    }

    #[test]
    fn adaptive_removes_zero_doppler_clutter() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut iq = weather_tone(0.5, 1.0, &mut rng);
        for sample in iq.iter_mut() {
            *sample += Complex64::new(30.0, 0.0);
        }
        let iqw = windowed(&iq);
        let bank = ClutterFilterBank::new(ClutterConfig::default(), NYQUIST);
        let mut fft = GateFft::new(N);
        let out = bank.apply_adaptive_filter(&iqw, 1.0e-6, &mut fft);
        assert!(out.clutter_found);
        // clutter power ~900, weather ~1: nearly all power removed
        assert!(out.filter_ratio > 100.0, "ratio {}", out.filter_ratio);
        // the weather tone survives
        let residual = mean_power(&out.filtered);
        assert!(residual > 0.3 && residual < 3.0, "residual {}", residual);
    }

    #[test]
    fn notch_filter_always_removes_dc() {
        let iq: Vec<Complex64> = vec![Complex64::new(5.0, 0.0); N];
        let iqw = windowed(&iq);
        let bank = ClutterFilterBank::new(ClutterConfig::default(), NYQUIST);
        let mut fft = GateFft::new(N);
        let out = bank.apply_notch_filter(&iqw, 1.0e-6, &mut fft);
        assert!(out.filter_ratio > 10.0);
        assert!(!out.notch_bins.is_empty());
    }

    #[test]
    fn regression_passes_weather_filters_clutter() {
        let mut rng = StdRng::seed_from_u64(13);
        let window = WindowType::VonHann.coefficients(N);
        let bank = ClutterFilterBank::new(ClutterConfig::default(), NYQUIST);
        let mut fft = GateFft::new(N);
        let regr = RegressionFilter::new(N, 18);

        // weather alone: csr below threshold, passthrough
        let weather = weather_tone(0.5, 1.0, &mut rng);
        let out = bank.apply_regression_filter(&weather, &window, 1.0e-6, 0.001, 10.0, &mut fft, &regr);
        assert!(!out.clutter_found);

        // weather plus strong clutter
        let mut iq = weather;
        for sample in iq.iter_mut() {
            *sample += Complex64::new(30.0, 0.0);
        }
        let out = bank.apply_regression_filter(&iq, &window, 1.0e-6, 0.001, 10.0, &mut fft, &regr);
        assert!(out.clutter_found);
        assert!(out.filter_ratio > 50.0, "ratio {}", out.filter_ratio);
    }

    #[test]
    fn filter_ratio_reproduces_primary_channel() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut iq = weather_tone(0.5, 1.0, &mut rng);
        for sample in iq.iter_mut() {
            *sample += Complex64::new(20.0, 0.0);
        }
        let iqw = windowed(&iq);
        let bank = ClutterFilterBank::new(ClutterConfig::default(), NYQUIST);
        let mut fft = GateFft::new(N);
        let out = bank.apply_adaptive_filter(&iqw, 1.0e-6, &mut fft);
        let (again, _notched) =
            bank.apply_filter_ratio(&iqw, &out.spec_ratio, &out.notch_bins, &mut fft);
        for (a, b) in out.filtered.iter().zip(again.iter()) {
            assert!((a - b).norm() < 1e-9);
        }
    }

    #[test]
    fn stag_adaptive_filters_both_halves() {
        let stag = StagPrt::new(0.001, 0.0015, 2, 3, 800, 600, 0.10);
        let mut rng = StdRng::seed_from_u64(19);
        let mut iq = weather_tone(0.3, 1.0, &mut rng);
        for sample in iq.iter_mut() {
            *sample += Complex64::new(25.0, 0.0);
        }
        let bank = ClutterFilterBank::new(ClutterConfig::default(), stag.nyquist);
        let mut fft_half = GateFft::new(N / 2);
        let out = bank.apply_adaptive_stag_filter(&iq, 1.0e-6, &stag, &mut fft_half);
        assert!(out.clutter_found);
        assert!(out.filter_ratio > 50.0, "ratio {}", out.filter_ratio);
        assert_eq!(out.filtered.len(), N);
        assert_eq!(out.spec_ratio.len(), N);
    }
}
