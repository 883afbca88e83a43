//! Synthetic dwell generator.
//!
//! Builds gate time series with a Gaussian Doppler spectrum: weather at a
//! configurable velocity and width, optional zero-Doppler ground clutter,
//! and thermal noise at the calibrated floor. Spectra are synthesized as a
//! sum of tones with random phases, so the ensemble power and spectrum
//! shape are exact while each dwell is an independent realization.

use momentscore::beam::Pulse;
use momentscore::config::XmitRcvMode;
use num_complex::Complex64;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f64::consts::PI;

use crate::workflow::config::{ScenarioConfig, WorkflowConfig};

/// Cross-polar leakage applied to the cross channels, linear power.
const LDR_LINEAR: f64 = 0.001;

pub struct DwellGenerator {
    rng: StdRng,
    n_samples: usize,
    prt_secs: f64,
    wavelength_m: f64,
    nyquist: f64,
    noise_power: f64,
    scenario: ScenarioConfig,
}

impl DwellGenerator {
    pub fn new(config: &WorkflowConfig, wavelength_m: f64, noise_dbm: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            n_samples: config.n_samples,
            prt_secs: config.prt_secs,
            wavelength_m,
            nyquist: wavelength_m / (4.0 * config.prt_secs),
            noise_power: 10.0_f64.powf(noise_dbm / 10.0),
            scenario: config.scenario.clone(),
        }
    }

    pub fn nyquist(&self) -> f64 {
        self.nyquist
    }

    /// One dwell of pulses for every gate and channel of the given mode.
    pub fn dwell(&mut self, mode: XmitRcvMode, n_gates: usize) -> Vec<Pulse> {
        let n_channels = match mode {
            XmitRcvMode::SinglePol | XmitRcvMode::SinglePolV => 1,
            _ => 2,
        };
        let cross_secondary = matches!(mode, XmitRcvMode::DpHOnly | XmitRcvMode::DpVOnly);

        // per-gate series for each channel
        let mut chan_gate: Vec<Vec<Vec<Complex64>>> = Vec::with_capacity(n_channels);
        for chan in 0..n_channels {
            let mut gates = Vec::with_capacity(n_gates);
            for gate_num in 0..n_gates {
                let weak = chan == 1 && cross_secondary;
                gates.push(self.gate_series(gate_num, weak));
            }
            chan_gate.push(gates);
        }

        (0..self.n_samples)
            .map(|pp| Pulse {
                time_secs: pp as f64 * self.prt_secs,
                chan_iq: (0..n_channels)
                    .map(|chan| (0..n_gates).map(|gg| chan_gate[chan][gg][pp]).collect())
                    .collect(),
            })
            .collect()
    }

    fn gate_series(&mut self, gate_num: usize, cross_polar: bool) -> Vec<Complex64> {
        let scenario = self.scenario.clone();
        let weather_power = self.noise_power * 10.0_f64.powf(scenario.weather_snr_db / 10.0);
        let signal_power = if cross_polar {
            weather_power * LDR_LINEAR
        } else {
            weather_power
        };

        let mut series = self.gaussian_spectrum_series(
            scenario.weather_vel_mps,
            scenario.weather_width_mps,
            signal_power,
        );
        let clutter = gate_num >= scenario.clutter_gate_start
            && gate_num < scenario.clutter_gate_start + scenario.clutter_gate_count;
        if clutter && !cross_polar {
            let clutter_power = weather_power * 10.0_f64.powf(scenario.clutter_csr_db / 10.0);
            let clutter_series = self.gaussian_spectrum_series(0.0, 0.25, clutter_power);
            for (sample, cc) in series.iter_mut().zip(clutter_series) {
                *sample += cc;
            }
        }
        let noise = self.noise_series(self.noise_power);
        for (sample, nn) in series.iter_mut().zip(noise) {
            *sample += nn;
        }
        series
    }

    /// Sum of tones across the velocity grid, weighted by a Gaussian
    /// envelope and given independent random phases. Positive velocity is
    /// away from the radar, so tone phase decreases pulse to pulse.
    fn gaussian_spectrum_series(&mut self, vel: f64, width: f64, power: f64) -> Vec<Complex64> {
        let n = self.n_samples;
        let bin_width = 2.0 * self.nyquist / n as f64;
        let sigma = width.max(bin_width / 4.0);

        let mut weights = Vec::with_capacity(n);
        let mut total = 0.0;
        for kk in 0..n {
            let vk = -self.nyquist + (kk as f64 + 0.5) * bin_width;
            // fold the envelope so spectra near the nyquist wrap cleanly
            let mut gg = 0.0;
            for fold in [-2.0, 0.0, 2.0] {
                let dd = vk - vel + fold * self.nyquist;
                gg += (-dd * dd / (2.0 * sigma * sigma)).exp();
            }
            weights.push(gg);
            total += gg;
        }

        let mut series = vec![Complex64::new(0.0, 0.0); n];
        for kk in 0..n {
            if weights[kk] <= 0.0 {
                continue;
            }
            let amp = (power * weights[kk] / total).sqrt();
            let phase0 = self.rng.gen::<f64>() * 2.0 * PI;
            let vk = -self.nyquist + (kk as f64 + 0.5) * bin_width;
            let omega = -4.0 * PI * vk / self.wavelength_m;
            for (pp, sample) in series.iter_mut().enumerate() {
                let phase = phase0 + omega * pp as f64 * self.prt_secs;
                *sample += Complex64::new(phase.cos(), phase.sin()) * amp;
            }
        }
        series
    }

    fn noise_series(&mut self, power: f64) -> Vec<Complex64> {
        let sigma = (power / 2.0).sqrt();
        (0..self.n_samples)
            .map(|_| Complex64::new(self.gaussian() * sigma, self.gaussian() * sigma))
            .collect()
    }

    /// Box-Muller standard normal deviate.
    fn gaussian(&mut self) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::config::WorkflowConfig;

    fn mean_power(series: &[Complex64]) -> f64 {
        series.iter().map(|s| s.norm_sqr()).sum::<f64>() / series.len() as f64
    }

    #[test]
    fn weather_series_carries_the_configured_power() {
        let config = WorkflowConfig::default();
        let mut generator = DwellGenerator::new(&config, 0.10, -77.0);
        let noise_power = 10.0_f64.powf(-7.7);
        let expected = noise_power * 10.0_f64.powf(config.scenario.weather_snr_db / 10.0);

        let series = generator.gaussian_spectrum_series(
            config.scenario.weather_vel_mps,
            config.scenario.weather_width_mps,
            expected,
        );
        let power = mean_power(&series);
        // random phases: power is exact in ensemble, loose per dwell
        assert!(power > expected * 0.2 && power < expected * 5.0);
    }

    #[test]
    fn dwell_has_expected_shape() {
        let config = WorkflowConfig::default();
        let mut generator = DwellGenerator::new(&config, 0.10, -77.0);
        let pulses = generator.dwell(XmitRcvMode::DpSimHv, 16);
        assert_eq!(pulses.len(), config.n_samples);
        assert_eq!(pulses[0].chan_iq.len(), 2);
        assert_eq!(pulses[0].chan_iq[0].len(), 16);
    }

    #[test]
    fn clutter_gates_are_much_stronger() {
        let mut config = WorkflowConfig::default();
        config.scenario.clutter_gate_start = 4;
        config.scenario.clutter_gate_count = 2;
        config.scenario.clutter_csr_db = 30.0;
        let mut generator = DwellGenerator::new(&config, 0.10, -77.0);
        let clear = generator.gate_series(0, false);
        let cluttered = generator.gate_series(4, false);
        assert!(mean_power(&cluttered) > mean_power(&clear) * 10.0);
    }
}
