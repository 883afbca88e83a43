//! Staggered-PRT support: series reshaping, the dealiasing lookup table
//! and the short/long covariance set.
//!
//! The dwell alternates short and long PRTs (short first). Velocity is
//! estimated separately from the short-spacing and long-spacing lag-1
//! phases and unfolded with the Torres P lookup, which extends the
//! unambiguous interval by the stagger factor m.

use num_complex::Complex64;

use crate::math::complex::{mean_conjugate_product, mean_power};

const CZERO: Complex64 = Complex64::new(0.0, 0.0);

/// Derived constants for a staggered m/n PRT pair.
#[derive(Debug, Clone)]
pub struct StagPrt {
    pub prt_short: f64,
    pub prt_long: f64,
    pub stag_m: i64,
    pub stag_n: i64,
    pub n_gates_prt_short: usize,
    pub n_gates_prt_long: usize,
    pub nyquist_prt_short: f64,
    pub nyquist_prt_long: f64,
    pub nyquist_short_plus_long: f64,
    pub nyquist_stag_nominal: f64,
    /// Extended nyquist after unfolding.
    pub nyquist: f64,
    half_intervals: i64,
    // unfold factors indexed by interval offset from -half_intervals
    pp: Vec<i64>,
}

impl StagPrt {
    pub fn new(
        prt_short: f64,
        prt_long: f64,
        stag_m: i64,
        stag_n: i64,
        n_gates_prt_short: usize,
        n_gates_prt_long: usize,
        wavelength_m: f64,
    ) -> Self {
        let nyquist_prt_short = (wavelength_m / prt_short) / 4.0;
        let nyquist_prt_long = (wavelength_m / prt_long) / 4.0;
        let nyquist_short_plus_long = (wavelength_m / (prt_short + prt_long)) / 4.0;
        let nyquist_stag_nominal = (wavelength_m / (prt_short / stag_m as f64)) / 4.0;
        let nyquist = nyquist_prt_short * stag_m as f64;

        // dealiasing lookup, Torres et al, JTech Sept 2004
        let mut half_intervals = (stag_m + stag_n - 1) / 2;
        if half_intervals > 5 {
            half_intervals = 2;
        }
        let size = (2 * half_intervals + 1) as usize;
        let mut pp = vec![0i64; size];
        let mut cc: i64 = 0;
        let mut p: i64 = 0;
        for ll in 1..=half_intervals {
            if ll % 2 == 0 {
                cc -= stag_n;
                p += 1;
            } else {
                cc += stag_m;
            }
            if cc.abs() <= half_intervals {
                pp[(cc + half_intervals) as usize] = p;
                pp[(-cc + half_intervals) as usize] = -p;
            }
        }

        Self {
            prt_short,
            prt_long,
            stag_m,
            stag_n,
            n_gates_prt_short,
            n_gates_prt_long,
            nyquist_prt_short,
            nyquist_prt_long,
            nyquist_short_plus_long,
            nyquist_stag_nominal,
            nyquist,
            half_intervals,
            pp,
        }
    }

    /// Unfold the short-PRT velocity using the short/long difference.
    ///
    /// Returns the unfolded velocity and the unfold interval applied.
    pub fn dealias(&self, vel_prt_short: f64, vel_prt_long: f64) -> (f64, i64) {
        let vel_diff = vel_prt_short - vel_prt_long;
        let nyquist_diff = self.nyquist_prt_short - self.nyquist_prt_long;
        let interval_short = (vel_diff / nyquist_diff) / 2.0;
        let mut ll = (interval_short + 0.5).floor() as i64;
        if ll < -self.half_intervals {
            ll = -self.half_intervals;
        } else if ll > self.half_intervals {
            ll = self.half_intervals;
        }
        let unfold = self.pp[(ll + self.half_intervals) as usize];
        let unfolded = vel_prt_short + unfold as f64 * self.nyquist_prt_short * 2.0;
        (unfolded, unfold)
    }
}

/// Split a combined staggered series (short first) into its short-PRT and
/// long-PRT halves. The combined length must be even.
pub fn separate_stag_iq(iq: &[Complex64], iq_short: &mut [Complex64], iq_long: &mut [Complex64]) {
    let half = iq.len() / 2;
    for ii in 0..half {
        iq_short[ii] = iq[2 * ii];
        iq_long[ii] = iq[2 * ii + 1];
    }
}

/// Interleave short/long halves back into a combined series.
pub fn combine_stag_iq(iq_short: &[Complex64], iq_long: &[Complex64], iq: &mut [Complex64]) {
    let half = iq.len() / 2;
    for ii in 0..half {
        iq[2 * ii] = iq_short[ii];
        iq[2 * ii + 1] = iq_long[ii];
    }
}

/// Length of the pseudo-constant-PRT expansion of a staggered dwell.
pub fn expanded_len(n_samples: usize, stag_m: i64, stag_n: i64) -> usize {
    (n_samples / 2) * (stag_m + stag_n) as usize
}

/// Expand a staggered series by inserting zeros, forming a constant-PRT
/// series at the nominal PRT (prt_short / m).
pub fn expand_stag_iq(iq: &[Complex64], stag_m: i64, stag_n: i64, expanded: &mut Vec<Complex64>) {
    let n_exp = expanded_len(iq.len(), stag_m, stag_n);
    expanded.clear();
    expanded.resize(n_exp, CZERO);
    let mut kk = 0usize;
    for (ii, sample) in iq.iter().enumerate() {
        expanded[kk] = *sample;
        kk += if ii % 2 == 0 {
            stag_m as usize
        } else {
            stag_n as usize
        };
    }
}

/// Pull the samples at the original staggered times back out of an
/// expanded series.
pub fn condense_stag_iq(
    expanded: &[Complex64],
    n_samples: usize,
    stag_m: i64,
    stag_n: i64,
    condensed: &mut Vec<Complex64>,
) {
    condensed.clear();
    condensed.reserve(n_samples);
    let mut kk = 0usize;
    for ii in 0..n_samples {
        condensed.push(expanded[kk]);
        kk += if ii % 2 == 0 {
            stag_m as usize
        } else {
            stag_n as usize
        };
    }
}

/// Covariances of one channel of a staggered dwell.
#[derive(Debug, Clone, Copy, Default)]
pub struct StagCovars {
    pub lag0_short: f64,
    pub lag0_long: f64,
    /// Lag 1 within the short sub-series (spacing short+long).
    pub lag1_short: Complex64,
    /// Lag 1 within the long sub-series (spacing short+long).
    pub lag1_long: Complex64,
    /// Short pulse to the following long pulse (spacing prt_short).
    pub lag1_short_to_long: Complex64,
    /// Long pulse to the following short pulse (spacing prt_long).
    pub lag1_long_to_short: Complex64,
}

impl StagCovars {
    pub fn compute(iq_short: &[Complex64], iq_long: &[Complex64]) -> Self {
        let half = iq_short.len().min(iq_long.len());
        if half < 2 {
            return Self::default();
        }
        let nn = half - 1;
        Self {
            lag0_short: mean_power(&iq_short[..nn]),
            lag0_long: mean_power(&iq_long[..nn]),
            lag1_short: mean_conjugate_product(&iq_short[1..=nn], &iq_short[..nn]),
            lag1_long: mean_conjugate_product(&iq_long[1..=nn], &iq_long[..nn]),
            lag1_short_to_long: mean_conjugate_product(&iq_short[..nn], &iq_long[..nn]),
            lag1_long_to_short: mean_conjugate_product(&iq_long[..nn], &iq_short[1..=nn]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::complex::phasor;
    use std::f64::consts::PI;

    fn stag23() -> StagPrt {
        // 10 cm wavelength, 1 ms / 1.5 ms stagger
        StagPrt::new(0.001, 0.0015, 2, 3, 800, 600, 0.10)
    }

    #[test]
    fn nyquist_extends_by_stagger_factor() {
        let stag = stag23();
        assert!((stag.nyquist_prt_short - 25.0).abs() < 1e-9);
        assert!((stag.nyquist - 50.0).abs() < 1e-9);
    }

    #[test]
    fn separate_then_combine_round_trips() {
        let iq: Vec<Complex64> = (0..16).map(|ii| phasor(0.3 * ii as f64)).collect();
        let mut short = vec![CZERO; 8];
        let mut long = vec![CZERO; 8];
        separate_stag_iq(&iq, &mut short, &mut long);
        assert_eq!(short[0], iq[0]);
        assert_eq!(long[0], iq[1]);
        let mut back = vec![CZERO; 16];
        combine_stag_iq(&short, &long, &mut back);
        assert_eq!(back, iq);
    }

    #[test]
    fn expand_then_condense_round_trips() {
        let iq: Vec<Complex64> = (0..12).map(|ii| phasor(0.4 * ii as f64)).collect();
        let mut expanded = Vec::new();
        expand_stag_iq(&iq, 2, 3, &mut expanded);
        assert_eq!(expanded.len(), expanded_len(12, 2, 3));
        let mut condensed = Vec::new();
        condense_stag_iq(&expanded, 12, 2, 3, &mut condensed);
        assert_eq!(condensed, iq);
    }

    #[test]
    fn dealias_is_identity_inside_short_nyquist() {
        let stag = stag23();
        // target 10 m/s, within the short-PRT nyquist of 25
        let vel_short = 10.0;
        let vel_long = 10.0;
        let (unfolded, interval) = stag.dealias(vel_short, vel_long);
        assert_eq!(interval, 0);
        assert!((unfolded - 10.0).abs() < 1e-9);
    }

    #[test]
    fn dealias_unfolds_velocity_beyond_short_nyquist() {
        let stag = stag23();
        // true velocity 40 m/s: short-PRT alias 40-50=-10,
        // long-PRT nyquist 50/3, alias 40 - 2*(50/3) = 20/3
        let vel_short = -10.0;
        let vel_long = 40.0 - 2.0 * stag.nyquist_prt_long;
        let (unfolded, _) = stag.dealias(vel_short, vel_long);
        assert!((unfolded - 40.0).abs() < 1e-6, "unfolded {}", unfolded);
    }

    #[test]
    fn stag_covars_phases_match_prt_spacings() {
        // uniform doppler at 8 m/s with 10 cm wavelength
        let vel = 8.0;
        let wavelength = 0.10;
        let prt_short = 0.001;
        let prt_long = 0.0015;
        let omega = -4.0 * PI * vel / wavelength;
        // build combined series then separate
        let mut time = 0.0;
        let mut combined = Vec::new();
        for ii in 0..32 {
            combined.push(phasor(omega * time));
            time += if ii % 2 == 0 { prt_short } else { prt_long };
        }
        let mut short = vec![CZERO; 16];
        let mut long = vec![CZERO; 16];
        separate_stag_iq(&combined, &mut short, &mut long);
        let covars = StagCovars::compute(&short, &long);
        // short_to_long spans prt_short
        let expected_short = omega * prt_short;
        let diff = (covars.lag1_short_to_long.arg() - (-expected_short)).abs();
        // lag1_short_to_long = short * conj(long) so the sign flips
        assert!(diff < 1e-9 || (diff - 2.0 * PI).abs() < 1e-9);
    }
}
