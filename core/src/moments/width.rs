//! Spectrum-width estimators built on lag-covariance magnitude ratios.
//!
//! Each estimator returns a width in m/s, normalized against the Nyquist
//! velocity and clamped non-negative. The hybrid estimator switches between
//! the ratio estimators based on sample-count dependent cutoffs.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::prelude::constrain;

// hybrid cutoff tables, indexed by sample count
const NPS: [usize; 17] = [
    23, 24, 25, 30, 35, 40, 45, 50, 55, 58, 59, 70, 80, 100, 150, 200, 300,
];
const HIGH_CUTOFF: [f64; 17] = [
    -1.0, -1.0, 0.161, 0.163, 0.165, 0.168, 0.17, 0.171, 0.173, 0.174, 0.174, 0.176, 0.177, 0.179,
    0.184, 0.185, 0.189,
];
const LOW_CUTOFF: [f64; 17] = [
    -1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0, 0.073, 0.074, 0.072, 0.073, 0.073,
    0.074, 0.074,
];

// least-squares fit constants for the r0/r1/r2 estimator
const PPLS_C1: f64 = -5.0 / 26.0;
const PPLS_C2: f64 = -1.0 / 13.0;
const PPLS_C3: f64 = 7.0 / 26.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WidthMethod {
    R0R1,
    R1R2,
    Hybrid,
}

impl Default for WidthMethod {
    fn default() -> Self {
        WidthMethod::Hybrid
    }
}

pub fn width_r0r1(r0: f64, r1: f64, nyquist: f64) -> f64 {
    let mut r0r1 = 0.0;
    if r0 > r1 {
        r0r1 = (2.0 * (r0 / r1).ln()).sqrt() / PI;
    }
    constrain(r0r1, 0.0, 1.0) * nyquist
}

pub fn width_r1r2(r1: f64, r2: f64, nyquist: f64) -> f64 {
    let mut r1r2 = 0.0;
    if r1 > r2 {
        r1r2 = (0.6667 * (r1 / r2).ln()).sqrt() / PI;
    }
    constrain(r1r2, 0.0, 1.0) * nyquist
}

pub fn width_r1r3(r1: f64, r3: f64, nyquist: f64) -> f64 {
    let mut r1r3 = 0.0;
    if r1 > r3 {
        r1r3 = (0.25 * (r1 / r3).ln()).sqrt() / PI;
    }
    constrain(r1r3, 0.0, 1.0) * nyquist
}

/// Least-squares width from lags 0, 1 and 2.
pub fn width_ppls(r0: f64, r1: f64, r2: f64, nyquist: f64) -> f64 {
    let qq = PPLS_C1 * r0.ln() + PPLS_C2 * r1.ln() + PPLS_C3 * r2.ln();
    let mut r0r1r2 = 0.0;
    if qq < 0.0 {
        r0r1r2 = (-2.0 * qq).sqrt() / PI;
    }
    constrain(r0r1r2, 0.0, 1.0) * nyquist
}

/// Hybrid estimator: picks among the ratio estimators using cutoffs that
/// depend on the number of samples in the dwell.
pub fn width_hybrid(
    method: WidthMethod,
    n_samples: usize,
    r0: f64,
    r1: f64,
    r2: f64,
    r3: f64,
    nyquist: f64,
) -> f64 {
    let r0r1 = width_r0r1(r0, r1, nyquist) / nyquist;
    if method == WidthMethod::R0R1 {
        return r0r1 * nyquist;
    }

    let r1r2 = width_r1r2(r1, r2, nyquist) / nyquist;
    if method == WidthMethod::R1R2 {
        return r1r2 * nyquist;
    }

    let r1r3 = width_r1r3(r1, r3, nyquist) / nyquist;
    let r0r1r2 = width_ppls(r0, r1, r2, nyquist) / nyquist;

    let mut table_ind = NPS.len() - 1;
    for (kk, &np) in NPS.iter().enumerate() {
        if np > n_samples {
            table_ind = kk;
            break;
        }
    }

    let hybrid_high = (r0r1 + r0r1r2) / 2.0;

    let width = if hybrid_high > HIGH_CUTOFF[table_ind] {
        r0r1 * nyquist
    } else if r1r3 < LOW_CUTOFF[table_ind] {
        r1r3 * nyquist
    } else if r1r2 != 0.0 {
        r1r2 * nyquist
    } else {
        r0r1r2 * nyquist
    };

    constrain(width, 0.0, nyquist)
}

/// Width from two arbitrary lags of a staggered-PRT series.
pub fn width_stag(r_a: f64, r_b: f64, lag_a: i64, lag_b: i64, nyquist: f64) -> f64 {
    let factor = nyquist / (PI * (((lag_b * lag_b - lag_a * lag_a) as f64) / 2.0).sqrt());
    let mut ratio = 0.0;
    if r_a > r_b {
        ratio = (r_a / r_b).ln().sqrt();
    }
    ratio * factor
}

#[cfg(test)]
mod tests {
    use super::*;

    // gaussian spectrum model: r(l) = r0 * exp(-l^2 * pi^2 * w^2 / 2)
    // with w normalized by nyquist
    fn gaussian_lag(r0: f64, lag: f64, norm_width: f64) -> f64 {
        r0 * (-(lag * lag) * PI * PI * norm_width * norm_width / 2.0).exp()
    }

    #[test]
    fn r0r1_recovers_gaussian_width() {
        let nyquist = 25.0;
        let true_width = 3.0;
        let nw = true_width / nyquist;
        let r0 = 100.0;
        let r1 = gaussian_lag(r0, 1.0, nw);
        let est = width_r0r1(r0, r1, nyquist);
        assert!((est - true_width).abs() < 0.01, "est {}", est);
    }

    #[test]
    fn r1r2_recovers_gaussian_width() {
        let nyquist = 25.0;
        let true_width = 4.0;
        let nw = true_width / nyquist;
        let r1 = gaussian_lag(80.0, 1.0, nw);
        let r2 = gaussian_lag(80.0, 2.0, nw);
        let est = width_r1r2(r1, r2, nyquist);
        // 0.6667 approximates 2/3
        assert!((est - true_width).abs() < 0.05, "est {}", est);
    }

    #[test]
    fn zero_numerator_ratio_gives_zero_width() {
        assert_eq!(width_r0r1(1.0, 2.0, 25.0), 0.0);
        assert_eq!(width_r1r3(0.5, 0.5, 25.0), 0.0);
    }

    #[test]
    fn hybrid_is_bounded_by_nyquist() {
        let nyquist = 20.0;
        let w = width_hybrid(WidthMethod::Hybrid, 64, 100.0, 1e-6, 1e-8, 1e-9, nyquist);
        assert!(w >= 0.0 && w <= nyquist);
    }

    #[test]
    fn stag_width_recovers_gaussian_width() {
        // staggered 2/3: lags 2 and 3 of the combined series
        let nyquist = 30.0;
        let true_width = 2.5;
        let nw = true_width / nyquist;
        let r2 = gaussian_lag(50.0, 2.0, nw);
        let r3 = gaussian_lag(50.0, 3.0, nw);
        let est = width_stag(r2, r3, 2, 3, nyquist);
        assert!((est - true_width).abs() < 0.01, "est {}", est);
    }
}
