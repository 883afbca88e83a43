//! Polynomial regression clutter filter.
//!
//! Fits an orthogonal polynomial (Forsythe basis) to the raw I/Q series
//! and subtracts the fit, removing the slowly-varying clutter component
//! while leaving the weather signal. The basis is built once per dwell
//! geometry and reused across gates.

use ndarray::Array2;
use num_complex::Complex64;

/// Orthonormal polynomial basis over the sample times of a dwell.
///
/// Rows are the basis polynomials for orders 0..=max_order, evaluated at
/// the (possibly non-uniform) sample times. Each row has unit norm and is
/// orthogonal to the rows below it, so projection is a plain dot product.
#[derive(Debug, Clone)]
pub struct RegressionFilter {
    n_samples: usize,
    max_order: usize,
    basis: Array2<f64>,
}

impl RegressionFilter {
    /// Basis for a fixed-PRT dwell: uniform sample times.
    pub fn new(n_samples: usize, max_order: usize) -> Self {
        let times: Vec<f64> = (0..n_samples).map(|ii| ii as f64).collect();
        Self::from_times(&times, max_order)
    }

    /// Basis for a staggered-PRT dwell. Sample times alternate short and
    /// long intervals, in integer units of the PRT greatest common
    /// divisor: 0, m, m+n, 2m+n, ...
    pub fn new_staggered(n_samples: usize, stag_m: i64, stag_n: i64, max_order: usize) -> Self {
        let mut times = Vec::with_capacity(n_samples);
        let mut tt = 0i64;
        for ii in 0..n_samples {
            times.push(tt as f64);
            tt += if ii % 2 == 0 { stag_m } else { stag_n };
        }
        Self::from_times(&times, max_order)
    }

    fn from_times(times: &[f64], max_order: usize) -> Self {
        let n = times.len();
        let max_order = max_order.min(n.saturating_sub(2)).max(0);

        // center the times to keep the recurrence well conditioned
        let t_mean = times.iter().sum::<f64>() / n.max(1) as f64;
        let tt: Vec<f64> = times.iter().map(|t| t - t_mean).collect();

        // Forsythe three-term recurrence with explicit re-orthogonalization
        let mut basis = Array2::<f64>::zeros((max_order + 1, n));
        for order in 0..=max_order {
            let mut row: Vec<f64> = if order == 0 {
                vec![1.0; n]
            } else {
                (0..n)
                    .map(|jj| tt[jj] * basis[(order - 1, jj)])
                    .collect()
            };
            // remove components along the lower-order rows
            for prev in 0..order {
                let dot: f64 = (0..n).map(|jj| row[jj] * basis[(prev, jj)]).sum();
                for jj in 0..n {
                    row[jj] -= dot * basis[(prev, jj)];
                }
            }
            let norm: f64 = row.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                for val in row.iter_mut() {
                    *val /= norm;
                }
            }
            for jj in 0..n {
                basis[(order, jj)] = row[jj];
            }
        }

        Self {
            n_samples: n,
            max_order,
            basis,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    /// Subtract the polynomial fit of the given order from `iq`,
    /// writing the residual into `out`. The input must not be windowed;
    /// the polynomial fit assumes the raw time series.
    pub fn apply(&self, iq: &[Complex64], order: usize, out: &mut Vec<Complex64>) {
        out.clear();
        out.extend_from_slice(iq);
        let n = iq.len().min(self.n_samples);
        if n < 3 {
            return;
        }
        let order = order.min(self.max_order);
        for kk in 0..=order {
            let mut dot = Complex64::new(0.0, 0.0);
            for jj in 0..n {
                dot += iq[jj] * self.basis[(kk, jj)];
            }
            for jj in 0..n {
                out[jj] -= dot * self.basis[(kk, jj)];
            }
        }
    }
}

/// Polynomial order from the clutter-to-noise ratio, used when the
/// configured order is 0 (automatic). Stronger clutter needs a higher
/// order to be fitted out; the order grows roughly as the square root
/// of the sample count scaled by the CNR in dB.
pub fn order_from_cnr(cnr_db: f64, n_samples: usize, antenna_rate_dps: f64, prt_secs: f64) -> usize {
    if cnr_db <= 0.0 {
        return 3;
    }
    // normalized clutter width from the antenna motion
    let wc = (antenna_rate_dps.abs().max(0.1) * prt_secs * n_samples as f64) / 360.0;
    let order = (1.0 + 0.66 * wc.sqrt() * (cnr_db + 6.0)) as usize;
    order.clamp(3, n_samples.saturating_sub(2).max(3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::complex::mean_power;
    use std::f64::consts::PI;

    #[test]
    fn basis_rows_are_orthonormal() {
        let regr = RegressionFilter::new(32, 5);
        for aa in 0..=5 {
            for bb in 0..=5 {
                let dot: f64 = (0..32).map(|jj| regr.basis[(aa, jj)] * regr.basis[(bb, jj)]).sum();
                let expected = if aa == bb { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-9, "rows {} {}: {}", aa, bb, dot);
            }
        }
    }

    #[test]
    fn removes_constant_clutter_keeps_doppler_signal() {
        let n = 64;
        let regr = RegressionFilter::new(n, 5);
        // strong DC clutter plus a weather tone at half nyquist
        let iq: Vec<Complex64> = (0..n)
            .map(|ii| {
                let phase = PI * 0.5 * ii as f64;
                Complex64::new(100.0, 0.0)
                    + Complex64::new(phase.cos(), phase.sin())
            })
            .collect();
        let mut out = Vec::new();
        regr.apply(&iq, 3, &mut out);
        let residual = mean_power(&out);
        // clutter power 10000 removed, weather power ~1 retained
        assert!(residual < 2.0, "residual {}", residual);
        assert!(residual > 0.5, "residual {}", residual);
    }

    #[test]
    fn staggered_basis_matches_sample_count() {
        let regr = RegressionFilter::new_staggered(64, 2, 3, 5);
        assert_eq!(regr.n_samples(), 64);
        let dot: f64 = (0..64).map(|jj| regr.basis[(0, jj)] * regr.basis[(1, jj)]).sum();
        assert!(dot.abs() < 1e-9);
    }

    #[test]
    fn order_from_cnr_grows_with_clutter() {
        let low = order_from_cnr(10.0, 64, 10.0, 0.001);
        let high = order_from_cnr(50.0, 64, 10.0, 0.001);
        assert!(high >= low);
        assert!(low >= 3);
    }
}
