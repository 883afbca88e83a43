//! FFT wrapper around the `rustfft` planner, sized per dwell length.
//!
//! Planner construction is not assumed reentrant, so first-time planning is
//! serialized behind a process-wide mutex. Each compute slot owns its own
//! `GateFft` instances afterwards; no sharing across threads.

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::sync::{Arc, Mutex, OnceLock};

static PLANNER_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Forward/inverse FFT pair for a fixed size, with scratch reuse.
pub struct GateFft {
    size: usize,
    fwd: Arc<dyn Fft<f64>>,
    inv: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex64>,
}

impl GateFft {
    pub fn new(size: usize) -> Self {
        let lock = PLANNER_LOCK.get_or_init(|| Mutex::new(()));
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut planner = FftPlanner::new();
        let fwd = planner.plan_fft_forward(size);
        let inv = planner.plan_fft_inverse(size);
        let scratch_len = fwd
            .get_inplace_scratch_len()
            .max(inv.get_inplace_scratch_len());
        Self {
            size,
            fwd,
            inv,
            scratch: vec![Complex64::new(0.0, 0.0); scratch_len],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Forward transform into `spec`. Input length must equal the FFT size.
    pub fn forward(&mut self, iq: &[Complex64], spec: &mut Vec<Complex64>) {
        spec.clear();
        spec.extend_from_slice(iq);
        self.fwd.process_with_scratch(spec, &mut self.scratch);
    }

    /// Inverse transform into `iq`, scaled by 1/n so that
    /// `inverse(forward(x)) == x`.
    pub fn inverse(&mut self, spec: &[Complex64], iq: &mut Vec<Complex64>) {
        iq.clear();
        iq.extend_from_slice(spec);
        self.inv.process_with_scratch(iq, &mut self.scratch);
        let scale = 1.0 / self.size as f64;
        for val in iq.iter_mut() {
            *val *= scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::complex::phasor;

    #[test]
    fn forward_then_inverse_is_identity() {
        let mut fft = GateFft::new(16);
        let iq: Vec<Complex64> = (0..16).map(|ii| phasor(0.7 * ii as f64)).collect();
        let mut spec = Vec::new();
        let mut back = Vec::new();
        fft.forward(&iq, &mut spec);
        fft.inverse(&spec, &mut back);
        for (a, b) in iq.iter().zip(back.iter()) {
            assert!((a - b).norm() < 1e-10);
        }
    }

    #[test]
    fn single_tone_concentrates_in_one_bin() {
        let n = 32;
        let mut fft = GateFft::new(n);
        // tone at bin 5
        let iq: Vec<Complex64> = (0..n)
            .map(|ii| phasor(2.0 * std::f64::consts::PI * 5.0 * ii as f64 / n as f64))
            .collect();
        let mut spec = Vec::new();
        fft.forward(&iq, &mut spec);
        let powers: Vec<f64> = spec.iter().map(|c| c.norm_sqr()).collect();
        let max_bin = powers
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert_eq!(max_bin, 5);
    }
}
