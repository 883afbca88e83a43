//! Clutter phase alignment.
//!
//! CPA measures how far the cumulative phasor of a dwell travels relative
//! to the total path length. Stationary clutter keeps the phasor walking in
//! one direction (CPA near 1); weather wanders (CPA near 0).

use num_complex::Complex64;

/// Basic CPA: |mean(iq)| / mean(|iq|).
pub fn compute_cpa(iq: &[Complex64]) -> f64 {
    if iq.is_empty() {
        return 0.0;
    }
    let n = iq.len() as f64;
    let mut sum = Complex64::new(0.0, 0.0);
    let mut sum_mag = 0.0;
    for sample in iq {
        sum += sample;
        sum_mag += sample.norm();
    }
    if sum_mag == 0.0 {
        return 0.0;
    }
    (sum / n).norm() / (sum_mag / n)
}

/// CPA over two channels: mean of the per-channel values.
pub fn compute_cpa_dual(iqh: &[Complex64], iqv: &[Complex64]) -> f64 {
    (compute_cpa(iqh) + compute_cpa(iqv)) / 2.0
}

/// Alternative CPA.
///
/// Finds the minimum of a 5-point running CPA, then measures the phasor
/// excursion on each side of that minimum. Handles series where alignment
/// is high except for a short low-CPA interruption.
pub fn compute_cpa_alt(iq: &[Complex64]) -> f64 {
    let n_samples = iq.len();
    if n_samples < 8 {
        return compute_cpa(iq);
    }

    // cumulative phasor and per-sample magnitudes
    let mut phasor = Vec::with_capacity(n_samples);
    let mut mag = Vec::with_capacity(n_samples);
    let mut sum = Complex64::new(0.0, 0.0);
    for sample in iq {
        sum += sample;
        phasor.push(sum);
        mag.push(sample.norm());
    }

    let nrun = 5usize;
    let nhalf = nrun / 2;

    let mut running = vec![0.0; n_samples];
    let mut sum_mag: f64 = mag[..nrun - 1].iter().sum();
    for ii in nhalf..n_samples - nhalf {
        sum_mag += mag[ii + nhalf];
        let dist = (phasor[ii - nhalf] - phasor[ii + nhalf]).norm();
        running[ii] = if sum_mag > 0.0 { dist / sum_mag } else { 0.0 };
        sum_mag -= mag[ii - nhalf];
    }
    for ii in 0..nhalf {
        running[ii] = running[nhalf];
        running[n_samples - ii - 1] = running[n_samples - nhalf - 1];
    }

    let mut min_running = 99.0;
    let mut min_index = 0;
    for (ii, &val) in running
        .iter()
        .enumerate()
        .take(n_samples - nhalf)
        .skip(nhalf)
    {
        if val < min_running {
            min_running = val;
            min_index = ii;
        }
    }

    let total_mag: f64 = mag.iter().sum();
    if total_mag == 0.0 {
        return 0.0;
    }

    let dist0 = phasor[min_index].norm();
    let dist1 = (phasor[n_samples - 1] - phasor[min_index]).norm();
    (dist0 + dist1) / total_mag
}

/// Alternative CPA over two channels.
pub fn compute_cpa_alt_dual(iqh: &[Complex64], iqv: &[Complex64]) -> f64 {
    (compute_cpa_alt(iqh) + compute_cpa_alt(iqv)) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::complex::phasor;

    #[test]
    fn constant_phase_series_has_cpa_one() {
        let iq = vec![Complex64::new(1.0, 0.5); 32];
        assert!((compute_cpa(&iq) - 1.0).abs() < 1e-12);
        assert!((compute_cpa_alt(&iq) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn fast_rotating_series_has_low_cpa() {
        // half-nyquist doppler: phase steps of pi/2
        let iq: Vec<Complex64> = (0..64)
            .map(|ii| phasor(std::f64::consts::FRAC_PI_2 * ii as f64))
            .collect();
        assert!(compute_cpa(&iq) < 0.1);
    }

    #[test]
    fn cpa_alt_falls_back_for_short_series() {
        let iq = vec![Complex64::new(1.0, 0.0); 6];
        assert_eq!(compute_cpa_alt(&iq), compute_cpa(&iq));
    }

    #[test]
    fn cpa_alt_recovers_interrupted_alignment() {
        // aligned series with a short scrambled section in the middle
        let mut iq: Vec<Complex64> = vec![Complex64::new(1.0, 0.0); 64];
        for ii in 30..34 {
            iq[ii] = phasor(2.1 * ii as f64);
        }
        let plain = compute_cpa(&iq);
        let alt = compute_cpa_alt(&iq);
        assert!(alt >= plain);
        assert!(alt > 0.9);
    }

    #[test]
    fn dual_channel_cpa_averages_channels() {
        let iqh = vec![Complex64::new(1.0, 0.0); 16];
        let iqv: Vec<Complex64> = (0..16).map(|ii| phasor(1.9 * ii as f64)).collect();
        let dual = compute_cpa_dual(&iqh, &iqv);
        let expected = (compute_cpa(&iqh) + compute_cpa(&iqv)) / 2.0;
        assert!((dual - expected).abs() < 1e-12);
    }
}
