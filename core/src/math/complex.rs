//! Covariance primitives over complex I/Q sample slices.

use num_complex::Complex64;

/// Mean power of a time series: mean of |iq|^2.
pub fn mean_power(iq: &[Complex64]) -> f64 {
    if iq.is_empty() {
        return 0.0;
    }
    let sum: f64 = iq.iter().map(|c| c.norm_sqr()).sum();
    sum / iq.len() as f64
}

/// Mean of a[i] * conj(b[i]) over the shorter of the two slices.
pub fn mean_conjugate_product(a: &[Complex64], b: &[Complex64]) -> Complex64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return Complex64::new(0.0, 0.0);
    }
    let mut sum = Complex64::new(0.0, 0.0);
    for ii in 0..n {
        sum += a[ii] * b[ii].conj();
    }
    sum / n as f64
}

/// Auto-covariance at the given lag: mean of iq[i+lag] * conj(iq[i]).
pub fn lag_covariance(iq: &[Complex64], lag: usize) -> Complex64 {
    if iq.len() <= lag {
        return Complex64::new(0.0, 0.0);
    }
    mean_conjugate_product(&iq[lag..], &iq[..iq.len() - lag])
}

/// Power (dB) of a linear power value; caller guards against zero.
pub fn power_db(power: f64) -> f64 {
    10.0 * power.log10()
}

/// Magnitude (dB) of a complex covariance.
pub fn mag_db(val: Complex64) -> f64 {
    20.0 * val.norm().log10()
}

/// Argument in degrees.
pub fn arg_deg(val: Complex64) -> f64 {
    val.arg().to_degrees()
}

/// Mean of two complex values.
pub fn complex_mean(a: Complex64, b: Complex64) -> Complex64 {
    (a + b) * 0.5
}

/// Unit phasor from a phase in radians.
pub fn phasor(phase_rad: f64) -> Complex64 {
    Complex64::new(phase_rad.cos(), phase_rad.sin())
}

/// Load the real power spectrum from a complex spectrum.
pub fn load_power(spec: &[Complex64], power: &mut Vec<f64>) {
    power.clear();
    power.extend(spec.iter().map(|c| c.norm_sqr()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_power_of_unit_phasors_is_one() {
        let iq: Vec<Complex64> = (0..16)
            .map(|ii| phasor(0.3 * ii as f64))
            .collect();
        assert!((mean_power(&iq) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn lag_covariance_recovers_constant_phase_step() {
        // iq[n] = exp(j * 0.5 * n): lag1 phase must be 0.5 rad
        let iq: Vec<Complex64> = (0..32).map(|ii| phasor(0.5 * ii as f64)).collect();
        let lag1 = lag_covariance(&iq, 1);
        assert!((lag1.arg() - 0.5).abs() < 1e-10);
        assert!((lag1.norm() - 1.0).abs() < 1e-10);
    }

    #[test]
    fn lag_covariance_beyond_length_is_zero() {
        let iq = vec![Complex64::new(1.0, 0.0); 3];
        let lag = lag_covariance(&iq, 3);
        assert_eq!(lag, Complex64::new(0.0, 0.0));
    }
}
