//! Spectral-domain clutter suppression primitives.
//!
//! These operate on real power spectra with DC at bin 0 and negative
//! velocities wrapped to the top bins. Powers are normalized so that the
//! mean over bins equals the mean time-series power, which keeps them
//! directly comparable to the calibrated noise floor.

/// Clutter must exceed the spectral noise by this linear ratio (6 dB)
/// before the adaptive notch engages.
const CLUTTER_DETECTION_RATIO: f64 = 4.0;

/// Result of a power-spectrum filter pass. Bin indices in `notch` are the
/// wrapped indices actually zeroed or replaced.
#[derive(Debug, Clone)]
pub struct SpectrumFilterResult {
    pub filtered: Vec<f64>,
    pub notch_bins: Vec<usize>,
    pub clutter_found: bool,
    pub raw_power: f64,
    pub filtered_power: f64,
    pub power_removed: f64,
    pub spectral_noise: f64,
}

/// Spectral noise: the minimum mean power over a sliding segment of
/// length n / n_segments. The quietest part of the spectrum bounds the
/// noise floor from above.
pub fn compute_spectral_noise(power_spec: &[f64], n_segments: usize) -> f64 {
    let n = power_spec.len();
    if n == 0 {
        return 0.0;
    }
    let seg_len = (n / n_segments.max(1)).max(1);
    let mut min_mean = f64::MAX;
    for start in 0..n {
        let mut sum = 0.0;
        for kk in 0..seg_len {
            sum += power_spec[(start + kk) % n];
        }
        let mean = sum / seg_len as f64;
        if mean < min_mean {
            min_mean = mean;
        }
    }
    min_mean
}

/// Number of bins spanned by a velocity interval.
fn bins_for_velocity(vel_mps: f64, nyquist: f64, n: usize) -> usize {
    // full spectrum spans 2 * nyquist
    ((vel_mps / (2.0 * nyquist)) * n as f64 + 0.5) as usize
}

/// Simple notch: zero all bins within half the notch width of DC.
pub fn perform_notch(power_spec: &[f64], notch_width_mps: f64, nyquist: f64) -> SpectrumFilterResult {
    let n = power_spec.len();
    let raw_power = mean(power_spec);
    let half_width = bins_for_velocity(notch_width_mps / 2.0, nyquist, n).min(n / 2);

    let mut filtered = power_spec.to_vec();
    let mut notch_bins = Vec::with_capacity(2 * half_width + 1);
    for off in 0..=half_width {
        filtered[off] = 0.0;
        notch_bins.push(off);
        if off > 0 {
            filtered[n - off] = 0.0;
            notch_bins.push(n - off);
        }
    }

    let filtered_power = mean(&filtered);
    SpectrumFilterResult {
        filtered,
        notch_bins,
        clutter_found: true,
        raw_power,
        filtered_power,
        power_removed: raw_power - filtered_power,
        spectral_noise: 0.0,
    }
}

/// Adaptive notch.
///
/// Locates the clutter peak near DC, grows the notch outward while the
/// power falls monotonically toward the spectral noise, and replaces the
/// notched bins by interpolating the power across the notch (or by the
/// spectral noise itself when `set_notch_to_noise`).
#[allow(clippy::too_many_arguments)]
pub fn perform_adaptive(
    power_spec: &[f64],
    max_clutter_width_mps: f64,
    init_notch_width_mps: f64,
    nyquist: f64,
    set_notch_to_noise: bool,
    n_noise_segments: usize,
) -> SpectrumFilterResult {
    let n = power_spec.len();
    let raw_power = mean(power_spec);
    let spectral_noise = compute_spectral_noise(power_spec, n_noise_segments);

    let mut result = SpectrumFilterResult {
        filtered: power_spec.to_vec(),
        notch_bins: Vec::new(),
        clutter_found: false,
        raw_power,
        filtered_power: raw_power,
        power_removed: 0.0,
        spectral_noise,
    };
    if n < 8 {
        return result;
    }

    // clutter is detected only when the dominant peak of the whole
    // spectrum sits within the max clutter width of DC; a weather peak
    // away from zero with sidelobe energy near DC must not trigger

    let search_half = bins_for_velocity(max_clutter_width_mps, nyquist, n)
        .max(1)
        .min(n / 2);
    let mut peak_bin = 0usize;
    let mut peak_power = power_spec[0];
    for (bin, power) in power_spec.iter().enumerate().skip(1) {
        if *power > peak_power {
            peak_power = *power;
            peak_bin = bin;
        }
    }
    let dist_from_dc = peak_bin.min(n - peak_bin);
    if dist_from_dc > search_half || peak_power < spectral_noise * CLUTTER_DETECTION_RATIO {
        return result;
    }
    result.clutter_found = true;

    // grow the notch outward from the peak while the power keeps falling
    // and remains above the spectral noise

    let init_half = bins_for_velocity(init_notch_width_mps / 2.0, nyquist, n).max(1);
    let max_half = (n / 4).max(init_half);

    let wrap = |idx: i64| -> usize { idx.rem_euclid(n as i64) as usize };
    let grow = |step: i64| -> usize {
        let mut half = init_half;
        let mut prev = power_spec[wrap(peak_bin as i64 + step * half as i64)];
        while half < max_half {
            let next = power_spec[wrap(peak_bin as i64 + step * (half as i64 + 1))];
            if next > prev || next <= spectral_noise {
                break;
            }
            prev = next;
            half += 1;
        }
        half
    };
    let half_below = grow(-1);
    let half_above = grow(1);

    // edge bins just outside the notch anchor the interpolation

    let lower_edge = wrap(peak_bin as i64 - half_below as i64 - 1);
    let upper_edge = wrap(peak_bin as i64 + half_above as i64 + 1);
    let power_start = power_spec[lower_edge];
    let power_end = power_spec[upper_edge];
    let notch_len = (half_below + half_above + 1) as f64;

    for kk in 0..(half_below + half_above + 1) {
        let jj = wrap(peak_bin as i64 - half_below as i64 + kk as i64);
        let interp = if set_notch_to_noise {
            spectral_noise
        } else {
            let frac = (kk + 1) as f64 / (notch_len + 1.0);
            (power_start + frac * (power_end - power_start)).max(spectral_noise)
        };
        result.filtered[jj] = interp;
        result.notch_bins.push(jj);
    }

    result.filtered_power = mean(&result.filtered);
    result.power_removed = raw_power - result.filtered_power;
    result
}

/// Interpolate linearly across the DC notch left by a regression filter.
/// The interpolation span is n/32 bins on each side of DC.
pub fn interp_across_notch(regr_spec: &mut [f64]) {
    let n = regr_spec.len();
    let mm = (n as f64 / 32.0 + 0.5) as usize;
    if mm < 1 {
        return;
    }
    let nn = mm * 2 + 1;
    let start_val = regr_spec[n - 1 - mm];
    let end_val = regr_spec[mm];
    let delta = (end_val - start_val) / (nn - 1) as f64;
    for kk in 0..nn {
        let jj = (kk + n - 1 - mm) % n;
        regr_spec[jj] = start_val + kk as f64 * delta;
    }
}

/// Interpolate across the replicated notches of a staggered-PRT
/// regression filter, in the expanded pseudo-constant-PRT spectrum.
/// Notch replicas sit at multiples of n_samples / 2.
pub fn interp_across_stag_notches(
    regr_spec: &mut [f64],
    n_samples: usize,
    stag_m: i64,
    stag_n: i64,
) {
    let n_expanded = regr_spec.len();
    let mm = (n_samples as f64 / 32.0 + 0.5) as usize;
    if mm < 1 {
        return;
    }
    let nn = mm * 2 + 1;

    for ii in 0..(stag_m + stag_n) as usize {
        let loc = (ii * n_samples / 2) as i64;
        let istart = loc - mm as i64;
        let iend = loc + mm as i64;
        let jstart = istart.rem_euclid(n_expanded as i64) as usize;
        let jend = iend.rem_euclid(n_expanded as i64) as usize;
        let start_val = regr_spec[jstart];
        let end_val = regr_spec[jend];
        let delta = (end_val - start_val) / (nn - 1) as f64;
        for kk in 0..nn {
            let jj = (istart + kk as i64).rem_euclid(n_expanded as i64) as usize;
            regr_spec[jj] = start_val + kk as f64 * delta;
        }
    }
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

    fn flat_spectrum(n: usize, level: f64) -> Vec<f64> {
        vec![level; n]
    }

    #[test]
    fn spectral_noise_finds_quietest_segment() {
        let mut spec = flat_spectrum(64, 1.0);
        for val in spec.iter_mut().take(8) {
            *val = 100.0;
        }
        let noise = compute_spectral_noise(&spec, 8);
        assert!((noise - 1.0).abs() < 1e-12);
    }

    #[test]
    fn notch_zeroes_dc_bins_only() {
        let spec = flat_spectrum(64, 2.0);
        let out = perform_notch(&spec, 3.0, 25.0);
        assert!(out.filtered[0] == 0.0);
        assert!(out.filtered[63] == 0.0);
        assert!(out.filtered[32] == 2.0);
        assert!(out.power_removed > 0.0);
    }

    #[test]
    fn adaptive_skips_spectrum_without_dc_peak() {
        // weather peak away from DC, nothing at zero velocity
        let mut spec = flat_spectrum(64, 1.0);
        for val in spec.iter_mut().skip(20).take(6) {
            *val = 50.0;
        }
        let out = perform_adaptive(&spec, 1.0, 1.5, 25.0, false, 8);
        assert!(!out.clutter_found);
        assert_eq!(out.power_removed, 0.0);
        assert_eq!(out.filtered, spec);
    }

    #[test]
    fn adaptive_ignores_near_dc_leakage_under_dominant_weather_peak() {
        // strong weather away from DC with window leakage near zero that
        // clears the noise ratio; the dominant peak decides, so no notch
        let mut spec = flat_spectrum(64, 1.0);
        for val in spec.iter_mut().skip(20).take(6) {
            *val = 200.0;
        }
        spec[0] = 8.0;
        spec[1] = 6.0;
        spec[63] = 6.0;
        let out = perform_adaptive(&spec, 1.0, 1.5, 25.0, false, 8);
        assert!(!out.clutter_found);
        assert_eq!(out.filtered, spec);
    }

    #[test]
    fn adaptive_removes_dc_spike() {
        let mut spec = flat_spectrum(64, 1.0);
        spec[0] = 1000.0;
        spec[1] = 400.0;
        spec[63] = 400.0;
        spec[2] = 50.0;
        spec[62] = 50.0;
        let out = perform_adaptive(&spec, 1.0, 1.5, 25.0, false, 8);
        assert!(out.clutter_found);
        assert!(out.filtered[0] < 10.0);
        assert!(out.power_removed > 0.9 * (spec[0] + spec[1] + spec[63]) / 64.0 * 0.5);
        // bins away from DC untouched
        assert_eq!(out.filtered[32], 1.0);
    }

    #[test]
    fn notch_interp_bridges_the_gap() {
        let mut spec = flat_spectrum(64, 10.0);
        spec[0] = 0.0;
        spec[1] = 0.0;
        spec[63] = 0.0;
        interp_across_notch(&mut spec);
        assert!(spec[0] > 0.0);
        assert!(spec[63] > 0.0);
    }
}
