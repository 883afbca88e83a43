//! Small statistics helpers: median filtering and mean/sdev over slices
//! that may contain the missing sentinel.

use crate::prelude::{is_valid, MISSING};

/// Apply a median filter of the given odd length, in place.
///
/// Lengths below 3 are a no-op; even lengths are widened by one. Edge gates
/// keep their original values.
pub fn median_filter(data: &mut [f64], filter_len: usize) {
    if filter_len < 3 || data.len() < filter_len {
        return;
    }
    let len = if filter_len % 2 == 0 {
        filter_len + 1
    } else {
        filter_len
    };
    let half = len / 2;
    let orig = data.to_vec();
    let mut kernel = Vec::with_capacity(len);
    for ii in half..data.len() - half {
        kernel.clear();
        kernel.extend_from_slice(&orig[ii - half..=ii + half]);
        kernel.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        data[ii] = kernel[half];
    }
}

/// Mean and standard deviation over valid entries; returns MISSING for both
/// when fewer than `min_count` entries are valid.
pub fn mean_sdev(data: &[f64], min_count: usize) -> (f64, f64) {
    let mut count = 0.0;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for &val in data {
        if is_valid(val) {
            sum += val;
            sum_sq += val * val;
            count += 1.0;
        }
    }
    if (count as usize) < min_count.max(1) {
        return (MISSING, MISSING);
    }
    let mean = sum / count;
    let term1 = sum_sq / count;
    let term2 = mean * mean;
    let sdev = if term1 >= term2 {
        (term1 - term2).sqrt()
    } else {
        MISSING
    };
    (mean, sdev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_filter_removes_single_gate_outlier() {
        let mut data = vec![1.0, 1.0, 50.0, 1.0, 1.0];
        median_filter(&mut data, 3);
        assert_eq!(data[2], 1.0);
    }

    #[test]
    fn median_filter_short_input_is_noop() {
        let mut data = vec![3.0, 9.0];
        median_filter(&mut data, 5);
        assert_eq!(data, vec![3.0, 9.0]);
    }

    #[test]
    fn mean_sdev_skips_missing_values() {
        let data = vec![2.0, MISSING, 4.0, MISSING, 6.0];
        let (mean, sdev) = mean_sdev(&data, 3);
        assert!((mean - 4.0).abs() < 1e-12);
        assert!(sdev > 0.0);
    }

    #[test]
    fn mean_sdev_with_too_few_valid_is_missing() {
        let data = vec![MISSING, 1.0, MISSING];
        let (mean, sdev) = mean_sdev(&data, 2);
        assert_eq!(mean, MISSING);
        assert_eq!(sdev, MISSING);
    }
}
