//! Fuzzy clutter classifier (CMD) and its post-filters.
//!
//! Per gate the classifier combines texture, spin, phase-alignment and
//! dual-pol variance features through piecewise-linear interest maps into
//! a clutter likelihood in [0, 1], thresholds it into a flag, then cleans
//! the flag field with a speckle filter and a gap in-fill pass. The
//! NEXRAD-style spike censor runs later, on the filtered reflectivity.

use crate::config::{CmdConfig, InterestMapConfig};
use crate::math::complex::phasor;
use crate::moments::MomentsFields;
use crate::prelude::{is_valid, MISSING};

/// Monotonic piecewise-linear map from a feature value to an interest in
/// [0, 1], clamped to the end values outside the control points.
#[derive(Debug, Clone)]
pub struct InterestMap {
    points: Vec<(f64, f64)>,
    weight: f64,
}

impl InterestMap {
    pub fn new(config: &InterestMapConfig) -> Self {
        Self {
            points: config.points.clone(),
            weight: config.weight,
        }
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Interest for a value; missing values carry zero interest.
    pub fn interest(&self, val: f64) -> f64 {
        if !is_valid(val) || self.points.is_empty() {
            return 0.0;
        }
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if val <= first.0 {
            return first.1;
        }
        if val >= last.0 {
            return last.1;
        }
        for pair in self.points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if val <= x1 {
                return y0 + (val - x0) / (x1 - x0) * (y1 - y0);
            }
        }
        last.1
    }
}

/// Classifier state for one dwell geometry. Stateless across beams.
#[derive(Debug, Clone)]
pub struct CmdClassifier {
    config: CmdConfig,
    tdbz_map: InterestMap,
    spin_map: InterestMap,
    cpa_map: InterestMap,
    zdr_sdev_map: InterestMap,
    phidp_sdev_map: InterestMap,
}

impl CmdClassifier {
    pub fn new(config: &CmdConfig) -> Self {
        Self {
            tdbz_map: InterestMap::new(&config.tdbz_map),
            spin_map: InterestMap::new(&config.spin_map),
            cpa_map: InterestMap::new(&config.cpa_map),
            zdr_sdev_map: InterestMap::new(&config.zdr_sdev_map),
            phidp_sdev_map: InterestMap::new(&config.phidp_sdev_map),
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &CmdConfig {
        &self.config
    }

    /// Compute features, interests, the combined likelihood and the flag
    /// for every gate, then run the speckle and gap post-filters.
    pub fn run(&self, gates: &mut [MomentsFields]) {
        self.compute_texture_features(gates);
        self.compute_sdev_features(gates);
        self.combine_interests(gates);

        if self.config.apply_speckle_filter {
            self.apply_speckle_filter(gates);
        }
        if self.config.apply_gap_filter {
            self.apply_gap_filter(gates);
        }
    }

    /// TDBZ and SPIN over the range kernel.
    fn compute_texture_features(&self, gates: &mut [MomentsFields]) {
        let n = gates.len();
        let dbz: Vec<f64> = gates.iter().map(|g| g.dbz).collect();

        // gate-to-gate squared differences and spin sign changes
        let mut diff_sq = vec![MISSING; n];
        let mut diff = vec![MISSING; n];
        for ii in 1..n {
            if is_valid(dbz[ii]) && is_valid(dbz[ii - 1]) {
                let dd = dbz[ii] - dbz[ii - 1];
                diff[ii] = dd;
                diff_sq[ii] = dd * dd;
            }
        }
        let mut spin_change = vec![MISSING; n];
        for ii in 1..n.saturating_sub(1) {
            if is_valid(diff[ii]) && is_valid(diff[ii + 1]) {
                let opposite = diff[ii] * diff[ii + 1] < 0.0;
                let big_enough = diff[ii].abs().max(diff[ii + 1].abs())
                    >= self.config.spin_dbz_threshold;
                spin_change[ii] = if opposite && big_enough { 1.0 } else { 0.0 };
            }
        }

        let half = self.config.kernel_len / 2;
        for ii in 0..n {
            gates[ii].dbz_diff_sq = diff_sq[ii];
            gates[ii].dbz_spin_change = spin_change[ii];

            let lo = ii.saturating_sub(half);
            let hi = (ii + half).min(n - 1);

            let mut sum_sq = 0.0;
            let mut count_sq = 0usize;
            let mut spins = 0.0;
            let mut count_spin = 0usize;
            for jj in lo..=hi {
                if is_valid(diff_sq[jj]) {
                    sum_sq += diff_sq[jj];
                    count_sq += 1;
                }
                if is_valid(spin_change[jj]) {
                    spins += spin_change[jj];
                    count_spin += 1;
                }
            }
            gates[ii].tdbz = if count_sq >= half.max(1) {
                sum_sq / count_sq as f64
            } else {
                MISSING
            };
            gates[ii].spin = if count_spin >= half.max(1) {
                100.0 * spins / count_spin as f64
            } else {
                MISSING
            };
        }
    }

    /// ZDR and PHIDP standard deviation over the sdev kernel. PHIDP is
    /// fold-corrected: deviations are taken against the circular mean in
    /// the detected folding interval.
    fn compute_sdev_features(&self, gates: &mut [MomentsFields]) {
        let n = gates.len();
        let zdr: Vec<f64> = gates.iter().map(|g| g.zdr).collect();
        let phidp: Vec<f64> = gates.iter().map(|g| g.phidp).collect();

        // folding interval: alternating-mode phidp folds at +/- 90
        let fold_limit = phidp
            .iter()
            .filter(|v| is_valid(**v))
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let fold_deg = if fold_limit <= 90.5 { 90.0 } else { 180.0 };

        let half = self.config.sdev_len / 2;
        let min_count = half.max(2);
        for ii in 0..n {
            let lo = ii.saturating_sub(half);
            let hi = (ii + half).min(n - 1);

            let window: Vec<f64> = zdr[lo..=hi].iter().copied().filter(|v| is_valid(*v)).collect();
            gates[ii].zdr_sdev = sdev(&window, min_count);

            let phis: Vec<f64> = phidp[lo..=hi]
                .iter()
                .copied()
                .filter(|v| is_valid(*v))
                .collect();
            gates[ii].phidp_sdev = circular_sdev(&phis, fold_deg, min_count);
        }
    }

    /// Weighted fuzzy combination and thresholding, including the
    /// off-zero weather and wind-farm adjustments.
    fn combine_interests(&self, gates: &mut [MomentsFields]) {
        for gate in gates.iter_mut() {
            // no signal, no classification: pure-noise gates must not be
            // flagged on texture or phase alignment alone
            if !is_valid(gate.dbz)
                || !is_valid(gate.snr)
                || gate.snr < self.config.cmd_snr_threshold_db
            {
                continue;
            }

            gate.tdbz_interest = self.tdbz_map.interest(gate.tdbz);
            gate.spin_interest = self.spin_map.interest(gate.spin);
            gate.cpa_interest = self.cpa_map.interest(gate.cpa);
            gate.zdr_sdev_interest = self.zdr_sdev_map.interest(gate.zdr_sdev);
            gate.phidp_sdev_interest = self.phidp_sdev_map.interest(gate.phidp_sdev);
            gate.max_tdbz_spin = gate.tdbz_interest.max(gate.spin_interest);

            let mut sum_interest = 0.0;
            let mut sum_weight = 0.0;
            if self.config.use_max_tdbz_spin {
                let weight = self.tdbz_map.weight().max(self.spin_map.weight());
                sum_interest += gate.max_tdbz_spin * weight;
                sum_weight += weight;
            } else {
                sum_interest += gate.tdbz_interest * self.tdbz_map.weight();
                sum_weight += self.tdbz_map.weight();
                sum_interest += gate.spin_interest * self.spin_map.weight();
                sum_weight += self.spin_map.weight();
            }
            sum_interest += gate.cpa_interest * self.cpa_map.weight();
            sum_weight += self.cpa_map.weight();
            sum_interest += gate.zdr_sdev_interest * self.zdr_sdev_map.weight();
            sum_weight += self.zdr_sdev_map.weight();
            sum_interest += gate.phidp_sdev_interest * self.phidp_sdev_map.weight();
            sum_weight += self.phidp_sdev_map.weight();

            gate.cmd = if sum_weight > 0.0 {
                sum_interest / sum_weight
            } else {
                0.0
            };

            let mut threshold = self.config.cmd_threshold;
            if self.config.apply_off_zero_snr_check
                && is_valid(gate.ozsnr)
                && gate.ozsnr >= self.config.off_zero_snr_threshold_db
            {
                threshold = self.config.cmd_threshold_for_off_zero;
            }
            gate.cmd_flag = gate.cmd >= threshold;

            if self.config.apply_windfarm_check
                && is_valid(gate.spectral_snr)
                && gate.spectral_snr >= self.config.windfarm_spectral_snr_db
            {
                gate.cmd_flag = false;
            }
        }
    }

    /// Clear short flag runs whose likelihood falls below the relaxed
    /// per-run-length threshold, longest category first.
    fn apply_speckle_filter(&self, gates: &mut [MomentsFields]) {
        for category in self.config.speckle_categories.iter().rev() {
            let n = gates.len();
            let mut ii = 0usize;
            while ii < n {
                if !gates[ii].cmd_flag {
                    ii += 1;
                    continue;
                }
                let start = ii;
                while ii < n && gates[ii].cmd_flag {
                    ii += 1;
                }
                let run_len = ii - start;
                if run_len <= category.max_run_len {
                    for gate in gates[start..ii].iter_mut() {
                        if gate.cmd < category.threshold {
                            gate.cmd_flag = false;
                        }
                    }
                }
            }
        }
    }

    /// Fill small gaps between flagged regions: an unflagged gate is set
    /// when the distance-weighted likelihood sums on both sides exceed
    /// the threshold. Bounded to three passes.
    fn apply_gap_filter(&self, gates: &mut [MomentsFields]) {
        let n = gates.len();
        let reach = self.config.gap_filter_len;
        for _pass in 0..3 {
            let mut changed = false;
            let flags: Vec<bool> = gates.iter().map(|g| g.cmd_flag).collect();
            for ii in 0..n {
                if flags[ii] {
                    continue;
                }
                let mut fwd = 0.0;
                for dist in 1..=reach.min(ii) {
                    let jj = ii - dist;
                    if flags[jj] {
                        fwd += gates[jj].cmd / dist as f64;
                    }
                }
                let mut rev = 0.0;
                for dist in 1..=reach.min(n - 1 - ii) {
                    let jj = ii + dist;
                    if flags[jj] {
                        rev += gates[jj].cmd / dist as f64;
                    }
                }
                if fwd > self.config.gap_filter_threshold && rev > self.config.gap_filter_threshold
                {
                    gates[ii].cmd_flag = true;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Correlation-improvement override: compare the loss of correlation
    /// before and after regression filtering. Returns the improvement
    /// ratio and whether it clears the minimum.
    pub fn rhohv_improvement(&self, rhohv_unfilt: f64, rhohv_filt: f64) -> (f64, bool) {
        if !is_valid(rhohv_unfilt) || !is_valid(rhohv_filt) {
            return (MISSING, false);
        }
        let factor_unfilt = (1.0 - rhohv_unfilt).max(0.001);
        let factor_filt = (1.0 - rhohv_filt).max(0.001);
        let improvement = factor_unfilt / factor_filt;
        (
            improvement,
            improvement >= self.config.rhohv_test_min_improvement,
        )
    }
}

/// NEXRAD-style spike censor over a reflectivity profile.
///
/// A one- or two-gate spike exceeding `tcn_db` relative to both
/// second-nearest neighbors is replaced, along with its immediate
/// neighbors, by substitution from the surrounding gates.
pub fn nexrad_spike_filter(dbz: &mut [f64], tcn_db: f64) {
    let n = dbz.len();
    if n < 5 {
        return;
    }
    let orig = dbz.to_vec();

    let mut ii = 2;
    while ii + 2 < n {
        let below = orig[ii - 2];
        if !is_valid(orig[ii]) || !is_valid(below) {
            ii += 1;
            continue;
        }

        // two-gate spike: gates ii and ii+1 both stand above the
        // neighbors two gates out on either side, and the gates just
        // outside the pair do not
        if ii + 3 < n && is_valid(orig[ii + 1]) && is_valid(orig[ii + 3]) {
            let above = orig[ii + 3];
            let isolated = is_valid(orig[ii - 1])
                && is_valid(orig[ii + 2])
                && orig[ii - 1] - below < tcn_db
                && orig[ii + 2] - above < tcn_db;
            if isolated
                && orig[ii] - below >= tcn_db
                && orig[ii] - above >= tcn_db
                && orig[ii + 1] - below >= tcn_db
                && orig[ii + 1] - above >= tcn_db
            {
                dbz[ii - 1] = below;
                dbz[ii] = below + (above - below) / 3.0;
                dbz[ii + 1] = below + 2.0 * (above - below) / 3.0;
                dbz[ii + 2] = above;
                ii += 4;
                continue;
            }
        }

        // single-gate spike, immediate neighbors not spiking
        if is_valid(orig[ii + 2]) {
            let above = orig[ii + 2];
            let isolated = is_valid(orig[ii - 1])
                && is_valid(orig[ii + 1])
                && orig[ii - 1] - below < tcn_db
                && orig[ii + 1] - above < tcn_db;
            if isolated && orig[ii] - below >= tcn_db && orig[ii] - above >= tcn_db {
                dbz[ii - 1] = below;
                dbz[ii] = (below + above) / 2.0;
                dbz[ii + 1] = above;
                ii += 3;
                continue;
            }
        }
        ii += 1;
    }
}

fn sdev(vals: &[f64], min_count: usize) -> f64 {
    if vals.len() < min_count {
        return MISSING;
    }
    let n = vals.len() as f64;
    let mean = vals.iter().sum::<f64>() / n;
    let var = vals.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    var.max(0.0).sqrt()
}

/// Standard deviation of a folded angle series, in degrees. The values
/// are mapped onto the full circle for the detected folding interval,
/// deviations taken against the circular mean, then scaled back.
fn circular_sdev(vals_deg: &[f64], fold_deg: f64, min_count: usize) -> f64 {
    if vals_deg.len() < min_count {
        return MISSING;
    }
    let scale = 180.0 / fold_deg;
    let mean_phasor = vals_deg
        .iter()
        .map(|v| phasor(v * scale * std::f64::consts::PI / 180.0))
        .sum::<num_complex::Complex64>();
    let mean_angle_deg = mean_phasor.arg().to_degrees();

    let mut sum_sq = 0.0;
    for val in vals_deg {
        let mut dev = val * scale - mean_angle_deg;
        while dev > 180.0 {
            dev -= 360.0;
        }
        while dev < -180.0 {
            dev += 360.0;
        }
        sum_sq += dev * dev;
    }
    (sum_sq / vals_deg.len() as f64).sqrt() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CmdConfig;

    fn gates_with_cmd(cmd: &[f64], flags: &[bool]) -> Vec<MomentsFields> {
        cmd.iter()
            .zip(flags.iter())
            .map(|(c, f)| {
                let mut gate = MomentsFields::new();
                gate.cmd = *c;
                gate.cmd_flag = *f;
                gate
            })
            .collect()
    }

    #[test]
    fn interest_map_interpolates_and_clamps() {
        let map = InterestMap::new(&InterestMapConfig::new(
            vec![(0.0, 0.0), (40.0, 1.0)],
            1.0,
        ));
        assert_eq!(map.interest(-5.0), 0.0);
        assert_eq!(map.interest(60.0), 1.0);
        assert!((map.interest(20.0) - 0.5).abs() < 1e-12);
        assert_eq!(map.interest(MISSING), 0.0);
    }

    #[test]
    fn speckle_clears_isolated_weak_flags() {
        let classifier = CmdClassifier::new(&CmdConfig::default());
        let cmd = [0.2, 0.30, 0.2, 0.2, 0.60, 0.40, 0.60, 0.2];
        let flags = [false, true, false, false, true, true, true, false];
        let mut gates = gates_with_cmd(&cmd, &flags);
        classifier.apply_speckle_filter(&mut gates);

        // single weak gate cleared; middle gate of the 3-run cleared,
        // strong neighbours retained
        let out: Vec<bool> = gates.iter().map(|g| g.cmd_flag).collect();
        assert_eq!(
            out,
            vec![false, false, false, false, true, false, true, false]
        );
    }

    #[test]
    fn gap_filter_bridges_strong_neighbours() {
        let classifier = CmdClassifier::new(&CmdConfig::default());
        let cmd = [0.9, 0.9, 0.3, 0.9, 0.9];
        let flags = [true, true, false, true, true];
        let mut gates = gates_with_cmd(&cmd, &flags);
        classifier.apply_gap_filter(&mut gates);
        assert!(gates[2].cmd_flag);
    }

    #[test]
    fn gap_filter_leaves_wide_gaps_open() {
        let classifier = CmdClassifier::new(&CmdConfig::default());
        let cmd = [0.9, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.9];
        let flags = [true, false, false, false, false, false, false, true];
        let mut gates = gates_with_cmd(&cmd, &flags);
        classifier.apply_gap_filter(&mut gates);
        // middle gates have no flagged neighbour within reach on one side
        assert!(!gates[4].cmd_flag);
    }

    #[test]
    fn classifier_flags_high_texture_clutter() {
        let config = CmdConfig::default();
        let classifier = CmdClassifier::new(&config);
        let n = 21;
        let mut gates: Vec<MomentsFields> = (0..n)
            .map(|ii| {
                let mut gate = MomentsFields::new();
                // noisy reflectivity alternating by 20 dB, high cpa
                gate.dbz = if ii % 2 == 0 { 45.0 } else { 25.0 };
                gate.snr = 40.0;
                gate.cpa = 0.95;
                gate.zdr = if ii % 2 == 0 { 3.0 } else { -2.0 };
                gate.phidp = if ii % 2 == 0 { 40.0 } else { -40.0 };
                gate
            })
            .collect();
        classifier.run(&mut gates);
        let center = &gates[n / 2];
        assert!(center.tdbz > 100.0, "tdbz {}", center.tdbz);
        assert!(center.cmd > 0.5, "cmd {}", center.cmd);
        assert!(center.cmd_flag);
    }

    #[test]
    fn classifier_passes_smooth_weather() {
        let classifier = CmdClassifier::new(&CmdConfig::default());
        let n = 21;
        let mut gates: Vec<MomentsFields> = (0..n)
            .map(|ii| {
                let mut gate = MomentsFields::new();
                gate.dbz = 30.0 + 0.1 * ii as f64;
                gate.snr = 25.0;
                gate.cpa = 0.2;
                gate.zdr = 0.5;
                gate.phidp = 30.0 + 0.2 * ii as f64;
                gate.rhohv = 0.99;
                gate
            })
            .collect();
        classifier.run(&mut gates);
        let center = &gates[n / 2];
        assert!(center.cmd < 0.3, "cmd {}", center.cmd);
        assert!(!center.cmd_flag);
    }

    #[test]
    fn classifier_skips_gates_below_snr_threshold() {
        let classifier = CmdClassifier::new(&CmdConfig::default());
        let n = 21;
        let mut gates: Vec<MomentsFields> = (0..n)
            .map(|ii| {
                let mut gate = MomentsFields::new();
                // noise-level gates with high phase alignment
                gate.dbz = if ii % 2 == 0 { 5.0 } else { -10.0 };
                gate.snr = -3.0;
                gate.cpa = 0.98;
                gate
            })
            .collect();
        classifier.run(&mut gates);
        for gate in &gates {
            assert!(!gate.cmd_flag);
            assert_eq!(gate.cmd, MISSING);
        }
    }

    #[test]
    fn rhohv_improvement_ratio() {
        let classifier = CmdClassifier::new(&CmdConfig::default());
        // 0.80 -> 0.95: (0.2 / 0.05) = 4x improvement
        let (improv, flag) = classifier.rhohv_improvement(0.80, 0.95);
        assert!((improv - 4.0).abs() < 1e-9);
        assert!(flag);
        let (_, flag) = classifier.rhohv_improvement(0.95, 0.95);
        assert!(!flag);
    }

    #[test]
    fn spike_filter_replaces_single_gate_spike() {
        let mut dbz = vec![20.0, 21.0, 45.0, 22.0, 23.0, 24.0];
        nexrad_spike_filter(&mut dbz, 9.0);
        assert!((dbz[2] - 21.5).abs() < 1e-9);
        assert_eq!(dbz[1], 20.0);
        assert_eq!(dbz[3], 23.0);
    }

    #[test]
    fn spike_filter_ignores_broad_echo() {
        let mut dbz = vec![20.0, 35.0, 45.0, 44.0, 35.0, 20.0];
        let orig = dbz.clone();
        nexrad_spike_filter(&mut dbz, 9.0);
        assert_eq!(dbz, orig);
    }
}
