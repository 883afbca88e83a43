//! Engine configuration.
//!
//! All sections deserialize with serde and carry defaults, so a config file
//! only needs to name what it changes. `EngineConfig::validate` is called
//! once at engine startup; a bad configuration is fatal there rather than
//! being detected gate by gate later.

use serde::{Deserialize, Serialize};

use crate::clutter::FilterStrategy;
use crate::math::WindowType;
use crate::moments::width::WidthMethod;
use crate::prelude::{EngineError, EngineResult, FieldSelection};

/// Transmit/receive polarization mode of the incoming dwells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XmitRcvMode {
    /// Single polarization, H channel only.
    SinglePol,
    /// Single polarization, V channel only.
    SinglePolV,
    /// Alternating transmit, co-polar receivers only.
    DpAltHvCoOnly,
    /// Alternating transmit, co-polar and cross-polar receivers.
    DpAltHvCoCross,
    /// Simultaneous transmit, fixed H and V receivers.
    DpSimHv,
    /// Simultaneous transmit, receivers switched each pulse: channel 0
    /// carries H on even pulses and V on odd pulses.
    DpSimHvSwitched,
    /// Transmit H, receive co-polar H and cross-polar V.
    DpHOnly,
    /// Transmit V, receive co-polar V and cross-polar H.
    DpVOnly,
}

impl Default for XmitRcvMode {
    fn default() -> Self {
        XmitRcvMode::SinglePol
    }
}

/// PRT strategy of the incoming dwells.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PrtMode {
    Fixed,
    /// Staggered PRT with ratio m/n (2/3, 3/4 or 4/5).
    Staggered { stag_m: i64, stag_n: i64 },
}

impl Default for PrtMode {
    fn default() -> Self {
        PrtMode::Fixed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of compute worker threads.
    pub n_threads: usize,
    pub xmit_rcv_mode: XmitRcvMode,
    pub prt_mode: PrtMode,
    pub window: WindowType,
    pub width_method: WidthMethod,

    /// SNR below which a channel is treated as having no signal, dB.
    pub min_detectable_snr_db: f64,
    pub min_snr_db_for_zdr: f64,
    pub min_snr_db_for_ldr: f64,

    /// Compute ZDR from per-channel SNR rather than noise-subtracted powers.
    pub compute_zdr_using_snr: bool,
    pub compute_cpa_using_alt: bool,
    pub change_vel_sign: bool,
    pub change_vel_sign_staggered: bool,
    pub change_phidp_sign: bool,

    /// Correct velocity for platform motion when measured velocity is valid.
    pub correct_for_platform_motion: bool,
    /// Adjust DBZ/ZDR for measured vs calibrated transmit power.
    pub adjust_dbz_for_measured_xmit_power: bool,
    pub adjust_zdr_for_measured_xmit_power: bool,

    pub clutter: ClutterConfig,
    pub cmd: CmdConfig,
    pub censoring: CensoringConfig,
    pub median: MedianConfig,

    /// Which field sets each beam carries at copy-out.
    pub field_selection: FieldSelection,

    /// Warn rather than fail when the calibration snapshot is older than
    /// this many seconds; 0 disables the check.
    pub max_calib_age_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            n_threads: 4,
            xmit_rcv_mode: XmitRcvMode::SinglePol,
            prt_mode: PrtMode::Fixed,
            window: WindowType::default(),
            width_method: WidthMethod::default(),
            min_detectable_snr_db: -12.0,
            min_snr_db_for_zdr: -20.0,
            min_snr_db_for_ldr: -20.0,
            compute_zdr_using_snr: false,
            compute_cpa_using_alt: false,
            change_vel_sign: false,
            change_vel_sign_staggered: false,
            change_phidp_sign: false,
            correct_for_platform_motion: false,
            adjust_dbz_for_measured_xmit_power: false,
            adjust_zdr_for_measured_xmit_power: false,
            clutter: ClutterConfig::default(),
            cmd: CmdConfig::default(),
            censoring: CensoringConfig::default(),
            median: MedianConfig::default(),
            field_selection: FieldSelection::Both,
            max_calib_age_secs: 0,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.n_threads == 0 {
            return Err(EngineError::Config("n_threads must be > 0".to_string()));
        }
        if let PrtMode::Staggered { stag_m, stag_n } = self.prt_mode {
            if stag_n != stag_m + 1 || !(2..=4).contains(&stag_m) {
                return Err(EngineError::Config(format!(
                    "unsupported stagger ratio {}/{}",
                    stag_m, stag_n
                )));
            }
            if self.xmit_rcv_mode == XmitRcvMode::SinglePolV {
                return Err(EngineError::Config(
                    "staggered PRT is not supported in V-only single polarization".to_string(),
                ));
            }
        }
        self.clutter.validate()?;
        self.cmd.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClutterConfig {
    pub strategy: FilterStrategy,
    /// Notch width for the simple notch filter, m/s.
    pub notch_width_mps: f64,
    /// Maximum width assumed for the clutter peak, m/s.
    pub clutter_width_mps: f64,
    /// Initial notch searched for the clutter peak, m/s.
    pub init_notch_width_mps: f64,
    pub apply_spectral_residue_correction: bool,
    pub min_snr_db_for_residue_correction: f64,
    /// Legacy db-for-db correction in place of the interpolated residue
    /// correction.
    pub apply_db_for_db_correction: bool,
    pub db_for_db_ratio: f64,
    pub db_for_db_threshold: f64,
    /// Number of segments used for the spectral noise estimate.
    pub spectral_noise_segments: usize,
    /// Regression filter polynomial order; 0 selects order from CNR.
    pub regression_order: usize,
    /// Interpolate across the regression notch in the spectral domain.
    pub regression_interp_across_notch: bool,
}

impl Default for ClutterConfig {
    fn default() -> Self {
        Self {
            strategy: FilterStrategy::Adaptive,
            notch_width_mps: 3.0,
            clutter_width_mps: 1.0,
            init_notch_width_mps: 1.5,
            apply_spectral_residue_correction: false,
            min_snr_db_for_residue_correction: 60.0,
            apply_db_for_db_correction: false,
            db_for_db_ratio: 0.2,
            db_for_db_threshold: 40.0,
            spectral_noise_segments: 8,
            regression_order: 0,
            regression_interp_across_notch: true,
        }
    }
}

impl ClutterConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.notch_width_mps <= 0.0 {
            return Err(EngineError::Config(
                "notch_width_mps must be positive".to_string(),
            ));
        }
        if self.spectral_noise_segments < 2 {
            return Err(EngineError::Config(
                "spectral_noise_segments must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// Piecewise-linear membership function for one CMD feature.
///
/// Points must be monotonically increasing in x; interest is interpolated
/// between them and clamped to the end values outside the range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterestMapConfig {
    pub points: Vec<(f64, f64)>,
    pub weight: f64,
}

impl InterestMapConfig {
    pub fn new(points: Vec<(f64, f64)>, weight: f64) -> Self {
        Self { points, weight }
    }

    fn validate(&self, label: &str) -> EngineResult<()> {
        if self.points.is_empty() {
            return Err(EngineError::Config(format!(
                "interest map {} has no points",
                label
            )));
        }
        for pair in self.points.windows(2) {
            if pair[1].0 <= pair[0].0 {
                return Err(EngineError::Config(format!(
                    "interest map {} x values must increase: {} then {}",
                    label, pair[0].0, pair[1].0
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpeckleCategory {
    /// Maximum run length this category applies to.
    pub max_run_len: usize,
    /// CMD value below which the run is cleared.
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CmdConfig {
    pub cmd_threshold: f64,
    /// Gates below this SNR are never classified: no likelihood, no flag.
    pub cmd_snr_threshold_db: f64,
    /// Number of gates in the range kernel for TDBZ and SPIN.
    pub kernel_len: usize,
    /// DBZ change that counts as a spin sign change.
    pub spin_dbz_threshold: f64,
    /// Number of gates for ZDR and PHIDP sdev.
    pub sdev_len: usize,

    pub tdbz_map: InterestMapConfig,
    pub spin_map: InterestMapConfig,
    pub cpa_map: InterestMapConfig,
    pub zdr_sdev_map: InterestMapConfig,
    pub phidp_sdev_map: InterestMapConfig,

    /// Use max(TDBZ, SPIN) interest in place of the separate features.
    pub use_max_tdbz_spin: bool,

    /// Check RHOHV improvement from filtering before applying the flag.
    pub apply_rhohv_test: bool,
    pub rhohv_test_min_improvement: f64,
    /// RHOHV band within which the improvement test runs.
    pub rhohv_test_min_rhohv: f64,
    pub rhohv_test_max_rhohv: f64,

    /// Lower the CMD threshold where off-zero spectral SNR indicates
    /// weather away from DC.
    pub apply_off_zero_snr_check: bool,
    pub off_zero_snr_threshold_db: f64,
    pub off_zero_notch_width_mps: f64,
    pub cmd_threshold_for_off_zero: f64,

    /// Zero the CMD where spectral SNR indicates wind-farm contamination.
    pub apply_windfarm_check: bool,
    pub windfarm_spectral_snr_db: f64,
    /// Spectral SNR is computed only at gates above these SNR and CPA
    /// limits; elsewhere the check cannot fire.
    pub windfarm_min_snr_db: f64,
    pub windfarm_min_cpa: f64,

    pub apply_speckle_filter: bool,
    pub speckle_categories: Vec<SpeckleCategory>,

    pub apply_gap_filter: bool,
    pub gap_filter_len: usize,
    pub gap_filter_threshold: f64,

    /// NEXRAD-style spike censoring applied to the filtered fields.
    pub apply_nexrad_spike_filter: bool,
}

impl Default for CmdConfig {
    fn default() -> Self {
        Self {
            cmd_threshold: 0.5,
            cmd_snr_threshold_db: 3.0,
            kernel_len: 9,
            spin_dbz_threshold: 11.0,
            sdev_len: 9,
            tdbz_map: InterestMapConfig::new(vec![(0.0, 0.0), (40.0, 1.0)], 1.0),
            spin_map: InterestMapConfig::new(vec![(0.0, 0.0), (25.0, 1.0)], 1.0),
            cpa_map: InterestMapConfig::new(vec![(0.6, 0.0), (0.9, 1.0)], 1.0),
            zdr_sdev_map: InterestMapConfig::new(vec![(1.2, 0.0), (2.4, 1.0)], 1.0),
            phidp_sdev_map: InterestMapConfig::new(vec![(10.0, 0.0), (15.0, 1.0)], 1.0),
            use_max_tdbz_spin: true,
            apply_rhohv_test: false,
            rhohv_test_min_improvement: 2.0,
            rhohv_test_min_rhohv: 0.5,
            rhohv_test_max_rhohv: 0.95,
            apply_off_zero_snr_check: false,
            off_zero_snr_threshold_db: 10.0,
            off_zero_notch_width_mps: 3.0,
            cmd_threshold_for_off_zero: 0.3,
            apply_windfarm_check: false,
            windfarm_spectral_snr_db: 25.0,
            windfarm_min_snr_db: 10.0,
            windfarm_min_cpa: 0.9,
            apply_speckle_filter: true,
            speckle_categories: vec![
                SpeckleCategory {
                    max_run_len: 1,
                    threshold: 0.35,
                },
                SpeckleCategory {
                    max_run_len: 2,
                    threshold: 0.40,
                },
                SpeckleCategory {
                    max_run_len: 3,
                    threshold: 0.45,
                },
            ],
            apply_gap_filter: true,
            gap_filter_len: 3,
            gap_filter_threshold: 0.35,
            apply_nexrad_spike_filter: false,
        }
    }
}

impl CmdConfig {
    fn validate(&self) -> EngineResult<()> {
        self.tdbz_map.validate("tdbz")?;
        self.spin_map.validate("spin")?;
        self.cpa_map.validate("cpa")?;
        self.zdr_sdev_map.validate("zdr_sdev")?;
        self.phidp_sdev_map.validate("phidp_sdev")?;
        if self.kernel_len < 3 {
            return Err(EngineError::Config(
                "cmd kernel_len must be at least 3".to_string(),
            ));
        }
        for pair in self.speckle_categories.windows(2) {
            if pair[1].max_run_len <= pair[0].max_run_len {
                return Err(EngineError::Config(
                    "speckle categories must have increasing run lengths".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CensorMode {
    /// No censoring.
    None,
    /// Censor using the noise flag from an external noise locator.
    NoiseFlag,
    /// Censor where both SNR and NCP fall below their thresholds.
    SnrAndNcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CensoringConfig {
    pub mode: CensorMode,
    pub snr_threshold_db: f64,
    pub ncp_threshold: f64,
    /// Un-censor single-gate and double-gate holes between valid runs.
    pub apply_fill_in: bool,
}

impl Default for CensoringConfig {
    fn default() -> Self {
        Self {
            mode: CensorMode::None,
            snr_threshold_db: 0.0,
            ncp_threshold: 0.15,
            apply_fill_in: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MedianConfig {
    pub apply_to_cpa: bool,
    pub cpa_filter_len: usize,
    pub apply_to_zdr: bool,
    pub zdr_filter_len: usize,
    pub apply_to_rhohv: bool,
    pub rhohv_filter_len: usize,
    /// Median filter applied to the unfolded staggered velocity before the
    /// outlier cleanup pass.
    pub stag_vel_filter_len: usize,
}

impl Default for MedianConfig {
    fn default() -> Self {
        Self {
            apply_to_cpa: true,
            cpa_filter_len: 5,
            apply_to_zdr: false,
            zdr_filter_len: 5,
            apply_to_rhohv: false,
            rhohv_filter_len: 5,
            stag_vel_filter_len: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_threads_is_rejected() {
        let config = EngineConfig {
            n_threads: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_monotonic_interest_map_is_rejected() {
        let mut config = EngineConfig::default();
        config.cmd.tdbz_map = InterestMapConfig::new(vec![(10.0, 0.0), (5.0, 1.0)], 1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_stagger_ratio_is_rejected() {
        let config = EngineConfig {
            prt_mode: PrtMode::Staggered {
                stag_m: 2,
                stag_n: 5,
            },
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = EngineConfig::default();
        let text = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.n_threads, config.n_threads);
        assert_eq!(back.cmd.cmd_threshold, config.cmd.cmd_threshold);
    }
}
