//! Immutable per-beam calibration snapshot.
//!
//! A snapshot is captured once per beam before compute starts, so a
//! calibration update arriving mid-dwell can never mix constants within one
//! beam. All powers are in dBm at the receiver, gains in dB.

use serde::{Deserialize, Serialize};

use crate::prelude::{EngineError, EngineResult, MISSING};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibSnapshot {
    pub wavelength_m: f64,
    /// UTC seconds of the calibration this snapshot was built from.
    pub time_secs: i64,

    // receiver noise, dBm
    pub noise_dbm_hc: f64,
    pub noise_dbm_hx: f64,
    pub noise_dbm_vc: f64,
    pub noise_dbm_vx: f64,

    // receiver gain, dB
    pub receiver_gain_db_hc: f64,
    pub receiver_gain_db_hx: f64,
    pub receiver_gain_db_vc: f64,
    pub receiver_gain_db_vx: f64,

    // dBZ for SNR of 0 dB at 1 km
    pub base_dbz_1km_hc: f64,
    pub base_dbz_1km_hx: f64,
    pub base_dbz_1km_vc: f64,
    pub base_dbz_1km_vx: f64,

    // corrections, dB
    pub dbz_correction: f64,
    pub zdr_correction_db: f64,
    pub ldr_correction_db_h: f64,
    pub ldr_correction_db_v: f64,
    pub system_phidp_deg: f64,

    // calibrated transmit power, dBm; measured power arrives per beam
    pub xmit_power_dbm_h: f64,
    pub xmit_power_dbm_v: f64,
}

impl Default for CalibSnapshot {
    fn default() -> Self {
        Self {
            wavelength_m: 0.10,
            time_secs: 0,
            noise_dbm_hc: MISSING,
            noise_dbm_hx: MISSING,
            noise_dbm_vc: MISSING,
            noise_dbm_vx: MISSING,
            receiver_gain_db_hc: 0.0,
            receiver_gain_db_hx: 0.0,
            receiver_gain_db_vc: 0.0,
            receiver_gain_db_vx: 0.0,
            base_dbz_1km_hc: MISSING,
            base_dbz_1km_hx: MISSING,
            base_dbz_1km_vc: MISSING,
            base_dbz_1km_vx: MISSING,
            dbz_correction: 0.0,
            zdr_correction_db: 0.0,
            ldr_correction_db_h: 0.0,
            ldr_correction_db_v: 0.0,
            system_phidp_deg: 0.0,
            xmit_power_dbm_h: MISSING,
            xmit_power_dbm_v: MISSING,
        }
    }
}

impl CalibSnapshot {
    /// Linear noise power for the H co-polar channel.
    pub fn noise_power_hc(&self) -> f64 {
        dbm_to_watts(self.noise_dbm_hc)
    }
    pub fn noise_power_hx(&self) -> f64 {
        dbm_to_watts(self.noise_dbm_hx)
    }
    pub fn noise_power_vc(&self) -> f64 {
        dbm_to_watts(self.noise_dbm_vc)
    }
    pub fn noise_power_vx(&self) -> f64 {
        dbm_to_watts(self.noise_dbm_vx)
    }

    /// Check the fields required for single-channel reflectivity.
    pub fn validate_h_only(&self) -> EngineResult<()> {
        if self.noise_dbm_hc == MISSING || self.base_dbz_1km_hc == MISSING {
            return Err(EngineError::Calibration(
                "H channel noise or base dbz not set".to_string(),
            ));
        }
        self.validate_common()
    }

    /// Check the fields required for V-only processing.
    pub fn validate_v_only(&self) -> EngineResult<()> {
        if self.noise_dbm_vc == MISSING || self.base_dbz_1km_vc == MISSING {
            return Err(EngineError::Calibration(
                "V channel noise or base dbz not set".to_string(),
            ));
        }
        self.validate_common()
    }

    /// Check the fields required for dual-channel processing.
    pub fn validate_dual(&self) -> EngineResult<()> {
        self.validate_h_only()?;
        if self.noise_dbm_vc == MISSING || self.base_dbz_1km_vc == MISSING {
            return Err(EngineError::Calibration(
                "V channel noise or base dbz not set".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_common(&self) -> EngineResult<()> {
        if !(self.wavelength_m > 0.0) {
            return Err(EngineError::Calibration(format!(
                "bad wavelength: {}",
                self.wavelength_m
            )));
        }
        Ok(())
    }
}

/// Convert dBm to linear power. MISSING maps to a tiny positive floor so
/// downstream log10 calls stay finite.
fn dbm_to_watts(dbm: f64) -> f64 {
    if dbm == MISSING {
        return 1.0e-12;
    }
    10.0_f64.powf(dbm / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dual_calib() -> CalibSnapshot {
        CalibSnapshot {
            noise_dbm_hc: -77.0,
            noise_dbm_vc: -77.5,
            base_dbz_1km_hc: -46.0,
            base_dbz_1km_vc: -46.2,
            ..CalibSnapshot::default()
        }
    }

    #[test]
    fn default_snapshot_fails_validation() {
        assert!(CalibSnapshot::default().validate_h_only().is_err());
    }

    #[test]
    fn dual_snapshot_passes_both_validations() {
        let calib = dual_calib();
        assert!(calib.validate_h_only().is_ok());
        assert!(calib.validate_dual().is_ok());
    }

    #[test]
    fn noise_power_converts_from_dbm() {
        let calib = dual_calib();
        let expected = 10.0_f64.powf(-7.7);
        assert!((calib.noise_power_hc() - expected).abs() < 1e-12);
    }
}
