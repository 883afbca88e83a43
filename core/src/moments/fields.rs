//! Named moment outputs for a single gate.
//!
//! Two independent instances live in each gate: the unfiltered set and the
//! clutter-filtered set. The filtered set starts as a copy of the unfiltered
//! set and is selectively overwritten where filtering actually ran, so the
//! two never alias.

use num_complex::Complex64;

use crate::prelude::{is_valid, MISSING};

#[derive(Debug, Clone)]
pub struct MomentsFields {
    // signal-to-noise
    pub snr: f64,
    pub snrhc: f64,
    pub snrhx: f64,
    pub snrvc: f64,
    pub snrvx: f64,

    // uncalibrated power
    pub dbm: f64,
    pub dbmhc: f64,
    pub dbmhx: f64,
    pub dbmvc: f64,
    pub dbmvx: f64,
    pub dbmhc_ns: f64,
    pub dbmhx_ns: f64,
    pub dbmvc_ns: f64,
    pub dbmvx_ns: f64,

    // reflectivity
    pub dbz: f64,
    pub dbzhc: f64,
    pub dbzhx: f64,
    pub dbzvc: f64,
    pub dbzvx: f64,
    pub dbz_no_atmos_atten: f64,

    // velocity
    pub vel: f64,
    pub vel_alt: f64,
    pub vel_hv: f64,
    pub vel_h_only: f64,
    pub vel_v_only: f64,
    pub vel_prt_short: f64,
    pub vel_prt_long: f64,
    pub vel_diff: f64,
    pub vel_unfold_interval: f64,
    pub vel_corrected: f64,

    // spectrum width
    pub width: f64,
    pub width_r0r1: f64,
    pub width_r1r2: f64,
    pub width_r1r3: f64,
    pub width_ppls: f64,
    pub width_h_only: f64,
    pub width_v_only: f64,
    pub width_prt_short: f64,
    pub width_prt_long: f64,
    pub width_corrected: f64,

    // normalized coherent power
    pub ncp: f64,
    pub ncp_h_only: f64,
    pub ncp_v_only: f64,
    pub ncp_h_minus_v: f64,
    pub ncp_prt_short: f64,
    pub ncp_prt_long: f64,
    pub ncp_trip_flag: f64,

    // dual-pol ratios
    pub zdrm: f64,
    pub zdr: f64,
    pub zdr_bias: f64,
    pub ldr: f64,
    pub ldrhm: f64,
    pub ldrh: f64,
    pub ldrvm: f64,
    pub ldrv: f64,
    pub ldr_diff: f64,
    pub ldr_mean: f64,
    pub rhohv: f64,
    pub rhohv_nnc: f64,
    pub phidp: f64,
    pub phidp0: f64,
    pub kdp: f64,
    pub dbz_atten_corrected: f64,
    pub zdr_atten_corrected: f64,

    // CMD features and results
    pub cpa: f64,
    pub tdbz: f64,
    pub spin: f64,
    pub max_tdbz_spin: f64,
    pub zdr_sdev: f64,
    pub phidp_sdev: f64,
    pub dbz_diff_sq: f64,
    pub dbz_spin_change: f64,
    pub tdbz_interest: f64,
    pub spin_interest: f64,
    pub cpa_interest: f64,
    pub zdr_sdev_interest: f64,
    pub phidp_sdev_interest: f64,
    pub cmd: f64,
    pub cmd_flag: bool,
    pub rhohv_test_unfilt: f64,
    pub rhohv_test_filt: f64,
    pub rhohv_test_improv: f64,
    pub rhohv_test_flag: bool,

    // clutter diagnostics
    pub clut: f64,
    pub clut_2_wx_ratio: f64,
    pub spectral_noise: f64,
    pub spectral_snr: f64,
    pub ozsnr: f64,

    // censoring / noise status
    pub censoring_flag: bool,
    pub noise_flag: bool,
    pub signal_flag: bool,

    // covariance diagnostics
    pub lag0_hc_db: f64,
    pub lag0_hx_db: f64,
    pub lag0_vc_db: f64,
    pub lag0_vx_db: f64,
    pub lag1_hc_db: f64,
    pub lag1_hc_phase: f64,
    pub lag2_hc_db: f64,
    pub lag2_hc_phase: f64,
    pub lag3_hc_db: f64,
    pub lag3_hc_phase: f64,
    pub lag1_vc_db: f64,
    pub lag1_vc_phase: f64,
    pub lag2_vc_db: f64,
    pub lag2_vc_phase: f64,
    pub lag3_vc_db: f64,
    pub lag3_vc_phase: f64,
    pub rvvhh0_db: f64,
    pub rvvhh0_phase: f64,

    // hook for the external noise locator
    pub phase_for_noise: Complex64,

    // per-beam metadata stamped into every gate
    pub prt: f64,
    pub num_pulses: f64,
    pub prt_short: f64,
    pub prt_long: f64,
}

impl Default for MomentsFields {
    fn default() -> Self {
        Self::new()
    }
}

impl MomentsFields {
    pub fn new() -> Self {
        Self {
            snr: MISSING,
            snrhc: MISSING,
            snrhx: MISSING,
            snrvc: MISSING,
            snrvx: MISSING,
            dbm: MISSING,
            dbmhc: MISSING,
            dbmhx: MISSING,
            dbmvc: MISSING,
            dbmvx: MISSING,
            dbmhc_ns: MISSING,
            dbmhx_ns: MISSING,
            dbmvc_ns: MISSING,
            dbmvx_ns: MISSING,
            dbz: MISSING,
            dbzhc: MISSING,
            dbzhx: MISSING,
            dbzvc: MISSING,
            dbzvx: MISSING,
            dbz_no_atmos_atten: MISSING,
            vel: MISSING,
            vel_alt: MISSING,
            vel_hv: MISSING,
            vel_h_only: MISSING,
            vel_v_only: MISSING,
            vel_prt_short: MISSING,
            vel_prt_long: MISSING,
            vel_diff: MISSING,
            vel_unfold_interval: MISSING,
            vel_corrected: MISSING,
            width: MISSING,
            width_r0r1: MISSING,
            width_r1r2: MISSING,
            width_r1r3: MISSING,
            width_ppls: MISSING,
            width_h_only: MISSING,
            width_v_only: MISSING,
            width_prt_short: MISSING,
            width_prt_long: MISSING,
            width_corrected: MISSING,
            ncp: MISSING,
            ncp_h_only: MISSING,
            ncp_v_only: MISSING,
            ncp_h_minus_v: MISSING,
            ncp_prt_short: MISSING,
            ncp_prt_long: MISSING,
            ncp_trip_flag: MISSING,
            zdrm: MISSING,
            zdr: MISSING,
            zdr_bias: MISSING,
            ldr: MISSING,
            ldrhm: MISSING,
            ldrh: MISSING,
            ldrvm: MISSING,
            ldrv: MISSING,
            ldr_diff: MISSING,
            ldr_mean: MISSING,
            rhohv: MISSING,
            rhohv_nnc: MISSING,
            phidp: MISSING,
            phidp0: MISSING,
            kdp: MISSING,
            dbz_atten_corrected: MISSING,
            zdr_atten_corrected: MISSING,
            cpa: MISSING,
            tdbz: MISSING,
            spin: MISSING,
            max_tdbz_spin: MISSING,
            zdr_sdev: MISSING,
            phidp_sdev: MISSING,
            dbz_diff_sq: MISSING,
            dbz_spin_change: MISSING,
            tdbz_interest: MISSING,
            spin_interest: MISSING,
            cpa_interest: MISSING,
            zdr_sdev_interest: MISSING,
            phidp_sdev_interest: MISSING,
            cmd: MISSING,
            cmd_flag: false,
            rhohv_test_unfilt: MISSING,
            rhohv_test_filt: MISSING,
            rhohv_test_improv: MISSING,
            rhohv_test_flag: false,
            clut: MISSING,
            clut_2_wx_ratio: MISSING,
            spectral_noise: MISSING,
            spectral_snr: MISSING,
            ozsnr: MISSING,
            censoring_flag: false,
            noise_flag: false,
            signal_flag: false,
            lag0_hc_db: MISSING,
            lag0_hx_db: MISSING,
            lag0_vc_db: MISSING,
            lag0_vx_db: MISSING,
            lag1_hc_db: MISSING,
            lag1_hc_phase: MISSING,
            lag2_hc_db: MISSING,
            lag2_hc_phase: MISSING,
            lag3_hc_db: MISSING,
            lag3_hc_phase: MISSING,
            lag1_vc_db: MISSING,
            lag1_vc_phase: MISSING,
            lag2_vc_db: MISSING,
            lag2_vc_phase: MISSING,
            lag3_vc_db: MISSING,
            lag3_vc_phase: MISSING,
            rvvhh0_db: MISSING,
            rvvhh0_phase: MISSING,
            phase_for_noise: Complex64::new(0.0, 0.0),
            prt: MISSING,
            num_pulses: MISSING,
            prt_short: MISSING,
            prt_long: MISSING,
        }
    }

    /// Clear the fixed censoring list to MISSING, leaving diagnostics alone.
    pub fn censor(&mut self) {
        self.ncp = MISSING;
        self.snr = MISSING;
        self.dbm = MISSING;
        self.dbz = MISSING;
        self.dbz_no_atmos_atten = MISSING;
        self.vel = MISSING;
        self.vel_alt = MISSING;
        self.vel_hv = MISSING;
        self.vel_h_only = MISSING;
        self.vel_v_only = MISSING;
        self.width = MISSING;
        self.width_h_only = MISSING;
        self.width_v_only = MISSING;
        self.zdrm = MISSING;
        self.zdr = MISSING;
        self.ldrhm = MISSING;
        self.ldrh = MISSING;
        self.ldrvm = MISSING;
        self.ldrv = MISSING;
        self.ldr = MISSING;
        self.rhohv = MISSING;
        self.rhohv_nnc = MISSING;
        self.phidp = MISSING;
        self.kdp = MISSING;
        self.snrhc = MISSING;
        self.snrhx = MISSING;
        self.snrvc = MISSING;
        self.snrvx = MISSING;
        self.dbmhc = MISSING;
        self.dbmhx = MISSING;
        self.dbmvc = MISSING;
        self.dbmvx = MISSING;
        self.dbmhc_ns = MISSING;
        self.dbmhx_ns = MISSING;
        self.dbmvc_ns = MISSING;
        self.dbmvx_ns = MISSING;
        self.dbzhc = MISSING;
        self.dbzhx = MISSING;
        self.dbzvc = MISSING;
        self.dbzvx = MISSING;
    }
}

/// Typed handle onto the principal output fields.
///
/// Replaces the original's pointer-offset field lookup with an explicit
/// enum-to-accessor mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum FieldId {
    Dbz,
    Vel,
    Width,
    Snr,
    Dbm,
    Ncp,
    Zdr,
    Ldr,
    Rhohv,
    Phidp,
    Kdp,
    Cpa,
    Tdbz,
    Spin,
    ZdrSdev,
    PhidpSdev,
    Cmd,
    Clut,
    SpectralSnr,
    Ozsnr,
}

impl FieldId {
    pub fn get(&self, fields: &MomentsFields) -> f64 {
        match self {
            FieldId::Dbz => fields.dbz,
            FieldId::Vel => fields.vel,
            FieldId::Width => fields.width,
            FieldId::Snr => fields.snr,
            FieldId::Dbm => fields.dbm,
            FieldId::Ncp => fields.ncp,
            FieldId::Zdr => fields.zdr,
            FieldId::Ldr => fields.ldr,
            FieldId::Rhohv => fields.rhohv,
            FieldId::Phidp => fields.phidp,
            FieldId::Kdp => fields.kdp,
            FieldId::Cpa => fields.cpa,
            FieldId::Tdbz => fields.tdbz,
            FieldId::Spin => fields.spin,
            FieldId::ZdrSdev => fields.zdr_sdev,
            FieldId::PhidpSdev => fields.phidp_sdev,
            FieldId::Cmd => fields.cmd,
            FieldId::Clut => fields.clut,
            FieldId::SpectralSnr => fields.spectral_snr,
            FieldId::Ozsnr => fields.ozsnr,
        }
    }

    pub fn set(&self, fields: &mut MomentsFields, val: f64) {
        match self {
            FieldId::Dbz => fields.dbz = val,
            FieldId::Vel => fields.vel = val,
            FieldId::Width => fields.width = val,
            FieldId::Snr => fields.snr = val,
            FieldId::Dbm => fields.dbm = val,
            FieldId::Ncp => fields.ncp = val,
            FieldId::Zdr => fields.zdr = val,
            FieldId::Ldr => fields.ldr = val,
            FieldId::Rhohv => fields.rhohv = val,
            FieldId::Phidp => fields.phidp = val,
            FieldId::Kdp => fields.kdp = val,
            FieldId::Cpa => fields.cpa = val,
            FieldId::Tdbz => fields.tdbz = val,
            FieldId::Spin => fields.spin = val,
            FieldId::ZdrSdev => fields.zdr_sdev = val,
            FieldId::PhidpSdev => fields.phidp_sdev = val,
            FieldId::Cmd => fields.cmd = val,
            FieldId::Clut => fields.clut = val,
            FieldId::SpectralSnr => fields.spectral_snr = val,
            FieldId::Ozsnr => fields.ozsnr = val,
        }
    }

    pub fn is_valid(&self, fields: &MomentsFields) -> bool {
        is_valid(self.get(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_fields_start_missing() {
        let fields = MomentsFields::new();
        assert_eq!(fields.dbz, MISSING);
        assert_eq!(fields.vel, MISSING);
        assert!(!fields.cmd_flag);
    }

    #[test]
    fn censor_clears_output_fields_but_not_diagnostics() {
        let mut fields = MomentsFields::new();
        fields.dbz = 35.0;
        fields.vel = -4.2;
        fields.cmd = 0.8;
        fields.censor();
        assert_eq!(fields.dbz, MISSING);
        assert_eq!(fields.vel, MISSING);
        assert_eq!(fields.cmd, 0.8);
    }

    #[test]
    fn field_id_round_trips_values() {
        let mut fields = MomentsFields::new();
        FieldId::Zdr.set(&mut fields, 1.5);
        assert_eq!(FieldId::Zdr.get(&fields), 1.5);
        assert!(FieldId::Zdr.is_valid(&fields));
        assert!(!FieldId::Vel.is_valid(&fields));
    }
}
