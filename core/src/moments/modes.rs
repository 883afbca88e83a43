//! Per-gate moment computation for each transmit/receive mode.
//!
//! Each routine takes the prepared (windowed or filtered) time series for
//! one gate and fills a `MomentsFields`. The alternating-mode phidp and
//! velocity follow the Zahrai/Zrnic formulation, with the system phidp
//! offset removed before differencing so phidp does not wrap prematurely.

use num_complex::Complex64;
use std::f64::consts::PI;

use super::cpa::{compute_cpa, compute_cpa_alt, compute_cpa_alt_dual, compute_cpa_dual};
use super::estimator::MomentEstimator;
use super::fields::MomentsFields;
use super::stag::StagCovars;
use super::width::{
    width_hybrid, width_ppls, width_r0r1, width_r1r2, width_r1r3, width_stag, WidthMethod,
};
use crate::math::complex::{complex_mean, mean_conjugate_product, mean_power, phasor};
use crate::prelude::{constrain, MISSING};

const POWER_FLOOR: f64 = 1.0e-12;

fn pwr_db(power: f64) -> f64 {
    10.0 * power.max(POWER_FLOOR).log10()
}

fn mag_db(mag: f64) -> f64 {
    20.0 * mag.max(POWER_FLOOR).log10()
}

impl MomentEstimator {
    /// Single polarization: H channel only, full dwell.
    pub fn single_pol(
        &self,
        iqhc: &[Complex64],
        gate_num: usize,
        is_filtered: bool,
        fields: &mut MomentsFields,
    ) {
        let n = self.n_samples;
        let lag0_hc = mean_power(iqhc);
        let lag1_hc = mean_conjugate_product(&iqhc[1..], &iqhc[..n - 1]);
        let lag2_hc = mean_conjugate_product(&iqhc[2..], &iqhc[..n - 2]);
        let lag3_hc = mean_conjugate_product(&iqhc[3..], &iqhc[..n - 3]);

        self.compute_mom_single_pol(lag0_hc, lag1_hc, lag2_hc, lag3_hc, gate_num, fields);

        if !is_filtered {
            fields.cpa = if self.use_cpa_alt {
                compute_cpa_alt(iqhc)
            } else {
                compute_cpa(iqhc)
            };
        }
    }

    pub fn compute_mom_single_pol(
        &self,
        lag0_hc: f64,
        lag1_hc: Complex64,
        lag2_hc: Complex64,
        lag3_hc: Complex64,
        gate_num: usize,
        fields: &mut MomentsFields,
    ) {
        self.set_field_meta(fields);

        fields.lag0_hc_db = pwr_db(lag0_hc);

        let dbm_hc = pwr_db(lag0_hc) - self.receiver_gain_db_hc;
        fields.dbmhc = dbm_hc;
        fields.dbm = dbm_hc;

        let lag0_hc_ns = lag0_hc - self.est_noise_power_hc;

        let mut snr_hc_ok = true;
        if lag0_hc_ns < self.est_noise_power_hc * self.min_detectable_snr {
            snr_hc_ok = false;
            fields.censoring_flag = true;
        }

        if snr_hc_ok {
            let snr_hc = lag0_hc_ns / self.cal_noise_power_hc;
            let snr_db = 10.0 * snr_hc.log10();
            fields.dbmhc_ns = pwr_db(lag0_hc_ns) - self.receiver_gain_db_hc;
            fields.snrhc = snr_db;
            fields.snr = snr_db;

            let dbz_no_atten = snr_db
                + self.base_dbz_1km_hc
                + self.range_corr(gate_num)
                + self.dbz_correction;
            let dbz = dbz_no_atten + self.atmos_atten(gate_num);
            fields.dbzhc = self.adjust_dbz_for_pwr_h(dbz);
            fields.dbz = fields.dbzhc;
            fields.dbz_no_atmos_atten = self.adjust_dbz_for_pwr_h(dbz_no_atten);
        }

        // velocity from lag-1 phase

        let lag1_hc_mag = lag1_hc.norm();
        let arg_vel = lag1_hc.arg();
        fields.lag1_hc_db = mag_db(lag1_hc_mag);
        fields.lag1_hc_phase = arg_vel.to_degrees();

        fields.vel = (arg_vel / PI) * self.nyquist * self.vel_sign;
        fields.phase_for_noise = lag1_hc;

        fields.ncp = constrain(lag1_hc_mag / lag0_hc.max(POWER_FLOOR), 0.0, 1.0);

        // width

        let lag2_hc_mag = lag2_hc.norm();
        fields.lag2_hc_db = mag_db(lag2_hc_mag);
        fields.lag2_hc_phase = lag2_hc.arg().to_degrees();
        let lag3_hc_mag = lag3_hc.norm();
        fields.lag3_hc_db = mag_db(lag3_hc_mag);
        fields.lag3_hc_phase = lag3_hc.arg().to_degrees();

        let r1 = lag1_hc_mag / self.window_r1;
        let r2 = lag2_hc_mag / self.window_r2;
        let r3 = lag3_hc_mag / self.window_r3;

        fields.width_r1r2 = constrain(width_r1r2(r1, r2, self.nyquist), 0.01, self.nyquist);
        fields.width_r1r3 = constrain(width_r1r3(r1, r3, self.nyquist), 0.01, self.nyquist);
        fields.width = fields.width_r1r2;

        if snr_hc_ok {
            let r0 = lag0_hc_ns;
            fields.width_r0r1 = constrain(width_r0r1(r0, r1, self.nyquist), 0.01, self.nyquist);
            fields.width_ppls =
                constrain(width_ppls(r0, r1, r2, self.nyquist), 0.01, self.nyquist);
            match self.width_method {
                WidthMethod::R0R1 => fields.width = fields.width_r0r1,
                WidthMethod::Hybrid => {
                    let width = width_hybrid(
                        self.width_method,
                        self.n_samples,
                        r0,
                        r1,
                        r2,
                        r3,
                        self.nyquist,
                    );
                    fields.width = constrain(width, 0.01, self.nyquist);
                }
                WidthMethod::R1R2 => {}
            }
        }
    }

    /// Single polarization on the V channel, full dwell.
    pub fn single_pol_v(
        &self,
        iqvc: &[Complex64],
        gate_num: usize,
        is_filtered: bool,
        fields: &mut MomentsFields,
    ) {
        let n = self.n_samples;
        let lag0_vc = mean_power(iqvc);
        let lag1_vc = mean_conjugate_product(&iqvc[1..], &iqvc[..n - 1]);
        let lag2_vc = mean_conjugate_product(&iqvc[2..], &iqvc[..n - 2]);
        let lag3_vc = mean_conjugate_product(&iqvc[3..], &iqvc[..n - 3]);

        self.compute_mom_single_pol_v(lag0_vc, lag1_vc, lag2_vc, lag3_vc, gate_num, fields);

        if !is_filtered {
            fields.cpa = if self.use_cpa_alt {
                compute_cpa_alt(iqvc)
            } else {
                compute_cpa(iqvc)
            };
        }
    }

    pub fn compute_mom_single_pol_v(
        &self,
        lag0_vc: f64,
        lag1_vc: Complex64,
        lag2_vc: Complex64,
        lag3_vc: Complex64,
        gate_num: usize,
        fields: &mut MomentsFields,
    ) {
        self.set_field_meta(fields);

        fields.lag0_vc_db = pwr_db(lag0_vc);

        let dbm_vc = pwr_db(lag0_vc) - self.receiver_gain_db_vc;
        fields.dbmvc = dbm_vc;
        fields.dbm = dbm_vc;

        let lag0_vc_ns = lag0_vc - self.est_noise_power_vc;
        let snr_vc_ok = self.check_snr(lag0_vc_ns, self.est_noise_power_vc, fields);
        let snr_vc = lag0_vc_ns / self.cal_noise_power_vc;

        if snr_vc_ok {
            fields.dbmvc_ns = pwr_db(lag0_vc_ns) - self.receiver_gain_db_vc;
            let snrvc = 10.0 * snr_vc.log10();
            fields.snrvc = snrvc;
            fields.snr = snrvc;
        }

        self.set_dbz_v(snr_vc, snr_vc_ok, gate_num, fields);
        if snr_vc_ok {
            fields.dbz = fields.dbzvc;
            fields.dbz_no_atmos_atten = self.adjust_dbz_for_pwr_v(
                10.0 * snr_vc.log10()
                    + self.base_dbz_1km_vc
                    + self.range_corr(gate_num)
                    + self.dbz_correction,
            );
        }

        // velocity from lag-1 phase

        let lag1_vc_mag = lag1_vc.norm();
        fields.lag1_vc_db = mag_db(lag1_vc_mag);
        fields.lag1_vc_phase = lag1_vc.arg().to_degrees();
        fields.vel = (lag1_vc.arg() / PI) * self.nyquist * self.vel_sign;
        fields.phase_for_noise = lag1_vc;

        fields.ncp = constrain(lag1_vc_mag / lag0_vc.max(POWER_FLOOR), 0.0, 1.0);

        // width

        let lag2_vc_mag = lag2_vc.norm();
        fields.lag2_vc_db = mag_db(lag2_vc_mag);
        fields.lag2_vc_phase = lag2_vc.arg().to_degrees();
        let lag3_vc_mag = lag3_vc.norm();
        fields.lag3_vc_db = mag_db(lag3_vc_mag);
        fields.lag3_vc_phase = lag3_vc.arg().to_degrees();

        let r1 = lag1_vc_mag / self.window_r1;
        let r2 = lag2_vc_mag / self.window_r2;
        let r3 = lag3_vc_mag / self.window_r3;

        fields.width_r1r2 = constrain(width_r1r2(r1, r2, self.nyquist), 0.01, self.nyquist);
        fields.width_r1r3 = constrain(width_r1r3(r1, r3, self.nyquist), 0.01, self.nyquist);
        fields.width = fields.width_r1r2;

        if snr_vc_ok {
            let r0 = lag0_vc_ns;
            fields.width_r0r1 = constrain(width_r0r1(r0, r1, self.nyquist), 0.01, self.nyquist);
            fields.width_ppls =
                constrain(width_ppls(r0, r1, r2, self.nyquist), 0.01, self.nyquist);
            match self.width_method {
                WidthMethod::R0R1 => fields.width = fields.width_r0r1,
                WidthMethod::Hybrid => {
                    let width = width_hybrid(
                        self.width_method,
                        self.n_samples,
                        r0,
                        r1,
                        r2,
                        r3,
                        self.nyquist,
                    );
                    fields.width = constrain(width, 0.01, self.nyquist);
                }
                WidthMethod::R1R2 => {}
            }
        }
    }

    /// Alternating transmit, co-polar receivers only. The half-length
    /// series hold the H-pulse and V-pulse samples respectively, H first.
    pub fn dp_alt_hv_co_only(
        &self,
        iqhc: &[Complex64],
        iqvc: &[Complex64],
        gate_num: usize,
        is_filtered: bool,
        fields: &mut MomentsFields,
    ) {
        let nn = self.n_samples_half - 1;
        let lag0_hc = mean_power(&iqhc[..nn]);
        let lag0_vc = mean_power(&iqvc[..nn]);
        let lag1_vchc = mean_conjugate_product(&iqvc[..nn], &iqhc[..nn]);
        let lag1_hcvc = mean_conjugate_product(&iqhc[1..=nn], &iqvc[..nn]);
        let lag2_hc = mean_conjugate_product(&iqhc[1..=nn], &iqhc[..nn]);
        let lag2_vc = mean_conjugate_product(&iqvc[1..=nn], &iqvc[..nn]);

        self.compute_mom_dp_alt_hv_co_only(
            lag0_hc, lag0_vc, lag1_vchc, lag1_hcvc, lag2_hc, lag2_vc, gate_num, fields,
        );

        if !is_filtered {
            fields.cpa = if self.use_cpa_alt {
                compute_cpa_alt_dual(iqhc, iqvc)
            } else {
                compute_cpa_dual(iqhc, iqvc)
            };
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn compute_mom_dp_alt_hv_co_only(
        &self,
        lag0_hc: f64,
        lag0_vc: f64,
        lag1_vchc: Complex64,
        lag1_hcvc: Complex64,
        lag2_hc: Complex64,
        lag2_vc: Complex64,
        gate_num: usize,
        fields: &mut MomentsFields,
    ) {
        self.set_field_meta(fields);

        fields.lag0_hc_db = pwr_db(lag0_hc);
        fields.lag0_vc_db = pwr_db(lag0_vc);

        let dbm_hc = pwr_db(lag0_hc) - self.receiver_gain_db_hc;
        let dbm_vc = pwr_db(lag0_vc) - self.receiver_gain_db_vc;
        fields.dbmhc = dbm_hc;
        fields.dbmvc = dbm_vc;
        fields.dbm = (dbm_hc + dbm_vc) / 2.0;

        let lag0_hc_ns = lag0_hc - self.est_noise_power_hc;
        let lag0_vc_ns = lag0_vc - self.est_noise_power_vc;

        let snr_hc_ok = self.check_snr(lag0_hc_ns, self.est_noise_power_hc, fields);
        let snr_vc_ok = self.check_snr(lag0_vc_ns, self.est_noise_power_vc, fields);

        let snr_hc = lag0_hc_ns / self.cal_noise_power_hc;
        let snr_vc = lag0_vc_ns / self.cal_noise_power_vc;

        if snr_hc_ok {
            fields.dbmhc_ns = pwr_db(lag0_hc_ns) - self.receiver_gain_db_hc;
            fields.snrhc = 10.0 * snr_hc.log10();
        }
        if snr_vc_ok {
            fields.dbmvc_ns = pwr_db(lag0_vc_ns) - self.receiver_gain_db_vc;
            fields.snrvc = 10.0 * snr_vc.log10();
        }
        if snr_hc_ok && snr_vc_ok {
            fields.snr = 10.0 * ((snr_hc + snr_vc) / 2.0).log10();
        }

        self.set_dbz_h(snr_hc, snr_hc_ok, gate_num, fields);
        self.set_dbz_v(snr_vc, snr_vc_ok, gate_num, fields);
        self.set_zdr(
            snr_hc_ok, snr_vc_ok, lag0_hc_ns, lag0_vc_ns, fields,
        );

        // phidp and velocity, Zahrai/Zrnic alternating formulation

        let mag_lag1_vchc = lag1_vchc.norm();
        let mag_lag1_hcvc = lag1_hcvc.norm();

        let phidp0 = lag1_vchc * lag1_hcvc.conj();
        fields.phidp0 = (phidp0.arg() / 2.0).to_degrees() * self.vel_sign * -1.0 * self.phidp_sign;

        let phi_h = lag1_vchc * self.phidp_offset_alt;
        let phi_v = lag1_hcvc * self.phidp_offset_alt.conj();

        let prod = phi_v * phi_h.conj();
        let phi = -0.5 * prod.arg();
        fields.phidp = phi.to_degrees() * self.vel_sign * -1.0 * self.phidp_sign;

        let mut psi_h = phi_h.arg() - phi;
        let mut psi_v = phi_v.arg() + phi;
        if psi_h < -PI {
            psi_h += 2.0 * PI;
        }
        if psi_h > PI {
            psi_h -= 2.0 * PI;
        }
        if psi_v < -PI {
            psi_v += 2.0 * PI;
        }
        if psi_v > PI {
            psi_v -= 2.0 * PI;
        }

        // velocity phase is the mean of the two phidp-free phases

        let vel_vect = complex_mean(phasor(psi_h), phasor(psi_v));
        fields.vel = (vel_vect.arg() / PI) * self.nyquist * self.vel_sign;
        fields.vel_alt = fields.vel;

        // H-only / V-only velocities for clutter-contaminated gates

        fields.vel_h_only = (lag2_hc.arg() / PI) * (self.nyquist / 2.0) * self.vel_sign;
        fields.vel_v_only = (lag2_vc.arg() / PI) * (self.nyquist / 2.0) * self.vel_sign;

        let lag2_sum = lag2_hc + lag2_vc;
        fields.vel_hv = (lag2_sum.arg() / PI) * (self.nyquist / 2.0) * self.vel_sign;
        fields.phase_for_noise = lag2_sum;

        // width and rhohv, noise corrected

        if snr_hc_ok && snr_vc_ok {
            let mut mean_lag0_ns = (lag0_hc_ns + lag0_vc_ns) / 2.0;
            if mean_lag0_ns <= 0.0 {
                mean_lag0_ns = 1.0e-20;
            }
            let mean_mag_r2 = lag2_sum.norm() / 2.0;
            let rho2 = mean_mag_r2 / mean_lag0_ns;

            if rho2 < 1.0 && rho2 > 0.0 {
                let arg_width = (-0.5 * rho2.ln()).sqrt();
                fields.width = constrain((arg_width / PI) * self.nyquist, 0.01, self.nyquist);
            } else {
                fields.width = 0.01;
            }

            let lag2_hc_mag = lag2_hc.norm();
            fields.lag2_hc_db = mag_db(lag2_hc_mag);
            fields.lag2_hc_phase = lag2_hc.arg().to_degrees();
            let lag2_vc_mag = lag2_vc.norm();
            fields.lag2_vc_db = mag_db(lag2_vc_mag);
            fields.lag2_vc_phase = lag2_vc.arg().to_degrees();

            let r1_h = lag2_hc_mag / self.window_r1;
            fields.width_h_only = constrain(
                width_r0r1(lag0_hc_ns, r1_h, self.nyquist / 2.0),
                0.01,
                self.nyquist,
            );
            let r1_v = lag2_vc_mag / self.window_r1;
            fields.width_v_only = constrain(
                width_r0r1(lag0_vc_ns, r1_v, self.nyquist / 2.0),
                0.01,
                self.nyquist,
            );

            let rhohv1 = (mag_lag1_vchc + mag_lag1_hcvc)
                / (2.0 * (lag0_hc_ns * lag0_vc_ns).max(POWER_FLOOR).sqrt());
            let rhohv0 = rhohv1 / rho2.max(POWER_FLOOR).powf(0.25);
            fields.rhohv = constrain(rhohv0, 0.0, 1.0);
        }

        // ncp and rhohv without noise correction

        let mean_lag0 = (lag0_hc + lag0_vc) / 2.0;
        let mean_mag_r2 = lag2_sum.norm() / 2.0;
        let rho2_nnc = mean_mag_r2 / mean_lag0.max(POWER_FLOOR);
        fields.ncp = constrain(rho2_nnc, 0.0, 1.0);
        fields.ncp_h_only = constrain(lag2_hc.norm() / lag0_hc.max(POWER_FLOOR), 0.0, 1.0);
        fields.ncp_v_only = constrain(lag2_vc.norm() / lag0_vc.max(POWER_FLOOR), 0.0, 1.0);
        fields.ncp_h_minus_v = fields.ncp_h_only - fields.ncp_v_only;

        let rhohv1_nnc =
            (mag_lag1_vchc + mag_lag1_hcvc) / (2.0 * (lag0_hc * lag0_vc).max(POWER_FLOOR).sqrt());
        fields.rhohv_nnc = constrain(rhohv1_nnc / rho2_nnc.max(POWER_FLOOR).powf(0.25), 0.0, 1.0);
    }

    /// Alternating transmit, co-polar and cross-polar receivers.
    #[allow(clippy::too_many_arguments)]
    pub fn dp_alt_hv_co_cross(
        &self,
        iqhc: &[Complex64],
        iqvc: &[Complex64],
        iqhx: &[Complex64],
        iqvx: &[Complex64],
        gate_num: usize,
        is_filtered: bool,
        fields: &mut MomentsFields,
    ) {
        let nn = self.n_samples_half - 1;

        // co-polar moments first
        let lag0_hc = mean_power(&iqhc[..nn]);
        let lag0_vc = mean_power(&iqvc[..nn]);
        let lag1_vchc = mean_conjugate_product(&iqvc[..nn], &iqhc[..nn]);
        let lag1_hcvc = mean_conjugate_product(&iqhc[1..=nn], &iqvc[..nn]);
        let lag2_hc = mean_conjugate_product(&iqhc[1..=nn], &iqhc[..nn]);
        let lag2_vc = mean_conjugate_product(&iqvc[1..=nn], &iqvc[..nn]);
        self.compute_mom_dp_alt_hv_co_only(
            lag0_hc, lag0_vc, lag1_vchc, lag1_hcvc, lag2_hc, lag2_vc, gate_num, fields,
        );

        // cross-polar powers for LDR
        let lag0_hx = mean_power(&iqhx[..nn]);
        let lag0_vx = mean_power(&iqvx[..nn]);
        self.compute_cross_polar(lag0_hc, lag0_vc, lag0_hx, lag0_vx, gate_num, fields);

        if !is_filtered {
            fields.cpa = if self.use_cpa_alt {
                compute_cpa_alt_dual(iqhc, iqvc)
            } else {
                compute_cpa_dual(iqhc, iqvc)
            };
        }
    }

    /// LDR-related fields from the cross-polar channel powers.
    fn compute_cross_polar(
        &self,
        lag0_hc: f64,
        lag0_vc: f64,
        lag0_hx: f64,
        lag0_vx: f64,
        gate_num: usize,
        fields: &mut MomentsFields,
    ) {
        fields.lag0_hx_db = pwr_db(lag0_hx);
        fields.lag0_vx_db = pwr_db(lag0_vx);
        fields.dbmhx = pwr_db(lag0_hx) - self.receiver_gain_db_hx;
        fields.dbmvx = pwr_db(lag0_vx) - self.receiver_gain_db_vx;

        let lag0_hc_ns = lag0_hc - self.est_noise_power_hc;
        let lag0_vc_ns = lag0_vc - self.est_noise_power_vc;
        let lag0_hx_ns = lag0_hx - self.est_noise_power_hx;
        let lag0_vx_ns = lag0_vx - self.est_noise_power_vx;

        let snr_hc_ok = lag0_hc_ns >= self.est_noise_power_hc * self.min_detectable_snr;
        let snr_vc_ok = lag0_vc_ns >= self.est_noise_power_vc * self.min_detectable_snr;
        let snr_hx_ok = lag0_hx_ns >= self.est_noise_power_hx * self.min_detectable_snr;
        let snr_vx_ok = lag0_vx_ns >= self.est_noise_power_vx * self.min_detectable_snr;
        if !snr_hx_ok || !snr_vx_ok {
            fields.censoring_flag = true;
        }

        let snr_hx = lag0_hx_ns / self.cal_noise_power_hx;
        let snr_vx = lag0_vx_ns / self.cal_noise_power_vx;

        if snr_hx_ok {
            fields.dbmhx_ns = pwr_db(lag0_hx_ns) - self.receiver_gain_db_hx;
            fields.snrhx = 10.0 * snr_hx.log10();
            let dbz_hx = 10.0 * snr_hx.log10()
                + self.base_dbz_1km_hx
                + self.range_corr(gate_num)
                + self.dbz_correction
                + self.atmos_atten(gate_num);
            fields.dbzhx = self.adjust_dbz_for_pwr_v(dbz_hx);
        }
        if snr_vx_ok {
            fields.dbmvx_ns = pwr_db(lag0_vx_ns) - self.receiver_gain_db_vx;
            fields.snrvx = 10.0 * snr_vx.log10();
            let dbz_vx = 10.0 * snr_vx.log10()
                + self.base_dbz_1km_vx
                + self.range_corr(gate_num)
                + self.dbz_correction
                + self.atmos_atten(gate_num);
            fields.dbzvx = self.adjust_dbz_for_pwr_h(dbz_vx);
        }

        if snr_hc_ok
            && fields.snrhc > self.min_snr_db_for_ldr
            && snr_vx_ok
            && fields.snrvx > self.min_snr_db_for_ldr
        {
            let ldrhm = 10.0 * (lag0_vx_ns / lag0_hc_ns).log10();
            fields.ldrhm = ldrhm;
            fields.ldrh = ldrhm + self.ldr_correction_db_h;
        }
        if snr_vc_ok
            && fields.snrvc > self.min_snr_db_for_ldr
            && snr_hx_ok
            && fields.snrhx > self.min_snr_db_for_ldr
        {
            let ldrvm = 10.0 * (lag0_hx_ns / lag0_vc_ns).log10();
            fields.ldrvm = ldrvm;
            fields.ldrv = ldrvm + self.ldr_correction_db_v;
        }

        if fields.ldrh != MISSING && fields.ldrv != MISSING {
            fields.ldr = (fields.ldrh + fields.ldrv) / 2.0;
            fields.ldr_diff = fields.ldrv - fields.ldrh;
            if fields.zdr != MISSING {
                let ldrv_prime = fields.ldrv - fields.zdr;
                fields.ldr_mean = (fields.ldrh + ldrv_prime) / 2.0;
                fields.zdr_bias = fields.zdr - fields.ldr_diff;
            }
        } else if fields.ldrh != MISSING {
            fields.ldr = fields.ldrh;
            fields.ldr_mean = fields.ldrh;
        } else if fields.ldrv != MISSING {
            fields.ldr = fields.ldrv;
            fields.ldr_mean = fields.ldrv;
        }
    }

    /// Simultaneous transmit, fixed H and V receivers, full dwell in each.
    pub fn dp_sim_hv(
        &self,
        iqhc: &[Complex64],
        iqvc: &[Complex64],
        gate_num: usize,
        is_filtered: bool,
        fields: &mut MomentsFields,
    ) {
        let n = self.n_samples;
        let lag0_hc = mean_power(&iqhc[..n - 1]);
        let lag0_vc = mean_power(&iqvc[..n - 1]);
        let rvvhh0 = mean_conjugate_product(&iqvc[..n - 1], &iqhc[..n - 1]);
        let lag1_hc = mean_conjugate_product(&iqhc[1..], &iqhc[..n - 1]);
        let lag1_vc = mean_conjugate_product(&iqvc[1..], &iqvc[..n - 1]);
        let lag2_hc = mean_conjugate_product(&iqhc[2..], &iqhc[..n - 2]);
        let lag2_vc = mean_conjugate_product(&iqvc[2..], &iqvc[..n - 2]);
        let lag3_hc = mean_conjugate_product(&iqhc[3..], &iqhc[..n - 3]);
        let lag3_vc = mean_conjugate_product(&iqvc[3..], &iqvc[..n - 3]);

        self.compute_mom_dp_sim_hv(
            lag0_hc, lag0_vc, rvvhh0, lag1_hc, lag1_vc, lag2_hc, lag2_vc, lag3_hc, lag3_vc,
            gate_num, fields,
        );

        if !is_filtered {
            fields.cpa = if self.use_cpa_alt {
                compute_cpa_alt_dual(iqhc, iqvc)
            } else {
                compute_cpa_dual(iqhc, iqvc)
            };
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn compute_mom_dp_sim_hv(
        &self,
        lag0_hc: f64,
        lag0_vc: f64,
        rvvhh0: Complex64,
        lag1_hc: Complex64,
        lag1_vc: Complex64,
        lag2_hc: Complex64,
        lag2_vc: Complex64,
        lag3_hc: Complex64,
        lag3_vc: Complex64,
        gate_num: usize,
        fields: &mut MomentsFields,
    ) {
        self.set_field_meta(fields);

        fields.lag0_hc_db = pwr_db(lag0_hc);
        fields.lag0_vc_db = pwr_db(lag0_vc);

        let dbm_hc = pwr_db(lag0_hc) - self.receiver_gain_db_hc;
        let dbm_vc = pwr_db(lag0_vc) - self.receiver_gain_db_vc;
        fields.dbmhc = dbm_hc;
        fields.dbmvc = dbm_vc;
        fields.dbm = (dbm_hc + dbm_vc) / 2.0;

        let lag0_hc_ns = lag0_hc - self.est_noise_power_hc;
        let lag0_vc_ns = lag0_vc - self.est_noise_power_vc;

        let snr_hc_ok = self.check_snr(lag0_hc_ns, self.est_noise_power_hc, fields);
        let snr_vc_ok = self.check_snr(lag0_vc_ns, self.est_noise_power_vc, fields);

        let snr_hc = lag0_hc_ns / self.cal_noise_power_hc;
        let snr_vc = lag0_vc_ns / self.cal_noise_power_vc;

        if snr_hc_ok {
            fields.dbmhc_ns = pwr_db(lag0_hc_ns) - self.receiver_gain_db_hc;
            fields.snrhc = 10.0 * snr_hc.log10();
        }
        if snr_vc_ok {
            fields.dbmvc_ns = pwr_db(lag0_vc_ns) - self.receiver_gain_db_vc;
            fields.snrvc = 10.0 * snr_vc.log10();
        }
        if snr_hc_ok && snr_vc_ok {
            fields.snr = 10.0 * ((snr_hc + snr_vc) / 2.0).log10();
        }

        self.set_dbz_h(snr_hc, snr_hc_ok, gate_num, fields);
        self.set_dbz_v(snr_vc, snr_vc_ok, gate_num, fields);
        self.set_zdr(snr_hc_ok, snr_vc_ok, lag0_hc_ns, lag0_vc_ns, fields);

        // phidp and rhohv from the co-to-co correlation

        let phidp = rvvhh0 * self.phidp_offset_sim.conj();
        fields.phidp = phidp.arg().to_degrees() * self.vel_sign * -1.0 * self.phidp_sign;
        fields.phidp0 = rvvhh0.arg().to_degrees() * self.vel_sign * -1.0 * self.phidp_sign;

        let rvvhh0_mag = rvvhh0.norm();
        if snr_hc_ok && snr_vc_ok {
            let rhohv = rvvhh0_mag / (lag0_hc_ns * lag0_vc_ns).max(POWER_FLOOR).sqrt();
            fields.rhohv = constrain(rhohv, 0.0, 1.0);
        }
        let rhohv_nnc = rvvhh0_mag / (lag0_hc * lag0_vc).max(POWER_FLOOR).sqrt();
        fields.rhohv_nnc = constrain(rhohv_nnc, 0.0, 1.0);

        fields.rvvhh0_db = mag_db(rvvhh0_mag);
        fields.rvvhh0_phase = rvvhh0.arg().to_degrees();

        // velocity

        let lag1_hc_mag = lag1_hc.norm();
        let lag1_vc_mag = lag1_vc.norm();
        fields.lag1_hc_db = mag_db(lag1_hc_mag);
        fields.lag1_hc_phase = lag1_hc.arg().to_degrees();
        fields.lag1_vc_db = mag_db(lag1_vc_mag);
        fields.lag1_vc_phase = lag1_vc.arg().to_degrees();

        let lag1_sum = lag1_hc + lag1_vc;
        fields.vel = (lag1_sum.arg() / PI) * self.nyquist * self.vel_sign;
        fields.vel_h_only = (lag1_hc.arg() / PI) * self.nyquist * self.vel_sign;
        fields.vel_v_only = (lag1_vc.arg() / PI) * self.nyquist * self.vel_sign;
        fields.phase_for_noise = lag1_sum;

        fields.ncp = constrain(
            lag1_sum.norm() / (lag0_hc + lag0_vc).max(POWER_FLOOR),
            0.0,
            1.0,
        );

        // width: mean of per-channel estimates

        let lag2_hc_mag = lag2_hc.norm();
        let lag2_vc_mag = lag2_vc.norm();
        fields.lag2_hc_db = mag_db(lag2_hc_mag);
        fields.lag2_hc_phase = lag2_hc.arg().to_degrees();
        fields.lag2_vc_db = mag_db(lag2_vc_mag);
        fields.lag2_vc_phase = lag2_vc.arg().to_degrees();
        let lag3_hc_mag = lag3_hc.norm();
        let lag3_vc_mag = lag3_vc.norm();
        fields.lag3_hc_db = mag_db(lag3_hc_mag);
        fields.lag3_hc_phase = lag3_hc.arg().to_degrees();
        fields.lag3_vc_db = mag_db(lag3_vc_mag);
        fields.lag3_vc_phase = lag3_vc.arg().to_degrees();

        let r1_hc = lag1_hc_mag / self.window_r1;
        let r2_hc = lag2_hc_mag / self.window_r2;
        let r3_hc = lag3_hc_mag / self.window_r3;
        let r1_vc = lag1_vc_mag / self.window_r1;
        let r2_vc = lag2_vc_mag / self.window_r2;
        let r3_vc = lag3_vc_mag / self.window_r3;

        let width_r1r2_mean =
            (width_r1r2(r1_hc, r2_hc, self.nyquist) + width_r1r2(r1_vc, r2_vc, self.nyquist)) / 2.0;
        fields.width_r1r2 = constrain(width_r1r2_mean, 0.01, self.nyquist);
        let width_r1r3_mean =
            (width_r1r3(r1_hc, r3_hc, self.nyquist) + width_r1r3(r1_vc, r3_vc, self.nyquist)) / 2.0;
        fields.width_r1r3 = constrain(width_r1r3_mean, 0.01, self.nyquist);
        fields.width = fields.width_r1r2;

        if snr_hc_ok && snr_vc_ok {
            let width_r0r1_mean = (width_r0r1(lag0_hc_ns, r1_hc, self.nyquist)
                + width_r0r1(lag0_vc_ns, r1_vc, self.nyquist))
                / 2.0;
            fields.width_r0r1 = constrain(width_r0r1_mean, 0.01, self.nyquist);
            match self.width_method {
                WidthMethod::R0R1 => fields.width = fields.width_r0r1,
                WidthMethod::Hybrid => {
                    let width_hc = width_hybrid(
                        self.width_method,
                        self.n_samples,
                        lag0_hc_ns,
                        r1_hc,
                        r2_hc,
                        r3_hc,
                        self.nyquist,
                    );
                    let width_vc = width_hybrid(
                        self.width_method,
                        self.n_samples,
                        lag0_vc_ns,
                        r1_vc,
                        r2_vc,
                        r3_vc,
                        self.nyquist,
                    );
                    fields.width = constrain((width_hc + width_vc) / 2.0, 0.01, self.nyquist);
                }
                WidthMethod::R1R2 => {}
            }
        }
    }

    /// Transmit H only, receive H co-polar and V cross-polar.
    pub fn dp_h_only(
        &self,
        iqhc: &[Complex64],
        iqvx: &[Complex64],
        gate_num: usize,
        is_filtered: bool,
        fields: &mut MomentsFields,
    ) {
        let n = self.n_samples;
        let lag0_hc = mean_power(&iqhc[..n - 1]);
        let lag0_vx = mean_power(&iqvx[..n - 1]);
        let lag1_hc = mean_conjugate_product(&iqhc[1..], &iqhc[..n - 1]);
        let lag2_hc = mean_conjugate_product(&iqhc[2..], &iqhc[..n - 2]);
        let lag3_hc = mean_conjugate_product(&iqhc[3..], &iqhc[..n - 3]);

        self.compute_mom_single_pol(lag0_hc, lag1_hc, lag2_hc, lag3_hc, gate_num, fields);

        // cross-polar power gives LDR-H

        fields.lag0_vx_db = pwr_db(lag0_vx);
        fields.dbmvx = pwr_db(lag0_vx) - self.receiver_gain_db_vx;
        let lag0_hc_ns = lag0_hc - self.est_noise_power_hc;
        let lag0_vx_ns = lag0_vx - self.est_noise_power_vx;
        let snr_hc_ok = lag0_hc_ns >= self.est_noise_power_hc * self.min_detectable_snr;
        let snr_vx_ok = lag0_vx_ns >= self.est_noise_power_vx * self.min_detectable_snr;

        if snr_vx_ok {
            let snr_vx = lag0_vx_ns / self.cal_noise_power_vx;
            fields.dbmvx_ns = pwr_db(lag0_vx_ns) - self.receiver_gain_db_vx;
            fields.snrvx = 10.0 * snr_vx.log10();
            let dbz_vx = 10.0 * snr_vx.log10()
                + self.base_dbz_1km_vx
                + self.range_corr(gate_num)
                + self.dbz_correction
                + self.atmos_atten(gate_num);
            fields.dbzvx = self.adjust_dbz_for_pwr_h(dbz_vx);
        }

        if snr_hc_ok && snr_vx_ok {
            fields.zdrm = 10.0 * (lag0_hc_ns / lag0_vx_ns).log10();
        }

        if snr_hc_ok
            && fields.snrhc > self.min_snr_db_for_ldr
            && snr_vx_ok
            && fields.snrvx > self.min_snr_db_for_ldr
        {
            let ldrhm = 10.0 * (lag0_vx_ns / lag0_hc_ns).log10();
            fields.ldrhm = ldrhm;
            fields.ldrh = ldrhm + self.ldr_correction_db_h;
            fields.ldr = fields.ldrh;
        }

        if !is_filtered {
            fields.cpa = if self.use_cpa_alt {
                compute_cpa_alt(iqhc)
            } else {
                compute_cpa(iqhc)
            };
        }
    }

    /// Transmit V only, receive V co-polar and H cross-polar.
    pub fn dp_v_only(
        &self,
        iqvc: &[Complex64],
        iqhx: &[Complex64],
        gate_num: usize,
        is_filtered: bool,
        fields: &mut MomentsFields,
    ) {
        let n = self.n_samples;
        let lag0_vc = mean_power(&iqvc[..n - 1]);
        let lag0_hx = mean_power(&iqhx[..n - 1]);
        let lag1_vc = mean_conjugate_product(&iqvc[1..], &iqvc[..n - 1]);
        let lag2_vc = mean_conjugate_product(&iqvc[2..], &iqvc[..n - 2]);
        let lag3_vc = mean_conjugate_product(&iqvc[3..], &iqvc[..n - 3]);

        self.compute_mom_dp_v_only(lag0_vc, lag0_hx, lag1_vc, lag2_vc, lag3_vc, gate_num, fields);

        if !is_filtered {
            fields.cpa = if self.use_cpa_alt {
                compute_cpa_alt(iqvc)
            } else {
                compute_cpa(iqvc)
            };
        }
    }

    pub fn compute_mom_dp_v_only(
        &self,
        lag0_vc: f64,
        lag0_hx: f64,
        lag1_vc: Complex64,
        lag2_vc: Complex64,
        lag3_vc: Complex64,
        gate_num: usize,
        fields: &mut MomentsFields,
    ) {
        self.set_field_meta(fields);

        fields.lag0_vc_db = pwr_db(lag0_vc);
        fields.lag0_hx_db = pwr_db(lag0_hx);

        let dbm_vc = pwr_db(lag0_vc) - self.receiver_gain_db_vc;
        fields.dbmvc = dbm_vc;
        fields.dbmhx = pwr_db(lag0_hx) - self.receiver_gain_db_hx;
        fields.dbm = dbm_vc;

        let lag0_vc_ns = lag0_vc - self.est_noise_power_vc;
        let lag0_hx_ns = lag0_hx - self.est_noise_power_hx;

        let snr_vc_ok = self.check_snr(lag0_vc_ns, self.est_noise_power_vc, fields);
        let snr_hx_ok = lag0_hx_ns >= self.est_noise_power_hx * self.min_detectable_snr;
        if !snr_hx_ok {
            fields.censoring_flag = true;
        }

        let snr_vc = lag0_vc_ns / self.cal_noise_power_vc;
        let snr_hx = lag0_hx_ns / self.cal_noise_power_hx;

        if snr_vc_ok {
            fields.dbmvc_ns = pwr_db(lag0_vc_ns) - self.receiver_gain_db_vc;
            let snrvc = 10.0 * snr_vc.log10();
            fields.snrvc = snrvc;
            fields.snr = snrvc;
        }
        if snr_hx_ok {
            fields.dbmhx_ns = pwr_db(lag0_hx_ns) - self.receiver_gain_db_hx;
            fields.snrhx = 10.0 * snr_hx.log10();
            let dbz_hx = 10.0 * snr_hx.log10()
                + self.base_dbz_1km_hx
                + self.range_corr(gate_num)
                + self.dbz_correction
                + self.atmos_atten(gate_num);
            fields.dbzhx = self.adjust_dbz_for_pwr_v(dbz_hx);
        }

        self.set_dbz_v(snr_vc, snr_vc_ok, gate_num, fields);
        if snr_vc_ok {
            fields.dbz = fields.dbzvc;
            fields.dbz_no_atmos_atten = self.adjust_dbz_for_pwr_v(
                10.0 * snr_vc.log10()
                    + self.base_dbz_1km_vc
                    + self.range_corr(gate_num)
                    + self.dbz_correction,
            );
        }

        if snr_vc_ok
            && fields.snrvc > self.min_snr_db_for_ldr
            && snr_hx_ok
            && fields.snrhx > self.min_snr_db_for_ldr
        {
            let ldrvm = 10.0 * (lag0_hx_ns / lag0_vc_ns).log10();
            fields.ldrvm = ldrvm;
            fields.ldrv = ldrvm + self.ldr_correction_db_v;
            fields.ldr = fields.ldrv;
        }

        // velocity

        let lag1_vc_mag = lag1_vc.norm();
        fields.lag1_vc_db = mag_db(lag1_vc_mag);
        fields.lag1_vc_phase = lag1_vc.arg().to_degrees();
        fields.vel = (lag1_vc.arg() / PI) * self.nyquist * self.vel_sign;
        fields.phase_for_noise = lag1_vc;

        fields.ncp = constrain(lag1_vc_mag / lag0_vc.max(POWER_FLOOR), 0.0, 1.0);

        // width

        let lag2_vc_mag = lag2_vc.norm();
        fields.lag2_vc_db = mag_db(lag2_vc_mag);
        fields.lag2_vc_phase = lag2_vc.arg().to_degrees();
        let lag3_vc_mag = lag3_vc.norm();
        fields.lag3_vc_db = mag_db(lag3_vc_mag);
        fields.lag3_vc_phase = lag3_vc.arg().to_degrees();

        if snr_vc_ok {
            let r0 = lag0_vc_ns;
            let r1 = lag1_vc_mag / self.window_r1;
            let r2 = lag2_vc_mag / self.window_r2;
            let r3 = lag3_vc_mag / self.window_r3;
            let width =
                width_hybrid(self.width_method, self.n_samples, r0, r1, r2, r3, self.nyquist);
            fields.width = constrain(width, 0.01, self.nyquist);
        }
    }

    /// NCP of a single time series.
    pub fn compute_ncp(&self, iq: &[Complex64]) -> f64 {
        let lag0 = mean_power(iq);
        let lag1 = mean_conjugate_product(&iq[1..], &iq[..iq.len() - 1]);
        constrain(lag1.norm() / lag0.max(POWER_FLOOR), 0.0, 1.0)
    }

    /// Noise-corrected RHOHV for alternating-mode series, used by the
    /// filter-improvement test.
    pub fn compute_rhohv_alt(&self, iqhc: &[Complex64], iqvc: &[Complex64]) -> f64 {
        let nn = self.n_samples_half.min(iqhc.len()).min(iqvc.len());
        if nn < 3 {
            return MISSING;
        }
        let nn = nn - 1;
        let lag0_hc = mean_power(&iqhc[..nn]) - self.est_noise_power_hc;
        let lag0_vc = mean_power(&iqvc[..nn]) - self.est_noise_power_vc;
        if lag0_hc <= 0.0 || lag0_vc <= 0.0 {
            return MISSING;
        }
        let lag1_vchc = mean_conjugate_product(&iqvc[..nn], &iqhc[..nn]);
        let lag1_hcvc = mean_conjugate_product(&iqhc[1..=nn], &iqvc[..nn]);
        let lag2_hc = mean_conjugate_product(&iqhc[1..=nn], &iqhc[..nn]);
        let lag2_vc = mean_conjugate_product(&iqvc[1..=nn], &iqvc[..nn]);

        let mean_lag0 = ((lag0_hc + lag0_vc) / 2.0).max(POWER_FLOOR);
        let rho2 = ((lag2_hc + lag2_vc).norm() / 2.0) / mean_lag0;
        let rhohv1 =
            (lag1_vchc.norm() + lag1_hcvc.norm()) / (2.0 * (lag0_hc * lag0_vc).sqrt());
        constrain(rhohv1 / rho2.max(POWER_FLOOR).powf(0.25), 0.0, 1.0)
    }

    /// Noise-corrected RHOHV for simultaneous-mode series.
    pub fn compute_rhohv_sim(&self, iqhc: &[Complex64], iqvc: &[Complex64]) -> f64 {
        let nn = iqhc.len().min(iqvc.len());
        if nn < 2 {
            return MISSING;
        }
        let nn = nn - 1;
        let lag0_hc = mean_power(&iqhc[..nn]) - self.est_noise_power_hc;
        let lag0_vc = mean_power(&iqvc[..nn]) - self.est_noise_power_vc;
        if lag0_hc <= 0.0 || lag0_vc <= 0.0 {
            return MISSING;
        }
        let rvvhh0 = mean_conjugate_product(&iqvc[..nn], &iqhc[..nn]);
        constrain(rvvhh0.norm() / (lag0_hc * lag0_vc).sqrt(), 0.0, 1.0)
    }

    // shared pieces

    fn check_snr(&self, lag0_ns: f64, est_noise: f64, fields: &mut MomentsFields) -> bool {
        if lag0_ns < est_noise * self.min_detectable_snr {
            fields.censoring_flag = true;
            false
        } else {
            true
        }
    }

    fn set_dbz_h(&self, snr_hc: f64, ok: bool, gate_num: usize, fields: &mut MomentsFields) {
        if !ok {
            return;
        }
        let dbz_no_atten = 10.0 * snr_hc.log10()
            + self.base_dbz_1km_hc
            + self.range_corr(gate_num)
            + self.dbz_correction;
        let dbz = dbz_no_atten + self.atmos_atten(gate_num);
        fields.dbzhc = self.adjust_dbz_for_pwr_h(dbz);
        fields.dbz = fields.dbzhc;
        fields.dbz_no_atmos_atten = self.adjust_dbz_for_pwr_h(dbz_no_atten);
    }

    fn set_dbz_v(&self, snr_vc: f64, ok: bool, gate_num: usize, fields: &mut MomentsFields) {
        if !ok {
            return;
        }
        let dbz_no_atten = 10.0 * snr_vc.log10()
            + self.base_dbz_1km_vc
            + self.range_corr(gate_num)
            + self.dbz_correction;
        let dbz = dbz_no_atten + self.atmos_atten(gate_num);
        fields.dbzvc = self.adjust_dbz_for_pwr_v(dbz);
    }

    fn set_zdr(
        &self,
        snr_hc_ok: bool,
        snr_vc_ok: bool,
        lag0_hc_ns: f64,
        lag0_vc_ns: f64,
        fields: &mut MomentsFields,
    ) {
        if snr_hc_ok
            && fields.snrhc > self.min_snr_db_for_zdr
            && snr_vc_ok
            && fields.snrvc > self.min_snr_db_for_zdr
        {
            let zdrm = if self.compute_zdr_using_snr {
                fields.snrhc - fields.snrvc
            } else {
                10.0 * (lag0_hc_ns / lag0_vc_ns).log10()
            };
            fields.zdrm = self.adjust_zdr_for_pwr(zdrm);
            fields.zdr = fields.zdrm + self.zdr_correction_db;
        }
    }

    // ---- staggered PRT ----

    /// Single polarization, staggered PRT. The combined series plus its
    /// short/long halves are passed so CPA can use the full dwell.
    pub fn single_pol_stag_prt(
        &self,
        iqhc: &[Complex64],
        iqhc_short: &[Complex64],
        iqhc_long: &[Complex64],
        gate_num: usize,
        is_filtered: bool,
        fields: &mut MomentsFields,
    ) {
        self.set_field_meta(fields);
        let stag = match &self.stag {
            Some(stag) => stag,
            None => return,
        };
        if gate_num >= stag.n_gates_prt_long {
            return;
        }

        let covars = StagCovars::compute(iqhc_short, iqhc_long);
        self.compute_mom_stag_single_pol(&covars, gate_num, fields);

        if !is_filtered {
            fields.cpa = if self.use_cpa_alt {
                compute_cpa_alt(iqhc)
            } else {
                compute_cpa(iqhc)
            };
        }
    }

    pub fn compute_mom_stag_single_pol(
        &self,
        covars: &StagCovars,
        gate_num: usize,
        fields: &mut MomentsFields,
    ) {
        self.set_field_meta(fields);
        let stag = match &self.stag {
            Some(stag) => stag,
            None => return,
        };

        // power from the lower of the two lag0 estimates, to reject
        // second-trip contamination of the long-PRT samples
        let lag0_hc = covars.lag0_long.min(covars.lag0_short);

        fields.lag0_hc_db = pwr_db(lag0_hc);
        let dbm_hc = pwr_db(lag0_hc) - self.receiver_gain_db_hc;
        fields.dbmhc = dbm_hc;
        fields.dbm = dbm_hc;

        let lag0_hc_ns = lag0_hc - self.est_noise_power_hc;
        let snr_hc_ok = self.check_snr(lag0_hc_ns, self.est_noise_power_hc, fields);
        if snr_hc_ok {
            let snr_hc = lag0_hc_ns / self.cal_noise_power_hc;
            let snr_db = 10.0 * snr_hc.log10();
            fields.dbmhc_ns = pwr_db(lag0_hc_ns) - self.receiver_gain_db_hc;
            fields.snrhc = snr_db;
            fields.snr = snr_db;
            self.set_dbz_h(snr_hc, true, gate_num, fields);
        }

        if gate_num >= stag.n_gates_prt_short {
            // power only beyond the short-PRT unambiguous range
            return;
        }

        let lag1_short_mag = covars.lag1_short.norm();
        let lag1_long_mag = covars.lag1_long.norm();
        let lag1_stl_mag = covars.lag1_short_to_long.norm();
        let lag1_lts_mag = covars.lag1_long_to_short.norm();

        // ncp from each sub-series; the cross terms flag trip mixing

        fields.ncp_prt_short = constrain(
            lag1_short_mag / covars.lag0_short.max(POWER_FLOOR),
            0.0,
            1.0,
        );
        fields.ncp_prt_long = constrain(
            lag1_long_mag / covars.lag0_long.max(POWER_FLOOR),
            0.0,
            1.0,
        );
        let ncp_sl = lag1_short_mag / covars.lag0_long.max(POWER_FLOOR);
        let ncp_ls = lag1_long_mag / covars.lag0_short.max(POWER_FLOOR);
        fields.ncp_trip_flag = ncp_sl.max(ncp_ls);
        fields.ncp = fields.ncp_prt_short;

        // velocities at each spacing, then unfold

        let stag_sign = self.vel_sign * self.vel_sign_staggered * -1.0;
        let vel_short =
            (covars.lag1_short_to_long.arg() / PI) * stag.nyquist_prt_short * stag_sign * -1.0;
        let vel_long =
            (covars.lag1_long_to_short.arg() / PI) * stag.nyquist_prt_long * stag_sign * -1.0;
        fields.vel_prt_short = vel_short;
        fields.vel_prt_long = vel_long;
        fields.phase_for_noise = covars.lag1_short_to_long;

        let (unfolded, interval) = stag.dealias(vel_short, vel_long);
        fields.vel = unfolded;
        fields.vel_unfold_interval = interval as f64;
        fields.vel_diff = vel_short - vel_long;

        // width

        if snr_hc_ok {
            let r0 = covars.lag0_short - self.est_noise_power_hc;
            let rm = lag1_lts_mag;
            let width_r0rm = width_stag(r0, rm, 0, stag.stag_m, 1.0);
            fields.width = constrain(
                width_r0rm * stag.nyquist_stag_nominal,
                0.01,
                stag.nyquist_prt_short,
            );

            fields.width_prt_short = constrain(
                width_r0r1(r0, lag1_short_mag, stag.nyquist_short_plus_long),
                0.01,
                stag.nyquist_short_plus_long,
            );
            fields.width_prt_long = constrain(
                width_r0r1(
                    covars.lag0_long - self.est_noise_power_hc,
                    lag1_long_mag,
                    stag.nyquist_short_plus_long,
                ),
                0.01,
                stag.nyquist_short_plus_long,
            );

            if self.width_method != WidthMethod::R0R1 {
                let rn = lag1_stl_mag;
                let width_rmrn = width_stag(rm, rn, stag.stag_m, stag.stag_n, 1.0);
                let width_rmrmpn =
                    width_stag(rm, lag1_short_mag, stag.stag_m, stag.stag_m + stag.stag_n, 1.0);

                let hybrid = if width_r0rm > 0.1 {
                    width_r0rm
                } else if width_rmrmpn < 0.05 {
                    width_rmrmpn
                } else {
                    width_rmrn
                };
                fields.width = constrain(hybrid * stag.nyquist, 0.01, stag.nyquist);
            }
        }
    }

    /// Simultaneous transmit, staggered PRT, both channels.
    #[allow(clippy::too_many_arguments)]
    pub fn dp_sim_hv_stag_prt(
        &self,
        iqhc: &[Complex64],
        iqvc: &[Complex64],
        iqhc_short: &[Complex64],
        iqhc_long: &[Complex64],
        iqvc_short: &[Complex64],
        iqvc_long: &[Complex64],
        gate_num: usize,
        is_filtered: bool,
        fields: &mut MomentsFields,
    ) {
        self.set_field_meta(fields);
        let stag = match &self.stag {
            Some(stag) => stag,
            None => return,
        };
        if gate_num >= stag.n_gates_prt_long {
            return;
        }

        let covars_h = StagCovars::compute(iqhc_short, iqhc_long);
        let covars_v = StagCovars::compute(iqvc_short, iqvc_long);

        let nn = self.n_samples_half.saturating_sub(1);
        let rvvhh0_short = mean_conjugate_product(&iqvc_short[..nn], &iqhc_short[..nn]);
        let rvvhh0_long = mean_conjugate_product(&iqvc_long[..nn], &iqhc_long[..nn]);

        self.compute_mom_stag_dp_sim_hv(
            &covars_h,
            &covars_v,
            rvvhh0_short,
            rvvhh0_long,
            gate_num,
            fields,
        );

        if !is_filtered {
            fields.cpa = if self.use_cpa_alt {
                compute_cpa_alt_dual(iqhc, iqvc)
            } else {
                compute_cpa_dual(iqhc, iqvc)
            };
        }
    }

    pub fn compute_mom_stag_dp_sim_hv(
        &self,
        covars_h: &StagCovars,
        covars_v: &StagCovars,
        rvvhh0_short: Complex64,
        rvvhh0_long: Complex64,
        gate_num: usize,
        fields: &mut MomentsFields,
    ) {
        self.set_field_meta(fields);
        let stag = match &self.stag {
            Some(stag) => stag,
            None => return,
        };

        // powers, snr, dbz, zdr from the lower of short/long lag0

        let (lag0_hc, lag0_vc) =
            if covars_h.lag0_long < covars_h.lag0_short && covars_v.lag0_long < covars_v.lag0_short
            {
                (covars_h.lag0_long, covars_v.lag0_long)
            } else {
                (covars_h.lag0_short, covars_v.lag0_short)
            };

        fields.lag0_hc_db = pwr_db(lag0_hc);
        fields.lag0_vc_db = pwr_db(lag0_vc);
        let dbm_hc = pwr_db(lag0_hc) - self.receiver_gain_db_hc;
        let dbm_vc = pwr_db(lag0_vc) - self.receiver_gain_db_vc;
        fields.dbmhc = dbm_hc;
        fields.dbmvc = dbm_vc;
        fields.dbm = (dbm_hc + dbm_vc) / 2.0;

        let lag0_hc_ns = lag0_hc - self.est_noise_power_hc;
        let lag0_vc_ns = lag0_vc - self.est_noise_power_vc;
        let snr_hc_ok = self.check_snr(lag0_hc_ns, self.est_noise_power_hc, fields);
        let snr_vc_ok = self.check_snr(lag0_vc_ns, self.est_noise_power_vc, fields);

        let snr_hc = lag0_hc_ns / self.cal_noise_power_hc;
        let snr_vc = lag0_vc_ns / self.cal_noise_power_vc;
        if snr_hc_ok {
            fields.dbmhc_ns = pwr_db(lag0_hc_ns) - self.receiver_gain_db_hc;
            fields.snrhc = 10.0 * snr_hc.log10();
        }
        if snr_vc_ok {
            fields.dbmvc_ns = pwr_db(lag0_vc_ns) - self.receiver_gain_db_vc;
            fields.snrvc = 10.0 * snr_vc.log10();
        }
        if snr_hc_ok && snr_vc_ok {
            fields.snr = 10.0 * ((snr_hc + snr_vc) / 2.0).log10();
        }
        self.set_dbz_h(snr_hc, snr_hc_ok, gate_num, fields);
        self.set_dbz_v(snr_vc, snr_vc_ok, gate_num, fields);
        self.set_zdr(snr_hc_ok, snr_vc_ok, lag0_hc_ns, lag0_vc_ns, fields);

        if gate_num >= stag.n_gates_prt_short {
            return;
        }

        // ncp

        let lag1_sum_short = covars_h.lag1_short + covars_v.lag1_short;
        let lag1_sum_long = covars_h.lag1_long + covars_v.lag1_long;
        let lag0_sum_short = covars_h.lag0_short + covars_v.lag0_short;
        let lag0_sum_long = covars_h.lag0_long + covars_v.lag0_long;

        fields.ncp_prt_short = constrain(
            lag1_sum_short.norm() / lag0_sum_short.max(POWER_FLOOR),
            0.0,
            1.0,
        );
        fields.ncp_prt_long = constrain(
            lag1_sum_long.norm() / lag0_sum_long.max(POWER_FLOOR),
            0.0,
            1.0,
        );
        let ncp_sl = lag1_sum_short.norm() / lag0_sum_long.max(POWER_FLOOR);
        let ncp_ls = lag1_sum_long.norm() / lag0_sum_short.max(POWER_FLOOR);
        fields.ncp_trip_flag = ncp_sl.max(ncp_ls);
        fields.ncp = fields.ncp_prt_short;

        // velocity: sum channels at each spacing, then unfold

        let stag_sign = self.vel_sign * self.vel_sign_staggered * -1.0;
        let lag1_sum_stl = covars_h.lag1_short_to_long + covars_v.lag1_short_to_long;
        let lag1_sum_lts = covars_h.lag1_long_to_short + covars_v.lag1_long_to_short;

        let vel_short = (lag1_sum_stl.arg() / PI) * stag.nyquist_prt_short * stag_sign * -1.0;
        let vel_long = (lag1_sum_lts.arg() / PI) * stag.nyquist_prt_long * stag_sign * -1.0;
        fields.vel_prt_short = vel_short;
        fields.vel_prt_long = vel_long;
        fields.phase_for_noise = lag1_sum_stl;

        let (unfolded, interval) = stag.dealias(vel_short, vel_long);
        fields.vel = unfolded;
        fields.vel_unfold_interval = interval as f64;
        fields.vel_diff = vel_short - vel_long;

        // width: mean of per-channel staggered estimators

        if snr_hc_ok && snr_vc_ok {
            let r0_hc = covars_h.lag0_short - self.est_noise_power_hc;
            let r0_vc = covars_v.lag0_short - self.est_noise_power_vc;
            let rm_hc = covars_h.lag1_long_to_short.norm();
            let rm_vc = covars_v.lag1_long_to_short.norm();

            let width_r0rm = (width_stag(r0_hc, rm_hc, 0, stag.stag_m, 1.0)
                + width_stag(r0_vc, rm_vc, 0, stag.stag_m, 1.0))
                / 2.0;
            fields.width = constrain(
                width_r0rm * stag.nyquist_stag_nominal,
                0.01,
                stag.nyquist_prt_short,
            );

            let width_short = (width_r0r1(
                r0_hc,
                covars_h.lag1_short.norm(),
                stag.nyquist_short_plus_long,
            ) + width_r0r1(
                r0_vc,
                covars_v.lag1_short.norm(),
                stag.nyquist_short_plus_long,
            )) / 2.0;
            fields.width_prt_short = width_short;

            let width_long = (width_r0r1(
                covars_h.lag0_long - self.est_noise_power_hc,
                covars_h.lag1_long.norm(),
                stag.nyquist_short_plus_long,
            ) + width_r0r1(
                covars_v.lag0_long - self.est_noise_power_vc,
                covars_v.lag1_long.norm(),
                stag.nyquist_short_plus_long,
            )) / 2.0;
            fields.width_prt_long = width_long;

            if self.width_method != WidthMethod::R0R1 {
                let width_rmrmpn = (width_stag(
                    rm_hc,
                    covars_h.lag1_short.norm(),
                    stag.stag_m,
                    stag.stag_m + stag.stag_n,
                    1.0,
                ) + width_stag(
                    rm_vc,
                    covars_v.lag1_short.norm(),
                    stag.stag_m,
                    stag.stag_m + stag.stag_n,
                    1.0,
                )) / 2.0;
                let width_rmrn = (width_stag(
                    rm_hc,
                    covars_h.lag1_long_to_short.norm(),
                    stag.stag_m,
                    stag.stag_n,
                    1.0,
                ) + width_stag(
                    rm_vc,
                    covars_v.lag1_long_to_short.norm(),
                    stag.stag_m,
                    stag.stag_n,
                    1.0,
                )) / 2.0;

                let hybrid = if width_r0rm > 0.1 {
                    width_r0rm
                } else if width_rmrmpn < 0.05 {
                    width_rmrmpn
                } else {
                    width_rmrn
                };
                fields.width = constrain(hybrid * stag.nyquist, 0.01, stag.nyquist);
            }
        }

        // phidp and rhohv from the mean co-to-co correlation

        let lag0_hc_mean = (covars_h.lag0_short + covars_h.lag0_long) / 2.0;
        let lag0_vc_mean = (covars_v.lag0_short + covars_v.lag0_long) / 2.0;
        let lag0_hc_mean_ns = lag0_hc_mean - self.est_noise_power_hc;
        let lag0_vc_mean_ns = lag0_vc_mean - self.est_noise_power_vc;
        let rvvhh0 = complex_mean(rvvhh0_long, rvvhh0_short);

        let phidp = rvvhh0 * self.phidp_offset_sim.conj();
        fields.phidp = phidp.arg().to_degrees() * self.vel_sign * -1.0 * self.phidp_sign;
        fields.phidp0 = rvvhh0.arg().to_degrees() * self.vel_sign * -1.0 * self.phidp_sign;

        let rvvhh0_mag = rvvhh0.norm();
        fields.rvvhh0_db = mag_db(rvvhh0_mag);
        fields.rvvhh0_phase = rvvhh0.arg().to_degrees();
        if lag0_hc_mean_ns > 0.0 && lag0_vc_mean_ns > 0.0 {
            fields.rhohv = constrain(
                rvvhh0_mag / (lag0_hc_mean_ns * lag0_vc_mean_ns).sqrt(),
                0.0,
                1.0,
            );
        }
        fields.rhohv_nnc = constrain(
            rvvhh0_mag / (lag0_hc_mean * lag0_vc_mean).max(POWER_FLOOR).sqrt(),
            0.0,
            1.0,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::moments::calib::CalibSnapshot;

    const WAVELENGTH_M: f64 = 0.10;
    const PRT: f64 = 0.001;

    fn calib() -> CalibSnapshot {
        CalibSnapshot {
            wavelength_m: WAVELENGTH_M,
            noise_dbm_hc: -114.0,
            noise_dbm_vc: -114.0,
            noise_dbm_hx: -114.0,
            noise_dbm_vx: -114.0,
            base_dbz_1km_hc: -46.0,
            base_dbz_1km_vc: -46.0,
            base_dbz_1km_hx: -46.0,
            base_dbz_1km_vx: -46.0,
            ..CalibSnapshot::default()
        }
    }

    fn estimator(n_samples: usize) -> MomentEstimator {
        MomentEstimator::new(
            &EngineConfig::default(),
            &calib(),
            PRT,
            n_samples,
            200,
            0.15,
            0.25,
        )
    }

    /// Constant-doppler dwell: iq[n] = a * exp(-j * 4 pi v prt n / lambda)
    /// with the default sign convention recovering +v.
    fn doppler_series(n: usize, vel: f64, amp: f64) -> Vec<Complex64> {
        let omega = 4.0 * PI * vel * PRT / WAVELENGTH_M;
        (0..n).map(|ii| phasor(omega * ii as f64) * amp).collect()
    }

    #[test]
    fn single_pol_recovers_velocity() {
        let est = estimator(64);
        let iq = doppler_series(64, 8.0, 1.0e-3);
        let mut fields = MomentsFields::new();
        est.single_pol(&iq, 10, false, &mut fields);
        // vel = (arg/pi)*nyquist*vel_sign, arg = omega, default sign -1
        let expected = -(4.0 * PI * 8.0 * PRT / WAVELENGTH_M / PI) * est.nyquist;
        assert!((fields.vel - expected).abs() < 1e-6, "vel {}", fields.vel);
        assert!(fields.ncp > 0.99);
        assert!(fields.snr != MISSING);
        assert!(fields.dbz != MISSING);
    }

    #[test]
    fn single_pol_weak_signal_sets_censoring_flag() {
        let est = estimator(64);
        // amplitude far below the -114 dBm noise floor
        let iq = doppler_series(64, 3.0, 1.0e-10);
        let mut fields = MomentsFields::new();
        est.single_pol(&iq, 10, false, &mut fields);
        assert!(fields.censoring_flag);
        assert_eq!(fields.dbz, MISSING);
        assert_eq!(fields.snr, MISSING);
    }

    #[test]
    fn single_pol_v_matches_h_channel_moments() {
        let est = estimator(64);
        let iq = doppler_series(64, 8.0, 1.0e-3);
        let mut h_fields = MomentsFields::new();
        let mut v_fields = MomentsFields::new();
        est.single_pol(&iq, 10, false, &mut h_fields);
        est.single_pol_v(&iq, 10, false, &mut v_fields);
        // symmetric calibration: the V-only moments match the H-only ones
        assert!((v_fields.vel - h_fields.vel).abs() < 1e-9);
        assert!((v_fields.dbz - h_fields.dbz).abs() < 1e-9);
        assert!((v_fields.snr - h_fields.snr).abs() < 1e-9);
        assert_eq!(v_fields.snrvc, v_fields.snr);
        assert_eq!(v_fields.dbz, v_fields.dbzvc);
    }

    #[test]
    fn dbz_increases_with_range_for_same_power() {
        let est = estimator(64);
        let iq = doppler_series(64, 5.0, 1.0e-3);
        let mut near = MomentsFields::new();
        let mut far = MomentsFields::new();
        est.single_pol(&iq, 4, false, &mut near);
        est.single_pol(&iq, 100, false, &mut far);
        assert!(far.dbz > near.dbz + 10.0);
    }

    #[test]
    fn sim_hv_equal_channels_give_zero_zdr_and_high_rhohv() {
        let est = estimator(64);
        let iqh = doppler_series(64, 6.0, 1.0e-3);
        let iqv = doppler_series(64, 6.0, 1.0e-3);
        let mut fields = MomentsFields::new();
        est.dp_sim_hv(&iqh, &iqv, 10, false, &mut fields);
        assert!(fields.zdr.abs() < 0.01, "zdr {}", fields.zdr);
        assert!(fields.rhohv > 0.98, "rhohv {}", fields.rhohv);
        assert!(fields.phidp.abs() < 0.5, "phidp {}", fields.phidp);
    }

    #[test]
    fn sim_hv_power_ratio_shows_in_zdr() {
        let est = estimator(64);
        let iqh = doppler_series(64, 6.0, 2.0e-3);
        let iqv = doppler_series(64, 6.0, 1.0e-3);
        let mut fields = MomentsFields::new();
        est.dp_sim_hv(&iqh, &iqv, 10, false, &mut fields);
        // power ratio 4 => 6 dB
        assert!((fields.zdr - 6.02).abs() < 0.1, "zdr {}", fields.zdr);
    }

    #[test]
    fn alt_mode_velocity_spans_full_nyquist() {
        // alternating mode: each channel sampled at 2*prt, but the
        // H-to-V lag-1 phases recover the full nyquist
        let config = EngineConfig {
            xmit_rcv_mode: crate::config::XmitRcvMode::DpAltHvCoOnly,
            ..EngineConfig::default()
        };
        let est = MomentEstimator::new(&config, &calib(), PRT, 64, 200, 0.15, 0.25);
        let vel = 10.0;
        let combined = doppler_series(64, vel, 1.0e-3);
        let mut iqhc = Vec::new();
        let mut iqvc = Vec::new();
        for (ii, sample) in combined.iter().enumerate() {
            if ii % 2 == 0 {
                iqhc.push(*sample);
            } else {
                iqvc.push(*sample);
            }
        }
        let mut fields = MomentsFields::new();
        est.dp_alt_hv_co_only(&iqhc, &iqvc, 10, false, &mut fields);
        let expected = -(4.0 * PI * vel * PRT / WAVELENGTH_M / PI) * est.nyquist;
        assert!(
            (fields.vel - expected).abs() < 0.1,
            "vel {} expected {}",
            fields.vel,
            expected
        );
        assert!(fields.rhohv > 0.95);
    }

    #[test]
    fn h_only_mode_computes_ldr_from_cross_channel() {
        let est = estimator(64);
        let iqhc = doppler_series(64, 4.0, 1.0e-3);
        // cross-polar 20 dB down
        let iqvx = doppler_series(64, 4.0, 1.0e-4);
        let mut fields = MomentsFields::new();
        est.dp_h_only(&iqhc, &iqvx, 10, false, &mut fields);
        assert!((fields.ldrh - (-20.0)).abs() < 0.2, "ldrh {}", fields.ldrh);
    }

    #[test]
    fn stag_mode_unfolds_beyond_short_prt_nyquist() {
        let config = EngineConfig {
            prt_mode: crate::config::PrtMode::Staggered {
                stag_m: 2,
                stag_n: 3,
            },
            ..EngineConfig::default()
        };
        let prt_short = PRT;
        let prt_long = PRT * 1.5;
        let est = MomentEstimator::new_staggered(
            &config, &calib(), prt_short, prt_long, 2, 3, 64, 800, 600, 0.15, 0.25,
        );
        // velocity beyond the 25 m/s short-PRT nyquist
        let vel = 35.0;
        let omega = 4.0 * PI * vel / WAVELENGTH_M;
        let mut time = 0.0;
        let mut combined = Vec::with_capacity(64);
        for ii in 0..64 {
            combined.push(phasor(omega * time) * 1.0e-3);
            time += if ii % 2 == 0 { prt_short } else { prt_long };
        }
        let mut short = vec![Complex64::new(0.0, 0.0); 32];
        let mut long = vec![Complex64::new(0.0, 0.0); 32];
        crate::moments::stag::separate_stag_iq(&combined, &mut short, &mut long);
        let mut fields = MomentsFields::new();
        est.single_pol_stag_prt(&combined, &short, &long, 10, false, &mut fields);
        assert!(
            (fields.vel - vel).abs() < 0.5,
            "vel {} expected {}",
            fields.vel,
            vel
        );
        assert!(fields.vel_unfold_interval != 0.0);
    }
}
