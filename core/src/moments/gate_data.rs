//! Per-gate working storage: raw, windowed and filtered time series for
//! every receive channel, plus the two output field sets.
//!
//! Buffers are grow-only. A gate recycled into a larger dwell reallocates
//! once; shrinking only changes the logical length so steady-state
//! operation does no allocation.

use num_complex::Complex64;

use super::fields::MomentsFields;

const CZERO: Complex64 = Complex64::new(0.0, 0.0);

#[derive(Debug, Clone, Default)]
pub struct GateData {
    // raw time series, one entry per pulse in the dwell
    pub iq_hc: Vec<Complex64>,
    pub iq_vc: Vec<Complex64>,
    pub iq_hx: Vec<Complex64>,
    pub iq_vx: Vec<Complex64>,

    // windowed copies
    pub iq_hc_windowed: Vec<Complex64>,
    pub iq_vc_windowed: Vec<Complex64>,

    // clutter-filtered series
    pub iq_hc_filtered: Vec<Complex64>,
    pub iq_vc_filtered: Vec<Complex64>,
    pub iq_hx_filtered: Vec<Complex64>,
    pub iq_vx_filtered: Vec<Complex64>,

    // notched series for cross-ratio recomputation
    pub iq_hc_notched: Vec<Complex64>,
    pub iq_vc_notched: Vec<Complex64>,

    // staggered-PRT sub-series (short-PRT pairs / long-PRT pairs)
    pub iq_hc_short: Vec<Complex64>,
    pub iq_hc_long: Vec<Complex64>,
    pub iq_vc_short: Vec<Complex64>,
    pub iq_vc_long: Vec<Complex64>,
    pub iq_hc_short_filtered: Vec<Complex64>,
    pub iq_hc_long_filtered: Vec<Complex64>,
    pub iq_vc_short_filtered: Vec<Complex64>,
    pub iq_vc_long_filtered: Vec<Complex64>,

    /// Unfiltered moments.
    pub fields: MomentsFields,
    /// Clutter-filtered moments; starts as a copy of `fields`.
    pub fields_f: MomentsFields,
}

impl GateData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare the gate for a new dwell: size the full-length buffers,
    /// size the staggered sub-series, and reset both field sets.
    pub fn init_for_dwell(&mut self, n_samples: usize, n_samples_half: usize) {
        for buf in [
            &mut self.iq_hc,
            &mut self.iq_vc,
            &mut self.iq_hx,
            &mut self.iq_vx,
            &mut self.iq_hc_windowed,
            &mut self.iq_vc_windowed,
            &mut self.iq_hc_filtered,
            &mut self.iq_vc_filtered,
            &mut self.iq_hx_filtered,
            &mut self.iq_vx_filtered,
            &mut self.iq_hc_notched,
            &mut self.iq_vc_notched,
        ] {
            buf.clear();
            buf.resize(n_samples, CZERO);
        }
        for buf in [
            &mut self.iq_hc_short,
            &mut self.iq_hc_long,
            &mut self.iq_vc_short,
            &mut self.iq_vc_long,
            &mut self.iq_hc_short_filtered,
            &mut self.iq_hc_long_filtered,
            &mut self.iq_vc_short_filtered,
            &mut self.iq_vc_long_filtered,
        ] {
            buf.clear();
            buf.resize(n_samples_half, CZERO);
        }
        self.fields = MomentsFields::new();
        self.fields_f = MomentsFields::new();
    }

    /// Seed the filtered field set from the unfiltered one, so gates the
    /// filter never touches still carry complete output.
    pub fn seed_filtered_fields(&mut self) {
        self.fields_f = self.fields.clone();
    }
}
