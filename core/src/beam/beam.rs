//! Beam container: dwell metadata, per-gate working storage and the
//! output field arrays.
//!
//! Beams are recycled through the engine's pool; `reinit` re-sizes the
//! grow-only buffers for the next dwell instead of reallocating.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::config::{PrtMode, XmitRcvMode};
use crate::moments::{CalibSnapshot, GateData, MomentsFields};
use crate::prelude::{EngineError, EngineResult, FieldSelection};

const CZERO: Complex64 = Complex64::new(0.0, 0.0);

/// One transmitted pulse worth of received I/Q: one vector per receive
/// channel, each indexed by gate.
#[derive(Debug, Clone, Default)]
pub struct Pulse {
    pub time_secs: f64,
    pub chan_iq: Vec<Vec<Complex64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMode {
    Ppi,
    Rhi,
    Sector,
    Pointing,
}

impl Default for ScanMode {
    fn default() -> Self {
        ScanMode::Ppi
    }
}

/// Antenna/scan metadata for one beam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeamMeta {
    pub time_secs: i64,
    pub nano_secs: u32,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub target_azimuth_deg: f64,
    pub target_elevation_deg: f64,
    pub scan_mode: ScanMode,
    pub sweep_num: i32,
    pub volume_num: i32,
    pub end_of_sweep: bool,
    pub end_of_volume: bool,
    pub antenna_transition: bool,
    pub antenna_rate_dps: f64,
}

impl Default for BeamMeta {
    fn default() -> Self {
        Self {
            time_secs: 0,
            nano_secs: 0,
            azimuth_deg: 0.0,
            elevation_deg: 0.0,
            target_azimuth_deg: 0.0,
            target_elevation_deg: 0.0,
            scan_mode: ScanMode::default(),
            sweep_num: 0,
            volume_num: 0,
            end_of_sweep: false,
            end_of_volume: false,
            antenna_transition: false,
            antenna_rate_dps: 10.0,
        }
    }
}

/// Platform motion for a moving installation; absent for fixed radars.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Georeference {
    pub ew_velocity_mps: f64,
    pub ns_velocity_mps: f64,
    pub vert_velocity_mps: f64,
    pub heading_deg: f64,
}

/// One dwell of pulses plus everything derived from it.
#[derive(Debug, Default)]
pub struct Beam {
    pub meta: BeamMeta,
    pub mode: XmitRcvMode,
    pub prt_mode: PrtMode,

    pub n_samples: usize,
    pub n_gates: usize,
    pub start_range_km: f64,
    pub gate_spacing_km: f64,

    pub prt: f64,
    pub prt_short: f64,
    pub prt_long: f64,
    /// Gates observable at the short PRT; beyond this, staggered gates
    /// carry long-PRT data in both sub-series.
    pub n_gates_prt_short: usize,

    pub calib: CalibSnapshot,
    pub georef: Option<Georeference>,
    pub measured_xmit_power_dbm_h: f64,
    pub measured_xmit_power_dbm_v: f64,

    /// SZ-style alternating-trip dwell: the clutter stage processes the
    /// first- and second-trip gate sets independently.
    pub alternating_trips: bool,

    /// Per-gate noise flags from an external noise locator; empty when no
    /// locator ran on this dwell.
    pub noise_flags: Vec<bool>,

    pub gates: Vec<GateData>,
    /// Unfiltered outputs, one per gate, filled at copy-out.
    pub fields: Vec<MomentsFields>,
    /// Filtered outputs, one per gate.
    pub fields_f: Vec<MomentsFields>,
}

impl Beam {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare a (possibly recycled) beam for a new dwell. Buffers grow
    /// to fit and are never shrunk.
    #[allow(clippy::too_many_arguments)]
    pub fn reinit(
        &mut self,
        meta: BeamMeta,
        mode: XmitRcvMode,
        prt_mode: PrtMode,
        n_samples: usize,
        n_gates: usize,
        start_range_km: f64,
        gate_spacing_km: f64,
        calib: CalibSnapshot,
    ) {
        self.meta = meta;
        self.mode = mode;
        self.prt_mode = prt_mode;
        self.n_samples = n_samples;
        self.n_gates = n_gates;
        self.start_range_km = start_range_km;
        self.gate_spacing_km = gate_spacing_km;
        self.calib = calib;
        self.georef = None;
        self.measured_xmit_power_dbm_h = crate::prelude::MISSING;
        self.measured_xmit_power_dbm_v = crate::prelude::MISSING;
        self.alternating_trips = false;
        self.noise_flags.clear();
        self.n_gates_prt_short = n_gates;

        if self.gates.len() < n_gates {
            self.gates.resize_with(n_gates, GateData::new);
        }
        for gate in self.gates.iter_mut().take(n_gates) {
            gate.init_for_dwell(n_samples, n_samples / 2);
        }
        self.fields.clear();
        self.fields_f.clear();
    }

    /// Number of receive channels this beam's mode expects per pulse.
    pub fn n_channels(&self) -> usize {
        match self.mode {
            XmitRcvMode::SinglePol | XmitRcvMode::SinglePolV => 1,
            _ => 2,
        }
    }

    /// Attach per-gate noise flags from an external noise locator; the
    /// censoring stage consumes them in `CensorMode::NoiseFlag`.
    pub fn set_noise_flags(&mut self, flags: &[bool]) {
        self.noise_flags.clear();
        self.noise_flags.extend_from_slice(flags);
    }

    /// Distribute pulse samples into the per-gate channel buffers
    /// according to the polarization mode, then split staggered dwells
    /// into their short/long sub-series.
    pub fn load_pulses(&mut self, pulses: &[Pulse]) -> EngineResult<()> {
        if pulses.len() != self.n_samples {
            return Err(EngineError::InvalidInput(format!(
                "expected {} pulses, got {}",
                self.n_samples,
                pulses.len()
            )));
        }
        let n_chan = self.n_channels();
        for (pp, pulse) in pulses.iter().enumerate() {
            if pulse.chan_iq.len() < n_chan {
                return Err(EngineError::InvalidInput(format!(
                    "pulse {} has {} channels, mode needs {}",
                    pp,
                    pulse.chan_iq.len(),
                    n_chan
                )));
            }
        }

        for (pp, pulse) in pulses.iter().enumerate() {
            let chan0 = &pulse.chan_iq[0];
            let chan1 = pulse.chan_iq.get(1);
            for gg in 0..self.n_gates {
                let s0 = chan0.get(gg).copied().unwrap_or(CZERO);
                let s1 = chan1.and_then(|c| c.get(gg)).copied().unwrap_or(CZERO);
                let gate = &mut self.gates[gg];
                match self.mode {
                    XmitRcvMode::SinglePol => {
                        gate.iq_hc[pp] = s0;
                    }
                    XmitRcvMode::SinglePolV => {
                        gate.iq_vc[pp] = s0;
                    }
                    XmitRcvMode::DpSimHv => {
                        gate.iq_hc[pp] = s0;
                        gate.iq_vc[pp] = s1;
                    }
                    // switched receivers: channel 0 alternates between the
                    // H and V co-polar series pulse by pulse
                    XmitRcvMode::DpSimHvSwitched => {
                        if pp % 2 == 0 {
                            gate.iq_hc[pp] = s0;
                            gate.iq_vc[pp] = s1;
                        } else {
                            gate.iq_vc[pp] = s0;
                            gate.iq_hc[pp] = s1;
                        }
                    }
                    XmitRcvMode::DpHOnly => {
                        gate.iq_hc[pp] = s0;
                        gate.iq_vx[pp] = s1;
                    }
                    XmitRcvMode::DpVOnly => {
                        gate.iq_vc[pp] = s0;
                        gate.iq_hx[pp] = s1;
                    }
                    // alternating transmit: even pulses are H, odd are V;
                    // the co receiver follows the transmit polarization
                    XmitRcvMode::DpAltHvCoOnly => {
                        if pp % 2 == 0 {
                            gate.iq_hc[pp / 2] = s0;
                        } else {
                            gate.iq_vc[pp / 2] = s0;
                        }
                    }
                    XmitRcvMode::DpAltHvCoCross => {
                        if pp % 2 == 0 {
                            gate.iq_hc[pp / 2] = s0;
                            gate.iq_vx[pp / 2] = s1;
                        } else {
                            gate.iq_vc[pp / 2] = s0;
                            gate.iq_hx[pp / 2] = s1;
                        }
                    }
                }
            }
        }

        if matches!(self.prt_mode, PrtMode::Staggered { .. }) {
            self.split_staggered();
        }
        Ok(())
    }

    /// Split the combined series into short/long sub-series; beyond the
    /// short-PRT range only the long pulses observe the gate, so the long
    /// data is copied into the short slot as well.
    fn split_staggered(&mut self) {
        let half = self.n_samples / 2;
        for (gg, gate) in self.gates.iter_mut().take(self.n_gates).enumerate() {
            for ii in 0..half {
                gate.iq_hc_short[ii] = gate.iq_hc[2 * ii];
                gate.iq_hc_long[ii] = gate.iq_hc[2 * ii + 1];
                gate.iq_vc_short[ii] = gate.iq_vc[2 * ii];
                gate.iq_vc_long[ii] = gate.iq_vc[2 * ii + 1];
            }
            if gg >= self.n_gates_prt_short {
                for ii in 0..half {
                    gate.iq_hc_short[ii] = gate.iq_hc_long[ii];
                    gate.iq_vc_short[ii] = gate.iq_vc_long[ii];
                    gate.iq_hc[2 * ii] = gate.iq_hc_long[ii];
                    gate.iq_vc[2 * ii] = gate.iq_vc_long[ii];
                }
            }
        }
    }

    /// Copy per-gate results into the beam's output arrays; the selection
    /// decides which field sets the delivered beam carries.
    pub fn copy_out(&mut self, selection: FieldSelection) {
        self.fields.clear();
        self.fields_f.clear();
        for gate in self.gates.iter().take(self.n_gates) {
            if selection != FieldSelection::Filtered {
                self.fields.push(gate.fields.clone());
            }
            if selection != FieldSelection::Unfiltered {
                self.fields_f.push(gate.fields_f.clone());
            }
        }
    }
}
