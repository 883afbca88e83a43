use anyhow::Context;
use momentscore::config::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// What the synthetic scene contains.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub weather_vel_mps: f64,
    pub weather_width_mps: f64,
    pub weather_snr_db: f64,
    pub clutter_gate_start: usize,
    pub clutter_gate_count: usize,
    /// Clutter-to-signal ratio at the clutter gates, dB.
    pub clutter_csr_db: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            weather_vel_mps: 8.0,
            weather_width_mps: 1.5,
            weather_snr_db: 25.0,
            clutter_gate_start: 20,
            clutter_gate_count: 12,
            clutter_csr_db: 25.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub n_beams: usize,
    pub n_gates: usize,
    pub n_samples: usize,
    pub prt_secs: f64,
    pub start_range_km: f64,
    pub gate_spacing_km: f64,
    pub seed: u64,
    pub scenario: ScenarioConfig,
    pub engine: EngineConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            n_beams: 20,
            n_gates: 128,
            n_samples: 64,
            prt_secs: 0.001,
            start_range_km: 0.15,
            gate_spacing_km: 0.25,
            seed: 0,
            scenario: ScenarioConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(n_beams: usize, n_gates: usize, n_samples: usize) -> Self {
        Self {
            n_beams,
            n_gates,
            n_samples,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn default_engine_section_validates() {
        let cfg = WorkflowConfig::default();
        assert!(cfg.engine.validate().is_ok());
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"n_beams: 5\nn_gates: 32\nscenario:\n  clutter_csr_db: 40.0\n")
            .unwrap();
        let path = temp.into_temp_path();
        let cfg = WorkflowConfig::load(&path).unwrap();
        assert_eq!(cfg.n_beams, 5);
        assert_eq!(cfg.n_gates, 32);
        assert_eq!(cfg.scenario.clutter_csr_db, 40.0);
        // unnamed sections keep their defaults
        assert_eq!(cfg.n_samples, 64);
    }
}
