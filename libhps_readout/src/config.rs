use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConfigError;

/// Structure representing the run configuration: output pathing, run range,
/// and the numeric readout/trigger parameters the DAQ configuration system
/// would inject in a real setup.
/// Configs are serializable and deserializable to YAML using serde and serde_yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadoutConfig {
    pub output_path: PathBuf,
    pub first_run_number: i32,
    pub last_run_number: i32,
    pub n_threads: i32,
    /// Beam bunches simulated per run; the global clock advances 2 ns per
    /// bunch.
    pub bunches_per_run: u64,
    /// Base seed for the simulated hit source; the run number is folded in
    /// so every run draws a distinct, reproducible sequence.
    pub seed: u64,
    /// Mean raw hits per readout cycle.
    pub occupancy: f64,
    /// Whether to emit the TI/SSP bank stream alongside the event file.
    pub write_banks: bool,

    // Readout timing.
    pub readout_window: f64,
    pub trigger_offset: f64,
    pub buffer_margin: f64,
    pub buffer_retention: f64,
    pub dead_time: f64,
    pub cluster_window_before: f64,
    pub cluster_window_after: f64,

    // FADC calibration.
    pub pedestal: f64,
    pub gain_mev_per_adc: f64,
    pub converter_displacement: f64,

    // Clustering.
    pub seed_threshold_mev: f64,
    pub cluster_displacement: f64,

    // Singles trigger cuts.
    pub singles_energy_min_mev: u32,
    pub singles_energy_max_mev: u32,
    pub singles_hit_count_min: u8,
    pub singles_displacement: f64,

    // Pair trigger cuts.
    pub pair_energy_sum_max_mev: u32,
    pub pair_energy_diff_max_mev: u32,
    pub pair_coincidence: usize,
}

impl Default for ReadoutConfig {
    /// A configuration that runs out of the box: modest occupancy, the
    /// nominal 200 ns readout window, and cut values loose enough to
    /// produce triggers from the simulated source.
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("None"),
            first_run_number: 0,
            last_run_number: 0,
            n_threads: 1,
            bunches_per_run: 100_000,
            seed: 0,
            occupancy: 0.05,
            write_banks: true,
            readout_window: 200.0,
            trigger_offset: 50.0,
            buffer_margin: 150.0,
            buffer_retention: 500.0,
            dead_time: 32.0,
            cluster_window_before: 16.0,
            cluster_window_after: 32.0,
            pedestal: 100.0,
            gain_mev_per_adc: 0.3,
            converter_displacement: 8.0,
            seed_threshold_mev: 50.0,
            cluster_displacement: 4.0,
            singles_energy_min_mev: 150,
            singles_energy_max_mev: 6000,
            singles_hit_count_min: 1,
            singles_displacement: 8.0,
            pair_energy_sum_max_mev: 6000,
            pair_energy_diff_max_mev: 1500,
            pair_coincidence: 2,
        }
    }
}

impl ReadoutConfig {
    /// Read the configuration in a YAML file.
    /// Returns a ReadoutConfig if successful.
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Path of the triggered-event file for a run.
    pub fn get_event_file_name(&self, run_number: i32) -> Result<PathBuf, ConfigError> {
        if self.output_path.exists() {
            Ok(self
                .output_path
                .join(format!("{}.events.yaml", self.get_run_str(run_number))))
        } else {
            Err(ConfigError::BadFilePath(self.output_path.clone()))
        }
    }

    /// Path of the emitted bank stream for a run.
    pub fn get_bank_file_name(&self, run_number: i32) -> Result<PathBuf, ConfigError> {
        if self.output_path.exists() {
            Ok(self
                .output_path
                .join(format!("{}.banks", self.get_run_str(run_number))))
        } else {
            Err(ConfigError::BadFilePath(self.output_path.clone()))
        }
    }

    /// Seed for the hit source of one run.
    pub fn run_seed(&self, run_number: i32) -> u64 {
        self.seed.wrapping_add(run_number as u64)
    }

    /// Construct the run string using the DAQ format.
    fn get_run_str(&self, run_number: i32) -> String {
        format!("run_{run_number:0>4}")
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }
}
