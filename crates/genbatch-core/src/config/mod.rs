//! Scheduler configuration.
//!
//! Loaded in order:
//! 1. built-in defaults
//! 2. `config/genbatch.toml` (or an explicit file)
//! 3. environment variables with the `GENBATCH__` prefix


use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GenError, GenResult};

/// Default location of the optional config file, without extension.
pub const DEFAULT_CONFIG_FILE: &str = "config/genbatch";

/// Environment prefix for overrides (`GENBATCH__MEMORY_FRACTION=0.9`).
pub const ENV_PREFIX: &str = "GENBATCH";

/// Parameter-count bands for the heuristic batch size estimate.
///
/// A model with fewer than `thresholds_b[i]` billion parameters uses
/// `gb_per_sequence[i]`; larger models use the last entry.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HeuristicConfig {
    #[serde(default = "default_thresholds_b")]
    pub thresholds_b: Vec<f64>,
    #[serde(default = "default_gb_per_sequence")]
    pub gb_per_sequence: Vec<f64>,
}

fn default_thresholds_b() -> Vec<f64> {
    vec![5.0, 10.0, 20.0]
}

fn default_gb_per_sequence() -> Vec<f64> {
    vec![0.5, 1.0, 2.0, 3.0]
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            thresholds_b: default_thresholds_b(),
            gb_per_sequence: default_gb_per_sequence(),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Share of device capacity considered usable (default: 0.85).
    #[serde(default = "default_memory_fraction")]
    pub memory_fraction: f64,

    /// Batch size multiplier applied after an OOM (default: 0.8).
    #[serde(default = "default_shrink_factor")]
    pub shrink_factor: f64,

    /// Minimum coefficient of determination to trust a calibration fit (default: 0.95).
    #[serde(default = "default_min_r_squared")]
    pub min_r_squared: f64,

    /// Root of the `<model_id>/<precision>.json` calibration tables.
    #[serde(default = "default_footprint_table_root")]
    pub footprint_table_root: PathBuf,

    #[serde(default)]
    pub heuristic: HeuristicConfig,
}

fn default_memory_fraction() -> f64 {
    0.85
}

fn default_shrink_factor() -> f64 {
    0.8
}

fn default_min_r_squared() -> f64 {
    0.95
}

fn default_footprint_table_root() -> PathBuf {
    PathBuf::from("memory_estimator")
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            memory_fraction: default_memory_fraction(),
            shrink_factor: default_shrink_factor(),
            min_r_squared: default_min_r_squared(),
            footprint_table_root: default_footprint_table_root(),
            heuristic: HeuristicConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load from the default file location and the environment.
    pub fn load() -> GenResult<Self> {
        Self::load_with(None)
    }

    /// Load from an optional explicit file and the environment.
    ///
    /// An explicit file must exist; the default one is optional.
    pub fn load_with(file: Option<&Path>) -> GenResult<Self> {
        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let builder = config::Config::builder()
            .add_source(file_source)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

        let config: SchedulerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        tracing::debug!("Loaded scheduler config: {:?}", config);
        Ok(config)
    }

    /// Load from a TOML file only.
    pub fn from_file(path: &Path) -> GenResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GenError::configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: SchedulerConfig = toml::from_str(&content)
            .map_err(|e| GenError::configuration(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges.
    pub fn validate(&self) -> GenResult<()> {
        if self.memory_fraction.is_nan() || self.memory_fraction <= 0.0 || self.memory_fraction > 1.0 {
            return Err(GenError::configuration(format!(
                "memory_fraction must be in (0, 1], got {}",
                self.memory_fraction
            )));
        }
        if self.shrink_factor.is_nan() || self.shrink_factor <= 0.0 || self.shrink_factor >= 1.0 {
            return Err(GenError::configuration(format!(
                "shrink_factor must be in (0, 1), got {}",
                self.shrink_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.min_r_squared) {
            return Err(GenError::configuration(format!(
                "min_r_squared must be in [0, 1], got {}",
                self.min_r_squared
            )));
        }
        self.heuristic.validate()
    }
}

impl HeuristicConfig {
    /// Bands must be strictly increasing with one more rate than thresholds.
    pub fn validate(&self) -> GenResult<()> {
        if self.gb_per_sequence.len() != self.thresholds_b.len() + 1 {
            return Err(GenError::configuration(format!(
                "heuristic.gb_per_sequence needs {} entries for {} thresholds, got {}",
                self.thresholds_b.len() + 1,
                self.thresholds_b.len(),
                self.gb_per_sequence.len()
            )));
        }
        if self.thresholds_b.windows(2).any(|w| w[0] >= w[1]) {
            return Err(GenError::configuration(
                "heuristic.thresholds_b must be strictly increasing",
            ));
        }
        if self.gb_per_sequence.iter().any(|gb| gb.is_nan() || *gb <= 0.0) {
            return Err(GenError::configuration(
                "heuristic.gb_per_sequence entries must be > 0",
            ));
        }
        Ok(())
    }
}
