//! Engine configuration.
//!
//! Loaded from (in priority order): `STEERAG__`-prefixed environment
//! variables, a config file (`steerag.toml` by default), then defaults.

use serde::Deserialize;

use crate::error::CoreError;

/// Tunables shared by the generators and the query coordinator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reachability walks attempted per StatAG iteration.
    pub sample_size: usize,
    /// Reachability walks attempted per steered-query iteration.
    pub steering_sample_size: usize,
    /// Minimum entries in each training buffer before steering may start.
    pub min_training_size: usize,
    /// Rolling cap on each training buffer.
    pub max_training_size: usize,
    /// Default maximum sampled path length.
    pub max_length: usize,
    /// Directory receiving per-query stores, CSV logs, and run metadata.
    pub output_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_size: 100,
            steering_sample_size: 500,
            min_training_size: 20,
            max_training_size: 200,
            max_length: 40,
            output_dir: "steerag-out".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration, layering the environment over an optional file.
    pub fn load(file_prefix: &str) -> Result<Self, CoreError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("STEERAG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        cfg.try_deserialize()
            .map_err(|e| CoreError::Config(e.to_string()))
    }
}
