//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::align::Symmetrization;
use crate::error::{Error, Result};

/// Serving-time knobs for the decoder and the engine pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engines kept fully resident and first in line for serving.
    #[serde(default = "default_hot_capacity")]
    pub hot_capacity: usize,
    /// Demotion buffer between the HOT and COLD tiers.
    #[serde(default = "default_warm_capacity")]
    pub warm_capacity: usize,
    #[serde(default = "default_beam_size")]
    pub beam_size: usize,
    /// Decode-length cap used when a checkpoint carries no statistics
    /// for the requested direction.
    #[serde(default = "default_max_sent_length")]
    pub max_sent_length: usize,
    /// Upper bound on per-request alternatives.
    #[serde(default = "default_max_n_best")]
    pub max_n_best: usize,
    /// Tuning epochs at suggestion quality 1.0.
    #[serde(default = "default_max_tuning_epochs")]
    pub max_tuning_epochs: u32,
    /// Tuning learning rate at suggestion quality 1.0.
    #[serde(default = "default_max_tuning_learning_rate")]
    pub max_tuning_learning_rate: f64,
    #[serde(default)]
    pub symmetrization: Symmetrization,
}

fn default_hot_capacity() -> usize {
    2
}

fn default_warm_capacity() -> usize {
    5
}

fn default_beam_size() -> usize {
    4
}

fn default_max_sent_length() -> usize {
    512
}

fn default_max_n_best() -> usize {
    8
}

fn default_max_tuning_epochs() -> u32 {
    10
}

fn default_max_tuning_learning_rate() -> f64 {
    0.2
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hot_capacity: default_hot_capacity(),
            warm_capacity: default_warm_capacity(),
            beam_size: default_beam_size(),
            max_sent_length: default_max_sent_length(),
            max_n_best: default_max_n_best(),
            max_tuning_epochs: default_max_tuning_epochs(),
            max_tuning_learning_rate: default_max_tuning_learning_rate(),
            symmetrization: Symmetrization::default(),
        }
    }
}

impl EngineConfig {
    /// Read a TOML config file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// A pool that cannot hold a single HOT engine cannot serve.
    pub fn validate(&self) -> Result<()> {
        if self.hot_capacity == 0 {
            return Err(Error::Config("hot_capacity must be at least 1".to_string()));
        }
        if self.beam_size == 0 {
            return Err(Error::Config("beam_size must be at least 1".to_string()));
        }
        Ok(())
    }
}
