//! TOML configuration for the recommender.
//!
//! Every section and field is optional and falls back to the defaults
//! below:
//!
//! ```toml
//! [factorization]
//! latent_dim = 100
//! num_epochs = 20
//! learning_rate = 0.005
//! l2_penalty = 0.02
//! init_std_dev = 0.1
//! # seed = 42
//! # timeout_ms = 5000
//!
//! [ranking]
//! min_score = 3.5
//! max_results = 10
//!
//! [cache]
//! serve_stale = false
//! ```
use std::path::Path;
use std::time::Duration;

use failure::Fail;
use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::models::Hyperparameters;
use crate::ranking::RankingConfig;

/// Configuration error types.
#[derive(Debug, Fail)]
pub enum ConfigError {
    /// The file could not be read.
    #[fail(display = "Cannot read configuration file: {}", _0)]
    Io(#[cause] std::io::Error),
    /// The file is not valid TOML for this configuration.
    #[fail(display = "Invalid configuration: {}", _0)]
    Parse(#[cause] toml::de::Error),
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Training hyperparameters.
    pub factorization: FactorizationConfig,
    /// Ranking thresholds.
    pub ranking: RankingConfig,
    /// Model cache policy.
    pub cache: CacheConfig,
}

/// Training hyperparameters.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct FactorizationConfig {
    /// Number of latent factors.
    pub latent_dim: usize,
    /// Passes over the ratings per fit.
    pub num_epochs: usize,
    /// SGD step size.
    pub learning_rate: f32,
    /// Regularization of factors and biases.
    pub l2_penalty: f32,
    /// Standard deviation of the initial factors.
    pub init_std_dev: f32,
    /// Seed for reproducible fits.
    pub seed: Option<u64>,
    /// Abort training after this many milliseconds.
    pub timeout_ms: Option<u64>,
}

impl Default for FactorizationConfig {
    fn default() -> Self {
        FactorizationConfig {
            latent_dim: 100,
            num_epochs: 20,
            learning_rate: 0.005,
            l2_penalty: 0.02,
            init_std_dev: 0.1,
            seed: None,
            timeout_ms: None,
        }
    }
}

impl FactorizationConfig {
    /// Hyperparameters described by this section.
    pub fn hyperparameters(&self) -> Hyperparameters {
        let mut hyper = Hyperparameters::new()
            .latent_dim(self.latent_dim)
            .num_epochs(self.num_epochs)
            .learning_rate(self.learning_rate)
            .l2_penalty(self.l2_penalty)
            .init_std_dev(self.init_std_dev);

        if let Some(seed) = self.seed {
            hyper = hyper.seed(seed);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            hyper = hyper.timeout(Duration::from_millis(timeout_ms));
        }

        hyper
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Config::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Hyperparameters of the `[factorization]` section.
    pub fn hyperparameters(&self) -> Hyperparameters {
        self.factorization.hyperparameters()
    }
}
