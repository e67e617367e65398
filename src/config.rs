//! TOML configuration.
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! working setup. The file path comes from `--config`, then the
//! `ECOSENTINEL_CONFIG` environment variable, then the system location.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::TrainParams;
use crate::features::{FeatureSchema, InvalidRecordPolicy};

pub const CONFIG_ENV: &str = "ECOSENTINEL_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/ecosentinel/ecosentinel.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration.
    ///
    /// An explicit path must load; the environment and system locations fall
    /// back to defaults with a warning when unreadable.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "ECOSENTINEL_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5001".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Where the trainer writes and the scorer reads the artifact.
    pub artifact_path: PathBuf,
    pub n_estimators: usize,
    pub contamination: f64,
    pub seed: u64,
    pub max_samples: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let params = TrainParams::default();
        Self {
            artifact_path: PathBuf::from("data/iforest_model.json"),
            n_estimators: params.n_estimators,
            contamination: params.contamination,
            seed: params.seed,
            max_samples: params.max_samples,
        }
    }
}

impl ModelConfig {
    pub fn train_params(&self) -> TrainParams {
        TrainParams {
            n_estimators: self.n_estimators,
            contamination: self.contamination,
            seed: self.seed,
            max_samples: self.max_samples,
        }
    }
}

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// JSON file with a top-level `incidents` array.
    pub incidents_path: PathBuf,
    /// Schema used by `train`, `run`, and the listing endpoint when none is given.
    pub schema: FeatureSchema,
    pub invalid_records: InvalidRecordPolicy,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            incidents_path: PathBuf::from("data/data.json"),
            schema: FeatureSchema::IncidentType,
            invalid_records: InvalidRecordPolicy::Skip,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
