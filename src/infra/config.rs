//! Configuration loading from TOML files
//!
//! Config file is selected via [`ConfigArgs`], flattened into each binary:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section and key is optional; missing ones take the defaults below.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/dev.toml";

/// `--config` option shared by the binaries
#[derive(clap::Args, Debug, Clone, PartialEq)]
pub struct ConfigArgs {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,
}

impl ConfigArgs {
    /// Load the selected file, falling back to defaults
    pub fn load(&self) -> Config {
        Config::load_from_path(&self.config)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address(), port: default_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Checkpoint file; relative paths resolve against the crate directory
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: String,
}

fn default_checkpoint_path() -> String {
    "model/crowd_model.json".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { checkpoint_path: default_checkpoint_path() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_samples")]
    pub samples: usize,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_train_fraction")]
    pub train_fraction: f64,
    #[serde(default = "default_lr_step_size")]
    pub lr_step_size: usize,
    #[serde(default = "default_lr_gamma")]
    pub lr_gamma: f32,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Progress log interval in epochs
    #[serde(default = "default_log_every")]
    pub log_every: usize,
}

fn default_samples() -> usize {
    15_000
}

fn default_epochs() -> usize {
    50
}

fn default_batch_size() -> usize {
    64
}

fn default_learning_rate() -> f32 {
    0.001
}

fn default_train_fraction() -> f64 {
    0.8
}

fn default_lr_step_size() -> usize {
    20
}

fn default_lr_gamma() -> f32 {
    0.5
}

fn default_seed() -> u64 {
    42
}

fn default_log_every() -> usize {
    10
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            samples: default_samples(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            train_fraction: default_train_fraction(),
            lr_step_size: default_lr_step_size(),
            lr_gamma: default_lr_gamma(),
            seed: default_seed(),
            log_every: default_log_every(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    bind_address: String,
    port: u16,
    checkpoint_path: String,
    training: TrainingConfig,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            bind_address: toml_config.server.bind_address,
            port: toml_config.server.port,
            checkpoint_path: toml_config.model.checkpoint_path,
            training: toml_config.training,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn checkpoint_path_raw(&self) -> &str {
        &self.checkpoint_path
    }

    /// Checkpoint location with relative paths anchored at the crate directory
    pub fn checkpoint_path(&self) -> PathBuf {
        resolve_checkpoint_path(&self.checkpoint_path)
    }

    pub fn training_samples(&self) -> usize {
        self.training.samples
    }

    pub fn training_epochs(&self) -> usize {
        self.training.epochs
    }

    pub fn training_batch_size(&self) -> usize {
        self.training.batch_size
    }

    pub fn training_learning_rate(&self) -> f32 {
        self.training.learning_rate
    }

    pub fn training_train_fraction(&self) -> f64 {
        self.training.train_fraction
    }

    pub fn training_lr_step_size(&self) -> usize {
        self.training.lr_step_size
    }

    pub fn training_lr_gamma(&self) -> f32 {
        self.training.lr_gamma
    }

    pub fn training_seed(&self) -> u64 {
        self.training.seed
    }

    pub fn training_log_every(&self) -> usize {
        self.training.log_every
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_checkpoint_path(mut self, path: impl Into<String>) -> Self {
        self.checkpoint_path = path.into();
        self
    }
}

/// Anchor a relative checkpoint path at `CARGO_MANIFEST_DIR`
pub fn resolve_checkpoint_path(path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join(path)
    }
}
