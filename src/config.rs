//! Configuration loading for Reverie.
//!
//! Configuration is loaded from TOML files with environment variable
//! overrides. It supplies CLI defaults only; the 1024-step optimization
//! budget is a crate constant, not configuration.

use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "config.default.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReverieConfig {
    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_directory")]
    pub directory: String,

    #[serde(default)]
    pub save_meta: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            save_meta: false,
        }
    }
}

fn default_directory() -> String {
    "output".to_string()
}

/// Default render settings; each is overridable per invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    /// Output side length. Must be a multiple of 128 in [128, 1024].
    #[serde(default = "default_size")]
    pub size: usize,

    #[serde(default = "default_use_transforms")]
    pub use_transforms: bool,

    #[serde(default = "default_transform_min")]
    pub transform_min: f32,

    #[serde(default = "default_transform_max")]
    pub transform_max: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            size: default_size(),
            use_transforms: default_use_transforms(),
            transform_min: default_transform_min(),
            transform_max: default_transform_max(),
        }
    }
}

fn default_size() -> usize {
    128
}

fn default_use_transforms() -> bool {
    true
}

fn default_transform_min() -> f32 {
    0.3
}

fn default_transform_max() -> f32 {
    0.7
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Seed for the built-in feature bank's weights.
    #[serde(default = "default_model_seed")]
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            seed: default_model_seed(),
        }
    }
}

fn default_model_seed() -> u64 {
    2019
}

impl ReverieConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false))
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("REVERIE").separator("_"))
            .build()?;

        let reverie_config: ReverieConfig = config.try_deserialize().unwrap_or_default();
        Ok(reverie_config)
    }
}
