//! Parser configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.

use crate::query::DEFAULT_PERCENTS;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ParserConfig {
    /// Percents assumed for percentiles metrics that declare none
    #[serde(default = "default_percents")]
    pub default_percents: Vec<f64>,

    /// Evaluate bucket_script expressions locally; when disabled, or when an
    /// expression cannot be evaluated, the backend's own value is used
    #[serde(default = "default_true")]
    pub evaluate_scripts: bool,

    #[serde(default)]
    pub parallel: ParallelConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_percents() -> Vec<f64> {
    DEFAULT_PERCENTS.to_vec()
}

fn default_true() -> bool {
    true
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            default_percents: default_percents(),
            evaluate_scripts: true,
            parallel: ParallelConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Concurrency across refIDs
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ParallelConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Smallest batch worth spreading over blocking tasks
    #[serde(default = "default_min_queries")]
    pub min_queries: usize,
}

fn default_min_queries() -> usize {
    4
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_queries: default_min_queries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    /// "text" or "json"
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

impl ParserConfig {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ParserConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from file path if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(p) = self
            .default_percents
            .iter()
            .find(|p| !p.is_finite() || **p < 0.0 || **p > 100.0)
        {
            return Err(anyhow!("default_percents entry {} is outside 0..=100", p));
        }
        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => return Err(anyhow!("unknown logging format: {}", other)),
        }
        Ok(())
    }
}
