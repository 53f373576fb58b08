use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// When dependencies outside the registry are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalPolicy {
    /// Every external name in the closure must resolve before any module code runs
    #[serde(rename = "eager")]
    Eager,
    /// Externals are resolved when linking or evaluation first reaches them
    #[serde(rename = "lazy")]
    Lazy,
}

impl Default for ExternalPolicy {
    fn default() -> Self {
        ExternalPolicy::Eager
    }
}

/// Options that control linking and result normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderOptions {
    /// External resolution policy (default: eager)
    #[serde(default)]
    pub external_policy: ExternalPolicy,

    /// Wrap a declarative module that never exported anything as a default export (default: true)
    #[serde(default = "default_true")]
    pub wrap_empty_exports: bool,

    /// Reject module names containing whitespace or control characters (default: true)
    #[serde(default = "default_true")]
    pub strict_names: bool,

    /// Maximum number of factory bodies running inside one another through
    /// `require` (default: 128)
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> usize {
    128
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            external_policy: ExternalPolicy::Eager,
            wrap_empty_exports: true,
            strict_names: true,
            max_depth: default_max_depth(),
        }
    }
}

/// Main loader configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderConfig {
    #[serde(default)]
    pub loader_options: LoaderOptions,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl LoaderConfig {
    /// Load configuration from a YAML (`.yaml`/`.yml`) or JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Write the default configuration as YAML
    pub fn init_file(path: &Path) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(&LoaderConfig::default())?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}
