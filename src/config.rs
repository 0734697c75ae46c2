use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::flow::{ClassificationOptions, LayoutOptions};

pub const CONFIG_FILE_NAME: &str = "sqlflow.yaml";

/// Tool configuration, read from `sqlflow.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlFlowConfig {
    /// sqlparser dialect name used by the local parser
    pub dialect: String,

    pub remote: RemoteConfig,

    /// Role heuristics
    pub classification: ClassificationOptions,

    pub layout: LayoutOptions,
}

/// Optional remote parse service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub enabled: bool,
    pub endpoint: String,
    /// Upper bound on one remote call before falling back
    pub timeout_ms: u64,
}

fn default_dialect() -> String {
    "generic".to_string()
}

impl Default for SqlFlowConfig {
    fn default() -> Self {
        Self {
            dialect: default_dialect(),
            remote: RemoteConfig::default(),
            classification: ClassificationOptions::default(),
            layout: LayoutOptions::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:8080/api/parse".to_string(),
            timeout_ms: 2000,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub fn parse_config(yaml: &str) -> Result<SqlFlowConfig> {
    // An empty document deserializes to unit, not to a mapping
    if yaml.trim().is_empty() {
        return Ok(SqlFlowConfig::default());
    }
    serde_yaml::from_str(yaml).context("Invalid configuration")
}

fn load(path: &Path) -> Result<SqlFlowConfig> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
    parse_config(&yaml).with_context(|| format!("In {}", path.display()))
}

/// Reads the configuration from `config_path`, or from `sqlflow.yaml` in the
/// current directory. An explicit path must exist; a missing default file
/// yields the defaults.
pub fn read_config(config_path: Option<PathBuf>) -> Result<SqlFlowConfig> {
    match config_path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Configuration file not found at: {}", path.display());
            }
            load(&path)
        }
        None => {
            let current_dir = std::env::current_dir()?;
            let path = current_dir.join(CONFIG_FILE_NAME);
            if path.exists() {
                load(&path)
            } else {
                Ok(SqlFlowConfig::default())
            }
        }
    }
}
