//! Configuration loading

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use wirewatch_monitor::MonitorConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Device list standing in for the adapter, re-read on every poll
    #[serde(default = "default_fixture_path")]
    pub fixture: PathBuf,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            fixture: default_fixture_path(),
        }
    }
}

fn default_fixture_path() -> PathBuf {
    PathBuf::from("./bus.toml")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Path to the XML topology document
    #[serde(default = "default_topology_path")]
    pub path: PathBuf,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            path: default_topology_path(),
        }
    }
}

fn default_topology_path() -> PathBuf {
    PathBuf::from("./topology.xml")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load configuration from file, falling back to defaults when it is absent
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
