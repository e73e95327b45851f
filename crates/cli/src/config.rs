//! Process configuration, loaded from a YAML file.
//!
//! Every field has a default, so an empty file (or no file at all) gives a
//! single-process scheduler on in-memory stores.

use std::path::Path;

use anyhow::Context;
use engine::SchedulerConfig;
use executor::WorkerConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Address the HTTP API listens on.
    pub bind: String,
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub executor: WorkerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            store: StoreConfig::default(),
            scheduler: SchedulerConfig::default(),
            executor: WorkerConfig::default(),
        }
    }
}

/// Store backend selection; `config` is handed to the backend's factory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: String,
    pub config: serde_json::Value,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: "memory".to_string(),
            config: serde_json::Value::Null,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        // serde_yaml rejects an empty document; treat it as all defaults.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}
