//! Hardware configuration for the `hwcomms` CLI.
//!
//! A config file lists the instruments on the bench:
//!
//! ```toml
//! [[devices]]
//! id = "osa"
//! driver = "yokogawa_osa"
//! [devices.config]
//! resource = "TCPIP0::192.168.1.20::10001::SOCKET"
//!
//! [[devices]]
//! id = "delay_stage"
//! driver = "kinesis_motor"
//! [devices.config]
//! serial_number = "27000001"
//! counts_per_m = 34304000.0
//! travel_limits = [0.0, 0.025]
//! ```
//!
//! The file is loaded with Figment and merged with `HWCOMMS_`-prefixed
//! environment variables (nested keys use `__`). The `config` table is
//! handed unchanged to the driver factory named by `driver`.

use anyhow::{anyhow, Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "HWCOMMS_";

/// Error types for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// File not found
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Two entries share an id
    #[error("Duplicate device id: {0}")]
    DuplicateId(String),

    /// Entry with an empty id
    #[error("Device entry {0} has an empty id")]
    EmptyId(usize),
}

/// Top-level config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareConfig {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

/// One configured instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Name used on the command line
    pub id: String,

    /// Factory driver type (e.g. "yokogawa_osa", "kinesis_motor")
    pub driver: String,

    /// Driver-specific settings
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl HardwareConfig {
    /// Load `path` and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.display().to_string()).into());
        }

        debug!("Loading hardware config from: {}", path.display());
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(figment)
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    /// Parse a config from TOML text, without environment overrides.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Self::extract(Figment::new().merge(Toml::string(content)))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .context("Failed to extract configuration from Figment")?;
        config.check()?;
        info!(devices = config.devices.len(), "Loaded hardware config");
        Ok(config)
    }

    /// Reject empty and duplicate ids.
    pub fn check(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (index, entry) in self.devices.iter().enumerate() {
            if entry.id.trim().is_empty() {
                return Err(ConfigLoadError::EmptyId(index).into());
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigLoadError::DuplicateId(entry.id.clone()).into());
            }
        }
        Ok(())
    }

    /// Look up an entry by id.
    pub fn device(&self, id: &str) -> Result<&DeviceEntry> {
        self.devices.iter().find(|d| d.id == id).ok_or_else(|| {
            let known: Vec<&str> = self.devices.iter().map(|d| d.id.as_str()).collect();
            anyhow!("No device '{}' in config (known: {})", id, known.join(", "))
        })
    }
}

impl DeviceEntry {
    /// The entry with simulated hardware swapped in.
    ///
    /// Kinesis motors become mock stages with the same travel limits and the
    /// Yokogawa OSA answers from its built-in simulator. Other drivers are
    /// already simulated or have no stand-in and are returned unchanged.
    pub fn simulated(&self) -> DeviceEntry {
        match self.driver.as_str() {
            "kinesis_motor" => {
                let mut table = toml::map::Map::new();
                if let Some(limits) = self.config.get("travel_limits") {
                    table.insert("travel_limits".into(), limits.clone());
                }
                DeviceEntry {
                    id: self.id.clone(),
                    driver: "mock_stage".into(),
                    config: toml::Value::Table(table),
                }
            }
            "yokogawa_osa" => {
                let mut config = self.config.clone();
                if let toml::Value::Table(table) = &mut config {
                    table.insert("mock".into(), toml::Value::Boolean(true));
                }
                DeviceEntry {
                    id: self.id.clone(),
                    driver: self.driver.clone(),
                    config,
                }
            }
            _ => self.clone(),
        }
    }
}
