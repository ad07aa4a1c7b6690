//! Daemon configuration file.
//!
//! ```json
//! {
//!   "listen": "127.0.0.1:7070",
//!   "timing": { "strategy": "coarse", "tick_hz": 250 },
//!   "lines": [
//!     { "name": "led0", "frequency": 4, "on_cycles": 1, "off_cycles": 3, "enabled": true },
//!     { "name": "relay", "driver": { "kind": "value_file", "path": "/sys/class/gpio/gpio17/value" } }
//!   ]
//! }
//! ```

use crate::controller::LineError;
use crate::driver::{DriverError, LineDriver, ValueFileDriver, VirtualLineDriver};
use crate::registry::Registry;
use crate::timing::{TimingConfig, MAX_TICK_HZ};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7070";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriverConfig {
    #[default]
    Virtual,
    ValueFile {
        path: PathBuf,
        #[serde(default)]
        active_low: bool,
    },
}

impl DriverConfig {
    /// # Errors
    ///
    /// Returns [`DriverError`] if the underlying pin cannot be opened.
    pub fn acquire(&self, name: &str) -> Result<Box<dyn LineDriver>, DriverError> {
        match self {
            DriverConfig::Virtual => Ok(Box::new(VirtualLineDriver::new(name))),
            DriverConfig::ValueFile { path, active_low } => {
                Ok(Box::new(ValueFileDriver::open(path, *active_low)?))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineConfig {
    pub name: String,
    #[serde(default)]
    pub driver: DriverConfig,
    pub frequency: Option<u32>,
    pub on_cycles: Option<u32>,
    pub off_cycles: Option<u32>,
    pub enabled: Option<bool>,
}

impl LineConfig {
    pub fn virtual_line(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: DriverConfig::Virtual,
            frequency: None,
            on_cycles: None,
            off_cycles: None,
            enabled: None,
        }
    }

    /// Bind the line and apply its initial settings, enabling last.
    ///
    /// # Errors
    ///
    /// Returns [`LineError`] if the line cannot be bound.
    pub fn bind(&self, registry: &Registry) -> Result<(), LineError> {
        let line = registry.bind(&self.name, || self.driver.acquire(&self.name))?;

        if let Some(on_cycles) = self.on_cycles {
            line.set_on_cycles(on_cycles)?;
        }
        if let Some(off_cycles) = self.off_cycles {
            line.set_off_cycles(off_cycles)?;
        }
        if let Some(frequency) = self.frequency {
            line.set_frequency(frequency)?;
        }
        if let Some(enabled) = self.enabled {
            line.set_enabled(enabled)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub lines: Vec<LineConfig>,
}

fn default_listen() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            timing: TimingConfig::default(),
            lines: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text cannot be parsed or validated.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: DaemonConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a tick rate outside
    /// `1..=MAX_TICK_HZ` or empty or duplicate line names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timing.tick_hz == 0 || self.timing.tick_hz > MAX_TICK_HZ {
            return Err(ConfigError::Invalid(format!(
                "timing.tick_hz must be between 1 and {}, got {}",
                MAX_TICK_HZ, self.timing.tick_hz
            )));
        }

        let mut seen = BTreeSet::new();
        for line in &self.lines {
            if line.name.is_empty() {
                return Err(ConfigError::Invalid("line names must not be empty".into()));
            }
            if !seen.insert(line.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate line name '{}'", line.name)));
            }
        }
        Ok(())
    }

    /// Bind every configured line.
    ///
    /// # Errors
    ///
    /// Stops at the first line that fails to bind.
    pub fn bind_lines(&self, registry: &Registry) -> Result<(), LineError> {
        self.lines.iter().try_for_each(|line| line.bind(registry))
    }
}
