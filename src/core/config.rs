use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::sensors::history::DEFAULT_HISTORY_SIZE;
use crate::core::sensors::units::TemperatureUnit;

/// Refresh intervals offered to the user, in seconds.
pub const REFRESH_INTERVAL_CHOICES: [u64; 5] = [1, 2, 5, 10, 30];

pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub refresh_interval_ms: u64,
    pub temperature_unit: TemperatureUnit,
    pub history_capacity: usize,
    pub command_timeout_secs: u64,
    /// Provider names that are never started
    pub disabled_providers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            temperature_unit: TemperatureUnit::Celsius,
            history_capacity: DEFAULT_HISTORY_SIZE,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            disabled_providers: Vec::new(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Read a config file. A missing, empty or unreadable file yields the
    /// defaults so a bad edit never blocks the monitor.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        if data.trim().is_empty() {
            return Ok(Config::default());
        }

        let mut config: Config = match serde_json::from_str(&data) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Ignoring invalid config file {:?}: {}", path, e);
                return Ok(Config::default());
            }
        };

        if !Self::is_allowed_interval(config.refresh_interval_ms) {
            log::warn!(
                "Unsupported refresh interval {}ms, using {}ms",
                config.refresh_interval_ms,
                DEFAULT_REFRESH_INTERVAL_MS
            );
            config.refresh_interval_ms = DEFAULT_REFRESH_INTERVAL_MS;
        }
        config.history_capacity = config.history_capacity.max(1);

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let data = serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        fs::write(path, data).with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().with_context(|| "Could not determine config directory")?;

        Ok(config_dir.join("hwsense").join("config.json"))
    }

    fn is_allowed_interval(ms: u64) -> bool {
        REFRESH_INTERVAL_CHOICES.iter().any(|secs| secs * 1000 == ms)
    }

    /// Set the refresh interval in whole seconds.
    pub fn set_refresh_interval(&mut self, secs: u64) -> Result<()> {
        if !REFRESH_INTERVAL_CHOICES.contains(&secs) {
            bail!(
                "Refresh interval must be one of {:?} seconds, got {}",
                REFRESH_INTERVAL_CHOICES,
                secs
            );
        }
        self.refresh_interval_ms = secs * 1000;
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    pub fn set_provider_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let present = self.disabled_providers.iter().any(|p| p == name);
        match (enabled, present) {
            (true, true) => {
                self.disabled_providers.retain(|p| p != name);
                true
            }
            (false, false) => {
                self.disabled_providers.push(name.to_string());
                true
            }
            _ => false,
        }
    }
}
