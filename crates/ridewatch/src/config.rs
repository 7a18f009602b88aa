//! Configuration management for ridewatch.
//!
//! Configuration loads through figment: defaults, then the TOML file,
//! then `RIDEWATCH_`-prefixed environment variables.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "ridewatch";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "incidents.db";

/// Application configuration.
///
/// Loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `RIDEWATCH_`)
/// 2. TOML config file at `~/.config/ridewatch/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Location watcher configuration.
    pub watcher: WatcherConfig,
    /// Zone catalog configuration.
    pub zones: ZonesConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Incident housekeeping configuration.
    pub incidents: IncidentConfig,
}

/// Location watcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Timeout for a one-shot position fix, in milliseconds.
    pub fix_timeout_ms: u64,
}

/// Zone catalog configuration.
///
/// Exactly one of `source_url` / `source_path` is normally set; with
/// neither, the monitor runs unconstrained (every point counts as
/// inside) until a catalog is installed some other way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZonesConfig {
    /// HTTP endpoint serving the allowed-zones document.
    pub source_url: Option<String>,
    /// Local file holding the allowed-zones document.
    pub source_path: Option<PathBuf>,
    /// Seconds between catalog refreshes.
    pub refresh_interval_secs: u64,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the incident database.
    /// Defaults to `~/.local/share/ridewatch/incidents.db`
    pub database_path: Option<PathBuf>,
}

/// Incident housekeeping configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentConfig {
    /// Age in hours after which an open incident counts as stale for the
    /// administrative sweep.
    pub stale_after_hours: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            fix_timeout_ms: 10_000,
        }
    }
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            stale_after_hours: 24,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed("RIDEWATCH_").split("_"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.watcher.fix_timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "fix_timeout_ms must be greater than 0".to_string(),
            });
        }

        if self.zones.refresh_interval_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "refresh_interval_secs must be greater than 0".to_string(),
            });
        }

        if self.zones.source_url.is_some() && self.zones.source_path.is_some() {
            return Err(Error::ConfigValidation {
                message: "set at most one of zones.source_url and zones.source_path".to_string(),
            });
        }

        if self.incidents.stale_after_hours == 0 {
            return Err(Error::ConfigValidation {
                message: "stale_after_hours must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the fix timeout as a Duration.
    #[must_use]
    pub fn fix_timeout(&self) -> Duration {
        Duration::from_millis(self.watcher.fix_timeout_ms)
    }

    /// Get the catalog refresh interval as a Duration.
    #[must_use]
    pub fn zone_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.zones.refresh_interval_secs)
    }

    /// Get the stale-incident cutoff age as a chrono Duration.
    #[must_use]
    pub fn stale_age(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.incidents.stale_after_hours))
    }
}

impl Default for ZonesConfig {
    fn default() -> Self {
        Self {
            source_url: None,
            source_path: None,
            refresh_interval_secs: 300,
        }
    }
}
