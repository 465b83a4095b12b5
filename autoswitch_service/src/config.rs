//! Service configuration.
//!
//! Settings come from an optional TOML file, then from the environment
//! (a `.env` file in the working directory is loaded first), then from
//! defaults for anything left unset. All durations are milliseconds.
//!
//! ```toml
//! [endpoint]
//! base_url = "https://banjir.example.org/api"
//! api_token = "..."
//!
//! [autoswitch]
//! interval = 5000
//! fetch_interval = 10000
//! auto_resume_delay = 5000
//! is_auto_switch_on = true
//!
//! [logging]
//! level = "info"
//! file = "autoswitch.log"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::logging::LogLevel;
use crate::retry::RetryPolicy;

pub const ENV_ENDPOINT: &str = "DEVICES_ENDPOINT";
pub const ENV_API_TOKEN: &str = "DEVICES_API_TOKEN";
pub const ENV_REFRESH_MS: &str = "DEVICES_REFRESH_MS";
pub const ENV_REFRESH_ENABLED: &str = "DEVICES_REFRESH_ENABLED";
pub const ENV_LOG_LEVEL: &str = "AUTOSWITCH_LOG_LEVEL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub endpoint: EndpointConfig,
    pub autoswitch: AutoSwitchConfig,
    pub logging: LoggingConfig,
}

/// Where the device listing lives.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    pub path: String,
    pub api_token: Option<String>,
    pub timeout_secs: u64,
}

/// Timing of the cycle scheduler and the device fetcher.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AutoSwitchConfig {
    /// Tick period.
    pub interval: u64,
    /// Background refresh period of the device list.
    #[serde(alias = "fetchInterval")]
    pub fetch_interval: u64,
    /// Quiet period after a map interaction before cycling resumes.
    #[serde(alias = "autoResumeDelay")]
    pub auto_resume_delay: u64,
    /// Initial value of the externally driven on/off switch.
    #[serde(alias = "isAutoSwitchOn")]
    pub is_auto_switch_on: bool,
    pub refresh_enabled: bool,
    /// Settling window for external on/off flips.
    pub sync_debounce: u64,
    /// Delay before the single retry of a failed focus call.
    pub adapter_retry_delay: u64,
    /// Delay before restarting after the map reported it was not ready.
    pub map_not_ready_retry_delay: u64,
    pub fetch_max_retries: u32,
    pub fetch_backoff_step: u64,
    /// Age of the last successful fetch after which the list counts as stale.
    pub stale_after: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub file: Option<String>,
    pub timestamps: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            path: "devices".to_string(),
            api_token: None,
            timeout_secs: 30,
        }
    }
}

impl Default for AutoSwitchConfig {
    fn default() -> Self {
        Self {
            interval: 5000,
            fetch_interval: 10_000,
            auto_resume_delay: 5000,
            is_auto_switch_on: false,
            refresh_enabled: true,
            sync_debounce: 100,
            adapter_retry_delay: 1000,
            map_not_ready_retry_delay: 2000,
            fetch_max_retries: 3,
            fetch_backoff_step: 2000,
            stale_after: 60_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
            timestamps: true,
        }
    }
}

impl AutoSwitchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_millis(self.fetch_interval)
    }

    pub fn auto_resume_delay(&self) -> Duration {
        Duration::from_millis(self.auto_resume_delay)
    }

    pub fn sync_debounce(&self) -> Duration {
        Duration::from_millis(self.sync_debounce)
    }

    pub fn adapter_retry_delay(&self) -> Duration {
        Duration::from_millis(self.adapter_retry_delay)
    }

    pub fn map_not_ready_retry_delay(&self) -> Duration {
        Duration::from_millis(self.map_not_ready_retry_delay)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.fetch_max_retries,
            Duration::from_millis(self.fetch_backoff_step),
        )
    }

    /// Rejects values that would make a timer spin.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("interval", self.interval),
            ("fetch_interval", self.fetch_interval),
            ("auto_resume_delay", self.auto_resume_delay),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be greater than 0", name)));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl ServiceConfig {
    /// Loads configuration from `path` (if given) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.autoswitch.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup(ENV_ENDPOINT) {
            self.endpoint.base_url = url;
        }
        if let Some(token) = lookup(ENV_API_TOKEN) {
            self.endpoint.api_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(ms) = lookup(ENV_REFRESH_MS) {
            self.autoswitch.fetch_interval = ms.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{} must be milliseconds, got '{}'", ENV_REFRESH_MS, ms))
            })?;
        }
        if let Some(flag) = lookup(ENV_REFRESH_ENABLED) {
            self.autoswitch.refresh_enabled = match flag.trim() {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "{} must be true or false, got '{}'",
                        ENV_REFRESH_ENABLED, other
                    )));
                }
            };
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level.parse().map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
