//! Typed configuration from environment variables or a TOML file.
//!
//! Loads once at startup and fails fast on unparseable values.

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Pool sizing and timing, as read from config sources.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    pub processes: usize,
    pub poll_interval_ms: u64,
    pub bonus_rounds: usize,
    pub max_retry: u32,
    pub signal_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            processes: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            poll_interval_ms: 1000,
            bonus_rounds: 2,
            max_retry: 2,
            signal_timeout_ms: 1000,
        }
    }
}

impl PoolSettings {
    pub fn validate(&self) -> Result<()> {
        if self.processes == 0 {
            return Err(Error::Config("processes must be at least 1".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".to_string()));
        }
        if self.signal_timeout_ms == 0 {
            return Err(Error::Config("signal_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub pool: PoolSettings,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

/// On-disk TOML layout.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    pool: PoolSettings,
    otel_endpoint: Option<String>,
    log_level: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to defaults. In local dev, call
    /// `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = PoolSettings::default();
        let pool = PoolSettings {
            processes: parsed_var("WORKQ_PROCESSES")?.unwrap_or(defaults.processes),
            poll_interval_ms: parsed_var("WORKQ_POLL_INTERVAL_MS")?
                .unwrap_or(defaults.poll_interval_ms),
            bonus_rounds: parsed_var("WORKQ_BONUS_ROUNDS")?.unwrap_or(defaults.bonus_rounds),
            max_retry: parsed_var("WORKQ_MAX_RETRY")?.unwrap_or(defaults.max_retry),
            signal_timeout_ms: parsed_var("WORKQ_SIGNAL_TIMEOUT_MS")?
                .unwrap_or(defaults.signal_timeout_ms),
        };
        pool.validate()?;

        Ok(Self {
            pool,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Parse a TOML document with an optional `[pool]` table.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("bad config: {e}")))?;
        file.pool.validate()?;

        Ok(Self {
            pool: file.pool,
            otel_endpoint: file.otel_endpoint,
            log_level: file.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(None),
    }
}
