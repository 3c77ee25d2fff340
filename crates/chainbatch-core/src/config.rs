//! Processor configuration, environment overlay and fluent builder.
//!
//! # Example
//!
//! ```rust
//! use chainbatch_core::config::ProcessorBuilder;
//!
//! let config = ProcessorBuilder::new()
//!     .max_retries(10)
//!     .retry_delay_ms(60_000)
//!     .prometheus_port(9090)
//!     .build_config();
//! assert_eq!(config.max_retries, 10);
//! ```

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Configuration for a processor instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Failed passes tolerated before giving up.
    pub max_retries: u32,
    /// Fixed pause between a failed pass and the next one (milliseconds).
    pub retry_delay_ms: u64,
    /// Minimum age of the cached finalized height before it is re-fetched (milliseconds).
    pub height_refresh_interval_ms: u64,
    /// Debounce window for status lines (milliseconds).
    pub status_interval_ms: u64,
    /// Serve Prometheus metrics on this port when set.
    pub prometheus_port: Option<u16>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_retries: 100,
            retry_delay_ms: 3_600_000,
            height_refresh_interval_ms: 30_000,
            status_interval_ms: 5_000,
            prometheus_port: None,
        }
    }
}

impl ProcessorConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn height_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.height_refresh_interval_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    /// Defaults overlaid with `PROCESSOR_*` / `PROMETHEUS_PORT` environment variables.
    pub fn from_env() -> Result<Self, IndexerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IndexerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, "PROCESSOR_MAX_RETRIES")? {
            config.max_retries = v;
        }
        if let Some(v) = parse_var(&lookup, "PROCESSOR_RETRY_DELAY_MS")? {
            config.retry_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "PROCESSOR_HEIGHT_REFRESH_MS")? {
            config.height_refresh_interval_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "PROCESSOR_STATUS_INTERVAL_MS")? {
            config.status_interval_ms = v;
        }
        // The processor-specific variable wins over the generic one.
        config.prometheus_port = match parse_var(&lookup, "PROCESSOR_PROMETHEUS_PORT")? {
            Some(port) => Some(port),
            None => parse_var(&lookup, "PROMETHEUS_PORT")?,
        };
        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, IndexerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| IndexerError::Config(format!("{key}={raw:?}: {e}"))),
    }
}

/// Fluent builder for `ProcessorConfig`.
#[derive(Default)]
pub struct ProcessorBuilder {
    config: ProcessorConfig,
}

impl ProcessorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration (e.g. [`ProcessorConfig::from_env`]).
    pub fn from_config(config: ProcessorConfig) -> Self {
        Self { config }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn height_refresh_interval_ms(mut self, ms: u64) -> Self {
        self.config.height_refresh_interval_ms = ms;
        self
    }

    pub fn status_interval_ms(mut self, ms: u64) -> Self {
        self.config.status_interval_ms = ms;
        self
    }

    pub fn prometheus_port(mut self, port: u16) -> Self {
        self.config.prometheus_port = Some(port);
        self
    }

    pub fn build_config(self) -> ProcessorConfig {
        self.config
    }
}
