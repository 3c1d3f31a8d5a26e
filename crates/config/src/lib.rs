//! Configuration management for the wks stream-processing runtime
//!
//! A [`StreamsConfig`] is assembled once, before the runtime is created, from
//! built-in defaults, an optional YAML file and `WKS_`-prefixed environment
//! variables. Nested keys use `__` as separator, so `WKS_KAFKA__BROKERS`
//! overrides `kafka.brokers`.

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "WKS_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamsConfig {
    /// Application identifier, also the default consumer group
    pub application_id: String,

    /// Log system client settings
    pub kafka: KafkaConfig,

    /// Task loop settings
    pub runtime: RuntimeConfig,
}

impl StreamsConfig {
    /// Create a configuration with defaults for the given application
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            ..Self::default()
        }
    }

    /// Load configuration from an optional file and the environment
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let config: Self = Self::figment(config_path)
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Provider chain used by [`StreamsConfig::load`]
    pub fn figment(config_path: Option<PathBuf>) -> Figment {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Consumer group id, falling back to the application id
    pub fn group_id(&self) -> &str {
        self.kafka
            .group_id
            .as_deref()
            .unwrap_or(&self.application_id)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.application_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "application_id must not be empty".to_string(),
            ));
        }

        if self.kafka.brokers.trim().is_empty() {
            return Err(ConfigError::Validation(
                "kafka.brokers must not be empty".to_string(),
            ));
        }

        self.runtime.validate()
    }
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            application_id: "wks-application".to_string(),
            kafka: KafkaConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Where a consumer group without committed offsets starts reading
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// Log system client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers
    pub brokers: String,

    /// Consumer group; defaults to the application id
    pub group_id: Option<String>,

    /// Client id reported to the brokers
    pub client_id: String,

    /// Offset reset policy for partitions without a committed offset
    pub auto_offset_reset: OffsetReset,

    /// Raw client properties passed through untouched
    pub extra: HashMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: None,
            client_id: "wks-streams".to_string(),
            auto_offset_reset: OffsetReset::Earliest,
            extra: HashMap::new(),
        }
    }
}

/// Task loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of tasks started by the runtime
    pub num_tasks: usize,

    /// Upper bound on a single poll
    pub poll_timeout_ms: u64,

    /// Maximum records returned by one poll
    pub max_poll_records: usize,

    /// Minimum time between commits; 0 commits after every batch
    pub commit_interval_ms: u64,

    /// Initial backoff after a transient poll failure
    pub poll_backoff_ms: u64,

    /// Ceiling for the poll backoff
    pub poll_max_backoff_ms: u64,

    /// Commit attempts before the task gives up
    pub commit_max_retries: u32,

    /// Initial backoff between commit attempts
    pub commit_backoff_ms: u64,

    /// Retries for a single sink write
    pub sink_max_retries: u32,

    /// Initial backoff between sink write attempts
    pub sink_backoff_ms: u64,

    /// Upper bound for flushing the output client on close
    pub flush_timeout_ms: u64,
}

impl RuntimeConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_tasks == 0 {
            return Err(ConfigError::Validation(
                "runtime.num_tasks must be at least 1".to_string(),
            ));
        }

        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "runtime.poll_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.max_poll_records == 0 {
            return Err(ConfigError::Validation(
                "runtime.max_poll_records must be greater than 0".to_string(),
            ));
        }

        if self.poll_max_backoff_ms < self.poll_backoff_ms {
            return Err(ConfigError::Validation(format!(
                "runtime.poll_max_backoff_ms ({}) is below runtime.poll_backoff_ms ({})",
                self.poll_max_backoff_ms, self.poll_backoff_ms
            )));
        }

        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_tasks: 1,
            poll_timeout_ms: 100,
            max_poll_records: 500,
            commit_interval_ms: 0,
            poll_backoff_ms: 100,
            poll_max_backoff_ms: 10_000,
            commit_max_retries: 10,
            commit_backoff_ms: 100,
            sink_max_retries: 5,
            sink_backoff_ms: 100,
            flush_timeout_ms: 30_000,
        }
    }
}
