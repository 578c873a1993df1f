// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod plugin;
pub mod tasks;

use crate::errors::ConfigError;
use crate::retry::BackoffPolicy;
use serde::{Deserialize, Deserializer};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use plugin::{parse_duration, PluginConfig};
pub use tasks::{DeliveryOverrides, TasksDefinition};

pub const DEFAULT_TASK_CONFIG_PATH: &str = "/etc/node_agent/tasks.json";
pub const DEFAULT_API_PORT: u16 = 7000;
pub const DEFAULT_QUEUE_SIZE: usize = 100;
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(1);

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Agent-wide settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Path of the task configuration file
    #[serde(rename = "TaskConfiguration")]
    pub task_config_path: PathBuf,
    /// Port of the report endpoint
    #[serde(rename = "APIServerPort")]
    pub api_port: u16,
    /// Batches buffered per publisher before the oldest is evicted
    #[serde(rename = "PublisherQueueSize")]
    pub publisher_queue_size: usize,
    /// Batches combined into one publish call
    #[serde(rename = "PublisherBatchSize")]
    pub publisher_batch_size: usize,
    /// Total retry budget of one publish call
    #[serde(rename = "PublisherTimeOut", deserialize_with = "duration_str")]
    pub publisher_timeout: Duration,
    #[serde(rename = "PublisherInitialInterval", deserialize_with = "duration_str")]
    pub publisher_initial_interval: Duration,
    #[serde(rename = "PublisherMaxInterval", deserialize_with = "duration_str")]
    pub publisher_max_interval: Duration,
    /// Wait between drain attempts on an empty queue
    #[serde(rename = "PublisherIdleInterval", deserialize_with = "duration_str")]
    pub publisher_idle_interval: Duration,
    /// Log level (e.g., trace, debug, info, warn, error)
    #[serde(rename = "LogLevel")]
    pub log_level: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        let backoff = BackoffPolicy::default();
        Self {
            task_config_path: PathBuf::from(DEFAULT_TASK_CONFIG_PATH),
            api_port: DEFAULT_API_PORT,
            publisher_queue_size: DEFAULT_QUEUE_SIZE,
            publisher_batch_size: DEFAULT_BATCH_SIZE,
            publisher_timeout: backoff.max_elapsed_time,
            publisher_initial_interval: backoff.initial_interval,
            publisher_max_interval: backoff.max_interval,
            publisher_idle_interval: DEFAULT_IDLE_INTERVAL,
            log_level: "info".to_string(),
        }
    }
}

fn duration_str<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_duration(&value).map_err(serde::de::Error::custom)
}

impl AgentSettings {
    /// Loads settings from an optional JSON file, then applies `NODE_AGENT_*`
    /// environment overrides and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let settings = settings.with_env_overrides(|key| env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Create settings from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Applies overrides from `lookup`, which maps variable names to values
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("NODE_AGENT_TASK_CONFIG") {
            self.task_config_path = PathBuf::from(path);
        }
        if let Some(port) = lookup("NODE_AGENT_API_PORT") {
            self.api_port = parse_number("NODE_AGENT_API_PORT", &port)?;
        }
        if let Some(size) = lookup("NODE_AGENT_PUBLISHER_QUEUE_SIZE") {
            self.publisher_queue_size = parse_number("NODE_AGENT_PUBLISHER_QUEUE_SIZE", &size)?;
        }
        if let Some(size) = lookup("NODE_AGENT_PUBLISHER_BATCH_SIZE") {
            self.publisher_batch_size = parse_number("NODE_AGENT_PUBLISHER_BATCH_SIZE", &size)?;
        }
        if let Some(timeout) = lookup("NODE_AGENT_PUBLISHER_TIMEOUT") {
            self.publisher_timeout = parse_duration(&timeout)?;
        }
        if let Some(interval) = lookup("NODE_AGENT_PUBLISHER_INITIAL_INTERVAL") {
            self.publisher_initial_interval = parse_duration(&interval)?;
        }
        if let Some(interval) = lookup("NODE_AGENT_PUBLISHER_MAX_INTERVAL") {
            self.publisher_max_interval = parse_duration(&interval)?;
        }
        if let Some(level) = lookup("NODE_AGENT_LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
        Ok(self)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_port == 0 {
            return Err(ConfigError::Invalid(
                "API server port must be greater than 0".to_string(),
            ));
        }

        if self.publisher_queue_size == 0 {
            return Err(ConfigError::Invalid(
                "Publisher queue size must be greater than 0".to_string(),
            ));
        }

        check_backoff_intervals(self.publisher_initial_interval, self.publisher_max_interval)?;

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Delivery settings for one publish target, agent defaults first
    pub fn delivery(
        &self,
        overrides: Option<&DeliveryOverrides>,
    ) -> Result<DeliveryConfig, ConfigError> {
        let mut delivery = DeliveryConfig {
            queue_size: self.publisher_queue_size,
            batch_size: self.publisher_batch_size.max(1),
            backoff: BackoffPolicy {
                initial_interval: self.publisher_initial_interval,
                max_interval: self.publisher_max_interval,
                max_elapsed_time: self.publisher_timeout,
                ..BackoffPolicy::default()
            },
            idle_interval: self.publisher_idle_interval,
        };

        let Some(overrides) = overrides else {
            return Ok(delivery);
        };

        if let Some(queue_size) = overrides.queue_size {
            if queue_size == 0 {
                return Err(ConfigError::Invalid(
                    "queueSize must be greater than 0".to_string(),
                ));
            }
            delivery.queue_size = queue_size;
        }
        if let Some(batch_size) = overrides.batch_size {
            delivery.batch_size = batch_size.max(1);
        }
        if let Some(value) = &overrides.max_elapsed_time {
            delivery.backoff.max_elapsed_time = parse_duration(value)?;
        }
        if let Some(value) = &overrides.initial_interval {
            delivery.backoff.initial_interval = parse_duration(value)?;
        }
        if let Some(value) = &overrides.max_interval {
            delivery.backoff.max_interval = parse_duration(value)?;
        }
        check_backoff_intervals(
            delivery.backoff.initial_interval,
            delivery.backoff.max_interval,
        )?;
        if delivery.backoff.max_elapsed_time.is_zero() {
            return Err(ConfigError::Invalid(
                "maxElapsedTime must be greater than 0".to_string(),
            ));
        }
        Ok(delivery)
    }
}

/// Rejects a zero initial interval or a max below the initial one
fn check_backoff_intervals(initial: Duration, max: Duration) -> Result<(), ConfigError> {
    if initial.is_zero() || max < initial {
        return Err(ConfigError::Invalid(format!(
            "Publisher backoff intervals are inconsistent: initial {initial:?}, max {max:?}"
        )));
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} must be a number, got '{value}'")))
}

/// Queueing, batching and retry settings of one publish target
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryConfig {
    pub queue_size: usize,
    /// At least 1
    pub batch_size: usize,
    pub backoff: BackoffPolicy,
    pub idle_interval: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            backoff: BackoffPolicy::default(),
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }
}
