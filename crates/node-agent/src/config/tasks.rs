// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Task and publisher definitions, as read from the task configuration file.
//!
//! ```json
//! {
//!   "tasks": [{
//!     "id": "load",
//!     "schedule": { "interval": "5s" },
//!     "collect": {
//!       "plugin": "procfs",
//!       "metrics": { "procfs/load/*": {} },
//!       "config": {},
//!       "tags": { "procfs/load": { "source": "loadavg" } }
//!     },
//!     "publish": ["file"]
//!   }],
//!   "publish": [{ "id": "file", "plugin": "file", "config": { "file": "/tmp/m.json" } }]
//! }
//! ```

use crate::config::plugin::{parse_duration, PluginConfig};
use crate::errors::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Used when a schedule interval cannot be parsed
pub const DEFAULT_SCHEDULE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TasksDefinition {
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
    #[serde(default)]
    pub publish: Vec<PublishDefinition>,
}

impl TasksDefinition {
    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    pub schedule: Schedule,
    pub collect: CollectDefinition,
    #[serde(default)]
    pub process: Option<ProcessDefinition>,
    #[serde(default)]
    pub analyze: Option<AnalyzeDefinition>,
    #[serde(default)]
    pub publish: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Schedule {
    pub interval: String,
}

impl Schedule {
    /// The parsed interval, falling back to 5s on malformed or zero values
    pub fn interval(&self) -> Duration {
        match parse_duration(&self.interval) {
            Ok(interval) if !interval.is_zero() => interval,
            Ok(_) => {
                warn!("Schedule interval must be positive, using {DEFAULT_SCHEDULE_INTERVAL:?}");
                DEFAULT_SCHEDULE_INTERVAL
            }
            Err(e) => {
                warn!("{e}, using {DEFAULT_SCHEDULE_INTERVAL:?}");
                DEFAULT_SCHEDULE_INTERVAL
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricInfo {
    #[serde(default)]
    pub version: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectDefinition {
    pub plugin: String,
    /// Metric name patterns, keyed by glob or literal namespace prefix
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricInfo>,
    #[serde(default)]
    pub config: PluginConfig,
    /// Tags added to collected metrics, keyed by namespace prefix
    #[serde(default)]
    pub tags: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessDefinition {
    pub plugin: String,
    #[serde(default)]
    pub config: PluginConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeDefinition {
    pub plugin: String,
    #[serde(default)]
    pub config: PluginConfig,
    #[serde(default)]
    pub publish: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishDefinition {
    pub id: String,
    pub plugin: String,
    #[serde(default)]
    pub config: PluginConfig,
    #[serde(default)]
    pub delivery: Option<DeliveryOverrides>,
}

/// Per-target overrides of the agent-wide delivery settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOverrides {
    pub queue_size: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_elapsed_time: Option<String>,
    pub initial_interval: Option<String>,
    pub max_interval: Option<String>,
}
