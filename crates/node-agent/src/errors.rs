// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Errors raised while loading or validating agent and task configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown {kind} plugin: {name}")]
    UnknownPlugin { kind: &'static str, name: String },

    #[error("Invalid duration '{value}': {source}")]
    Duration {
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error(transparent)]
    Pattern(#[from] PatternSyntaxError),
}

/// Malformed glob syntax in a metric name pattern
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid pattern '{pattern}': {reason}")]
pub struct PatternSyntaxError {
    pub pattern: String,
    pub reason: String,
}

impl PatternSyntaxError {
    pub(crate) fn new(pattern: &str, reason: impl Into<String>) -> Self {
        Self {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors returned by collector, processor, analyzer and publisher plugins
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Missing config key '{0}'")]
    MissingConfig(String),

    #[error("Invalid value for config key '{key}': {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Pattern(#[from] PatternSyntaxError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by a pipeline task, at construction or during a tick
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("No metric advertised by collector '{plugin}' matched the patterns of task {task_id}")]
    NoMatchingMetrics { task_id: String, plugin: String },

    #[error("Unable to collect metrics: {0}")]
    Collect(#[source] PluginError),

    #[error("Unable to process metrics: {0}")]
    Process(#[source] PluginError),

    #[error("Unable to analyze metrics: {0}")]
    Analyze(#[source] PluginError),

    #[error(transparent)]
    Pattern(#[from] PatternSyntaxError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Terminal outcome of a publish attempt sequence
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Publish failed after {attempts} attempts over {elapsed:?}: {source}")]
    RetriesExhausted {
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: PluginError,
    },
}

/// Errors that stop the agent process
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to bind report server on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Report server error: {0}")]
    Server(String),
}
