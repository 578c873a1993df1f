// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::{ConfigError, PluginError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Free-form plugin configuration, as written under a `config` key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginConfig(Map<String, Value>);

impl PluginConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn require_str(&self, key: &str) -> Result<&str, PluginError> {
        self.get_str(key)
            .ok_or_else(|| PluginError::MissingConfig(key.to_string()))
    }

    /// Numbers, or strings holding a number
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Reads a duration written either as a humantime string (`"5s"`) or
    /// as an integer number of nanoseconds.
    pub fn get_duration(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => match n.as_u64() {
                Some(nanos) => Ok(Some(Duration::from_nanos(nanos))),
                None => Err(ConfigError::Invalid(format!(
                    "'{key}' must be a non-negative number of nanoseconds"
                ))),
            },
            Some(Value::String(s)) => match s.trim().parse::<u64>() {
                Ok(nanos) => Ok(Some(Duration::from_nanos(nanos))),
                Err(_) => parse_duration(s).map(Some),
            },
            Some(other) => Err(ConfigError::Invalid(format!(
                "'{key}' must be a duration, got {other}"
            ))),
        }
    }
}

/// Parses `5s`, `3m`, `1m30s` style durations
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|source| ConfigError::Duration {
        value: value.to_string(),
        source,
    })
}
