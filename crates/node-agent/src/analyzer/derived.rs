// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Windowed threshold-crossing frequency of individual metric series.
//!
//! Each [`DerivedMetricConfig`] names a source metric (possibly a glob), a
//! threshold and an observation window. For every concrete metric name that
//! matches a config, the engine keeps a [`ThresholdWindowState`]. A window
//! opens on the first crossing, counts every sample from then on, and closes
//! once it has seen `total_samples` samples or once its duration has elapsed,
//! whichever comes first. Closing emits `hits / total_samples` and resets the
//! state.

use crate::errors::ConfigError;
use crate::metric::Tags;
use crate::namespace::{resolve_wildcard, NamespacePattern};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdDirection {
    /// Crossed when the value is at or above the threshold
    #[serde(rename = "UB")]
    UpperBound,
    /// Crossed when the value is at or below the threshold
    #[serde(rename = "LB")]
    LowerBound,
}

impl ThresholdDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdDirection::UpperBound => "UB",
            ThresholdDirection::LowerBound => "LB",
        }
    }

    pub fn is_crossed(&self, value: f64, threshold: f64) -> bool {
        match self {
            ThresholdDirection::UpperBound => value >= threshold,
            ThresholdDirection::LowerBound => value <= threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(rename = "type")]
    pub direction: ThresholdDirection,
    pub value: f64,
    /// `ms` values are compared in seconds
    #[serde(default)]
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetricConfig {
    pub metric_name: String,
    #[serde(rename = "type", default)]
    pub metric_type: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalizer: Option<String>,
    pub observation_window_sec: u64,
    /// Tags an observation must carry, with these exact values
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    pub threshold: ThresholdConfig,
}

impl DerivedMetricConfig {
    pub fn observation_window(&self) -> Duration {
        Duration::from_secs(self.observation_window_sec)
    }
}

/// Body of a derived metric configuration document
#[derive(Debug, Clone, Deserialize)]
pub struct MetricConfigs {
    pub configs: Vec<DerivedMetricConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedMetricResult {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdWindowState {
    config: usize,
    pub hit_count: u64,
    pub window_start: Option<DateTime<Utc>>,
    pub samples_seen: u64,
    pub total_samples: u64,
}

impl ThresholdWindowState {
    fn new(config: usize, total_samples: u64) -> Self {
        Self {
            config,
            hit_count: 0,
            window_start: None,
            samples_seen: 0,
            total_samples,
        }
    }

    fn record(&mut self, now: DateTime<Utc>, crossed: bool) {
        if crossed {
            self.hit_count += 1;
            if self.hit_count == 1 {
                self.window_start = Some(now);
            }
        }
        if self.hit_count > 0 {
            self.samples_seen += 1;
        }
    }

    /// Closes the window when complete, returning the crossing frequency
    fn complete(&mut self, now: DateTime<Utc>, window: chrono::Duration) -> Option<f64> {
        if self.hit_count == 0 {
            return None;
        }
        let elapsed = self
            .window_start
            .is_some_and(|start| now - start >= window);
        if self.samples_seen < self.total_samples && !elapsed {
            return None;
        }
        let frequency = self.hit_count as f64 / self.total_samples as f64;
        self.hit_count = 0;
        self.samples_seen = 0;
        self.window_start = None;
        Some(frequency)
    }
}

#[derive(Debug)]
struct CompiledConfig {
    config: DerivedMetricConfig,
    pattern: NamespacePattern,
    window: chrono::Duration,
    total_samples: u64,
}

#[derive(Debug)]
pub struct DerivedMetricEngine {
    configs: Vec<CompiledConfig>,
    states: HashMap<String, ThresholdWindowState>,
    sample_interval: Duration,
}

impl DerivedMetricEngine {
    /// Compiles `configs` for a task sampling every `sample_interval`.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Pattern`] - if a metric name is not a valid glob
    /// * [`ConfigError::Invalid`] - for a zero interval or observation window
    pub fn new(
        sample_interval: Duration,
        configs: Vec<DerivedMetricConfig>,
    ) -> Result<Self, ConfigError> {
        if sample_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "Derived metric sample interval must be positive".to_string(),
            ));
        }

        let configs = configs
            .into_iter()
            .map(|config| {
                if config.observation_window_sec == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "Observation window of {} must be positive",
                        config.metric_name
                    )));
                }
                let pattern = NamespacePattern::compile(&config.metric_name)?;
                let window = config.observation_window();
                let total_samples =
                    ((window.as_nanos() / sample_interval.as_nanos()) as u64).max(1);
                let window = chrono::Duration::from_std(window)
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                Ok(CompiledConfig {
                    config,
                    pattern,
                    window,
                    total_samples,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            configs,
            states: HashMap::new(),
            sample_interval,
        })
    }

    pub fn sample_interval(&self) -> Duration {
        self.sample_interval
    }

    pub fn state(&self, metric_name: &str) -> Option<&ThresholdWindowState> {
        self.states.get(metric_name)
    }

    fn config_index(&self, metric_name: &str) -> Option<usize> {
        match self.states.get(metric_name) {
            Some(state) => Some(state.config),
            None => self
                .configs
                .iter()
                .position(|compiled| compiled.pattern.matches(metric_name)),
        }
    }

    /// The concrete normalizer name for `metric_name`, with the wildcards of
    /// the normalizer pattern taken from `metric_name`
    pub fn normalizer_key(&self, metric_name: &str) -> Option<String> {
        let compiled = self.configs.get(self.config_index(metric_name)?)?;
        compiled
            .config
            .normalizer
            .as_deref()
            .map(|normalizer| resolve_wildcard(normalizer, metric_name))
    }

    /// Feeds one observation, returning a result when it closes a window
    pub fn process_metric(
        &mut self,
        now: DateTime<Utc>,
        metric_name: &str,
        value: f64,
        tags: &Tags,
        normalizer_value: Option<f64>,
    ) -> Option<DerivedMetricResult> {
        let index = self.config_index(metric_name)?;
        let compiled = self.configs.get(index)?;
        let config = &compiled.config;

        let tags_match = config
            .tags
            .iter()
            .all(|(key, expected)| tags.get(key) == Some(expected));
        if !tags_match {
            return None;
        }

        let mut value = match (&config.normalizer, normalizer_value) {
            (Some(_), Some(normalizer)) if normalizer != 0.0 => value / normalizer,
            _ => value,
        };
        if config.threshold.unit == "ms" {
            value /= 1000.0;
        }
        let crossed = config
            .threshold
            .direction
            .is_crossed(value, config.threshold.value);

        let state = self
            .states
            .entry(metric_name.to_string())
            .or_insert_with(|| ThresholdWindowState::new(index, compiled.total_samples));
        state.record(now, crossed);

        match state.complete(now, compiled.window) {
            Some(frequency) => {
                let name = derived_name(config, metric_name);
                info!("Finished computing {name} threshold frequency: {frequency}");
                Some(DerivedMetricResult {
                    name,
                    value: frequency,
                })
            }
            None => {
                if state.hit_count > 0 {
                    debug!(
                        "{metric_name}[value:{value}] threshold frequency[{}:{}] \
                         is {}/{} after {} samples",
                        config.threshold.direction.as_str(),
                        config.threshold.value,
                        state.hit_count,
                        state.total_samples,
                        state.samples_seen,
                    );
                }
                None
            }
        }
    }
}

fn derived_name(config: &DerivedMetricConfig, metric_name: &str) -> String {
    let resolved = resolve_wildcard(&config.metric_name, metric_name);
    let suffix = if config.normalizer.is_some() {
        "_normalized"
    } else {
        ""
    };
    format!("{resolved}{suffix}/{}", config.threshold.direction.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(
        name: &str,
        direction: ThresholdDirection,
        value: f64,
        window: u64,
    ) -> DerivedMetricConfig {
        DerivedMetricConfig {
            metric_name: name.to_string(),
            metric_type: String::new(),
            resource: String::new(),
            normalizer: None,
            observation_window_sec: window,
            tags: Tags::new(),
            threshold: ThresholdConfig {
                direction,
                value,
                unit: String::new(),
            },
        }
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0)
            .single()
            .expect("valid timestamp")
    }

    fn engine(configs: Vec<DerivedMetricConfig>) -> DerivedMetricEngine {
        DerivedMetricEngine::new(Duration::from_secs(1), configs).expect("valid configs")
    }

    fn feed(engine: &mut DerivedMetricEngine, name: &str, values: &[f64]) -> Vec<Option<f64>> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                engine
                    .process_metric(at(i as i64), name, *v, &Tags::new(), None)
                    .map(|r| r.value)
            })
            .collect()
    }

    #[test]
    fn test_full_window_of_crossings_yields_one() {
        let mut engine = engine(vec![config(
            "cpu/*/usage",
            ThresholdDirection::UpperBound,
            80.0,
            5,
        )]);
        let results = feed(&mut engine, "cpu/cpu0/usage", &[90.0, 95.0, 80.0, 99.0, 85.0]);
        assert_eq!(results, vec![None, None, None, None, Some(1.0)]);

        let state = engine.state("cpu/cpu0/usage").expect("state memoized");
        assert_eq!(state.hit_count, 0);
        assert_eq!(state.samples_seen, 0);
        assert_eq!(state.total_samples, 5);
    }

    #[test]
    fn test_no_crossings_yields_nothing() {
        let mut engine = engine(vec![config(
            "cpu/*/usage",
            ThresholdDirection::UpperBound,
            80.0,
            3,
        )]);
        let results = feed(&mut engine, "cpu/cpu0/usage", &[10.0; 8]);
        assert!(results.iter().all(Option::is_none));
        let state = engine.state("cpu/cpu0/usage").expect("state memoized");
        assert_eq!(state.samples_seen, 0);
        assert_eq!(state.window_start, None);
    }

    #[test]
    fn test_partial_crossings_yield_ratio() {
        let mut engine = engine(vec![config("mem/free", ThresholdDirection::LowerBound, 100.0, 5)]);
        let results = feed(&mut engine, "mem/free", &[50.0, 500.0, 100.0, 500.0, 500.0]);
        assert_eq!(results[4], Some(0.4));
        assert!(results[..4].iter().all(Option::is_none));
    }

    #[test]
    fn test_samples_before_first_crossing_are_not_counted() {
        let mut engine = engine(vec![config("mem/free", ThresholdDirection::LowerBound, 100.0, 3)]);
        let results = feed(&mut engine, "mem/free", &[500.0, 500.0, 10.0, 500.0, 500.0]);
        assert_eq!(results, vec![None, None, None, None, Some(1.0 / 3.0)]);
    }

    #[test]
    fn test_elapsed_window_closes_early() {
        let mut engine = engine(vec![config(
            "disk/latency",
            ThresholdDirection::UpperBound,
            1.0,
            10,
        )]);
        let tags = Tags::new();
        assert_eq!(engine.process_metric(at(0), "disk/latency", 5.0, &tags, None), None);
        let result = engine
            .process_metric(at(10), "disk/latency", 0.0, &tags, None)
            .expect("window elapsed");
        assert_eq!(result.value, 0.1);

        // a single reset: the next non-crossing sample does not reopen the window
        assert_eq!(engine.process_metric(at(11), "disk/latency", 0.0, &tags, None), None);
        let state = engine.state("disk/latency").expect("state memoized");
        assert_eq!((state.hit_count, state.samples_seen), (0, 0));
    }

    #[test]
    fn test_count_and_elapsed_together_reset_once() {
        let configs = vec![config("net/drops", ThresholdDirection::UpperBound, 1.0, 10)];
        let mut engine =
            DerivedMetricEngine::new(Duration::from_secs(5), configs).expect("valid configs");
        let tags = Tags::new();
        assert_eq!(engine.process_metric(at(0), "net/drops", 3.0, &tags, None), None);
        let result = engine
            .process_metric(at(10), "net/drops", 3.0, &tags, None)
            .expect("window complete");
        assert_eq!(result.value, 1.0);
        assert_eq!(engine.process_metric(at(15), "net/drops", 0.0, &tags, None), None);
    }

    #[test]
    fn test_tag_filter_mismatch_leaves_no_state() {
        let mut cfg = config("cpu/*/usage", ThresholdDirection::UpperBound, 80.0, 2);
        cfg.tags.insert("nodename".to_string(), "node-1".to_string());
        let mut engine = engine(vec![cfg]);

        let other: Tags = [("nodename".to_string(), "node-2".to_string())].into();
        assert_eq!(engine.process_metric(at(0), "cpu/cpu0/usage", 99.0, &other, None), None);
        assert!(engine.state("cpu/cpu0/usage").is_none());

        let matching: Tags = [("nodename".to_string(), "node-1".to_string())].into();
        assert_eq!(engine.process_metric(at(0), "cpu/cpu0/usage", 99.0, &matching, None), None);
        let before = engine.state("cpu/cpu0/usage").cloned();

        assert_eq!(engine.process_metric(at(1), "cpu/cpu0/usage", 99.0, &other, None), None);
        assert_eq!(engine.state("cpu/cpu0/usage").cloned(), before);
    }

    #[test]
    fn test_normalizer_resolution_and_naming() {
        let mut cfg = config("intel/docker/*/cpu/usage", ThresholdDirection::UpperBound, 0.5, 1);
        cfg.normalizer = Some("intel/docker/*/spec/cpu_shares".to_string());
        let mut engine = engine(vec![cfg]);

        assert_eq!(
            engine.normalizer_key("intel/docker/c1/cpu/usage").as_deref(),
            Some("intel/docker/c1/spec/cpu_shares")
        );
        assert_eq!(engine.normalizer_key("intel/docker/c1/mem/usage"), None);

        let result = engine
            .process_metric(at(0), "intel/docker/c1/cpu/usage", 300.0, &Tags::new(), Some(400.0))
            .expect("single-sample window");
        assert_eq!(result.name, "intel/docker/c1/cpu/usage_normalized/UB");
        assert_eq!(result.value, 1.0);
    }

    #[test]
    fn test_zero_normalizer_uses_raw_value() {
        let mut cfg = config("app/latency", ThresholdDirection::UpperBound, 10.0, 1);
        cfg.normalizer = Some("app/requests".to_string());
        let mut engine = engine(vec![cfg]);
        let result = engine.process_metric(at(0), "app/latency", 5.0, &Tags::new(), Some(0.0));
        assert_eq!(result, None);
        let state = engine.state("app/latency").expect("state memoized");
        assert_eq!(state.hit_count, 0);
    }

    #[test]
    fn test_millisecond_unit_is_compared_in_seconds() {
        let mut cfg = config("app/latency", ThresholdDirection::LowerBound, 3.0, 1);
        cfg.threshold.unit = "ms".to_string();
        let mut engine = engine(vec![cfg]);
        let result = engine
            .process_metric(at(0), "app/latency", 2500.0, &Tags::new(), None)
            .expect("crossed");
        assert_eq!(result.name, "app/latency/LB");
    }

    #[test]
    fn test_unmatched_metric_is_ignored() {
        let mut engine = engine(vec![config(
            "cpu/*/usage",
            ThresholdDirection::UpperBound,
            1.0,
            1,
        )]);
        assert_eq!(engine.process_metric(at(0), "mem/free", 5.0, &Tags::new(), None), None);
        assert!(engine.state("mem/free").is_none());
    }

    #[test]
    fn test_invalid_configs() {
        let zero_window = config("cpu/usage", ThresholdDirection::UpperBound, 1.0, 0);
        assert!(DerivedMetricEngine::new(Duration::from_secs(1), vec![zero_window]).is_err());

        let bad_pattern = config("cpu/[usage", ThresholdDirection::UpperBound, 1.0, 5);
        assert!(matches!(
            DerivedMetricEngine::new(Duration::from_secs(1), vec![bad_pattern]),
            Err(ConfigError::Pattern(_))
        ));

        assert!(DerivedMetricEngine::new(Duration::ZERO, vec![]).is_err());
    }

    #[test]
    fn test_window_shorter_than_interval_has_one_sample() {
        let engine = DerivedMetricEngine::new(
            Duration::from_secs(10),
            vec![config("cpu/usage", ThresholdDirection::UpperBound, 1.0, 5)],
        )
        .expect("valid configs");
        assert_eq!(engine.configs[0].total_samples, 1);
    }

    #[test]
    fn test_config_json() {
        let configs: MetricConfigs = serde_json::from_str(
            r#"{"configs": [{
                "metric_name": "/intel/docker/*/cpu_stats/cpu_usage/total_usage",
                "type": "gauge",
                "resource": "cpu",
                "normalizer": "/intel/docker/*/spec/cpu_shares",
                "observation_window_sec": 60,
                "tags": {"nodename": "node-1"},
                "threshold": {"type": "UB", "value": 0.8, "unit": "%"}
            }]}"#,
        )
        .expect("valid document");
        let config = &configs.configs[0];
        assert_eq!(config.threshold.direction, ThresholdDirection::UpperBound);
        assert_eq!(config.observation_window(), Duration::from_secs(60));
        assert_eq!(config.tags.get("nodename").map(String::as_str), Some("node-1"));

        let bad = serde_json::from_str::<ThresholdConfig>(r#"{"type": "XX", "value": 1}"#);
        assert!(bad.is_err());
    }
}
