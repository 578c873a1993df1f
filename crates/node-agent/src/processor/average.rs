// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns cumulative counters into per-second rates.
//!
//! Metrics whose name matches one of the comma separated globs under the
//! `average` config key are replaced by their rate of change since the
//! previous observation of the same series. A series is the metric name plus
//! its `nodename` (or `docker_id`) tag. The first observation of a series, and
//! any counter reset, yields 0. Other metrics pass through untouched.

use crate::config::PluginConfig;
use crate::errors::PluginError;
use crate::metric::{Metric, MetricValue};
use crate::namespace::NamespacePattern;
use crate::processor::Processor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

pub const PROCESSED_TAG: &str = "average_process";

struct PreviousSample {
    value: f64,
    at: DateTime<Utc>,
}

#[derive(Default)]
pub struct AverageProcessor {
    patterns: Option<Vec<NamespacePattern>>,
    previous: HashMap<String, PreviousSample>,
}

impl AverageProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn patterns(&mut self, config: &PluginConfig) -> Result<&[NamespacePattern], PluginError> {
        if self.patterns.is_none() {
            let averages = config.get_str("average").unwrap_or_default();
            let patterns = averages
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(NamespacePattern::compile)
                .collect::<Result<Vec<_>, _>>()?;
            info!("Process average list: {averages}");
            self.patterns = Some(patterns);
        }
        Ok(self.patterns.as_deref().unwrap_or_default())
    }

    fn rate(&mut self, key: String, value: f64, at: DateTime<Utc>) -> f64 {
        let previous = self.previous.insert(key, PreviousSample { value, at });
        let Some(previous) = previous else {
            return 0.0;
        };
        let seconds = (at - previous.at).num_milliseconds() as f64 / 1000.0;
        if seconds <= 0.0 || value < previous.value {
            return 0.0;
        }
        (value - previous.value) / seconds
    }
}

fn series_key(metric: &Metric) -> String {
    let owner = metric
        .tags
        .get("nodename")
        .or_else(|| metric.tags.get("docker_id"))
        .map(String::as_str)
        .unwrap_or_default();
    format!("{}/{owner}", metric.name())
}

#[async_trait]
impl Processor for AverageProcessor {
    async fn process(
        &mut self,
        metrics: Vec<Metric>,
        config: &PluginConfig,
    ) -> Result<Vec<Metric>, PluginError> {
        let patterns = self.patterns(config)?.to_vec();
        let mut processed = Vec::with_capacity(metrics.len());

        for mut metric in metrics {
            let name = metric.name();
            let value = metric.value.as_f64();
            match value {
                Some(value) if patterns.iter().any(|p| p.matches(&name)) => {
                    let rate = self.rate(series_key(&metric), value, metric.timestamp);
                    metric.value = MetricValue::Float(rate);
                    metric
                        .tags
                        .insert(PROCESSED_TAG.to_string(), "true".to_string());
                }
                _ => debug!("{name} is not averaged"),
            }
            processed.push(metric);
        }

        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Namespace;
    use chrono::Duration;

    fn counter(name: &str, value: i64, at: DateTime<Utc>) -> Metric {
        Metric::new(Namespace::parse(name), value)
            .with_timestamp(at)
            .with_tag("nodename", "node-1")
    }

    #[tokio::test]
    async fn test_rates_for_matching_counters() {
        let mut processor = AverageProcessor::new();
        let config = PluginConfig::new().with("average", "procfs/cpu/*/user, procfs/cpu/*/system");
        let t0 = Utc::now();

        let first = processor
            .process(vec![counter("procfs/cpu/cpu0/user", 100, t0)], &config)
            .await
            .expect("process");
        assert_eq!(first[0].value, MetricValue::Float(0.0));
        assert_eq!(first[0].tags.get(PROCESSED_TAG).map(String::as_str), Some("true"));

        let second = processor
            .process(
                vec![counter("procfs/cpu/cpu0/user", 150, t0 + Duration::seconds(5))],
                &config,
            )
            .await
            .expect("process");
        assert_eq!(second[0].value, MetricValue::Float(10.0));
    }

    #[tokio::test]
    async fn test_series_are_kept_apart_by_node() {
        let mut processor = AverageProcessor::new();
        let config = PluginConfig::new().with("average", "net/*");
        let t0 = Utc::now();

        processor
            .process(vec![counter("net/rx", 0, t0)], &config)
            .await
            .expect("process");
        let other_node =
            counter("net/rx", 1000, t0 + Duration::seconds(1)).with_tag("nodename", "node-2");
        let out = processor.process(vec![other_node], &config).await.expect("process");
        assert_eq!(out[0].value, MetricValue::Float(0.0));
    }

    #[tokio::test]
    async fn test_counter_reset_yields_zero() {
        let mut processor = AverageProcessor::new();
        let config = PluginConfig::new().with("average", "net/*");
        let t0 = Utc::now();
        processor
            .process(vec![counter("net/rx", 500, t0)], &config)
            .await
            .expect("process");
        let out = processor
            .process(vec![counter("net/rx", 10, t0 + Duration::seconds(1))], &config)
            .await
            .expect("process");
        assert_eq!(out[0].value, MetricValue::Float(0.0));
    }

    #[tokio::test]
    async fn test_non_matching_metrics_pass_through() {
        let mut processor = AverageProcessor::new();
        let config = PluginConfig::new().with("average", "net/*");
        let metric = counter("procfs/load/load1", 3, Utc::now());

        let out = processor
            .process(vec![metric.clone()], &config)
            .await
            .expect("process");
        assert_eq!(out, vec![metric]);
    }

    #[tokio::test]
    async fn test_bad_pattern_is_an_error() {
        let mut processor = AverageProcessor::new();
        let config = PluginConfig::new().with("average", "net/[rx");
        let result = processor.process(vec![], &config).await;
        assert!(matches!(result, Err(PluginError::Pattern(_))));
    }
}
