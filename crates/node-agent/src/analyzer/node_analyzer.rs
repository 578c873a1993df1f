// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Analyzer emitting threshold-crossing frequencies of node metrics.
//!
//! Initialized on the first call from its config:
//!
//! * `configs` - inline array of derived metric configs, or
//! * `configUrl` - URL of a `{"configs": [...]}` document, fetched once
//! * `sampleInterval` - sampling interval of the source metrics, as `"5s"` or
//!   nanoseconds. Defaults to the owning task's schedule interval.
//!
//! A failed initialization is retried on the next call.

use crate::analyzer::derived::{DerivedMetricConfig, DerivedMetricEngine, MetricConfigs};
use crate::analyzer::Analyzer;
use crate::config::PluginConfig;
use crate::errors::PluginError;
use crate::metric::{Metric, MetricValue, Namespace};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, info};

pub const SAMPLE_INTERVAL_KEY: &str = "sampleInterval";

#[derive(Default)]
pub struct NodeAnalyzer {
    engine: Option<DerivedMetricEngine>,
    client: reqwest::Client,
}

impl NodeAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    async fn download_configs(&self, url: &str) -> Result<Vec<DerivedMetricConfig>, PluginError> {
        debug!("Downloading derived metric configs from {url}");
        let response = self.client.get(url).send().await?.error_for_status()?;
        let document: MetricConfigs = response.json().await?;
        Ok(document.configs)
    }

    async fn initialize(&self, config: &PluginConfig) -> Result<DerivedMetricEngine, PluginError> {
        let configs = match config.get("configs") {
            Some(inline) => serde_json::from_value(inline.clone())?,
            None => {
                let url = config.require_str("configUrl")?;
                self.download_configs(url).await?
            }
        };
        let sample_interval = config
            .get_duration(SAMPLE_INTERVAL_KEY)?
            .ok_or_else(|| PluginError::MissingConfig(SAMPLE_INTERVAL_KEY.to_string()))?;

        info!(
            "Derived metrics initialized with {} configs, sampling every {sample_interval:?}",
            configs.len()
        );
        Ok(DerivedMetricEngine::new(sample_interval, configs)?)
    }
}

#[async_trait]
impl Analyzer for NodeAnalyzer {
    async fn analyze(
        &mut self,
        metrics: &[Metric],
        config: &PluginConfig,
    ) -> Result<Vec<Metric>, PluginError> {
        let engine = match self.engine.take() {
            Some(engine) => engine,
            None => self.initialize(config).await?,
        };
        let engine = self.engine.insert(engine);

        let values: HashMap<String, f64> = metrics
            .iter()
            .filter_map(|m| Some((m.name(), m.value.as_f64()?)))
            .collect();

        let mut derived = Vec::new();
        for metric in metrics {
            let Some(value) = metric.value.as_f64() else {
                continue;
            };
            let name = metric.name();
            let normalizer = engine
                .normalizer_key(&name)
                .and_then(|key| values.get(&key).copied());

            if let Some(result) =
                engine.process_metric(metric.timestamp, &name, value, &metric.tags, normalizer)
            {
                derived.push(Metric {
                    namespace: Namespace::parse(&result.name),
                    timestamp: metric.timestamp,
                    value: MetricValue::Float(result.value),
                    tags: metric.tags.clone(),
                    unit: String::new(),
                    version: metric.version,
                });
            }
        }

        Ok(derived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cpu_usage(container: &str, value: f64) -> Metric {
        Metric::new(
            Namespace::parse(&format!("intel/docker/{container}/cpu/usage")),
            value,
        )
        .with_tag("nodename", "node-1")
    }

    fn cpu_shares(container: &str, value: f64) -> Metric {
        Metric::new(
            Namespace::parse(&format!("intel/docker/{container}/spec/cpu_shares")),
            value,
        )
        .with_tag("nodename", "node-1")
    }

    fn configs() -> serde_json::Value {
        json!([{
            "metric_name": "intel/docker/*/cpu/usage",
            "normalizer": "intel/docker/*/spec/cpu_shares",
            "observation_window_sec": 2,
            "threshold": {"type": "UB", "value": 0.5}
        }])
    }

    #[tokio::test]
    async fn test_inline_configs_with_normalizer() {
        let mut analyzer = NodeAnalyzer::new();
        let config = PluginConfig::new()
            .with("configs", configs())
            .with(SAMPLE_INTERVAL_KEY, "1s");

        let batch = vec![
            cpu_usage("c1", 60.0),
            cpu_shares("c1", 100.0),
            cpu_usage("c2", 10.0),
            cpu_shares("c2", 100.0),
        ];
        let first = analyzer.analyze(&batch, &config).await.expect("analyze");
        assert!(first.is_empty());

        let second = analyzer.analyze(&batch, &config).await.expect("analyze");
        assert_eq!(second.len(), 1);
        let derived = &second[0];
        assert_eq!(derived.name(), "intel/docker/c1/cpu/usage_normalized/UB");
        assert_eq!(derived.value, MetricValue::Float(1.0));
        assert_eq!(derived.tags.get("nodename").map(String::as_str), Some("node-1"));
    }

    #[tokio::test]
    async fn test_configs_downloaded_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/configs")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "configs": configs() }).to_string())
            .expect(1)
            .create_async()
            .await;

        let mut analyzer = NodeAnalyzer::new();
        let config = PluginConfig::new()
            .with("configUrl", format!("{}/configs", server.url()))
            .with(SAMPLE_INTERVAL_KEY, 1_000_000_000u64);

        let batch = vec![cpu_usage("c1", 60.0), cpu_shares("c1", 100.0)];
        analyzer.analyze(&batch, &config).await.expect("analyze");
        let derived = analyzer.analyze(&batch, &config).await.expect("analyze");
        assert_eq!(derived.len(), 1);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_download_is_retried_next_call() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/configs")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let mut analyzer = NodeAnalyzer::new();
        let config = PluginConfig::new()
            .with("configUrl", format!("{}/configs", server.url()))
            .with(SAMPLE_INTERVAL_KEY, "1s");

        let result = analyzer.analyze(&[], &config).await;
        assert!(matches!(result, Err(PluginError::Http(_))));
        failing.assert_async().await;
        failing.remove_async().await;

        server
            .mock("GET", "/configs")
            .with_status(200)
            .with_body(json!({ "configs": [] }).to_string())
            .create_async()
            .await;
        assert!(analyzer.analyze(&[], &config).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_settings() {
        let mut analyzer = NodeAnalyzer::new();
        let result = analyzer
            .analyze(&[], &PluginConfig::new().with(SAMPLE_INTERVAL_KEY, "1s"))
            .await;
        assert!(matches!(result, Err(PluginError::MissingConfig(key)) if key == "configUrl"));

        let result = analyzer
            .analyze(&[], &PluginConfig::new().with("configs", json!([])))
            .await;
        assert!(matches!(
            result,
            Err(PluginError::MissingConfig(key)) if key == SAMPLE_INTERVAL_KEY
        ));
    }
}
