// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock plugins for pipeline tests

use async_trait::async_trait;
use node_agent::analyzer::node_analyzer::NodeAnalyzer;
use node_agent::analyzer::Analyzer;
use node_agent::collector::Collector;
use node_agent::config::PluginConfig;
use node_agent::errors::{ConfigError, PluginError};
use node_agent::metric::{Metric, MetricValue, Namespace};
use node_agent::plugins::PluginFactory;
use node_agent::processor::Processor;
use node_agent::publisher::Publisher;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Advertises three `cpu/*` metrics and one `mem/free`, all reading 90
pub struct MockCollector {
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl Collector for MockCollector {
    async fn get_metric_types(
        &mut self,
        _config: &PluginConfig,
    ) -> Result<Vec<Metric>, PluginError> {
        Ok(["cpu/user", "cpu/system", "cpu/idle", "mem/free"]
            .iter()
            .map(|name| Metric::metric_type(Namespace::parse(name), "percent"))
            .collect())
    }

    async fn collect_metrics(
        &mut self,
        metric_types: &[Metric],
    ) -> Result<Vec<Metric>, PluginError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PluginError::Other("mock collector failure".to_string()));
        }
        Ok(metric_types
            .iter()
            .map(|t| {
                Metric::new(t.namespace.clone(), MetricValue::Float(90.0))
                    .with_tag("nodename", "node-1")
            })
            .collect())
    }
}

/// Records every published batch; fails while `failing` is set
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    pub batches: Arc<Mutex<Vec<Vec<Metric>>>>,
    pub failing: Arc<AtomicBool>,
    pub calls: Arc<AtomicU32>,
}

#[allow(dead_code)]
impl RecordingPublisher {
    pub fn batches(&self) -> Vec<Vec<Metric>> {
        self.batches.lock().expect("lock").clone()
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.batches()
            .iter()
            .flatten()
            .map(Metric::name)
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, metrics: &[Metric], _config: &PluginConfig) -> Result<(), PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PluginError::Other("mock sink unavailable".to_string()));
        }
        self.batches.lock().expect("lock").push(metrics.to_vec());
        Ok(())
    }
}

/// Plugin factory handing out the mocks above
///
/// * collector `mock` - [`MockCollector`]
/// * analyzer `nodeanalyzer` - the real [`NodeAnalyzer`]
/// * publishers `recording` and `derived` - clones of the two recorders
#[derive(Clone, Default)]
pub struct MockPlugins {
    pub collector_fails: Arc<AtomicBool>,
    pub publisher: RecordingPublisher,
    pub derived: RecordingPublisher,
}

impl PluginFactory for MockPlugins {
    fn collector(&self, name: &str) -> Result<Box<dyn Collector>, ConfigError> {
        match name {
            "mock" => Ok(Box::new(MockCollector {
                fail: Arc::clone(&self.collector_fails),
            })),
            _ => Err(ConfigError::UnknownPlugin {
                kind: "collector",
                name: name.to_string(),
            }),
        }
    }

    fn processor(&self, name: &str) -> Result<Box<dyn Processor>, ConfigError> {
        Err(ConfigError::UnknownPlugin {
            kind: "processor",
            name: name.to_string(),
        })
    }

    fn analyzer(&self, name: &str) -> Result<Box<dyn Analyzer>, ConfigError> {
        match name {
            "nodeanalyzer" => Ok(Box::new(NodeAnalyzer::new())),
            _ => Err(ConfigError::UnknownPlugin {
                kind: "analyzer",
                name: name.to_string(),
            }),
        }
    }

    fn publisher(&self, name: &str) -> Result<Box<dyn Publisher>, ConfigError> {
        match name {
            "recording" => Ok(Box::new(self.publisher.clone())),
            "derived" => Ok(Box::new(self.derived.clone())),
            _ => Err(ConfigError::UnknownPlugin {
                kind: "publisher",
                name: name.to_string(),
            }),
        }
    }
}
