// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One scheduled collection pipeline.
//!
//! Every tick runs `collect -> process? -> publish -> analyze? -> publish
//! derived` to completion before the next tick is awaited. A failing stage
//! bumps the task's failure count, records a [`TaskReport`] and ends the tick;
//! the loop carries on at the next interval.

use crate::analyzer::node_analyzer::SAMPLE_INTERVAL_KEY;
use crate::analyzer::Analyzer;
use crate::collector::Collector;
use crate::config::tasks::TaskDefinition;
use crate::config::PluginConfig;
use crate::errors::TaskError;
use crate::metric::{Metric, Tags};
use crate::namespace::{has_segment_prefix, NamespaceMatcher};
use crate::plugins::PluginFactory;
use crate::processor::Processor;
use crate::publisher::PublisherHandle;
use crate::report::{ReportStore, TaskReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Collecting,
    Processing,
    Publishing,
    Analyzing,
    PublishingDerived,
}

struct Stage<P: ?Sized> {
    plugin: String,
    instance: Box<P>,
    config: PluginConfig,
}

pub struct MetricPipelineTask {
    id: String,
    interval: Duration,
    collector: Stage<dyn Collector>,
    metric_types: Vec<Metric>,
    tag_overrides: Vec<(String, Tags)>,
    processor: Option<Stage<dyn Processor>>,
    analyzer: Option<Stage<dyn Analyzer>>,
    publishers: Vec<PublisherHandle>,
    derived_publishers: Vec<PublisherHandle>,
    state: PipelineState,
    failure_count: u64,
    reports: Arc<ReportStore>,
}

impl MetricPipelineTask {
    /// Builds the task's plugins and narrows the collector's catalog to the
    /// configured metric patterns.
    ///
    /// # Errors
    ///
    /// * [`TaskError::Config`] - for an unknown plugin name
    /// * [`TaskError::Pattern`] - for a malformed metric pattern
    /// * [`TaskError::Collect`] - when the collector cannot list its catalog
    /// * [`TaskError::NoMatchingMetrics`] - when no catalog entry is selected
    pub async fn new(
        definition: &TaskDefinition,
        plugins: &dyn PluginFactory,
        publishers: Vec<PublisherHandle>,
        derived_publishers: Vec<PublisherHandle>,
        reports: Arc<ReportStore>,
    ) -> Result<Self, TaskError> {
        let interval = definition.schedule.interval();
        let collect = &definition.collect;

        let matcher = NamespaceMatcher::new(collect.metrics.keys())?;
        let mut collector = plugins.collector(&collect.plugin)?;
        let catalog = collector
            .get_metric_types(&collect.config)
            .await
            .map_err(TaskError::Collect)?;
        let metric_types = matcher.select(&catalog);
        if metric_types.is_empty() {
            return Err(TaskError::NoMatchingMetrics {
                task_id: definition.id.clone(),
                plugin: collect.plugin.clone(),
            });
        }
        debug!(
            "Task {} selected {} of {} metric types",
            definition.id,
            metric_types.len(),
            catalog.len()
        );

        let processor = match &definition.process {
            Some(process) => Some(Stage {
                plugin: process.plugin.clone(),
                instance: plugins.processor(&process.plugin)?,
                config: process.config.clone(),
            }),
            None => None,
        };

        let analyzer = match &definition.analyze {
            Some(analyze) => {
                let mut config = analyze.config.clone();
                if !config.contains_key(SAMPLE_INTERVAL_KEY) {
                    config.insert(
                        SAMPLE_INTERVAL_KEY,
                        humantime::format_duration(interval).to_string(),
                    );
                }
                Some(Stage {
                    plugin: analyze.plugin.clone(),
                    instance: plugins.analyzer(&analyze.plugin)?,
                    config,
                })
            }
            None => None,
        };

        Ok(Self {
            id: definition.id.clone(),
            interval,
            collector: Stage {
                plugin: collect.plugin.clone(),
                instance: collector,
                config: collect.config.clone(),
            },
            metric_types,
            tag_overrides: collect
                .tags
                .iter()
                .map(|(prefix, tags)| (prefix.clone(), tags.clone()))
                .collect(),
            processor,
            analyzer,
            publishers,
            derived_publishers,
            state: PipelineState::Idle,
            failure_count: 0,
            reports,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    /// The catalog entries this task collects
    pub fn metric_types(&self) -> &[Metric] {
        &self.metric_types
    }

    pub fn collector_config(&self) -> &PluginConfig {
        &self.collector.config
    }

    fn set_state(&mut self, state: PipelineState) {
        trace!("Task {}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
    }

    fn apply_tags(&self, metrics: &mut [Metric]) {
        if self.tag_overrides.is_empty() {
            return;
        }
        for metric in metrics.iter_mut() {
            let name = metric.name();
            for (prefix, tags) in &self.tag_overrides {
                if has_segment_prefix(&name, prefix) {
                    metric
                        .tags
                        .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }
    }

    async fn tick(&mut self) -> Result<(), (String, TaskError)> {
        self.set_state(PipelineState::Collecting);
        let mut metrics = self
            .collector
            .instance
            .collect_metrics(&self.metric_types)
            .await
            .map_err(|e| (self.collector.plugin.clone(), TaskError::Collect(e)))?;
        self.apply_tags(&mut metrics);
        trace!("Task {} collected {} metrics", self.id, metrics.len());

        if self.processor.is_some() {
            self.set_state(PipelineState::Processing);
        }
        if let Some(stage) = self.processor.as_mut() {
            metrics = stage
                .instance
                .process(metrics, &stage.config)
                .await
                .map_err(|e| (stage.plugin.clone(), TaskError::Process(e)))?;
        }

        self.set_state(PipelineState::Publishing);
        for publisher in &self.publishers {
            publisher.put(metrics.clone());
        }

        if self.analyzer.is_none() {
            return Ok(());
        }
        self.set_state(PipelineState::Analyzing);
        let derived = match self.analyzer.as_mut() {
            Some(stage) => stage
                .instance
                .analyze(&metrics, &stage.config)
                .await
                .map_err(|e| (stage.plugin.clone(), TaskError::Analyze(e)))?,
            None => Vec::new(),
        };

        if !derived.is_empty() {
            self.set_state(PipelineState::PublishingDerived);
            for publisher in &self.derived_publishers {
                publisher.put(derived.clone());
            }
        }
        Ok(())
    }

    /// Runs one tick to completion, recording a report if a stage fails
    pub async fn run_once(&mut self) {
        if let Err((plugin, error)) = self.tick().await {
            self.failure_count += 1;
            error!("Task {} failed: {error}", self.id);
            self.reports.update_task_report(
                &self.id,
                TaskReport::now(&self.id, &plugin, &error, self.failure_count),
            );
        }
        self.set_state(PipelineState::Idle);
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Task {} started, collecting {} metric types every {:?}",
            self.id,
            self.metric_types.len(),
            self.interval
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.run_once().await,
            }
        }

        debug!("Task {} stopped", self.id);
    }
}
