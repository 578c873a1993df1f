// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Owns every publisher and pipeline task of the agent.
//!
//! Publishers are built first so that tasks can resolve their `publish` ids
//! to handles. An entry that cannot be built is logged and skipped; the rest
//! of the agent still starts.

use crate::config::tasks::{PublishDefinition, TaskDefinition};
use crate::config::{AgentSettings, TasksDefinition};
use crate::errors::ConfigError;
use crate::plugins::PluginFactory;
use crate::publisher::{PublisherHandle, PublisherService};
use crate::report::{AgentReport, PublisherReport, ReportStore, TaskReport};
use crate::task::MetricPipelineTask;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct PublisherEntry {
    plugin: String,
    handle: PublisherHandle,
    service: PublisherService,
}

pub struct AgentRegistry {
    publishers: BTreeMap<String, PublisherEntry>,
    tasks: Vec<MetricPipelineTask>,
    reports: Arc<ReportStore>,
}

impl AgentRegistry {
    pub async fn build(
        definition: &TasksDefinition,
        settings: &AgentSettings,
        plugins: &dyn PluginFactory,
    ) -> Self {
        let reports = Arc::new(ReportStore::new());

        let mut publishers = BTreeMap::new();
        for target in &definition.publish {
            if publishers.contains_key(&target.id) {
                warn!("Duplicate publisher id {}, skipping", target.id);
                continue;
            }
            match build_publisher(target, settings, plugins, &reports) {
                Ok(entry) => {
                    publishers.insert(target.id.clone(), entry);
                }
                Err(e) => warn!("Skipping publisher {}: {e}", target.id),
            }
        }

        let mut task_ids = HashSet::new();
        let mut tasks = Vec::new();
        for task in &definition.tasks {
            if !task_ids.insert(task.id.as_str()) {
                warn!("Duplicate task id {}, skipping", task.id);
                continue;
            }
            let primary = resolve_publishers(&publishers, task, &task.publish);
            let derived = match &task.analyze {
                Some(analyze) => resolve_publishers(&publishers, task, &analyze.publish),
                None => Vec::new(),
            };
            let task_reports = Arc::clone(&reports);
            match MetricPipelineTask::new(task, plugins, primary, derived, task_reports).await {
                Ok(pipeline) => tasks.push(pipeline),
                Err(e) => warn!("Skipping task {}: {e}", task.id),
            }
        }

        for (id, entry) in &publishers {
            info!(
                "Publisher {id} ({}) ready, queue capacity {}",
                entry.plugin,
                entry.handle.capacity()
            );
        }
        for task in &tasks {
            info!(
                "Task {} ready, {} metric types every {:?}",
                task.id(),
                task.metric_types().len(),
                task.interval()
            );
        }
        if tasks.is_empty() {
            warn!("No pipeline task could be built, the agent will only serve reports");
        }

        Self {
            publishers,
            tasks,
            reports,
        }
    }

    pub fn reports(&self) -> Arc<ReportStore> {
        Arc::clone(&self.reports)
    }

    pub fn report(&self) -> AgentReport {
        self.reports.snapshot()
    }

    pub fn update_task_report(&self, task_id: &str, report: TaskReport) {
        self.reports.update_task_report(task_id, report);
    }

    pub fn update_publisher_report(&self, publisher_id: &str, report: PublisherReport) {
        self.reports.update_publisher_report(publisher_id, report);
    }

    pub fn publisher(&self, id: &str) -> Option<&PublisherHandle> {
        self.publishers.get(id).map(|entry| &entry.handle)
    }

    pub fn publisher_ids(&self) -> Vec<&str> {
        self.publishers.keys().map(String::as_str).collect()
    }

    pub fn task_ids(&self) -> Vec<&str> {
        self.tasks.iter().map(MetricPipelineTask::id).collect()
    }

    /// Spawns one loop per publisher and per task
    pub fn start(self, cancel: CancellationToken) -> RunningAgent {
        let mut joinset = JoinSet::new();
        let mut handles = BTreeMap::new();

        for (id, entry) in self.publishers {
            joinset.spawn(entry.service.run(cancel.clone()));
            handles.insert(id, entry.handle);
        }
        for task in self.tasks {
            joinset.spawn(task.run(cancel.clone()));
        }

        info!("Started {} pipeline loops", joinset.len());
        RunningAgent {
            reports: self.reports,
            publishers: handles,
            joinset,
        }
    }
}

fn build_publisher(
    target: &PublishDefinition,
    settings: &AgentSettings,
    plugins: &dyn PluginFactory,
    reports: &Arc<ReportStore>,
) -> Result<PublisherEntry, ConfigError> {
    let publisher = plugins.publisher(&target.plugin)?;
    let delivery = settings.delivery(target.delivery.as_ref())?;
    let (service, handle) = PublisherService::new(
        &target.id,
        &target.plugin,
        publisher,
        target.config.clone(),
        delivery,
        Arc::clone(reports),
    )?;
    Ok(PublisherEntry {
        plugin: target.plugin.clone(),
        handle,
        service,
    })
}

fn resolve_publishers(
    publishers: &BTreeMap<String, PublisherEntry>,
    task: &TaskDefinition,
    ids: &[String],
) -> Vec<PublisherHandle> {
    ids.iter()
        .filter_map(|id| match publishers.get(id) {
            Some(entry) => Some(entry.handle.clone()),
            None => {
                warn!("Task {} references unknown publisher {id}", task.id);
                None
            }
        })
        .collect()
}

/// The spawned loops of a started agent
pub struct RunningAgent {
    reports: Arc<ReportStore>,
    publishers: BTreeMap<String, PublisherHandle>,
    joinset: JoinSet<()>,
}

impl RunningAgent {
    pub fn reports(&self) -> Arc<ReportStore> {
        Arc::clone(&self.reports)
    }

    pub fn publisher(&self, id: &str) -> Option<&PublisherHandle> {
        self.publishers.get(id)
    }

    /// Waits for every loop to stop. A panicking loop is logged, never
    /// propagated to its siblings.
    pub async fn join(mut self) {
        while let Some(finished) = self.joinset.join_next().await {
            if let Err(e) = finished {
                if e.is_panic() {
                    error!("Pipeline loop panicked: {:?}", e);
                }
            }
        }
    }
}
