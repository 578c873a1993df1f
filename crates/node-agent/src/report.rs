// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Latest failure per task and per publisher, served by the report endpoint.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Last failure of a pipeline stage or publish target
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FailureReport {
    #[serde(rename = "Id", skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "Plugin")]
    pub plugin: String,
    #[serde(rename = "LastErrorMessage")]
    pub last_error_message: String,
    /// Unix epoch milliseconds
    #[serde(rename = "LastErrorTimestamp")]
    pub last_error_time_millis: i64,
    #[serde(rename = "FailureCount")]
    pub failure_count: u64,
}

pub type TaskReport = FailureReport;
pub type PublisherReport = FailureReport;

impl FailureReport {
    /// A report stamped with the current time
    pub fn now(id: &str, plugin: &str, message: impl ToString, failure_count: u64) -> Self {
        Self {
            id: id.to_string(),
            plugin: plugin.to_string(),
            last_error_message: message.to_string(),
            last_error_time_millis: Utc::now().timestamp_millis(),
            failure_count,
        }
    }
}

/// Snapshot of every report, as served on `/report`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentReport {
    pub tasks: BTreeMap<String, TaskReport>,
    pub publishers: BTreeMap<String, PublisherReport>,
}

/// Overwrite-latest report maps, one lock per map
#[derive(Debug, Default)]
pub struct ReportStore {
    tasks: RwLock<BTreeMap<String, TaskReport>>,
    publishers: RwLock<BTreeMap<String, PublisherReport>>,
}

impl ReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_task_report(&self, task_id: &str, report: TaskReport) {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        tasks.insert(task_id.to_string(), report);
    }

    pub fn update_publisher_report(&self, publisher_id: &str, report: PublisherReport) {
        let mut publishers = self
            .publishers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        publishers.insert(publisher_id.to_string(), report);
    }

    pub fn task_report(&self, task_id: &str) -> Option<TaskReport> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        tasks.get(task_id).cloned()
    }

    pub fn publisher_report(&self, publisher_id: &str) -> Option<PublisherReport> {
        let publishers = self
            .publishers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        publishers.get(publisher_id).cloned()
    }

    pub fn snapshot(&self) -> AgentReport {
        let tasks = self
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let publishers = self
            .publishers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        AgentReport { tasks, publishers }
    }
}
