// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Node metrics read from procfs.
//!
//! Catalog:
//!
//! * `procfs/load/{load1,load5,load15}` from `loadavg`
//! * `procfs/meminfo/{mem_total,mem_free,mem_available}` from `meminfo`, in kB
//! * `procfs/cpu/<cpu_id>/{user,nice,system,idle,iowait}` from `stat`, in
//!   jiffies. `cpu_id` is dynamic: `all` for the aggregate line, `cpu0`,
//!   `cpu1`, ... per core.
//!
//! Every collected metric is tagged with `nodename`.

use crate::collector::Collector;
use crate::config::PluginConfig;
use crate::errors::PluginError;
use crate::metric::{Metric, MetricValue, Namespace, DYNAMIC_VALUE};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_PROCFS_ROOT: &str = "/proc";
// 1, 5 and 15 minute load averages, then runnable/total tasks and last pid
const LOADAVG_FILE: &str = "loadavg";
const MEMINFO_FILE: &str = "meminfo"; // "Key:   value kB" per line
const STAT_FILE: &str = "stat"; // "cpuN user nice system idle iowait ..." per core, in USER_HZ
const HOSTNAME_FILE: &str = "sys/kernel/hostname";

const PLUGIN: &str = "procfs";
const LOAD_FIELDS: [&str; 3] = ["load1", "load5", "load15"];
const MEMINFO_FIELDS: [(&str, &str); 3] = [
    ("mem_total", "MemTotal"),
    ("mem_free", "MemFree"),
    ("mem_available", "MemAvailable"),
];
const CPU_FIELDS: [&str; 5] = ["user", "nice", "system", "idle", "iowait"];

pub struct ProcfsCollector {
    root: PathBuf,
    nodename: String,
}

impl Default for ProcfsCollector {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_PROCFS_ROOT),
            nodename: String::new(),
        }
    }
}

impl ProcfsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(&mut self, config: &PluginConfig) {
        if let Some(root) = config.get_str("procfs_root") {
            self.root = PathBuf::from(root);
        }
        self.nodename = match config.get_str("nodename") {
            Some(nodename) => nodename.to_string(),
            None => read_hostname(&self.root),
        };
    }

    fn read(&self, file: &str) -> Result<String, PluginError> {
        let path = self.root.join(file);
        fs::read_to_string(&path).map_err(|e| {
            debug!("Could not read {}: {e}", path.display());
            PluginError::Io(e)
        })
    }
}

fn read_hostname(root: &Path) -> String {
    fs::read_to_string(root.join(HOSTNAME_FILE))
        .map(|contents| contents.trim().to_string())
        .unwrap_or_default()
}

fn parse_loadavg(contents: &str) -> Result<[f64; 3], PluginError> {
    let mut fields = contents.split_whitespace().map(str::parse::<f64>);
    let mut load = [0.0; 3];
    for slot in load.iter_mut() {
        *slot = match fields.next() {
            Some(Ok(value)) => value,
            _ => return Err(PluginError::Other(format!("Malformed loadavg: {contents:?}"))),
        };
    }
    Ok(load)
}

fn parse_meminfo(contents: &str) -> HashMap<&str, u64> {
    contents
        .lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let value = rest.split_whitespace().next()?.parse().ok()?;
            Some((key.trim(), value))
        })
        .collect()
}

/// Per-core jiffies keyed by cpu id, `all` for the aggregate line
fn parse_stat(contents: &str) -> Vec<(String, Vec<u64>)> {
    contents
        .lines()
        .filter(|line| line.starts_with("cpu"))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let label = fields.next()?;
            let id = if label == "cpu" { "all" } else { label };
            let values = fields
                .take(CPU_FIELDS.len())
                .map(str::parse)
                .collect::<Result<Vec<u64>, _>>()
                .ok()?;
            Some((id.to_string(), values))
        })
        .collect()
}

fn cpu_namespace(id: &str, field: &str) -> Namespace {
    let mut namespace = Namespace::from_static(&[PLUGIN, "cpu"])
        .add_dynamic_element("cpu_id", "cpu identifier, all for the aggregate")
        .add_static_element(field);
    if let Some(element) = namespace.elements_mut().get_mut(2) {
        element.value = id.to_string();
    }
    namespace
}

#[async_trait]
impl Collector for ProcfsCollector {
    async fn get_metric_types(
        &mut self,
        config: &PluginConfig,
    ) -> Result<Vec<Metric>, PluginError> {
        self.configure(config);

        let mut types = Vec::new();
        for field in LOAD_FIELDS {
            types.push(Metric::metric_type(
                Namespace::from_static(&[PLUGIN, "load", field]),
                "",
            ));
        }
        for (field, _) in MEMINFO_FIELDS {
            types.push(Metric::metric_type(
                Namespace::from_static(&[PLUGIN, "meminfo", field]),
                "kB",
            ));
        }
        for field in CPU_FIELDS {
            types.push(Metric::metric_type(
                Namespace::from_static(&[PLUGIN, "cpu"])
                    .add_dynamic_element("cpu_id", "cpu identifier, all for the aggregate")
                    .add_static_element(field),
                "jiffies",
            ));
        }
        Ok(types)
    }

    async fn collect_metrics(
        &mut self,
        metric_types: &[Metric],
    ) -> Result<Vec<Metric>, PluginError> {
        let now = Utc::now();
        let mut load = None;
        let mut meminfo_contents = None;
        let mut stat = None;
        let mut metrics = Vec::with_capacity(metric_types.len());

        for metric_type in metric_types {
            let segments = metric_type.namespace.strings();
            match segments.as_slice() {
                [PLUGIN, "load", field] => {
                    if load.is_none() {
                        load = Some(parse_loadavg(&self.read(LOADAVG_FILE)?)?);
                    }
                    let index = LOAD_FIELDS.iter().position(|f| f == field);
                    if let (Some(values), Some(index)) = (&load, index) {
                        metrics.push(self.metric(metric_type, values[index].into(), now));
                    }
                }
                [PLUGIN, "meminfo", field] => {
                    if meminfo_contents.is_none() {
                        meminfo_contents = Some(self.read(MEMINFO_FILE)?);
                    }
                    let key = MEMINFO_FIELDS
                        .iter()
                        .find(|(name, _)| name == field)
                        .map(|(_, key)| *key);
                    let values = meminfo_contents.as_deref().map(parse_meminfo);
                    match key.and_then(|k| values.as_ref().and_then(|v| v.get(k))) {
                        Some(value) => metrics.push(self.metric(
                            metric_type,
                            MetricValue::Int(*value as i64),
                            now,
                        )),
                        None => debug!("{field} not present in {MEMINFO_FILE}"),
                    }
                }
                [PLUGIN, "cpu", cpu_id, field] => {
                    if stat.is_none() {
                        stat = Some(parse_stat(&self.read(STAT_FILE)?));
                    }
                    let Some(index) = CPU_FIELDS.iter().position(|f| f == field) else {
                        continue;
                    };
                    for (id, values) in stat.iter().flatten() {
                        if *cpu_id != DYNAMIC_VALUE && *cpu_id != id.as_str() {
                            continue;
                        }
                        if let Some(value) = values.get(index) {
                            let mut metric = self.metric(
                                metric_type,
                                MetricValue::Int(*value as i64),
                                now,
                            );
                            metric.namespace = cpu_namespace(id, field);
                            metrics.push(metric);
                        }
                    }
                }
                _ => debug!("Unknown procfs metric type {}", metric_type.namespace),
            }
        }

        Ok(metrics)
    }
}

impl ProcfsCollector {
    fn metric(
        &self,
        metric_type: &Metric,
        value: MetricValue,
        timestamp: chrono::DateTime<Utc>,
    ) -> Metric {
        let mut metric = Metric {
            value,
            timestamp,
            ..metric_type.clone()
        };
        metric.tags.insert("nodename".to_string(), self.nodename.clone());
        metric
    }
}
