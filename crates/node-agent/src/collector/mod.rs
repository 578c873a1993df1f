// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod procfs;

use crate::config::PluginConfig;
use crate::errors::PluginError;
use crate::metric::Metric;
use async_trait::async_trait;

/// Source of raw metrics for one task
#[async_trait]
pub trait Collector: Send {
    /// The catalog of metric types this collector can produce
    async fn get_metric_types(&mut self, config: &PluginConfig)
        -> Result<Vec<Metric>, PluginError>;

    /// Current values for the given catalog entries
    async fn collect_metrics(&mut self, metric_types: &[Metric])
        -> Result<Vec<Metric>, PluginError>;
}
