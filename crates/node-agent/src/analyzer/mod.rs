// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod derived;
pub mod node_analyzer;

use crate::config::PluginConfig;
use crate::errors::PluginError;
use crate::metric::Metric;
use async_trait::async_trait;

/// Derives new metrics from the metrics of one tick. Implementations may
/// initialize themselves lazily from `config` on the first call.
#[async_trait]
pub trait Analyzer: Send {
    async fn analyze(
        &mut self,
        metrics: &[Metric],
        config: &PluginConfig,
    ) -> Result<Vec<Metric>, PluginError>;
}
