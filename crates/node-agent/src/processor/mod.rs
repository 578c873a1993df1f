// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod average;

use crate::config::PluginConfig;
use crate::errors::PluginError;
use crate::metric::Metric;
use async_trait::async_trait;

/// Transforms the metrics of one tick before they are published
#[async_trait]
pub trait Processor: Send {
    async fn process(
        &mut self,
        metrics: Vec<Metric>,
        config: &PluginConfig,
    ) -> Result<Vec<Metric>, PluginError>;
}
