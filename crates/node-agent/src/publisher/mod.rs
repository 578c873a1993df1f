// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod channel;
pub mod file;

use crate::config::PluginConfig;
use crate::errors::PluginError;
use crate::metric::Metric;
use async_trait::async_trait;

pub use channel::{PublisherHandle, PublisherService};

/// Sink for metrics. Called by a [`PublisherService`] with combined batches.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, metrics: &[Metric], config: &PluginConfig) -> Result<(), PluginError>;
}
