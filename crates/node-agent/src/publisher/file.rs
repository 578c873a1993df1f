// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::PluginConfig;
use crate::errors::PluginError;
use crate::metric::{Metric, MetricValue, Tags};
use crate::publisher::Publisher;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

/// Appends each batch as one JSON array line to the file named by the
/// `file` config key
#[derive(Debug, Default)]
pub struct FilePublisher;

#[derive(Serialize)]
struct Record<'a> {
    timestamp: DateTime<Utc>,
    namespace: String,
    data: &'a MetricValue,
    unit: &'a str,
    tags: &'a Tags,
    version: u32,
}

impl<'a> From<&'a Metric> for Record<'a> {
    fn from(metric: &'a Metric) -> Self {
        Self {
            timestamp: metric.timestamp,
            namespace: metric.namespace.to_string(),
            data: &metric.value,
            unit: &metric.unit,
            tags: &metric.tags,
            version: metric.version,
        }
    }
}

#[async_trait]
impl Publisher for FilePublisher {
    async fn publish(&self, metrics: &[Metric], config: &PluginConfig) -> Result<(), PluginError> {
        let path = config.require_str("file")?;
        let records: Vec<Record<'_>> = metrics.iter().map(Record::from).collect();
        let mut line = serde_json::to_vec(&records)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Namespace;

    #[tokio::test]
    async fn test_appends_one_line_per_batch() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("metrics.json");
        let config = PluginConfig::new().with("file", path.to_str().expect("utf8 path"));
        let publisher = FilePublisher;

        let metric = Metric::new(Namespace::from_static(&["cpu", "user"]), 12.5)
            .with_tag("nodename", "node-1");
        publisher
            .publish(&[metric.clone()], &config)
            .await
            .expect("first publish");
        publisher
            .publish(&[metric.clone(), metric], &config)
            .await
            .expect("second publish");

        let contents = std::fs::read_to_string(&path).expect("read output");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let second: serde_json::Value = serde_json::from_str(lines[1]).expect("json line");
        assert_eq!(second.as_array().map(Vec::len), Some(2));
        assert_eq!(second[0]["namespace"], "/cpu/user");
        assert_eq!(second[0]["data"], 12.5);
        assert_eq!(second[0]["tags"]["nodename"], "node-1");
    }

    #[tokio::test]
    async fn test_missing_file_key() {
        let result = FilePublisher.publish(&[], &PluginConfig::new()).await;
        assert!(matches!(result, Err(PluginError::MissingConfig(key)) if key == "file"));
    }
}
