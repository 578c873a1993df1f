// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Plugin selection by configured name.

use crate::analyzer::node_analyzer::NodeAnalyzer;
use crate::analyzer::Analyzer;
use crate::collector::procfs::ProcfsCollector;
use crate::collector::Collector;
use crate::errors::ConfigError;
use crate::processor::average::AverageProcessor;
use crate::processor::Processor;
use crate::publisher::file::FilePublisher;
use crate::publisher::Publisher;

/// Builds plugin instances for the names found in task configuration
pub trait PluginFactory: Send + Sync {
    fn collector(&self, name: &str) -> Result<Box<dyn Collector>, ConfigError>;
    fn processor(&self, name: &str) -> Result<Box<dyn Processor>, ConfigError>;
    fn analyzer(&self, name: &str) -> Result<Box<dyn Analyzer>, ConfigError>;
    fn publisher(&self, name: &str) -> Result<Box<dyn Publisher>, ConfigError>;
}

/// The plugins shipped with the agent
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinPlugins;

fn unknown(kind: &'static str, name: &str) -> ConfigError {
    ConfigError::UnknownPlugin {
        kind,
        name: name.to_string(),
    }
}

impl PluginFactory for BuiltinPlugins {
    fn collector(&self, name: &str) -> Result<Box<dyn Collector>, ConfigError> {
        match name {
            "procfs" => Ok(Box::new(ProcfsCollector::new())),
            _ => Err(unknown("collector", name)),
        }
    }

    fn processor(&self, name: &str) -> Result<Box<dyn Processor>, ConfigError> {
        match name {
            "average" => Ok(Box::new(AverageProcessor::new())),
            _ => Err(unknown("processor", name)),
        }
    }

    fn analyzer(&self, name: &str) -> Result<Box<dyn Analyzer>, ConfigError> {
        match name {
            "nodeanalyzer" => Ok(Box::new(NodeAnalyzer::new())),
            _ => Err(unknown("analyzer", name)),
        }
    }

    fn publisher(&self, name: &str) -> Result<Box<dyn Publisher>, ConfigError> {
        match name {
            "file" => Ok(Box::new(FilePublisher)),
            _ => Err(unknown("publisher", name)),
        }
    }
}
