// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric data model shared by every pipeline stage.
//!
//! A metric is identified by its [`Namespace`], an ordered list of segments.
//! Segments are either fixed literals or dynamic placeholders: a dynamic
//! segment carries a placeholder name (for example `cpu_id`) and, in a
//! collector's catalog, the value `*`. Collected metrics replace that value
//! with the concrete one (`cpu0`) while keeping the placeholder name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Value of a dynamic segment in a catalog namespace
pub const DYNAMIC_VALUE: &str = "*";

pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespaceElement {
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Placeholder name, present only on dynamic segments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl NamespaceElement {
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            description: String::new(),
            name: None,
        }
    }

    pub fn dynamic(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            value: DYNAMIC_VALUE.to_string(),
            description: description.into(),
            name: Some(name.into()),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.name.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(Vec<NamespaceElement>);

impl Namespace {
    pub fn new(elements: Vec<NamespaceElement>) -> Self {
        Self(elements)
    }

    /// Builds a namespace of literal segments only.
    ///
    /// # Examples
    ///
    /// ```
    /// use node_agent::metric::Namespace;
    ///
    /// let ns = Namespace::from_static(&["procfs", "load", "load1"]);
    /// assert_eq!(ns.key(), "procfs/load/load1");
    /// ```
    pub fn from_static(segments: &[&str]) -> Self {
        Self(segments.iter().map(|s| NamespaceElement::literal(*s)).collect())
    }

    /// Splits a `/` separated name into literal segments, ignoring a leading `/`
    pub fn parse(name: &str) -> Self {
        Self(
            name.trim_start_matches('/')
                .split('/')
                .map(NamespaceElement::literal)
                .collect(),
        )
    }

    pub fn add_dynamic_element(mut self, name: &str, description: &str) -> Self {
        self.0.push(NamespaceElement::dynamic(name, description));
        self
    }

    pub fn add_static_element(mut self, value: &str) -> Self {
        self.0.push(NamespaceElement::literal(value));
        self
    }

    pub fn elements(&self) -> &[NamespaceElement] {
        &self.0
    }

    pub fn elements_mut(&mut self) -> &mut [NamespaceElement] {
        &mut self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn strings(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.value.as_str()).collect()
    }

    /// Segment values joined by `/`, without a leading separator
    pub fn key(&self) -> String {
        self.strings().join("/")
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.key())
    }
}

/// Metric payload. Catalog entries advertised by a collector carry `Null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Int(v) => Some(*v as f64),
            MetricValue::Float(v) => Some(*v),
            MetricValue::Str(s) => s.trim().parse().ok(),
            MetricValue::Null => None,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Int(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub namespace: Namespace,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "data")]
    pub value: MetricValue,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub version: u32,
}

impl Metric {
    pub fn new(namespace: Namespace, value: impl Into<MetricValue>) -> Self {
        Self {
            namespace,
            timestamp: Utc::now(),
            value: value.into(),
            tags: Tags::new(),
            unit: String::new(),
            version: 1,
        }
    }

    /// A catalog entry: namespace and unit, no value
    pub fn metric_type(namespace: Namespace, unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
            ..Self::new(namespace, MetricValue::Null)
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn name(&self) -> String {
        self.namespace.key()
    }
}
