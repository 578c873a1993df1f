// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Node-resident telemetry pipeline.
//!
//! Each configured task collects metrics on its own schedule, optionally
//! processes and analyzes them, and hands the results to bounded, retrying
//! publisher queues. Failures are kept per task and per publisher in a
//! [`report::ReportStore`] served on `/report`.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod agent;
pub mod analyzer;
pub mod collector;
pub mod config;
pub mod errors;
pub mod http;
pub mod metric;
pub mod namespace;
pub mod plugins;
pub mod processor;
pub mod publisher;
pub mod report;
pub mod retry;
pub mod task;
