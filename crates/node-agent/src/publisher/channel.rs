// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded, retrying delivery in front of one [`Publisher`].
//!
//! Producers hold a cheap [`PublisherHandle`] and `put` batches into a
//! fixed-capacity queue; when the queue is full the oldest batch is evicted.
//! The [`PublisherService`] drains up to `batch_size` batches at a time,
//! publishes them as one call under exponential backoff, and on a terminal
//! failure drops the batch and records a [`PublisherReport`].

use crate::config::{DeliveryConfig, PluginConfig};
use crate::errors::{ConfigError, PublishError};
use crate::metric::Metric;
use crate::publisher::Publisher;
use crate::report::{PublisherReport, ReportStore};
use crate::retry::retry;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

struct Shared {
    queue: ArrayQueue<Vec<Metric>>,
    notify: Notify,
    failure_count: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Clone)]
pub struct PublisherHandle {
    id: Arc<str>,
    shared: Arc<Shared>,
}

impl PublisherHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Enqueues a batch, evicting the oldest one when at capacity. Never
    /// blocks; empty batches are ignored.
    pub fn put(&self, batch: Vec<Metric>) {
        if batch.is_empty() {
            return;
        }
        if self.shared.queue.force_push(batch).is_some() {
            let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
                "Publisher {} queue full, evicted oldest batch ({dropped} evicted so far)",
                self.id
            );
        }
        self.shared.notify.notify_one();
    }

    /// Batches waiting to be published
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    /// Publish calls that ran out of retry budget
    pub fn failure_count(&self) -> u64 {
        self.shared.failure_count.load(Ordering::Relaxed)
    }

    /// Batches evicted because the queue was full
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

pub struct PublisherService {
    id: String,
    plugin: String,
    publisher: Box<dyn Publisher>,
    config: PluginConfig,
    delivery: DeliveryConfig,
    shared: Arc<Shared>,
    reports: Arc<ReportStore>,
}

impl PublisherService {
    pub fn new(
        id: &str,
        plugin: &str,
        publisher: Box<dyn Publisher>,
        config: PluginConfig,
        delivery: DeliveryConfig,
        reports: Arc<ReportStore>,
    ) -> Result<(Self, PublisherHandle), ConfigError> {
        if delivery.queue_size == 0 {
            return Err(ConfigError::Invalid(format!(
                "Publisher {id} queue size must be greater than 0"
            )));
        }

        let shared = Arc::new(Shared {
            queue: ArrayQueue::new(delivery.queue_size),
            notify: Notify::new(),
            failure_count: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let handle = PublisherHandle {
            id: Arc::from(id),
            shared: Arc::clone(&shared),
        };

        let service = Self {
            id: id.to_string(),
            plugin: plugin.to_string(),
            publisher,
            config,
            delivery,
            shared,
            reports,
        };

        Ok((service, handle))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Up to `batch_size` queued batches, concatenated in FIFO order
    fn next_batch(&self) -> Option<Vec<Metric>> {
        let mut combined: Option<Vec<Metric>> = None;
        for _ in 0..self.delivery.batch_size.max(1) {
            match self.shared.queue.pop() {
                Some(batch) => combined.get_or_insert_with(Vec::new).extend(batch),
                None => break,
            }
        }
        combined
    }

    /// Publishes one combined batch. Returns false when the queue was empty.
    pub async fn drain_once(&self) -> bool {
        let Some(metrics) = self.next_batch() else {
            return false;
        };
        // failures are reported and the batch dropped
        let _ = self.deliver(&metrics).await;
        true
    }

    async fn deliver(&self, metrics: &[Metric]) -> Result<(), PublishError> {
        let result = retry(&self.delivery.backoff, || {
            self.publisher.publish(metrics, &self.config)
        })
        .await;

        match result {
            Ok(((), attempts)) => {
                debug!(
                    "Publisher {} delivered {} metrics in {attempts} attempt(s)",
                    self.id,
                    metrics.len()
                );
                Ok(())
            }
            Err(exhausted) => {
                let error = PublishError::RetriesExhausted {
                    attempts: exhausted.attempts,
                    elapsed: exhausted.elapsed,
                    source: exhausted.last_error,
                };
                let failure_count = self.shared.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                error!(
                    "Publisher {} dropped {} metrics: {error}",
                    self.id,
                    metrics.len()
                );
                self.reports.update_publisher_report(
                    &self.id,
                    PublisherReport::now(&self.id, &self.plugin, &error, failure_count),
                );
                Err(error)
            }
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        debug!("Publisher {} ({}) started", self.id, self.plugin);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                drained = self.drain_once() => {
                    if drained {
                        continue;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.shared.notify.notified() => {}
                        _ = tokio::time::sleep(self.delivery.idle_interval) => {}
                    }
                }
            }
        }

        debug!("Publisher {} stopped", self.id);
    }
}
