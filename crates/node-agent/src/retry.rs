// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MULTIPLIER: f64 = 1.5;
pub const DEFAULT_MAX_ELAPSED_TIME: Duration = Duration::from_secs(180);

/// Exponential backoff parameters. Intervals grow by `multiplier` up to
/// `max_interval`; retrying stops once the next wait would exceed
/// `max_elapsed_time` since the first attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub max_elapsed_time: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
            max_elapsed_time: DEFAULT_MAX_ELAPSED_TIME,
        }
    }
}

impl BackoffPolicy {
    pub fn start(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            policy: *self,
            current: self.initial_interval,
            started: Instant::now(),
        }
    }
}

#[derive(Debug)]
pub struct ExponentialBackoff {
    policy: BackoffPolicy,
    current: Duration,
    started: Instant,
}

impl ExponentialBackoff {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Next wait, or `None` when the elapsed-time budget would be exceeded
    pub fn next_backoff(&mut self) -> Option<Duration> {
        let wait = self.current;
        if self.elapsed() + wait > self.policy.max_elapsed_time {
            return None;
        }
        let grown = self.current.mul_f64(self.policy.multiplier);
        self.current = grown.min(self.policy.max_interval);
        Some(wait)
    }
}

/// The last error of a retry sequence that ran out of budget
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub elapsed: Duration,
    pub last_error: E,
}

/// Runs `operation` until it succeeds or the policy's budget is spent.
///
/// # Returns
///
/// * `Ok((value, attempts))` - on the first successful attempt
/// * `Err(Exhausted)` - with the last error once no further wait fits the budget
pub async fn retry<T, E, F, Fut>(
    policy: &BackoffPolicy,
    mut operation: F,
) -> Result<(T, u32), Exhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = policy.start();
    let mut attempts = 0;
    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => return Ok((value, attempts)),
            Err(e) => match backoff.next_backoff() {
                Some(wait) => {
                    debug!("Attempt {attempts} failed, retrying in {wait:?}: {e}");
                    tokio::time::sleep(wait).await;
                }
                None => {
                    return Err(Exhausted {
                        attempts,
                        elapsed: backoff.elapsed(),
                        last_error: e,
                    })
                }
            },
        }
    }
}
