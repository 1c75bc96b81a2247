//! Retry with exponential backoff.
//!
//! Attempt 0 runs immediately. Retry *k* waits
//! `min(max_delay, initial_delay * factor^(k-1))`, plus jitter in
//! `[0, delay)` when enabled. At most `max_retries + 1` attempts run.

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::humantime_duration;

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: usize,

    /// Delay before the first retry
    #[serde(with = "humantime_duration")]
    pub initial_delay: Duration,

    /// Upper bound on any single delay
    #[serde(with = "humantime_duration")]
    pub max_delay: Duration,

    /// Growth factor between consecutive delays
    pub factor: f32,

    /// Add random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            jitter: true,
        }
    }
}

/// Runs an operation until it succeeds, the predicate refuses a retry,
/// or the retry budget is spent.
#[derive(Debug, Clone, Default)]
pub struct RetryHandler {
    config: RetryConfig,
}

impl RetryHandler {
    /// Create a retry handler.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Configuration this handler was built with.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.config.initial_delay)
            .with_max_delay(self.config.max_delay)
            .with_factor(self.config.factor)
            .with_max_times(self.config.max_retries);

        if self.config.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Execute `operation`, retrying errors for which `is_retryable`
    /// returns true. Surfaces the most recent error on give-up.
    pub async fn execute<T, E, F, Fut, P>(&self, operation: F, is_retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
        E: Display,
    {
        operation
            .retry(self.backoff())
            .sleep(tokio::time::sleep)
            .when(is_retryable)
            .notify(|err: &E, delay: Duration| {
                tracing::warn!(
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after failure"
                );
            })
            .await
    }
}
