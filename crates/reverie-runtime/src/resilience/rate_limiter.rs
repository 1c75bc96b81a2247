//! Admission control for AI calls.
//!
//! Two ceilings apply independently: at most `max_concurrent` operations
//! run at once, and at most `requests_per_window` are admitted in any
//! trailing `window`. Excess callers wait in a FIFO queue; when the queue
//! holds `queue_size` waiters, further calls are rejected immediately.
//!
//! A slot is handed to a waiter as a [`Permit`] sent over a oneshot
//! channel. If the waiter has gone away, the permit drops with the
//! channel and the slot returns to the pool.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::humantime_duration;

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Operations allowed to run at once
    pub max_concurrent: usize,

    /// Admissions allowed per trailing window
    pub requests_per_window: usize,

    /// Length of the sliding window
    #[serde(with = "humantime_duration")]
    pub window: Duration,

    /// Waiters allowed before rejecting
    pub queue_size: usize,

    /// Extra wait after the oldest admission leaves the window
    #[serde(with = "humantime_duration")]
    pub safety_margin: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            requests_per_window: 50,
            window: Duration::from_secs(60),
            queue_size: 100,
            safety_margin: Duration::from_millis(10),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limiter queue full ({capacity} waiting)")]
    QueueFull { capacity: usize },

    #[error("rate limiter admits no calls (max_concurrent or requests_per_window is 0)")]
    NoCapacity,
}

/// Point-in-time limiter metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterMetrics {
    pub queued: usize,
    pub running: usize,
    pub requests_in_window: usize,
}

struct LimiterState {
    running: usize,
    waiters: VecDeque<oneshot::Sender<Permit>>,
    admitted: VecDeque<Instant>,
    timer_armed: bool,
}

struct Shared {
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
}

/// A running slot. Dropping it frees the slot and admits the next waiter.
struct Permit {
    shared: Arc<Shared>,
    armed: bool,
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.armed {
            Shared::release(&self.shared);
        }
    }
}

/// Shared admission queue for every AI call in the process.
#[derive(Clone)]
pub struct RateLimiter {
    shared: Arc<Shared>,
}

impl RateLimiter {
    /// Create an empty limiter.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(LimiterState {
                    running: 0,
                    waiters: VecDeque::new(),
                    admitted: VecDeque::new(),
                    timer_armed: false,
                }),
            }),
        }
    }

    /// Configuration this limiter was built with.
    pub fn config(&self) -> &RateLimiterConfig {
        &self.shared.config
    }

    /// Run `operation` once both ceilings admit it.
    ///
    /// Fails immediately with [`RateLimitError::QueueFull`] when it would
    /// have to wait behind a full queue, and with
    /// [`RateLimitError::NoCapacity`] when a zero ceiling means no call
    /// could ever be admitted.
    pub async fn enqueue<F, T>(&self, operation: F) -> Result<T, RateLimitError>
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(operation.await)
    }

    async fn acquire(&self) -> Result<Permit, RateLimitError> {
        let config = &self.shared.config;
        if config.max_concurrent == 0 || config.requests_per_window == 0 {
            tracing::warn!(
                max_concurrent = config.max_concurrent,
                requests_per_window = config.requests_per_window,
                "Rate limiter has no capacity, rejecting call"
            );
            return Err(RateLimitError::NoCapacity);
        }

        let receiver = {
            let mut state = self.shared.state.lock();
            state.waiters.retain(|tx| !tx.is_closed());

            if state.waiters.is_empty() && self.shared.can_admit(&mut state) {
                state.running += 1;
                state.admitted.push_back(Instant::now());
                return Ok(Permit {
                    shared: self.shared.clone(),
                    armed: true,
                });
            }

            let capacity = self.shared.config.queue_size;
            if state.waiters.len() >= capacity {
                tracing::warn!(
                    queued = state.waiters.len(),
                    running = state.running,
                    "Rate limiter queue full, rejecting call"
                );
                return Err(RateLimitError::QueueFull { capacity });
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            tracing::debug!(queued = state.waiters.len(), "Call queued by rate limiter");
            Shared::drain(&self.shared, &mut state);
            rx
        };

        // The sender lives in the queue until a permit is granted.
        receiver.await.map_err(|_| RateLimitError::QueueFull {
            capacity: self.shared.config.queue_size,
        })
    }

    /// Current queue length, running count and admissions in the window.
    pub fn metrics(&self) -> RateLimiterMetrics {
        let state = self.shared.state.lock();
        let now = Instant::now();
        RateLimiterMetrics {
            queued: state.waiters.iter().filter(|tx| !tx.is_closed()).count(),
            running: state.running,
            requests_in_window: state
                .admitted
                .iter()
                .filter(|at| now.duration_since(**at) < self.shared.config.window)
                .count(),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.shared.config)
            .field("metrics", &self.metrics())
            .finish()
    }
}

impl Shared {
    fn prune(&self, state: &mut LimiterState, now: Instant) {
        while let Some(oldest) = state.admitted.front() {
            if now.duration_since(*oldest) >= self.config.window {
                state.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    fn can_admit(&self, state: &mut LimiterState) -> bool {
        self.prune(state, Instant::now());
        state.running < self.config.max_concurrent
            && state.admitted.len() < self.config.requests_per_window
    }

    fn release(shared: &Arc<Shared>) {
        let mut state = shared.state.lock();
        state.running = state.running.saturating_sub(1);
        Shared::drain(shared, &mut state);
    }

    /// Hand free slots to waiters in arrival order.
    fn drain(shared: &Arc<Shared>, state: &mut LimiterState) {
        while !state.waiters.is_empty() && state.running < shared.config.max_concurrent {
            let now = Instant::now();
            shared.prune(state, now);

            if state.admitted.len() >= shared.config.requests_per_window {
                Shared::arm_timer(shared, state);
                return;
            }

            let Some(tx) = state.waiters.pop_front() else {
                return;
            };
            state.running += 1;
            state.admitted.push_back(now);

            let permit = Permit {
                shared: shared.clone(),
                armed: true,
            };
            if let Err(mut permit) = tx.send(permit) {
                // Waiter gave up; undo without re-entering the lock.
                permit.armed = false;
                state.running -= 1;
                state.admitted.pop_back();
            }
        }
    }

    /// Wake the queue when the oldest admission leaves the window.
    fn arm_timer(shared: &Arc<Shared>, state: &mut LimiterState) {
        if state.timer_armed {
            return;
        }
        let Some(oldest) = state.admitted.front().copied() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        state.timer_armed = true;
        let deadline = oldest + shared.config.window + shared.config.safety_margin;
        let shared = shared.clone();
        handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut state = shared.state.lock();
            state.timer_armed = false;
            Shared::drain(&shared, &mut state);
        });
    }
}
