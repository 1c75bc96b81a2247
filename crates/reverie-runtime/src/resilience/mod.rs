//! Resilience patterns for reverie-runtime.
//!
//! This module provides:
//! - Retry with exponential backoff and jitter
//! - Circuit breaker to stop calling a failing dependency
//! - Rate limiter for admission control of AI calls
//! - Fallback chains ending in static content

mod circuit_breaker;
mod fallback;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitSnapshot, CircuitState,
    CircuitStatus,
};
pub use fallback::{execute_with_fallback, FallbackChain, FallbackOutcome, StaticTier, Tier};
pub use rate_limiter::{RateLimitError, RateLimiter, RateLimiterConfig, RateLimiterMetrics};
pub use retry::{RetryConfig, RetryHandler};
