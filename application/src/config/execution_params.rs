//! Execution parameters — timeout, retry and output limits for tool calls.
//!
//! [`ExecutionParams`] groups the static parameters that control the
//! [`ExecutionWrapper`](crate::use_cases::execution::ExecutionWrapper).
//! These are application-layer concerns, not domain policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shortest timeout the wrapper will enforce.
pub const MIN_TOOL_TIMEOUT: Duration = Duration::from_secs(1);

/// Exponential backoff for transient tool failures.
///
/// `max_attempts` counts the first try, so the default of 3 means at most
/// two retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (1 for the first retry).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let base = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let clamped = base.min(self.max_delay.as_millis() as f64);
        let delay = if self.jitter {
            clamped + clamped * 0.1 * rand_jitter()
        } else {
            clamped
        };
        Duration::from_millis(delay as u64)
    }
}

/// Pseudo-random value in `[0, 1)` from an LCG over a counter and the clock.
fn rand_jitter() -> f64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEED: AtomicU64 = AtomicU64::new(0);

    const A: u64 = 1103515245;
    const C: u64 = 12345;
    const M: u64 = 1 << 31;

    let seed = SEED.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let next = A.wrapping_mul(seed.wrapping_add(nanos)).wrapping_add(C) % M;
    next as f64 / M as f64
}

/// Tool call control parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionParams {
    /// Wall-clock bound on one call, retries and backoff included.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Outputs longer than this are truncated.
    pub max_output_bytes: usize,
}

impl Default for ExecutionParams {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            max_output_bytes: 64 * 1024,
        }
    }
}

impl ExecutionParams {
    // ==================== Builder Methods ====================

    /// Set the per-call timeout, clamped to [`MIN_TOOL_TIMEOUT`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(MIN_TOOL_TIMEOUT);
        self
    }

    /// Set the timeout without clamping. Test harnesses use sub-second values.
    pub fn with_exact_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let params = ExecutionParams::default();
        assert_eq!(params.timeout, Duration::from_secs(30));
        assert_eq!(params.retry.max_attempts, 3);
        assert_eq!(params.max_output_bytes, 65536);
    }

    #[test]
    fn test_timeout_is_clamped() {
        let params = ExecutionParams::default().with_timeout(Duration::from_millis(10));
        assert_eq!(params.timeout, MIN_TOOL_TIMEOUT);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350))
            .with_jitter(false);
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_retry(40), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::default().with_base_delay(Duration::from_millis(1000));
        for _ in 0..50 {
            let delay = policy.delay_for_retry(1);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn test_max_attempts_at_least_one() {
        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
    }
}
