//! Execution configuration from TOML (`[execution]` and `[execution.retry]`)

use serde::{Deserialize, Serialize};
use std::time::Duration;
use toolgate_application::{ExecutionParams, RetryPolicy};

/// Raw execution configuration from TOML
///
/// # Example
///
/// ```toml
/// [execution]
/// timeout_secs = 30
/// max_output_bytes = 65536
///
/// [execution.retry]
/// max_attempts = 3
/// base_delay_ms = 500
/// max_delay_ms = 8000
/// multiplier = 2.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileExecutionConfig {
    /// Per-call timeout covering every retry; values below one second are raised to one second
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
    pub retry: FileRetryConfig,
}

impl Default for FileExecutionConfig {
    fn default() -> Self {
        let params = ExecutionParams::default();
        Self {
            timeout_secs: params.timeout.as_secs(),
            max_output_bytes: params.max_output_bytes,
            retry: FileRetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileRetryConfig {
    /// Attempts including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for FileRetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            multiplier: policy.multiplier,
        }
    }
}

impl FileExecutionConfig {
    /// Convert to [`ExecutionParams`], clamping out-of-range values.
    pub fn to_execution_params(&self) -> ExecutionParams {
        let retry = RetryPolicy::default()
            .with_max_attempts(self.retry.max_attempts)
            .with_base_delay(Duration::from_millis(self.retry.base_delay_ms))
            .with_max_delay(Duration::from_millis(
                self.retry.max_delay_ms.max(self.retry.base_delay_ms),
            ))
            .with_multiplier(self.retry.multiplier);

        ExecutionParams::default()
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_retry(retry)
            .with_max_output_bytes(self.max_output_bytes.max(1))
    }
}
